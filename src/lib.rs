//! # Budget Guard
//!
//! Stops a compute instance when billing notifications show spend has
//! crossed its budget, unless an operator override is holding it off.
//!
//! ## Architecture
//!
//! ```text
//! billing event -> budget::classify -> overrides::OverrideGate -> shutdown::ShutdownExecutor -> Compute API
//! ```
//!
//! - [`budget`]: event decoding and ratio classification
//! - [`overrides`]: bounded manual override
//! - [`shutdown`]: stop requests with retry
//! - [`controller`]: per-event orchestration
//! - [`gcp`]: REST clients for Compute Engine, Firestore and access tokens
//! - [`api`]: HTTP push endpoint

pub mod api;
pub mod budget;
pub mod config;
pub mod controller;
pub mod gcp;
pub mod overrides;
pub mod shutdown;

#[cfg(test)]
pub(crate) mod testing;

pub use config::Config;
pub use controller::{BudgetController, EventReport};
