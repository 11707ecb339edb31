//! Budget module - billing events and spend classification.
//!
//! # Key Concepts
//! - Event: one cost/budget observation from the billing notification stream
//! - Classification: turns cost/budget into a ratio and a Safe/Warning/Critical class

mod classifier;
mod event;

pub use classifier::{
    classify, RatioClass, Thresholds, DEFAULT_CRITICAL_THRESHOLD, DEFAULT_WARN_THRESHOLD,
};
pub use event::{decode_payload, BudgetEvent, DecodedEvent, EventError};
