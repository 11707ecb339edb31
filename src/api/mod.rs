//! HTTP API for the budget guard.
//!
//! ## Endpoints
//!
//! - `POST /` - Pub/Sub push endpoint for budget notifications
//! - `POST /events` - Same, for direct delivery of the bare notification JSON
//! - `GET /health` - Health check

mod routes;

pub use routes::{router, serve, AppState};
