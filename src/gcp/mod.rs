//! Google Cloud clients for the compute control plane and the override store.
//!
//! Both talk plain REST over `reqwest` and authenticate with OAuth access
//! tokens from a [`TokenSource`].

mod auth;
mod compute;
mod firestore;

use std::time::Duration;

pub use auth::{MetadataTokenSource, StaticTokenSource, TokenSource};
pub use compute::ComputeEngineClient;
pub use firestore::FirestoreOverrideStore;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(2);

/// Build an HTTP client shared by the GCP clients.
pub fn http_client() -> anyhow::Result<reqwest::Client> {
    reqwest::Client::builder()
        .connect_timeout(CONNECT_TIMEOUT)
        .user_agent(concat!("budget-guard/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|e| anyhow::anyhow!("Failed to build HTTP client: {}", e))
}

/// Shape of a Google API error body.
#[derive(Debug, serde::Deserialize)]
struct ApiErrorBody {
    error: ApiError,
}

#[derive(Debug, serde::Deserialize)]
struct ApiError {
    #[serde(default)]
    message: String,
    #[serde(default)]
    status: Option<String>,
}

/// Extract `(status, message)` from an error body, if it has the usual shape.
fn parse_api_error(body: &str) -> Option<(Option<String>, String)> {
    serde_json::from_str::<ApiErrorBody>(body)
        .ok()
        .map(|b| (b.error.status, b.error.message))
}
