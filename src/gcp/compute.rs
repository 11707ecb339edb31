//! Compute Engine `instances.stop`.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;

use super::{parse_api_error, TokenSource};
use crate::shutdown::{ComputeApi, ComputeError, ShutdownTarget, StopOperation};

const COMPUTE_BASE_URL: &str = "https://compute.googleapis.com/compute/v1";

/// Compute Engine REST client.
///
/// Stopping an instance that is already stopping or terminated returns a
/// fresh operation rather than an error, so repeated calls are safe.
pub struct ComputeEngineClient {
    client: reqwest::Client,
    tokens: Arc<dyn TokenSource>,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct Operation {
    name: String,
    #[serde(default)]
    status: Option<String>,
}

impl ComputeEngineClient {
    pub fn new(client: reqwest::Client, tokens: Arc<dyn TokenSource>) -> Self {
        Self {
            client,
            tokens,
            base_url: COMPUTE_BASE_URL.to_string(),
        }
    }

    /// Point the client at a different API root (emulators, proxies).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    fn stop_url(&self, target: &ShutdownTarget) -> String {
        format!(
            "{}/projects/{}/zones/{}/instances/{}/stop",
            self.base_url, target.project_id, target.zone, target.instance_id
        )
    }
}

/// Map a failed HTTP response to a [`ComputeError`].
fn error_from_response(status: reqwest::StatusCode, body: &str) -> ComputeError {
    let (code, message) = match parse_api_error(body) {
        Some((Some(code), message)) => (code, message),
        Some((None, message)) => (format!("HTTP_{}", status.as_u16()), message),
        None => (format!("HTTP_{}", status.as_u16()), body.trim().to_string()),
    };
    ComputeError::new(code, message).with_http_status(status.as_u16())
}

#[async_trait]
impl ComputeApi for ComputeEngineClient {
    async fn stop_instance(&self, target: &ShutdownTarget) -> Result<StopOperation, ComputeError> {
        let token = self
            .tokens
            .access_token()
            .await
            .map_err(|e| ComputeError::new("UNAUTHENTICATED", e.to_string()))?;

        let response = self
            .client
            .post(self.stop_url(target))
            .bearer_auth(token)
            .header(reqwest::header::CONTENT_LENGTH, "0")
            .send()
            .await
            .map_err(|e| ComputeError::transport(format!("stop request failed: {}", e)))?;

        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(error_from_response(status, &body));
        }

        let op: Operation = serde_json::from_str(&body).map_err(|e| {
            ComputeError::new("INVALID_RESPONSE", format!("unreadable operation: {}", e))
        })?;
        Ok(StopOperation {
            name: op.name,
            status: op.status.unwrap_or_else(|| "PENDING".to_string()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gcp::StaticTokenSource;

    #[test]
    fn test_stop_url() {
        let client = ComputeEngineClient::new(
            reqwest::Client::new(),
            Arc::new(StaticTokenSource::new("t")),
        );
        let url = client.stop_url(&ShutdownTarget::new("acme", "us-east1-b", "vm-1"));
        assert_eq!(
            url,
            "https://compute.googleapis.com/compute/v1/projects/acme/zones/us-east1-b/instances/vm-1/stop"
        );

        let local = client.with_base_url("http://localhost:9000/");
        assert_eq!(
            local.stop_url(&ShutdownTarget::new("p", "z", "i")),
            "http://localhost:9000/projects/p/zones/z/instances/i/stop"
        );
    }

    #[test]
    fn test_error_mapping_uses_api_status() {
        let body = r#"{"error":{"code":429,"message":"Quota exceeded","status":"RESOURCE_EXHAUSTED"}}"#;
        let err = error_from_response(reqwest::StatusCode::TOO_MANY_REQUESTS, body);
        assert_eq!(err.code, "RESOURCE_EXHAUSTED");
        assert_eq!(err.message, "Quota exceeded");
        assert_eq!(err.http_status, Some(429));
    }

    #[test]
    fn test_error_mapping_without_json_body() {
        let err = error_from_response(reqwest::StatusCode::BAD_GATEWAY, "upstream reset\n");
        assert_eq!(err.code, "HTTP_502");
        assert_eq!(err.message, "upstream reset");
    }

    #[test]
    fn test_operation_parses() {
        let op: Operation = serde_json::from_str(
            r#"{"kind":"compute#operation","name":"operation-123","status":"RUNNING"}"#,
        )
        .unwrap();
        assert_eq!(op.name, "operation-123");
        assert_eq!(op.status.as_deref(), Some("RUNNING"));
    }
}
