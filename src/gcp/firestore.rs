//! Override flag stored as a Firestore document.
//!
//! The document `{collection}/{key}` holds a boolean field `enabled`.

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::Value;

use super::{parse_api_error, TokenSource};
use crate::overrides::{OverrideStore, StoreError};

const FIRESTORE_BASE_URL: &str = "https://firestore.googleapis.com/v1";

pub struct FirestoreOverrideStore {
    client: reqwest::Client,
    tokens: Arc<dyn TokenSource>,
    base_url: String,
    project_id: Option<String>,
    collection: String,
}

impl FirestoreOverrideStore {
    pub fn new(
        client: reqwest::Client,
        tokens: Arc<dyn TokenSource>,
        project_id: Option<String>,
        collection: impl Into<String>,
    ) -> Self {
        Self {
            client,
            tokens,
            base_url: FIRESTORE_BASE_URL.to_string(),
            project_id,
            collection: collection.into(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// `None` when no project is configured.
    fn document_url(&self, key: &str) -> Option<String> {
        let project_id = self.project_id.as_deref()?;
        Some(format!(
            "{}/projects/{}/databases/(default)/documents/{}/{}",
            self.base_url, project_id, self.collection, key
        ))
    }
}

/// Pull `fields.enabled.booleanValue` out of a Firestore document.
fn parse_document(doc: &Value) -> Result<bool, StoreError> {
    doc.pointer("/fields/enabled/booleanValue")
        .and_then(Value::as_bool)
        .ok_or_else(|| StoreError::Malformed("document has no boolean 'enabled' field".to_string()))
}

fn error_from_response(status: StatusCode, key: &str, body: &str) -> StoreError {
    let detail = parse_api_error(body)
        .map(|(_, message)| message)
        .unwrap_or_else(|| format!("status {}", status));
    match status {
        StatusCode::NOT_FOUND => StoreError::NotFound(key.to_string()),
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => StoreError::PermissionDenied(detail),
        _ => StoreError::Unavailable(detail),
    }
}

#[async_trait]
impl OverrideStore for FirestoreOverrideStore {
    async fn read_flag(&self, key: &str) -> Result<bool, StoreError> {
        let url = self
            .document_url(key)
            .ok_or_else(|| StoreError::Unavailable("no override project configured".to_string()))?;

        let token = self
            .tokens
            .access_token()
            .await
            .map_err(|e| StoreError::PermissionDenied(e.to_string()))?;

        let response = self
            .client
            .get(url)
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(error_from_response(status, key, &body));
        }

        let doc: Value = response
            .json()
            .await
            .map_err(|e| StoreError::Malformed(e.to_string()))?;
        parse_document(&doc)
    }
}
