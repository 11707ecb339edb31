//! OAuth access tokens for Google APIs.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tokio::sync::RwLock;

const METADATA_TOKEN_URL: &str =
    "http://metadata.google.internal/computeMetadata/v1/instance/service-accounts/default/token";

/// Refresh this long before the reported expiry.
const EXPIRY_SKEW_SECS: i64 = 60;

/// Source of bearer tokens.
#[async_trait]
pub trait TokenSource: Send + Sync {
    async fn access_token(&self) -> anyhow::Result<String>;
}

/// Fixed token, for local runs (`GCP_ACCESS_TOKEN`).
pub struct StaticTokenSource {
    token: String,
}

impl StaticTokenSource {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

#[async_trait]
impl TokenSource for StaticTokenSource {
    async fn access_token(&self) -> anyhow::Result<String> {
        Ok(self.token.clone())
    }
}

#[derive(Debug, Deserialize)]
struct MetadataToken {
    access_token: String,
    expires_in: i64,
}

#[derive(Debug, Clone)]
struct CachedToken {
    token: String,
    expires_at: DateTime<Utc>,
}

impl CachedToken {
    fn from_response(resp: MetadataToken, now: DateTime<Utc>) -> Self {
        Self {
            token: resp.access_token,
            expires_at: now + chrono::Duration::seconds(resp.expires_in),
        }
    }

    fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        now + chrono::Duration::seconds(EXPIRY_SKEW_SECS) < self.expires_at
    }
}

/// Service account tokens from the GCE / Cloud Run metadata server, cached
/// until shortly before they expire.
pub struct MetadataTokenSource {
    client: reqwest::Client,
    timeout: Duration,
    cached: RwLock<Option<CachedToken>>,
}

impl MetadataTokenSource {
    pub fn new(client: reqwest::Client) -> Self {
        Self {
            client,
            timeout: Duration::from_secs(2),
            cached: RwLock::new(None),
        }
    }

    async fn fetch(&self) -> anyhow::Result<MetadataToken> {
        let response = self
            .client
            .get(METADATA_TOKEN_URL)
            .header("Metadata-Flavor", "Google")
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| anyhow::anyhow!("metadata token request failed: {}", e))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("metadata token request failed (status={}): {}", status, body);
        }

        response
            .json::<MetadataToken>()
            .await
            .map_err(|e| anyhow::anyhow!("metadata token response unreadable: {}", e))
    }
}

#[async_trait]
impl TokenSource for MetadataTokenSource {
    async fn access_token(&self) -> anyhow::Result<String> {
        if let Some(cached) = self.cached.read().await.as_ref() {
            if cached.is_fresh(Utc::now()) {
                return Ok(cached.token.clone());
            }
        }

        let mut slot = self.cached.write().await;
        // Another caller may have refreshed while we waited for the lock.
        if let Some(cached) = slot.as_ref() {
            if cached.is_fresh(Utc::now()) {
                return Ok(cached.token.clone());
            }
        }

        let fresh = CachedToken::from_response(self.fetch().await?, Utc::now());
        tracing::debug!(expires_at = %fresh.expires_at, "Refreshed metadata access token");
        let token = fresh.token.clone();
        *slot = Some(fresh);
        Ok(token)
    }
}
