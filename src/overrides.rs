//! Manual shutdown override.
//!
//! An operator can set a boolean flag in the override store to hold off an
//! automatic shutdown. The flag only ever delays a shutdown: once spend
//! reaches `max_override_ratio` the flag is ignored, and any failure to read
//! it counts as "no override".

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default ceiling above which an enabled override no longer applies.
pub const DEFAULT_MAX_OVERRIDE_RATIO: f64 = 1.5;

/// Default bound on a single override store read.
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(5);

/// Errors from reading the override flag.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Override key not found: {0}")]
    NotFound(String),

    #[error("Permission denied reading override: {0}")]
    PermissionDenied(String),

    #[error("Override read timed out after {0:?}")]
    Timeout(Duration),

    #[error("Malformed override record: {0}")]
    Malformed(String),

    #[error("Override store unavailable: {0}")]
    Unavailable(String),
}

/// Key-value store holding the override flag.
#[async_trait]
pub trait OverrideStore: Send + Sync {
    /// Read the boolean flag stored under `key`.
    async fn read_flag(&self, key: &str) -> Result<bool, StoreError>;
}

/// Why an override is (or is not) in effect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverrideReason {
    /// The event never reached the override check.
    NotRequested,
    /// The store could not be read; treated as no override.
    StoreUnavailable,
    /// The flag is set to false.
    Disabled,
    /// The flag is set to true. Only active when below the ratio ceiling.
    Enabled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OverrideDecision {
    pub active: bool,
    pub reason: OverrideReason,
}

impl OverrideDecision {
    pub fn not_requested() -> Self {
        Self {
            active: false,
            reason: OverrideReason::NotRequested,
        }
    }

    fn inactive(reason: OverrideReason) -> Self {
        Self {
            active: false,
            reason,
        }
    }
}

/// Reads the override flag and applies the ratio ceiling.
pub struct OverrideGate {
    store: Arc<dyn OverrideStore>,
    key: String,
    max_override_ratio: f64,
    read_timeout: Duration,
}

impl OverrideGate {
    pub fn new(store: Arc<dyn OverrideStore>, key: impl Into<String>) -> Self {
        Self {
            store,
            key: key.into(),
            max_override_ratio: DEFAULT_MAX_OVERRIDE_RATIO,
            read_timeout: DEFAULT_READ_TIMEOUT,
        }
    }

    pub fn with_max_override_ratio(mut self, ratio: f64) -> Self {
        self.max_override_ratio = ratio;
        self
    }

    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    /// One bounded read of the flag; an elapsed timeout becomes [`StoreError::Timeout`].
    async fn read_flag(&self) -> Result<bool, StoreError> {
        tokio::time::timeout(self.read_timeout, self.store.read_flag(&self.key))
            .await
            .unwrap_or(Err(StoreError::Timeout(self.read_timeout)))
    }

    /// Decide whether an override suppresses shutdown at `observed_ratio`.
    ///
    /// Never fails. A store error or timeout yields an inactive decision.
    pub async fn check_override(&self, observed_ratio: f64) -> OverrideDecision {
        let flag = match self.read_flag().await {
            Ok(flag) => flag,
            Err(e) => {
                tracing::warn!(key = %self.key, error = %e, "Override store read failed; proceeding without override");
                return OverrideDecision::inactive(OverrideReason::StoreUnavailable);
            }
        };

        if !flag {
            return OverrideDecision::inactive(OverrideReason::Disabled);
        }

        if observed_ratio < self.max_override_ratio {
            tracing::info!(
                ratio = observed_ratio,
                ceiling = self.max_override_ratio,
                "Override enabled and within ceiling"
            );
            OverrideDecision {
                active: true,
                reason: OverrideReason::Enabled,
            }
        } else {
            tracing::warn!(
                ratio = observed_ratio,
                ceiling = self.max_override_ratio,
                "Override enabled but spend is past the ceiling; ignoring it"
            );
            OverrideDecision::inactive(OverrideReason::Enabled)
        }
    }
}
