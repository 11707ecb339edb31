//! Shutdown module - stopping the compute instance that is burning budget.
//!
//! # Key Concepts
//! - Target: the one instance this deployment is allowed to stop
//! - ComputeApi: the external control plane; its stop call is idempotent
//! - Executor: issues the stop with bounded retry per [`RetryPolicy`]

mod retry;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

pub use retry::{Backoff, RetryPolicy};

/// Default bound on a single stop request.
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(30);

/// Identity of the instance to stop.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ShutdownTarget {
    pub project_id: String,
    pub zone: String,
    pub instance_id: String,
}

impl ShutdownTarget {
    pub fn new(
        project_id: impl Into<String>,
        zone: impl Into<String>,
        instance_id: impl Into<String>,
    ) -> Self {
        Self {
            project_id: project_id.into(),
            zone: zone.into(),
            instance_id: instance_id.into(),
        }
    }
}

impl std::fmt::Display for ShutdownTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "projects/{}/zones/{}/instances/{}",
            self.project_id, self.zone, self.instance_id
        )
    }
}

/// Error from the compute control plane, with a machine-readable code.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("compute API error [{code}]: {message}")]
pub struct ComputeError {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub http_status: Option<u16>,
}

impl ComputeError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            http_status: None,
        }
    }

    pub fn with_http_status(mut self, status: u16) -> Self {
        self.http_status = Some(status);
        self
    }

    pub fn timeout(after: Duration) -> Self {
        Self::new(
            "DEADLINE_EXCEEDED",
            format!("stop request timed out after {:?}", after),
        )
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Self::new("UNAVAILABLE", message)
    }
}

/// Handle to the asynchronous stop operation started by the control plane.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StopOperation {
    pub name: String,
    pub status: String,
}

/// Compute control plane.
///
/// Implementations must treat stopping an already stopping or stopped
/// instance as success.
#[async_trait]
pub trait ComputeApi: Send + Sync {
    async fn stop_instance(&self, target: &ShutdownTarget) -> Result<StopOperation, ComputeError>;
}

/// Result of one [`ShutdownExecutor::stop`] call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShutdownOutcome {
    pub attempts: u32,
    pub succeeded: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<ComputeError>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub operation: Option<StopOperation>,
    /// The retry loop was abandoned because the invocation was cancelled.
    #[serde(default)]
    pub cancelled: bool,
}

/// Issues stop requests for a single target with bounded retry.
pub struct ShutdownExecutor {
    api: Arc<dyn ComputeApi>,
    policy: RetryPolicy,
    call_timeout: Duration,
    cancel_token: Option<CancellationToken>,
}

impl ShutdownExecutor {
    pub fn new(api: Arc<dyn ComputeApi>) -> Self {
        Self {
            api,
            policy: RetryPolicy::default(),
            call_timeout: DEFAULT_CALL_TIMEOUT,
            cancel_token: None,
        }
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    /// Abandon pending retries once `token` is cancelled.
    pub fn with_cancel_token(mut self, token: CancellationToken) -> Self {
        self.cancel_token = Some(token);
        self
    }

    async fn wait(&self, delay: Duration) -> bool {
        match &self.cancel_token {
            Some(token) => tokio::select! {
                biased;
                _ = token.cancelled() => false,
                _ = tokio::time::sleep(delay) => true,
            },
            None => {
                tokio::time::sleep(delay).await;
                true
            }
        }
    }

    /// Stop `target`, retrying failed attempts per the policy.
    ///
    /// The first attempt is always made, even if the token is already
    /// cancelled; cancellation only cuts short the backoff before a retry.
    ///
    /// # Postconditions
    /// - `1 <= outcome.attempts <= policy.max_attempts`
    /// - `!outcome.succeeded` implies `outcome.last_error.is_some()`
    pub async fn stop(&self, target: &ShutdownTarget) -> ShutdownOutcome {
        let max_attempts = self.policy.attempts();
        let mut outcome = ShutdownOutcome {
            attempts: 0,
            succeeded: false,
            last_error: None,
            operation: None,
            cancelled: false,
        };

        for attempt in 1..=max_attempts {
            if attempt > 1 {
                let delay = self.policy.delay_before(attempt);
                tracing::debug!(instance = %target, attempt, delay_ms = delay.as_millis() as u64, "Backing off before stop retry");
                if !self.wait(delay).await {
                    outcome.cancelled = true;
                    break;
                }
            }
            outcome.attempts = attempt;
            let result =
                match tokio::time::timeout(self.call_timeout, self.api.stop_instance(target)).await {
                    Ok(result) => result,
                    Err(_) => Err(ComputeError::timeout(self.call_timeout)),
                };

            match result {
                Ok(operation) => {
                    tracing::info!(
                        instance = %target,
                        attempt,
                        operation = %operation.name,
                        status = %operation.status,
                        "Stop request accepted"
                    );
                    outcome.succeeded = true;
                    outcome.operation = Some(operation);
                    outcome.last_error = None;
                    return outcome;
                }
                Err(e) => {
                    tracing::warn!(
                        instance = %target,
                        attempt,
                        max_attempts,
                        code = %e.code,
                        error = %e.message,
                        "Stop request failed"
                    );
                    outcome.last_error = Some(e);
                }
            }
        }

        if outcome.cancelled {
            tracing::warn!(instance = %target, attempts = outcome.attempts, "Stop retry loop abandoned on cancellation");
        }
        outcome
    }
}
