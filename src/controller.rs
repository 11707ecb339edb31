//! Budget controller - one decision per billing event.
//!
//! # Event Flow
//! ```text
//! Received -> Classified -> Safe | Warning                        -> Done
//!                        -> Critical -> OverrideChecked -> Overridden -> Done
//!                                                     -> NotOverridden -> ShutdownAttempted -> Done
//! ```
//!
//! Every event ends in `Done` with an [`EventReport`]. Nothing carries over
//! from one event to the next; concurrent events share only the immutable
//! controller and its clients.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;
use uuid::Uuid;

use crate::budget::{classify, decode_payload, BudgetEvent, RatioClass, Thresholds};
use crate::config::{Config, TargetConfig};
use crate::overrides::{OverrideDecision, OverrideGate, OverrideStore};
use crate::shutdown::{ComputeApi, ComputeError, ShutdownExecutor, ShutdownOutcome, ShutdownTarget};

/// Non-fatal errors recorded against an event.
#[derive(Debug, Clone, PartialEq, Error, Serialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum ControllerError {
    /// The event could not be decoded.
    #[error("Data error: {0}")]
    Data(String),

    /// The shutdown target is not fully configured.
    #[error("Configuration error: missing {}", .0.join(", "))]
    Config(Vec<String>),

    /// The compute API kept failing after all retries.
    #[error("Transient API error: {0}")]
    TransientApi(ComputeError),
}

/// Stages an event passes through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Received,
    Classified,
    OverrideChecked,
    ShutdownAttempted,
    Done,
}

/// How an event was finally handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Disposition {
    /// Malformed event; nothing was done.
    Rejected,
    Safe,
    Warning,
    /// Critical, but an override held off the shutdown.
    Overridden,
    /// Critical with no target configured.
    MissingTarget,
    ShutdownRequested,
    ShutdownFailed,
}

/// Record of one event's handling.
#[derive(Debug, Clone, Serialize)]
pub struct EventReport {
    pub invocation_id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    pub received_at: DateTime<Utc>,
    pub stages: Vec<Stage>,
    pub disposition: Disposition,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub classification: Option<RatioClass>,
    #[serde(rename = "override")]
    pub override_decision: OverrideDecision,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shutdown: Option<ShutdownOutcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ControllerError>,
}

impl EventReport {
    fn received(invocation_id: Uuid, message_id: Option<String>) -> Self {
        Self {
            invocation_id,
            message_id,
            received_at: Utc::now(),
            stages: vec![Stage::Received],
            disposition: Disposition::Rejected,
            classification: None,
            override_decision: OverrideDecision::not_requested(),
            shutdown: None,
            error: None,
        }
    }

    fn enter(&mut self, stage: Stage) {
        self.stages.push(stage);
    }

    fn finish(mut self, disposition: Disposition) -> Self {
        self.disposition = disposition;
        self.enter(Stage::Done);
        self
    }

    /// Whether a stop request was attempted for this event.
    pub fn shutdown_attempted(&self) -> bool {
        self.stages.contains(&Stage::ShutdownAttempted)
    }
}

/// Orchestrates classification, override check and shutdown.
pub struct BudgetController {
    thresholds: Thresholds,
    target: Result<ShutdownTarget, Vec<&'static str>>,
    gate: OverrideGate,
    executor: ShutdownExecutor,
}

impl BudgetController {
    pub fn new(
        thresholds: Thresholds,
        target: &TargetConfig,
        gate: OverrideGate,
        executor: ShutdownExecutor,
    ) -> Self {
        Self {
            thresholds,
            target: target.resolve(),
            gate,
            executor,
        }
    }

    /// Wire a controller from configuration and injected clients.
    pub fn from_config(
        config: &Config,
        store: Arc<dyn OverrideStore>,
        compute: Arc<dyn ComputeApi>,
        cancel_token: CancellationToken,
    ) -> Self {
        let gate = OverrideGate::new(store, config.override_key.clone())
            .with_max_override_ratio(config.max_override_ratio)
            .with_read_timeout(config.override_timeout);
        let executor = ShutdownExecutor::new(compute)
            .with_policy(config.retry.clone())
            .with_call_timeout(config.stop_timeout)
            .with_cancel_token(cancel_token);
        Self::new(config.thresholds, &config.target, gate, executor)
    }

    /// Handle a raw inbound payload.
    pub async fn handle_payload(&self, payload: &[u8]) -> EventReport {
        let invocation_id = Uuid::new_v4();
        let span = tracing::info_span!("budget_event", invocation_id = %invocation_id);

        async {
            match decode_payload(payload) {
                Ok(decoded) => {
                    let report = EventReport::received(invocation_id, decoded.message_id);
                    self.process(report, &decoded.event).await
                }
                Err(e) => {
                    tracing::warn!(error = %e, bytes = payload.len(), "Discarding malformed budget event");
                    let mut report = EventReport::received(invocation_id, None);
                    report.error = Some(ControllerError::Data(e.to_string()));
                    report.finish(Disposition::Rejected)
                }
            }
        }
        .instrument(span)
        .await
    }

    /// Handle an already decoded event.
    pub async fn handle_event(&self, event: &BudgetEvent) -> EventReport {
        let invocation_id = Uuid::new_v4();
        let span = tracing::info_span!("budget_event", invocation_id = %invocation_id);
        self.process(EventReport::received(invocation_id, None), event)
            .instrument(span)
            .await
    }

    async fn process(&self, mut report: EventReport, event: &BudgetEvent) -> EventReport {
        let class = classify(event.cost_amount, event.budget_amount, self.thresholds);
        report.classification = Some(class);
        report.enter(Stage::Classified);

        tracing::info!(
            cost = event.cost_amount,
            budget = event.budget_amount,
            currency = event.currency_code.as_deref().unwrap_or("-"),
            budget_name = event.budget_display_name.as_deref().unwrap_or("-"),
            classification = %class,
            "Budget event classified"
        );

        let ratio = match class {
            RatioClass::Safe(_) => return report.finish(Disposition::Safe),
            RatioClass::Warning(_) => return report.finish(Disposition::Warning),
            RatioClass::Critical(ratio) => ratio,
        };

        let decision = self.gate.check_override(ratio).await;
        report.override_decision = decision;
        report.enter(Stage::OverrideChecked);
        if decision.active {
            tracing::warn!(ratio, reason = ?decision.reason, "Spend is critical but shutdown is overridden");
            return report.finish(Disposition::Overridden);
        }

        let target = match &self.target {
            Ok(target) => target,
            Err(missing) => {
                tracing::error!(missing = ?missing, "Spend is critical but no shutdown target is configured");
                report.error = Some(ControllerError::Config(
                    missing.iter().map(|m| m.to_string()).collect(),
                ));
                return report.finish(Disposition::MissingTarget);
            }
        };

        tracing::warn!(ratio, instance = %target, "Spend is critical; stopping instance");
        report.enter(Stage::ShutdownAttempted);
        let outcome = self.executor.stop(target).await;

        let disposition = if outcome.succeeded {
            Disposition::ShutdownRequested
        } else {
            let err = outcome
                .last_error
                .clone()
                .unwrap_or_else(|| ComputeError::new("UNKNOWN", "stop failed without an error"));
            tracing::error!(
                instance = %target,
                attempts = outcome.attempts,
                code = %err.code,
                error = %err.message,
                "Failed to stop instance"
            );
            report.error = Some(ControllerError::TransientApi(err));
            Disposition::ShutdownFailed
        };
        report.shutdown = Some(outcome);
        report.finish(disposition)
    }
}
