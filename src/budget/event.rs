//! Inbound billing events.
//!
//! Budget notifications arrive either as the bare notification JSON or
//! wrapped in a Pub/Sub push envelope whose `message.data` holds the
//! notification as base64. Both forms decode to a [`BudgetEvent`].

use std::collections::HashMap;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A single cost/budget observation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BudgetEvent {
    pub cost_amount: f64,
    pub budget_amount: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub budget_display_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub currency_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alert_threshold_exceeded: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost_interval_start: Option<String>,
}

impl BudgetEvent {
    pub fn new(cost_amount: f64, budget_amount: f64) -> Self {
        Self {
            cost_amount,
            budget_amount,
            budget_display_name: None,
            currency_code: None,
            alert_threshold_exceeded: None,
            cost_interval_start: None,
        }
    }
}

/// Reasons a payload could not be turned into a [`BudgetEvent`].
#[derive(Debug, Error)]
pub enum EventError {
    #[error("Payload is not valid JSON: {0}")]
    InvalidJson(String),

    #[error("Pub/Sub message has no data")]
    EmptyMessage,

    #[error("Pub/Sub message data is not valid base64: {0}")]
    InvalidBase64(String),

    #[error("Invalid budget notification: {0}")]
    InvalidEvent(String),
}

#[derive(Debug, Deserialize)]
struct PushEnvelope {
    message: PushMessage,
    #[serde(default)]
    #[allow(dead_code)]
    subscription: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PushMessage {
    #[serde(default)]
    data: Option<String>,
    #[serde(default)]
    #[allow(dead_code)]
    attributes: HashMap<String, String>,
    #[serde(default, alias = "message_id", rename = "messageId")]
    message_id: Option<String>,
}

/// A decoded event plus the transport message id, when there was one.
#[derive(Debug, Clone)]
pub struct DecodedEvent {
    pub event: BudgetEvent,
    pub message_id: Option<String>,
}

/// Decode an inbound payload.
///
/// Accepts a Pub/Sub push envelope or the bare notification object.
pub fn decode_payload(payload: &[u8]) -> Result<DecodedEvent, EventError> {
    let value: serde_json::Value =
        serde_json::from_slice(payload).map_err(|e| EventError::InvalidJson(e.to_string()))?;

    if value.get("message").is_some() {
        let envelope: PushEnvelope = serde_json::from_value(value)
            .map_err(|e| EventError::InvalidEvent(format!("bad push envelope: {}", e)))?;
        let data = envelope
            .message
            .data
            .filter(|d| !d.is_empty())
            .ok_or(EventError::EmptyMessage)?;
        let raw = BASE64
            .decode(data.trim())
            .map_err(|e| EventError::InvalidBase64(e.to_string()))?;
        let event = parse_event(&raw)?;
        return Ok(DecodedEvent {
            event,
            message_id: envelope.message.message_id,
        });
    }

    let event = serde_json::from_value(value).map_err(|e| EventError::InvalidEvent(e.to_string()))?;
    Ok(DecodedEvent {
        event,
        message_id: None,
    })
}

fn parse_event(raw: &[u8]) -> Result<BudgetEvent, EventError> {
    serde_json::from_slice(raw).map_err(|e| EventError::InvalidEvent(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decode_bare_notification() {
        let payload = json!({
            "budgetDisplayName": "prod",
            "costAmount": 120.5,
            "budgetAmount": 100,
            "currencyCode": "USD",
            "alertThresholdExceeded": 1.0
        });
        let decoded = decode_payload(payload.to_string().as_bytes()).unwrap();
        assert_eq!(decoded.event.cost_amount, 120.5);
        assert_eq!(decoded.event.budget_amount, 100.0);
        assert_eq!(decoded.event.budget_display_name.as_deref(), Some("prod"));
        assert!(decoded.message_id.is_none());
    }

    #[test]
    fn test_decode_push_envelope() {
        let inner = json!({"costAmount": 50.0, "budgetAmount": 0.0}).to_string();
        let payload = json!({
            "message": {
                "data": BASE64.encode(inner),
                "messageId": "123",
                "attributes": {"schemaVersion": "1.0"}
            },
            "subscription": "projects/p/subscriptions/s"
        });
        let decoded = decode_payload(payload.to_string().as_bytes()).unwrap();
        assert_eq!(decoded.event, BudgetEvent::new(50.0, 0.0));
        assert_eq!(decoded.message_id.as_deref(), Some("123"));
    }

    #[test]
    fn test_malformed_payloads() {
        assert!(matches!(
            decode_payload(b"not json"),
            Err(EventError::InvalidJson(_))
        ));
        assert!(matches!(
            decode_payload(br#"{"costAmount": "lots", "budgetAmount": 1}"#),
            Err(EventError::InvalidEvent(_))
        ));
        assert!(matches!(
            decode_payload(br#"{"budgetAmount": 1}"#),
            Err(EventError::InvalidEvent(_))
        ));
        assert!(matches!(
            decode_payload(br#"{"message": {}}"#),
            Err(EventError::EmptyMessage)
        ));
        assert!(matches!(
            decode_payload(br#"{"message": {"data": "%%%"}}"#),
            Err(EventError::InvalidBase64(_))
        ));
    }
}
