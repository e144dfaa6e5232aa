//! Core types for the a3s-subscriber system
//!
//! All serialized types use camelCase JSON for wire compatibility.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A raw message handed to the dispatcher by a broker client
#[derive(Debug, Clone)]
pub struct Delivery {
    /// Message body as received from the broker
    pub body: Bytes,

    /// Broker-assigned handle for this specific delivery
    pub delivery_tag: u64,

    /// Application-level correlation identifier
    pub correlation_id: String,

    /// Whether the broker has delivered this message before
    pub redelivered: bool,
}

impl Delivery {
    /// Create a first-time delivery
    pub fn new(
        body: impl Into<Bytes>,
        delivery_tag: u64,
        correlation_id: impl Into<String>,
    ) -> Self {
        Self {
            body: body.into(),
            delivery_tag,
            correlation_id: correlation_id.into(),
            redelivered: false,
        }
    }
}

/// Default event envelope consumed from agent queues
///
/// The `type` field names the job or notification; everything else the
/// producer sends lives in `payload`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    /// Unique event identifier (evt-<uuid>)
    #[serde(default = "new_event_id")]
    pub id: String,

    /// Event type identifier (e.g., "run_checkpoint.received")
    #[serde(rename = "type")]
    pub event_type: String,

    /// Organization the event belongs to, if scoped
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub organization_id: Option<String>,

    /// Event payload — arbitrary JSON data
    #[serde(default)]
    pub payload: serde_json::Value,

    /// Unix timestamp in milliseconds
    #[serde(default)]
    pub timestamp: u64,

    /// Optional key-value metadata
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

fn new_event_id() -> String {
    format!("evt-{}", uuid::Uuid::new_v4())
}

impl Event {
    /// Create a new event with auto-generated id and timestamp
    pub fn new(event_type: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            id: new_event_id(),
            event_type: event_type.into(),
            organization_id: None,
            payload,
            timestamp: now_millis(),
            metadata: HashMap::new(),
        }
    }

    /// Scope the event to an organization
    pub fn with_organization(mut self, organization_id: impl Into<String>) -> Self {
        self.organization_id = Some(organization_id.into());
        self
    }

    /// Add a metadata entry
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// Current time in Unix milliseconds
fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_creation() {
        let event = Event::new("run_checkpoint.received", serde_json::json!({"id": "c-1"}));

        assert!(event.id.starts_with("evt-"));
        assert_eq!(event.event_type, "run_checkpoint.received");
        assert!(event.organization_id.is_none());
        assert!(event.timestamp > 0);
        assert!(event.metadata.is_empty());
    }

    #[test]
    fn test_event_builders() {
        let event = Event::new("draft_datasource_config.requested", serde_json::json!({}))
            .with_organization("org-42")
            .with_metadata("env", "production");

        assert_eq!(event.organization_id.as_deref(), Some("org-42"));
        assert_eq!(event.metadata["env"], "production");
    }

    #[test]
    fn test_event_wire_format() {
        let event = Event::new("run_checkpoint.received", serde_json::json!({"n": 1}))
            .with_organization("org-1");

        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"type\":\"run_checkpoint.received\""));
        assert!(json.contains("\"organizationId\":\"org-1\""));
        assert!(!json.contains("eventType"));
    }

    #[test]
    fn test_event_minimal_payload_defaults() {
        // Producers may send only the type
        let event: Event = serde_json::from_str(r#"{"type": "onboarding.requested"}"#).unwrap();
        assert_eq!(event.event_type, "onboarding.requested");
        assert!(event.id.starts_with("evt-"));
        assert_eq!(event.payload, serde_json::Value::Null);
        assert_eq!(event.timestamp, 0);
    }

    #[test]
    fn test_event_missing_type_is_rejected() {
        let result = serde_json::from_str::<Event>(r#"{"payload": {}}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_delivery_new() {
        let delivery = Delivery::new(&b"{}"[..], 7, "corr-1");
        assert_eq!(delivery.delivery_tag, 7);
        assert_eq!(delivery.correlation_id, "corr-1");
        assert_eq!(&delivery.body[..], b"{}");
        assert!(!delivery.redelivered);
    }
}
