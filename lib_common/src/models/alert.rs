//! # Alert Records
//!
//! An alert is the unit that travels through the relay: the topic it arrived
//! on, the payload the sensor sent and the UTC instant the relay ingested it.
//! Payloads are conventionally JSON objects shaped `{tipo, region, mensaje}`,
//! but nothing upstream enforces that, so every reader decodes them
//! opportunistically and keeps the raw text when decoding fails.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Payload field holding the alert category.
pub const FIELD_TIPO: &str = "tipo";
/// Payload field holding the area the alert originates from.
pub const FIELD_REGION: &str = "region";
/// Payload field holding the free-text message.
pub const FIELD_MENSAJE: &str = "mensaje";

/// # Alert Payload
///
/// The payload as handed to readers. Serializes transparently: a structured
/// payload becomes the JSON value itself, a raw one becomes a JSON string.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AlertPayload {
    /// The payload parsed as JSON.
    Structured(Value),
    /// The payload text as received, because it was not valid JSON.
    Raw(String),
}

impl AlertPayload {
    /// Parses `raw` as JSON, falling back to the original text.
    pub fn decode(raw: &str) -> Self {
        match serde_json::from_str::<Value>(raw) {
            Ok(value) => AlertPayload::Structured(value),
            Err(e) => {
                tracing::debug!(error = %e, size = raw.len(), "payload is not JSON, keeping raw text");
                AlertPayload::Raw(raw.to_string())
            }
        }
    }

    /// Text of a top-level field of a structured object payload.
    ///
    /// Strings are returned as-is and other scalars in their JSON spelling,
    /// which mirrors how PostgreSQL's `->>` operator renders them. Raw
    /// payloads, non-object payloads, nulls and nested values yield `None`.
    pub fn field(&self, key: &str) -> Option<String> {
        let AlertPayload::Structured(Value::Object(map)) = self else {
            return None;
        };
        match map.get(key)? {
            Value::String(s) => Some(s.clone()),
            Value::Null => None,
            Value::Array(_) | Value::Object(_) => None,
            scalar => Some(scalar.to_string()),
        }
    }
}

/// # Alert
///
/// An alert in flight, before it has a storage identity. This is also the
/// frame pushed to dashboard subscribers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    /// The broker topic the alert was received on (e.g. `alertas/general`).
    pub topic: String,
    /// The decoded payload.
    pub payload: AlertPayload,
    /// Ingestion time, UTC.
    pub timestamp: DateTime<Utc>,
}

impl Alert {
    /// Builds an alert from the raw wire payload.
    pub fn from_wire(topic: &str, raw_payload: &str, timestamp: DateTime<Utc>) -> Self {
        Self {
            topic: topic.to_string(),
            payload: AlertPayload::decode(raw_payload),
            timestamp,
        }
    }
}

/// # Stored Alert
///
/// A persisted alert row. Rows are written once and never updated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredAlert {
    /// Monotonically increasing surrogate key assigned by the store.
    pub id: i64,
    /// The broker topic the alert was received on.
    pub topic: String,
    /// The payload, decoded when it is JSON.
    pub payload: AlertPayload,
    /// Ingestion time, UTC.
    pub timestamp: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn structured_payload_exposes_fields() {
        let payload = AlertPayload::decode(r#"{"tipo":"sismo","region":"Quito","mensaje":"Temblor","nivel":4}"#);
        assert_eq!(payload.field(FIELD_TIPO).as_deref(), Some("sismo"));
        assert_eq!(payload.field(FIELD_REGION).as_deref(), Some("Quito"));
        assert_eq!(payload.field("nivel").as_deref(), Some("4"));
        assert_eq!(payload.field("missing"), None);
    }

    #[test]
    fn unparseable_payload_is_kept_raw() {
        let payload = AlertPayload::decode("sismo en Quito, nivel 4");
        assert_eq!(payload, AlertPayload::Raw("sismo en Quito, nivel 4".to_string()));
        assert_eq!(payload.field(FIELD_REGION), None);
    }

    #[test]
    fn payload_serializes_transparently() {
        let raw = serde_json::to_value(AlertPayload::Raw("not json".into())).unwrap();
        assert_eq!(raw, json!("not json"));

        let structured = serde_json::to_value(AlertPayload::decode(r#"{"tipo":"incendio"}"#)).unwrap();
        assert_eq!(structured, json!({"tipo": "incendio"}));
    }

    #[test]
    fn non_object_json_has_no_fields() {
        let payload = AlertPayload::decode("[1,2,3]");
        assert!(matches!(payload, AlertPayload::Structured(_)));
        assert_eq!(payload.field(FIELD_TIPO), None);
    }
}
