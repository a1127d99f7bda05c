//! Broadcast event envelope and its wire codec.
//!
//! Every message on the bus is a JSON envelope:
//!
//! ```json
//! { "event_kind": "team_created", "data": { "team_id": 7, "team_name": "Reds" } }
//! ```
//!
//! The envelope is decoded by the dispatch loop before routing. Anything that
//! does not match this shape is a [`EventError::Malformed`] envelope: it is
//! dropped and logged, never surfaced to a caller.
//!
//! # Example
//!
//! ```
//! use courier_core::event::EventEnvelope;
//! use serde_json::json;
//!
//! let bytes = br#"{"event_kind":"score_created","data":{"id":"42","score":10}}"#;
//! let envelope = EventEnvelope::decode(bytes).unwrap();
//!
//! assert_eq!(envelope.event_kind, "score_created");
//! assert_eq!(envelope.data["score"], json!(10));
//! ```

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// Error types for envelope encoding and decoding.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EventError {
    /// The bytes do not form a valid envelope.
    #[error("Malformed event envelope: {0}")]
    Malformed(String),

    /// The envelope could not be encoded.
    #[error("Failed to encode event envelope: {0}")]
    Encode(String),
}

/// An inbound or outbound broadcast event.
///
/// `data` is always a JSON object; scalar or array payloads are rejected at
/// decode time.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope {
    /// Event kind used for routing (e.g. `"team_created"`).
    pub event_kind: String,

    /// Structured payload.
    pub data: Map<String, Value>,
}

/// Raw shape used while decoding, so a non-object `data` can be reported
/// with a precise message instead of a generic serde error.
#[derive(Deserialize)]
struct RawEnvelope {
    event_kind: String,
    data: Value,
}

impl EventEnvelope {
    /// Create a new envelope.
    #[must_use]
    pub fn new(event_kind: impl Into<String>, data: Map<String, Value>) -> Self {
        Self {
            event_kind: event_kind.into(),
            data,
        }
    }

    /// Decode an envelope from its JSON wire form.
    ///
    /// # Errors
    ///
    /// Returns [`EventError::Malformed`] if the bytes are not JSON, a field
    /// is missing, the kind is empty, or `data` is not an object.
    pub fn decode(bytes: &[u8]) -> Result<Self, EventError> {
        let raw: RawEnvelope =
            serde_json::from_slice(bytes).map_err(|e| EventError::Malformed(e.to_string()))?;

        if raw.event_kind.trim().is_empty() {
            return Err(EventError::Malformed("event_kind is empty".to_string()));
        }

        match raw.data {
            Value::Object(data) => Ok(Self {
                event_kind: raw.event_kind,
                data,
            }),
            other => Err(EventError::Malformed(format!(
                "data must be an object, got {}",
                json_type_name(&other)
            ))),
        }
    }

    /// Encode the envelope to its JSON wire form.
    ///
    /// # Errors
    ///
    /// Returns [`EventError::Encode`] if serialization fails.
    pub fn encode(&self) -> Result<Vec<u8>, EventError> {
        serde_json::to_vec(self).map_err(|e| EventError::Encode(e.to_string()))
    }

    /// Payload as an owned JSON value.
    #[must_use]
    pub fn data_value(&self) -> Value {
        Value::Object(self.data.clone())
    }
}

const fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
