//! Envelope wire format.
//!
//! Every inbound text frame (WebSocket text message or SSE `data:` block)
//! is a JSON object:
//! ```text
//! { "topic": "doc-42", "type": "comment:new", "payload": { ... } }
//! ```
//!
//! Only `topic` and `type` are inspected; `payload` is carried through as
//! an opaque JSON value for the business-event consumer to parse.

use std::time::SystemTime;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A routed event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Logical channel the event belongs to
    pub topic: String,
    /// Event name, e.g. `comment:new`
    #[serde(rename = "type")]
    pub event_type: String,
    /// Opaque business payload (`null` when absent)
    #[serde(default)]
    pub payload: serde_json::Value,
    /// Local time the frame was decoded
    #[serde(skip, default = "SystemTime::now")]
    pub received_at: SystemTime,
}

/// Envelope decode failures. Frames that fail to decode are dropped.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("Malformed envelope: {0}")]
    Malformed(String),
    #[error("Envelope missing required field `{0}`")]
    MissingField(&'static str),
}

/// Lenient shape used for decoding, so missing fields are reported by name
/// instead of as a generic serde error. `type` and `event` are separate keys;
/// a frame may carry both.
#[derive(Deserialize)]
struct WireEnvelope {
    topic: Option<String>,
    #[serde(rename = "type")]
    event_type: Option<String>,
    event: Option<String>,
    #[serde(default)]
    payload: serde_json::Value,
}

impl Envelope {
    /// Build an envelope stamped with the current time.
    pub fn new(
        topic: impl Into<String>,
        event_type: impl Into<String>,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            topic: topic.into(),
            event_type: event_type.into(),
            payload,
            received_at: SystemTime::now(),
        }
    }

    /// Decode a raw text frame.
    pub fn decode(raw: &str) -> Result<Self, DecodeError> {
        Self::decode_with_fallback_type(raw, None)
    }

    /// Decode a frame whose transport may name the event out-of-band
    /// (the SSE `event:` field).
    ///
    /// The event name is the first non-empty of: in-band `type`, in-band
    /// `event`, `fallback_type`.
    pub fn decode_with_fallback_type(
        raw: &str,
        fallback_type: Option<&str>,
    ) -> Result<Self, DecodeError> {
        let wire: WireEnvelope =
            serde_json::from_str(raw).map_err(|e| DecodeError::Malformed(e.to_string()))?;

        let topic = wire
            .topic
            .filter(|t| !t.is_empty())
            .ok_or(DecodeError::MissingField("topic"))?;
        let event_type = wire
            .event_type
            .filter(|t| !t.is_empty())
            .or_else(|| wire.event.filter(|t| !t.is_empty()))
            .or_else(|| {
                fallback_type
                    .filter(|t| !t.is_empty())
                    .map(str::to_owned)
            })
            .ok_or(DecodeError::MissingField("type"))?;

        Ok(Self {
            topic,
            event_type,
            payload: wire.payload,
            received_at: SystemTime::now(),
        })
    }

    /// Serialize to a text frame (topic, type and payload only).
    pub fn encode(&self) -> Result<String, DecodeError> {
        serde_json::to_string(self).map_err(|e| DecodeError::Malformed(e.to_string()))
    }
}
