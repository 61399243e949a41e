//! Inbound client payloads

use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use thiserror::Error;

/// One inbound client message as sent by the htmx websocket extension
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Envelope {
    #[serde(default, alias = "thread-id-chat")]
    pub thread_id: String,
    #[serde(default, rename = "new-message")]
    pub text: String,
    /// Request headers htmx attaches to every frame; only kept for logging
    #[serde(default, rename = "HEADERS")]
    pub headers: HashMap<String, Value>,
}

#[derive(Debug, Error)]
pub enum EnvelopeError {
    #[error("Malformed message: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("Message has no thread id")]
    MissingThreadId,
}

impl Envelope {
    pub fn decode(raw: &str) -> Result<Self, EnvelopeError> {
        let envelope: Self = serde_json::from_str(raw)?;
        if !envelope.text.is_empty() && envelope.thread_id.is_empty() {
            return Err(EnvelopeError::MissingThreadId);
        }
        Ok(envelope)
    }

    /// Whether this envelope carries no user text (keep-alive)
    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }

    /// htmx names the element that triggered the send in `HX-Trigger`
    pub fn trigger(&self) -> Option<&str> {
        self.headers.get("HX-Trigger").and_then(Value::as_str)
    }
}

/// Best-effort thread id from a payload that failed to decode
pub fn salvage_thread_id(raw: &str) -> Option<String> {
    let value: Value = serde_json::from_str(raw).ok()?;
    ["thread_id", "thread-id-chat"]
        .iter()
        .filter_map(|key| value.get(key).and_then(Value::as_str))
        .find(|id| !id.is_empty())
        .map(str::to_string)
}
