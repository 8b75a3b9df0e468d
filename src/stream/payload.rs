//! Payload decoding: JSON when it parses, raw text when it does not.
//!
//! Frame payloads are semi-structured. The server sends errors as JSON
//! objects and commands as JSON strings, but output lines are raw process
//! text that only occasionally happens to be valid JSON. Decoding therefore
//! never fails; an unparseable payload is itself the result.

use serde_json::Value;

/// A decoded frame payload, tagged so callers can branch.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Structured(Value),
    Raw(String),
}

impl Payload {
    /// Decode payload text, falling back to the raw string.
    pub fn decode(text: &str) -> Payload {
        match serde_json::from_str::<Value>(text) {
            Ok(value) => Payload::Structured(value),
            Err(_) => Payload::Raw(text.to_string()),
        }
    }

    /// The `message` field of a structured error payload, if present.
    pub fn message(&self) -> Option<&str> {
        match self {
            Payload::Structured(value) => value.get("message").and_then(Value::as_str),
            Payload::Raw(_) => None,
        }
    }

    /// Flatten to display text: JSON strings unwrap to their contents,
    /// other structured values render compactly, raw text passes through.
    pub fn into_text(self) -> String {
        match self {
            Payload::Structured(Value::String(s)) => s,
            Payload::Structured(value) => value.to_string(),
            Payload::Raw(s) => s,
        }
    }
}
