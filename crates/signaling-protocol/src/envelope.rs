//! Raw `{ action, data }` envelope and decoding errors.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Untyped signaling frame as it appears on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub action: String,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub data: Value,
}

impl Envelope {
    /// Parse a text frame into an envelope.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::Malformed`] if the text is not a JSON object
    /// with a string `action` field.
    pub fn parse(text: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(text).map_err(|e| ProtocolError::Malformed(e.to_string()))
    }
}

/// Errors raised while decoding a client frame.
///
/// None of these close the connection; the gateway replies with an error
/// frame and keeps reading.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    /// Frame is not a valid envelope.
    #[error("Malformed message: {0}")]
    Malformed(String),

    /// Envelope names an action outside the known set.
    #[error("Unknown action: {0}")]
    UnknownAction(String),

    /// Action is known but its `data` object does not match.
    #[error("Invalid data for {action}: {reason}")]
    InvalidData { action: String, reason: String },

    /// Binary frames are not part of the protocol.
    #[error("Binary frames are not supported")]
    BinaryFrame,
}

impl ProtocolError {
    /// Returns a client-safe message (no parser internals).
    #[must_use]
    pub fn client_message(&self) -> String {
        match self {
            ProtocolError::Malformed(_) => "Malformed message".to_string(),
            ProtocolError::UnknownAction(action) => format!("Unknown action: {action}"),
            ProtocolError::InvalidData { action, .. } => format!("Invalid data for {action}"),
            ProtocolError::BinaryFrame => "Binary frames are not supported".to_string(),
        }
    }
}
