// crates/core/src/protocol.rs
//! Streaming wire protocol.
//!
//! Client frames are JSON objects classified by their `type` field. Only data
//! packets have an effect; valid JSON of any other shape is accepted and
//! ignored so newer clients can add message kinds.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ProtocolError;
use crate::limits::Breach;
use crate::now_millis;

/// Policy violation: no token, or token already attached.
pub const CLOSE_POLICY_VIOLATION: u16 = 1008;
/// Normal closure, used after a budget breach.
pub const CLOSE_NORMAL: u16 = 1000;

pub const REASON_TOKEN_REQUIRED: &str = "Authentication token required";
pub const REASON_TOKEN_IN_USE: &str = "Token already has an active session";
pub const REASON_LIMIT_EXCEEDED: &str = "Time limit exceeded";

pub const LIMIT_EXCEEDED_TEXT: &str = "You have exceeded your captioning time limit";
pub const INVALID_MESSAGE_TEXT: &str = "Invalid message format";
pub const CLIENT_NOT_FOUND_TEXT: &str = "Client not found";

/// Discriminators that count as a data packet. `audio` is what `caption-client`
/// sends.
const DATA_TYPES: [&str; 2] = ["data", "audio"];

/// One fixed-duration unit of streamed media. The payload is opaque.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct DataPacket {
    #[serde(default)]
    pub data: Value,
    #[serde(default)]
    pub timestamp: Option<f64>,
}

/// A decoded client frame.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientMessage {
    Data(DataPacket),
    /// Any other well-formed JSON; `kind` is the `type` field if present.
    Other { kind: Option<String> },
}

impl ClientMessage {
    pub fn parse(text: &str) -> Result<Self, ProtocolError> {
        let value: Value = serde_json::from_str(text)?;
        let kind = value.get("type").and_then(Value::as_str).map(str::to_owned);

        match kind {
            Some(k) if DATA_TYPES.contains(&k.as_str()) => {
                Ok(Self::Data(serde_json::from_value(value)?))
            }
            kind => Ok(Self::Other { kind }),
        }
    }

    pub fn parse_binary(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let text = std::str::from_utf8(bytes).map_err(|_| ProtocolError::InvalidUtf8)?;
        Self::parse(text)
    }
}

/// Server-to-client frames.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    Caption {
        text: String,
        timestamp: i64,
    },
    LimitExceeded {
        text: String,
        #[serde(rename = "usageMs")]
        usage_ms: u64,
        #[serde(rename = "limitMs")]
        limit_ms: u64,
    },
    Error {
        text: String,
    },
}

impl ServerMessage {
    /// A caption stamped with the current time.
    pub fn caption(text: impl Into<String>) -> Self {
        Self::Caption {
            text: text.into(),
            timestamp: now_millis(),
        }
    }

    pub fn limit_exceeded(breach: Breach) -> Self {
        Self::LimitExceeded {
            text: LIMIT_EXCEEDED_TEXT.to_string(),
            usage_ms: breach.usage_ms,
            limit_ms: breach.limit_ms,
        }
    }

    pub fn error(text: impl Into<String>) -> Self {
        Self::Error { text: text.into() }
    }

    pub fn to_json(&self) -> String {
        // Serializing these variants cannot fail: every field is a string or number.
        serde_json::to_string(self).unwrap_or_default()
    }
}
