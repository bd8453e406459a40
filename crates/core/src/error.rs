// crates/core/src/error.rs
use thiserror::Error;

/// Errors that can occur when loading `MeterConfig`
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid value for {var}: {value:?} (expected a non-negative integer)")]
    Invalid { var: String, value: String },

    #[error("{var} must be greater than zero")]
    Zero { var: String },
}

/// Errors that can occur when a connection tries to attach to a token
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AdmissionError {
    #[error("Authentication token required")]
    MissingToken,

    #[error("Token already has an active session: {0}")]
    TokenInUse(String),
}

/// Errors produced by a caption generator
#[derive(Debug, Error)]
pub enum GenerateError {
    #[error("Caption generation failed: {0}")]
    Failed(String),
}

/// Errors that can occur when decoding an inbound frame
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("Malformed JSON: {0}")]
    MalformedJson(#[from] serde_json::Error),

    #[error("Binary frame is not valid UTF-8")]
    InvalidUtf8,
}

impl ConfigError {
    pub fn invalid(var: impl Into<String>, value: impl Into<String>) -> Self {
        Self::Invalid {
            var: var.into(),
            value: value.into(),
        }
    }
}
