// crates/server/src/error.rs
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// Structured JSON error response for API errors
#[derive(Debug, Serialize)]
#[cfg_attr(test, derive(serde::Deserialize))]
pub struct ErrorResponse {
    pub error: String,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
        }
    }
}

/// API error types that map to HTTP status codes
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Authentication token required")]
    MissingToken,

    #[error("Client not found: {0}")]
    ClientNotFound(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_response) = match &self {
            ApiError::MissingToken => {
                tracing::debug!("Usage query without bearer token");
                (
                    StatusCode::UNAUTHORIZED,
                    ErrorResponse::new("Authentication token required"),
                )
            }
            ApiError::ClientNotFound(token) => {
                tracing::debug!(token = %token, "Usage query for unknown token");
                (
                    StatusCode::NOT_FOUND,
                    ErrorResponse::new("Client not found"),
                )
            }
        };

        (status, Json(error_response)).into_response()
    }
}

/// Result type alias for API handlers
pub type ApiResult<T> = Result<T, ApiError>;
