// crates/server/src/routes.rs
//! HTTP routes around the streaming core.
//!
//! - `POST /api/token` issues a fresh token with an inactive zero-usage record
//! - `GET /api/usage` reports usage for the bearer token
//! - `GET /health` liveness check

use axum::{
    extract::State,
    http::{header::AUTHORIZATION, HeaderMap},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use tracing::info;

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct TokenResponse {
    pub token: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageResponse {
    pub token: String,
    pub total_time_ms: u64,
    pub time_limit: u64,
    pub is_active: bool,
    pub remaining_time_ms: u64,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/api/token", post(issue_token))
        .route("/api/usage", get(usage))
}

/// POST /api/token: create a token and its usage record.
pub async fn issue_token(State(state): State<AppState>) -> Json<TokenResponse> {
    let token = uuid::Uuid::new_v4().to_string();
    state.registry.create_if_absent(&token);
    info!(token = %token, "token issued");
    Json(TokenResponse { token })
}

/// GET /api/usage: usage for `Authorization: Bearer <token>`.
pub async fn usage(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> ApiResult<Json<UsageResponse>> {
    let token = bearer_token(&headers).ok_or(ApiError::MissingToken)?;
    let record = state
        .registry
        .get(token)
        .ok_or_else(|| ApiError::ClientNotFound(token.to_string()))?;

    Ok(Json(UsageResponse {
        token: token.to_string(),
        total_time_ms: record.total_accrued_ms,
        time_limit: state.config.time_limit_ms,
        is_active: record.session_active,
        remaining_time_ms: state.config.remaining_ms(record.total_accrued_ms),
    }))
}

/// Second word of the `Authorization` header, e.g. the token in `Bearer <token>`.
fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let (_, token) = value.trim().split_once(' ')?;
    let token = token.trim();
    (!token.is_empty()).then_some(token)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers_with(auth: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_str(auth).unwrap());
        headers
    }

    #[test]
    fn bearer_token_extracted() {
        assert_eq!(bearer_token(&headers_with("Bearer abc-123")), Some("abc-123"));
    }

    #[test]
    fn bearer_token_missing() {
        assert_eq!(bearer_token(&HeaderMap::new()), None);
        assert_eq!(bearer_token(&headers_with("Bearer")), None);
        assert_eq!(bearer_token(&headers_with("Bearer   ")), None);
    }
}
