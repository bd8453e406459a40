// crates/server/src/lib.rs
//! Caption-meter server library.
//!
//! Axum application serving metered captioning sessions over WebSocket,
//! plus a small HTTP API for issuing tokens and querying usage.

pub mod error;
pub mod routes;
pub mod session;
pub mod state;
pub mod ws;

pub use error::*;
pub use state::AppState;

use axum::{routing::get, Router};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Create the Axum application with all routes and middleware.
///
/// This sets up:
/// - HTTP routes (health, token issuance, usage)
/// - the WebSocket endpoint on `/` and `/ws`
/// - CORS allowing any origin
/// - Request tracing
pub fn app(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    routes::router()
        .route("/", get(ws::ws_handler))
        .route("/ws", get(ws::ws_handler))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
