// crates/server/src/main.rs
//! Caption-meter server binary.
//!
//! Reads its configuration from the environment, binds the HTTP/WebSocket
//! listener and serves until SIGINT or SIGTERM.

use std::net::SocketAddr;

use anyhow::{Context, Result};
use caption_meter_core::MeterConfig;
use caption_meter_server::{app, AppState};
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Default port for the server.
const DEFAULT_PORT: u16 = 3000;
const DEFAULT_HOST: &str = "0.0.0.0";
const DEFAULT_LOG_FILTER: &str = "warn,caption_meter_server=info,caption_meter_core=info";

/// Get the server port from environment or use default.
fn get_port() -> u16 {
    std::env::var("CAPTION_METER_PORT")
        .ok()
        .or_else(|| std::env::var("PORT").ok())
        .and_then(|p| p.parse().ok())
        .unwrap_or(DEFAULT_PORT)
}

fn get_host() -> String {
    std::env::var("CAPTION_METER_HOST")
        .ok()
        .filter(|h| !h.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_HOST.to_string())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER)),
        )
        .compact()
        .init();

    let config = MeterConfig::from_env().context("Invalid meter configuration")?;

    let addr: SocketAddr = format!("{}:{}", get_host(), get_port())
        .parse()
        .context("Invalid listen address")?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to {addr}"))?;

    info!(
        %addr,
        packet_ms = config.packet_duration_ms,
        caption_interval_ms = config.caption_interval_ms,
        time_limit_ms = config.time_limit_ms,
        "caption-meter listening"
    );

    axum::serve(listener, app(AppState::new(config)))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %e, "Failed to listen for SIGINT");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received SIGINT, shutting down..."),
        _ = terminate => info!("Received SIGTERM, shutting down..."),
    }
}
