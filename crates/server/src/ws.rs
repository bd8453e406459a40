// crates/server/src/ws.rs
//! WebSocket transport for a metered session.
//!
//! - `WS /?token=<token>` and `WS /ws?token=<token>`
//!
//! Admission runs inside the upgrade callback so that admit and release
//! always happen in the same task. The socket is split: this task reads
//! frames and drives the [`Session`], a writer task drains the session's
//! outbound queue.

use std::time::Duration;

use axum::{
    extract::ws::{CloseFrame, Message, WebSocket},
    extract::{Query, State, WebSocketUpgrade},
    response::Response,
};
use caption_meter_core::protocol::{
    CLOSE_POLICY_VIOLATION, REASON_TOKEN_IN_USE, REASON_TOKEN_REQUIRED,
};
use caption_meter_core::AdmissionError;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::session::{Outbound, Session};
use crate::state::AppState;

/// How long after a server-initiated close the client has to acknowledge it.
const CLOSE_ACK_TIMEOUT: Duration = Duration::from_secs(5);
/// How long the writer gets to flush after the read loop ends.
const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Debug, Deserialize)]
pub struct ConnectParams {
    pub token: Option<String>,
}

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<ConnectParams>,
    State(state): State<AppState>,
) -> Response {
    let token = params.token.unwrap_or_default();
    if token.is_empty() {
        tracing::debug!("WebSocket connection without token, rejecting");
        return ws.on_upgrade(|socket| reject(socket, REASON_TOKEN_REQUIRED));
    }

    ws.on_upgrade(move |socket| handle_socket(socket, state, token))
}

async fn reject(mut socket: WebSocket, reason: &'static str) {
    let _ = socket
        .send(Message::Close(Some(CloseFrame {
            code: CLOSE_POLICY_VIOLATION,
            reason: reason.into(),
        })))
        .await;
}

async fn handle_socket(socket: WebSocket, state: AppState, token: String) {
    let (tx, rx) = mpsc::unbounded_channel();
    let mut session = match Session::open(&state, &token, tx) {
        Ok(session) => session,
        Err(e) => {
            tracing::info!(token = %token, error = %e, "admission refused");
            let reason = match e {
                AdmissionError::MissingToken => REASON_TOKEN_REQUIRED,
                AdmissionError::TokenInUse(_) => REASON_TOKEN_IN_USE,
            };
            reject(socket, reason).await;
            return;
        }
    };

    let (sink, mut stream) = socket.split();
    let mut writer = tokio::spawn(write_outbound(sink, rx, session.caption_gate()));

    // Set once when the session leaves `Open`; discarded frames do not extend it.
    let mut close_deadline: Option<Instant> = None;

    loop {
        let next = if session.is_open() {
            stream.next().await
        } else {
            let deadline =
                *close_deadline.get_or_insert_with(|| Instant::now() + CLOSE_ACK_TIMEOUT);
            match tokio::time::timeout_at(deadline, stream.next()).await {
                Ok(next) => next,
                Err(_) => {
                    tracing::debug!(token = %token, "close acknowledgement timed out");
                    break;
                }
            }
        };

        match next {
            Some(Ok(Message::Text(text))) => session.handle_text(text.as_str()),
            Some(Ok(Message::Binary(bytes))) => session.handle_binary(&bytes),
            Some(Ok(Message::Close(frame))) => {
                tracing::debug!(
                    token = %token,
                    code = frame.as_ref().map(|f| f.code),
                    "client closed connection"
                );
                break;
            }
            // Ping/pong are answered by the transport.
            Some(Ok(_)) => {}
            Some(Err(e)) => {
                tracing::warn!(token = %token, error = %e, "WebSocket transport error");
                break;
            }
            None => break,
        }
    }

    session.teardown();
    drop(session);

    if tokio::time::timeout(WRITER_DRAIN_TIMEOUT, &mut writer)
        .await
        .is_err()
    {
        writer.abort();
    }
}

/// Drain the session's outbound queue onto the socket.
///
/// Captions are dropped once `gate` is cancelled, so none can follow a
/// limit notice. Ends after sending a close frame or when every sender is gone.
async fn write_outbound(
    mut sink: SplitSink<WebSocket, Message>,
    mut rx: mpsc::UnboundedReceiver<Outbound>,
    gate: CancellationToken,
) {
    while let Some(out) = rx.recv().await {
        let message = match out {
            Outbound::Caption(_) if gate.is_cancelled() => continue,
            Outbound::Caption(msg) | Outbound::Reply(msg) => Message::Text(msg.to_json().into()),
            Outbound::Close { code, reason } => {
                let _ = sink
                    .send(Message::Close(Some(CloseFrame {
                        code,
                        reason: reason.into(),
                    })))
                    .await;
                break;
            }
        };

        if sink.send(message).await.is_err() {
            tracing::debug!("client gone, stopping writer");
            break;
        }
    }

    let _ = sink.close().await;
}
