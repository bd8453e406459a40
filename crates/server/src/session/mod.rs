// crates/server/src/session/mod.rs
//! Per-connection session state machine.
//!
//! A `Session` exists from successful admission until teardown. It owns the
//! connection's caption ticker, turns inbound frames into usage accounting,
//! and queues every outbound frame on a channel drained by the socket writer.
//!
//! ```text
//!   admit ──► Open ──(limit breach)──► Closing ──► Closed
//!               └──────(client close / transport error)──┘
//! ```

pub mod ticker;

use std::sync::Arc;

use caption_meter_core::protocol::{
    CLIENT_NOT_FOUND_TEXT, CLOSE_NORMAL, INVALID_MESSAGE_TEXT, REASON_LIMIT_EXCEEDED,
};
use caption_meter_core::{
    AdmissionError, Breach, ClientMessage, ConnectionId, MeterConfig, PacketOutcome,
    ProtocolError, ServerMessage, UsageRegistry,
};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::state::AppState;
use ticker::{OutputTicker, TickerContext, TickerState};

/// A frame queued for the socket writer.
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    /// Ticker output. Dropped by the writer once the ticker is stopped.
    Caption(ServerMessage),
    Reply(ServerMessage),
    Close { code: u16, reason: &'static str },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Open,
    /// Server-initiated close sent; inbound frames are discarded.
    Closing,
    Closed,
}

pub struct Session {
    token: String,
    connection: ConnectionId,
    phase: Phase,
    registry: Arc<UsageRegistry>,
    config: MeterConfig,
    ticker: OutputTicker,
    outbound: mpsc::UnboundedSender<Outbound>,
}

impl Session {
    /// Admit `token` and start its caption ticker.
    pub fn open(
        state: &AppState,
        token: &str,
        outbound: mpsc::UnboundedSender<Outbound>,
    ) -> Result<Self, AdmissionError> {
        let admission = state.registry.admit(token)?;
        info!(
            token = %token,
            connection = admission.connection,
            created = admission.created,
            usage_ms = admission.record.total_accrued_ms,
            "client connected"
        );

        let mut ticker = OutputTicker::new();
        ticker.start(TickerContext {
            token: token.to_string(),
            registry: Arc::clone(&state.registry),
            captions: Arc::clone(&state.captions),
            interval: state.config.caption_interval(),
            outbound: outbound.clone(),
        });

        Ok(Self {
            token: token.to_string(),
            connection: admission.connection,
            phase: Phase::Open,
            registry: Arc::clone(&state.registry),
            config: state.config,
            ticker,
            outbound,
        })
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn is_open(&self) -> bool {
        self.phase == Phase::Open
    }

    pub fn ticker_state(&self) -> TickerState {
        self.ticker.state()
    }

    /// Cancelled once the ticker stops; see [`OutputTicker::cancellation`].
    pub fn caption_gate(&self) -> CancellationToken {
        self.ticker.cancellation()
    }

    pub fn handle_text(&mut self, text: &str) {
        self.handle_frame(ClientMessage::parse(text));
    }

    pub fn handle_binary(&mut self, bytes: &[u8]) {
        self.handle_frame(ClientMessage::parse_binary(bytes));
    }

    fn handle_frame(&mut self, frame: Result<ClientMessage, ProtocolError>) {
        if self.phase != Phase::Open {
            debug!(token = %self.token, phase = ?self.phase, "discarding frame on closing session");
            return;
        }

        match frame {
            Ok(ClientMessage::Data(_)) => self.ingest_packet(),
            Ok(ClientMessage::Other { kind }) => {
                debug!(token = %self.token, kind = ?kind, "ignoring client message");
            }
            Err(e) => {
                debug!(token = %self.token, error = %e, "malformed client message");
                self.reply(ServerMessage::error(INVALID_MESSAGE_TEXT));
            }
        }
    }

    fn ingest_packet(&mut self) {
        let outcome = self.registry.record_packet(
            &self.token,
            self.config.packet_duration_ms,
            self.config.time_limit_ms,
        );

        match outcome {
            Some(PacketOutcome::Accrued { total_ms }) => {
                debug!(token = %self.token, usage_ms = total_ms, "packet accrued");
            }
            Some(PacketOutcome::LimitExceeded(breach)) => self.enforce_limit(breach),
            None => {
                debug!(token = %self.token, "no usage record, replying with error");
                self.reply(ServerMessage::error(CLIENT_NOT_FOUND_TEXT));
            }
        }
    }

    /// The registry has already cleared `session_active`; notify and close.
    fn enforce_limit(&mut self, breach: Breach) {
        info!(
            token = %self.token,
            usage_ms = breach.usage_ms,
            limit_ms = breach.limit_ms,
            "time limit exceeded, closing session"
        );
        self.phase = Phase::Closing;
        // Stop before queueing the notice so no caption can follow it.
        self.ticker.stop();
        self.reply(ServerMessage::limit_exceeded(breach));
        let _ = self.outbound.send(Outbound::Close {
            code: CLOSE_NORMAL,
            reason: REASON_LIMIT_EXCEEDED,
        });
    }

    fn reply(&self, msg: ServerMessage) {
        if self.outbound.send(Outbound::Reply(msg)).is_err() {
            debug!(token = %self.token, "outbound channel closed, reply dropped");
        }
    }

    /// Stop the ticker and detach from the usage record. Idempotent.
    pub fn teardown(&mut self) {
        if self.phase == Phase::Closed {
            return;
        }
        self.phase = Phase::Closed;
        self.ticker.stop();
        let was_active = self.registry.release(&self.token, self.connection);
        info!(token = %self.token, was_active, "client disconnected");
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.teardown();
    }
}
