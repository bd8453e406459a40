// crates/server/src/session/ticker.rs
//! Per-connection caption ticker.
//!
//! A spawned task that wakes every caption interval and, while the token's
//! session is active, pushes one generated caption to the connection. The
//! ticker is bound to a `CancellationToken`: once cancelled no further tick
//! starts, and a caption already in flight is discarded by the writer, which
//! checks the same token before sending.

use std::sync::Arc;
use std::time::Duration;

use caption_meter_core::{CaptionGenerator, ServerMessage, UsageRegistry};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::Outbound;

/// Lifecycle of an [`OutputTicker`]. Moves forward only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickerState {
    Idle,
    Running,
    Stopped,
}

/// Everything the tick loop needs, moved into the spawned task.
pub struct TickerContext {
    pub token: String,
    pub registry: Arc<UsageRegistry>,
    pub captions: Arc<dyn CaptionGenerator>,
    pub interval: Duration,
    pub outbound: mpsc::UnboundedSender<Outbound>,
}

pub struct OutputTicker {
    cancel: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl OutputTicker {
    pub fn new() -> Self {
        Self {
            cancel: CancellationToken::new(),
            handle: None,
        }
    }

    pub fn state(&self) -> TickerState {
        if self.cancel.is_cancelled() {
            TickerState::Stopped
        } else if self.handle.is_some() {
            TickerState::Running
        } else {
            TickerState::Idle
        }
    }

    /// Spawn the tick loop. Only an idle ticker can start; returns whether it did.
    pub fn start(&mut self, ctx: TickerContext) -> bool {
        if self.state() != TickerState::Idle {
            return false;
        }
        let cancel = self.cancel.clone();
        self.handle = Some(tokio::spawn(run(ctx, cancel)));
        true
    }

    /// Cancel the ticker. Idempotent; returns true only for the call that stopped it.
    pub fn stop(&self) -> bool {
        if self.cancel.is_cancelled() {
            return false;
        }
        self.cancel.cancel();
        true
    }

    /// Cancelled exactly when the ticker is stopped. Outbound writers use it
    /// to drop captions that were queued before the stop took effect.
    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }
}

impl Default for OutputTicker {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for OutputTicker {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn run(ctx: TickerContext, cancel: CancellationToken) {
    // First caption one full interval after admission.
    let mut interval = tokio::time::interval_at(Instant::now() + ctx.interval, ctx.interval);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = interval.tick() => {}
        }

        if !ctx.registry.is_active(&ctx.token) {
            continue;
        }

        let caption = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            caption = ctx.captions.generate() => caption,
        };

        match caption {
            Ok(text) => {
                let msg = Outbound::Caption(ServerMessage::caption(text));
                if ctx.outbound.send(msg).is_err() {
                    debug!(token = %ctx.token, "outbound channel closed, stopping ticker");
                    break;
                }
            }
            Err(e) => {
                warn!(token = %ctx.token, error = %e, "caption generation failed, skipping tick");
            }
        }
    }

    cancel.cancel();
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use caption_meter_core::{FixedCaptions, GenerateError};
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Fails every odd-numbered call.
    struct FlakyCaptions {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl CaptionGenerator for FlakyCaptions {
        async fn generate(&self) -> Result<String, GenerateError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n % 2 == 0 {
                Err(GenerateError::Failed("flaky".into()))
            } else {
                Ok(format!("caption {n}"))
            }
        }
    }

    fn context(
        registry: &Arc<UsageRegistry>,
        captions: Arc<dyn CaptionGenerator>,
    ) -> (TickerContext, mpsc::UnboundedReceiver<Outbound>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let ctx = TickerContext {
            token: "tok".into(),
            registry: Arc::clone(registry),
            captions,
            interval: Duration::from_millis(500),
            outbound: tx,
        };
        (ctx, rx)
    }

    fn drain_captions(rx: &mut mpsc::UnboundedReceiver<Outbound>) -> Vec<String> {
        let mut texts = Vec::new();
        while let Ok(out) = rx.try_recv() {
            match out {
                Outbound::Caption(ServerMessage::Caption { text, .. }) => texts.push(text),
                other => panic!("unexpected outbound {other:?}"),
            }
        }
        texts
    }

    #[tokio::test(start_paused = true)]
    async fn state_moves_forward_only() {
        let registry = Arc::new(UsageRegistry::new());
        let mut ticker = OutputTicker::new();
        assert_eq!(ticker.state(), TickerState::Idle);

        let (ctx, _rx) = context(&registry, Arc::new(FixedCaptions::new("x")));
        assert!(ticker.start(ctx));
        assert_eq!(ticker.state(), TickerState::Running);

        assert!(ticker.stop());
        assert_eq!(ticker.state(), TickerState::Stopped);
        assert!(!ticker.stop());

        let (ctx, _rx) = context(&registry, Arc::new(FixedCaptions::new("x")));
        assert!(!ticker.start(ctx));
        assert_eq!(ticker.state(), TickerState::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn emits_one_caption_per_interval_while_active() {
        let registry = Arc::new(UsageRegistry::new());
        registry.admit("tok").unwrap();
        let mut ticker = OutputTicker::new();
        let (ctx, mut rx) = context(&registry, Arc::new(FixedCaptions::new("Mock caption text")));
        ticker.start(ctx);

        tokio::time::sleep(Duration::from_millis(400)).await;
        assert!(drain_captions(&mut rx).is_empty(), "no caption before the first interval");

        tokio::time::sleep(Duration::from_millis(1_200)).await;
        assert_eq!(drain_captions(&mut rx), vec!["Mock caption text"; 3]);
    }

    #[tokio::test(start_paused = true)]
    async fn silent_while_session_inactive() {
        let registry = Arc::new(UsageRegistry::new());
        registry.create_if_absent("tok");
        let captions = Arc::new(FixedCaptions::new("x"));
        let mut ticker = OutputTicker::new();
        let (ctx, mut rx) = context(&registry, captions.clone());
        ticker.start(ctx);

        tokio::time::sleep(Duration::from_secs(3)).await;
        assert!(drain_captions(&mut rx).is_empty());
        assert_eq!(captions.calls(), 0);
        assert_eq!(ticker.state(), TickerState::Running);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_prevents_further_ticks() {
        let registry = Arc::new(UsageRegistry::new());
        registry.admit("tok").unwrap();
        let captions = Arc::new(FixedCaptions::new("x"));
        let mut ticker = OutputTicker::new();
        let (ctx, mut rx) = context(&registry, captions.clone());
        ticker.start(ctx);

        tokio::time::sleep(Duration::from_millis(1_250)).await;
        assert_eq!(drain_captions(&mut rx).len(), 2);

        ticker.stop();
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(drain_captions(&mut rx).is_empty());
        assert_eq!(captions.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn stops_itself_when_connection_is_gone() {
        let registry = Arc::new(UsageRegistry::new());
        registry.admit("tok").unwrap();
        let mut ticker = OutputTicker::new();
        let (ctx, rx) = context(&registry, Arc::new(FixedCaptions::new("x")));
        ticker.start(ctx);
        drop(rx);

        tokio::time::sleep(Duration::from_millis(600)).await;
        assert_eq!(ticker.state(), TickerState::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn generator_failure_skips_tick_and_keeps_running() {
        let registry = Arc::new(UsageRegistry::new());
        registry.admit("tok").unwrap();
        let mut ticker = OutputTicker::new();
        let (ctx, mut rx) = context(
            &registry,
            Arc::new(FlakyCaptions {
                calls: AtomicUsize::new(0),
            }),
        );
        ticker.start(ctx);

        tokio::time::sleep(Duration::from_millis(2_250)).await;
        assert_eq!(drain_captions(&mut rx), vec!["caption 1", "caption 3"]);
        assert_eq!(ticker.state(), TickerState::Running);
    }
}
