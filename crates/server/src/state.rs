// crates/server/src/state.rs
//! Application state for the Axum server.

use std::sync::Arc;

use caption_meter_core::{CaptionGenerator, LoremCaptions, MeterConfig, UsageRegistry};

/// Shared state handed to every route and streaming connection.
#[derive(Clone)]
pub struct AppState {
    /// Token -> usage record. Entries live for the whole process.
    pub registry: Arc<UsageRegistry>,
    pub config: MeterConfig,
    /// Source of caption text for the output ticker.
    pub captions: Arc<dyn CaptionGenerator>,
}

impl AppState {
    /// State with the default lorem-ipsum caption source.
    pub fn new(config: MeterConfig) -> Self {
        Self::with_generator(config, Arc::new(LoremCaptions::new()))
    }

    pub fn with_generator(config: MeterConfig, captions: Arc<dyn CaptionGenerator>) -> Self {
        Self {
            registry: Arc::new(UsageRegistry::new()),
            config,
            captions,
        }
    }
}
