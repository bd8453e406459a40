// crates/core/src/lib.rs
//! Caption-meter core library.
//!
//! Transport-free pieces of the metered captioning service: the usage
//! registry, limit enforcement, wire protocol types, configuration, and the
//! caption generator capability. The axum server lives in
//! `caption-meter-server`.

pub mod captions;
pub mod config;
pub mod error;
pub mod limits;
pub mod protocol;
pub mod registry;

pub use captions::{CaptionGenerator, FixedCaptions, LoremCaptions};
pub use config::MeterConfig;
pub use error::*;
pub use limits::Breach;
pub use protocol::{ClientMessage, DataPacket, ServerMessage};
pub use registry::{Admission, ConnectionId, PacketOutcome, UsageRecord, UsageRegistry};

/// Current wall-clock time as Unix epoch milliseconds.
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
