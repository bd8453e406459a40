// crates/core/src/config.rs
//! Metering configuration.

use std::time::Duration;

use crate::error::ConfigError;

/// Each data packet represents this much streamed time.
pub const DEFAULT_PACKET_DURATION_MS: u64 = 100;
/// Captions are pushed on this cadence while a session is active.
pub const DEFAULT_CAPTION_INTERVAL_MS: u64 = 500;
/// Usage budget per token.
pub const DEFAULT_TIME_LIMIT_MS: u64 = 60_000;

const PACKET_MS_VAR: &str = "CAPTION_METER_PACKET_MS";
const CAPTION_INTERVAL_VAR: &str = "CAPTION_METER_CAPTION_INTERVAL_MS";
const TIME_LIMIT_VAR: &str = "CAPTION_METER_TIME_LIMIT_MS";

/// Tunables shared by every connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MeterConfig {
    pub packet_duration_ms: u64,
    pub caption_interval_ms: u64,
    pub time_limit_ms: u64,
}

impl Default for MeterConfig {
    fn default() -> Self {
        Self {
            packet_duration_ms: DEFAULT_PACKET_DURATION_MS,
            caption_interval_ms: DEFAULT_CAPTION_INTERVAL_MS,
            time_limit_ms: DEFAULT_TIME_LIMIT_MS,
        }
    }
}

impl MeterConfig {
    /// Load from the process environment, falling back to defaults for unset variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Load using an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let config = Self {
            packet_duration_ms: read_ms(&lookup, PACKET_MS_VAR, defaults.packet_duration_ms)?,
            caption_interval_ms: read_ms(
                &lookup,
                CAPTION_INTERVAL_VAR,
                defaults.caption_interval_ms,
            )?,
            time_limit_ms: read_ms(&lookup, TIME_LIMIT_VAR, defaults.time_limit_ms)?,
        };

        if config.packet_duration_ms == 0 {
            return Err(ConfigError::Zero {
                var: PACKET_MS_VAR.into(),
            });
        }
        if config.caption_interval_ms == 0 {
            return Err(ConfigError::Zero {
                var: CAPTION_INTERVAL_VAR.into(),
            });
        }
        Ok(config)
    }

    pub fn caption_interval(&self) -> Duration {
        Duration::from_millis(self.caption_interval_ms)
    }

    /// Time left on a budget after `used_ms`, floored at zero.
    pub fn remaining_ms(&self, used_ms: u64) -> u64 {
        self.time_limit_ms.saturating_sub(used_ms)
    }
}

fn read_ms<F>(lookup: &F, var: &str, default: u64) -> Result<u64, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(var) {
        None => Ok(default),
        Some(raw) if raw.trim().is_empty() => Ok(default),
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::invalid(var, raw)),
    }
}
