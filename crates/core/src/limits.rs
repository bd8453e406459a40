// crates/core/src/limits.rs
//! Usage budget enforcement.
//!
//! The check runs inside the registry's per-token critical section, right
//! after a packet is accrued, so the `session_active` flip below is the
//! single-fire gate for the breach notice.

use serde::Serialize;

use crate::registry::UsageRecord;

/// A record crossed its budget while its session was active.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Breach {
    pub usage_ms: u64,
    pub limit_ms: u64,
}

/// Check `record` against `limit_ms`, deactivating it on a strict breach.
///
/// Returns `Some` at most once per activation: the first call that sees
/// `total_accrued_ms > limit_ms` while the session is active clears
/// `session_active`, and every later call finds it already cleared.
pub fn enforce(record: &mut UsageRecord, limit_ms: u64) -> Option<Breach> {
    if record.total_accrued_ms <= limit_ms || !record.session_active {
        return None;
    }
    record.session_active = false;
    Some(Breach {
        usage_ms: record.total_accrued_ms,
        limit_ms,
    })
}
