// crates/core/src/registry.rs
//! Per-token usage registry.
//!
//! The registry is the single source of truth for cumulative streamed time
//! and session-active status. Callers never see the map itself: every
//! mutation goes through a closure applied under the entry's shard lock, so
//! ingestion writes, ticker reads and query reads on one token are
//! serialized while different tokens proceed independently.

use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use serde::Serialize;
use tracing::warn;

use crate::error::AdmissionError;
use crate::limits::{self, Breach};
use crate::now_millis;

/// Identifies one admitted streaming connection.
pub type ConnectionId = u64;

/// Usage bookkeeping for a single token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageRecord {
    /// Never decreases for the lifetime of the record.
    pub total_accrued_ms: u64,
    /// Epoch millis of the latest data packet, or of record creation.
    pub last_packet_timestamp: i64,
    pub session_active: bool,
}

impl UsageRecord {
    /// A fresh, inactive record with zero usage.
    pub fn new() -> Self {
        Self {
            total_accrued_ms: 0,
            last_packet_timestamp: now_millis(),
            session_active: false,
        }
    }
}

impl Default for UsageRecord {
    fn default() -> Self {
        Self::new()
    }
}

/// Result of a successful admission.
#[derive(Debug, Clone)]
pub struct Admission {
    pub connection: ConnectionId,
    /// True when this admission created the record.
    pub created: bool,
    pub record: UsageRecord,
}

/// What happened to a record when a data packet was accrued.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketOutcome {
    Accrued { total_ms: u64 },
    LimitExceeded(Breach),
}

struct Slot {
    record: UsageRecord,
    owner: Option<ConnectionId>,
}

impl Slot {
    fn new() -> Self {
        Self {
            record: UsageRecord::new(),
            owner: None,
        }
    }
}

/// Shared map from token to usage record. Entries are never removed.
pub struct UsageRegistry {
    slots: DashMap<String, Slot>,
    next_connection: AtomicU64,
}

impl UsageRegistry {
    pub fn new() -> Self {
        Self {
            slots: DashMap::new(),
            next_connection: AtomicU64::new(1),
        }
    }

    /// Snapshot of the record for `token`.
    pub fn get(&self, token: &str) -> Option<UsageRecord> {
        self.slots.get(token).map(|slot| slot.record.clone())
    }

    /// Return the record for `token`, creating an inactive zero-usage one if needed.
    pub fn create_if_absent(&self, token: &str) -> UsageRecord {
        self.slots
            .entry(token.to_string())
            .or_insert_with(Slot::new)
            .record
            .clone()
    }

    /// Apply `f` to the record for `token` atomically with respect to every
    /// other registry operation on the same token.
    pub fn update<F, R>(&self, token: &str, f: F) -> Option<R>
    where
        F: FnOnce(&mut UsageRecord) -> R,
    {
        self.slots
            .get_mut(token)
            .map(|mut slot| f(&mut slot.record))
    }

    pub fn is_active(&self, token: &str) -> bool {
        self.slots
            .get(token)
            .map(|slot| slot.record.session_active)
            .unwrap_or(false)
    }

    /// Attach a new connection to `token`, creating or reactivating its record.
    ///
    /// Only one connection may own a token at a time; a second attempt is
    /// rejected without touching the record. Reactivation ignores prior
    /// usage: an over-budget record trips the limit again on its next packet.
    pub fn admit(&self, token: &str) -> Result<Admission, AdmissionError> {
        if token.is_empty() {
            return Err(AdmissionError::MissingToken);
        }

        let mut created = false;
        let mut slot = self.slots.entry(token.to_string()).or_insert_with(|| {
            created = true;
            Slot::new()
        });

        if slot.owner.is_some() {
            return Err(AdmissionError::TokenInUse(token.to_string()));
        }

        let connection = self.next_connection.fetch_add(1, Ordering::Relaxed);
        slot.owner = Some(connection);
        slot.record.session_active = true;

        Ok(Admission {
            connection,
            created,
            record: slot.record.clone(),
        })
    }

    /// Accrue one data packet and run limit enforcement in the same critical section.
    ///
    /// Returns `None` if `token` has no record, which for an admitted
    /// connection means the registry lost track of it.
    pub fn record_packet(
        &self,
        token: &str,
        packet_duration_ms: u64,
        limit_ms: u64,
    ) -> Option<PacketOutcome> {
        let outcome = self.update(token, |record| {
            record.total_accrued_ms = record.total_accrued_ms.saturating_add(packet_duration_ms);
            record.last_packet_timestamp = now_millis();
            match limits::enforce(record, limit_ms) {
                Some(breach) => PacketOutcome::LimitExceeded(breach),
                None => PacketOutcome::Accrued {
                    total_ms: record.total_accrued_ms,
                },
            }
        });
        if outcome.is_none() {
            warn!(token = %token, "data packet for token with no usage record");
        }
        outcome
    }

    /// Detach `connection` from `token`, clearing `session_active`.
    ///
    /// A no-op unless `connection` is the current owner. Returns whether the
    /// session was still active.
    pub fn release(&self, token: &str, connection: ConnectionId) -> bool {
        let Some(mut slot) = self.slots.get_mut(token) else {
            return false;
        };
        if slot.owner != Some(connection) {
            return false;
        }
        slot.owner = None;
        std::mem::replace(&mut slot.record.session_active, false)
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

impl Default for UsageRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::sync::Arc;

    #[test]
    fn create_if_absent_is_idempotent() {
        let registry = UsageRegistry::new();
        let first = registry.create_if_absent("tok");
        assert_eq!(first.total_accrued_ms, 0);
        assert!(!first.session_active);

        registry.update("tok", |r| r.total_accrued_ms = 300);
        let second = registry.create_if_absent("tok");
        assert_eq!(second.total_accrued_ms, 300);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn admit_unknown_token_creates_one_active_record() {
        let registry = UsageRegistry::new();
        let admission = registry.admit("fresh").unwrap();
        assert!(admission.created);
        assert!(admission.record.session_active);
        assert_eq!(admission.record.total_accrued_ms, 0);
        assert_eq!(registry.len(), 1);
        assert!(registry.is_active("fresh"));
    }

    #[test]
    fn admit_known_token_reactivates_without_duplicate() {
        let registry = UsageRegistry::new();
        registry.create_if_absent("issued");
        registry.update("issued", |r| r.total_accrued_ms = 1_200);

        let admission = registry.admit("issued").unwrap();
        assert!(!admission.created);
        assert!(admission.record.session_active);
        assert_eq!(admission.record.total_accrued_ms, 1_200);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn admit_rejects_empty_token() {
        let registry = UsageRegistry::new();
        assert_eq!(registry.admit("").unwrap_err(), AdmissionError::MissingToken);
        assert!(registry.is_empty());
    }

    #[test]
    fn second_connection_on_same_token_is_rejected() {
        let registry = UsageRegistry::new();
        let first = registry.admit("shared").unwrap();

        let err = registry.admit("shared").unwrap_err();
        assert_eq!(err, AdmissionError::TokenInUse("shared".into()));

        // Once the owner lets go the token can be admitted again.
        assert!(registry.release("shared", first.connection));
        let again = registry.admit("shared").unwrap();
        assert_ne!(again.connection, first.connection);
    }

    #[test]
    fn release_by_non_owner_is_ignored() {
        let registry = UsageRegistry::new();
        let owner = registry.admit("tok").unwrap();

        assert!(!registry.release("tok", owner.connection + 100));
        assert!(registry.is_active("tok"));

        assert!(registry.release("tok", owner.connection));
        assert!(!registry.is_active("tok"));
        // Idempotent.
        assert!(!registry.release("tok", owner.connection));
    }

    #[test]
    fn release_keeps_the_record() {
        let registry = UsageRegistry::new();
        let admission = registry.admit("tok").unwrap();
        registry.record_packet("tok", 100, 60_000);
        registry.release("tok", admission.connection);

        let record = registry.get("tok").unwrap();
        assert_eq!(record.total_accrued_ms, 100);
        assert!(!record.session_active);
    }

    #[test]
    fn packets_accrue_fixed_duration() {
        let registry = UsageRegistry::new();
        registry.admit("tok").unwrap();

        let mut previous = 0;
        for n in 1..=25u64 {
            let outcome = registry.record_packet("tok", 100, 60_000).unwrap();
            let PacketOutcome::Accrued { total_ms } = outcome else {
                panic!("unexpected breach at packet {n}");
            };
            assert!(total_ms >= previous);
            assert_eq!(total_ms, n * 100);
            previous = total_ms;
        }
    }

    #[test]
    fn packet_refreshes_timestamp() {
        let registry = UsageRegistry::new();
        registry.admit("tok").unwrap();
        registry.update("tok", |r| r.last_packet_timestamp = 0);

        registry.record_packet("tok", 100, 60_000);
        assert!(registry.get("tok").unwrap().last_packet_timestamp > 0);
    }

    #[test]
    fn packet_for_unknown_token_is_none() {
        let registry = UsageRegistry::new();
        assert_eq!(registry.record_packet("ghost", 100, 60_000), None);
        assert!(registry.is_empty());
    }

    #[test]
    fn crossing_the_limit_breaches_exactly_once() {
        let registry = UsageRegistry::new();
        registry.admit("tok").unwrap();
        registry.update("tok", |r| r.total_accrued_ms = 59_950);

        assert_eq!(
            registry.record_packet("tok", 50, 60_000),
            Some(PacketOutcome::Accrued { total_ms: 60_000 })
        );
        assert_eq!(
            registry.record_packet("tok", 50, 60_000),
            Some(PacketOutcome::LimitExceeded(Breach {
                usage_ms: 60_050,
                limit_ms: 60_000,
            }))
        );
        assert!(!registry.is_active("tok"));
        assert_eq!(
            registry.record_packet("tok", 50, 60_000),
            Some(PacketOutcome::Accrued { total_ms: 60_100 })
        );
    }

    #[test]
    fn concurrent_packets_lose_no_updates() {
        let registry = Arc::new(UsageRegistry::new());
        registry.admit("tok").unwrap();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let registry = Arc::clone(&registry);
                std::thread::spawn(move || {
                    for _ in 0..500 {
                        registry.record_packet("tok", 100, u64::MAX);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(registry.get("tok").unwrap().total_accrued_ms, 8 * 500 * 100);
    }

    #[test]
    fn concurrent_breach_fires_once() {
        let registry = Arc::new(UsageRegistry::new());
        registry.admit("tok").unwrap();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let registry = Arc::clone(&registry);
                std::thread::spawn(move || {
                    (0..100)
                        .filter(|_| {
                            matches!(
                                registry.record_packet("tok", 100, 10_000),
                                Some(PacketOutcome::LimitExceeded(_))
                            )
                        })
                        .count()
                })
            })
            .collect();
        let breaches: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();

        assert_eq!(breaches, 1);
    }
}
