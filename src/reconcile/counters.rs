use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

use super::outcome::OutcomeStatus;

/// Lock-free aggregate counters for one engine instance.
///
/// Counters only ever increase. `snapshot()` reads each counter
/// independently, so a snapshot taken during traffic is a monitoring view
/// rather than a consistent cut.
#[derive(Debug, Default)]
pub struct Counters {
    observed: AtomicU64,
    matched: AtomicU64,
    mismatched: AtomicU64,
    orphaned_legacy: AtomicU64,
    orphaned_modern: AtomicU64,
    duplicates: AtomicU64,
    discarded: AtomicU64,
}

/// Point-in-time copy of [`Counters`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CounterSnapshot {
    pub observed: u64,
    pub matched: u64,
    pub mismatched: u64,
    pub orphaned_legacy: u64,
    pub orphaned_modern: u64,
    pub duplicates: u64,
    pub discarded: u64,
}

impl CounterSnapshot {
    /// Number of keys that reached a terminal outcome.
    pub fn resolved(&self) -> u64 {
        self.matched + self.mismatched + self.orphaned_legacy + self.orphaned_modern
    }

    /// Percentage of resolved keys that matched, 0 when nothing resolved.
    pub fn success_rate(&self) -> f64 {
        let resolved = self.resolved();
        if resolved == 0 {
            return 0.0;
        }
        self.matched as f64 * 100.0 / resolved as f64
    }
}

impl Counters {
    /// Create zeroed counters.
    pub fn new() -> Self {
        Self::default()
    }

    /// A message was accepted into the pairing store.
    pub fn record_observed(&self) {
        self.observed.fetch_add(1, Ordering::Relaxed);
    }

    /// A source delivered the same key twice before completion.
    pub fn record_duplicate(&self) {
        self.duplicates.fetch_add(1, Ordering::Relaxed);
    }

    /// A message was dropped before reaching the pairing store.
    pub fn record_discarded(&self) {
        self.discarded.fetch_add(1, Ordering::Relaxed);
    }

    /// A terminal outcome was produced.
    pub fn record_outcome(&self, status: OutcomeStatus) {
        let counter = match status {
            OutcomeStatus::Match => &self.matched,
            OutcomeStatus::Mismatch => &self.mismatched,
            OutcomeStatus::OrphanedLegacy => &self.orphaned_legacy,
            OutcomeStatus::OrphanedModern => &self.orphaned_modern,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Read all counters without resetting them.
    pub fn snapshot(&self) -> CounterSnapshot {
        CounterSnapshot {
            observed: self.observed.load(Ordering::Relaxed),
            matched: self.matched.load(Ordering::Relaxed),
            mismatched: self.mismatched.load(Ordering::Relaxed),
            orphaned_legacy: self.orphaned_legacy.load(Ordering::Relaxed),
            orphaned_modern: self.orphaned_modern.load(Ordering::Relaxed),
            duplicates: self.duplicates.load(Ordering::Relaxed),
            discarded: self.discarded.load(Ordering::Relaxed),
        }
    }
}
