pub mod classify;
pub mod counters;
pub mod outcome;
pub mod pairing;
pub mod result_log;

use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::clock::{abs_diff, Clock};
use crate::config::EngineConfig;
use crate::export::health::HealthMetrics;
use crate::message::{CorrelationKey, SourceKind, Submission};

pub use self::classify::classify;
pub use self::counters::{CounterSnapshot, Counters};
pub use self::outcome::{OutcomeStatus, ReconciliationOutcome};
pub use self::pairing::{Half, PairingStore, PendingPair};
pub use self::result_log::ResultLog;

use self::outcome::to_utc;

/// Point-in-time view of the reconciler handed to snapshot sinks.
#[derive(Debug, Clone, Serialize)]
pub struct Snapshot {
    pub generated_at: DateTime<Utc>,
    pub counters: CounterSnapshot,
    pub success_rate: f64,
    pub pending_count: usize,
    pub result_log_len: usize,
    pub recent_outcomes: Vec<Arc<ReconciliationOutcome>>,
}

/// Shared reconciliation state: pairing store, result log and counters.
///
/// Owned by one engine and shared by its ingestion workers, sweeper and
/// publisher. Every method takes `&self`.
pub struct Reconciler {
    store: PairingStore,
    log: ResultLog,
    counters: Counters,
    clock: Clock,
    pairing_timeout: Duration,
    diff_preview_limit: usize,
    metrics: Option<Arc<HealthMetrics>>,
}

impl Reconciler {
    pub fn new(cfg: &EngineConfig, clock: Clock) -> Self {
        Self {
            store: PairingStore::new(),
            log: ResultLog::new(cfg.result_log_capacity),
            counters: Counters::new(),
            clock,
            pairing_timeout: cfg.pairing_timeout,
            diff_preview_limit: cfg.diff_preview_limit,
            metrics: None,
        }
    }

    /// Attach prometheus metrics updated alongside the counters.
    pub fn with_metrics(mut self, metrics: Arc<HealthMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn clock(&self) -> &Clock {
        &self.clock
    }

    /// Build a submission stamped with the current clock time.
    pub fn stamp(&self, key: CorrelationKey, payload: String, source: SourceKind) -> Submission {
        Submission {
            key,
            payload,
            source,
            arrival: self.clock.now(),
        }
    }

    /// Hand one parsed message to the pairing store.
    ///
    /// Returns the outcome if this submission completed its pair.
    pub fn submit(&self, submission: Submission) -> Option<Arc<ReconciliationOutcome>> {
        let key = submission.key.clone();
        let source = submission.source;

        self.counters.record_observed();
        let placement = self.store.place(submission);

        if placement.duplicate {
            self.counters.record_duplicate();
            if let Some(m) = &self.metrics {
                m.duplicates.inc();
            }
            tracing::warn!(%key, %source, "duplicate message, keeping latest");
        }

        let outcome = placement
            .completed
            .and_then(|pair| match (pair.legacy, pair.modern) {
                (Some(legacy), Some(modern)) => Some(self.resolve_pair(pair.key, legacy, modern)),
                _ => None,
            });

        self.update_gauges();
        outcome
    }

    /// Count a message dropped before reaching the pairing store.
    pub fn record_discarded(&self, source: SourceKind) {
        self.counters.record_discarded();
        if let Some(m) = &self.metrics {
            m.messages_discarded
                .with_label_values(&[source.as_str()])
                .inc();
        }
    }

    /// Resolve every half-pair older than the pairing timeout as orphaned.
    pub fn sweep_expired(&self) -> Vec<Arc<ReconciliationOutcome>> {
        let started = Instant::now();
        let now = self.clock.now();

        let outcomes: Vec<_> = self
            .store
            .take_expired(now, self.pairing_timeout)
            .into_iter()
            .filter_map(|pair| self.resolve_orphan(pair, now))
            .collect();

        if let Some(m) = &self.metrics {
            m.sweep_duration.observe(started.elapsed().as_secs_f64());
        }
        self.update_gauges();

        if !outcomes.is_empty() {
            tracing::debug!(
                orphaned = outcomes.len(),
                pending = self.store.len(),
                "sweep resolved expired half-pairs"
            );
        }

        outcomes
    }

    /// Lock-free read of the aggregate counters.
    pub fn counters(&self) -> CounterSnapshot {
        self.counters.snapshot()
    }

    pub fn pending_count(&self) -> usize {
        self.store.len()
    }

    pub fn result_log(&self) -> &ResultLog {
        &self.log
    }

    /// Build a snapshot carrying the newest `recent_limit` outcomes.
    pub fn snapshot(&self, recent_limit: usize) -> Snapshot {
        let counters = self.counters.snapshot();
        Snapshot {
            generated_at: self.clock.now_utc(),
            counters,
            success_rate: counters.success_rate(),
            pending_count: self.store.len(),
            result_log_len: self.log.len(),
            recent_outcomes: self.log.recent(recent_limit),
        }
    }

    fn resolve_pair(
        &self,
        key: CorrelationKey,
        legacy: Half,
        modern: Half,
    ) -> Arc<ReconciliationOutcome> {
        let (status, diff_summary) =
            classify(&legacy.payload, &modern.payload, self.diff_preview_limit);
        let latency = abs_diff(legacy.arrival, modern.arrival);

        if let Some(m) = &self.metrics {
            m.pairing_latency.observe(latency.as_secs_f64());
        }

        self.record(|produced_at| ReconciliationOutcome {
            key,
            produced_at,
            legacy_arrival: to_utc(Some(legacy.arrival)),
            modern_arrival: to_utc(Some(modern.arrival)),
            legacy_payload: Some(legacy.payload),
            modern_payload: Some(modern.payload),
            latency,
            status,
            diff_summary,
        })
    }

    fn resolve_orphan(&self, pair: PendingPair, now: SystemTime) -> Option<Arc<ReconciliationOutcome>> {
        let side = pair.present_side()?;
        let latency = pair.age(now);
        let PendingPair { key, legacy, modern } = pair;

        Some(self.record(|produced_at| ReconciliationOutcome {
            key,
            produced_at,
            legacy_arrival: to_utc(legacy.as_ref().map(|h| h.arrival)),
            modern_arrival: to_utc(modern.as_ref().map(|h| h.arrival)),
            legacy_payload: legacy.map(|h| h.payload),
            modern_payload: modern.map(|h| h.payload),
            latency,
            status: OutcomeStatus::orphaned(side),
            diff_summary: None,
        }))
    }

    fn record(
        &self,
        build: impl FnOnce(DateTime<Utc>) -> ReconciliationOutcome,
    ) -> Arc<ReconciliationOutcome> {
        let outcome = self.log.append_stamped(&self.clock, build);
        self.counters.record_outcome(outcome.status);

        if let Some(m) = &self.metrics {
            m.outcomes
                .with_label_values(&[outcome.status.as_str()])
                .inc();
        }

        tracing::debug!(
            key = %outcome.key,
            status = %outcome.status,
            latency_ms = outcome.latency_ms() as u64,
            diff = outcome.diff_summary.as_deref().unwrap_or(""),
            "reconciled"
        );

        outcome
    }

    fn update_gauges(&self) {
        if let Some(m) = &self.metrics {
            m.pending_pairs.set(self.store.len() as f64);
            m.result_log_entries.set(self.log.len() as f64);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::UNIX_EPOCH;

    use super::*;
    use crate::message::parse_key;

    fn reconciler(capacity: usize) -> Reconciler {
        let cfg = EngineConfig {
            result_log_capacity: capacity,
            recent_outcomes_limit: capacity.min(100),
            ..Default::default()
        };
        Reconciler::new(&cfg, Clock::manual(UNIX_EPOCH + Duration::from_secs(1_000)))
    }

    fn submit(r: &Reconciler, source: SourceKind, payload: &str) -> Option<Arc<ReconciliationOutcome>> {
        let key = parse_key(payload).expect("valid key");
        r.submit(r.stamp(key, payload.to_string(), source))
    }

    #[test]
    fn test_matching_pair_resolves_once() {
        let r = reconciler(100);
        assert!(submit(&r, SourceKind::Legacy, "KEY0001ABCDEFGHIJKLMNOPQ|hello").is_none());
        r.clock().advance(Duration::from_millis(250));
        let outcome = submit(&r, SourceKind::Modern, "KEY0001ABCDEFGHIJKLMNOPQ|hello").expect("completed");

        assert_eq!(outcome.status, OutcomeStatus::Match);
        assert_eq!(outcome.latency, Duration::from_millis(250));
        assert!(outcome.diff_summary.is_none());
        assert_eq!(r.pending_count(), 0);

        let c = r.counters();
        assert_eq!(c.observed, 2);
        assert_eq!(c.matched, 1);
        assert_eq!(r.result_log().len(), 1);
    }

    #[test]
    fn test_mismatch_carries_summary() {
        let r = reconciler(100);
        submit(&r, SourceKind::Modern, "KEY0002ABCDEFGHIJKLMNOPQ|bar");
        let outcome = submit(&r, SourceKind::Legacy, "KEY0002ABCDEFGHIJKLMNOPQ|foo").expect("completed");

        assert_eq!(outcome.status, OutcomeStatus::Mismatch);
        assert!(outcome
            .diff_summary
            .as_deref()
            .is_some_and(|s| s.contains("Pos 25")));
        assert_eq!(r.counters().mismatched, 1);
    }

    #[test]
    fn test_sweep_orphans_after_timeout_only() {
        let r = reconciler(100);
        submit(&r, SourceKind::Legacy, "KEY0003ABCDEFGHIJKLMNOPQ|x");

        r.clock().advance(Duration::from_secs(60));
        assert!(r.sweep_expired().is_empty());

        r.clock().advance(Duration::from_secs(1));
        let swept = r.sweep_expired();
        assert_eq!(swept.len(), 1);
        assert_eq!(swept[0].status, OutcomeStatus::OrphanedLegacy);
        assert_eq!(swept[0].latency, Duration::from_secs(61));
        assert!(swept[0].modern_payload.is_none());
        assert_eq!(r.pending_count(), 0);
        assert_eq!(r.counters().orphaned_legacy, 1);
    }

    #[test]
    fn test_outcomes_stamped_in_log_order() {
        let r = reconciler(100);
        submit(&r, SourceKind::Legacy, "KEY0010ABCDEFGHIJKLMNOPQ|x");
        r.clock().advance(Duration::from_secs(61));

        let swept = r.sweep_expired();
        assert_eq!(swept[0].produced_at, r.clock().now_utc());

        r.clock().advance(Duration::from_secs(1));
        submit(&r, SourceKind::Legacy, "KEY0011ABCDEFGHIJKLMNOPQ|y");
        submit(&r, SourceKind::Modern, "KEY0011ABCDEFGHIJKLMNOPQ|y");

        let entries = r.result_log().entries();
        assert_eq!(entries.len(), 2);
        assert!(entries[0].produced_at < entries[1].produced_at);
        assert_eq!(r.result_log().recent(1)[0].key.as_str(), "KEY0011ABCDEFGHIJKLMNOPQ");
    }

    #[test]
    fn test_late_counterpart_after_orphan_starts_new_half() {
        let r = reconciler(100);
        submit(&r, SourceKind::Modern, "KEY0004ABCDEFGHIJKLMNOPQ|x");
        r.clock().advance(Duration::from_secs(120));
        assert_eq!(r.sweep_expired()[0].status, OutcomeStatus::OrphanedModern);

        assert!(submit(&r, SourceKind::Legacy, "KEY0004ABCDEFGHIJKLMNOPQ|x").is_none());
        assert_eq!(r.pending_count(), 1);
    }

    #[test]
    fn test_duplicate_counted_and_last_write_wins() {
        let r = reconciler(100);
        submit(&r, SourceKind::Legacy, "KEY0005ABCDEFGHIJKLMNOPQ|old");
        submit(&r, SourceKind::Legacy, "KEY0005ABCDEFGHIJKLMNOPQ|new");
        let outcome = submit(&r, SourceKind::Modern, "KEY0005ABCDEFGHIJKLMNOPQ|new").expect("completed");

        assert_eq!(outcome.status, OutcomeStatus::Match);
        let c = r.counters();
        assert_eq!(c.duplicates, 1);
        assert_eq!(c.observed, 3);
    }

    #[test]
    fn test_snapshot_reports_recent_and_rate() {
        let r = reconciler(100);
        submit(&r, SourceKind::Legacy, "KEY0006ABCDEFGHIJKLMNOPQ|a");
        submit(&r, SourceKind::Modern, "KEY0006ABCDEFGHIJKLMNOPQ|a");
        submit(&r, SourceKind::Legacy, "KEY0007ABCDEFGHIJKLMNOPQ|a");
        r.record_discarded(SourceKind::Modern);

        let snap = r.snapshot(10);
        assert_eq!(snap.pending_count, 1);
        assert_eq!(snap.result_log_len, 1);
        assert_eq!(snap.recent_outcomes.len(), 1);
        assert_eq!(snap.counters.discarded, 1);
        assert!((snap.success_rate - 100.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_result_log_is_bounded() {
        let r = reconciler(5);
        for i in 0..20 {
            let payload = format!("KEY{i:04}ABCDEFGHIJKLMNOPQ|p");
            submit(&r, SourceKind::Legacy, &payload);
            submit(&r, SourceKind::Modern, &payload);
        }

        assert_eq!(r.result_log().len(), 5);
        assert_eq!(r.counters().matched, 20);
        let oldest = &r.result_log().entries()[0];
        assert_eq!(oldest.key.as_str(), "KEY0015ABCDEFGHIJKLMNOPQ");
    }
}
