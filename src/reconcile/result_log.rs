use std::collections::VecDeque;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use super::outcome::ReconciliationOutcome;
use crate::clock::Clock;

/// Capacity-bounded, insertion-ordered log of outcomes.
///
/// When full, each append evicts the oldest entry. Entries are shared as
/// `Arc` so readers copy pointers rather than payloads and never observe a
/// partially written outcome.
pub struct ResultLog {
    capacity: usize,
    entries: Mutex<VecDeque<Arc<ReconciliationOutcome>>>,
}

impl ResultLog {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            entries: Mutex::new(VecDeque::with_capacity(capacity.min(4096))),
        }
    }

    /// Append an outcome, evicting the oldest if at capacity.
    pub fn append(&self, outcome: Arc<ReconciliationOutcome>) {
        let mut entries = self.entries.lock();
        if entries.len() == self.capacity {
            entries.pop_front();
        }
        entries.push_back(outcome);
    }

    /// Build and append an outcome under the log lock, stamping
    /// `produced_at` from `clock` so insertion order follows production time.
    pub fn append_stamped(
        &self,
        clock: &Clock,
        build: impl FnOnce(DateTime<Utc>) -> ReconciliationOutcome,
    ) -> Arc<ReconciliationOutcome> {
        let mut entries = self.entries.lock();
        let outcome = Arc::new(build(clock.now_utc()));
        if entries.len() == self.capacity {
            entries.pop_front();
        }
        entries.push_back(Arc::clone(&outcome));
        outcome
    }

    /// The newest `limit` outcomes, most recent `produced_at` first.
    pub fn recent(&self, limit: usize) -> Vec<Arc<ReconciliationOutcome>> {
        let mut out: Vec<_> = {
            let entries = self.entries.lock();
            entries.iter().rev().take(limit).cloned().collect()
        };
        out.sort_by(|a, b| b.produced_at.cmp(&a.produced_at));
        out
    }

    /// Every retained outcome in insertion order.
    pub fn entries(&self) -> Vec<Arc<ReconciliationOutcome>> {
        self.entries.lock().iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use chrono::{TimeZone, Utc};

    use super::*;
    use crate::message::parse_key;
    use crate::reconcile::outcome::OutcomeStatus;

    fn outcome(seq: u32) -> Arc<ReconciliationOutcome> {
        let key = parse_key(&format!("TESTPRG10182026120000{seq:03}")).expect("valid key");
        Arc::new(ReconciliationOutcome {
            key,
            produced_at: Utc
                .timestamp_opt(1_700_000_000 + i64::from(seq), 0)
                .single()
                .expect("valid timestamp"),
            legacy_payload: None,
            modern_payload: None,
            legacy_arrival: None,
            modern_arrival: None,
            latency: Duration::ZERO,
            status: OutcomeStatus::Match,
            diff_summary: None,
        })
    }

    #[test]
    fn test_evicts_oldest_first() {
        let log = ResultLog::new(3);
        for seq in 0..5 {
            log.append(outcome(seq));
        }

        assert_eq!(log.len(), 3);
        let seqs: Vec<_> = log
            .entries()
            .iter()
            .map(|o| o.key.sequence().to_string())
            .collect();
        assert_eq!(seqs, vec!["002", "003", "004"]);
    }

    #[test]
    fn test_recent_is_newest_first_and_limited() {
        let log = ResultLog::new(10);
        for seq in 0..6 {
            log.append(outcome(seq));
        }

        let recent = log.recent(2);
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].key.sequence(), "005");
        assert_eq!(recent[1].key.sequence(), "004");
    }

    #[test]
    fn test_zero_capacity_is_clamped() {
        let log = ResultLog::new(0);
        log.append(outcome(1));
        log.append(outcome(2));
        assert_eq!(log.capacity(), 1);
        assert_eq!(log.len(), 1);
    }

    #[test]
    fn test_append_stamped_uses_clock_at_append() {
        let clock = Clock::manual(std::time::UNIX_EPOCH + Duration::from_secs(50));
        let log = ResultLog::new(4);

        let first = log.append_stamped(&clock, |at| {
            let mut o = (*outcome(1)).clone();
            o.produced_at = at;
            o
        });
        clock.advance(Duration::from_secs(3));
        let second = log.append_stamped(&clock, |at| {
            let mut o = (*outcome(2)).clone();
            o.produced_at = at;
            o
        });

        assert_eq!(first.produced_at.timestamp(), 50);
        assert_eq!(second.produced_at.timestamp(), 53);
        assert_eq!(log.recent(1)[0].key.sequence(), "002");
    }
}
