use std::time::{Duration, SystemTime};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use crate::clock::elapsed_between;
use crate::message::{CorrelationKey, SourceKind, Submission};

/// One populated side of a pending pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Half {
    pub payload: String,
    pub arrival: SystemTime,
}

/// A correlation key waiting for its counterpart.
///
/// At least one slot is populated by construction. A pair with both slots
/// populated is never left in the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingPair {
    pub key: CorrelationKey,
    pub legacy: Option<Half>,
    pub modern: Option<Half>,
}

impl PendingPair {
    fn new(key: CorrelationKey) -> Self {
        Self {
            key,
            legacy: None,
            modern: None,
        }
    }

    fn slot_mut(&mut self, source: SourceKind) -> &mut Option<Half> {
        match source {
            SourceKind::Legacy => &mut self.legacy,
            SourceKind::Modern => &mut self.modern,
        }
    }

    /// Both slots are populated.
    pub fn is_complete(&self) -> bool {
        self.legacy.is_some() && self.modern.is_some()
    }

    /// Earliest arrival among the populated slots.
    pub fn first_arrival(&self) -> Option<SystemTime> {
        let legacy = self.legacy.as_ref().map(|h| h.arrival);
        let modern = self.modern.as_ref().map(|h| h.arrival);
        match (legacy, modern) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    /// Age of the pair at `now`, saturating at zero.
    pub fn age(&self, now: SystemTime) -> Duration {
        self.first_arrival()
            .map_or(Duration::ZERO, |first| elapsed_between(first, now))
    }

    /// The only populated side of a half-pair.
    pub fn present_side(&self) -> Option<SourceKind> {
        match (&self.legacy, &self.modern) {
            (Some(_), None) => Some(SourceKind::Legacy),
            (None, Some(_)) => Some(SourceKind::Modern),
            _ => None,
        }
    }
}

/// Result of placing one submission into the store.
#[derive(Debug, Default)]
pub struct Placement {
    /// The submission overwrote an already populated slot.
    pub duplicate: bool,
    /// The pair completed and has been removed from the store.
    pub completed: Option<PendingPair>,
}

/// Concurrent map of half-pairs keyed by correlation key.
///
/// Each key is independently lockable, so submissions for different keys
/// never contend. Completion removes the entry while still holding the
/// key's shard lock, and sweeping re-checks expiry under the same lock, so a
/// pair is resolved by exactly one path.
pub struct PairingStore {
    pairs: DashMap<CorrelationKey, PendingPair>,
}

impl Default for PairingStore {
    fn default() -> Self {
        Self::new()
    }
}

impl PairingStore {
    pub fn new() -> Self {
        Self {
            pairs: DashMap::with_capacity(1024),
        }
    }

    /// Place a submission into its slot, completing the pair if the other
    /// slot is already filled. A repeated submission for a filled slot
    /// overwrites it (last write wins) and is reported as a duplicate.
    pub fn place(&self, submission: Submission) -> Placement {
        let Submission {
            key,
            payload,
            source,
            arrival,
        } = submission;
        let half = Half { payload, arrival };

        match self.pairs.entry(key) {
            Entry::Occupied(mut occupied) => {
                let slot = occupied.get_mut().slot_mut(source);
                let duplicate = slot.is_some();
                *slot = Some(half);

                let completed = if occupied.get().is_complete() {
                    Some(occupied.remove())
                } else {
                    None
                };

                Placement {
                    duplicate,
                    completed,
                }
            }
            Entry::Vacant(vacant) => {
                let mut pair = PendingPair::new(vacant.key().clone());
                *pair.slot_mut(source) = Some(half);
                vacant.insert(pair);
                Placement::default()
            }
        }
    }

    /// Remove every half-pair whose age at `now` exceeds `timeout`.
    ///
    /// Iterates a snapshot of candidate keys, then removes each only if it
    /// is still present and still expired. A key completed concurrently is
    /// already gone and is skipped.
    pub fn take_expired(&self, now: SystemTime, timeout: Duration) -> Vec<PendingPair> {
        let candidates: Vec<CorrelationKey> = self
            .pairs
            .iter()
            .filter(|entry| entry.value().age(now) > timeout)
            .map(|entry| entry.key().clone())
            .collect();

        candidates
            .into_iter()
            .filter_map(|key| {
                self.pairs
                    .remove_if(&key, |_, pair| pair.age(now) > timeout)
                    .map(|(_, pair)| pair)
            })
            .collect()
    }

    /// Number of pending half-pairs.
    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    pub fn contains(&self, key: &CorrelationKey) -> bool {
        self.pairs.contains_key(key)
    }
}
