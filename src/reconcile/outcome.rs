use std::fmt;
use std::time::{Duration, SystemTime};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::message::{CorrelationKey, SourceKind};

/// Terminal classification of a correlation key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OutcomeStatus {
    Match,
    Mismatch,
    OrphanedLegacy,
    OrphanedModern,
}

impl OutcomeStatus {
    /// Returns the canonical metric/report label.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Match => "MATCH",
            Self::Mismatch => "MISMATCH",
            Self::OrphanedLegacy => "ORPHANED_LEGACY",
            Self::OrphanedModern => "ORPHANED_MODERN",
        }
    }

    /// Orphan status for a half-pair whose only populated side is `present`.
    pub const fn orphaned(present: SourceKind) -> Self {
        match present {
            SourceKind::Legacy => Self::OrphanedLegacy,
            SourceKind::Modern => Self::OrphanedModern,
        }
    }

    pub const fn is_orphan(self) -> bool {
        matches!(self, Self::OrphanedLegacy | Self::OrphanedModern)
    }

    pub const fn all() -> &'static [OutcomeStatus] {
        &[
            Self::Match,
            Self::Mismatch,
            Self::OrphanedLegacy,
            Self::OrphanedModern,
        ]
    }
}

impl fmt::Display for OutcomeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable record of one resolved key. Produced exactly once per
/// completion or timeout and never modified after it enters the result log.
#[derive(Debug, Clone, Serialize)]
pub struct ReconciliationOutcome {
    pub key: CorrelationKey,
    pub produced_at: DateTime<Utc>,
    pub legacy_payload: Option<String>,
    pub modern_payload: Option<String>,
    pub legacy_arrival: Option<DateTime<Utc>>,
    pub modern_arrival: Option<DateTime<Utc>>,
    /// Arrival gap for completed pairs, wait time before sweeping for orphans.
    #[serde(with = "humantime_serde")]
    pub latency: Duration,
    pub status: OutcomeStatus,
    pub diff_summary: Option<String>,
}

impl ReconciliationOutcome {
    pub fn latency_ms(&self) -> u128 {
        self.latency.as_millis()
    }
}

pub(crate) fn to_utc(t: Option<SystemTime>) -> Option<DateTime<Utc>> {
    t.map(DateTime::<Utc>::from)
}
