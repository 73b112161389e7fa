use std::sync::Arc;
use std::time::{Duration, SystemTime};

use chrono::{DateTime, Utc};

/// Wall clock used for arrival stamps, orphan ages and outcome times.
///
/// `System` reads the host clock. `Manual` only moves when advanced, which
/// lets tests push a half-pair past the pairing timeout without sleeping.
#[derive(Clone)]
pub enum Clock {
    System,
    Manual(Arc<parking_lot::Mutex<SystemTime>>),
}

impl std::fmt::Debug for Clock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::System => f.write_str("Clock::System"),
            Self::Manual(now) => f.debug_tuple("Clock::Manual").field(&*now.lock()).finish(),
        }
    }
}

impl Default for Clock {
    fn default() -> Self {
        Self::System
    }
}

impl Clock {
    /// A manual clock frozen at `start`.
    pub fn manual(start: SystemTime) -> Self {
        Self::Manual(Arc::new(parking_lot::Mutex::new(start)))
    }

    /// Current wall-clock time.
    pub fn now(&self) -> SystemTime {
        match self {
            Self::System => SystemTime::now(),
            Self::Manual(now) => *now.lock(),
        }
    }

    /// Current time as a UTC timestamp.
    pub fn now_utc(&self) -> DateTime<Utc> {
        DateTime::<Utc>::from(self.now())
    }

    /// Moves a manual clock forward. No-op on the system clock.
    pub fn advance(&self, by: Duration) {
        if let Self::Manual(now) = self {
            let mut guard = now.lock();
            *guard += by;
        }
    }
}

/// Elapsed time from `earlier` to `now`, saturating to zero if the clock stepped back.
pub fn elapsed_between(earlier: SystemTime, now: SystemTime) -> Duration {
    now.duration_since(earlier).unwrap_or(Duration::ZERO)
}

/// Absolute distance between two instants.
pub fn abs_diff(a: SystemTime, b: SystemTime) -> Duration {
    match a.duration_since(b) {
        Ok(d) => d,
        Err(e) => e.duration(),
    }
}
