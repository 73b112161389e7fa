use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};

use thiserror::Error;

use crate::message::SourceKind;
use crate::source::SourceError;

/// Engine lifecycle. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum EngineState {
    Created = 0,
    Running = 1,
    Stopping = 2,
    Stopped = 3,
}

impl EngineState {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Created => "CREATED",
            Self::Running => "RUNNING",
            Self::Stopping => "STOPPING",
            Self::Stopped => "STOPPED",
        }
    }

    const fn from_u8(v: u8) -> Self {
        match v {
            0 => Self::Created,
            1 => Self::Running,
            2 => Self::Stopping,
            _ => Self::Stopped,
        }
    }
}

impl fmt::Display for EngineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors surfaced synchronously from `Engine::start`.
#[derive(Error, Debug)]
pub enum LifecycleError {
    #[error("engine cannot start from state {actual}")]
    InvalidState { actual: EngineState },

    #[error("opening {stream} source: {error}")]
    SourceOpen {
        stream: SourceKind,
        #[source]
        error: SourceError,
    },

    #[error("starting sink {name}: {error:#}")]
    SinkStart { name: String, error: anyhow::Error },

    #[error("starting health server: {0:#}")]
    HealthServer(anyhow::Error),
}

/// Lock-free holder for the current [`EngineState`].
#[derive(Debug)]
pub(crate) struct StateCell(AtomicU8);

impl StateCell {
    pub(crate) fn new() -> Self {
        Self(AtomicU8::new(EngineState::Created as u8))
    }

    pub(crate) fn get(&self) -> EngineState {
        EngineState::from_u8(self.0.load(Ordering::Acquire))
    }

    pub(crate) fn set(&self, state: EngineState) {
        self.0.store(state as u8, Ordering::Release);
    }

    /// Move from `from` to `to`, returning the observed state on mismatch.
    pub(crate) fn transition(&self, from: EngineState, to: EngineState) -> Result<(), EngineState> {
        self.0
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| ())
            .map_err(EngineState::from_u8)
    }
}
