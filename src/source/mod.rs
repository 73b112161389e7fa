pub mod channel;
pub mod spool;

use std::future::Future;
use std::time::Duration;

use thiserror::Error;

use crate::message::RawMessage;

pub use self::channel::{channel, ChannelSender, ChannelSource};
pub use self::spool::SpoolSource;

/// Transport failures surfaced by a [`MessageSource`].
///
/// None of these stop an ingestion worker; they are logged, counted and
/// followed by a backoff.
#[derive(Error, Debug)]
pub enum SourceError {
    #[error("source unavailable: {0}")]
    Unavailable(String),
    #[error("source i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("source closed")]
    Closed,
}

impl SourceError {
    /// Short label for the receive_errors metric.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Unavailable(_) => "unavailable",
            Self::Io(_) => "io",
            Self::Closed => "closed",
        }
    }
}

/// A transport delivering raw messages for one stream.
pub trait MessageSource: Send {
    /// Returns the binding name for logging.
    fn name(&self) -> &str;

    /// Acquire the transport. Failure aborts engine start.
    fn open(&mut self) -> impl Future<Output = Result<(), SourceError>> + Send;

    /// Wait up to `timeout` for the next message.
    ///
    /// `Ok(None)` means nothing arrived in time and is not an error.
    /// Implementations must be cancel-safe: dropping the future before it
    /// completes must not lose a message that was already taken.
    fn receive(
        &mut self,
        timeout: Duration,
    ) -> impl Future<Output = Result<Option<RawMessage>, SourceError>> + Send;

    /// Release the transport.
    fn close(&mut self) -> impl Future<Output = ()> + Send;
}

/// Source bindings constructible from configuration.
pub enum Source {
    Channel(ChannelSource),
    Spool(SpoolSource),
}

impl MessageSource for Source {
    fn name(&self) -> &str {
        match self {
            Self::Channel(s) => s.name(),
            Self::Spool(s) => s.name(),
        }
    }

    async fn open(&mut self) -> Result<(), SourceError> {
        match self {
            Self::Channel(s) => s.open().await,
            Self::Spool(s) => s.open().await,
        }
    }

    async fn receive(&mut self, timeout: Duration) -> Result<Option<RawMessage>, SourceError> {
        match self {
            Self::Channel(s) => s.receive(timeout).await,
            Self::Spool(s) => s.receive(timeout).await,
        }
    }

    async fn close(&mut self) {
        match self {
            Self::Channel(s) => s.close().await,
            Self::Spool(s) => s.close().await,
        }
    }
}

impl From<ChannelSource> for Source {
    fn from(s: ChannelSource) -> Self {
        Self::Channel(s)
    }
}

impl From<SpoolSource> for Source {
    fn from(s: SpoolSource) -> Self {
        Self::Spool(s)
    }
}
