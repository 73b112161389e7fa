pub mod html;
pub mod http;
pub mod json;
pub mod log;
pub mod memory;

use std::future::Future;
use std::path::Path;

use anyhow::{Context, Result};

use crate::config::SinkConfig;

pub use self::html::HtmlSink;
pub use self::http::HttpSink;
pub use self::json::JsonSink;
pub use self::log::LogSink;
pub use self::memory::MemorySink;
pub use crate::reconcile::Snapshot;

/// SnapshotSink receives periodic snapshots from the publisher.
pub trait SnapshotSink: Send {
    /// Returns the sink's name for logging and metric labels.
    fn name(&self) -> &str;

    /// Initialize the sink.
    fn start(&mut self) -> impl Future<Output = Result<()>> + Send;

    /// Deliver one snapshot.
    fn publish(&self, snapshot: &Snapshot) -> impl Future<Output = Result<()>> + Send;

    /// Shut down the sink.
    fn stop(&mut self) -> impl Future<Output = Result<()>> + Send;
}

/// Exporter dispatches snapshots to one of the built-in sinks.
///
/// Enum dispatch keeps the publisher free of boxed futures.
pub enum Exporter {
    Html(HtmlSink),
    Json(JsonSink),
    Log(LogSink),
    Http(HttpSink),
    Memory(MemorySink),
}

impl Exporter {
    /// Build a sink from its configuration entry.
    pub fn from_config(cfg: &SinkConfig) -> Result<Self> {
        Ok(match cfg {
            SinkConfig::Html { path, refresh } => Self::Html(HtmlSink::new(path, *refresh)),
            SinkConfig::Json { path } => Self::Json(JsonSink::new(path)),
            SinkConfig::Log => Self::Log(LogSink),
            SinkConfig::Http { address, timeout } => {
                Self::Http(HttpSink::new(address, *timeout).context("creating http sink")?)
            }
        })
    }
}

impl SnapshotSink for Exporter {
    fn name(&self) -> &str {
        match self {
            Self::Html(s) => s.name(),
            Self::Json(s) => s.name(),
            Self::Log(s) => s.name(),
            Self::Http(s) => s.name(),
            Self::Memory(s) => s.name(),
        }
    }

    async fn start(&mut self) -> Result<()> {
        match self {
            Self::Html(s) => s.start().await,
            Self::Json(s) => s.start().await,
            Self::Log(s) => s.start().await,
            Self::Http(s) => s.start().await,
            Self::Memory(s) => s.start().await,
        }
    }

    async fn publish(&self, snapshot: &Snapshot) -> Result<()> {
        match self {
            Self::Html(s) => s.publish(snapshot).await,
            Self::Json(s) => s.publish(snapshot).await,
            Self::Log(s) => s.publish(snapshot).await,
            Self::Http(s) => s.publish(snapshot).await,
            Self::Memory(s) => s.publish(snapshot).await,
        }
    }

    async fn stop(&mut self) -> Result<()> {
        match self {
            Self::Html(s) => s.stop().await,
            Self::Json(s) => s.stop().await,
            Self::Log(s) => s.stop().await,
            Self::Http(s) => s.stop().await,
            Self::Memory(s) => s.stop().await,
        }
    }
}

impl From<MemorySink> for Exporter {
    fn from(s: MemorySink) -> Self {
        Self::Memory(s)
    }
}

/// Replace `path` with `contents` via a sibling temp file and rename, so
/// readers never see a partially written file.
pub(crate) async fn write_atomic(path: &Path, contents: &[u8]) -> Result<()> {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");

    tokio::fs::write(&tmp, contents)
        .await
        .with_context(|| format!("writing {}", Path::new(&tmp).display()))?;
    tokio::fs::rename(&tmp, path)
        .await
        .with_context(|| format!("renaming into {}", path.display()))?;

    Ok(())
}

/// Create the parent directory of `path` if it has one.
pub(crate) async fn ensure_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("creating directory {}", parent.display()))?;
    }
    Ok(())
}
