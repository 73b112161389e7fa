use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use super::{ensure_parent, write_atomic, Snapshot, SnapshotSink};

/// Writes each snapshot as a pretty-printed JSON document.
pub struct JsonSink {
    path: PathBuf,
}

impl JsonSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SnapshotSink for JsonSink {
    fn name(&self) -> &str {
        "json"
    }

    async fn start(&mut self) -> Result<()> {
        ensure_parent(&self.path).await
    }

    async fn publish(&self, snapshot: &Snapshot) -> Result<()> {
        let body = serde_json::to_vec_pretty(snapshot).context("serializing snapshot")?;
        write_atomic(&self.path, &body).await
    }

    async fn stop(&mut self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, UNIX_EPOCH};

    use super::*;
    use crate::clock::Clock;
    use crate::config::EngineConfig;
    use crate::message::{parse_key, SourceKind};
    use crate::reconcile::Reconciler;

    #[tokio::test]
    async fn test_writes_snapshot_document() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let path = tmp.path().join("out").join("snapshot.json");

        let r = Reconciler::new(
            &EngineConfig::default(),
            Clock::manual(UNIX_EPOCH + Duration::from_secs(5)),
        );
        let payload = "KEY0001ABCDEFGHIJKLMNOPQ|x";
        for source in SourceKind::all() {
            let key = parse_key(payload).expect("valid key");
            r.submit(r.stamp(key, payload.to_string(), *source));
        }

        let mut sink = JsonSink::new(&path);
        sink.start().await.expect("start");
        sink.publish(&r.snapshot(10)).await.expect("publish");

        let text = std::fs::read_to_string(&path).expect("read");
        let doc: serde_json::Value = serde_json::from_str(&text).expect("json");
        assert_eq!(doc["counters"]["matched"], 1);
        assert_eq!(doc["pending_count"], 0);
        assert_eq!(doc["recent_outcomes"][0]["status"], "MATCH");
        assert_eq!(doc["recent_outcomes"][0]["key"], "KEY0001ABCDEFGHIJKLMNOPQ");
        assert!(!tmp.path().join("out").join("snapshot.json.tmp").exists());
    }
}
