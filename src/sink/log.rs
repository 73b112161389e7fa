use anyhow::Result;

use super::{Snapshot, SnapshotSink};

/// Emits each snapshot as one structured log event.
pub struct LogSink;

impl SnapshotSink for LogSink {
    fn name(&self) -> &str {
        "log"
    }

    async fn start(&mut self) -> Result<()> {
        Ok(())
    }

    async fn publish(&self, snapshot: &Snapshot) -> Result<()> {
        let c = &snapshot.counters;
        tracing::info!(
            observed = c.observed,
            matched = c.matched,
            mismatched = c.mismatched,
            orphaned_legacy = c.orphaned_legacy,
            orphaned_modern = c.orphaned_modern,
            duplicates = c.duplicates,
            discarded = c.discarded,
            success_rate = format_args!("{:.2}", snapshot.success_rate),
            pending = snapshot.pending_count,
            "reconciliation snapshot"
        );
        Ok(())
    }

    async fn stop(&mut self) -> Result<()> {
        Ok(())
    }
}
