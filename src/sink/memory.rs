use std::collections::VecDeque;
use std::sync::Arc;

use anyhow::Result;
use parking_lot::Mutex;

use super::{Snapshot, SnapshotSink};

/// Keeps the most recent snapshots in memory.
///
/// Clones share storage, so a caller can keep one handle and pass another to
/// the engine.
#[derive(Clone)]
pub struct MemorySink {
    capacity: usize,
    snapshots: Arc<Mutex<VecDeque<Snapshot>>>,
}

impl MemorySink {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            snapshots: Arc::new(Mutex::new(VecDeque::with_capacity(capacity))),
        }
    }

    /// Most recently published snapshot.
    pub fn latest(&self) -> Option<Snapshot> {
        self.snapshots.lock().back().cloned()
    }

    /// Retained snapshots, oldest first.
    pub fn snapshots(&self) -> Vec<Snapshot> {
        self.snapshots.lock().iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.snapshots.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.lock().is_empty()
    }
}

impl SnapshotSink for MemorySink {
    fn name(&self) -> &str {
        "memory"
    }

    async fn start(&mut self) -> Result<()> {
        Ok(())
    }

    async fn publish(&self, snapshot: &Snapshot) -> Result<()> {
        let mut snapshots = self.snapshots.lock();
        if snapshots.len() == self.capacity {
            snapshots.pop_front();
        }
        snapshots.push_back(snapshot.clone());
        Ok(())
    }

    async fn stop(&mut self) -> Result<()> {
        Ok(())
    }
}
