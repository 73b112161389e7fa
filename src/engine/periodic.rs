use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::export::health::HealthMetrics;
use crate::reconcile::Reconciler;
use crate::sink::{Exporter, SnapshotSink};

/// Resolve expired half-pairs on a fixed cadence until cancelled.
pub(crate) async fn run_sweeper(
    reconciler: Arc<Reconciler>,
    interval: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                let orphaned = reconciler.sweep_expired();
                if !orphaned.is_empty() {
                    info!(
                        count = orphaned.len(),
                        pending = reconciler.pending_count(),
                        "orphaned half-pairs past pairing timeout",
                    );
                }
            }
        }
    }
}

/// Publish snapshots on a fixed cadence until cancelled, then publish once
/// more and stop every sink.
pub(crate) async fn run_publisher(
    reconciler: Arc<Reconciler>,
    metrics: Arc<HealthMetrics>,
    mut sinks: Vec<Exporter>,
    interval: Duration,
    recent_limit: usize,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                publish_all(&reconciler, &metrics, &sinks, recent_limit).await;
            }
        }
    }

    publish_all(&reconciler, &metrics, &sinks, recent_limit).await;

    for sink in &mut sinks {
        if let Err(e) = sink.stop().await {
            error!(sink = sink.name(), error = %e, "error stopping sink");
        }
    }
}

/// Deliver one snapshot to every sink. A failing sink is logged and counted
/// and does not affect the others.
pub(crate) async fn publish_all(
    reconciler: &Reconciler,
    metrics: &HealthMetrics,
    sinks: &[Exporter],
    recent_limit: usize,
) {
    if sinks.is_empty() {
        return;
    }

    let snapshot = reconciler.snapshot(recent_limit);

    for sink in sinks {
        let started = Instant::now();
        let result = sink.publish(&snapshot).await;

        metrics
            .snapshot_publish_duration
            .with_label_values(&[sink.name()])
            .observe(started.elapsed().as_secs_f64());

        if let Err(e) = result {
            metrics
                .snapshot_publish_errors
                .with_label_values(&[sink.name()])
                .inc();
            warn!(sink = sink.name(), error = %e, "snapshot publish failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;
    use std::time::UNIX_EPOCH;

    use super::*;
    use crate::clock::Clock;
    use crate::config::EngineConfig;
    use crate::sink::{JsonSink, MemorySink};

    #[tokio::test]
    async fn test_failing_sink_does_not_block_others() {
        let tmp = tempfile::tempdir().expect("tempdir");
        // Parent is a regular file, so the write fails.
        let blocker = tmp.path().join("blocker");
        std::fs::write(&blocker, "x").expect("write");
        let broken = JsonSink::new(PathBuf::from(&blocker).join("snapshot.json"));

        let memory = MemorySink::new(4);
        let sinks = vec![Exporter::Json(broken), Exporter::Memory(memory.clone())];

        let reconciler = Reconciler::new(&EngineConfig::default(), Clock::manual(UNIX_EPOCH));
        let metrics = HealthMetrics::new().expect("metrics");

        publish_all(&reconciler, &metrics, &sinks, 10).await;

        assert_eq!(memory.len(), 1);
        assert_eq!(
            metrics
                .snapshot_publish_errors
                .with_label_values(&["json"])
                .get(),
            1.0
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_publisher_publishes_final_snapshot_on_cancel() {
        let memory = MemorySink::new(16);
        let reconciler = Arc::new(Reconciler::new(
            &EngineConfig::default(),
            Clock::manual(UNIX_EPOCH),
        ));
        let metrics = Arc::new(HealthMetrics::new().expect("metrics"));
        let cancel = CancellationToken::new();

        let task = tokio::spawn(run_publisher(
            reconciler,
            metrics,
            vec![Exporter::Memory(memory.clone())],
            Duration::from_secs(10),
            10,
            cancel.clone(),
        ));

        // Immediate first tick plus one at 10s.
        tokio::time::sleep(Duration::from_secs(15)).await;
        cancel.cancel();
        task.await.expect("publisher exits");

        assert_eq!(memory.len(), 3);
    }
}
