use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::export::health::HealthMetrics;
use crate::message::{parse_key, RawMessage, SourceKind};
use crate::reconcile::Reconciler;
use crate::source::MessageSource;

/// Settings for one ingestion worker.
#[derive(Debug, Clone, Copy)]
pub(crate) struct IngestSettings {
    pub receive_timeout: Duration,
    pub error_backoff: Duration,
}

/// Pull messages from one source until cancelled, then close the source.
///
/// Transport errors never end the loop; the worker backs off and retries so
/// an outage on one stream does not halt the other.
pub(crate) async fn run_ingestion<S: MessageSource>(
    mut source: S,
    stream: SourceKind,
    reconciler: Arc<Reconciler>,
    metrics: Arc<HealthMetrics>,
    settings: IngestSettings,
    cancel: CancellationToken,
) {
    info!(source = %stream, binding = source.name(), "ingestion worker started");

    let received_total = metrics.messages_received.with_label_values(&[stream.as_str()]);

    loop {
        let received = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            r = source.receive(settings.receive_timeout) => r,
        };

        match received {
            Ok(Some(msg)) => {
                received_total.inc();
                ingest(&reconciler, stream, msg);
            }
            Ok(None) => {}
            Err(e) => {
                warn!(source = %stream, error = %e, "receive failed, backing off");
                metrics
                    .receive_errors
                    .with_label_values(&[stream.as_str(), e.kind()])
                    .inc();

                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(settings.error_backoff) => {}
                }
            }
        }
    }

    source.close().await;
    info!(source = %stream, "ingestion worker stopped");
}

/// Parse one raw message and hand it to the reconciler.
pub(crate) fn ingest(reconciler: &Reconciler, stream: SourceKind, msg: RawMessage) {
    let payload = msg.payload_text();

    match parse_key(&payload) {
        Ok(key) => {
            debug!(source = %stream, %key, token = %msg.token_hex(), "message received");
            reconciler.submit(reconciler.stamp(key, payload, stream));
        }
        Err(e) => {
            warn!(source = %stream, token = %msg.token_hex(), error = %e, "discarding message");
            reconciler.record_discarded(stream);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::UNIX_EPOCH;

    use super::*;
    use crate::clock::Clock;
    use crate::config::EngineConfig;
    use crate::source::{channel, SourceError};

    fn reconciler() -> Arc<Reconciler> {
        Arc::new(Reconciler::new(
            &EngineConfig::default(),
            Clock::manual(UNIX_EPOCH),
        ))
    }

    #[test]
    fn test_short_payload_is_discarded() {
        let r = reconciler();
        ingest(&r, SourceKind::Legacy, RawMessage::new("too short", "01"));

        let c = r.counters();
        assert_eq!(c.discarded, 1);
        assert_eq!(c.observed, 0);
        assert_eq!(r.pending_count(), 0);
    }

    #[test]
    fn test_invalid_utf8_is_decoded_lossily() {
        let r = reconciler();
        let mut payload = b"PAYROLL10182026134501007|".to_vec();
        payload.push(0xFF);
        ingest(&r, SourceKind::Modern, RawMessage::new(payload, ""));

        assert_eq!(r.counters().observed, 1);
        assert_eq!(r.pending_count(), 1);
    }

    /// Fails every receive.
    struct BrokenSource {
        attempts: Arc<std::sync::atomic::AtomicUsize>,
    }

    impl MessageSource for BrokenSource {
        fn name(&self) -> &str {
            "broken"
        }

        async fn open(&mut self) -> Result<(), SourceError> {
            Ok(())
        }

        async fn receive(&mut self, _timeout: Duration) -> Result<Option<RawMessage>, SourceError> {
            self.attempts
                .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
            Err(SourceError::Unavailable("down".to_string()))
        }

        async fn close(&mut self) {}
    }

    #[tokio::test(start_paused = true)]
    async fn test_errors_back_off_and_worker_survives() {
        let attempts = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let metrics = Arc::new(HealthMetrics::new().expect("metrics"));
        let cancel = CancellationToken::new();

        let task = tokio::spawn(run_ingestion(
            BrokenSource {
                attempts: Arc::clone(&attempts),
            },
            SourceKind::Legacy,
            reconciler(),
            Arc::clone(&metrics),
            IngestSettings {
                receive_timeout: Duration::from_secs(5),
                error_backoff: Duration::from_secs(1),
            },
            cancel.clone(),
        ));

        tokio::time::sleep(Duration::from_millis(3_500)).await;
        cancel.cancel();
        task.await.expect("worker exits cleanly");

        let n = attempts.load(std::sync::atomic::Ordering::Relaxed);
        assert!((3..=5).contains(&n), "unexpected attempt count {n}");
        assert_eq!(
            metrics
                .receive_errors
                .with_label_values(&["legacy", "unavailable"])
                .get(),
            n as f64
        );
    }

    #[tokio::test]
    async fn test_worker_feeds_reconciler_until_cancelled() {
        let r = reconciler();
        let metrics = Arc::new(HealthMetrics::new().expect("metrics"));
        let (tx, rx) = channel(8);
        let cancel = CancellationToken::new();

        let task = tokio::spawn(run_ingestion(
            rx,
            SourceKind::Legacy,
            Arc::clone(&r),
            metrics,
            IngestSettings {
                receive_timeout: Duration::from_millis(20),
                error_backoff: Duration::from_millis(20),
            },
            cancel.clone(),
        ));

        tx.send(RawMessage::new("PAYROLL10182026134501007|a", ""))
            .await
            .expect("send");

        for _ in 0..100 {
            if r.counters().observed == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(r.counters().observed, 1);

        cancel.cancel();
        task.await.expect("worker exits cleanly");
    }
}
