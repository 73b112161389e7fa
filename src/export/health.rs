use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use prometheus::{
    Counter, CounterVec, Encoder, Gauge, Histogram, HistogramOpts, HistogramVec, Opts, Registry,
    TextEncoder,
};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::message::{RawMessage, SourceKind};
use crate::reconcile::Reconciler;
use crate::source::{ChannelSender, SourceError};

const NAMESPACE: &str = "mqrecon";

/// Header carrying the transport correlation token on pushed messages.
pub const CORRELATION_HEADER: &str = "x-correlation-id";

/// Prometheus metrics for one engine instance.
///
/// Each instance owns its registry, so several engines can coexist in one
/// process (tests do this).
pub struct HealthMetrics {
    registry: Registry,

    /// Messages delivered by each source.
    pub messages_received: CounterVec,
    /// Messages dropped before pairing, by source.
    pub messages_discarded: CounterVec,
    /// Transport errors by source.
    pub receive_errors: CounterVec,
    /// Terminal outcomes by status.
    pub outcomes: CounterVec,
    /// Same-side repeats for a pending key.
    pub duplicates: Counter,
    /// Half-pairs currently waiting.
    pub pending_pairs: Gauge,
    /// Outcomes retained in the result log.
    pub result_log_entries: Gauge,
    /// Arrival gap between the two halves of completed pairs.
    pub pairing_latency: Histogram,
    /// Time spent in one sweep.
    pub sweep_duration: Histogram,
    /// Snapshot delivery time by sink.
    pub snapshot_publish_duration: HistogramVec,
    /// Failed snapshot deliveries by sink.
    pub snapshot_publish_errors: CounterVec,
}

impl HealthMetrics {
    /// Creates a new metrics instance with all metrics registered.
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let messages_received = CounterVec::new(
            Opts::new(
                "messages_received_total",
                "Total messages received by source.",
            )
            .namespace(NAMESPACE),
            &["source"],
        )?;
        let messages_discarded = CounterVec::new(
            Opts::new(
                "messages_discarded_total",
                "Total messages discarded before pairing by source.",
            )
            .namespace(NAMESPACE),
            &["source"],
        )?;
        let receive_errors = CounterVec::new(
            Opts::new(
                "receive_errors_total",
                "Total transport receive errors by source and error type.",
            )
            .namespace(NAMESPACE),
            &["source", "error_type"],
        )?;
        let outcomes = CounterVec::new(
            Opts::new("outcomes_total", "Total reconciliation outcomes by status.")
                .namespace(NAMESPACE),
            &["status"],
        )?;
        let duplicates = Counter::with_opts(
            Opts::new(
                "duplicates_total",
                "Total repeated messages for an already populated pair slot.",
            )
            .namespace(NAMESPACE),
        )?;
        let pending_pairs = Gauge::with_opts(
            Opts::new("pending_pairs", "Half-pairs waiting for their counterpart.")
                .namespace(NAMESPACE),
        )?;
        let result_log_entries = Gauge::with_opts(
            Opts::new(
                "result_log_entries",
                "Outcomes currently retained in the result log.",
            )
            .namespace(NAMESPACE),
        )?;
        let pairing_latency = Histogram::with_opts(
            HistogramOpts::new(
                "pairing_latency_seconds",
                "Arrival gap between legacy and modern halves of completed pairs.",
            )
            .namespace(NAMESPACE)
            .buckets(vec![0.001, 0.01, 0.1, 0.5, 1.0, 5.0, 15.0, 30.0, 60.0]),
        )?;
        let sweep_duration = Histogram::with_opts(
            HistogramOpts::new("sweep_duration_seconds", "Time to run one timeout sweep.")
                .namespace(NAMESPACE)
                .buckets(vec![0.0001, 0.001, 0.01, 0.05, 0.1, 0.5]),
        )?;
        let snapshot_publish_duration = HistogramVec::new(
            HistogramOpts::new(
                "snapshot_publish_duration_seconds",
                "Time to deliver a snapshot by sink.",
            )
            .namespace(NAMESPACE)
            .buckets(vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0]),
            &["sink"],
        )?;
        let snapshot_publish_errors = CounterVec::new(
            Opts::new(
                "snapshot_publish_errors_total",
                "Total failed snapshot deliveries by sink.",
            )
            .namespace(NAMESPACE),
            &["sink"],
        )?;

        registry.register(Box::new(messages_received.clone()))?;
        registry.register(Box::new(messages_discarded.clone()))?;
        registry.register(Box::new(receive_errors.clone()))?;
        registry.register(Box::new(outcomes.clone()))?;
        registry.register(Box::new(duplicates.clone()))?;
        registry.register(Box::new(pending_pairs.clone()))?;
        registry.register(Box::new(result_log_entries.clone()))?;
        registry.register(Box::new(pairing_latency.clone()))?;
        registry.register(Box::new(sweep_duration.clone()))?;
        registry.register(Box::new(snapshot_publish_duration.clone()))?;
        registry.register(Box::new(snapshot_publish_errors.clone()))?;

        Ok(Self {
            registry,
            messages_received,
            messages_discarded,
            receive_errors,
            outcomes,
            duplicates,
            pending_pairs,
            result_log_entries,
            pairing_latency,
            sweep_duration,
            snapshot_publish_duration,
            snapshot_publish_errors,
        })
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Render all metrics in the Prometheus text format.
    pub fn render(&self) -> Result<String> {
        let mut buffer = Vec::new();
        TextEncoder::new()
            .encode(&self.registry.gather(), &mut buffer)
            .context("encoding metrics")?;
        String::from_utf8(buffer).context("converting metrics to string")
    }
}

/// Shared state for axum handlers.
pub struct AppState {
    pub metrics: Arc<HealthMetrics>,
    pub reconciler: Arc<Reconciler>,
    pub recent_limit: usize,
    /// Push-ingest queues, present only for sources bound to HTTP.
    pub ingest: HashMap<SourceKind, ChannelSender>,
}

/// HTTP server for /metrics, /healthz, /snapshot and /ingest/:source.
pub struct HealthServer {
    addr: String,
    shutdown: parking_lot::Mutex<Option<CancellationToken>>,
    task: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

impl HealthServer {
    pub fn new(addr: &str) -> Self {
        Self {
            addr: addr.to_string(),
            shutdown: parking_lot::Mutex::new(None),
            task: parking_lot::Mutex::new(None),
        }
    }

    /// Bind and start serving. Returns the bound address.
    pub async fn start(&self, state: Arc<AppState>) -> Result<SocketAddr> {
        let addr = if self.addr.is_empty() {
            ":9090"
        } else {
            &self.addr
        };

        // Parse address, handling ":port" shorthand.
        let bind_addr = if addr.starts_with(':') {
            format!("0.0.0.0{addr}")
        } else {
            addr.to_string()
        };

        let app = router(state);

        let listener = TcpListener::bind(&bind_addr)
            .await
            .with_context(|| format!("listening on {bind_addr}"))?;

        let local_addr = listener.local_addr().context("getting local address")?;

        let cancel = CancellationToken::new();
        *self.shutdown.lock() = Some(cancel.clone());

        let task = tokio::spawn(async move {
            tracing::info!(addr = %local_addr, "health server started");

            let result = axum::serve(
                listener,
                app.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .with_graceful_shutdown(async move {
                cancel.cancelled().await;
            })
            .await;

            if let Err(e) = result {
                tracing::error!(error = %e, "health server error");
            }
        });
        *self.task.lock() = Some(task);

        Ok(local_addr)
    }

    /// Gracefully shuts down the server and waits for it to exit.
    pub async fn stop(&self) {
        if let Some(cancel) = self.shutdown.lock().take() {
            cancel.cancel();
        }

        let task = self.task.lock().take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                tracing::error!(error = %e, "health server task failed");
            }
        }
    }
}

fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .route("/healthz", get(healthz_handler))
        .route("/snapshot", get(snapshot_handler))
        .route("/ingest/:source", post(ingest_handler))
        .with_state(state)
}

/// GET /metrics - Prometheus text format.
async fn metrics_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    match state.metrics.render() {
        Ok(text) => (StatusCode::OK, text),
        Err(e) => {
            tracing::error!(error = %e, "rendering metrics");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "encoding error".to_string(),
            )
        }
    }
}

/// GET /healthz - Simple health check.
async fn healthz_handler() -> &'static str {
    "ok"
}

/// GET /snapshot - current reconciliation snapshot as JSON.
async fn snapshot_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.reconciler.snapshot(state.recent_limit))
}

/// POST /ingest/:source - enqueue one message for an HTTP-bound source.
async fn ingest_handler(
    State(state): State<Arc<AppState>>,
    Path(source): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> impl IntoResponse {
    let Some(kind) = SourceKind::from_name(&source) else {
        return (StatusCode::NOT_FOUND, format!("unknown source {source}"));
    };
    let Some(sender) = state.ingest.get(&kind) else {
        return (
            StatusCode::NOT_FOUND,
            format!("source {kind} does not accept pushed messages"),
        );
    };

    let token = headers
        .get(CORRELATION_HEADER)
        .map(|v| v.as_bytes().to_vec())
        .unwrap_or_default();

    match sender.try_send(RawMessage::new(body.to_vec(), token)) {
        Ok(()) => (StatusCode::ACCEPTED, "accepted".to_string()),
        Err(e @ (SourceError::Unavailable(_) | SourceError::Closed)) => {
            tracing::warn!(source = %kind, error = %e, "rejecting pushed message");
            (StatusCode::SERVICE_UNAVAILABLE, e.to_string())
        }
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::Clock;
    use crate::config::EngineConfig;
    use crate::source::{channel, MessageSource};

    #[test]
    fn test_metrics_render_with_namespace() {
        let metrics = HealthMetrics::new().expect("metrics");
        metrics.duplicates.inc();
        metrics
            .outcomes
            .with_label_values(&["MATCH"])
            .inc();

        let text = metrics.render().expect("render");
        assert!(text.contains("mqrecon_duplicates_total 1"));
        assert!(text.contains("mqrecon_outcomes_total{status=\"MATCH\"} 1"));
    }

    #[test]
    fn test_independent_registries() {
        let a = HealthMetrics::new().expect("metrics");
        let b = HealthMetrics::new().expect("metrics");
        a.duplicates.inc();
        assert_eq!(b.duplicates.get(), 0.0);
    }

    #[tokio::test]
    async fn test_routes() {
        let metrics = Arc::new(HealthMetrics::new().expect("metrics"));
        let reconciler = Arc::new(
            Reconciler::new(&EngineConfig::default(), Clock::System)
                .with_metrics(Arc::clone(&metrics)),
        );
        let (tx, mut rx) = channel(1);
        let state = Arc::new(AppState {
            metrics,
            reconciler,
            recent_limit: 10,
            ingest: HashMap::from([(SourceKind::Legacy, tx)]),
        });

        let server = HealthServer::new("127.0.0.1:0");
        let addr = server.start(state).await.expect("start");
        let base = format!("http://{addr}");
        let client = reqwest::Client::new();

        let health = client
            .get(format!("{base}/healthz"))
            .send()
            .await
            .expect("healthz");
        assert_eq!(health.status(), reqwest::StatusCode::OK);

        let snap: serde_json::Value = client
            .get(format!("{base}/snapshot"))
            .send()
            .await
            .expect("snapshot")
            .json()
            .await
            .expect("json");
        assert_eq!(snap["pending_count"], 0);

        let accepted = client
            .post(format!("{base}/ingest/legacy"))
            .header(CORRELATION_HEADER, "abc")
            .body("PAYROLL10182026134501007|x")
            .send()
            .await
            .expect("ingest");
        assert_eq!(accepted.status(), reqwest::StatusCode::ACCEPTED);

        let full = client
            .post(format!("{base}/ingest/legacy"))
            .body("PAYROLL10182026134501008|x")
            .send()
            .await
            .expect("ingest");
        assert_eq!(full.status(), reqwest::StatusCode::SERVICE_UNAVAILABLE);

        let unbound = client
            .post(format!("{base}/ingest/modern"))
            .body("x")
            .send()
            .await
            .expect("ingest");
        assert_eq!(unbound.status(), reqwest::StatusCode::NOT_FOUND);

        let msg = rx
            .receive(std::time::Duration::from_millis(100))
            .await
            .expect("ok")
            .expect("message");
        assert_eq!(msg.correlation_token, b"abc");
        assert_eq!(msg.payload_text(), "PAYROLL10182026134501007|x");

        drop(client);
        server.stop().await;
    }
}
