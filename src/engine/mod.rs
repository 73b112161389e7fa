mod ingest;
mod periodic;
mod state;

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::clock::Clock;
use crate::config::{Config, EngineConfig, SourceConfig};
use crate::export::health::{AppState, HealthMetrics, HealthServer};
use crate::message::SourceKind;
use crate::reconcile::{CounterSnapshot, Reconciler, Snapshot};
use crate::sink::{Exporter, SnapshotSink};
use crate::source::{channel, ChannelSender, MessageSource, Source, SpoolSource};

use self::ingest::{run_ingestion, IngestSettings};
use self::periodic::{run_publisher, run_sweeper};
use self::state::StateCell;

pub use self::state::{EngineState, LifecycleError};

/// Lifecycle controller: owns the reconciler and runs the ingestion
/// workers, timeout sweeper and snapshot publisher.
///
/// `start` and `stop` take `&self`, so an `Arc<Engine>` can be stopped from a
/// signal handler while another task owns the run loop.
pub struct Engine<S = Source> {
    cfg: EngineConfig,
    reconciler: Arc<Reconciler>,
    metrics: Arc<HealthMetrics>,
    state: StateCell,
    health: Option<HealthSetup>,
    health_addr: parking_lot::Mutex<Option<SocketAddr>>,
    runtime: tokio::sync::Mutex<Runtime<S>>,
    work_cancel: CancellationToken,
    publish_cancel: CancellationToken,
}

struct HealthSetup {
    server: HealthServer,
    ingest: HashMap<SourceKind, ChannelSender>,
}

/// Components waiting to be launched, then the handles of what runs.
struct Runtime<S> {
    pending: Option<Components<S>>,
    workers: Vec<JoinHandle<()>>,
    publisher: Option<JoinHandle<()>>,
}

struct Components<S> {
    legacy: S,
    modern: S,
    sinks: Vec<Exporter>,
}

impl Engine<Source> {
    /// Build an engine with sources and sinks bound from configuration.
    pub fn from_config(cfg: &Config) -> Result<Self> {
        Self::from_config_with_clock(cfg, Clock::System)
    }

    pub fn from_config_with_clock(cfg: &Config, clock: Clock) -> Result<Self> {
        cfg.validate()?;

        let mut ingest = HashMap::new();
        let mut bind = |stream: SourceKind| -> Source {
            match cfg.sources.get(stream) {
                SourceConfig::Spool {
                    path,
                    poll_interval,
                } => SpoolSource::new(path.clone(), *poll_interval).into(),
                SourceConfig::Http { queue_capacity } => {
                    let (tx, rx) = channel(*queue_capacity);
                    ingest.insert(stream, tx);
                    rx.into()
                }
            }
        };
        let legacy = bind(SourceKind::Legacy);
        let modern = bind(SourceKind::Modern);

        let sinks = cfg
            .sinks
            .iter()
            .map(Exporter::from_config)
            .collect::<Result<Vec<_>>>()
            .context("building sinks")?;

        let engine = Self::new(cfg.engine.clone(), legacy, modern, sinks, clock)?;

        Ok(if cfg.health.enabled {
            engine.with_health_server(&cfg.health.addr, ingest)
        } else {
            engine
        })
    }
}

impl<S: MessageSource + 'static> Engine<S> {
    /// Creates an engine in the CREATED state.
    pub fn new(
        cfg: EngineConfig,
        legacy: S,
        modern: S,
        sinks: Vec<Exporter>,
        clock: Clock,
    ) -> Result<Self> {
        cfg.validate()?;

        let metrics = Arc::new(HealthMetrics::new().context("creating health metrics")?);
        let reconciler =
            Arc::new(Reconciler::new(&cfg, clock).with_metrics(Arc::clone(&metrics)));

        Ok(Self {
            cfg,
            reconciler,
            metrics,
            state: StateCell::new(),
            health: None,
            health_addr: parking_lot::Mutex::new(None),
            runtime: tokio::sync::Mutex::new(Runtime {
                pending: Some(Components {
                    legacy,
                    modern,
                    sinks,
                }),
                workers: Vec::new(),
                publisher: None,
            }),
            work_cancel: CancellationToken::new(),
            publish_cancel: CancellationToken::new(),
        })
    }

    /// Serve metrics, health, snapshot and push-ingest routes on `addr`
    /// while running.
    pub fn with_health_server(
        mut self,
        addr: &str,
        ingest: HashMap<SourceKind, ChannelSender>,
    ) -> Self {
        self.health = Some(HealthSetup {
            server: HealthServer::new(addr),
            ingest,
        });
        self
    }

    /// Open sources, start sinks and the health server, then launch the
    /// workers, sweeper and publisher.
    ///
    /// Only valid from CREATED. Any failure leaves the engine STOPPED.
    pub async fn start(&self) -> Result<(), LifecycleError> {
        let mut rt = self.runtime.lock().await;

        self.state
            .transition(EngineState::Created, EngineState::Running)
            .map_err(|actual| LifecycleError::InvalidState { actual })?;

        let Some(components) = rt.pending.take() else {
            self.state.set(EngineState::Stopped);
            return Err(LifecycleError::InvalidState {
                actual: EngineState::Stopped,
            });
        };

        match self.launch(components, &mut rt).await {
            Ok(()) => {
                info!(
                    pairing_timeout = ?self.cfg.pairing_timeout,
                    sweep_interval = ?self.cfg.sweep_interval,
                    snapshot_interval = ?self.cfg.snapshot_interval,
                    "engine started",
                );
                Ok(())
            }
            Err(e) => {
                error!(error = %e, "engine failed to start");
                self.state.set(EngineState::Stopped);
                Err(e)
            }
        }
    }

    async fn launch(
        &self,
        components: Components<S>,
        rt: &mut Runtime<S>,
    ) -> Result<(), LifecycleError> {
        let Components {
            mut legacy,
            mut modern,
            mut sinks,
        } = components;

        legacy
            .open()
            .await
            .map_err(|error| LifecycleError::SourceOpen {
                stream: SourceKind::Legacy,
                error,
            })?;

        if let Err(error) = modern.open().await {
            legacy.close().await;
            return Err(LifecycleError::SourceOpen {
                stream: SourceKind::Modern,
                error,
            });
        }

        if let Err(e) = start_sinks(&mut sinks).await {
            legacy.close().await;
            modern.close().await;
            return Err(e);
        }

        if let Some(health) = &self.health {
            let state = Arc::new(AppState {
                metrics: Arc::clone(&self.metrics),
                reconciler: Arc::clone(&self.reconciler),
                recent_limit: self.cfg.recent_outcomes_limit,
                ingest: health.ingest.clone(),
            });

            match health.server.start(state).await {
                Ok(addr) => *self.health_addr.lock() = Some(addr),
                Err(e) => {
                    stop_sinks(&mut sinks).await;
                    legacy.close().await;
                    modern.close().await;
                    return Err(LifecycleError::HealthServer(e));
                }
            }
        }

        let settings = IngestSettings {
            receive_timeout: self.cfg.receive_timeout,
            error_backoff: self.cfg.error_backoff,
        };

        for (stream, source) in [(SourceKind::Legacy, legacy), (SourceKind::Modern, modern)] {
            rt.workers.push(tokio::spawn(run_ingestion(
                source,
                stream,
                Arc::clone(&self.reconciler),
                Arc::clone(&self.metrics),
                settings,
                self.work_cancel.child_token(),
            )));
        }

        rt.workers.push(tokio::spawn(run_sweeper(
            Arc::clone(&self.reconciler),
            self.cfg.sweep_interval,
            self.work_cancel.child_token(),
        )));

        rt.publisher = Some(tokio::spawn(run_publisher(
            Arc::clone(&self.reconciler),
            Arc::clone(&self.metrics),
            sinks,
            self.cfg.snapshot_interval,
            self.cfg.recent_outcomes_limit,
            self.publish_cancel.child_token(),
        )));

        Ok(())
    }

    /// Stop all loops, publish a final snapshot and move to STOPPED.
    ///
    /// Idempotent. Concurrent callers wait until the first one finishes.
    pub async fn stop(&self) {
        let mut rt = self.runtime.lock().await;

        match self.state.get() {
            EngineState::Stopped => return,
            EngineState::Created => {
                rt.pending = None;
                self.state.set(EngineState::Stopped);
                info!("engine stopped before start");
                return;
            }
            EngineState::Running | EngineState::Stopping => {}
        }

        self.state.set(EngineState::Stopping);
        info!("engine stopping");

        // Workers close their sources on exit.
        self.work_cancel.cancel();
        let deadline = Instant::now() + self.cfg.shutdown_timeout;
        for handle in rt.workers.drain(..) {
            await_task(handle, deadline, "worker").await;
        }

        self.publish_cancel.cancel();
        if let Some(handle) = rt.publisher.take() {
            let deadline = Instant::now() + self.cfg.shutdown_timeout;
            await_task(handle, deadline, "publisher").await;
        }

        if let Some(health) = &self.health {
            if tokio::time::timeout(self.cfg.shutdown_timeout, health.server.stop())
                .await
                .is_err()
            {
                warn!("health server did not stop before shutdown timeout");
            }
        }

        self.state.set(EngineState::Stopped);

        let c = self.reconciler.counters();
        info!(
            observed = c.observed,
            matched = c.matched,
            mismatched = c.mismatched,
            orphaned_legacy = c.orphaned_legacy,
            orphaned_modern = c.orphaned_modern,
            duplicates = c.duplicates,
            discarded = c.discarded,
            success_rate = format_args!("{:.2}", c.success_rate()),
            pending = self.reconciler.pending_count(),
            "engine stopped",
        );
    }
}

impl<S> Engine<S> {
    pub fn state(&self) -> EngineState {
        self.state.get()
    }

    /// Point-in-time counter read, valid in every state.
    pub fn current_counters(&self) -> CounterSnapshot {
        self.reconciler.counters()
    }

    /// Snapshot with the configured number of recent outcomes.
    pub fn snapshot(&self) -> Snapshot {
        self.reconciler.snapshot(self.cfg.recent_outcomes_limit)
    }

    pub fn reconciler(&self) -> &Arc<Reconciler> {
        &self.reconciler
    }

    pub fn metrics(&self) -> &Arc<HealthMetrics> {
        &self.metrics
    }

    /// Bound address of the health server while it runs.
    pub fn health_addr(&self) -> Option<SocketAddr> {
        *self.health_addr.lock()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.cfg
    }
}

impl<S> Drop for Engine<S> {
    fn drop(&mut self) {
        self.work_cancel.cancel();
        self.publish_cancel.cancel();
    }
}

/// Start every sink, stopping the already started ones if one fails.
async fn start_sinks(sinks: &mut [Exporter]) -> Result<(), LifecycleError> {
    for i in 0..sinks.len() {
        if let Err(error) = sinks[i].start().await {
            let name = sinks[i].name().to_string();
            stop_sinks(&mut sinks[..i]).await;
            return Err(LifecycleError::SinkStart { name, error });
        }
    }
    Ok(())
}

async fn stop_sinks(sinks: &mut [Exporter]) {
    for sink in sinks {
        if let Err(e) = sink.stop().await {
            error!(sink = sink.name(), error = %e, "error stopping sink");
        }
    }
}

async fn await_task(mut handle: JoinHandle<()>, deadline: Instant, task: &str) {
    match tokio::time::timeout_at(deadline, &mut handle).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!(task, error = %e, "task failed"),
        Err(_) => {
            warn!(task, "task did not stop before shutdown timeout, aborting");
            handle.abort();
        }
    }
}
