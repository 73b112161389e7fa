use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::Deserialize;

use crate::message::SourceKind;

/// Top-level configuration for the reconciler service.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Logging verbosity (debug, info, warn, error). Default: "info".
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Pairing, sweeping and publishing parameters.
    #[serde(default)]
    pub engine: EngineConfig,

    /// Transport bindings for the two streams.
    #[serde(default)]
    pub sources: SourcesConfig,

    /// Snapshot destinations, all published on every tick.
    #[serde(default = "default_sinks")]
    pub sinks: Vec<SinkConfig>,

    /// Prometheus metrics / health server configuration.
    #[serde(default)]
    pub health: HealthConfig,
}

/// Engine tuning.
#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    /// How long a half-pair may wait for its counterpart. Default: 60s.
    #[serde(default = "default_pairing_timeout", with = "humantime_serde")]
    pub pairing_timeout: Duration,

    /// Timeout sweeper cadence. Default: 5s.
    #[serde(default = "default_sweep_interval", with = "humantime_serde")]
    pub sweep_interval: Duration,

    /// Snapshot publisher cadence. Default: 10s.
    #[serde(default = "default_snapshot_interval", with = "humantime_serde")]
    pub snapshot_interval: Duration,

    /// Maximum retained outcomes. Default: 10000.
    #[serde(default = "default_result_log_capacity")]
    pub result_log_capacity: usize,

    /// Maximum differing positions listed per mismatch. Default: 10.
    #[serde(default = "default_diff_preview_limit")]
    pub diff_preview_limit: usize,

    /// Outcomes included in each snapshot. Default: 100.
    #[serde(default = "default_recent_outcomes_limit")]
    pub recent_outcomes_limit: usize,

    /// Bounded wait per source receive. Default: 5s.
    #[serde(default = "default_receive_timeout", with = "humantime_serde")]
    pub receive_timeout: Duration,

    /// Pause after a transport error before retrying. Default: 1s.
    #[serde(default = "default_error_backoff", with = "humantime_serde")]
    pub error_backoff: Duration,

    /// Upper bound on waiting for in-flight work during stop. Default: 30s.
    #[serde(default = "default_shutdown_timeout", with = "humantime_serde")]
    pub shutdown_timeout: Duration,
}

/// Source bindings, one per stream.
#[derive(Debug, Clone, Deserialize)]
pub struct SourcesConfig {
    #[serde(default)]
    pub legacy: SourceConfig,
    #[serde(default)]
    pub modern: SourceConfig,
}

impl SourcesConfig {
    pub fn get(&self, source: SourceKind) -> &SourceConfig {
        match source {
            SourceKind::Legacy => &self.legacy,
            SourceKind::Modern => &self.modern,
        }
    }
}

/// Transport binding for one stream.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SourceConfig {
    /// Directory of message files.
    Spool {
        path: PathBuf,
        /// Directory poll cadence while waiting. Default: 100ms.
        #[serde(default = "default_poll_interval", with = "humantime_serde")]
        poll_interval: Duration,
    },
    /// Messages pushed to `POST /ingest/<source>` on the health server.
    Http {
        /// Bounded queue between the HTTP handler and the worker. Default: 1024.
        #[serde(default = "default_queue_capacity")]
        queue_capacity: usize,
    },
}

/// Snapshot destination.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SinkConfig {
    /// Self-refreshing HTML report.
    Html {
        path: PathBuf,
        /// Browser refresh interval embedded in the page. Default: 10s.
        #[serde(default = "default_html_refresh", with = "humantime_serde")]
        refresh: Duration,
    },
    /// Pretty-printed JSON document.
    Json { path: PathBuf },
    /// Structured log line.
    Log,
    /// JSON POST to a collector.
    Http {
        address: String,
        /// Request timeout. Default: 5s.
        #[serde(default = "default_http_sink_timeout", with = "humantime_serde")]
        timeout: Duration,
    },
}

/// Prometheus metrics / health server configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct HealthConfig {
    /// Serve /metrics, /healthz, /snapshot and /ingest. Default: true.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Listen address. Default: ":9090".
    #[serde(default = "default_health_addr")]
    pub addr: String,
}

// --- Default value functions ---

fn default_log_level() -> String {
    "info".to_string()
}

fn default_pairing_timeout() -> Duration {
    Duration::from_secs(60)
}

fn default_sweep_interval() -> Duration {
    Duration::from_secs(5)
}

fn default_snapshot_interval() -> Duration {
    Duration::from_secs(10)
}

fn default_result_log_capacity() -> usize {
    10_000
}

fn default_diff_preview_limit() -> usize {
    10
}

fn default_recent_outcomes_limit() -> usize {
    100
}

fn default_receive_timeout() -> Duration {
    Duration::from_secs(5)
}

fn default_error_backoff() -> Duration {
    Duration::from_secs(1)
}

fn default_shutdown_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_poll_interval() -> Duration {
    Duration::from_millis(100)
}

fn default_queue_capacity() -> usize {
    1024
}

fn default_html_refresh() -> Duration {
    Duration::from_secs(10)
}

fn default_http_sink_timeout() -> Duration {
    Duration::from_secs(5)
}

fn default_sinks() -> Vec<SinkConfig> {
    vec![SinkConfig::Html {
        path: PathBuf::from("mq_comparison_report.html"),
        refresh: default_html_refresh(),
    }]
}

fn default_true() -> bool {
    true
}

fn default_health_addr() -> String {
    ":9090".to_string()
}

// --- Default trait impls ---

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            engine: EngineConfig::default(),
            sources: SourcesConfig::default(),
            sinks: default_sinks(),
            health: HealthConfig::default(),
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            pairing_timeout: default_pairing_timeout(),
            sweep_interval: default_sweep_interval(),
            snapshot_interval: default_snapshot_interval(),
            result_log_capacity: default_result_log_capacity(),
            diff_preview_limit: default_diff_preview_limit(),
            recent_outcomes_limit: default_recent_outcomes_limit(),
            receive_timeout: default_receive_timeout(),
            error_backoff: default_error_backoff(),
            shutdown_timeout: default_shutdown_timeout(),
        }
    }
}

impl Default for SourcesConfig {
    fn default() -> Self {
        Self {
            legacy: SourceConfig::default(),
            modern: SourceConfig::default(),
        }
    }
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self::Http {
            queue_capacity: default_queue_capacity(),
        }
    }
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            addr: default_health_addr(),
        }
    }
}

// --- Validation and loading ---

impl Config {
    /// Load configuration from a YAML file.
    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;

        Self::from_yaml(&data).with_context(|| format!("loading config file {}", path.display()))
    }

    /// Parse and validate configuration from YAML text.
    pub fn from_yaml(data: &str) -> Result<Self> {
        let cfg: Config = serde_yaml::from_str(data).context("parsing config")?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Validate the configuration for required fields and consistency.
    pub fn validate(&self) -> Result<()> {
        self.engine.validate()?;

        for source in SourceKind::all() {
            match self.sources.get(*source) {
                SourceConfig::Spool {
                    path,
                    poll_interval,
                } => {
                    if path.as_os_str().is_empty() {
                        bail!("sources.{source}.path is required");
                    }
                    if poll_interval.is_zero() {
                        bail!("sources.{source}.poll_interval must be positive");
                    }
                }
                SourceConfig::Http { queue_capacity } => {
                    if *queue_capacity == 0 {
                        bail!("sources.{source}.queue_capacity must be positive");
                    }
                    if !self.health.enabled {
                        bail!("sources.{source}: kind http requires health.enabled");
                    }
                }
            }
        }

        for (i, sink) in self.sinks.iter().enumerate() {
            match sink {
                SinkConfig::Html { path, refresh } => {
                    if path.as_os_str().is_empty() {
                        bail!("sinks[{i}].path is required");
                    }
                    if refresh.is_zero() {
                        bail!("sinks[{i}].refresh must be positive");
                    }
                }
                SinkConfig::Json { path } => {
                    if path.as_os_str().is_empty() {
                        bail!("sinks[{i}].path is required");
                    }
                }
                SinkConfig::Log => {}
                SinkConfig::Http { address, timeout } => {
                    if address.is_empty() {
                        bail!("sinks[{i}].address is required");
                    }
                    if timeout.is_zero() {
                        bail!("sinks[{i}].timeout must be positive");
                    }
                }
            }
        }

        if self.health.enabled && self.health.addr.is_empty() {
            bail!("health.addr is required when health.enabled is true");
        }

        Ok(())
    }
}

impl EngineConfig {
    pub fn validate(&self) -> Result<()> {
        let durations = [
            ("pairing_timeout", self.pairing_timeout),
            ("sweep_interval", self.sweep_interval),
            ("snapshot_interval", self.snapshot_interval),
            ("receive_timeout", self.receive_timeout),
            ("error_backoff", self.error_backoff),
            ("shutdown_timeout", self.shutdown_timeout),
        ];
        for (name, value) in durations {
            if value.is_zero() {
                bail!("engine.{name} must be positive");
            }
        }

        if self.result_log_capacity == 0 {
            bail!("engine.result_log_capacity must be positive");
        }
        if self.diff_preview_limit == 0 {
            bail!("engine.diff_preview_limit must be positive");
        }
        if self.recent_outcomes_limit == 0 {
            bail!("engine.recent_outcomes_limit must be positive");
        }
        if self.recent_outcomes_limit > self.result_log_capacity {
            bail!(
                "engine.recent_outcomes_limit ({}) must not exceed engine.result_log_capacity ({})",
                self.recent_outcomes_limit,
                self.result_log_capacity
            );
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_values() {
        let cfg = Config::default();
        assert_eq!(cfg.log_level, "info");
        assert_eq!(cfg.engine.pairing_timeout, Duration::from_secs(60));
        assert_eq!(cfg.engine.sweep_interval, Duration::from_secs(5));
        assert_eq!(cfg.engine.snapshot_interval, Duration::from_secs(10));
        assert_eq!(cfg.engine.result_log_capacity, 10_000);
        assert_eq!(cfg.engine.diff_preview_limit, 10);
        assert_eq!(cfg.engine.recent_outcomes_limit, 100);
        assert_eq!(cfg.health.addr, ":9090");
        assert!(cfg.health.enabled);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_parse_full_yaml() {
        let yaml = r#"
log_level: debug
engine:
  pairing_timeout: 2m
  sweep_interval: 1s
  result_log_capacity: 500
  recent_outcomes_limit: 50
sources:
  legacy: { kind: spool, path: /var/spool/legacy }
  modern: { kind: http, queue_capacity: 64 }
sinks:
  - { kind: html, path: report.html, refresh: 30s }
  - { kind: json, path: snapshot.json }
  - { kind: log }
  - { kind: http, address: "http://collector/snapshots" }
health:
  addr: "127.0.0.1:9191"
"#;
        let cfg = Config::from_yaml(yaml).expect("valid config");

        assert_eq!(cfg.log_level, "debug");
        assert_eq!(cfg.engine.pairing_timeout, Duration::from_secs(120));
        assert_eq!(cfg.engine.snapshot_interval, Duration::from_secs(10));
        assert_eq!(
            cfg.sources.legacy,
            SourceConfig::Spool {
                path: PathBuf::from("/var/spool/legacy"),
                poll_interval: Duration::from_millis(100),
            }
        );
        assert_eq!(cfg.sources.modern, SourceConfig::Http { queue_capacity: 64 });
        assert_eq!(cfg.sinks.len(), 4);
        assert_eq!(
            cfg.sinks[3],
            SinkConfig::Http {
                address: "http://collector/snapshots".to_string(),
                timeout: Duration::from_secs(5),
            }
        );
        assert_eq!(cfg.health.addr, "127.0.0.1:9191");
    }

    #[test]
    fn test_zero_duration_rejected() {
        let mut cfg = Config::default();
        cfg.engine.sweep_interval = Duration::ZERO;
        let err = cfg.validate().expect_err("should fail");
        assert!(err.to_string().contains("engine.sweep_interval"));
    }

    #[test]
    fn test_recent_limit_bounded_by_capacity() {
        let mut cfg = Config::default();
        cfg.engine.result_log_capacity = 10;
        cfg.engine.recent_outcomes_limit = 11;
        let err = cfg.validate().expect_err("should fail");
        assert!(err.to_string().contains("recent_outcomes_limit"));
    }

    #[test]
    fn test_http_source_requires_health_server() {
        let mut cfg = Config::default();
        cfg.health.enabled = false;
        let err = cfg.validate().expect_err("should fail");
        assert!(err.to_string().contains("requires health.enabled"));

        cfg.sources.legacy = SourceConfig::Spool {
            path: PathBuf::from("/tmp/legacy"),
            poll_interval: Duration::from_millis(50),
        };
        cfg.sources.modern = cfg.sources.legacy.clone();
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_empty_sink_address_rejected() {
        let cfg = Config {
            sinks: vec![SinkConfig::Http {
                address: String::new(),
                timeout: Duration::from_secs(1),
            }],
            ..Default::default()
        };
        let err = cfg.validate().expect_err("should fail");
        assert!(err.to_string().contains("sinks[0].address"));
    }

    #[test]
    fn test_unknown_source_kind_rejected() {
        let yaml = "sources:\n  legacy: { kind: kafka }\n";
        assert!(Config::from_yaml(yaml).is_err());
    }
}
