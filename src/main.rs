use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, EnvFilter};

use mqrecon::config::Config;
use mqrecon::simulate::{Scenario, Simulator};
use mqrecon::Engine;

/// Reconciles legacy and modernized message streams side by side.
#[derive(Parser)]
#[command(name = "mqrecon", about)]
struct Cli {
    /// Path to the YAML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Logging verbosity level (trace, debug, info, warn, error). Overrides
    /// the config file's `log_level`.
    #[arg(long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Print version information and exit.
    Version,

    /// Write scenario traffic into two spool directories.
    Simulate {
        #[arg(long, value_enum, default_value = "normal")]
        scenario: Scenario,

        /// Number of scenario units (pairs, orphans or duplicated pairs).
        #[arg(long, default_value_t = 50)]
        count: usize,

        #[arg(long)]
        legacy_dir: PathBuf,

        #[arg(long)]
        modern_dir: PathBuf,
    },
}

mod version {
    pub const RELEASE: &str = env!("CARGO_PKG_VERSION");

    /// Git commit hash (set at build time via env, or "unknown").
    pub fn git_commit() -> &'static str {
        option_env!("GIT_COMMIT").unwrap_or("unknown")
    }

    pub fn full() -> String {
        format!(
            "{} (commit: {}, {}/{})",
            RELEASE,
            git_commit(),
            std::env::consts::OS,
            std::env::consts::ARCH,
        )
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Some(Command::Version) = &cli.command {
        println!("mqrecon {}", version::full());
        return Ok(());
    }

    let cfg = match &cli.config {
        Some(path) => Some(
            Config::load(path)
                .with_context(|| format!("loading config from {}", path.display()))?,
        ),
        None => None,
    };

    let level = cli
        .log_level
        .clone()
        .or_else(|| cfg.as_ref().map(|c| c.log_level.clone()))
        .unwrap_or_else(|| "info".to_string());
    let filter =
        EnvFilter::try_new(&level).with_context(|| format!("invalid log level: {level}"))?;

    fmt().with_env_filter(filter).with_target(true).init();

    if let Some(Command::Simulate {
        scenario,
        count,
        legacy_dir,
        modern_dir,
    }) = cli.command
    {
        let summary = Simulator::new(&legacy_dir, &modern_dir)?.run(scenario, count)?;
        println!(
            "wrote {} legacy and {} modern messages in {:?} ({:.2} msg/s)",
            summary.legacy_written,
            summary.modern_written,
            summary.elapsed,
            summary.throughput(),
        );
        return Ok(());
    }

    let cfg = cfg.context("--config is required (use --help for usage)")?;

    tracing::info!(
        version = version::RELEASE,
        commit = version::git_commit(),
        "starting mqrecon",
    );

    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("building tokio runtime")?;

    rt.block_on(async { run(cfg).await })
}

async fn run(cfg: Config) -> Result<()> {
    let engine = Engine::from_config(&cfg)?;
    engine.start().await?;

    shutdown_signal().await?;

    engine.stop().await;

    let c = engine.current_counters();
    tracing::info!(
        matched = c.matched,
        mismatched = c.mismatched,
        orphaned_legacy = c.orphaned_legacy,
        orphaned_modern = c.orphaned_modern,
        duplicates = c.duplicates,
        success_rate = format_args!("{:.2}%", c.success_rate()),
        "mqrecon stopped",
    );

    Ok(())
}

async fn shutdown_signal() -> Result<()> {
    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
        .context("registering SIGTERM handler")?;

    tokio::select! {
        r = tokio::signal::ctrl_c() => {
            r.context("listening for SIGINT")?;
            tracing::info!("received SIGINT, shutting down");
        }
        _ = sigterm.recv() => {
            tracing::info!("received SIGTERM, shutting down");
        }
    }

    Ok(())
}
