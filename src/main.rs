//! Pulseboard orchestrator binary.
//!
//! Run with: cargo run
//!
//! # Configuration
//!
//! Loaded from `--config`, or from the default locations
//! (`~/.config/pulseboard/config.toml`, `/etc/pulseboard/config.toml`,
//! `./config.toml`). Environment variables override file settings:
//! - `PULSEBOARD_INGEST_HOST` / `PULSEBOARD_INGEST_PORT`
//! - `PULSEBOARD_BROADCAST_HOST` / `PULSEBOARD_BROADCAST_PORT`
//! - `PULSEBOARD_GRACE_PERIOD_MS`
//! - `PULSEBOARD_LOG_LEVEL` / `PULSEBOARD_LOG_FORMAT`
//! - `RUST_LOG`: full filter override

use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use pulseboard::config::{generate_default_config, Config};
use pulseboard::orchestrator::Orchestrator;

#[derive(Parser)]
#[command(name = "pulseboard")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Collects benchmark telemetry from worker processes and streams it to live dashboards")]
struct Cli {
    /// Path to a TOML config file (default: standard locations)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Do not open the dashboard on startup
    #[arg(long)]
    no_dashboard: bool,

    /// Abort startup if any worker fails to launch
    #[arg(long)]
    abort_on_failure: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a default config file and exit
    InitConfig {
        /// Where to write it
        #[arg(default_value = "config.toml")]
        path: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if let Some(Commands::InitConfig { path }) = cli.command {
        std::fs::write(&path, generate_default_config())
            .with_context(|| format!("failed to write {}", path.display()))?;
        println!("Wrote default config to {}", path.display());
        return Ok(());
    }

    let mut config = match &cli.config {
        Some(path) => Config::load_with_env(path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => Config::load_default(),
    };
    if cli.no_dashboard {
        config.dashboard.open_on_start = false;
    }
    if cli.abort_on_failure {
        config.supervisor.abort_on_failure = true;
    }

    init_tracing(&config);

    tracing::info!("Pulseboard orchestrator v{}", env!("CARGO_PKG_VERSION"));

    let orchestrator = Orchestrator::start(&config)
        .await
        .context("orchestrator startup failed")?;
    orchestrator.run_until_shutdown().await;

    tracing::info!("Pulseboard has shut down");
    Ok(())
}

/// Initialize tracing from config, with `RUST_LOG` taking precedence.
fn init_tracing(config: &Config) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        tracing_subscriber::EnvFilter::new(format!("pulseboard={}", config.logging.level))
    });

    let registry = tracing_subscriber::registry().with(filter);
    if config.logging.format == "json" {
        registry
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}
