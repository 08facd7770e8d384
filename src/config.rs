//! Configuration System
//!
//! Handles loading configuration from files and environment variables.
//! Supports TOML config files and environment variable overrides.

use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::supervisor::WorkerSpec;

/// Main configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub ingest: IngestConfig,

    #[serde(default)]
    pub broadcast: BroadcastConfig,

    #[serde(default)]
    pub supervisor: SupervisorConfig,

    /// Workers to launch at startup: label → argv-style command.
    /// Launch order is the label order (lexicographic).
    #[serde(default)]
    pub workers: BTreeMap<String, Vec<String>>,

    #[serde(default)]
    pub dashboard: DashboardConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Ingestion (worker-facing TCP) endpoint configuration
#[derive(Debug, Clone, Deserialize)]
pub struct IngestConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_ingest_port")]
    pub port: u16,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_ingest_port() -> u16 {
    9000
}

impl IngestConfig {
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_ingest_port(),
        }
    }
}

/// Broadcast (dashboard-facing WebSocket) endpoint configuration
#[derive(Debug, Clone, Deserialize)]
pub struct BroadcastConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_broadcast_port")]
    pub port: u16,

    /// Outbound queue capacity per subscriber; a viewer that falls this
    /// far behind is disconnected.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

fn default_broadcast_port() -> u16 {
    9001
}

fn default_queue_capacity() -> usize {
    256
}

impl BroadcastConfig {
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_broadcast_port(),
            queue_capacity: default_queue_capacity(),
        }
    }
}

/// Worker process supervision configuration
#[derive(Debug, Clone, Deserialize)]
pub struct SupervisorConfig {
    /// How long terminated workers get to exit on their own before
    /// being killed.
    #[serde(default = "default_grace_period")]
    pub grace_period_ms: u64,

    /// Abort startup (and tear down already-launched workers) if any
    /// worker fails to launch.
    #[serde(default)]
    pub abort_on_failure: bool,
}

fn default_grace_period() -> u64 {
    1000
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            grace_period_ms: default_grace_period(),
            abort_on_failure: false,
        }
    }
}

/// Dashboard viewer configuration
#[derive(Debug, Clone, Deserialize)]
pub struct DashboardConfig {
    /// Page to open in the default browser at startup.
    #[serde(default = "default_dashboard_path")]
    pub path: PathBuf,

    #[serde(default = "default_open_on_start")]
    pub open_on_start: bool,
}

fn default_dashboard_path() -> PathBuf {
    PathBuf::from("dashboard/index.html")
}

fn default_open_on_start() -> bool {
    true
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self {
            path: default_dashboard_path(),
            open_on_start: default_open_on_start(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl Config {
    /// Load configuration from a file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;

        let config: Config = toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;

        Ok(config)
    }

    /// Load configuration from environment variables only
    pub fn from_env() -> Self {
        let mut config = Config::default();
        config.apply_env_overrides();
        config
    }

    /// Load configuration with environment variable overrides
    pub fn load_with_env(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::load(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Load from default locations or environment
    pub fn load_default() -> Self {
        let config_paths = [
            dirs::config_dir().map(|p| p.join("pulseboard").join("config.toml")),
            Some(PathBuf::from("/etc/pulseboard/config.toml")),
            Some(PathBuf::from("./config.toml")),
        ];

        for path in config_paths.iter().flatten() {
            if path.exists() {
                match Self::load_with_env(path) {
                    Ok(config) => {
                        tracing::info!("Loaded config from {:?}", path);
                        return config;
                    }
                    Err(e) => {
                        tracing::warn!("Failed to load config from {:?}: {}", path, e);
                    }
                }
            }
        }

        tracing::info!("Using default config with environment overrides");
        Self::from_env()
    }

    /// The configured workers in launch order.
    pub fn worker_specs(&self) -> Vec<WorkerSpec> {
        self.workers
            .iter()
            .map(|(label, command)| WorkerSpec::new(label.clone(), command.clone()))
            .collect()
    }

    /// Apply environment variable overrides to an existing config
    fn apply_env_overrides(&mut self) {
        if let Ok(host) = std::env::var("PULSEBOARD_INGEST_HOST") {
            self.ingest.host = host;
        }
        if let Ok(port) = std::env::var("PULSEBOARD_INGEST_PORT") {
            if let Ok(p) = port.parse() {
                self.ingest.port = p;
            }
        }

        if let Ok(host) = std::env::var("PULSEBOARD_BROADCAST_HOST") {
            self.broadcast.host = host;
        }
        if let Ok(port) = std::env::var("PULSEBOARD_BROADCAST_PORT") {
            if let Ok(p) = port.parse() {
                self.broadcast.port = p;
            }
        }

        if let Ok(grace) = std::env::var("PULSEBOARD_GRACE_PERIOD_MS") {
            if let Ok(g) = grace.parse() {
                self.supervisor.grace_period_ms = g;
            }
        }

        if let Ok(level) = std::env::var("PULSEBOARD_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Ok(format) = std::env::var("PULSEBOARD_LOG_FORMAT") {
            self.logging.format = format;
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            ingest: IngestConfig::default(),
            broadcast: BroadcastConfig::default(),
            supervisor: SupervisorConfig::default(),
            workers: BTreeMap::new(),
            dashboard: DashboardConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path:?}: {error}")]
    Io { path: PathBuf, error: String },

    #[error("Failed to parse config file {path:?}: {error}")]
    Parse { path: PathBuf, error: String },
}

/// Generate a default config file content
pub fn generate_default_config() -> String {
    r#"# Pulseboard Configuration
#
# Environment variables override these settings:
# - PULSEBOARD_INGEST_HOST / PULSEBOARD_INGEST_PORT
# - PULSEBOARD_BROADCAST_HOST / PULSEBOARD_BROADCAST_PORT
# - PULSEBOARD_GRACE_PERIOD_MS
# - PULSEBOARD_LOG_LEVEL / PULSEBOARD_LOG_FORMAT

[ingest]
# Worker-facing TCP endpoint (newline-delimited JSON telemetry)
host = "127.0.0.1"
port = 9000

[broadcast]
# Dashboard-facing WebSocket endpoint
host = "127.0.0.1"
port = 9001

# Outbound queue capacity per subscriber
queue_capacity = 256

[supervisor]
# Grace period between the terminate signal and the forced kill (ms)
grace_period_ms = 1000

# Abort startup if any worker fails to launch
abort_on_failure = false

[dashboard]
# Page to open in the default browser at startup
path = "dashboard/index.html"
open_on_start = true

# Workers to launch at startup: label = argv array.
# Launch order follows label order.
#
# [workers]
# Java = ["java", "-jar", "java_benchmark/target/java-benchmark-runner.jar"]
# Python = ["python3", "python_benchmark/benchmark.py"]
# Ruby = ["ruby", "ruby_benchmark/benchmark.rb"]
# Rust = ["rust_benchmark/target/release/rust_benchmark_worker"]

[logging]
# Log level: trace, debug, info, warn, error
level = "info"

# Log format: pretty (for development) or json (for production)
format = "pretty"
"#
    .to_string()
}
