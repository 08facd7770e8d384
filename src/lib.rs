//! # Pulseboard
//!
//! Benchmark telemetry orchestrator. Supervises a set of polyglot
//! benchmark worker processes, ingests the telemetry they stream over
//! persistent TCP connections, and relays every message in real time
//! to any number of live dashboard viewers over WebSocket.
//!
//! ## Architecture
//!
//! - [`ingest`]: TCP server parsing newline-delimited JSON telemetry
//! - [`hub`]: fan-out point holding the live subscriber set
//! - [`broadcast`]: WebSocket server for dashboard viewers
//! - [`supervisor`]: worker process lifecycle (spawn, graceful-then-
//!   forced termination)
//! - [`orchestrator`]: startup/shutdown sequencing and the shutdown
//!   signal
//! - [`message`]: the wire-level data model
//! - [`config`]: TOML configuration with environment overrides
//!
//! Data flows worker → ingest → hub → broadcast → viewer. Messages from
//! one worker connection reach every viewer in send order; there is no
//! ordering across connections, and no history for late joiners.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use pulseboard::{Config, Orchestrator};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::load_default();
//!
//!     let orchestrator = Orchestrator::start(&config).await?;
//!     orchestrator.run_until_shutdown().await;
//!
//!     Ok(())
//! }
//! ```

pub mod broadcast;
pub mod config;
pub mod hub;
pub mod ingest;
pub mod message;
pub mod orchestrator;
pub mod supervisor;

// Re-export top-level types for convenience
pub use broadcast::{build_router, BroadcastServer};
pub use config::{Config, ConfigError, LoggingConfig};
pub use hub::{BroadcastHub, HubConfig, SubscriberId};
pub use ingest::IngestServer;
pub use message::{
    BroadcastMessage, StatusLevel, StatusMessage, TelemetryMessage, TelemetryRecord,
};
pub use orchestrator::{Orchestrator, OrchestratorError};
pub use supervisor::{
    ProcessSupervisor, SupervisorError, WorkerInfo, WorkerSpec, WorkerState,
};
