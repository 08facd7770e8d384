//! Lifecycle Controller
//!
//! Owns startup order, the shutdown signal, and teardown order for the
//! whole orchestrator. Startup: bind ingestion → bind broadcast →
//! launch workers → best-effort dashboard open → wait for an interrupt.
//! Shutdown: terminate workers → close the subscriber side → close
//! ingestion. Shutdown is idempotent.
//!
//! Every other component is owned (directly or via `Arc`) by the
//! [`Orchestrator`]; nothing outlives it.

use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::broadcast::BroadcastServer;
use crate::config::Config;
use crate::hub::{BroadcastHub, HubConfig};
use crate::ingest::IngestServer;
use crate::supervisor::{ProcessSupervisor, SupervisorError};

#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// A listening endpoint could not be bound. Fatal: startup aborts
    /// before any worker is launched.
    #[error("failed to bind {endpoint} endpoint on {addr}: {source}")]
    Bind {
        endpoint: &'static str,
        addr: String,
        #[source]
        source: io::Error,
    },

    /// Worker launch failed in abort-on-failure mode.
    #[error(transparent)]
    Supervisor(#[from] SupervisorError),
}

struct ServerTasks {
    ingest: JoinHandle<()>,
    broadcast: JoinHandle<()>,
}

/// The running orchestrator: both servers, the hub, and the supervisor.
pub struct Orchestrator {
    hub: Arc<BroadcastHub>,
    supervisor: Arc<ProcessSupervisor>,
    ingest_addr: SocketAddr,
    broadcast_addr: SocketAddr,
    ingest_token: CancellationToken,
    broadcast_token: CancellationToken,
    tasks: Mutex<Option<ServerTasks>>,
    shutdown_started: AtomicBool,
}

impl Orchestrator {
    /// Bring the whole system up.
    ///
    /// Binds both servers (either failure is fatal and happens before
    /// anything is launched), starts their accept loops, launches the
    /// configured workers, and opens the dashboard if asked to.
    pub async fn start(config: &Config) -> Result<Self, OrchestratorError> {
        let hub = Arc::new(BroadcastHub::new(HubConfig {
            queue_capacity: config.broadcast.queue_capacity,
        }));

        let ingest = IngestServer::bind(&config.ingest.addr(), Arc::clone(&hub))
            .await
            .map_err(|source| OrchestratorError::Bind {
                endpoint: "ingestion",
                addr: config.ingest.addr(),
                source,
            })?;
        let broadcast = BroadcastServer::bind(&config.broadcast.addr(), Arc::clone(&hub))
            .await
            .map_err(|source| OrchestratorError::Bind {
                endpoint: "broadcast",
                addr: config.broadcast.addr(),
                source,
            })?;

        let ingest_addr = ingest.local_addr().map_err(|source| OrchestratorError::Bind {
            endpoint: "ingestion",
            addr: config.ingest.addr(),
            source,
        })?;
        let broadcast_addr = broadcast
            .local_addr()
            .map_err(|source| OrchestratorError::Bind {
                endpoint: "broadcast",
                addr: config.broadcast.addr(),
                source,
            })?;

        let ingest_token = CancellationToken::new();
        let broadcast_token = CancellationToken::new();

        let ingest_task = tokio::spawn(ingest.run(ingest_token.clone()));
        let broadcast_run_token = broadcast_token.clone();
        let broadcast_task = tokio::spawn(async move {
            if let Err(e) = broadcast.run(broadcast_run_token).await {
                tracing::error!(error = %e, "broadcast server error");
            }
        });

        let supervisor = Arc::new(ProcessSupervisor::new(
            Arc::clone(&hub),
            Duration::from_millis(config.supervisor.grace_period_ms),
        ));

        let specs = config.worker_specs();
        if !specs.is_empty() {
            if let Err(e) = supervisor
                .launch_all(&specs, config.supervisor.abort_on_failure)
                .await
            {
                ingest_token.cancel();
                broadcast_token.cancel();
                return Err(e.into());
            }
        }

        if config.dashboard.open_on_start {
            open_dashboard(&config.dashboard.path.display().to_string());
        }

        tracing::info!(
            ingest = %ingest_addr,
            broadcast = %broadcast_addr,
            workers = specs.len(),
            "orchestrator started"
        );

        Ok(Self {
            hub,
            supervisor,
            ingest_addr,
            broadcast_addr,
            ingest_token,
            broadcast_token,
            tasks: Mutex::new(Some(ServerTasks {
                ingest: ingest_task,
                broadcast: broadcast_task,
            })),
            shutdown_started: AtomicBool::new(false),
        })
    }

    /// Block until an interrupt arrives, then run the shutdown
    /// sequence.
    pub async fn run_until_shutdown(&self) {
        shutdown_signal().await;
        self.shutdown().await;
    }

    /// Tear everything down: workers first, then the subscriber side,
    /// then ingestion. Calling this more than once is a no-op.
    pub async fn shutdown(&self) {
        if self.shutdown_started.swap(true, Ordering::SeqCst) {
            return;
        }
        tracing::info!("shutting down");

        self.supervisor.terminate_all().await;

        let tasks = self.tasks.lock().await.take();

        // Subscriber side next: drop the queues so sessions flush what
        // they hold and close, then stop the server and wait for it.
        self.hub.close().await;
        self.broadcast_token.cancel();
        if let Some(ServerTasks { ingest, broadcast }) = tasks {
            if let Err(e) = broadcast.await {
                tracing::warn!(error = %e, "broadcast server task failed");
            }
            self.ingest_token.cancel();
            if let Err(e) = ingest.await {
                tracing::warn!(error = %e, "ingestion server task failed");
            }
        } else {
            self.ingest_token.cancel();
        }

        tracing::info!("shutdown complete");
    }

    /// Actual ingestion endpoint address.
    pub fn ingest_addr(&self) -> SocketAddr {
        self.ingest_addr
    }

    /// Actual broadcast endpoint address.
    pub fn broadcast_addr(&self) -> SocketAddr {
        self.broadcast_addr
    }

    /// Number of currently connected dashboard viewers.
    pub async fn subscriber_count(&self) -> usize {
        self.hub.subscriber_count().await
    }

    /// The worker process supervisor.
    pub fn supervisor(&self) -> &Arc<ProcessSupervisor> {
        &self.supervisor
    }
}

/// Wait for shutdown signal
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received, starting graceful shutdown");
}

/// Best-effort launch of the dashboard in the default browser. Failure
/// is logged and never fatal.
fn open_dashboard(location: &str) {
    let mut command = opener_command(location);
    match command.spawn() {
        Ok(_) => tracing::info!(location = %location, "opening dashboard"),
        Err(e) => tracing::warn!(
            location = %location,
            error = %e,
            "could not open dashboard, open it manually"
        ),
    }
}

#[cfg(target_os = "macos")]
fn opener_command(location: &str) -> tokio::process::Command {
    let mut command = tokio::process::Command::new("open");
    command.arg(location);
    command
}

#[cfg(target_os = "windows")]
fn opener_command(location: &str) -> tokio::process::Command {
    let mut command = tokio::process::Command::new("cmd");
    command.args(["/C", "start", "", location]);
    command
}

#[cfg(not(any(target_os = "macos", target_os = "windows")))]
fn opener_command(location: &str) -> tokio::process::Command {
    let mut command = tokio::process::Command::new("xdg-open");
    command.arg(location);
    command
}
