//! Process Supervisor
//!
//! Launches the configured worker processes and owns their handles for
//! the lifetime of the orchestrator. Termination is graceful-then-
//! forced: every live worker gets a terminate signal, the supervisor
//! waits out a bounded grace period, and whatever is still running is
//! killed. Per-process failures never stop the protocol for the rest.

use std::io;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use thiserror::Error;
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tokio::time::timeout;

use crate::hub::BroadcastHub;
use crate::message::StatusLevel;

/// One worker to launch: a human-readable label and an argv-style
/// command (program followed by its arguments).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerSpec {
    pub label: String,
    pub command: Vec<String>,
}

impl WorkerSpec {
    pub fn new(label: impl Into<String>, command: Vec<String>) -> Self {
        Self {
            label: label.into(),
            command,
        }
    }
}

/// Lifecycle of one tracked worker process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Starting,
    Running,
    Terminating,
    Exited,
}

/// Observable view of one tracked worker.
#[derive(Debug, Clone)]
pub struct WorkerInfo {
    pub label: String,
    pub command: Vec<String>,
    pub pid: Option<u32>,
    pub state: WorkerState,
}

/// A launched worker and its OS process handle. At most one live handle
/// exists per entry; `terminate_all` takes it, so repeat calls find
/// nothing to do.
struct WorkerProcess {
    label: String,
    command: Vec<String>,
    pid: Option<u32>,
    state: WorkerState,
    child: Option<Child>,
}

#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("worker {0} has an empty command")]
    EmptyCommand(String),

    #[error("worker {label} failed to start: {source}")]
    Launch {
        label: String,
        #[source]
        source: io::Error,
    },

    #[error("launch aborted: {label} worker failed to start")]
    Aborted { label: String },
}

/// Owns the worker-process table; all access goes through its methods.
pub struct ProcessSupervisor {
    workers: Mutex<Vec<WorkerProcess>>,
    hub: Arc<BroadcastHub>,
    grace_period: Duration,
}

impl ProcessSupervisor {
    pub fn new(hub: Arc<BroadcastHub>, grace_period: Duration) -> Self {
        Self {
            workers: Mutex::new(Vec::new()),
            hub,
            grace_period,
        }
    }

    /// Launch one worker and track its handle.
    pub async fn launch(&self, spec: &WorkerSpec) -> Result<(), SupervisorError> {
        let (program, args) = spec
            .command
            .split_first()
            .ok_or_else(|| SupervisorError::EmptyCommand(spec.label.clone()))?;

        let mut entry = WorkerProcess {
            label: spec.label.clone(),
            command: spec.command.clone(),
            pid: None,
            state: WorkerState::Starting,
            child: None,
        };

        let mut command = Command::new(program);
        command.args(args).kill_on_drop(true);

        match command.spawn() {
            Ok(child) => {
                entry.pid = child.id();
                entry.state = WorkerState::Running;
                entry.child = Some(child);
                tracing::info!(label = %spec.label, pid = ?entry.pid, "launched worker");
                self.workers.lock().await.push(entry);
                Ok(())
            }
            Err(source) => Err(SupervisorError::Launch {
                label: spec.label.clone(),
                source,
            }),
        }
    }

    /// Launch every worker in order.
    ///
    /// A failure is logged and broadcast as an error status; remaining
    /// launches still proceed unless `abort_on_failure` is set, in
    /// which case everything launched so far is terminated and the
    /// whole operation fails. Returns the number of workers launched.
    pub async fn launch_all(
        &self,
        specs: &[WorkerSpec],
        abort_on_failure: bool,
    ) -> Result<usize, SupervisorError> {
        let mut launched = 0;
        for spec in specs {
            match self.launch(spec).await {
                Ok(()) => launched += 1,
                Err(e) => {
                    tracing::error!(label = %spec.label, error = %e, "worker launch failed");
                    let detail = match &e {
                        SupervisorError::Launch { source, .. } => source.to_string(),
                        other => other.to_string(),
                    };
                    self.hub
                        .publish_status(
                            StatusLevel::Error,
                            format!("Failed to launch {} worker: {}", spec.label, detail),
                        )
                        .await;
                    if abort_on_failure {
                        self.terminate_all().await;
                        return Err(SupervisorError::Aborted {
                            label: spec.label.clone(),
                        });
                    }
                }
            }
        }
        Ok(launched)
    }

    /// Terminate every tracked process: graceful signal to all, one
    /// shared grace period, forced kill for stragglers, then reap.
    ///
    /// Failures are isolated per process and the protocol always runs
    /// to completion for all of them. Safe to call more than once; a
    /// second call finds no live handles and does nothing.
    pub async fn terminate_all(&self) {
        let mut pending = Vec::new();
        {
            let mut workers = self.workers.lock().await;
            for worker in workers.iter_mut() {
                let Some(mut child) = worker.child.take() else {
                    continue;
                };
                worker.state = WorkerState::Terminating;
                tracing::info!(label = %worker.label, pid = ?worker.pid, "terminating worker");
                if let Err(e) = send_terminate(&mut child) {
                    tracing::warn!(label = %worker.label, error = %e, "graceful terminate failed");
                }
                pending.push((worker.label.clone(), child));
            }
        }

        if pending.is_empty() {
            return;
        }

        let grace = self.grace_period;
        let waits = pending.into_iter().map(|(label, mut child)| async move {
            match timeout(grace, child.wait()).await {
                Ok(Ok(status)) => {
                    tracing::info!(label = %label, status = %status, "worker exited");
                }
                Ok(Err(e)) => {
                    tracing::warn!(label = %label, error = %e, "failed waiting for worker");
                }
                Err(_) => {
                    tracing::warn!(label = %label, "worker still alive after grace period, killing");
                    if let Err(e) = child.kill().await {
                        tracing::warn!(label = %label, error = %e, "failed to kill worker");
                    }
                }
            }
        });
        join_all(waits).await;

        let mut workers = self.workers.lock().await;
        for worker in workers.iter_mut() {
            if worker.state == WorkerState::Terminating {
                worker.state = WorkerState::Exited;
            }
        }
        tracing::info!("all workers terminated");
    }

    /// Snapshot of every tracked worker.
    pub async fn snapshot(&self) -> Vec<WorkerInfo> {
        self.workers
            .lock()
            .await
            .iter()
            .map(|worker| WorkerInfo {
                label: worker.label.clone(),
                command: worker.command.clone(),
                pid: worker.pid,
                state: worker.state,
            })
            .collect()
    }

    /// Number of tracked workers.
    pub async fn worker_count(&self) -> usize {
        self.workers.lock().await.len()
    }
}

/// Ask a child to exit on its own terms. On unix this is SIGTERM; the
/// forced kill only comes after the grace period.
#[cfg(unix)]
fn send_terminate(child: &mut Child) -> io::Result<()> {
    let Some(pid) = child.id() else {
        // Already exited and reaped.
        return Ok(());
    };
    let rc = unsafe { libc::kill(pid as libc::pid_t, libc::SIGTERM) };
    if rc == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

/// Windows has no SIGTERM equivalent; go straight to the forced kill.
#[cfg(not(unix))]
fn send_terminate(child: &mut Child) -> io::Result<()> {
    child.start_kill()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;
    use tokio::time::sleep;

    fn supervisor(grace: Duration) -> (ProcessSupervisor, Arc<BroadcastHub>) {
        let hub = Arc::new(BroadcastHub::default());
        (ProcessSupervisor::new(Arc::clone(&hub), grace), hub)
    }

    fn sleeper(label: &str) -> WorkerSpec {
        WorkerSpec::new(label, vec!["sleep".to_string(), "60".to_string()])
    }

    #[tokio::test]
    async fn test_empty_command_is_rejected() {
        let (supervisor, _hub) = supervisor(Duration::from_secs(1));
        let result = supervisor.launch(&WorkerSpec::new("Ghost", vec![])).await;
        assert!(matches!(result, Err(SupervisorError::EmptyCommand(_))));
        assert_eq!(supervisor.worker_count().await, 0);
    }

    #[tokio::test]
    async fn test_launch_and_graceful_terminate() {
        let (supervisor, _hub) = supervisor(Duration::from_secs(5));

        supervisor.launch(&sleeper("Sleepy")).await.unwrap();
        let snapshot = supervisor.snapshot().await;
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].label, "Sleepy");
        assert_eq!(snapshot[0].command[0], "sleep");
        assert_eq!(snapshot[0].state, WorkerState::Running);
        assert!(snapshot[0].pid.is_some());

        // The sleep command dies on SIGTERM, so this returns well
        // inside the grace period.
        let start = Instant::now();
        supervisor.terminate_all().await;
        assert!(start.elapsed() < Duration::from_secs(3));

        let snapshot = supervisor.snapshot().await;
        assert_eq!(snapshot[0].state, WorkerState::Exited);
    }

    #[tokio::test]
    async fn test_force_kill_after_grace_period() {
        let (supervisor, _hub) = supervisor(Duration::from_millis(300));

        let stubborn = WorkerSpec::new(
            "Stubborn",
            vec![
                "sh".to_string(),
                "-c".to_string(),
                "trap '' TERM; while :; do sleep 0.2; done".to_string(),
            ],
        );
        supervisor.launch(&stubborn).await.unwrap();
        // Give the shell a moment to install its trap.
        sleep(Duration::from_millis(200)).await;

        let start = Instant::now();
        supervisor.terminate_all().await;
        let elapsed = start.elapsed();

        assert!(elapsed >= Duration::from_millis(300));
        assert!(elapsed < Duration::from_secs(5));
        assert_eq!(supervisor.snapshot().await[0].state, WorkerState::Exited);
    }

    #[tokio::test]
    async fn test_launch_failure_publishes_status_and_continues() {
        let (supervisor, hub) = supervisor(Duration::from_secs(5));
        let (_id, mut rx) = hub.register().await;

        let specs = vec![
            WorkerSpec::new("Broken", vec!["/no/such/binary-pulseboard".to_string()]),
            sleeper("Sleepy"),
        ];
        let launched = supervisor.launch_all(&specs, false).await.unwrap();
        assert_eq!(launched, 1);

        let payload = rx.try_recv().unwrap();
        assert!(payload.contains("\"type\":\"status\""));
        assert!(payload.contains("\"level\":\"error\""));
        assert!(payload.contains("Failed to launch Broken worker"));

        // Only the successful launch is tracked.
        let snapshot = supervisor.snapshot().await;
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].label, "Sleepy");

        supervisor.terminate_all().await;
    }

    #[tokio::test]
    async fn test_abort_on_failure_rolls_back() {
        let (supervisor, _hub) = supervisor(Duration::from_secs(5));

        let specs = vec![
            sleeper("First"),
            WorkerSpec::new("Broken", vec!["/no/such/binary-pulseboard".to_string()]),
            sleeper("Never"),
        ];
        let result = supervisor.launch_all(&specs, true).await;
        assert!(matches!(
            result,
            Err(SupervisorError::Aborted { ref label }) if label == "Broken"
        ));

        // The worker launched before the failure was torn down, and the
        // one after it was never attempted.
        let snapshot = supervisor.snapshot().await;
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].label, "First");
        assert_eq!(snapshot[0].state, WorkerState::Exited);
    }

    #[tokio::test]
    async fn test_terminate_all_is_idempotent() {
        let (supervisor, _hub) = supervisor(Duration::from_secs(5));
        supervisor.launch(&sleeper("Sleepy")).await.unwrap();

        supervisor.terminate_all().await;
        assert_eq!(supervisor.snapshot().await[0].state, WorkerState::Exited);

        // No live handles left; the second call returns immediately.
        let start = Instant::now();
        supervisor.terminate_all().await;
        assert!(start.elapsed() < Duration::from_millis(100));
        assert_eq!(supervisor.snapshot().await[0].state, WorkerState::Exited);
    }
}
