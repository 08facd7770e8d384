//! Ingestion Server
//!
//! Accepts persistent TCP connections from benchmark workers and parses
//! their newline-delimited JSON telemetry. Each accepted connection is
//! served on its own task, so workers never block one another.
//!
//! Parsing contract per connection:
//! - a complete, valid line becomes a [`TelemetryMessage`] stamped with
//!   the receipt time and is published to the hub exactly once;
//! - a malformed line is logged and discarded, the connection stays
//!   open;
//! - a partial line at EOF is discarded silently.
//!
//! EOF, reset, or any I/O error ends that session only. Reconnecting is
//! the worker's job; the server never retries.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;

use crate::hub::BroadcastHub;
use crate::message::{unix_timestamp, BroadcastMessage, TelemetryRecord};

/// TCP server turning worker byte streams into broadcast messages.
pub struct IngestServer {
    listener: TcpListener,
    hub: Arc<BroadcastHub>,
}

impl IngestServer {
    /// Bind the ingestion endpoint.
    ///
    /// A bind failure is returned to the caller; at startup it is fatal
    /// to the whole orchestrator.
    pub async fn bind(addr: &str, hub: Arc<BroadcastHub>) -> io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        tracing::info!(addr = %listener.local_addr()?, "ingestion server listening");
        Ok(Self { listener, hub })
    }

    /// Address actually bound (relevant when configured with port 0).
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept worker connections until the shutdown token fires.
    pub async fn run(self, shutdown: CancellationToken) {
        loop {
            tokio::select! {
                () = shutdown.cancelled() => break,
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        let hub = Arc::clone(&self.hub);
                        tokio::spawn(handle_worker(stream, peer, hub, shutdown.clone()));
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "failed to accept worker connection");
                    }
                },
            }
        }
        tracing::info!("ingestion server closed");
    }
}

/// Serve one worker connection from accept to EOF/error.
async fn handle_worker(
    stream: TcpStream,
    peer: SocketAddr,
    hub: Arc<BroadcastHub>,
    shutdown: CancellationToken,
) {
    tracing::info!(peer = %peer, "worker connected");

    let mut reader = BufReader::new(stream);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        let read = tokio::select! {
            () = shutdown.cancelled() => break,
            read = reader.read_until(b'\n', &mut buf) => read,
        };
        match read {
            Ok(0) => break,
            Ok(_) => {
                if buf.last() != Some(&b'\n') {
                    // Partial trailing line at EOF, dropped without a flush.
                    break;
                }
                process_line(&buf, peer, &hub).await;
            }
            Err(e) => {
                tracing::debug!(peer = %peer, error = %e, "worker read error");
                break;
            }
        }
    }

    tracing::info!(peer = %peer, "worker disconnected");
}

/// Parse, stamp, and publish one complete line.
async fn process_line(raw: &[u8], peer: SocketAddr, hub: &BroadcastHub) {
    let line = match std::str::from_utf8(raw) {
        Ok(line) => line.trim(),
        Err(e) => {
            tracing::warn!(peer = %peer, error = %e, "discarding non-UTF-8 telemetry line");
            return;
        }
    };
    if line.is_empty() {
        return;
    }

    match TelemetryRecord::parse(line) {
        Ok(record) => {
            let message = BroadcastMessage::Telemetry(record.stamp(unix_timestamp()));
            hub.publish(&message).await;
        }
        Err(e) => {
            // The connection stays open; only this line is lost.
            tracing::warn!(peer = %peer, error = %e, line = %line, "discarding malformed telemetry line");
        }
    }
}
