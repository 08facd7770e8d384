//! Subscriber Server
//!
//! WebSocket endpoint for dashboard viewers, built on Axum. A viewer
//! connects to `GET /ws`, is registered with the hub immediately, and
//! from then on receives every message the hub fans out. The channel is
//! one-directional in practice: inbound frames are drained but never
//! interpreted.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
    routing::get,
    Router,
};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::hub::BroadcastHub;

/// WebSocket server handing accepted viewers to the hub.
pub struct BroadcastServer {
    listener: TcpListener,
    hub: Arc<BroadcastHub>,
}

impl BroadcastServer {
    /// Bind the broadcast endpoint.
    ///
    /// A bind failure is returned to the caller; at startup it is fatal
    /// to the whole orchestrator.
    pub async fn bind(addr: &str, hub: Arc<BroadcastHub>) -> io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        tracing::info!(addr = %listener.local_addr()?, "broadcast server listening");
        Ok(Self { listener, hub })
    }

    /// Address actually bound (relevant when configured with port 0).
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Serve viewers until the shutdown token fires, then finish
    /// outstanding sessions before returning.
    pub async fn run(self, shutdown: CancellationToken) -> io::Result<()> {
        let router = build_router(self.hub);

        axum::serve(self.listener, router)
            .with_graceful_shutdown(shutdown.cancelled_owned())
            .await?;

        tracing::info!("broadcast server closed");
        Ok(())
    }
}

/// Build the subscriber-facing router.
pub fn build_router(hub: Arc<BroadcastHub>) -> Router {
    Router::new()
        .route("/ws", get(subscriber_handler))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(hub)
}

/// WebSocket upgrade entry point for dashboard viewers.
async fn subscriber_handler(
    ws: WebSocketUpgrade,
    State(hub): State<Arc<BroadcastHub>>,
) -> Response {
    ws.on_upgrade(move |socket| handle_subscriber(socket, hub))
}

/// Serve one subscriber from upgrade to disconnect.
async fn handle_subscriber(socket: WebSocket, hub: Arc<BroadcastHub>) {
    let (mut sender, mut receiver) = socket.split();

    // Register before the first await on the socket, so nothing
    // published from here on is missed.
    let (id, mut queue) = hub.register().await;

    // Forward the hub queue into text frames. Ends when the queue
    // closes (shutdown or this subscriber was dropped) or a send fails.
    let mut send_task = tokio::spawn(async move {
        while let Some(payload) = queue.recv().await {
            if sender.send(Message::Text(payload)).await.is_err() {
                break;
            }
        }
        let _ = sender.send(Message::Close(None)).await;
    });

    // Inbound frames carry no protocol; wait for the client to go away.
    let mut recv_task = tokio::spawn(async move {
        while let Some(frame) = receiver.next().await {
            match frame {
                Ok(Message::Close(_)) | Err(_) => break,
                Ok(_) => {}
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    hub.unregister(&id).await;
}
