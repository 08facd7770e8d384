//! Broadcast Hub
//!
//! Central fan-out point between the ingestion side and all connected
//! dashboard viewers. Owns the live subscriber set; nothing else in the
//! crate touches it except through the hub's own operations.
//!
//! Each subscriber gets its own bounded queue, drained by that
//! subscriber's connection task. `publish` only enqueues, so a slow or
//! dead viewer never delays delivery to the others; a viewer whose
//! queue overflows is dropped. No history is kept — a subscriber that
//! joins after a message was published never receives it.

use std::collections::HashMap;

use tokio::sync::{mpsc, RwLock};
use uuid::Uuid;

use crate::message::{BroadcastMessage, StatusLevel, StatusMessage};

/// Unique identifier for a subscriber session.
pub type SubscriberId = String;

/// Hub tuning knobs.
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Capacity of each subscriber's outbound queue. A subscriber that
    /// falls this far behind is disconnected.
    pub queue_capacity: usize,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self { queue_capacity: 256 }
    }
}

/// Send half of one subscriber's outbound queue.
struct SubscriberHandle {
    sender: mpsc::Sender<String>,
}

/// The subscriber set plus the closed flag, guarded together so a
/// registration racing a shutdown cannot slip into a cleared set.
struct SubscriberTable {
    entries: HashMap<SubscriberId, SubscriberHandle>,
    closed: bool,
}

/// Fan-out hub mediating between ingestion and subscribers.
pub struct BroadcastHub {
    subscribers: RwLock<SubscriberTable>,
    config: HubConfig,
}

impl BroadcastHub {
    pub fn new(config: HubConfig) -> Self {
        Self {
            subscribers: RwLock::new(SubscriberTable {
                entries: HashMap::new(),
                closed: false,
            }),
            config,
        }
    }

    /// Register a new subscriber.
    ///
    /// Returns the subscriber id and the receive half of its queue; the
    /// caller is responsible for draining the receiver into the actual
    /// connection and for calling [`unregister`](Self::unregister) when
    /// the session ends. After [`close`](Self::close) the returned
    /// queue is already closed, so the session ends immediately.
    pub async fn register(&self) -> (SubscriberId, mpsc::Receiver<String>) {
        let (sender, receiver) = mpsc::channel(self.config.queue_capacity);
        let id = Uuid::new_v4().to_string();

        let mut table = self.subscribers.write().await;
        if table.closed {
            tracing::debug!(subscriber_id = %id, "refusing subscriber, hub closed");
            return (id, receiver);
        }
        table.entries.insert(id.clone(), SubscriberHandle { sender });

        tracing::info!(subscriber_id = %id, "subscriber registered");
        (id, receiver)
    }

    /// Remove a subscriber and drop its queue.
    pub async fn unregister(&self, id: &str) {
        if self.subscribers.write().await.entries.remove(id).is_some() {
            tracing::info!(subscriber_id = %id, "subscriber unregistered");
        }
    }

    /// Deliver one message to every currently registered subscriber.
    ///
    /// Each delivery is an independent enqueue; a full or closed queue
    /// drops that subscriber without affecting the rest. The set lock
    /// is held only while enqueueing, never across socket writes.
    pub async fn publish(&self, message: &BroadcastMessage) {
        match serde_json::to_string(message) {
            Ok(payload) => self.publish_payload(payload).await,
            Err(e) => tracing::error!(error = %e, "failed to serialize broadcast message"),
        }
    }

    /// Broadcast an orchestrator status notice to all subscribers.
    pub async fn publish_status(&self, level: StatusLevel, message: impl Into<String>) {
        self.publish(&BroadcastMessage::Status(StatusMessage::new(level, message)))
            .await;
    }

    async fn publish_payload(&self, payload: String) {
        let mut stale = Vec::new();
        {
            let table = self.subscribers.read().await;
            for (id, handle) in table.entries.iter() {
                match handle.sender.try_send(payload.clone()) {
                    Ok(()) => {}
                    Err(mpsc::error::TrySendError::Full(_)) => {
                        tracing::warn!(
                            subscriber_id = %id,
                            "subscriber queue full, disconnecting slow subscriber"
                        );
                        stale.push(id.clone());
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => {
                        stale.push(id.clone());
                    }
                }
            }
        }

        for id in &stale {
            self.unregister(id).await;
        }
    }

    /// Number of currently registered subscribers.
    pub async fn subscriber_count(&self) -> usize {
        self.subscribers.read().await.entries.len()
    }

    /// Close the hub: drop every subscriber queue and refuse further
    /// registrations. Forwarding tasks observe the closed channel,
    /// flush what they already hold, and end their sessions. Used at
    /// shutdown.
    pub async fn close(&self) {
        let mut table = self.subscribers.write().await;
        table.closed = true;
        if !table.entries.is_empty() {
            tracing::info!(count = table.entries.len(), "dropping all subscribers");
        }
        table.entries.clear();
    }
}

impl Default for BroadcastHub {
    fn default() -> Self {
        Self::new(HubConfig::default())
    }
}
