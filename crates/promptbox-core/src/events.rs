//! Sync state and the typed event channel clients subscribe to.

use serde::Serialize;
use tokio::sync::broadcast;

use crate::error::RetryClass;
use crate::models::{PromptId, Resolution};

const DEFAULT_EVENT_CAPACITY: usize = 256;

/// Unified sync state shown by every client.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncState {
    Offline,
    Syncing,
    Synced,
    Error,
}

impl SyncState {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Offline => "offline",
            Self::Syncing => "syncing",
            Self::Synced => "synced",
            Self::Error => "error",
        }
    }
}

impl std::fmt::Display for SyncState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Something observable happened in the sync engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncEvent {
    StateChanged(SyncState),
    QueueChanged {
        pending: usize,
        parked: usize,
    },
    /// Oldest queue items were evicted to keep the queue bounded
    QueueOverflow {
        dropped: usize,
        dropped_total: u64,
    },
    ItemsParked {
        count: usize,
    },
    FlushCompleted {
        sent: usize,
        conflicts: usize,
        pulled: usize,
    },
    FlushFailed {
        error: String,
        retry_class: RetryClass,
    },
    ConflictDetected {
        prompt_id: PromptId,
        delta_ms: i64,
    },
    ConflictResolved {
        prompt_id: PromptId,
        resolution: Resolution,
    },
    MigrationCompleted {
        user_id: String,
        uploaded: usize,
        conflicts: usize,
    },
}

/// Fan-out channel for [`SyncEvent`]s.
///
/// Publishing never blocks and never fails; events published while nobody is
/// subscribed are dropped.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<SyncEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn publish(&self, event: SyncEvent) {
        tracing::trace!(?event, "Publishing sync event");
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> Subscription {
        Subscription {
            receiver: Some(self.sender.subscribe()),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

/// A live subscription to an [`EventBus`].
///
/// Dropping the subscription unsubscribes it; [`Subscription::unsubscribe`]
/// does the same explicitly while keeping the value around.
#[derive(Debug)]
pub struct Subscription {
    receiver: Option<broadcast::Receiver<SyncEvent>>,
}

impl Subscription {
    /// Wait for the next event. Returns `None` once unsubscribed or when the
    /// bus is gone.
    pub async fn recv(&mut self) -> Option<SyncEvent> {
        let receiver = self.receiver.as_mut()?;
        loop {
            match receiver.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!("Event subscriber lagged, skipped {skipped} events");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Next already-published event, if any.
    pub fn try_recv(&mut self) -> Option<SyncEvent> {
        let receiver = self.receiver.as_mut()?;
        loop {
            match receiver.try_recv() {
                Ok(event) => return Some(event),
                Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
                    tracing::warn!("Event subscriber lagged, skipped {skipped} events");
                }
                Err(_) => return None,
            }
        }
    }

    pub fn unsubscribe(&mut self) {
        self.receiver = None;
    }

    pub const fn is_active(&self) -> bool {
        self.receiver.is_some()
    }
}
