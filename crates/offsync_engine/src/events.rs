//! Event bus for sync progress notifications.

use crate::queue::QueueRunSummary;
use crate::result::{EntitySyncResult, SyncRunResult};
use crate::status::SyncState;
use tokio::sync::broadcast;
use uuid::Uuid;

/// Sync notifications.
#[derive(Debug, Clone)]
pub enum SyncEvent {
    /// A run started.
    RunStarted {
        /// Run id.
        run_id: u64,
    },

    /// An entity type started syncing.
    EntityStarted {
        /// Run id.
        run_id: u64,
        /// Entity type.
        entity_type: String,
    },

    /// An entity type finished syncing.
    EntityFinished {
        /// Run id.
        run_id: u64,
        /// Outcome for the type.
        result: EntitySyncResult,
    },

    /// Run progress changed.
    Progress {
        /// Run id.
        run_id: u64,
        /// Percentage of entity types processed.
        progress: u8,
    },

    /// A run finished.
    RunFinished {
        /// Outcome of the run.
        result: SyncRunResult,
    },

    /// The displayed state changed.
    StateChanged {
        /// Previous state.
        from: SyncState,
        /// New state.
        to: SyncState,
    },

    /// A local mutation was queued.
    MutationQueued {
        /// Queue item id.
        item_id: Uuid,
        /// Entity type.
        entity_type: String,
        /// Entity identifier.
        entity_id: String,
        /// True if it was merged into an existing item.
        coalesced: bool,
    },

    /// A queue processing pass finished.
    QueueDrained {
        /// Pass summary.
        summary: QueueRunSummary,
    },
}

/// Event bus for broadcasting sync events.
///
/// Receivers that lag or go away never affect the sender.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<SyncEvent>,
}

impl EventBus {
    /// Creates a new event bus with the given capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Emits an event.
    pub fn emit(&self, event: SyncEvent) {
        // No receivers is fine.
        let _ = self.sender.send(event);
    }

    /// Subscribes to events.
    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.sender.subscribe()
    }

    /// Returns the number of live subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
