//! Items of the offline mutation queue.

use chrono::{DateTime, Utc};
use offsync_protocol::{merge_fields, IdempotencyKey, MutationOperation, PayloadStrategy};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Lifecycle status of a queue item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueStatus {
    /// Waiting to be pushed.
    Pending,
    /// Currently being pushed.
    Processing,
    /// Acknowledged by the remote; kept until garbage collected.
    Completed,
    /// Last push failed.
    Failed,
}

impl QueueStatus {
    /// Returns true for statuses that still carry an undelivered write.
    pub fn is_open(&self) -> bool {
        matches!(self, QueueStatus::Pending | QueueStatus::Failed)
    }

    /// Returns the lowercase name.
    pub fn as_str(&self) -> &'static str {
        match self {
            QueueStatus::Pending => "pending",
            QueueStatus::Processing => "processing",
            QueueStatus::Completed => "completed",
            QueueStatus::Failed => "failed",
        }
    }
}

/// A local write that the remote has not acknowledged yet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MutationQueueItem {
    /// Unique item id.
    pub id: Uuid,
    /// Entity type.
    pub entity_type: String,
    /// Entity identifier.
    pub entity_id: String,
    /// Operation to deliver.
    pub operation: MutationOperation,
    /// Latest intended state, in local naming.
    pub payload: Value,
    /// Lower numbers are pushed first.
    pub priority: i32,
    /// Lifecycle status.
    pub status: QueueStatus,
    /// Number of failed delivery attempts.
    pub retry_count: u32,
    /// When the item was first queued. Preserved across coalescing.
    pub created_at: DateTime<Utc>,
    /// When the item was last modified.
    pub updated_at: DateTime<Utc>,
    /// When delivery was last attempted.
    pub last_attempt_at: Option<DateTime<Utc>>,
    /// When the remote acknowledged the item.
    pub completed_at: Option<DateTime<Utc>>,
    /// Error from the last failed attempt.
    pub last_error: Option<String>,
}

impl MutationQueueItem {
    /// Creates a pending item.
    pub fn new(
        entity_type: impl Into<String>,
        entity_id: impl Into<String>,
        operation: MutationOperation,
        payload: Value,
        priority: i32,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            entity_type: entity_type.into(),
            entity_id: entity_id.into(),
            operation,
            payload,
            priority,
            status: QueueStatus::Pending,
            retry_count: 0,
            created_at: now,
            updated_at: now,
            last_attempt_at: None,
            completed_at: None,
            last_error: None,
        }
    }

    /// Folds a newer mutation for the same entity into this item.
    ///
    /// Status, retry count and queue position are preserved; the more urgent
    /// priority of the two is kept.
    pub fn absorb(
        &mut self,
        operation: MutationOperation,
        payload: Value,
        priority: i32,
        now: DateTime<Utc>,
    ) {
        let coalesced = self.operation.coalesce(operation);
        match coalesced.payload {
            PayloadStrategy::Merge => merge_fields(&mut self.payload, payload),
            PayloadStrategy::Replace => self.payload = payload,
        }
        self.operation = coalesced.operation;
        self.priority = self.priority.min(priority);
        self.updated_at = now;
    }

    /// Returns the key the remote uses to collapse redeliveries.
    pub fn idempotency_key(&self) -> IdempotencyKey {
        IdempotencyKey::new(&self.entity_type, &self.entity_id, self.operation)
    }

    /// Returns true if the item exhausted its retries and waits for a reset.
    pub fn is_parked(&self, max_retry: u32) -> bool {
        self.status == QueueStatus::Failed && self.retry_count >= max_retry
    }

    /// Moves the item to `processing`.
    pub fn begin_attempt(&mut self, now: DateTime<Utc>) {
        self.status = QueueStatus::Processing;
        self.last_attempt_at = Some(now);
        self.updated_at = now;
    }

    /// Marks the item acknowledged.
    pub fn complete(&mut self, now: DateTime<Utc>) {
        self.status = QueueStatus::Completed;
        self.completed_at = Some(now);
        self.last_error = None;
        self.updated_at = now;
    }

    /// Records a failed attempt.
    pub fn fail(&mut self, error: impl Into<String>, now: DateTime<Utc>) {
        self.status = QueueStatus::Failed;
        self.retry_count = self.retry_count.saturating_add(1);
        self.last_error = Some(error.into());
        self.updated_at = now;
    }

    /// Records a terminal failure and parks the item at `max_retry`.
    pub fn park(&mut self, error: impl Into<String>, max_retry: u32, now: DateTime<Utc>) {
        self.fail(error, now);
        self.retry_count = self.retry_count.max(max_retry);
    }

    /// Makes a failed item eligible again without touching its retry count.
    pub fn release(&mut self, now: DateTime<Utc>) {
        self.status = QueueStatus::Pending;
        self.updated_at = now;
    }
}
