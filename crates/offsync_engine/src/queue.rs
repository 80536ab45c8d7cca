//! The offline mutation queue (outbox).
//!
//! Every local write is recorded here until the remote acknowledges it.
//! Items for the same `(entity_type, entity_id)` are coalesced so at most
//! one open (pending or failed) item exists per entity.
//!
//! ## Item lifecycle
//!
//! ```text
//! pending ──► processing ──► completed ──► (garbage collected)
//!    ▲            │
//!    │            ▼
//!    └──────── failed ──(retry_count >= max_retry)──► parked
//!  retry_failed()
//! ```

use crate::config::{RetryConfig, SyncConfig};
use crate::credential::Credential;
use crate::error::{SyncError, SyncResult};
use crate::events::{EventBus, SyncEvent};
use crate::gateway::{guarded_call, RemoteSyncGateway};
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use offsync_protocol::{MappingTable, MutationOperation, PushMutation, PushRequest};
use offsync_store::{LocalStore, MutationQueueItem, QueueStatus, StoreState};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

/// Counts of queue items by status.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueueStats {
    /// Items waiting for their first (or a released) attempt.
    pub pending: u64,
    /// Items being pushed right now.
    pub processing: u64,
    /// Acknowledged items not yet garbage collected.
    pub completed: u64,
    /// Failed items, parked ones included.
    pub failed: u64,
    /// Failed items that exhausted their retries.
    pub parked: u64,
    /// All items.
    pub total: u64,
    /// Creation time of the oldest open item.
    pub oldest_open_at: Option<DateTime<Utc>>,
}

/// Summary of one queue processing pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueueRunSummary {
    /// Items attempted.
    pub attempted: u64,
    /// Items acknowledged by the remote.
    pub delivered: u64,
    /// Items that failed and will be retried.
    pub failed: u64,
    /// Items parked by this pass.
    pub parked: u64,
    /// Error messages, one per failed item.
    pub errors: Vec<String>,
    /// True if the pass stopped on cancellation.
    pub cancelled: bool,
}

enum Delivery {
    Delivered,
    Failed(String),
    Parked(String),
    Interrupted(Option<String>),
    Skipped,
}

/// Durable queue of local writes not yet acknowledged by the remote.
pub struct MutationQueue<G, S> {
    store: Arc<S>,
    gateway: Arc<G>,
    mappings: Arc<MappingTable>,
    events: EventBus,
    concurrency: usize,
    max_retry: u32,
    retry: RetryConfig,
    timeout: Duration,
    completed_retention: Duration,
}

impl<G, S> MutationQueue<G, S>
where
    G: RemoteSyncGateway,
    S: LocalStore,
{
    /// Creates a queue over `store` delivering through `gateway`.
    pub fn new(
        config: &SyncConfig,
        store: Arc<S>,
        gateway: Arc<G>,
        mappings: Arc<MappingTable>,
        events: EventBus,
    ) -> Self {
        Self {
            store,
            gateway,
            mappings,
            events,
            concurrency: config.queue_concurrency.max(1),
            max_retry: config.max_retry,
            retry: config.retry.clone(),
            timeout: config.timeout,
            completed_retention: config.completed_retention,
        }
    }

    /// Records a local mutation.
    ///
    /// If an open item already exists for the entity, the mutation is merged
    /// into it instead of appended. Returns the resulting item.
    pub fn enqueue(
        &self,
        entity_type: &str,
        entity_id: &str,
        operation: MutationOperation,
        payload: Value,
        priority: i32,
    ) -> SyncResult<MutationQueueItem> {
        let now = Utc::now();
        let (item, coalesced) = self.store.write(|state| {
            let (item, coalesced) = match state.open_item_mut(entity_type, entity_id) {
                Some(existing) => {
                    existing.absorb(operation, payload, priority, now);
                    (existing.clone(), true)
                }
                None => {
                    let item = MutationQueueItem::new(
                        entity_type,
                        entity_id,
                        operation,
                        payload,
                        priority,
                        now,
                    );
                    state.queue.insert(item.id, item.clone());
                    (item, false)
                }
            };
            let open = state.open_count(entity_type);
            state.metadata_mut(entity_type).mark_pending(open);
            Ok((item, coalesced))
        })?;

        debug!(
            item_id = %item.id,
            entity_type,
            entity_id,
            operation = %item.operation,
            coalesced,
            "mutation queued"
        );
        self.events.emit(SyncEvent::MutationQueued {
            item_id: item.id,
            entity_type: entity_type.to_string(),
            entity_id: entity_id.to_string(),
            coalesced,
        });

        Ok(item)
    }

    /// Pushes every eligible item.
    ///
    /// Items are taken in `(priority, created_at)` order and pushed at most
    /// `queue_concurrency` at a time. Each item's outcome is independent.
    pub async fn process_queue(
        &self,
        credential: &Credential,
        cancel: &CancellationToken,
    ) -> SyncResult<QueueRunSummary> {
        self.process(credential, cancel, None).await
    }

    /// Like [`MutationQueue::process_queue`], limited to one entity type.
    pub async fn process_entity(
        &self,
        entity_type: &str,
        credential: &Credential,
        cancel: &CancellationToken,
    ) -> SyncResult<QueueRunSummary> {
        self.process(credential, cancel, Some(entity_type)).await
    }

    #[instrument(skip_all, fields(only = ?only))]
    async fn process(
        &self,
        credential: &Credential,
        cancel: &CancellationToken,
        only: Option<&str>,
    ) -> SyncResult<QueueRunSummary> {
        if cancel.is_cancelled() {
            return Err(SyncError::Cancelled);
        }

        let now = Utc::now();
        let batch = self.store.read(|state| self.eligible(state, now, only))?;
        let mut summary = QueueRunSummary::default();
        if batch.is_empty() {
            debug!("queue empty");
            return Ok(summary);
        }

        debug!(items = batch.len(), concurrency = self.concurrency, "processing queue");

        let outcomes: Vec<_> = stream::iter(batch)
            .map(|item_id| self.deliver(item_id, credential, cancel))
            .buffer_unordered(self.concurrency)
            .collect()
            .await;

        for outcome in outcomes {
            match outcome {
                Ok(Delivery::Delivered) => {
                    summary.attempted += 1;
                    summary.delivered += 1;
                }
                Ok(Delivery::Failed(error)) => {
                    summary.attempted += 1;
                    summary.failed += 1;
                    summary.errors.push(error);
                }
                Ok(Delivery::Parked(error)) => {
                    summary.attempted += 1;
                    summary.parked += 1;
                    summary.errors.push(error);
                }
                Ok(Delivery::Interrupted(error)) => {
                    summary.attempted += 1;
                    summary.errors.extend(error);
                }
                Ok(Delivery::Skipped) => {}
                Err(e) => summary.errors.push(e.to_string()),
            }
        }
        summary.cancelled = cancel.is_cancelled();

        info!(
            attempted = summary.attempted,
            delivered = summary.delivered,
            failed = summary.failed,
            parked = summary.parked,
            cancelled = summary.cancelled,
            "queue pass finished"
        );
        self.events.emit(SyncEvent::QueueDrained {
            summary: summary.clone(),
        });

        if summary.cancelled {
            return Err(SyncError::Cancelled);
        }
        Ok(summary)
    }

    fn eligible(&self, state: &StoreState, now: DateTime<Utc>, only: Option<&str>) -> Vec<Uuid> {
        let mut items: Vec<&MutationQueueItem> = state
            .queue
            .values()
            .filter(|item| only.map_or(true, |t| item.entity_type == t))
            .filter(|item| self.is_eligible(item, now))
            .collect();
        items.sort_by(|a, b| {
            a.priority
                .cmp(&b.priority)
                .then(a.created_at.cmp(&b.created_at))
                .then(a.id.cmp(&b.id))
        });
        items.into_iter().map(|item| item.id).collect()
    }

    /// Returns true if automatic processing may attempt `item` at `now`.
    pub fn is_eligible(&self, item: &MutationQueueItem, now: DateTime<Utc>) -> bool {
        match item.status {
            QueueStatus::Pending => true,
            QueueStatus::Failed if item.retry_count < self.max_retry => {
                let backoff = self.retry.delay_for_attempt(item.retry_count);
                match (item.last_attempt_at, chrono::Duration::from_std(backoff)) {
                    (Some(last), Ok(backoff)) => now >= last + backoff,
                    _ => true,
                }
            }
            _ => false,
        }
    }

    async fn deliver(
        &self,
        item_id: Uuid,
        credential: &Credential,
        cancel: &CancellationToken,
    ) -> SyncResult<Delivery> {
        if cancel.is_cancelled() {
            return Ok(Delivery::Skipped);
        }

        let max_retry = self.max_retry;
        let started = self.store.write(|state| {
            let now = Utc::now();
            // Still open and not parked since the batch was selected.
            let eligible = state
                .queue
                .get(&item_id)
                .is_some_and(|item| item.status.is_open() && !item.is_parked(max_retry));
            if !eligible {
                return Ok(None);
            }
            Ok(state.queue.get_mut(&item_id).map(|item| {
                let previous = item.status;
                item.begin_attempt(now);
                (item.clone(), previous)
            }))
        })?;
        let Some((item, previous)) = started else {
            return Ok(Delivery::Skipped);
        };

        debug!(
            item_id = %item.id,
            entity_type = %item.entity_type,
            entity_id = %item.entity_id,
            attempt = item.retry_count + 1,
            "pushing"
        );

        let outcome = match self.mappings.payload_to_wire(&item.entity_type, item.payload.clone()) {
            Ok(payload) => {
                let request = PushRequest::new(
                    item.entity_type.clone(),
                    vec![PushMutation {
                        entity_id: item.entity_id.clone(),
                        operation: item.operation,
                        payload,
                        idempotency_key: item.idempotency_key(),
                    }],
                );
                guarded_call(self.timeout, cancel, self.gateway.push(credential, request))
                    .await
                    .and_then(|ack| match ack.rejection_for(&item.entity_id) {
                        Some(rejection) => {
                            Err(SyncError::validation(&item.entity_id, &rejection.reason))
                        }
                        None if ack.accepted.iter().any(|id| id == &item.entity_id) => Ok(()),
                        None => Err(SyncError::network_retryable("mutation not acknowledged")),
                    })
            }
            // A payload the mapping refuses will never be accepted.
            Err(e) => Err(SyncError::validation(&item.entity_id, e.to_string())),
        };

        self.settle(item_id, previous, outcome)
    }

    fn settle(
        &self,
        item_id: Uuid,
        previous: QueueStatus,
        outcome: SyncResult<()>,
    ) -> SyncResult<Delivery> {
        let max_retry = self.max_retry;
        Ok(self.store.write(|state| {
            let now = Utc::now();
            let Some(item) = state.queue.get_mut(&item_id) else {
                return Ok(Delivery::Skipped);
            };
            let entity_type = item.entity_type.clone();
            let entity_id = item.entity_id.clone();

            let delivery = match outcome {
                Ok(()) => {
                    item.complete(now);
                    Delivery::Delivered
                }
                Err(SyncError::Cancelled) => {
                    item.status = previous;
                    item.updated_at = now;
                    Delivery::Interrupted(None)
                }
                Err(e @ SyncError::Unauthorized) => {
                    // Not the item's fault: restore without counting an attempt.
                    item.status = previous;
                    item.updated_at = now;
                    Delivery::Interrupted(Some(format!("{entity_type}/{entity_id}: {e}")))
                }
                Err(e) if e.is_validation() => {
                    warn!(%item_id, %entity_type, %entity_id, error = %e, "mutation rejected, parking");
                    item.park(e.to_string(), max_retry, now);
                    Delivery::Parked(format!("{entity_type}/{entity_id}: {e}"))
                }
                Err(e) => {
                    item.fail(e.to_string(), now);
                    debug!(%item_id, retry_count = item.retry_count, error = %e, "push failed");
                    Delivery::Failed(format!("{entity_type}/{entity_id}: {e}"))
                }
            };

            if matches!(delivery, Delivery::Failed(_) | Delivery::Parked(_) | Delivery::Interrupted(_)) {
                fold_newer_item(state, item_id, now);
            }

            let open = state.open_count(&entity_type);
            let meta = state.metadata_mut(&entity_type);
            meta.pending_changes_count = open;
            if matches!(delivery, Delivery::Delivered) {
                meta.last_pushed_at = Some(now);
            }
            Ok(delivery)
        })?)
    }

    /// Makes every failed item eligible again, parked ones included.
    ///
    /// Retry counts are left unchanged until the next attempt.
    pub fn retry_failed(&self) -> SyncResult<usize> {
        let released = self.store.write(|state| {
            let now = Utc::now();
            let mut released = 0;
            for item in state.queue.values_mut() {
                if item.status == QueueStatus::Failed {
                    item.release(now);
                    released += 1;
                }
            }
            Ok(released)
        })?;
        info!(released, "released failed items");
        Ok(released)
    }

    /// Removes completed items older than the configured retention.
    pub fn clear_completed(&self) -> SyncResult<usize> {
        self.clear_completed_older_than(self.completed_retention)
    }

    /// Removes completed items older than `retention`.
    pub fn clear_completed_older_than(&self, retention: Duration) -> SyncResult<usize> {
        let cutoff = chrono::Duration::from_std(retention)
            .ok()
            .and_then(|retention| Utc::now().checked_sub_signed(retention));
        let removed = self.store.write(|state| {
            let before = state.queue.len();
            state.queue.retain(|_, item| {
                if item.status != QueueStatus::Completed {
                    return true;
                }
                match cutoff {
                    Some(cutoff) => item.completed_at.is_some_and(|at| at > cutoff),
                    None => true,
                }
            });
            Ok(before - state.queue.len())
        })?;
        debug!(removed, "cleared completed items");
        Ok(removed)
    }

    /// Returns item counts.
    pub fn get_stats(&self) -> SyncResult<QueueStats> {
        let max_retry = self.max_retry;
        Ok(self.store.read(|state| queue_stats(state, max_retry))?)
    }

    /// Returns items, optionally filtered by status, in processing order.
    pub fn items(&self, status: Option<QueueStatus>) -> SyncResult<Vec<MutationQueueItem>> {
        let mut items = self.store.read(|state| {
            state
                .queue
                .values()
                .filter(|item| status.map_or(true, |s| item.status == s))
                .cloned()
                .collect::<Vec<_>>()
        })?;
        items.sort_by(|a, b| a.priority.cmp(&b.priority).then(a.created_at.cmp(&b.created_at)));
        Ok(items)
    }

    /// Moves items left in `processing` by an interrupted run back to
    /// `pending`.
    pub fn recover_interrupted(&self) -> SyncResult<usize> {
        let recovered = self.store.write(|state| {
            let now = Utc::now();
            let stuck: Vec<Uuid> = state
                .queue
                .values()
                .filter(|item| item.status == QueueStatus::Processing)
                .map(|item| item.id)
                .collect();
            for id in &stuck {
                if let Some(item) = state.queue.get_mut(id) {
                    item.release(now);
                }
                fold_newer_item(state, *id, now);
            }
            Ok(stuck.len())
        })?;
        if recovered > 0 {
            warn!(recovered, "recovered interrupted queue items");
        }
        Ok(recovered)
    }
}

/// Computes queue statistics.
pub fn queue_stats(state: &StoreState, max_retry: u32) -> QueueStats {
    let mut stats = QueueStats::default();
    for item in state.queue.values() {
        stats.total += 1;
        match item.status {
            QueueStatus::Pending => stats.pending += 1,
            QueueStatus::Processing => stats.processing += 1,
            QueueStatus::Completed => stats.completed += 1,
            QueueStatus::Failed => {
                stats.failed += 1;
                if item.is_parked(max_retry) {
                    stats.parked += 1;
                }
            }
        }
        if item.status.is_open() {
            stats.oldest_open_at = Some(
                stats
                    .oldest_open_at
                    .map_or(item.created_at, |t| t.min(item.created_at)),
            );
        }
    }
    stats
}

/// Folds a newer open item for the same entity into the item `id`.
///
/// While an item is in flight, new writes for its entity land in a fresh
/// item. If the in-flight item then reopens, the two are combined so the
/// entity keeps a single open item. The older item keeps its id, queue
/// position and retry count.
fn fold_newer_item(state: &mut StoreState, id: Uuid, now: DateTime<Utc>) {
    let Some(item) = state.queue.get(&id) else {
        return;
    };
    if !item.status.is_open() {
        return;
    }
    let newer = state
        .queue
        .values()
        .find(|other| {
            other.id != id
                && other.status.is_open()
                && other.entity_type == item.entity_type
                && other.entity_id == item.entity_id
        })
        .map(|other| other.id);

    if let Some(newer) = newer.and_then(|newer_id| state.queue.remove(&newer_id)) {
        if let Some(item) = state.queue.get_mut(&id) {
            item.absorb(newer.operation, newer.payload, newer.priority, now);
            debug!(item_id = %id, folded = %newer.id, "folded newer write into reopened item");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::MockGateway;
    use offsync_protocol::{FieldMapping, PushAck, PushRejection};
    use offsync_store::MemoryStore;
    use serde_json::json;

    type Queue = MutationQueue<MockGateway, MemoryStore>;

    fn config() -> SyncConfig {
        SyncConfig::new()
            .with_max_retry(3)
            .with_retry(RetryConfig::no_backoff())
            .with_completed_retention(Duration::from_secs(3600))
    }

    fn queue_with(config: &SyncConfig, mappings: MappingTable) -> (Queue, Arc<MockGateway>, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let gateway = Arc::new(MockGateway::new());
        let queue = MutationQueue::new(
            config,
            Arc::clone(&store),
            Arc::clone(&gateway),
            Arc::new(mappings),
            EventBus::default(),
        );
        (queue, gateway, store)
    }

    fn queue() -> (Queue, Arc<MockGateway>, Arc<MemoryStore>) {
        queue_with(&config(), MappingTable::new())
    }

    fn credential() -> Credential {
        Credential::bearer("token")
    }

    #[test]
    fn enqueue_coalesces_same_entity() {
        let (queue, _, store) = queue();
        queue
            .enqueue("tickets", "T1", MutationOperation::Update, json!({"title": "A"}), 1)
            .unwrap();
        let item = queue
            .enqueue("tickets", "T1", MutationOperation::Update, json!({"title": "B"}), 1)
            .unwrap();

        assert_eq!(item.payload, json!({"title": "B"}));
        let (count, meta) = store
            .read(|s| (s.queue.len(), s.metadata("tickets").cloned()))
            .unwrap();
        assert_eq!(count, 1);
        let meta = meta.unwrap();
        assert!(meta.needs_sync);
        assert_eq!(meta.pending_changes_count, 1);
    }

    #[test]
    fn enqueue_update_after_create_stays_create() {
        let (queue, _, _) = queue();
        queue
            .enqueue("tickets", "T1", MutationOperation::Create, json!({"title": "A", "seat": 1}), 5)
            .unwrap();
        let item = queue
            .enqueue("tickets", "T1", MutationOperation::Update, json!({"seat": 2}), 2)
            .unwrap();
        assert_eq!(item.operation, MutationOperation::Create);
        assert_eq!(item.payload, json!({"title": "A", "seat": 2}));
        assert_eq!(item.priority, 2);
    }

    #[tokio::test]
    async fn process_delivers_in_priority_order() {
        let (queue, gateway, _) = queue_with(&config().with_queue_concurrency(1), MappingTable::new());
        queue.enqueue("artists", "a1", MutationOperation::Update, json!({}), 5).unwrap();
        queue.enqueue("balance", "b1", MutationOperation::Update, json!({}), 0).unwrap();
        queue.enqueue("tickets", "t1", MutationOperation::Update, json!({}), 1).unwrap();

        let summary = queue
            .process_queue(&credential(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(summary.delivered, 3);

        let order: Vec<_> = gateway
            .push_requests()
            .into_iter()
            .map(|r| r.entity_type)
            .collect();
        assert_eq!(order, ["balance", "tickets", "artists"]);

        let stats = queue.get_stats().unwrap();
        assert_eq!(stats.completed, 3);
        assert_eq!(stats.pending, 0);
    }

    #[tokio::test]
    async fn failures_are_independent_and_counted() {
        let (queue, gateway, _) = queue();
        gateway.script_push("tickets", Err(SyncError::network_retryable("reset")));
        queue.enqueue("tickets", "t1", MutationOperation::Update, json!({}), 0).unwrap();
        queue.enqueue("artists", "a1", MutationOperation::Update, json!({}), 1).unwrap();

        let summary = queue
            .process_queue(&credential(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(summary.delivered, 1);
        assert_eq!(summary.failed, 1);

        let failed = queue.items(Some(QueueStatus::Failed)).unwrap();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].retry_count, 1);
        assert!(failed[0].last_error.as_deref().unwrap().contains("reset"));
    }

    #[tokio::test]
    async fn parked_items_are_skipped_until_released() {
        let (queue, gateway, _) = queue();
        for _ in 0..3 {
            gateway.script_push("tickets", Err(SyncError::Timeout));
        }
        queue.enqueue("tickets", "t1", MutationOperation::Update, json!({}), 0).unwrap();

        for _ in 0..3 {
            queue
                .process_queue(&credential(), &CancellationToken::new())
                .await
                .unwrap();
        }
        let stats = queue.get_stats().unwrap();
        assert_eq!(stats.parked, 1);
        assert_eq!(gateway.push_count(), 3);

        // Parked: a fourth pass does nothing.
        let summary = queue
            .process_queue(&credential(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(summary.attempted, 0);
        assert_eq!(gateway.push_count(), 3);

        assert_eq!(queue.retry_failed().unwrap(), 1);
        let item = &queue.items(Some(QueueStatus::Pending)).unwrap()[0];
        assert_eq!(item.retry_count, 3);

        let summary = queue
            .process_queue(&credential(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(summary.delivered, 1);
    }

    #[tokio::test]
    async fn validation_rejection_parks_item() {
        let (queue, gateway, _) = queue();
        gateway.script_push(
            "tickets",
            Ok(PushAck {
                accepted: Vec::new(),
                rejected: vec![PushRejection {
                    entity_id: "t1".into(),
                    reason: "title required".into(),
                }],
            }),
        );
        queue.enqueue("tickets", "t1", MutationOperation::Create, json!({}), 0).unwrap();

        let summary = queue
            .process_queue(&credential(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(summary.parked, 1);
        assert!(summary.errors[0].contains("title required"));

        let item = &queue.items(Some(QueueStatus::Failed)).unwrap()[0];
        assert!(item.is_parked(3));
    }

    #[tokio::test]
    async fn unauthorized_push_is_reported_without_counting_attempt() {
        let (queue, gateway, _) = queue();
        gateway.script_push("tickets", Err(SyncError::Unauthorized));
        queue.enqueue("tickets", "t1", MutationOperation::Update, json!({}), 0).unwrap();

        let summary = queue
            .process_queue(&credential(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(summary.delivered, 0);
        assert_eq!(summary.errors, ["tickets/t1: unauthorized"]);

        let item = &queue.items(Some(QueueStatus::Pending)).unwrap()[0];
        assert_eq!(item.retry_count, 0);
    }

    #[tokio::test]
    async fn backoff_delays_failed_items() {
        let config = config().with_retry(
            RetryConfig::new()
                .with_initial_delay(Duration::from_secs(600))
                .with_jitter(false),
        );
        let (queue, gateway, _) = queue_with(&config, MappingTable::new());
        gateway.script_push("tickets", Err(SyncError::Timeout));
        queue.enqueue("tickets", "t1", MutationOperation::Update, json!({}), 0).unwrap();

        let cancel = CancellationToken::new();
        queue.process_queue(&credential(), &cancel).await.unwrap();
        let summary = queue.process_queue(&credential(), &cancel).await.unwrap();
        assert_eq!(summary.attempted, 0);
        assert_eq!(gateway.push_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn concurrency_is_bounded() {
        let (queue, gateway, _) = queue();
        gateway.set_latency(Duration::from_millis(100));
        for i in 0..10 {
            queue
                .enqueue("tickets", &format!("t{i}"), MutationOperation::Update, json!({}), 0)
                .unwrap();
        }

        let summary = queue
            .process_queue(&credential(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(summary.delivered, 10);
        assert_eq!(gateway.max_in_flight(), 3);
    }

    #[tokio::test]
    async fn cancelled_pass_leaves_items_pending() {
        let (queue, gateway, _) = queue();
        queue.enqueue("tickets", "t1", MutationOperation::Update, json!({}), 0).unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = queue.process_queue(&credential(), &cancel).await;
        assert!(matches!(result, Err(SyncError::Cancelled)));
        assert_eq!(gateway.push_count(), 0);
        assert_eq!(queue.get_stats().unwrap().pending, 1);
    }

    #[tokio::test]
    async fn payload_is_mapped_to_wire_names() {
        let mappings =
            MappingTable::from_mappings(&[FieldMapping::new("artists").field("stage_name", "stageName")])
                .unwrap();
        let (queue, gateway, _) = queue_with(&config(), mappings);
        queue
            .enqueue("artists", "a1", MutationOperation::Update, json!({"stageName": "Nova"}), 0)
            .unwrap();
        queue
            .process_queue(&credential(), &CancellationToken::new())
            .await
            .unwrap();

        let pushed = &gateway.push_requests()[0].mutations[0];
        assert_eq!(pushed.payload, json!({"stage_name": "Nova"}));
        assert_eq!(pushed.idempotency_key.to_string(), "artists/a1/update");
    }

    #[test]
    fn recover_interrupted_releases_processing_items() {
        let (queue, _, store) = queue();
        let item = queue
            .enqueue("tickets", "t1", MutationOperation::Update, json!({"a": 1}), 0)
            .unwrap();
        store
            .write(|s| {
                if let Some(it) = s.queue.get_mut(&item.id) {
                    it.begin_attempt(Utc::now());
                }
                Ok(())
            })
            .unwrap();
        // A write that arrived while the item was in flight.
        queue
            .enqueue("tickets", "t1", MutationOperation::Update, json!({"b": 2}), 0)
            .unwrap();

        assert_eq!(queue.recover_interrupted().unwrap(), 1);
        let items = queue.items(None).unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].id, item.id);
        assert_eq!(items[0].status, QueueStatus::Pending);
        assert_eq!(items[0].payload, json!({"a": 1, "b": 2}));
    }

    #[tokio::test]
    async fn clear_completed_respects_retention() {
        let (queue, _, _) = queue();
        queue.enqueue("tickets", "t1", MutationOperation::Update, json!({}), 0).unwrap();
        queue
            .process_queue(&credential(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(queue.clear_completed().unwrap(), 0);
        assert_eq!(queue.clear_completed_older_than(Duration::ZERO).unwrap(), 1);
        assert_eq!(queue.get_stats().unwrap().total, 0);
    }
}
