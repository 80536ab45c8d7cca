//! Sync orchestrator.
//!
//! Coordinates connectivity and lifecycle signals, throttling, and the
//! per entity type delta sync.
//!
//! ## Run algorithm
//!
//! 1. Drain the mutation queue, so a pull cannot overwrite writes not yet sent
//! 2. Walk entity types by ascending priority
//! 3. Skip a type unless it needs sync or is stale
//! 4. Pull pages since the cursor; resolve conflicts and apply each page
//!    in one store transaction that also advances the cursor
//! 5. Aggregate per type results into the run result
//!
//! Only one run is active at a time. Concurrent callers share the active
//! run's result.

use crate::config::{EntityTypeConfig, SyncConfig};
use crate::credential::Credential;
use crate::error::{SyncError, SyncResult};
use crate::events::{EventBus, SyncEvent};
use crate::gateway::{guarded_call, RemoteSyncGateway};
use crate::metadata::{should_sync, MetadataTracker};
use crate::queue::MutationQueue;
use crate::result::{EntitySyncResult, RunOutcome, SyncRunResult};
use crate::status::{StatusCell, SyncRunStatus, SyncState};
use chrono::Utc;
use futures::future::{BoxFuture, FutureExt, Shared};
use offsync_protocol::{
    ConflictResolver, MappingTable, ModificationMarker, PullCursor, PullRequest, RemoteRecord,
};
use offsync_store::{EntitySyncMetadata, LocalRecord, LocalStore};
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::{broadcast, Notify};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

type RunFuture = Shared<BoxFuture<'static, SyncRunResult>>;

struct ActiveRun {
    id: u64,
    cancel: CancellationToken,
    future: RunFuture,
}

#[derive(Debug, Clone)]
enum RunScope {
    All,
    Entity(String),
}

enum Decision {
    Join(RunFuture),
    WaitThenRetry(RunFuture),
    Throttled,
}

#[derive(Debug, Default)]
struct PageApplied {
    applied: u64,
    deleted: u64,
    conflicts: u64,
    kept_local: u64,
}

struct Inner<G, S> {
    config: SyncConfig,
    store: Arc<S>,
    gateway: Arc<G>,
    queue: MutationQueue<G, S>,
    metadata: MetadataTracker<S>,
    resolver: ConflictResolver,
    mappings: Arc<MappingTable>,
    events: EventBus,
    credential: RwLock<Option<Credential>>,
    status: RwLock<StatusCell>,
    active: Mutex<Option<ActiveRun>>,
    last_completed: Mutex<Option<Instant>>,
    debounce: Mutex<Option<JoinHandle<()>>>,
    periodic: Mutex<Option<JoinHandle<()>>>,
    rearm: Arc<Notify>,
    shutdown: CancellationToken,
    run_seq: AtomicU64,
}

/// Coordinates sync runs for one local store and one remote.
///
/// Cheap to clone; clones share the same orchestrator. Construct one per
/// application at the composition root and hand it to whoever needs it.
///
/// Scheduling (debounce, periodic timer, foreground trigger) spawns Tokio
/// tasks and must run inside a Tokio runtime.
pub struct SyncOrchestrator<G, S> {
    inner: Arc<Inner<G, S>>,
}

impl<G, S> Clone for SyncOrchestrator<G, S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<G, S> SyncOrchestrator<G, S>
where
    G: RemoteSyncGateway + 'static,
    S: LocalStore + 'static,
{
    /// Creates an orchestrator.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or a field mapping
    /// does not compile.
    pub fn new(config: SyncConfig, gateway: G, store: Arc<S>) -> SyncResult<Self> {
        config.validate()?;
        let mappings = Arc::new(config.mapping_table()?);
        let gateway = Arc::new(gateway);
        let events = EventBus::default();
        let queue = MutationQueue::new(
            &config,
            Arc::clone(&store),
            Arc::clone(&gateway),
            Arc::clone(&mappings),
            events.clone(),
        );
        let metadata = MetadataTracker::new(&config, Arc::clone(&store));
        let resolver = config.resolver();

        Ok(Self {
            inner: Arc::new(Inner {
                config,
                store,
                gateway,
                queue,
                metadata,
                resolver,
                mappings,
                events,
                credential: RwLock::new(None),
                status: RwLock::new(StatusCell::new()),
                active: Mutex::new(None),
                last_completed: Mutex::new(None),
                debounce: Mutex::new(None),
                periodic: Mutex::new(None),
                rearm: Arc::new(Notify::new()),
                shutdown: CancellationToken::new(),
                run_seq: AtomicU64::new(0),
            }),
        })
    }

    /// Recovers from an interrupted previous session and starts the
    /// periodic timer.
    ///
    /// Queue items left in `processing` go back to `pending`, and every
    /// configured entity type gets a metadata row.
    pub async fn initialize(&self) -> SyncResult<()> {
        if self.inner.shutdown.is_cancelled() {
            return Err(SyncError::Shutdown);
        }

        let recovered = self.inner.queue.recover_interrupted()?;
        let created = self.inner.metadata.ensure_configured()?;
        self.start_periodic();

        info!(
            recovered,
            created,
            entity_types = self.inner.config.entity_types.len(),
            "sync orchestrator initialized"
        );
        Ok(())
    }

    /// Runs a sync.
    ///
    /// - Offline: returns a failure result with `errors == ["offline"]`
    /// - A run is active and `force` is false: returns that run's result
    /// - A run is active and `force` is true: cancels it, then runs
    /// - The last run finished less than `min_sync_interval` ago and
    ///   `force` is false: returns a no-op success
    pub async fn sync(&self, force: bool) -> SyncRunResult {
        self.start(RunScope::All, force).await
    }

    /// Pushes and pulls a single entity type, regardless of its pending
    /// flag or staleness. Waits for an active run first.
    pub async fn sync_entity(&self, entity_type: &str) -> SyncResult<SyncRunResult> {
        if self.inner.config.entity_type(entity_type).is_none() {
            return Err(SyncError::UnknownEntityType(entity_type.to_string()));
        }
        Ok(self.start(RunScope::Entity(entity_type.to_string()), false).await)
    }

    /// Cancels the active run. Returns false if none is active.
    pub fn cancel_sync(&self) -> bool {
        let active = self.inner.active.lock();
        match active.as_ref() {
            Some(run) => {
                info!(run_id = run.id, "cancelling sync run");
                run.cancel.cancel();
                true
            }
            None => false,
        }
    }

    /// Stops automatic scheduling. Queued mutations and metadata are kept.
    pub fn pause_sync(&self) {
        self.update_status(|cell| cell.paused = true);
        self.cancel_debounce();
        info!("sync paused");
    }

    /// Resumes automatic scheduling.
    pub fn resume_sync(&self) {
        self.update_status(|cell| cell.paused = false);
        self.inner.rearm.notify_waiters();
        info!("sync resumed");
    }

    /// Returns a status snapshot.
    pub fn get_status(&self) -> SyncRunStatus {
        let pending = self
            .inner
            .store
            .read(|state| state.queue.values().filter(|i| i.status.is_open()).count() as u64)
            .unwrap_or_else(|e| {
                warn!(error = %e, "cannot count pending changes");
                0
            });
        self.inner.status.read().snapshot(pending)
    }

    /// Feeds a connectivity change.
    ///
    /// Going online schedules one debounced run; repeated flapping within the
    /// settle delay collapses into a single run.
    pub fn set_connectivity(&self, online: bool) {
        let mut changed = false;
        self.update_status(|cell| {
            if cell.online != online {
                changed = true;
                cell.online = online;
                if online && cell.machine != SyncState::Syncing {
                    cell.machine = SyncState::Idle;
                }
            }
        });
        if !changed {
            return;
        }

        if online {
            info!("connectivity restored");
            self.schedule_debounced_sync();
        } else {
            info!("connectivity lost");
            self.cancel_debounce();
        }
    }

    /// Feeds an app-foreground transition.
    ///
    /// Starts a run in the background if the throttle interval elapsed and
    /// no run is active. Returns true if a run was started.
    pub fn on_foreground(&self) -> bool {
        self.update_status(|cell| cell.background = false);

        let accepts = self.inner.status.read().accepts_triggers();
        let idle = self.inner.active.lock().is_none();
        if !accepts || !idle || self.throttled() {
            return false;
        }
        let Ok(runtime) = Handle::try_current() else {
            warn!("no tokio runtime, foreground sync not started");
            return false;
        };

        debug!("foreground sync");
        let this = self.clone();
        runtime.spawn(async move {
            this.sync(false).await;
        });
        true
    }

    /// Feeds an app-background transition. Suspends automatic scheduling.
    pub fn on_background(&self) {
        self.update_status(|cell| cell.background = true);
        self.cancel_debounce();
    }

    /// Sets the bearer credential used for every network call.
    pub fn set_credential(&self, credential: Credential) {
        *self.inner.credential.write() = Some(credential);
    }

    /// Drops the bearer credential.
    pub fn clear_credential(&self) {
        *self.inner.credential.write() = None;
    }

    /// Returns the mutation queue.
    pub fn queue(&self) -> &MutationQueue<G, S> {
        &self.inner.queue
    }

    /// Returns the metadata tracker.
    pub fn metadata(&self) -> &MetadataTracker<S> {
        &self.inner.metadata
    }

    /// Returns the local store.
    pub fn store(&self) -> &Arc<S> {
        &self.inner.store
    }

    /// Returns the configuration.
    pub fn config(&self) -> &SyncConfig {
        &self.inner.config
    }

    /// Subscribes to sync events.
    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.inner.events.subscribe()
    }

    /// Forgets the cursor of one entity type.
    pub fn reset_entity(&self, entity_type: &str) -> SyncResult<()> {
        self.inner.metadata.reset_entity(entity_type)
    }

    /// Forgets every cursor.
    pub fn reset_all(&self) -> SyncResult<usize> {
        self.inner.metadata.reset_all()
    }

    /// Stops scheduling, cancels the active run and waits for it to end.
    pub async fn shutdown(&self) {
        info!("shutting down sync orchestrator");
        self.inner.shutdown.cancel();
        if let Some(handle) = self.inner.debounce.lock().take() {
            handle.abort();
        }
        if let Some(handle) = self.inner.periodic.lock().take() {
            handle.abort();
        }

        let active = self.inner.active.lock().as_ref().map(|run| run.future.clone());
        if let Some(run) = active {
            run.await;
        }
    }

    async fn start(&self, scope: RunScope, force: bool) -> SyncRunResult {
        loop {
            if self.inner.shutdown.is_cancelled() {
                return SyncRunResult::aborted(None, SyncError::Shutdown.to_string());
            }
            if !self.inner.status.read().online {
                debug!("sync requested while offline");
                return SyncRunResult::offline();
            }

            let decision = {
                let mut active = self.inner.active.lock();
                match active.as_ref() {
                    Some(run) if force => {
                        info!(run_id = run.id, "cancelling active run for forced sync");
                        run.cancel.cancel();
                        Decision::WaitThenRetry(run.future.clone())
                    }
                    Some(run) => match scope {
                        RunScope::All => Decision::Join(run.future.clone()),
                        RunScope::Entity(_) => Decision::WaitThenRetry(run.future.clone()),
                    },
                    None if !force && matches!(scope, RunScope::All) && self.throttled() => {
                        Decision::Throttled
                    }
                    None => {
                        let run = self.spawn_run(scope.clone());
                        let future = run.future.clone();
                        *active = Some(run);
                        Decision::Join(future)
                    }
                }
            };

            match decision {
                Decision::Join(run) => return run.await,
                Decision::WaitThenRetry(run) => {
                    run.await;
                }
                Decision::Throttled => {
                    debug!("sync throttled");
                    return SyncRunResult::throttled();
                }
            }
        }
    }

    fn throttled(&self) -> bool {
        let min = self.inner.config.min_sync_interval;
        self.inner
            .last_completed
            .lock()
            .is_some_and(|at| at.elapsed() < min)
    }

    fn spawn_run(&self, scope: RunScope) -> ActiveRun {
        let id = self.inner.run_seq.fetch_add(1, Ordering::SeqCst) + 1;
        let cancel = self.inner.shutdown.child_token();

        let this = self.clone();
        let token = cancel.clone();
        let handle = tokio::spawn(async move { this.execute_run(id, scope, token).await });
        let future = async move {
            handle
                .await
                .unwrap_or_else(|e| SyncRunResult::aborted(Some(id), format!("sync task failed: {e}")))
        }
        .boxed()
        .shared();

        ActiveRun { id, cancel, future }
    }

    #[instrument(name = "sync_run", skip(self, cancel))]
    async fn execute_run(&self, id: u64, scope: RunScope, cancel: CancellationToken) -> SyncRunResult {
        let clock = Instant::now();
        let mut result = SyncRunResult::begin(id);

        info!("sync run started");
        self.inner.events.emit(SyncEvent::RunStarted { run_id: id });
        self.update_status(|cell| {
            cell.machine = SyncState::Syncing;
            cell.progress = 0;
            cell.current_entity = None;
        });

        let credential = self.inner.credential.read().clone();
        result.outcome = self
            .run_steps(id, &scope, credential.as_ref(), &cancel, &mut result)
            .await;
        result.duration = clock.elapsed();

        self.finish(id, &scope, &result);
        result
    }

    async fn run_steps(
        &self,
        id: u64,
        scope: &RunScope,
        credential: Option<&Credential>,
        cancel: &CancellationToken,
        result: &mut SyncRunResult,
    ) -> RunOutcome {
        match credential {
            Some(credential) => {
                let pushed = match scope {
                    RunScope::All => self.inner.queue.process_queue(credential, cancel).await,
                    RunScope::Entity(name) => {
                        self.inner.queue.process_entity(name, credential, cancel).await
                    }
                };
                match pushed {
                    Ok(summary) => result.record_push(&summary),
                    Err(SyncError::Cancelled) => return RunOutcome::Cancelled,
                    Err(e) => {
                        warn!(error = %e, "queue processing failed");
                        result.errors.push(format!("push: {e}"));
                    }
                }
            }
            None => {
                warn!("no credential, skipping push");
                result.errors.push(format!("push: {}", SyncError::Unauthorized));
            }
        }

        let (types, always): (Vec<EntityTypeConfig>, bool) = match scope {
            RunScope::All => (
                self.inner
                    .config
                    .sorted_entity_types()
                    .into_iter()
                    .cloned()
                    .collect(),
                false,
            ),
            RunScope::Entity(name) => (
                self.inner.config.entity_type(name).cloned().into_iter().collect(),
                true,
            ),
        };
        let total = types.len().max(1);

        for (index, entity_type) in types.iter().enumerate() {
            if cancel.is_cancelled() {
                return RunOutcome::Cancelled;
            }

            let name = entity_type.name.clone();
            self.update_status(|cell| cell.current_entity = Some(name.clone()));
            self.inner.events.emit(SyncEvent::EntityStarted {
                run_id: id,
                entity_type: name.clone(),
            });

            let entity = match self
                .sync_entity_type(entity_type, credential, cancel, always)
                .await
            {
                Ok(entity) => entity,
                Err(SyncError::Cancelled) => return RunOutcome::Cancelled,
                Err(e @ SyncError::ConflictResolution { .. }) => {
                    error!(entity_type = %name, error = %e, "conflict resolution defect, aborting run");
                    self.note_entity_error(&name, &e);
                    result.record_entity(EntitySyncResult::failed(&name, e.to_string()));
                    return RunOutcome::Aborted;
                }
                Err(e) => {
                    warn!(entity_type = %name, error = %e, "entity sync failed");
                    self.note_entity_error(&name, &e);
                    EntitySyncResult::failed(&name, e.to_string())
                }
            };

            self.inner.events.emit(SyncEvent::EntityFinished {
                run_id: id,
                result: entity.clone(),
            });
            result.record_entity(entity);

            let progress = u8::try_from((index + 1) * 100 / total).unwrap_or(100);
            self.update_status(|cell| cell.progress = progress);
            self.inner
                .events
                .emit(SyncEvent::Progress { run_id: id, progress });
        }

        RunOutcome::Completed
    }

    fn note_entity_error(&self, entity_type: &str, error: &SyncError) {
        if let Err(e) = self.inner.metadata.record_error(entity_type, &error.to_string()) {
            warn!(entity_type, error = %e, "cannot record entity error");
        }
    }

    #[instrument(skip(self, entity_type, credential, cancel), fields(entity_type = %entity_type.name))]
    async fn sync_entity_type(
        &self,
        entity_type: &EntityTypeConfig,
        credential: Option<&Credential>,
        cancel: &CancellationToken,
        always: bool,
    ) -> SyncResult<EntitySyncResult> {
        let name = entity_type.name.as_str();
        let meta = self
            .inner
            .metadata
            .get(name)?
            .unwrap_or_else(|| EntitySyncMetadata::new(name));

        if !always && !should_sync(&meta, entity_type.staleness_threshold, Utc::now()) {
            debug!("up to date, skipping");
            return Ok(EntitySyncResult::skipped(name));
        }
        let credential = credential.ok_or(SyncError::Unauthorized)?;

        let mut entity = EntitySyncResult::new(name);
        let mut since = meta.last_pulled_at;
        let mut token = meta.sync_token;

        loop {
            if cancel.is_cancelled() {
                return Err(SyncError::Cancelled);
            }

            let request =
                PullRequest::new(name, since, self.inner.config.batch_size).with_token(token.clone());
            let page = guarded_call(
                self.inner.config.timeout,
                cancel,
                self.inner.gateway.pull(credential, request),
            )
            .await?;

            let has_more = page.has_more;
            let received = page.records.len() as u64;
            let applied = self.apply_page(name, page.records, &page.next_cursor, !has_more)?;

            entity.pages += 1;
            entity.pulled += received;
            entity.applied += applied.applied;
            entity.deleted += applied.deleted;
            entity.conflicts += applied.conflicts;
            entity.kept_local += applied.kept_local;
            debug!(page = entity.pages, received, has_more, "page applied");

            since = Some(page.next_cursor.timestamp);
            if page.next_cursor.token.is_some() {
                token = page.next_cursor.token;
            }

            if !has_more {
                break;
            }
            if received == 0 {
                warn!("remote reported more pages but sent an empty one");
                break;
            }
        }

        Ok(entity)
    }

    /// Applies one page in a single store transaction.
    ///
    /// Records, cursor and pending flag change together or not at all.
    fn apply_page(
        &self,
        entity_type: &str,
        records: Vec<RemoteRecord>,
        cursor: &PullCursor,
        last_page: bool,
    ) -> SyncResult<PageApplied> {
        let mut translated = Vec::with_capacity(records.len());
        for record in records {
            let RemoteRecord {
                entity_id,
                fields,
                marker,
                deleted,
            } = record;
            let fields = self.inner.mappings.to_local(entity_type, fields)?;
            translated.push(RemoteRecord {
                entity_id,
                fields,
                marker,
                deleted,
            });
        }

        let resolver = &self.inner.resolver;
        let max_retry = self.inner.config.max_retry;
        let page = self.inner.store.write(|state| {
            let now = Utc::now();
            let mut page = PageApplied::default();

            for record in translated {
                let use_remote = if state.has_pending_write(entity_type, &record.entity_id) {
                    page.conflicts += 1;
                    let use_remote = match state.record(entity_type, &record.entity_id) {
                        Some(local) => resolver.resolve(entity_type, local, &record).use_remote,
                        // Nothing local to keep; the queued write still carries it.
                        None => resolver
                            .resolve(entity_type, &ModificationMarker::default(), &record)
                            .use_remote,
                    };
                    if use_remote {
                        if let Some(item) = state.open_item_mut(entity_type, &record.entity_id) {
                            if !item.is_parked(max_retry) {
                                item.park("superseded by remote", max_retry, now);
                            }
                        }
                    }
                    use_remote
                } else {
                    true
                };

                if !use_remote {
                    page.kept_local += 1;
                    continue;
                }
                if record.deleted {
                    if state.remove_record(entity_type, &record.entity_id).is_some() {
                        page.deleted += 1;
                    }
                } else {
                    state.put_record(
                        entity_type,
                        LocalRecord::new(record.entity_id, record.fields, record.marker, now),
                    );
                    page.applied += 1;
                }
            }

            let open = state.open_count(entity_type);
            let meta = state.metadata_mut(entity_type);
            if !meta.advance_cursor(cursor) {
                warn!(entity_type, "remote cursor moved backwards, keeping ours");
            }
            meta.pending_changes_count = open;
            if last_page {
                meta.is_initial_sync_complete = true;
                meta.last_error = None;
                if open == 0 {
                    meta.clear_pending();
                }
            }
            Ok(page)
        })?;
        Ok(page)
    }

    fn finish(&self, id: u64, scope: &RunScope, result: &SyncRunResult) {
        let now = Utc::now();
        self.update_status(|cell| {
            match result.outcome {
                RunOutcome::Cancelled => cell.machine = SyncState::Idle,
                _ => {
                    cell.sync_count += 1;
                    cell.last_sync_at = Some(now);
                    if result.errors.is_empty() {
                        cell.machine = SyncState::Idle;
                        cell.last_error = None;
                    } else {
                        cell.machine = SyncState::Error;
                        cell.failed_sync_count += 1;
                        cell.last_error = result.first_error().map(str::to_string);
                    }
                }
            }
            if result.outcome == RunOutcome::Completed {
                cell.progress = 100;
            }
            cell.current_entity = None;
        });

        if result.outcome != RunOutcome::Cancelled && matches!(scope, RunScope::All) {
            *self.inner.last_completed.lock() = Some(Instant::now());
        }
        {
            let mut active = self.inner.active.lock();
            if active.as_ref().is_some_and(|run| run.id == id) {
                *active = None;
            }
        }

        info!(
            outcome = ?result.outcome,
            pushed = result.pushed,
            pulled = result.pulled,
            errors = result.errors.len(),
            "sync run finished"
        );
        self.inner.events.emit(SyncEvent::RunFinished {
            result: result.clone(),
        });
        self.inner.rearm.notify_waiters();
    }

    fn update_status(&self, f: impl FnOnce(&mut StatusCell)) {
        let (from, to) = {
            let mut cell = self.inner.status.write();
            let from = cell.displayed();
            f(&mut cell);
            (from, cell.displayed())
        };
        if from != to {
            debug!(from = from.as_str(), to = to.as_str(), "state changed");
            self.inner.events.emit(SyncEvent::StateChanged { from, to });
        }
    }

    fn schedule_debounced_sync(&self) {
        let Ok(runtime) = Handle::try_current() else {
            warn!("no tokio runtime, reconnect sync not scheduled");
            return;
        };
        let delay = self.inner.config.reconnect_debounce;
        let weak = Arc::downgrade(&self.inner);

        let mut slot = self.inner.debounce.lock();
        if let Some(previous) = slot.take() {
            previous.abort();
        }
        *slot = Some(runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            let Some(inner) = weak.upgrade() else {
                return;
            };
            let orchestrator = SyncOrchestrator { inner };
            if orchestrator.inner.status.read().accepts_triggers() {
                debug!("debounced reconnect sync");
                orchestrator.sync(false).await;
            }
        }));
    }

    fn cancel_debounce(&self) {
        if let Some(handle) = self.inner.debounce.lock().take() {
            handle.abort();
        }
    }

    fn start_periodic(&self) {
        let Some(interval) = self.inner.config.periodic_sync_interval else {
            return;
        };
        let Ok(runtime) = Handle::try_current() else {
            warn!("no tokio runtime, periodic sync disabled");
            return;
        };

        let mut slot = self.inner.periodic.lock();
        if slot.is_some() {
            return;
        }

        let weak = Arc::downgrade(&self.inner);
        let rearm = Arc::clone(&self.inner.rearm);
        let shutdown = self.inner.shutdown.clone();
        *slot = Some(runtime.spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    // A completed run restarts the wait.
                    _ = rearm.notified() => continue,
                    _ = tokio::time::sleep(interval) => {}
                }

                let Some(inner) = weak.upgrade() else {
                    break;
                };
                let orchestrator = SyncOrchestrator { inner };
                if orchestrator.inner.status.read().accepts_triggers() {
                    debug!("periodic sync");
                    orchestrator.sync(false).await;
                }
            }
        }));
        debug!(interval_ms = interval.as_millis() as u64, "periodic sync armed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RetryConfig;
    use crate::gateway::MockGateway;
    use chrono::{DateTime, TimeZone};
    use offsync_protocol::{ConflictPolicy, MutationOperation, PullResponse};
    use offsync_store::{MemoryStore, QueueStatus};
    use serde_json::{json, Map};
    use std::time::Duration;

    type Orchestrator = SyncOrchestrator<Arc<MockGateway>, MemoryStore>;

    fn ts(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    fn config() -> SyncConfig {
        SyncConfig::new()
            .with_min_sync_interval(Duration::from_secs(30))
            .with_periodic_sync_interval(None)
            .with_retry(RetryConfig::no_backoff())
            .with_entity_type(EntityTypeConfig::new("artists", 5, Duration::from_secs(3600)))
            .with_entity_type(
                EntityTypeConfig::new("balance", 0, Duration::from_secs(60))
                    .with_conflict_policy(ConflictPolicy::RemoteAuthoritative),
            )
            .with_entity_type(
                EntityTypeConfig::new("preferences", 9, Duration::from_secs(86_400))
                    .with_conflict_policy(ConflictPolicy::LocalPreferred),
            )
    }

    fn orchestrator_with(config: SyncConfig) -> (Orchestrator, Arc<MockGateway>, Arc<MemoryStore>) {
        let gateway = Arc::new(MockGateway::new());
        let store = Arc::new(MemoryStore::new());
        let orchestrator =
            SyncOrchestrator::new(config, Arc::clone(&gateway), Arc::clone(&store)).unwrap();
        orchestrator.set_credential(Credential::bearer("token"));
        (orchestrator, gateway, store)
    }

    fn orchestrator() -> (Orchestrator, Arc<MockGateway>, Arc<MemoryStore>) {
        orchestrator_with(config())
    }

    fn page(records: Vec<RemoteRecord>, at: i64) -> PullResponse {
        PullResponse::new(
            records,
            PullCursor {
                timestamp: ts(at),
                token: Some(format!("tok-{at}")),
            },
        )
    }

    fn record(id: &str, fields: serde_json::Value, version: u64) -> RemoteRecord {
        let fields = match fields {
            serde_json::Value::Object(map) => map,
            _ => Map::new(),
        };
        RemoteRecord::new(id, fields, ModificationMarker::version(version))
    }

    #[test]
    fn new_rejects_invalid_config() {
        let gateway = Arc::new(MockGateway::new());
        let store = Arc::new(MemoryStore::new());
        let result = SyncOrchestrator::new(config().with_queue_concurrency(0), gateway, store);
        assert!(matches!(result, Err(SyncError::InvalidConfig(_))));
    }

    #[tokio::test]
    async fn offline_sync_is_structured_failure() {
        let (orchestrator, gateway, _) = orchestrator();
        orchestrator.set_connectivity(false);

        let result = orchestrator.sync(false).await;
        assert_eq!(result.outcome, RunOutcome::Offline);
        assert_eq!(result.errors, vec!["offline".to_string()]);
        assert_eq!(gateway.pull_count(), 0);

        let status = orchestrator.get_status();
        assert_eq!(status.state, SyncState::Offline);
        assert_eq!(status.sync_count, 0);
    }

    #[tokio::test]
    async fn run_pulls_entity_types_by_priority() {
        let (orchestrator, gateway, _) = orchestrator();
        orchestrator.initialize().await.unwrap();

        let result = orchestrator.sync(false).await;
        assert!(result.is_success(), "{:?}", result.errors);

        let order: Vec<_> = gateway
            .pull_requests()
            .into_iter()
            .map(|r| r.entity_type)
            .collect();
        assert_eq!(order, ["balance", "artists", "preferences"]);

        let status = orchestrator.get_status();
        assert_eq!(status.state, SyncState::Idle);
        assert_eq!(status.progress, 100);
        assert_eq!(status.sync_count, 1);
    }

    #[tokio::test]
    async fn second_sync_within_interval_is_noop() {
        let (orchestrator, gateway, _) = orchestrator();
        let first = orchestrator.sync(false).await;
        let pulls = gateway.pull_count();

        let second = orchestrator.sync(false).await;
        assert!(first.run_id.is_some());
        assert!(second.is_skipped());
        assert!(second.is_success());
        assert_eq!(gateway.pull_count(), pulls);
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_callers_share_one_run() {
        let (orchestrator, gateway, _) = orchestrator();
        gateway.set_latency(Duration::from_millis(200));

        let (a, b) = tokio::join!(orchestrator.sync(false), orchestrator.sync(false));
        assert_eq!(a.run_id, b.run_id);
        assert_eq!(a, b);
        assert_eq!(gateway.pull_count(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn forced_sync_cancels_active_run() {
        let (orchestrator, gateway, _) = orchestrator();
        gateway.set_latency(Duration::from_secs(10));

        let background = orchestrator.clone();
        let first = tokio::spawn(async move { background.sync(false).await });
        tokio::time::sleep(Duration::from_secs(1)).await;

        let second = orchestrator.sync(true).await;
        let first = first.await.unwrap();

        assert!(first.is_cancelled());
        assert!(first.errors.is_empty());
        assert_eq!(second.outcome, RunOutcome::Completed);
        assert_ne!(first.run_id, second.run_id);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_is_distinct_from_error() {
        let (orchestrator, gateway, _) = orchestrator();
        gateway.set_latency(Duration::from_secs(10));

        let background = orchestrator.clone();
        let run = tokio::spawn(async move { background.sync(false).await });
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(orchestrator.get_status().state, SyncState::Syncing);

        assert!(orchestrator.cancel_sync());
        let result = run.await.unwrap();
        assert_eq!(result.outcome, RunOutcome::Cancelled);

        let status = orchestrator.get_status();
        assert_eq!(status.state, SyncState::Idle);
        assert_eq!(status.failed_sync_count, 0);
        assert!(!orchestrator.cancel_sync());
    }

    #[tokio::test]
    async fn entity_failure_does_not_abort_run() {
        let (orchestrator, gateway, store) = orchestrator();
        gateway.script_pull("balance", Err(SyncError::network_retryable("reset")));

        let result = orchestrator.sync(false).await;
        assert_eq!(result.outcome, RunOutcome::Completed);
        assert!(result.entity("balance").unwrap().error.is_some());
        assert!(result.entity("artists").unwrap().is_success());
        assert!(result.entity("preferences").unwrap().is_success());

        let status = orchestrator.get_status();
        assert_eq!(status.state, SyncState::Error);
        assert_eq!(status.last_error.as_deref(), Some("balance: network error: reset"));
        assert_eq!(status.failed_sync_count, 1);

        let meta = store.read(|s| s.metadata("balance").cloned()).unwrap().unwrap();
        assert!(meta.last_error.unwrap().contains("reset"));
        assert!(meta.last_pulled_at.is_none());
    }

    #[tokio::test]
    async fn missing_credential_is_reported() {
        let (orchestrator, gateway, _) = orchestrator();
        orchestrator.clear_credential();

        let result = orchestrator.sync(false).await;
        assert!(!result.is_success());
        assert!(result.errors.iter().any(|e| e.contains("unauthorized")));
        assert_eq!(gateway.pull_count(), 0);
    }

    #[tokio::test]
    async fn pending_flag_cleared_after_successful_cycle() {
        let (orchestrator, _, store) = orchestrator();
        orchestrator
            .queue()
            .enqueue("artists", "a1", MutationOperation::Update, json!({"name": "X"}), 0)
            .unwrap();
        assert!(orchestrator.metadata().needs_sync("artists").unwrap());

        let result = orchestrator.sync(false).await;
        assert_eq!(result.pushed, 1);
        let meta = store.read(|s| s.metadata("artists").cloned()).unwrap().unwrap();
        assert!(!meta.needs_sync);
        assert!(meta.last_pushed_at.is_some());
        assert!(meta.is_initial_sync_complete);
    }

    #[tokio::test]
    async fn pending_flag_kept_when_push_fails() {
        let (orchestrator, gateway, _) = orchestrator();
        gateway.script_push("artists", Err(SyncError::Timeout));
        orchestrator
            .queue()
            .enqueue("artists", "a1", MutationOperation::Update, json!({}), 0)
            .unwrap();

        let result = orchestrator.sync(false).await;
        assert_eq!(result.push_failed, 1);
        assert!(orchestrator.metadata().needs_sync("artists").unwrap());
    }

    #[tokio::test]
    async fn paged_pull_applies_every_page() {
        let (orchestrator, gateway, store) = orchestrator();
        gateway.script_pull(
            "artists",
            Ok(page(vec![record("a1", json!({"name": "A"}), 1)], 100).with_more()),
        );
        gateway.script_pull("artists", Ok(page(vec![record("a2", json!({"name": "B"}), 1)], 200)));

        let result = orchestrator.sync_entity("artists").await.unwrap();
        let artists = result.entity("artists").unwrap();
        assert_eq!(artists.pages, 2);
        assert_eq!(artists.applied, 2);

        let requests = gateway.pull_requests();
        assert_eq!(requests[1].since, Some(ts(100)));
        assert_eq!(requests[1].sync_token.as_deref(), Some("tok-100"));

        let meta = store.read(|s| s.metadata("artists").cloned()).unwrap().unwrap();
        assert_eq!(meta.last_pulled_at, Some(ts(200)));
        assert!(meta.is_initial_sync_complete);
        assert_eq!(store.read(|s| s.record_count("artists")).unwrap(), 2);
    }

    #[tokio::test]
    async fn remote_delete_removes_local_record() {
        let (orchestrator, gateway, store) = orchestrator();
        store
            .write(|s| {
                s.put_record(
                    "artists",
                    LocalRecord::new("a1", Map::new(), ModificationMarker::version(1), Utc::now()),
                );
                Ok(())
            })
            .unwrap();
        gateway.script_pull(
            "artists",
            Ok(page(vec![RemoteRecord::tombstone("a1", ModificationMarker::version(2))], 50)),
        );

        let result = orchestrator.sync_entity("artists").await.unwrap();
        assert_eq!(result.entity("artists").unwrap().deleted, 1);
        assert!(store.read(|s| s.record("artists", "a1").is_none()).unwrap());
    }

    #[tokio::test]
    async fn newer_local_write_survives_pull() {
        let (orchestrator, gateway, store) = orchestrator();
        store
            .write(|s| {
                let fields = match json!({"name": "local"}) {
                    serde_json::Value::Object(map) => map,
                    _ => Map::new(),
                };
                s.put_record(
                    "artists",
                    LocalRecord::new("a1", fields, ModificationMarker::version(5), Utc::now()),
                );
                Ok(())
            })
            .unwrap();
        gateway.script_push("artists", Err(SyncError::Timeout));
        orchestrator
            .queue()
            .enqueue("artists", "a1", MutationOperation::Update, json!({"name": "local"}), 0)
            .unwrap();
        gateway.script_pull("artists", Ok(page(vec![record("a1", json!({"name": "remote"}), 3)], 10)));

        let result = orchestrator.sync(false).await;
        let artists = result.entity("artists").unwrap();
        assert_eq!(artists.conflicts, 1);
        assert_eq!(artists.kept_local, 1);

        let local = store.read(|s| s.record("artists", "a1").cloned()).unwrap().unwrap();
        assert_eq!(local.fields["name"], json!("local"));
        assert_eq!(orchestrator.queue().get_stats().unwrap().failed, 1);
    }

    #[tokio::test]
    async fn local_win_without_local_record_keeps_queued_write() {
        let (orchestrator, gateway, store) = orchestrator();
        gateway.script_push("preferences", Err(SyncError::Timeout));
        orchestrator
            .queue()
            .enqueue("preferences", "theme", MutationOperation::Create, json!({"v": "dark"}), 0)
            .unwrap();
        gateway.script_pull(
            "preferences",
            Ok(page(
                vec![RemoteRecord::new("theme", Map::new(), ModificationMarker::default())],
                10,
            )),
        );

        let result = orchestrator.sync(false).await;
        assert_eq!(result.outcome, RunOutcome::Completed);
        let preferences = result.entity("preferences").unwrap();
        assert!(preferences.is_success());
        assert_eq!(preferences.conflicts, 1);
        assert_eq!(preferences.kept_local, 1);

        let meta = orchestrator.metadata().get("preferences").unwrap().unwrap();
        assert_eq!(meta.last_pulled_at, Some(ts(10)));
        assert!(store.read(|s| s.record("preferences", "theme").is_none()).unwrap());
        assert_eq!(orchestrator.queue().get_stats().unwrap().failed, 1);
    }

    #[tokio::test]
    async fn remote_win_parks_conflicting_write() {
        let (orchestrator, gateway, _) = orchestrator();
        gateway.script_push("artists", Err(SyncError::Timeout));
        orchestrator
            .queue()
            .enqueue("artists", "a1", MutationOperation::Update, json!({"name": "local"}), 0)
            .unwrap();
        gateway.script_pull("artists", Ok(page(vec![record("a1", json!({"name": "remote"}), 3)], 10)));

        let result = orchestrator.sync(false).await;
        assert_eq!(result.entity("artists").unwrap().applied, 1);

        let item = &orchestrator.queue().items(Some(QueueStatus::Failed)).unwrap()[0];
        assert!(item.is_parked(orchestrator.config().max_retry));
        assert_eq!(item.last_error.as_deref(), Some("superseded by remote"));

        let pushes = gateway.push_count();
        orchestrator.sync(true).await;
        assert_eq!(gateway.push_count(), pushes);
    }

    #[tokio::test]
    async fn sync_entity_rejects_unknown_type() {
        let (orchestrator, _, _) = orchestrator();
        assert!(matches!(
            orchestrator.sync_entity("events").await,
            Err(SyncError::UnknownEntityType(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn periodic_timer_rearms_after_each_run() {
        let (orchestrator, _, _) = orchestrator_with(
            config()
                .with_min_sync_interval(Duration::ZERO)
                .with_periodic_sync_interval(Some(Duration::from_secs(60))),
        );
        orchestrator.initialize().await.unwrap();

        tokio::time::sleep(Duration::from_secs(61)).await;
        assert_eq!(orchestrator.get_status().sync_count, 1);

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(orchestrator.get_status().sync_count, 2);

        orchestrator.pause_sync();
        tokio::time::sleep(Duration::from_secs(180)).await;
        assert_eq!(orchestrator.get_status().sync_count, 2);
        assert_eq!(orchestrator.get_status().state, SyncState::Paused);

        orchestrator.resume_sync();
        tokio::time::sleep(Duration::from_secs(61)).await;
        assert_eq!(orchestrator.get_status().sync_count, 3);

        orchestrator.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn foreground_respects_throttle() {
        let (orchestrator, _, _) = orchestrator();
        assert!(orchestrator.on_foreground());
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(orchestrator.get_status().sync_count, 1);

        assert!(!orchestrator.on_foreground());
        tokio::time::sleep(Duration::from_secs(31)).await;
        assert!(orchestrator.on_foreground());
    }

    #[tokio::test(start_paused = true)]
    async fn background_blocks_reconnect_until_foreground() {
        let (orchestrator, gateway, _) =
            orchestrator_with(config().with_reconnect_debounce(Duration::from_millis(300)));
        orchestrator.on_background();

        orchestrator.set_connectivity(false);
        orchestrator.set_connectivity(true);
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(orchestrator.get_status().sync_count, 0);
        assert_eq!(gateway.pull_count(), 0);

        assert!(orchestrator.on_foreground());
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(orchestrator.get_status().sync_count, 1);
        assert_eq!(gateway.pull_count(), 3);
    }

    #[tokio::test]
    async fn shutdown_refuses_new_runs() {
        let (orchestrator, _, _) = orchestrator();
        orchestrator.shutdown().await;
        let result = orchestrator.sync(true).await;
        assert_eq!(result.outcome, RunOutcome::Aborted);
        assert!(matches!(orchestrator.initialize().await, Err(SyncError::Shutdown)));
    }
}
