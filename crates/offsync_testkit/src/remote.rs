//! In-memory remote backend.
//!
//! Behaves like a well-formed sync backend:
//!
//! - Deltas are served in `(changed_at, entity_id)` order, paged by `limit`
//! - Every write ticks a private clock, so change times are unique
//! - A push whose idempotency key and payload were already applied is
//!   acknowledged without being applied again
//!
//! The same instance can sit behind [`offsync_engine::HttpGateway`] through
//! [`offsync_engine::LoopbackClient`], since it also implements
//! [`LoopbackServer`].

use async_trait::async_trait;
use chrono::{DateTime, Duration, DurationRound, Utc};
use offsync_engine::{
    Credential, HttpResponse, LoopbackServer, RemoteSyncGateway, SyncError, SyncResult,
};
use offsync_protocol::{
    merge_fields, IdempotencyKey, ModificationMarker, MutationOperation, PullCursor, PullRequest,
    PullResponse, PushAck, PushRejection, PushRequest, RemoteRecord,
};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Clone)]
struct Stored {
    record: RemoteRecord,
    changed_at: DateTime<Utc>,
}

#[derive(Debug)]
struct RemoteState {
    epoch: DateTime<Utc>,
    ticks: i64,
    tables: BTreeMap<String, BTreeMap<String, Stored>>,
    applied: HashMap<IdempotencyKey, Value>,
    applications: usize,
    duplicates: usize,
    rejections: HashMap<(String, String), String>,
    failing_pushes: usize,
    offline: bool,
    pulls: usize,
    pushes: usize,
    token: Option<String>,
}

impl RemoteState {
    fn new() -> Self {
        let now = Utc::now();
        Self {
            epoch: now.duration_trunc(Duration::seconds(1)).unwrap_or(now),
            ticks: 0,
            tables: BTreeMap::new(),
            applied: HashMap::new(),
            applications: 0,
            duplicates: 0,
            rejections: HashMap::new(),
            failing_pushes: 0,
            offline: false,
            pulls: 0,
            pushes: 0,
            token: None,
        }
    }

    fn clock(&self) -> DateTime<Utc> {
        self.epoch + Duration::milliseconds(self.ticks)
    }

    fn tick(&mut self) -> DateTime<Utc> {
        self.ticks += 1;
        self.clock()
    }

    fn authorize(&self, credential: &str) -> SyncResult<()> {
        match &self.token {
            Some(expected) if expected != credential => Err(SyncError::Unauthorized),
            _ => Ok(()),
        }
    }

    fn store(&mut self, entity_type: &str, entity_id: &str, fields: Option<Map<String, Value>>) {
        let at = self.tick();
        let table = self.tables.entry(entity_type.to_string()).or_default();
        let version = table
            .get(entity_id)
            .and_then(|s| s.record.marker.version)
            .unwrap_or(0)
            + 1;
        let marker = ModificationMarker {
            version: Some(version),
            modified_at: Some(at),
        };
        let record = match fields {
            Some(fields) => RemoteRecord::new(entity_id, fields, marker),
            None => RemoteRecord::tombstone(entity_id, marker),
        };
        table.insert(
            entity_id.to_string(),
            Stored {
                record,
                changed_at: at,
            },
        );
    }

    fn merged(&self, entity_type: &str, entity_id: &str, payload: Value) -> Map<String, Value> {
        let mut current = self
            .tables
            .get(entity_type)
            .and_then(|t| t.get(entity_id))
            .filter(|s| !s.record.deleted)
            .map(|s| Value::Object(s.record.fields.clone()))
            .unwrap_or_else(|| Value::Object(Map::new()));
        merge_fields(&mut current, payload);
        match current {
            Value::Object(map) => map,
            _ => Map::new(),
        }
    }

    fn pull(&mut self, credential: &str, request: &PullRequest) -> SyncResult<PullResponse> {
        self.pulls += 1;
        if self.offline {
            return Err(SyncError::network_retryable("remote unreachable"));
        }
        self.authorize(credential)?;

        let mut changed: Vec<&Stored> = self
            .tables
            .get(&request.entity_type)
            .map(|table| {
                table
                    .values()
                    .filter(|s| request.since.map_or(true, |since| s.changed_at > since))
                    .collect()
            })
            .unwrap_or_default();
        changed.sort_by(|a, b| {
            a.changed_at
                .cmp(&b.changed_at)
                .then_with(|| a.record.entity_id.cmp(&b.record.entity_id))
        });

        let limit = request.limit.max(1) as usize;
        let has_more = changed.len() > limit;
        let page: Vec<&Stored> = changed.into_iter().take(limit).collect();
        let timestamp = match page.last() {
            Some(last) if has_more => last.changed_at,
            _ => self.clock(),
        };
        let records = page.into_iter().map(|s| s.record.clone()).collect();

        let cursor = PullCursor {
            timestamp,
            token: Some(format!("{}@{}", request.entity_type, timestamp.timestamp_millis())),
        };
        let response = PullResponse::new(records, cursor);
        Ok(if has_more { response.with_more() } else { response })
    }

    fn push(&mut self, credential: &str, request: PushRequest) -> SyncResult<PushAck> {
        self.pushes += 1;
        if self.offline {
            return Err(SyncError::network_retryable("remote unreachable"));
        }
        self.authorize(credential)?;
        if self.failing_pushes > 0 {
            self.failing_pushes -= 1;
            return Err(SyncError::network_retryable("injected failure"));
        }

        let entity_type = request.entity_type;
        let mut ack = PushAck::default();
        for mutation in request.mutations {
            let id = mutation.entity_id;
            if let Some(reason) = self.rejections.get(&(entity_type.clone(), id.clone())) {
                ack.rejected.push(PushRejection {
                    entity_id: id,
                    reason: reason.clone(),
                });
                continue;
            }
            if self.applied.get(&mutation.idempotency_key) == Some(&mutation.payload) {
                debug!(key = %mutation.idempotency_key, "duplicate push ignored");
                self.duplicates += 1;
                ack.accepted.push(id);
                continue;
            }

            match mutation.operation {
                MutationOperation::Delete => self.store(&entity_type, &id, None),
                MutationOperation::Create | MutationOperation::Update => {
                    let fields = self.merged(&entity_type, &id, mutation.payload.clone());
                    self.store(&entity_type, &id, Some(fields));
                }
            }
            self.applications += 1;
            self.applied.insert(mutation.idempotency_key, mutation.payload);
            ack.accepted.push(id);
        }
        Ok(ack)
    }
}

/// A deterministic in-memory sync backend.
///
/// Cheap to clone; clones share the same data.
#[derive(Debug, Clone)]
pub struct InMemoryRemote {
    state: Arc<Mutex<RemoteState>>,
}

impl Default for InMemoryRemote {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryRemote {
    /// Creates an empty remote that accepts any credential.
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(RemoteState::new())),
        }
    }

    /// Only accepts requests carrying `token`.
    pub fn with_token(self, token: impl Into<String>) -> Self {
        self.state.lock().token = Some(token.into());
        self
    }

    /// Creates or replaces a record on the remote side.
    pub fn seed(&self, entity_type: &str, entity_id: &str, fields: Value) {
        let fields = match fields {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        self.state.lock().store(entity_type, entity_id, Some(fields));
    }

    /// Edits a record on the remote side, merging `fields`.
    pub fn edit(&self, entity_type: &str, entity_id: &str, fields: Value) {
        let mut state = self.state.lock();
        let merged = state.merged(entity_type, entity_id, fields);
        state.store(entity_type, entity_id, Some(merged));
    }

    /// Deletes a record on the remote side, leaving a tombstone.
    pub fn delete(&self, entity_type: &str, entity_id: &str) {
        self.state.lock().store(entity_type, entity_id, None);
    }

    /// Returns a record, tombstones included.
    pub fn record(&self, entity_type: &str, entity_id: &str) -> Option<RemoteRecord> {
        self.state
            .lock()
            .tables
            .get(entity_type)
            .and_then(|t| t.get(entity_id))
            .map(|s| s.record.clone())
    }

    /// Returns the live records of `entity_type`.
    pub fn records(&self, entity_type: &str) -> Vec<RemoteRecord> {
        self.state
            .lock()
            .tables
            .get(entity_type)
            .map(|t| {
                t.values()
                    .filter(|s| !s.record.deleted)
                    .map(|s| s.record.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Refuses every push of `entity_id` as invalid.
    pub fn reject(&self, entity_type: &str, entity_id: &str, reason: &str) {
        self.state
            .lock()
            .rejections
            .insert((entity_type.to_string(), entity_id.to_string()), reason.to_string());
    }

    /// Fails the next `count` pushes with a retryable error.
    pub fn fail_next_pushes(&self, count: usize) {
        self.state.lock().failing_pushes = count;
    }

    /// Makes every call fail as unreachable.
    pub fn set_offline(&self, offline: bool) {
        self.state.lock().offline = offline;
    }

    /// Returns the current remote clock.
    pub fn now(&self) -> DateTime<Utc> {
        self.state.lock().clock()
    }

    /// Returns how many mutations were applied.
    pub fn applications(&self) -> usize {
        self.state.lock().applications
    }

    /// Returns how many redelivered mutations were ignored.
    pub fn duplicates(&self) -> usize {
        self.state.lock().duplicates
    }

    /// Returns how many pulls were received.
    pub fn pull_count(&self) -> usize {
        self.state.lock().pulls
    }

    /// Returns how many pushes were received.
    pub fn push_count(&self) -> usize {
        self.state.lock().pushes
    }
}

#[async_trait]
impl RemoteSyncGateway for InMemoryRemote {
    async fn pull(&self, credential: &Credential, request: PullRequest) -> SyncResult<PullResponse> {
        self.state.lock().pull(credential.token(), &request)
    }

    async fn push(&self, credential: &Credential, request: PushRequest) -> SyncResult<PushAck> {
        self.state.lock().push(credential.token(), request)
    }
}

impl LoopbackServer for InMemoryRemote {
    fn handle_post(&self, path: &str, authorization: &str, body: &[u8]) -> HttpResponse {
        let token = authorization.strip_prefix("Bearer ").unwrap_or("");
        let mut parts = path.trim_start_matches("/sync/").splitn(2, '/');
        let (Some(entity_type), Some(action)) = (parts.next(), parts.next()) else {
            return HttpResponse::new(404, "not found");
        };

        match action {
            "pull" => match serde_json::from_slice::<PullRequest>(body) {
                Ok(request) if request.entity_type == entity_type => {
                    respond(self.state.lock().pull(token, &request))
                }
                Ok(_) => HttpResponse::new(400, "entity type mismatch"),
                Err(e) => HttpResponse::new(400, e.to_string()),
            },
            "push" => match serde_json::from_slice::<PushRequest>(body) {
                Ok(request) if request.entity_type == entity_type => {
                    respond(self.state.lock().push(token, request))
                }
                Ok(_) => HttpResponse::new(400, "entity type mismatch"),
                Err(e) => HttpResponse::new(400, e.to_string()),
            },
            _ => HttpResponse::new(404, "not found"),
        }
    }
}

fn respond<T: Serialize>(result: SyncResult<T>) -> HttpResponse {
    match result {
        Ok(body) => HttpResponse::json(&body),
        Err(SyncError::Unauthorized) => HttpResponse::new(401, "unauthorized"),
        Err(SyncError::Validation { reason, .. }) => HttpResponse::new(422, reason),
        Err(e) => HttpResponse::new(503, e.to_string()),
    }
}
