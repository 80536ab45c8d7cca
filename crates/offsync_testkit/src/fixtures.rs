//! Test fixtures and orchestrator helpers.
//!
//! Provides the entity type catalogue used across tests and a harness that
//! wires an orchestrator to an [`InMemoryRemote`].

use crate::remote::InMemoryRemote;
use chrono::{DateTime, TimeZone, Utc};
use offsync_engine::{
    Credential, EntityTypeConfig, RetryConfig, SyncConfig, SyncOrchestrator,
};
use offsync_protocol::{ConflictPolicy, FieldMapping};
use offsync_store::{FileStore, LocalStore, MemoryStore};
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

/// Bearer token the harness authenticates with.
pub const TEST_TOKEN: &str = "test-token";

/// The sample entity type catalogue.
///
/// | type        | priority | stale after | policy               |
/// |-------------|----------|-------------|----------------------|
/// | balance     | 0        | 1 min       | remote authoritative |
/// | tickets     | 1        | 5 min       | last write wins      |
/// | artists     | 2        | 1 h         | last write wins      |
/// | events      | 3        | 1 day       | last write wins      |
/// | preferences | 5        | 1 day       | local preferred      |
///
/// Tickets map the wire field `seat_label` to the local field `seat`.
pub fn sample_config() -> SyncConfig {
    SyncConfig::new()
        .with_min_sync_interval(Duration::from_secs(30))
        .with_periodic_sync_interval(None)
        .with_reconnect_debounce(Duration::from_secs(2))
        .with_retry(RetryConfig::no_backoff())
        .with_entity_type(
            EntityTypeConfig::new("balance", 0, Duration::from_secs(60))
                .with_conflict_policy(ConflictPolicy::RemoteAuthoritative),
        )
        .with_entity_type(EntityTypeConfig::new("tickets", 1, Duration::from_secs(300)))
        .with_entity_type(EntityTypeConfig::new("artists", 2, Duration::from_secs(3_600)))
        .with_entity_type(EntityTypeConfig::new("events", 3, Duration::from_secs(86_400)))
        .with_entity_type(
            EntityTypeConfig::new("preferences", 5, Duration::from_secs(86_400))
                .with_conflict_policy(ConflictPolicy::LocalPreferred),
        )
        .with_field_mapping(FieldMapping::new("tickets").field("seat_label", "seat"))
}

/// Returns the UTC instant `secs` seconds after the Unix epoch.
pub fn ts(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(secs, 0).single().expect("timestamp in range")
}

/// Converts a JSON object literal into a field map.
pub fn fields(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        other => panic!("expected a JSON object, got {other}"),
    }
}

/// An orchestrator wired to an in-memory remote.
pub struct Harness<S: LocalStore + 'static = MemoryStore> {
    /// The remote backend.
    pub remote: InMemoryRemote,
    /// The local store.
    pub store: Arc<S>,
    /// The orchestrator under test.
    pub orchestrator: SyncOrchestrator<InMemoryRemote, S>,
}

impl Harness<MemoryStore> {
    /// Creates a harness over the sample configuration and a memory store.
    pub fn new() -> Self {
        Self::with_config(sample_config())
    }

    /// Creates a harness over `config` and a memory store.
    pub fn with_config(config: SyncConfig) -> Self {
        Self::with_store(config, Arc::new(MemoryStore::new()))
    }
}

impl Default for Harness<MemoryStore> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: LocalStore + 'static> Harness<S> {
    /// Creates a harness over `config` and `store`, authenticated with
    /// [`TEST_TOKEN`].
    pub fn with_store(config: SyncConfig, store: Arc<S>) -> Self {
        let remote = InMemoryRemote::new();
        let orchestrator = SyncOrchestrator::new(config, remote.clone(), Arc::clone(&store))
            .expect("valid test configuration");
        orchestrator.set_credential(Credential::bearer(TEST_TOKEN));
        Self {
            remote,
            store,
            orchestrator,
        }
    }
}

/// A file store in a temporary directory.
pub struct TempFileStore {
    /// The temporary directory (kept alive to prevent cleanup).
    pub dir: TempDir,
}

impl TempFileStore {
    /// Creates an empty directory.
    pub fn new() -> Self {
        Self {
            dir: TempDir::new().expect("Failed to create temp directory"),
        }
    }

    /// Opens the store, as an app start would.
    pub fn open(&self) -> FileStore {
        FileStore::open(self.dir.path()).expect("Failed to open file store")
    }
}

impl Default for TempFileStore {
    fn default() -> Self {
        Self::new()
    }
}
