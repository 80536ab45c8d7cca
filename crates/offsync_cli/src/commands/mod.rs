//! CLI command implementations.

pub mod config_check;
pub mod inspect;
pub mod maintenance;
pub mod queue;

use async_trait::async_trait;
use offsync_engine::{
    Credential, EntityTypeConfig, RemoteSyncGateway, SyncConfig, SyncError, SyncOrchestrator,
    SyncResult,
};
use offsync_protocol::{PullRequest, PullResponse, PushAck, PushRequest};
use offsync_store::{FileStore, LocalStore};
use std::error::Error;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// Staleness threshold assumed for entity types only known from the store.
const DEFAULT_STALENESS: Duration = Duration::from_secs(3_600);

/// Gateway used by maintenance commands. Every call fails as offline.
pub struct OfflineGateway;

#[async_trait]
impl RemoteSyncGateway for OfflineGateway {
    async fn pull(&self, _credential: &Credential, _request: PullRequest) -> SyncResult<PullResponse> {
        Err(SyncError::Offline)
    }

    async fn push(&self, _credential: &Credential, _request: PushRequest) -> SyncResult<PushAck> {
        Err(SyncError::Offline)
    }
}

/// An orchestrator over a store on disk, never talking to a remote.
pub type AdminOrchestrator = SyncOrchestrator<OfflineGateway, FileStore>;

/// Opens an existing store directory.
pub fn open_store(path: &Path) -> Result<Arc<FileStore>, Box<dyn Error>> {
    if !path.is_dir() {
        return Err(format!("No store found at {:?}", path).into());
    }
    Ok(Arc::new(FileStore::open(path)?))
}

/// Reads and validates a TOML configuration file.
pub fn read_config(path: &Path) -> Result<SyncConfig, Box<dyn Error>> {
    let text = std::fs::read_to_string(path)?;
    let config: SyncConfig = toml::from_str(&text)?;
    config.validate()?;
    Ok(config)
}

/// Loads the configuration, or derives one from the entity types the store
/// already tracks.
pub fn load_config(config: Option<&Path>, store: &FileStore) -> Result<SyncConfig, Box<dyn Error>> {
    if let Some(path) = config {
        return read_config(path);
    }

    let names = store.read(|s| s.metadata.keys().cloned().collect::<Vec<_>>())?;
    let config = names.into_iter().fold(
        SyncConfig::new().with_periodic_sync_interval(None),
        |config, name| config.with_entity_type(EntityTypeConfig::new(name, 0, DEFAULT_STALENESS)),
    );
    Ok(config)
}

/// Opens the store at `path` for maintenance.
pub fn admin(path: &Path, config: Option<&Path>) -> Result<AdminOrchestrator, Box<dyn Error>> {
    let store = open_store(path)?;
    let config = load_config(config, &store)?;
    Ok(SyncOrchestrator::new(config, OfflineGateway, store)?)
}
