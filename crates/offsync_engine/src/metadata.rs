//! Per entity type sync bookkeeping on top of the local store.

use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use chrono::{DateTime, Utc};
use offsync_store::{EntitySyncMetadata, LocalStore};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Reads and maintains [`EntitySyncMetadata`] rows.
///
/// Staleness thresholds come from configuration, never from the rows.
pub struct MetadataTracker<S> {
    store: Arc<S>,
    thresholds: BTreeMap<String, Duration>,
}

impl<S: LocalStore> MetadataTracker<S> {
    /// Creates a tracker for the entity types in `config`.
    pub fn new(config: &SyncConfig, store: Arc<S>) -> Self {
        Self {
            store,
            thresholds: config
                .entity_types
                .iter()
                .map(|t| (t.name.clone(), t.staleness_threshold))
                .collect(),
        }
    }

    /// Creates a row for every configured type that has none and refreshes
    /// pending counts from the queue. Returns the number of rows created.
    pub fn ensure_configured(&self) -> SyncResult<usize> {
        Ok(self.store.write(|state| {
            let mut created = 0;
            for name in self.thresholds.keys() {
                if state.metadata(name).is_none() {
                    created += 1;
                }
                let open = state.open_count(name);
                let meta = state.metadata_mut(name);
                meta.pending_changes_count = open;
                if open > 0 {
                    meta.needs_sync = true;
                }
            }
            Ok(created)
        })?)
    }

    /// Returns the row for `entity_type`.
    pub fn get(&self, entity_type: &str) -> SyncResult<Option<EntitySyncMetadata>> {
        Ok(self.store.read(|state| state.metadata(entity_type).cloned())?)
    }

    /// Returns every row.
    pub fn all(&self) -> SyncResult<Vec<EntitySyncMetadata>> {
        Ok(self
            .store
            .read(|state| state.metadata.values().cloned().collect())?)
    }

    /// Returns true if a local mutation is recorded against `entity_type`
    /// and not yet reconciled.
    pub fn needs_sync(&self, entity_type: &str) -> SyncResult<bool> {
        Ok(self.get(entity_type)?.is_some_and(|m| m.needs_sync))
    }

    /// Returns true if `entity_type` was last pulled longer ago than its
    /// configured threshold.
    pub fn is_stale(&self, entity_type: &str, now: DateTime<Utc>) -> SyncResult<bool> {
        let threshold = self.threshold(entity_type)?;
        Ok(self
            .get(entity_type)?
            .map_or(true, |m| m.is_stale(threshold, now)))
    }

    /// Returns true if `entity_type` should be pulled by a run at `now`.
    pub fn should_sync(&self, entity_type: &str, now: DateTime<Utc>) -> SyncResult<bool> {
        let threshold = self.threshold(entity_type)?;
        Ok(self
            .get(entity_type)?
            .map_or(true, |m| should_sync(&m, threshold, now)))
    }

    /// Returns the configured staleness threshold.
    pub fn threshold(&self, entity_type: &str) -> SyncResult<Duration> {
        self.thresholds
            .get(entity_type)
            .copied()
            .ok_or_else(|| SyncError::UnknownEntityType(entity_type.to_string()))
    }

    /// Records an error against `entity_type`.
    pub fn record_error(&self, entity_type: &str, message: &str) -> SyncResult<()> {
        Ok(self.store.write(|state| {
            state.metadata_mut(entity_type).record_error(message);
            Ok(())
        })?)
    }

    /// Forgets the cursor of `entity_type` so the next run does a full pull.
    pub fn reset_entity(&self, entity_type: &str) -> SyncResult<()> {
        self.threshold(entity_type)?;
        self.store.write(|state| {
            state.metadata_mut(entity_type).reset();
            Ok(())
        })?;
        info!(entity_type, "sync metadata reset");
        Ok(())
    }

    /// Forgets every cursor. Returns the number of rows reset.
    pub fn reset_all(&self) -> SyncResult<usize> {
        let reset = self.store.write(|state| {
            for meta in state.metadata.values_mut() {
                meta.reset();
            }
            Ok(state.metadata.len())
        })?;
        info!(reset, "all sync metadata reset");
        Ok(reset)
    }
}

/// Returns true if a row needs a pull: pending local writes or stale.
pub fn should_sync(meta: &EntitySyncMetadata, threshold: Duration, now: DateTime<Utc>) -> bool {
    meta.needs_sync || meta.is_stale(threshold, now)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EntityTypeConfig;
    use chrono::TimeZone;
    use offsync_protocol::{MutationOperation, PullCursor};
    use offsync_store::{MemoryStore, MutationQueueItem};
    use serde_json::json;

    fn ts(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    fn tracker() -> (MetadataTracker<MemoryStore>, Arc<MemoryStore>) {
        let config = SyncConfig::new()
            .with_entity_type(EntityTypeConfig::new("balance", 0, Duration::from_secs(60)))
            .with_entity_type(EntityTypeConfig::new("artists", 5, Duration::from_secs(86_400)));
        let store = Arc::new(MemoryStore::new());
        (MetadataTracker::new(&config, Arc::clone(&store)), store)
    }

    fn pulled_at(store: &MemoryStore, entity_type: &str, secs: i64) {
        store
            .write(|s| {
                s.metadata_mut(entity_type).advance_cursor(&PullCursor {
                    timestamp: ts(secs),
                    token: None,
                });
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn ensure_creates_rows_and_counts_pending() {
        let (tracker, store) = tracker();
        store
            .write(|s| {
                let item = MutationQueueItem::new(
                    "artists",
                    "a1",
                    MutationOperation::Update,
                    json!({}),
                    0,
                    Utc::now(),
                );
                s.queue.insert(item.id, item);
                Ok(())
            })
            .unwrap();

        assert_eq!(tracker.ensure_configured().unwrap(), 2);
        assert_eq!(tracker.ensure_configured().unwrap(), 0);
        assert!(tracker.needs_sync("artists").unwrap());
        assert!(!tracker.needs_sync("balance").unwrap());
        assert_eq!(tracker.get("artists").unwrap().unwrap().pending_changes_count, 1);
    }

    #[test]
    fn staleness_uses_per_type_threshold() {
        let (tracker, store) = tracker();
        pulled_at(&store, "balance", 1_000);
        pulled_at(&store, "artists", 1_000);

        let now = ts(1_000 + 120);
        assert!(tracker.is_stale("balance", now).unwrap());
        assert!(!tracker.is_stale("artists", now).unwrap());
        assert!(tracker.should_sync("balance", now).unwrap());
        assert!(!tracker.should_sync("artists", now).unwrap());
    }

    #[test]
    fn unknown_type_is_an_error() {
        let (tracker, _) = tracker();
        assert!(matches!(
            tracker.is_stale("events", Utc::now()),
            Err(SyncError::UnknownEntityType(_))
        ));
        assert!(tracker.reset_entity("events").is_err());
    }

    #[test]
    fn reset_forces_full_resync() {
        let (tracker, store) = tracker();
        pulled_at(&store, "balance", 1_000);
        pulled_at(&store, "artists", 1_000);

        tracker.reset_entity("balance").unwrap();
        assert!(tracker.get("balance").unwrap().unwrap().last_pulled_at.is_none());
        assert!(tracker.get("artists").unwrap().unwrap().last_pulled_at.is_some());

        assert_eq!(tracker.reset_all().unwrap(), 2);
        assert!(tracker.all().unwrap().iter().all(|m| m.last_pulled_at.is_none()));
    }
}
