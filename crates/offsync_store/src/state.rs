//! The complete persisted state of a local store.

use crate::metadata::EntitySyncMetadata;
use crate::queue_item::{MutationQueueItem, QueueStatus};
use crate::record::LocalRecord;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Everything a [`crate::LocalStore`] persists.
///
/// Stores hand out `&mut StoreState` only inside a write transaction; the
/// helpers here never do I/O.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoreState {
    /// Metadata keyed by entity type.
    #[serde(default)]
    pub metadata: BTreeMap<String, EntitySyncMetadata>,
    /// Queue items keyed by id.
    #[serde(default)]
    pub queue: BTreeMap<Uuid, MutationQueueItem>,
    /// Domain records keyed by entity type, then entity id.
    #[serde(default)]
    pub records: BTreeMap<String, BTreeMap<String, LocalRecord>>,
}

impl StoreState {
    /// Returns metadata for `entity_type`, if it was ever created.
    pub fn metadata(&self, entity_type: &str) -> Option<&EntitySyncMetadata> {
        self.metadata.get(entity_type)
    }

    /// Returns metadata for `entity_type`, creating it on first use.
    pub fn metadata_mut(&mut self, entity_type: &str) -> &mut EntitySyncMetadata {
        self.metadata
            .entry(entity_type.to_string())
            .or_insert_with(|| EntitySyncMetadata::new(entity_type))
    }

    /// Returns the open (pending or failed) item for an entity, if any.
    pub fn open_item(&self, entity_type: &str, entity_id: &str) -> Option<&MutationQueueItem> {
        self.queue.values().find(|item| {
            item.status.is_open() && item.entity_type == entity_type && item.entity_id == entity_id
        })
    }

    /// Mutable variant of [`StoreState::open_item`].
    pub fn open_item_mut(
        &mut self,
        entity_type: &str,
        entity_id: &str,
    ) -> Option<&mut MutationQueueItem> {
        self.queue.values_mut().find(|item| {
            item.status.is_open() && item.entity_type == entity_type && item.entity_id == entity_id
        })
    }

    /// Returns true if the record has a local write not yet acknowledged.
    pub fn has_pending_write(&self, entity_type: &str, entity_id: &str) -> bool {
        self.queue.values().any(|item| {
            item.entity_type == entity_type
                && item.entity_id == entity_id
                && item.status != QueueStatus::Completed
        })
    }

    /// Counts open items for an entity type.
    pub fn open_count(&self, entity_type: &str) -> u64 {
        self.queue
            .values()
            .filter(|item| item.entity_type == entity_type && item.status.is_open())
            .count() as u64
    }

    /// Counts items in a given status.
    pub fn count_status(&self, status: QueueStatus) -> usize {
        self.queue
            .values()
            .filter(|item| item.status == status)
            .count()
    }

    /// Returns a local record.
    pub fn record(&self, entity_type: &str, entity_id: &str) -> Option<&LocalRecord> {
        self.records.get(entity_type)?.get(entity_id)
    }

    /// Inserts or replaces a local record.
    pub fn put_record(&mut self, entity_type: &str, record: LocalRecord) {
        self.records
            .entry(entity_type.to_string())
            .or_default()
            .insert(record.entity_id.clone(), record);
    }

    /// Removes a local record, returning it if present.
    pub fn remove_record(&mut self, entity_type: &str, entity_id: &str) -> Option<LocalRecord> {
        let records = self.records.get_mut(entity_type)?;
        let removed = records.remove(entity_id);
        if records.is_empty() {
            self.records.remove(entity_type);
        }
        removed
    }

    /// Counts local records of an entity type.
    pub fn record_count(&self, entity_type: &str) -> usize {
        self.records.get(entity_type).map_or(0, BTreeMap::len)
    }
}
