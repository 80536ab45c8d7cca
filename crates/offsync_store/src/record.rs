//! Domain records as held by the local store.

use chrono::{DateTime, Utc};
use offsync_protocol::{Marked, ModificationMarker};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A domain record in local naming.
///
/// The sync core does not interpret `fields`; it only needs the marker to
/// resolve conflicts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocalRecord {
    /// Identifier of the entity within its type.
    pub entity_id: String,
    /// Field values in local naming.
    pub fields: Map<String, Value>,
    /// Local modification marker.
    #[serde(default)]
    pub marker: ModificationMarker,
    /// When the record was last written locally.
    pub updated_at: DateTime<Utc>,
}

impl LocalRecord {
    /// Creates a record.
    pub fn new(
        entity_id: impl Into<String>,
        fields: Map<String, Value>,
        marker: ModificationMarker,
        updated_at: DateTime<Utc>,
    ) -> Self {
        Self {
            entity_id: entity_id.into(),
            fields,
            marker,
            updated_at,
        }
    }
}

impl Marked for LocalRecord {
    fn marker(&self) -> &ModificationMarker {
        &self.marker
    }
}
