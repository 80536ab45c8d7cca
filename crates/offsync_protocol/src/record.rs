//! Records exchanged with the remote and their modification markers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::cmp::Ordering;

/// Modification marker carried by a record on either side.
///
/// A marker holds a monotonically increasing version, a modification
/// timestamp, or both. Versions are compared before timestamps when both
/// sides carry one.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModificationMarker {
    /// Monotonic revision number.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<u64>,
    /// Last modification time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modified_at: Option<DateTime<Utc>>,
}

/// Which of two markers is more recent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Newer {
    /// The local side is strictly newer.
    Local,
    /// The remote side is strictly newer.
    Remote,
    /// Neither side can be shown to be newer.
    Tie,
}

impl ModificationMarker {
    /// Creates a marker from a timestamp.
    pub fn at(modified_at: DateTime<Utc>) -> Self {
        Self {
            version: None,
            modified_at: Some(modified_at),
        }
    }

    /// Creates a marker from a version number.
    pub fn version(version: u64) -> Self {
        Self {
            version: Some(version),
            modified_at: None,
        }
    }

    /// Returns true if the marker carries no information.
    pub fn is_empty(&self) -> bool {
        self.version.is_none() && self.modified_at.is_none()
    }

    /// Compares a local marker against a remote one.
    ///
    /// Total for every pair of inputs: comparable fields decide first
    /// (version, then timestamp); otherwise a side with any marker beats a
    /// side with none; two blank or incomparable markers tie.
    pub fn newer(local: &ModificationMarker, remote: &ModificationMarker) -> Newer {
        let ordering = match (local.version, remote.version) {
            (Some(l), Some(r)) => Some(l.cmp(&r)),
            _ => match (local.modified_at, remote.modified_at) {
                (Some(l), Some(r)) => Some(l.cmp(&r)),
                _ => None,
            },
        };

        match ordering {
            Some(Ordering::Greater) => Newer::Local,
            Some(Ordering::Less) => Newer::Remote,
            Some(Ordering::Equal) => Newer::Tie,
            None => match (local.is_empty(), remote.is_empty()) {
                (false, true) => Newer::Local,
                (true, false) => Newer::Remote,
                _ => Newer::Tie,
            },
        }
    }
}

/// Anything that exposes a modification marker.
pub trait Marked {
    /// Returns the record's modification marker.
    fn marker(&self) -> &ModificationMarker;
}

impl Marked for ModificationMarker {
    fn marker(&self) -> &ModificationMarker {
        self
    }
}

/// A record returned by a delta pull.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteRecord {
    /// Identifier of the entity within its type.
    pub entity_id: String,
    /// Field values in wire naming.
    #[serde(default)]
    pub fields: Map<String, Value>,
    /// Remote modification marker.
    #[serde(flatten)]
    pub marker: ModificationMarker,
    /// True if the remote deleted this entity.
    #[serde(default)]
    pub deleted: bool,
}

impl RemoteRecord {
    /// Creates a live record.
    pub fn new(
        entity_id: impl Into<String>,
        fields: Map<String, Value>,
        marker: ModificationMarker,
    ) -> Self {
        Self {
            entity_id: entity_id.into(),
            fields,
            marker,
            deleted: false,
        }
    }

    /// Creates a deletion tombstone.
    pub fn tombstone(entity_id: impl Into<String>, marker: ModificationMarker) -> Self {
        Self {
            entity_id: entity_id.into(),
            fields: Map::new(),
            marker,
            deleted: true,
        }
    }
}

impl Marked for RemoteRecord {
    fn marker(&self) -> &ModificationMarker {
        &self.marker
    }
}

/// Merges `incoming` into `target` field by field.
///
/// Nested objects merge recursively; any other value (including `null`)
/// overwrites the target field. A non-object `incoming` replaces `target`.
pub fn merge_fields(target: &mut Value, incoming: Value) {
    match (target, incoming) {
        (Value::Object(existing), Value::Object(newer)) => {
            for (key, value) in newer {
                let nested = value.is_object() && existing.get(&key).is_some_and(Value::is_object);
                match existing.get_mut(&key) {
                    Some(slot) if nested => merge_fields(slot, value),
                    _ => {
                        existing.insert(key, value);
                    }
                }
            }
        }
        (slot, newer) => *slot = newer,
    }
}
