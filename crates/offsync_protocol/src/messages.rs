//! Pull and push messages exchanged with the remote gateway.

use crate::operation::MutationOperation;
use crate::record::RemoteRecord;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Request for records changed since a cursor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PullRequest {
    /// Entity type being pulled.
    pub entity_type: String,
    /// High-water mark already applied locally, `None` for a full pull.
    pub since: Option<DateTime<Utc>>,
    /// Opaque token returned by the previous pull.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sync_token: Option<String>,
    /// Maximum number of records per page.
    pub limit: u32,
}

impl PullRequest {
    /// Creates a new pull request.
    pub fn new(entity_type: impl Into<String>, since: Option<DateTime<Utc>>, limit: u32) -> Self {
        Self {
            entity_type: entity_type.into(),
            since,
            sync_token: None,
            limit,
        }
    }

    /// Attaches the opaque token from the previous pull.
    pub fn with_token(mut self, token: Option<String>) -> Self {
        self.sync_token = token;
        self
    }
}

/// Cursor position after a page of records.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullCursor {
    /// High-water mark covered by the page.
    pub timestamp: DateTime<Utc>,
    /// Opaque continuation token.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

/// One page of a delta pull.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PullResponse {
    /// Records changed since the request cursor.
    pub records: Vec<RemoteRecord>,
    /// Cursor to store once the page is applied.
    pub next_cursor: PullCursor,
    /// True if another page is available.
    #[serde(default)]
    pub has_more: bool,
}

impl PullResponse {
    /// Creates a final page.
    pub fn new(records: Vec<RemoteRecord>, next_cursor: PullCursor) -> Self {
        Self {
            records,
            next_cursor,
            has_more: false,
        }
    }

    /// Marks this page as followed by another.
    pub fn with_more(mut self) -> Self {
        self.has_more = true;
        self
    }
}

/// Key the remote uses to collapse redelivered pushes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct IdempotencyKey {
    /// Entity type.
    pub entity_type: String,
    /// Entity identifier.
    pub entity_id: String,
    /// Operation being delivered.
    pub operation: MutationOperation,
}

impl IdempotencyKey {
    /// Creates a key.
    pub fn new(
        entity_type: impl Into<String>,
        entity_id: impl Into<String>,
        operation: MutationOperation,
    ) -> Self {
        Self {
            entity_type: entity_type.into(),
            entity_id: entity_id.into(),
            operation,
        }
    }
}

impl fmt::Display for IdempotencyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.entity_type, self.entity_id, self.operation)
    }
}

/// A single local mutation delivered to the remote.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PushMutation {
    /// Entity identifier.
    pub entity_id: String,
    /// Operation to apply.
    pub operation: MutationOperation,
    /// Latest intended state, in wire naming.
    pub payload: Value,
    /// Deduplication key for redelivery.
    pub idempotency_key: IdempotencyKey,
}

/// Request pushing local mutations for one entity type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PushRequest {
    /// Entity type of every mutation in the request.
    pub entity_type: String,
    /// Mutations to apply.
    pub mutations: Vec<PushMutation>,
}

impl PushRequest {
    /// Creates a push request.
    pub fn new(entity_type: impl Into<String>, mutations: Vec<PushMutation>) -> Self {
        Self {
            entity_type: entity_type.into(),
            mutations,
        }
    }
}

/// A mutation the remote refused to apply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushRejection {
    /// Entity identifier.
    pub entity_id: String,
    /// Validation message from the remote.
    pub reason: String,
}

/// Acknowledgement of a push.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushAck {
    /// Entity ids applied (or recognised as duplicates).
    #[serde(default)]
    pub accepted: Vec<String>,
    /// Entity ids refused with a validation error.
    #[serde(default)]
    pub rejected: Vec<PushRejection>,
}

impl PushAck {
    /// Acknowledges every listed entity id.
    pub fn accepted(ids: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            accepted: ids.into_iter().map(Into::into).collect(),
            rejected: Vec::new(),
        }
    }

    /// Returns the rejection for `entity_id`, if any.
    pub fn rejection_for(&self, entity_id: &str) -> Option<&PushRejection> {
        self.rejected.iter().find(|r| r.entity_id == entity_id)
    }
}
