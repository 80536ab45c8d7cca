//! Mutation operations and queue coalescing.

use crate::error::ProtocolError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Kind of local write recorded in the mutation queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MutationOperation {
    /// The entity was created locally and has never been seen by the remote.
    Create,
    /// The entity was modified locally.
    Update,
    /// The entity was deleted locally.
    Delete,
}

/// How the payload of an existing queue item absorbs a newer mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadStrategy {
    /// Merge the newer payload field by field into the existing one.
    Merge,
    /// Replace the existing payload wholesale.
    Replace,
}

/// Outcome of coalescing two mutations for the same entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Coalesced {
    /// Operation the surviving queue item carries.
    pub operation: MutationOperation,
    /// How the payloads combine.
    pub payload: PayloadStrategy,
}

impl MutationOperation {
    /// Converts to a numeric code.
    pub fn to_code(&self) -> u8 {
        match self {
            MutationOperation::Create => 1,
            MutationOperation::Update => 2,
            MutationOperation::Delete => 3,
        }
    }

    /// Converts from a numeric code.
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(MutationOperation::Create),
            2 => Some(MutationOperation::Update),
            3 => Some(MutationOperation::Delete),
            _ => None,
        }
    }

    /// Returns the lowercase wire name.
    pub fn as_str(&self) -> &'static str {
        match self {
            MutationOperation::Create => "create",
            MutationOperation::Update => "update",
            MutationOperation::Delete => "delete",
        }
    }

    /// Folds `incoming` into a pending mutation of kind `self`.
    ///
    /// The remote has not seen a pending `Create`, so later updates keep it a
    /// create. A delete always wins and discards earlier field state; anything
    /// after a pending delete resurrects an entity the remote still holds and
    /// therefore becomes a full-state update.
    pub fn coalesce(self, incoming: MutationOperation) -> Coalesced {
        use MutationOperation::{Create, Delete, Update};

        let (operation, payload) = match (self, incoming) {
            (Create, Create) | (Create, Update) => (Create, PayloadStrategy::Merge),
            (Update, Create) | (Update, Update) => (Update, PayloadStrategy::Merge),
            (_, Delete) => (Delete, PayloadStrategy::Replace),
            (Delete, Create) | (Delete, Update) => (Update, PayloadStrategy::Replace),
        };

        Coalesced { operation, payload }
    }
}

impl fmt::Display for MutationOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MutationOperation {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "create" => Ok(MutationOperation::Create),
            "update" => Ok(MutationOperation::Update),
            "delete" => Ok(MutationOperation::Delete),
            other => Err(ProtocolError::UnknownOperation(other.to_string())),
        }
    }
}
