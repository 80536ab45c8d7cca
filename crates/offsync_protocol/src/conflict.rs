//! Conflict resolution.
//!
//! Resolution is a pure function of `(entity_type, local, remote)`. It is
//! total over every input and deterministic: the same inputs always yield the
//! same [`ConflictDecision`].

use crate::record::{Marked, ModificationMarker, Newer};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Which side of a conflict wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConflictDecision {
    /// True if the remote record replaces the local one.
    pub use_remote: bool,
}

impl ConflictDecision {
    /// Keep the remote record.
    pub const REMOTE: Self = Self { use_remote: true };
    /// Keep the local record.
    pub const LOCAL: Self = Self { use_remote: false };
}

/// Policy for automatic conflict resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictPolicy {
    /// The more recent marker wins; ties go to the remote.
    #[default]
    LastWriteWins,
    /// The remote always wins (ledger and balance-like data).
    RemoteAuthoritative,
    /// The local side wins unless the remote is strictly newer.
    LocalPreferred,
}

impl ConflictPolicy {
    /// Decides between two markers according to this policy.
    pub fn decide(&self, local: &ModificationMarker, remote: &ModificationMarker) -> ConflictDecision {
        match self {
            ConflictPolicy::RemoteAuthoritative => ConflictDecision::REMOTE,
            ConflictPolicy::LastWriteWins => match ModificationMarker::newer(local, remote) {
                Newer::Local => ConflictDecision::LOCAL,
                Newer::Remote | Newer::Tie => ConflictDecision::REMOTE,
            },
            ConflictPolicy::LocalPreferred => match ModificationMarker::newer(local, remote) {
                Newer::Remote => ConflictDecision::REMOTE,
                Newer::Local | Newer::Tie => ConflictDecision::LOCAL,
            },
        }
    }

    /// Converts to a code.
    pub fn to_code(&self) -> u8 {
        match self {
            ConflictPolicy::LastWriteWins => 1,
            ConflictPolicy::RemoteAuthoritative => 2,
            ConflictPolicy::LocalPreferred => 3,
        }
    }

    /// Converts from a code.
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(ConflictPolicy::LastWriteWins),
            2 => Some(ConflictPolicy::RemoteAuthoritative),
            3 => Some(ConflictPolicy::LocalPreferred),
            _ => None,
        }
    }
}

/// Resolves per-record conflicts with optional per-entity-type overrides.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConflictResolver {
    default_policy: ConflictPolicy,
    overrides: BTreeMap<String, ConflictPolicy>,
}

impl ConflictResolver {
    /// Creates a resolver using last-write-wins for every type.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the policy used for types without an override.
    pub fn with_default(mut self, policy: ConflictPolicy) -> Self {
        self.default_policy = policy;
        self
    }

    /// Overrides the policy for one entity type.
    pub fn with_override(mut self, entity_type: impl Into<String>, policy: ConflictPolicy) -> Self {
        self.overrides.insert(entity_type.into(), policy);
        self
    }

    /// Returns the policy applied to `entity_type`.
    pub fn policy_for(&self, entity_type: &str) -> ConflictPolicy {
        self.overrides
            .get(entity_type)
            .copied()
            .unwrap_or(self.default_policy)
    }

    /// Decides which side wins for a single record.
    pub fn resolve<L, R>(&self, entity_type: &str, local: &L, remote: &R) -> ConflictDecision
    where
        L: Marked + ?Sized,
        R: Marked + ?Sized,
    {
        self.policy_for(entity_type)
            .decide(local.marker(), remote.marker())
    }
}
