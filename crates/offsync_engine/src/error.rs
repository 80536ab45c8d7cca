//! Error types for the sync engine.

use offsync_protocol::ProtocolError;
use offsync_store::StoreError;
use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur during sync operations.
#[derive(Error, Debug)]
pub enum SyncError {
    /// Network or transport error.
    #[error("network error: {message}")]
    Network {
        /// Error message.
        message: String,
        /// Whether the operation can be retried.
        retryable: bool,
    },

    /// A single network call exceeded its timeout.
    #[error("operation timed out")]
    Timeout,

    /// The remote refused a record as invalid.
    #[error("validation failed for {entity_id}: {reason}")]
    Validation {
        /// Entity the remote refused.
        entity_id: String,
        /// Message from the remote.
        reason: String,
    },

    /// The bearer credential is missing or was refused.
    #[error("unauthorized")]
    Unauthorized,

    /// The device has no connectivity.
    #[error("offline")]
    Offline,

    /// The operation was cancelled.
    #[error("sync cancelled")]
    Cancelled,

    /// Conflict resolution produced a decision that cannot be applied.
    #[error("conflict resolution failed for {entity_type}/{entity_id}: {reason}")]
    ConflictResolution {
        /// Entity type.
        entity_type: String,
        /// Entity identifier.
        entity_id: String,
        /// What went wrong.
        reason: String,
    },

    /// The entity type is not configured.
    #[error("unknown entity type '{0}'")]
    UnknownEntityType(String),

    /// The configuration cannot be used.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// The orchestrator was shut down.
    #[error("sync orchestrator is shut down")]
    Shutdown,

    /// Local store error.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Protocol error (mapping or payload encoding).
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),
}

impl SyncError {
    /// Creates a retryable network error.
    pub fn network_retryable(message: impl Into<String>) -> Self {
        Self::Network {
            message: message.into(),
            retryable: true,
        }
    }

    /// Creates a non-retryable network error.
    pub fn network_fatal(message: impl Into<String>) -> Self {
        Self::Network {
            message: message.into(),
            retryable: false,
        }
    }

    /// Creates a validation error.
    pub fn validation(entity_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Validation {
            entity_id: entity_id.into(),
            reason: reason.into(),
        }
    }

    /// Returns true if this error can be retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Network { retryable, .. } => *retryable,
            SyncError::Timeout => true,
            _ => false,
        }
    }

    /// Returns true if the remote refused the record for good.
    pub fn is_validation(&self) -> bool {
        matches!(self, SyncError::Validation { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_errors() {
        assert!(SyncError::network_retryable("connection lost").is_retryable());
        assert!(!SyncError::network_fatal("invalid certificate").is_retryable());
        assert!(SyncError::Timeout.is_retryable());
        assert!(!SyncError::validation("T1", "title required").is_retryable());
        assert!(!SyncError::Unauthorized.is_retryable());
        assert!(!SyncError::Cancelled.is_retryable());
    }

    #[test]
    fn error_display() {
        assert_eq!(SyncError::Offline.to_string(), "offline");

        let err = SyncError::validation("T1", "title required");
        assert_eq!(err.to_string(), "validation failed for T1: title required");

        let err: SyncError = StoreError::Aborted("crash".into()).into();
        assert!(err.to_string().contains("crash"));
    }
}
