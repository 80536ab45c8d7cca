//! Error types for store operations.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur during store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The persisted snapshot could not be encoded or decoded.
    #[error("codec error: {0}")]
    Codec(String),

    /// The store file is corrupted.
    #[error("store corrupted: {0}")]
    Corrupted(String),

    /// The snapshot was written by an unknown format version.
    #[error("unsupported store format version {found} (expected {expected})")]
    UnsupportedVersion {
        /// Version found on disk.
        found: u32,
        /// Version this build writes.
        expected: u32,
    },

    /// Another process holds the store lock.
    #[error("store at {0} is locked by another process")]
    Locked(PathBuf),

    /// A transaction was aborted and nothing was committed.
    #[error("transaction aborted: {0}")]
    Aborted(String),

    /// A queue item was not found.
    #[error("queue item {0} not found")]
    ItemNotFound(uuid::Uuid),
}
