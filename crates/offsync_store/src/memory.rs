//! In-memory store for testing.

use crate::backend::LocalStore;
use crate::error::StoreResult;
use crate::state::StoreState;
use parking_lot::RwLock;

/// An in-memory local store.
///
/// This store keeps all state in memory and is suitable for:
/// - Unit tests
/// - Integration tests
/// - Ephemeral sessions that don't need persistence
///
/// # Example
///
/// ```rust
/// use offsync_store::{LocalStore, MemoryStore, StoreError};
///
/// let store = MemoryStore::new();
/// let result: Result<(), _> = store.write(|state| {
///     state.metadata_mut("artists").needs_sync = true;
///     Err(StoreError::Aborted("changed my mind".into()))
/// });
/// assert!(result.is_err());
/// assert!(store.read(|s| s.metadata.is_empty()).unwrap());
/// ```
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: RwLock<StoreState>,
}

impl MemoryStore {
    /// Creates a new empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store with pre-existing state.
    ///
    /// Useful for testing recovery scenarios.
    #[must_use]
    pub fn with_state(state: StoreState) -> Self {
        Self {
            state: RwLock::new(state),
        }
    }

    /// Returns a copy of the committed state.
    #[must_use]
    pub fn snapshot(&self) -> StoreState {
        self.state.read().clone()
    }
}

impl LocalStore for MemoryStore {
    fn read<R>(&self, f: impl FnOnce(&StoreState) -> R) -> StoreResult<R> {
        Ok(f(&self.state.read()))
    }

    fn write<R>(&self, f: impl FnOnce(&mut StoreState) -> StoreResult<R>) -> StoreResult<R> {
        let mut committed = self.state.write();
        let mut working = committed.clone();
        let result = f(&mut working)?;
        *committed = working;
        Ok(result)
    }
}
