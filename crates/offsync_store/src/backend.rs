//! Local store trait definition.

use crate::error::StoreResult;
use crate::state::StoreState;

/// Transactional local storage for sync bookkeeping and domain records.
///
/// # Invariants
///
/// - `write` runs its closure against a private working copy of the state;
///   the copy replaces the committed state only if the closure returns `Ok`
///   *and* the store made it durable. Otherwise nothing is observable.
/// - Writes are serialized: at most one write scope is active at a time.
/// - `read` always observes the last committed state.
/// - Stores must be `Send + Sync` for concurrent access.
///
/// # Implementors
///
/// - [`super::MemoryStore`] - For testing
/// - [`super::FileStore`] - For persistent storage
pub trait LocalStore: Send + Sync {
    /// Runs `f` against the committed state.
    ///
    /// # Errors
    ///
    /// Returns an error if the state cannot be accessed.
    fn read<R>(&self, f: impl FnOnce(&StoreState) -> R) -> StoreResult<R>;

    /// Runs `f` inside an all-or-nothing write scope.
    ///
    /// # Errors
    ///
    /// Returns the closure's error, or an error if the new state could not
    /// be made durable. In both cases the committed state is unchanged.
    fn write<R>(&self, f: impl FnOnce(&mut StoreState) -> StoreResult<R>) -> StoreResult<R>;
}
