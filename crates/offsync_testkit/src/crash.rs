//! Crash injection for local stores.
//!
//! [`FaultyStore`] wraps any [`LocalStore`] and fails chosen writes *after*
//! their closure ran, the way a process killed before commit would. Because
//! writes are all-or-nothing, a test can then check that nothing the write
//! touched became visible.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use offsync_testkit::crash::{CrashPoint, FaultyStore};
//!
//! let store = Arc::new(FaultyStore::new(MemoryStore::new()));
//! store.arm(CrashPoint::CursorAdvance("artists".into()));
//! // run a sync, then assert the artists cursor did not move
//! ```

use chrono::{DateTime, Utc};
use offsync_store::{LocalStore, StoreError, StoreResult, StoreState};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::debug;

/// Points at which a crash can be simulated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CrashPoint {
    /// Crash any write that would move the pull cursor of this entity type.
    CursorAdvance(String),
    /// Let this many writes commit, then crash every later one.
    AfterWrites(usize),
}

/// A store that crashes on demand.
#[derive(Debug)]
pub struct FaultyStore<S> {
    inner: S,
    armed: Mutex<Option<(CrashPoint, usize)>>,
    crashes: AtomicUsize,
}

impl<S: LocalStore> FaultyStore<S> {
    /// Wraps `inner`, initially disarmed.
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            armed: Mutex::new(None),
            crashes: AtomicUsize::new(0),
        }
    }

    /// Arms a crash point, replacing any previous one.
    pub fn arm(&self, point: CrashPoint) {
        *self.armed.lock() = Some((point, 0));
    }

    /// Disarms the crash point.
    pub fn disarm(&self) {
        *self.armed.lock() = None;
    }

    /// Returns how many writes were crashed.
    pub fn crashes(&self) -> usize {
        self.crashes.load(Ordering::SeqCst)
    }

    /// Returns the wrapped store.
    pub fn inner(&self) -> &S {
        &self.inner
    }

    /// Unwraps the store, as a restart would.
    pub fn into_inner(self) -> S {
        self.inner
    }

    fn crash<R>(&self) -> StoreResult<R> {
        self.crashes.fetch_add(1, Ordering::SeqCst);
        debug!("simulated crash");
        Err(StoreError::Aborted("simulated crash".into()))
    }
}

fn cursor_of(state: &StoreState, entity_type: &str) -> Option<(Option<DateTime<Utc>>, Option<String>)> {
    state
        .metadata(entity_type)
        .map(|m| (m.last_pulled_at, m.sync_token.clone()))
}

impl<S: LocalStore> LocalStore for FaultyStore<S> {
    fn read<R>(&self, f: impl FnOnce(&StoreState) -> R) -> StoreResult<R> {
        self.inner.read(f)
    }

    fn write<R>(&self, f: impl FnOnce(&mut StoreState) -> StoreResult<R>) -> StoreResult<R> {
        let point = {
            let mut armed = self.armed.lock();
            match armed.as_mut() {
                Some((CrashPoint::AfterWrites(allowed), seen)) => {
                    *seen += 1;
                    if *seen > *allowed {
                        Some(CrashPoint::AfterWrites(*allowed))
                    } else {
                        None
                    }
                }
                Some((point, _)) => Some(point.clone()),
                None => None,
            }
        };

        match point {
            None => self.inner.write(f),
            Some(CrashPoint::AfterWrites(_)) => self.inner.write(|state| {
                f(state)?;
                self.crash()
            }),
            Some(CrashPoint::CursorAdvance(entity_type)) => self.inner.write(|state| {
                let before = cursor_of(state, &entity_type);
                let out = f(state)?;
                if cursor_of(state, &entity_type) != before {
                    return self.crash();
                }
                Ok(out)
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use offsync_store::MemoryStore;

    #[test]
    fn after_writes_lets_some_commit() {
        let store = FaultyStore::new(MemoryStore::new());
        store.arm(CrashPoint::AfterWrites(1));

        store
            .write(|s| {
                s.metadata_mut("a").needs_sync = true;
                Ok(())
            })
            .unwrap();
        let crashed = store.write(|s| {
            s.metadata_mut("b").needs_sync = true;
            Ok(())
        });

        assert!(matches!(crashed, Err(StoreError::Aborted(_))));
        assert_eq!(store.crashes(), 1);
        assert!(store.read(|s| s.metadata("a").is_some()).unwrap());
        assert!(store.read(|s| s.metadata("b").is_none()).unwrap());
    }

    #[test]
    fn cursor_advance_only_hits_that_type() {
        let store = FaultyStore::new(MemoryStore::new());
        store.arm(CrashPoint::CursorAdvance("artists".into()));

        store
            .write(|s| {
                s.metadata_mut("tickets").sync_token = Some("t".into());
                Ok(())
            })
            .unwrap();
        let crashed = store.write(|s| {
            s.metadata_mut("artists").sync_token = Some("x".into());
            Ok(())
        });

        assert!(crashed.is_err());
        assert!(store.read(|s| s.metadata("artists").is_none()).unwrap());

        store.disarm();
        store
            .write(|s| {
                s.metadata_mut("artists").sync_token = Some("x".into());
                Ok(())
            })
            .unwrap();
        assert_eq!(store.crashes(), 1);
    }
}
