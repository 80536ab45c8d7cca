//! Durable file-backed store.
//!
//! The store directory looks like this:
//!
//! ```text
//! <store_dir>/
//! ├─ LOCK              # Advisory lock for single-writer
//! ├─ state.cbor        # Last committed snapshot
//! └─ state.cbor.tmp    # Snapshot being written (transient)
//! ```
//!
//! Every committed write serializes the whole state to `state.cbor.tmp`,
//! syncs it, renames it over `state.cbor` and syncs the directory. The
//! rename is atomic, so a crash leaves either the previous or the new
//! snapshot, never a mix.
//!
//! Writes block the calling thread on disk I/O. Async callers that write
//! often should move them onto `spawn_blocking`.

use crate::backend::LocalStore;
use crate::error::{StoreError, StoreResult};
use crate::state::StoreState;
use fs2::FileExt;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

const LOCK_FILE: &str = "LOCK";
const SNAPSHOT_FILE: &str = "state.cbor";
const SNAPSHOT_TEMP: &str = "state.cbor.tmp";

/// Snapshot format version written by this build.
pub const FORMAT_VERSION: u32 = 1;

#[derive(Serialize)]
struct EnvelopeRef<'a> {
    format_version: u32,
    state: &'a StoreState,
}

#[derive(Deserialize)]
struct Envelope {
    format_version: u32,
    state: StoreState,
}

/// A file-backed local store.
///
/// # Thread Safety
///
/// Holds an exclusive advisory lock on its directory for its whole
/// lifetime; a second `FileStore` for the same directory fails with
/// [`StoreError::Locked`].
///
/// # Example
///
/// ```no_run
/// use offsync_store::{FileStore, LocalStore};
/// use std::path::Path;
///
/// let store = FileStore::open(Path::new("sync-store")).unwrap();
/// store.write(|state| {
///     state.metadata_mut("artists");
///     Ok(())
/// }).unwrap();
/// ```
#[derive(Debug)]
pub struct FileStore {
    dir: PathBuf,
    state: RwLock<StoreState>,
    _lock_file: File,
}

impl FileStore {
    /// Opens or creates a store in `dir`.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The directory cannot be created
    /// - Another process holds the lock
    /// - The snapshot is unreadable or from an unknown format version
    pub fn open(dir: &Path) -> StoreResult<Self> {
        fs::create_dir_all(dir)?;

        let lock_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(dir.join(LOCK_FILE))?;
        if lock_file.try_lock_exclusive().is_err() {
            return Err(StoreError::Locked(dir.to_path_buf()));
        }

        let stale_temp = dir.join(SNAPSHOT_TEMP);
        if stale_temp.exists() {
            warn!(path = %stale_temp.display(), "discarding interrupted snapshot");
            fs::remove_file(&stale_temp)?;
        }

        let state = Self::load(&dir.join(SNAPSHOT_FILE))?;
        debug!(
            path = %dir.display(),
            entity_types = state.metadata.len(),
            queue_items = state.queue.len(),
            "opened file store"
        );

        Ok(Self {
            dir: dir.to_path_buf(),
            state: RwLock::new(state),
            _lock_file: lock_file,
        })
    }

    /// Returns the store directory.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Returns the path of the committed snapshot.
    #[must_use]
    pub fn snapshot_path(&self) -> PathBuf {
        self.dir.join(SNAPSHOT_FILE)
    }

    fn load(path: &Path) -> StoreResult<StoreState> {
        if !path.exists() {
            return Ok(StoreState::default());
        }

        let reader = BufReader::new(File::open(path)?);
        let envelope: Envelope = ciborium::from_reader(reader)
            .map_err(|e| StoreError::Corrupted(format!("{}: {e}", path.display())))?;

        if envelope.format_version != FORMAT_VERSION {
            return Err(StoreError::UnsupportedVersion {
                found: envelope.format_version,
                expected: FORMAT_VERSION,
            });
        }

        Ok(envelope.state)
    }

    fn persist(&self, state: &StoreState) -> StoreResult<()> {
        let temp = self.dir.join(SNAPSHOT_TEMP);
        let mut writer = BufWriter::new(File::create(&temp)?);
        let envelope = EnvelopeRef {
            format_version: FORMAT_VERSION,
            state,
        };
        ciborium::into_writer(&envelope, &mut writer)
            .map_err(|e| StoreError::Codec(e.to_string()))?;
        writer.flush()?;
        let file = writer.into_inner().map_err(|e| e.into_error())?;
        file.sync_all()?;
        drop(file);

        fs::rename(&temp, self.snapshot_path())?;
        sync_dir(&self.dir)
    }
}

/// Flushes the directory entry so the rename survives power loss.
#[cfg(unix)]
fn sync_dir(dir: &Path) -> StoreResult<()> {
    File::open(dir)?.sync_all()?;
    Ok(())
}

#[cfg(not(unix))]
fn sync_dir(_dir: &Path) -> StoreResult<()> {
    Ok(())
}

impl LocalStore for FileStore {
    fn read<R>(&self, f: impl FnOnce(&StoreState) -> R) -> StoreResult<R> {
        Ok(f(&self.state.read()))
    }

    fn write<R>(&self, f: impl FnOnce(&mut StoreState) -> StoreResult<R>) -> StoreResult<R> {
        let mut committed = self.state.write();
        let mut working = committed.clone();
        let result = f(&mut working)?;
        self.persist(&working)?;
        *committed = working;
        Ok(result)
    }
}
