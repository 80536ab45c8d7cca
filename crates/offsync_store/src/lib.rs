//! # offsync store
//!
//! The local side of the sync core: the persisted bookkeeping model and the
//! transactional store it lives in.
//!
//! ## Model
//!
//! - [`EntitySyncMetadata`] - per entity type cursor, pending flag, staleness
//! - [`MutationQueueItem`] - one not-yet-acknowledged local write
//! - [`LocalRecord`] - a domain record as last applied locally
//!
//! All three live in a single [`StoreState`] that is only ever mutated inside
//! [`LocalStore::write`]. A write either commits every change or none, so a
//! crash mid-apply leaves cursors and queue at their last checkpoint.
//!
//! ## Available Stores
//!
//! - [`MemoryStore`] - For testing and ephemeral use
//! - [`FileStore`] - Durable CBOR snapshot with atomic replace
//!
//! ## Example
//!
//! ```rust
//! use offsync_store::{LocalStore, MemoryStore};
//!
//! let store = MemoryStore::new();
//! store
//!     .write(|state| {
//!         state.metadata_mut("artists").needs_sync = true;
//!         Ok(())
//!     })
//!     .unwrap();
//!
//! let pending = store.read(|state| state.metadata("artists").map(|m| m.needs_sync)).unwrap();
//! assert_eq!(pending, Some(true));
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod error;
mod file;
mod memory;
mod metadata;
mod queue_item;
mod record;
mod state;

pub use backend::LocalStore;
pub use error::{StoreError, StoreResult};
pub use file::FileStore;
pub use memory::MemoryStore;
pub use metadata::EntitySyncMetadata;
pub use queue_item::{MutationQueueItem, QueueStatus};
pub use record::LocalRecord;
pub use state::StoreState;
