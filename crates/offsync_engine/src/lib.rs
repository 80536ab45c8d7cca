//! # offsync engine
//!
//! Sync orchestrator and offline mutation queue for offsync.
//!
//! This crate provides:
//! - [`SyncOrchestrator`] - single-flight runs, throttle, reconnect debounce,
//!   periodic timer, priority ordered per entity type delta sync
//! - [`MutationQueue`] - durable outbox with coalescing, retry with backoff
//!   and bounded concurrency
//! - [`MetadataTracker`] - per entity type cursor, pending flag and staleness
//! - [`RemoteSyncGateway`] - the seam to the backend, with an HTTP
//!   implementation over a pluggable [`HttpClient`]
//!
//! ## Architecture
//!
//! The engine implements a **push-then-pull** synchronization model:
//! 1. Drain queued local writes to the remote
//! 2. Pull remote deltas per entity type, highest priority first
//! 3. Resolve conflicts and apply each page in one store transaction
//!
//! ## Key Invariants
//!
//! - At most one run is active; concurrent callers share its result
//! - At most one open queue item per entity
//! - A cursor only moves together with the page it describes
//! - Conflict resolution is total and deterministic
//! - Pushes carry an idempotency key, so redelivery is harmless

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod credential;
mod error;
mod events;
mod gateway;
mod http;
mod metadata;
mod orchestrator;
mod queue;
mod result;
mod status;

pub use config::{EntityTypeConfig, RetryConfig, SyncConfig};
pub use credential::Credential;
pub use error::{SyncError, SyncResult};
pub use events::{EventBus, SyncEvent};
pub use gateway::{MockGateway, RemoteSyncGateway};
pub use http::{HttpClient, HttpGateway, HttpResponse, LoopbackClient, LoopbackServer};
pub use metadata::{should_sync, MetadataTracker};
pub use orchestrator::SyncOrchestrator;
pub use queue::{queue_stats, MutationQueue, QueueRunSummary, QueueStats};
pub use result::{EntitySyncResult, RunOutcome, SyncRunResult, OFFLINE_ERROR};
pub use status::{SyncRunStatus, SyncState};

/// Engine crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
