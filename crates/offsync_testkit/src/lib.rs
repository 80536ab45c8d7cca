//! # offsync testkit
//!
//! Test utilities for offsync.
//!
//! This crate provides:
//! - [`InMemoryRemote`] - a deterministic backend that honours idempotency
//!   keys and serves paged deltas, usable directly or behind the HTTP gateway
//! - [`FaultyStore`] - a store wrapper that simulates crashes inside a write
//! - Fixture configurations and orchestrator builders
//! - Property-based test generators using proptest
//! - Stress testing utilities
//!
//! ## Usage
//!
//! ```rust,ignore
//! use offsync_testkit::prelude::*;
//!
//! #[tokio::test]
//! async fn first_sync_pulls_everything() {
//!     let harness = Harness::new();
//!     harness.remote.seed("artists", "a1", json!({"name": "A"}));
//!     let result = harness.orchestrator.sync(false).await;
//!     assert!(result.is_success());
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod crash;
pub mod fixtures;
pub mod generators;
pub mod remote;
pub mod stress;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::crash::*;
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::remote::*;
    pub use crate::stress::*;
}

pub use crash::*;
pub use fixtures::*;
pub use generators::*;
pub use remote::*;
pub use stress::*;
