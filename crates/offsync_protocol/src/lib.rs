//! # offsync protocol
//!
//! Wire types and pure decision logic shared by the offsync sync core.
//!
//! This crate provides:
//! - [`MutationOperation`] and the coalescing table for queued writes
//! - [`RemoteRecord`] and [`ModificationMarker`] for delta pulls
//! - Pull/push messages and [`IdempotencyKey`]
//! - [`ConflictResolver`], a total and deterministic per-record decision
//! - [`MappingTable`] for explicit wire/local field translation
//!
//! This is a pure protocol crate with no I/O operations.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod conflict;
mod error;
mod mapping;
mod messages;
mod operation;
mod record;

pub use conflict::{ConflictDecision, ConflictPolicy, ConflictResolver};
pub use error::{ProtocolError, ProtocolResult};
pub use mapping::{FieldMapping, MappingTable};
pub use messages::{
    IdempotencyKey, PullCursor, PullRequest, PullResponse, PushAck, PushMutation, PushRejection,
    PushRequest,
};
pub use operation::{Coalesced, MutationOperation, PayloadStrategy};
pub use record::{merge_fields, Marked, ModificationMarker, Newer, RemoteRecord};
