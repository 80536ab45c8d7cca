//! Error types for protocol operations.

use thiserror::Error;

/// Result type for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Errors raised while translating or validating wire data.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// A field has no entry in a strict mapping table.
    #[error("field `{field}` of entity type `{entity_type}` has no mapping")]
    UnmappedField {
        /// Entity type whose mapping was consulted.
        entity_type: String,
        /// The offending field name.
        field: String,
    },

    /// Two mapping entries target the same field name.
    #[error("duplicate mapping for field `{field}` of entity type `{entity_type}`")]
    DuplicateMapping {
        /// Entity type being registered.
        entity_type: String,
        /// The duplicated field name.
        field: String,
    },

    /// A payload was not a JSON object where one was required.
    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    /// An operation name could not be parsed.
    #[error("unknown operation: {0}")]
    UnknownOperation(String),

    /// JSON encoding or decoding failed.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}
