//! Property-based test generators using proptest.
//!
//! Provides strategies for generating mutation streams and modification
//! markers over a small id space, so collisions are frequent.

use chrono::{TimeZone, Utc};
use offsync_protocol::{ConflictPolicy, ModificationMarker, MutationOperation};
use proptest::prelude::*;
use serde_json::{Map, Value};

/// Entity types from the sample configuration.
pub const SAMPLE_ENTITY_TYPES: [&str; 5] = ["balance", "tickets", "artists", "events", "preferences"];

/// One local write: entity type, entity id, operation, payload.
pub type MutationSpec = (String, String, MutationOperation, Value);

/// Strategy for sample entity type names.
pub fn entity_type_strategy() -> impl Strategy<Value = String> {
    prop::sample::select(SAMPLE_ENTITY_TYPES.to_vec()).prop_map(str::to_string)
}

/// Strategy for entity ids drawn from a small space.
pub fn entity_id_strategy() -> impl Strategy<Value = String> {
    (0u8..6).prop_map(|n| format!("e{n}"))
}

/// Strategy for mutation operations.
pub fn operation_strategy() -> impl Strategy<Value = MutationOperation> {
    prop_oneof![
        Just(MutationOperation::Create),
        Just(MutationOperation::Update),
        Just(MutationOperation::Delete),
    ]
}

/// Strategy for flat JSON object payloads.
pub fn payload_strategy() -> impl Strategy<Value = Value> {
    prop::collection::btree_map(
        prop::string::string_regex("[a-z]{1,6}").expect("Invalid regex"),
        prop_oneof![
            any::<i64>().prop_map(Value::from),
            "[a-zA-Z0-9 ]{0,12}".prop_map(Value::from),
            any::<bool>().prop_map(Value::from),
            Just(Value::Null),
        ],
        0..4,
    )
    .prop_map(|fields| Value::Object(fields.into_iter().collect::<Map<_, _>>()))
}

/// Strategy for a single local write.
pub fn mutation_strategy() -> impl Strategy<Value = MutationSpec> {
    (
        entity_type_strategy(),
        entity_id_strategy(),
        operation_strategy(),
        payload_strategy(),
    )
}

/// Strategy for a stream of local writes.
pub fn mutation_stream_strategy(max_len: usize) -> impl Strategy<Value = Vec<MutationSpec>> {
    prop::collection::vec(mutation_strategy(), 1..=max_len.max(1))
}

/// Strategy for modification markers, empty ones included.
pub fn marker_strategy() -> impl Strategy<Value = ModificationMarker> {
    (
        prop::option::of(0u64..5),
        prop::option::of(0i64..5),
    )
        .prop_map(|(version, secs)| ModificationMarker {
            version,
            modified_at: secs.and_then(|s| Utc.timestamp_opt(1_700_000_000 + s, 0).single()),
        })
}

/// Strategy for conflict policies.
pub fn policy_strategy() -> impl Strategy<Value = ConflictPolicy> {
    prop_oneof![
        Just(ConflictPolicy::LastWriteWins),
        Just(ConflictPolicy::RemoteAuthoritative),
        Just(ConflictPolicy::LocalPreferred),
    ]
}
