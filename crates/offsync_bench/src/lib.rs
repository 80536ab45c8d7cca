//! Benchmark utilities.

use offsync_testkit::prelude::*;
use rand::Rng;
use serde_json::{json, Value};

/// Generates a flat payload with `fields` random fields.
pub fn random_payload(fields: usize) -> Value {
    let mut rng = rand::thread_rng();
    let map = (0..fields)
        .map(|i| (format!("f{i}"), json!(rng.gen::<u32>())))
        .collect();
    Value::Object(map)
}

/// Generates `count` entity ids.
pub fn generate_ids(count: usize) -> Vec<String> {
    (0..count).map(|i| format!("e{i}")).collect()
}

/// Builds a harness whose remote holds `records` records for every sample
/// entity type.
pub fn seeded_harness(records: usize) -> Harness {
    let harness = Harness::new();
    for entity_type in SAMPLE_ENTITY_TYPES {
        for id in generate_ids(records) {
            harness.remote.seed(entity_type, &id, random_payload(8));
        }
    }
    harness
}

/// Builds a current-thread runtime for driving async benchmarks.
pub fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("tokio runtime")
}
