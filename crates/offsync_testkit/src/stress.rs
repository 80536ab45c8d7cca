//! Stress tests for the mutation queue.
//!
//! These helpers verify behavior under concurrent writers.

use offsync_engine::{MutationQueue, RemoteSyncGateway};
use offsync_protocol::MutationOperation;
use offsync_store::{LocalStore, QueueStatus, StoreState};
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};

/// Result of a stress test run.
#[derive(Debug, Clone)]
pub struct StressTestResult {
    /// Total operations performed.
    pub total_ops: usize,
    /// Successful operations.
    pub successful_ops: usize,
    /// Failed operations.
    pub failed_ops: usize,
    /// Total duration.
    pub duration: Duration,
    /// Operations per second.
    pub ops_per_second: f64,
}

impl StressTestResult {
    /// Creates a new result.
    pub fn new(successful: usize, failed: usize, duration: Duration) -> Self {
        let total = successful + failed;
        let ops_per_second = if duration.as_secs_f64() > 0.0 {
            total as f64 / duration.as_secs_f64()
        } else {
            0.0
        };

        Self {
            total_ops: total,
            successful_ops: successful,
            failed_ops: failed,
            duration,
            ops_per_second,
        }
    }

    /// Prints a summary of the test.
    pub fn print_summary(&self, name: &str) {
        println!("\n=== {} ===", name);
        println!("Total operations: {}", self.total_ops);
        println!("Successful: {}", self.successful_ops);
        println!("Failed: {}", self.failed_ops);
        println!("Duration: {:?}", self.duration);
        println!("Throughput: {:.2} ops/sec", self.ops_per_second);
    }
}

/// Configuration for stress tests.
#[derive(Debug, Clone)]
pub struct StressConfig {
    /// Number of concurrent writer threads.
    pub writers: usize,
    /// Mutations each writer records.
    pub mutations_per_writer: usize,
    /// Number of distinct entity ids writers share.
    pub entity_count: usize,
    /// Entity type the writers target.
    pub entity_type: String,
}

impl Default for StressConfig {
    fn default() -> Self {
        Self {
            writers: 4,
            mutations_per_writer: 250,
            entity_count: 16,
            entity_type: "tickets".to_string(),
        }
    }
}

/// Records mutations from several threads at once over a shared id space.
pub fn stress_concurrent_enqueue<G, S>(
    queue: &MutationQueue<G, S>,
    config: &StressConfig,
) -> StressTestResult
where
    G: RemoteSyncGateway,
    S: LocalStore,
{
    let successful = AtomicUsize::new(0);
    let failed = AtomicUsize::new(0);
    let start = Instant::now();

    thread::scope(|scope| {
        for writer in 0..config.writers {
            let successful = &successful;
            let failed = &failed;
            scope.spawn(move || {
                for i in 0..config.mutations_per_writer {
                    let id = format!("e{}", (writer * 7 + i) % config.entity_count.max(1));
                    let operation = if i % 5 == 0 {
                        MutationOperation::Create
                    } else {
                        MutationOperation::Update
                    };
                    let payload = json!({ "writer": writer, "seq": i });
                    match queue.enqueue(&config.entity_type, &id, operation, payload, 0) {
                        Ok(_) => successful.fetch_add(1, Ordering::Relaxed),
                        Err(_) => failed.fetch_add(1, Ordering::Relaxed),
                    };
                }
            });
        }
    });

    StressTestResult::new(
        successful.load(Ordering::Relaxed),
        failed.load(Ordering::Relaxed),
        start.elapsed(),
    )
}

/// Checks structural queue invariants on a committed state.
///
/// - At most one open item per `(entity_type, entity_id)`
/// - No item left `processing` outside a queue pass
/// - Metadata pending counts match the open items
pub fn check_queue_invariants(state: &StoreState) -> Result<(), String> {
    let mut open: BTreeMap<(&str, &str), usize> = BTreeMap::new();
    for item in state.queue.values() {
        if item.status == QueueStatus::Processing {
            return Err(format!("item {} left processing", item.id));
        }
        if item.status.is_open() {
            *open
                .entry((item.entity_type.as_str(), item.entity_id.as_str()))
                .or_default() += 1;
        }
    }
    if let Some(((entity_type, entity_id), count)) = open.iter().find(|(_, n)| **n > 1) {
        return Err(format!(
            "{count} open items for {entity_type}/{entity_id}"
        ));
    }

    for meta in state.metadata.values() {
        let expected = state.open_count(&meta.entity_type);
        if meta.pending_changes_count != expected {
            return Err(format!(
                "{} reports {} pending changes, queue has {expected}",
                meta.entity_type, meta.pending_changes_count
            ));
        }
    }
    Ok(())
}
