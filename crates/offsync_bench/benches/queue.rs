//! Mutation queue benchmarks.

use criterion::{black_box, criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion, Throughput};
use offsync_bench::{generate_ids, random_payload, runtime};
use offsync_engine::Credential;
use offsync_protocol::MutationOperation;
use offsync_testkit::prelude::*;
use tokio_util::sync::CancellationToken;

/// Benchmark enqueueing writes for distinct entities.
fn bench_enqueue_distinct(c: &mut Criterion) {
    let mut group = c.benchmark_group("enqueue_distinct");

    for count in [10, 100, 500].iter() {
        group.throughput(Throughput::Elements(*count as u64));
        group.bench_with_input(BenchmarkId::from_parameter(count), count, |b, &count| {
            let ids = generate_ids(count);
            let payload = random_payload(8);
            b.iter_batched(
                Harness::new,
                |harness| {
                    let queue = harness.orchestrator.queue();
                    for id in &ids {
                        queue
                            .enqueue("tickets", id, MutationOperation::Create, black_box(payload.clone()), 0)
                            .unwrap();
                    }
                },
                BatchSize::SmallInput,
            );
        });
    }
    group.finish();
}

/// Benchmark repeated updates to one entity, which coalesce in place.
fn bench_enqueue_coalescing(c: &mut Criterion) {
    let harness = Harness::new();
    let queue = harness.orchestrator.queue();
    let payload = random_payload(8);
    queue
        .enqueue("tickets", "t1", MutationOperation::Create, payload.clone(), 0)
        .unwrap();

    c.bench_function("enqueue_coalescing", |b| {
        b.iter(|| {
            queue
                .enqueue("tickets", "t1", MutationOperation::Update, black_box(payload.clone()), 0)
                .unwrap();
        });
    });
}

/// Benchmark draining the queue against the in-memory remote.
fn bench_process_queue(c: &mut Criterion) {
    let mut group = c.benchmark_group("process_queue");
    let rt = runtime();
    let credential = Credential::bearer(TEST_TOKEN);

    for count in [10, 100].iter() {
        group.throughput(Throughput::Elements(*count as u64));
        group.bench_with_input(BenchmarkId::from_parameter(count), count, |b, &count| {
            b.iter_batched(
                || {
                    let harness = Harness::new();
                    for id in generate_ids(count) {
                        harness
                            .orchestrator
                            .queue()
                            .enqueue("tickets", &id, MutationOperation::Create, random_payload(8), 0)
                            .unwrap();
                    }
                    harness
                },
                |harness| {
                    let cancel = CancellationToken::new();
                    let summary = rt
                        .block_on(harness.orchestrator.queue().process_queue(&credential, &cancel))
                        .unwrap();
                    black_box(summary);
                },
                BatchSize::SmallInput,
            );
        });
    }
    group.finish();
}

criterion_group!(
    benches,
    bench_enqueue_distinct,
    bench_enqueue_coalescing,
    bench_process_queue,
);
criterion_main!(benches);
