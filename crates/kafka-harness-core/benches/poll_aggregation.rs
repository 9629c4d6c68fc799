//! Performance benchmarks for poll aggregation.
//!
//! Measures flattening of poll results and in-process produce throughput.

use bytes::Bytes;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use kafka_harness_core::testing::MemoryHarness;
use kafka_harness_core::{flatten_many_polls, flatten_one_poll, PollResult, Record};

/// Build a poll result with `partitions` batches of `per_partition` records.
fn create_poll(partitions: i32, per_partition: i64) -> PollResult<Bytes, Bytes> {
    let mut poll = PollResult::new();
    for partition in 0..partitions {
        for offset in 0..per_partition {
            poll.push(Record {
                topic: "bench".to_string(),
                partition,
                offset,
                key: Some(Bytes::from_static(b"key")),
                value: Some(Bytes::from_static(b"value")),
                timestamp: None,
            });
        }
    }
    poll
}

/// Benchmark flattening a single poll.
fn bench_flatten_one(c: &mut Criterion) {
    let mut group = c.benchmark_group("flatten_one_poll");

    for (partitions, per_partition) in [(1, 500), (10, 50), (100, 5)] {
        let poll = create_poll(partitions, per_partition);

        group.throughput(Throughput::Elements(poll.record_count() as u64));
        group.bench_with_input(
            BenchmarkId::new("records", format!("{partitions}x{per_partition}")),
            &poll,
            |b, p| b.iter(|| black_box(flatten_one_poll(p.clone()))),
        );
    }

    group.finish();
}

/// Benchmark flattening a sequence of polls.
fn bench_flatten_many(c: &mut Criterion) {
    let mut group = c.benchmark_group("flatten_many_polls");

    for polls in [1, 10, 100] {
        let batch: Vec<_> = (0..polls).map(|_| create_poll(4, 25)).collect();

        group.throughput(Throughput::Elements(polls as u64 * 100));
        group.bench_with_input(BenchmarkId::new("polls", polls), &batch, |b, batch| {
            b.iter(|| black_box(flatten_many_polls(batch.clone())));
        });
    }

    group.finish();
}

/// Benchmark producing through a scoped producer on the in-process broker.
fn bench_produce_many(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().expect("Failed to build runtime");
    let harness = runtime
        .block_on(MemoryHarness::new())
        .expect("Failed to start memory broker");
    let records: Vec<(String, String)> = (0..100)
        .map(|i| (format!("key-{i}"), format!("value-{i}")))
        .collect();

    let mut group = c.benchmark_group("produce_many");
    group.throughput(Throughput::Elements(records.len() as u64));
    group.bench_function("memory_broker", |b| {
        b.to_async(&runtime).iter(|| async {
            black_box(
                harness
                    .runner
                    .produce_many("bench", records.clone())
                    .await
                    .is_ok(),
            )
        });
    });

    group.finish();
}

criterion_group!(benches, bench_flatten_one, bench_flatten_many, bench_produce_many);
criterion_main!(benches);
