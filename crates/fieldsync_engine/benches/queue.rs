//! Mutation queue benchmarks.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use fieldsync_engine::{Mutation, MutationQueue};
use fieldsync_protocol::{EntityKey, Job, JobStatus};

fn mutation(n: usize) -> Mutation {
    Mutation::update(
        EntityKey::job(format!("job-{n}")),
        Job::with_status(JobStatus::Completed),
    )
    .with_priority((n % 7) as i32)
}

/// Create a queue holding `count` distinct entities.
fn filled_queue(count: usize) -> MutationQueue {
    let queue = MutationQueue::in_memory().unwrap();
    for n in 0..count {
        queue.enqueue(mutation(n)).unwrap();
    }
    queue
}

/// Benchmark enqueueing new entities and replacing pending ones.
fn bench_enqueue(c: &mut Criterion) {
    let mut group = c.benchmark_group("enqueue");
    group.throughput(Throughput::Elements(1));

    group.bench_function("distinct", |b| {
        let queue = MutationQueue::in_memory().unwrap();
        let mut n = 0;
        b.iter(|| {
            queue.enqueue(black_box(mutation(n))).unwrap();
            n += 1;
        });
    });

    // Same 16 entities over and over, exercising dedup.
    group.bench_function("replace", |b| {
        let queue = filled_queue(16);
        let mut n = 0;
        b.iter(|| {
            queue.enqueue(black_box(mutation(n % 16))).unwrap();
            n += 1;
        });
    });

    group.finish();
}

/// Benchmark selecting the next push batch.
fn bench_next_batch(c: &mut Criterion) {
    let mut group = c.benchmark_group("next_batch");

    for size in [10, 100, 1000] {
        let queue = filled_queue(size);
        group.bench_with_input(BenchmarkId::from_parameter(size), &queue, |b, queue| {
            b.iter(|| black_box(queue.next_batch(black_box(10))));
        });
    }

    group.finish();
}

/// Benchmark reopening a queue from its journal.
fn bench_replay(c: &mut Criterion) {
    let mut group = c.benchmark_group("replay");

    for size in [100, 1000] {
        let backend = fieldsync_journal::MemoryBackend::new();
        {
            let queue = MutationQueue::open(backend.clone()).unwrap();
            for n in 0..size {
                queue.enqueue(mutation(n)).unwrap();
            }
        }
        group.throughput(Throughput::Elements(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &backend, |b, backend| {
            b.iter(|| black_box(MutationQueue::open(backend.clone()).unwrap()));
        });
    }

    group.finish();
}

criterion_group!(benches, bench_enqueue, bench_next_batch, bench_replay);

criterion_main!(benches);
