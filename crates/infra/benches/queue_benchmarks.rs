use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use orderflow_core::{JobId, ManualClock, OrderId, SharedClock};
use orderflow_infra::jobs::{IdempotencyStore, Job, JobQueue, RetryPolicy};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

fn test_clock() -> SharedClock {
    Arc::new(ManualClock::new())
}

fn test_job(i: usize) -> Job {
    Job::new(OrderId::from(format!("order-{i}")), 1_000, Duration::ZERO)
}

fn bench_push_pop_latency(c: &mut Criterion) {
    let mut group = c.benchmark_group("queue_push_pop_latency");
    group.sample_size(1000);

    let queue = JobQueue::new(1_024, test_clock());
    group.bench_function("push_then_pop", |b| {
        let mut i = 0;
        b.iter(|| {
            queue.try_push(test_job(i)).unwrap();
            i += 1;
            black_box(queue.try_pop().unwrap());
        });
    });

    group.finish();
}

fn bench_drain_throughput(c: &mut Criterion) {
    let mut group = c.benchmark_group("queue_drain_throughput");

    for batch_size in [100usize, 1_000, 10_000].iter() {
        group.throughput(Throughput::Elements(*batch_size as u64));
        group.bench_with_input(
            BenchmarkId::from_parameter(batch_size),
            batch_size,
            |b, &batch_size| {
                b.iter(|| {
                    let queue = JobQueue::new(batch_size, test_clock());
                    for i in 0..batch_size {
                        queue.try_push(test_job(i)).unwrap();
                    }
                    while let Some(job) = queue.try_pop() {
                        black_box(job);
                    }
                });
            },
        );
    }

    group.finish();
}

fn bench_contended_handoff(c: &mut Criterion) {
    let mut group = c.benchmark_group("queue_contended_handoff");
    group.sample_size(20);

    for consumers in [1usize, 4].iter() {
        let jobs = 2_000;
        group.throughput(Throughput::Elements(jobs as u64));
        group.bench_with_input(
            BenchmarkId::new("consumers", consumers),
            consumers,
            |b, &consumers| {
                b.iter(|| {
                    let queue = Arc::new(JobQueue::new(64, test_clock()));
                    let handles: Vec<_> = (0..consumers)
                        .map(|_| {
                            let queue = queue.clone();
                            thread::spawn(move || {
                                let mut seen = 0usize;
                                while queue.pop(Duration::from_millis(100)).is_some() {
                                    seen += 1;
                                }
                                seen
                            })
                        })
                        .collect();

                    for i in 0..jobs {
                        queue.push(test_job(i), Duration::from_secs(1)).unwrap();
                    }
                    let total: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
                    assert_eq!(total, jobs);
                });
            },
        );
    }

    group.finish();
}

fn bench_idempotency_and_backoff(c: &mut Criterion) {
    let mut group = c.benchmark_group("gate_and_backoff");

    group.bench_function("mark_processed_fresh", |b| {
        let store = IdempotencyStore::new();
        let mut i = 0usize;
        b.iter(|| {
            i += 1;
            black_box(store.mark_processed(&OrderId::from(format!("order-{i}"))));
        });
    });

    group.bench_function("claim_owner_retry", |b| {
        let store = IdempotencyStore::new();
        let order_id = OrderId::from("order-1");
        let owner = JobId::new();
        let mut attempt = 0u32;
        b.iter(|| {
            black_box(store.claim(&order_id, owner, attempt));
            attempt = attempt.wrapping_add(1);
        });
    });

    let policy = RetryPolicy::default();
    group.bench_function("next_delay", |b| {
        b.iter(|| {
            for attempt in 0..8 {
                black_box(policy.next_delay(black_box(attempt)));
            }
        });
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_push_pop_latency,
    bench_drain_throughput,
    bench_contended_handoff,
    bench_idempotency_and_backoff
);
criterion_main!(benches);
