//! Performance benchmarks for dispatch_core using Criterion.rs.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use dispatch_core::queue::EventQueue;
use dispatch_core::test_helpers::{random_times, record, Harness};

fn bench_queue_push_pop(c: &mut Criterion) {
    let mut group = c.benchmark_group("queue_push_pop");
    for size in [1_000usize, 10_000, 100_000] {
        let times = random_times(42, size, 1_000_000);
        group.bench_with_input(BenchmarkId::from_parameter(size), &times, |b, times| {
            b.iter(|| {
                let mut queue = EventQueue::new();
                for (index, time) in times.iter().enumerate() {
                    queue.push(*time, index);
                }
                let mut drained = 0usize;
                while let Some(entry) = queue.pop() {
                    drained += *entry.item();
                }
                black_box(drained)
            });
        });
    }
    group.finish();
}

fn bench_queue_with_cancellation(c: &mut Criterion) {
    let times = random_times(7, 10_000, 1_000_000);
    c.bench_function("queue_cancel_every_third", |b| {
        b.iter(|| {
            let mut queue = EventQueue::new();
            let handles: Vec<_> = times
                .iter()
                .enumerate()
                .map(|(index, time)| queue.push(*time, index))
                .collect();
            for handle in handles.iter().step_by(3) {
                handle.cancel();
            }
            let mut live = 0usize;
            while queue.pop().is_some() {
                live += 1;
            }
            black_box(live)
        });
    });
}

fn bench_run_until(c: &mut Criterion) {
    let mut group = c.benchmark_group("scheduler_run_until");
    for (name, count) in [("small", 1_000usize), ("medium", 10_000), ("large", 50_000)] {
        let times = random_times(42, count, 3_600_000);
        group.bench_with_input(BenchmarkId::from_parameter(name), &times, |b, times| {
            b.iter(|| {
                let harness = Harness::new();
                for time in times {
                    harness
                        .scheduler
                        .schedule(*time, record("bench"))
                        .expect("schedule");
                }
                harness.scheduler.run_until(3_600_000.0).expect("run");
                black_box(harness.recorder().len())
            });
        });
    }
    group.finish();
}

fn bench_timer_burst(c: &mut Criterion) {
    c.bench_function("timer_burst_10k_same_instant", |b| {
        b.iter(|| {
            let harness = Harness::playing(1.0);
            for _ in 0..10_000 {
                harness
                    .scheduler
                    .schedule(1_000.0, record("burst"))
                    .expect("schedule");
            }
            harness.host.advance(1_000.0);
            black_box(harness.scheduler.metrics().bursts_deferred)
        });
    });
}

criterion_group!(
    benches,
    bench_queue_push_pop,
    bench_queue_with_cancellation,
    bench_run_until,
    bench_timer_burst
);
criterion_main!(benches);
