//! Load tests for dispatch_core: large queues and long same-instant bursts.

mod support;

use std::time::Instant;

use dispatch_core::test_helpers::{random_times, Harness};
use support::fixtures::{expected_order, playing_with_burst_limit, schedule_same_instant, schedule_times};

#[test]
#[ignore] // Only run explicitly: cargo test --package dispatch_core --test load_tests -- --ignored
fn test_sustained_run_until_load() {
    let times = random_times(42, 200_000, 3_600_000);
    let harness = Harness::new();
    schedule_times(&harness, &times);

    let start = Instant::now();
    harness.scheduler.run_until(3_600_000.0).expect("run");
    let duration = start.elapsed();

    let events = harness.recorder().len();
    let events_per_sec = events as f64 / duration.as_secs_f64();
    println!(
        "Sustained run_until load: {} events in {:.2}s ({:.0} events/sec)",
        events,
        duration.as_secs_f64(),
        events_per_sec
    );

    assert_eq!(harness.recorder().payloads(), expected_order(&times));
    assert!(
        events_per_sec > 10_000.0,
        "Performance below threshold: {:.0} events/sec",
        events_per_sec
    );
}

#[test]
#[ignore]
fn test_timer_driven_burst_load() {
    let harness = playing_with_burst_limit(Some(1_000));
    schedule_same_instant(&harness, 60_000.0, 100_000);

    let start = Instant::now();
    harness.host.advance(60_000.0);
    let duration = start.elapsed();

    let payloads = harness.recorder().payloads();
    println!(
        "Timer-driven burst: {} events in {:.2}s, {} deferred bursts",
        payloads.len(),
        duration.as_secs_f64(),
        harness.scheduler.metrics().bursts_deferred
    );
    assert_eq!(payloads.len(), 100_000);
    assert!(payloads.windows(2).all(|w| w[0] < w[1]));
    assert_eq!(harness.scheduler.metrics().bursts_deferred, 99);
}
