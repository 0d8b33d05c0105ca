#![allow(dead_code)]

use dispatch_core::config::{ClockConfig, SchedulerConfig};
use dispatch_core::test_helpers::{record, Harness, TestSpec};

/// `record(label)` carrying `index` as its payload, so order checks can use
/// the payload instead of labels.
pub fn numbered(label: &'static str, index: u64) -> TestSpec {
    record(label).with_payload(index)
}

/// Playing harness at speed 1.0 with the given burst limit.
pub fn playing_with_burst_limit(limit: Option<usize>) -> Harness {
    Harness::with_config(
        ClockConfig::default().playing(),
        SchedulerConfig::default().with_burst_limit(limit),
    )
}

/// Schedule `count` numbered events at the same instant, in payload order.
pub fn schedule_same_instant(harness: &Harness, time: f64, count: u64) {
    for index in 0..count {
        harness
            .scheduler
            .schedule(time, numbered("burst", index))
            .expect("schedule burst event");
    }
}

/// Schedule one numbered event per entry of `times`, payload = position.
pub fn schedule_times(harness: &Harness, times: &[f64]) {
    for (index, time) in times.iter().enumerate() {
        harness
            .scheduler
            .schedule(*time, numbered("event", index as u64))
            .expect("schedule event");
    }
}

/// Expected firing order for `times`: stable sort by time keeps ties in
/// insertion order.
pub fn expected_order(times: &[f64]) -> Vec<u64> {
    let mut indexed: Vec<(usize, f64)> = times.iter().copied().enumerate().collect();
    indexed.sort_by(|a, b| a.1.total_cmp(&b.1));
    indexed.into_iter().map(|(index, _)| index as u64).collect()
}
