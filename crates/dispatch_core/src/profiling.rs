//! Scheduler throughput and fault counters.

use std::collections::HashMap;
use std::time::Instant;

use tracing::info;

#[derive(Debug, Clone, Default)]
pub struct SchedulerMetrics {
    /// Handlers invoked (including ones that faulted).
    pub events_fired: u64,
    /// Invocations per event kind, keyed by the kind's `Debug` rendering.
    pub events_by_kind: HashMap<String, u64>,
    /// Handler errors and panics, sync or async.
    pub handler_faults: u64,
    pub timers_armed: u64,
    /// Timer-driven batches cut short by the burst limit.
    pub bursts_deferred: u64,
    /// First recorded event, for rate calculation.
    pub start_time: Option<Instant>,
}

impl SchedulerMetrics {
    pub fn record_event(&mut self, kind: &str) {
        if self.start_time.is_none() {
            self.start_time = Some(Instant::now());
        }
        self.events_fired += 1;
        match self.events_by_kind.get_mut(kind) {
            Some(count) => *count += 1,
            None => {
                self.events_by_kind.insert(kind.to_string(), 1);
            }
        }
    }

    pub fn record_fault(&mut self) {
        self.handler_faults += 1;
    }

    pub fn record_timer_armed(&mut self) {
        self.timers_armed += 1;
    }

    pub fn record_burst_deferred(&mut self) {
        self.bursts_deferred += 1;
    }

    pub fn count_for(&self, kind: &str) -> u64 {
        self.events_by_kind.get(kind).copied().unwrap_or(0)
    }

    /// Events per wall-clock second since the first recorded event.
    pub fn events_per_second(&self) -> f64 {
        match self.start_time {
            Some(start) => {
                let elapsed = start.elapsed().as_secs_f64();
                if elapsed > 0.0 {
                    self.events_fired as f64 / elapsed
                } else {
                    0.0
                }
            }
            None => 0.0,
        }
    }

    pub fn log_summary(&self) {
        info!(
            events_fired = self.events_fired,
            handler_faults = self.handler_faults,
            timers_armed = self.timers_armed,
            bursts_deferred = self.bursts_deferred,
            events_per_second = self.events_per_second(),
            "scheduler summary"
        );
        let mut entries: Vec<_> = self.events_by_kind.iter().collect();
        entries.sort_by(|a, b| b.1.cmp(a.1).then_with(|| a.0.cmp(b.0)));
        for (kind, count) in entries {
            info!(kind = %kind, count, "events by kind");
        }
    }
}
