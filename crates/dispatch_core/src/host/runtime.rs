use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::Rc;
use std::time::Duration;

use futures::future::LocalBoxFuture;
use tokio::task::JoinHandle;
use tracing::trace;

use super::{Spawner, TimerCallback, TimerHandle, TimerService};

/// Upper bound on a single real delay. A near-zero clock speed turns small
/// simulation deltas into enormous real delays; those are capped here.
const MAX_DELAY: Duration = Duration::from_secs(60 * 60 * 24 * 365);

/// Host backed by the tokio runtime. Timers are `spawn_local` tasks that
/// sleep and then run their callback, so every method must be called from
/// inside a [tokio::task::LocalSet].
#[derive(Default)]
pub struct TokioHost {
    timers: Rc<RefCell<HashMap<TimerHandle, JoinHandle<()>>>>,
    next_handle: Cell<u64>,
}

impl TokioHost {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn armed_count(&self) -> usize {
        self.timers.borrow().len()
    }
}

fn real_delay(delay_ms: f64) -> Duration {
    if delay_ms.is_nan() || delay_ms <= 0.0 {
        return Duration::ZERO;
    }
    Duration::try_from_secs_f64(delay_ms / 1000.0)
        .map(|d| d.min(MAX_DELAY))
        .unwrap_or(MAX_DELAY)
}

impl TimerService for TokioHost {
    fn arm(&self, delay_ms: f64, callback: TimerCallback) -> TimerHandle {
        let handle = TimerHandle::new(self.next_handle.get());
        self.next_handle.set(handle.raw() + 1);
        let delay = real_delay(delay_ms);
        let registry = Rc::downgrade(&self.timers);
        let task = tokio::task::spawn_local(async move {
            tokio::time::sleep(delay).await;
            if let Some(registry) = registry.upgrade() {
                registry.borrow_mut().remove(&handle);
            }
            callback();
        });
        trace!(%handle, ?delay, "tokio timer armed");
        self.timers.borrow_mut().insert(handle, task);
        handle
    }

    fn cancel(&self, handle: TimerHandle) {
        if let Some(task) = self.timers.borrow_mut().remove(&handle) {
            task.abort();
        }
    }
}

impl Spawner for TokioHost {
    fn spawn(&self, task: LocalBoxFuture<'static, ()>) {
        drop(tokio::task::spawn_local(task));
    }
}

impl Drop for TokioHost {
    fn drop(&mut self) {
        for (_, task) in self.timers.borrow_mut().drain() {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::task::LocalSet;

    use crate::clock::VirtualClock;
    use crate::config::ClockConfig;
    use crate::realtime::ManualClock;
    use crate::scheduler::Scheduler;
    use crate::test_helpers::{record, Recorder, TestScheduler};

    #[test]
    fn real_delay_clamps_degenerate_values() {
        assert_eq!(real_delay(-5.0), Duration::ZERO);
        assert_eq!(real_delay(f64::NAN), Duration::ZERO);
        assert_eq!(real_delay(250.0), Duration::from_millis(250));
        assert_eq!(real_delay(1e300), MAX_DELAY);
        assert_eq!(real_delay(f64::INFINITY), MAX_DELAY);
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn timers_fire_and_cancel_under_paused_time() {
        let local = LocalSet::new();
        local
            .run_until(async {
                let host = TokioHost::new();
                let log = Rc::new(RefCell::new(Vec::new()));

                let sink = Rc::clone(&log);
                host.arm(100.0, Box::new(move || sink.borrow_mut().push("fired")));
                let sink = Rc::clone(&log);
                let canceled = host.arm(50.0, Box::new(move || sink.borrow_mut().push("canceled")));
                host.cancel(canceled);

                tokio::time::sleep(Duration::from_millis(200)).await;
                assert_eq!(*log.borrow(), vec!["fired"]);
                assert_eq!(host.armed_count(), 0);
            })
            .await;
    }

    // The real clock stays frozen at 0, so the clock only moves when a timer
    // fire seeks it to the event time.
    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn scheduler_over_tokio_host_rearms_on_speed_change() {
        let local = LocalSet::new();
        local
            .run_until(async {
                let host = Rc::new(TokioHost::new());
                let clock = VirtualClock::with_config(
                    Rc::new(ManualClock::new()),
                    &ClockConfig::default().playing(),
                );
                let scheduler: TestScheduler =
                    Scheduler::new(clock.clone(), host.clone(), Recorder::default());

                scheduler.schedule(1_000.0, record("a")).expect("schedule");
                assert!(scheduler.has_armed_timer());
                assert_eq!(host.armed_count(), 1);

                // 1000 ms of simulation time at 4x is 250 ms of real time.
                clock.set_speed(4.0);
                assert_eq!(host.armed_count(), 1);

                tokio::time::sleep(Duration::from_millis(200)).await;
                assert!(scheduler.app().is_empty());

                tokio::time::sleep(Duration::from_millis(100)).await;
                assert_eq!(scheduler.app().labels(), vec!["a"]);
                assert_eq!(clock.now(), 1_000.0);
                assert!(!scheduler.has_armed_timer());
                assert_eq!(host.armed_count(), 0);
            })
            .await;
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn paused_clock_disarms_tokio_timer() {
        let local = LocalSet::new();
        local
            .run_until(async {
                let host = Rc::new(TokioHost::new());
                let clock = VirtualClock::with_config(
                    Rc::new(ManualClock::new()),
                    &ClockConfig::default().playing(),
                );
                let scheduler: TestScheduler =
                    Scheduler::new(clock.clone(), host.clone(), Recorder::default());
                scheduler.schedule(100.0, record("held")).expect("schedule");
                clock.pause();
                assert_eq!(host.armed_count(), 0);

                tokio::time::sleep(Duration::from_millis(500)).await;
                assert!(scheduler.app().is_empty());

                clock.play();
                tokio::time::sleep(Duration::from_millis(150)).await;
                assert_eq!(scheduler.app().labels(), vec!["held"]);
            })
            .await;
    }
}
