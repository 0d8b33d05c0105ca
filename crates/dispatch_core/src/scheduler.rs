//! Scheduler: bridges the virtual clock and the event queue onto one real
//! timer.
//!
//! Exactly one host timer is armed at a time, for the earliest live event.
//! Its real delay is `(event.time - clock.now()) / max(speed, min_speed)`.
//! When it fires, the clock is seeked to the event's exact time (absorbing
//! timer jitter) and every event due at or before that time is executed,
//! including events that running handlers schedule for the same window.
//!
//! Everything is single-threaded: handles are `Rc` based and no `RefCell`
//! borrow is held while user code (handlers, clock listeners) runs, so
//! handlers may freely schedule, cancel, clear, or dispose.

use std::cell::RefCell;
use std::fmt::{self, Debug};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::rc::{Rc, Weak};

use futures::FutureExt;
use tracing::{debug, error, trace};

use crate::clock::{Subscription, VirtualClock};
use crate::config::SchedulerConfig;
use crate::error::{panic_message, SchedulerError, SchedulerResult};
use crate::event::{Event, EventSpec, Handler, HandlerFuture};
use crate::host::{Host, TimerHandle};
use crate::profiling::SchedulerMetrics;
use crate::queue::{CancelHandle, EventId, EventQueue, Queued};

/// Queued form of an [EventSpec]; the queue supplies id and time.
struct Pending<C, K, P> {
    kind: K,
    payload: Option<P>,
    handler: Handler<C, K, P>,
}

struct State<C, K, P> {
    queue: EventQueue<Pending<C, K, P>>,
    timer: Option<TimerHandle>,
    subscription: Option<Subscription>,
    /// Nesting depth of batch processing. Re-arm requests raised while
    /// non-zero are folded into the re-arm that ends the outermost batch.
    depth: usize,
    disposed: bool,
}

struct Inner<C, K, P> {
    this: Weak<Inner<C, K, P>>,
    clock: VirtualClock,
    host: Rc<dyn Host>,
    app: C,
    config: SchedulerConfig,
    state: RefCell<State<C, K, P>>,
    metrics: Rc<RefCell<SchedulerMetrics>>,
}

/// Handle to a scheduler. Clones share the same queue and timer.
///
/// `C` is the application context handed to handlers, `K` the event kind
/// tag, `P` the payload type.
pub struct Scheduler<C, K, P = ()> {
    inner: Rc<Inner<C, K, P>>,
}

impl<C, K, P> Clone for Scheduler<C, K, P> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

/// Passed to every handler invocation.
pub struct HandlerContext<'a, C, K, P> {
    scheduler: &'a Scheduler<C, K, P>,
}

impl<'a, C, K, P> HandlerContext<'a, C, K, P>
where
    C: 'static,
    K: Debug + 'static,
    P: 'static,
{
    /// Current simulation time.
    pub fn now(&self) -> f64 {
        self.scheduler.inner.clock.now()
    }

    pub fn clock(&self) -> &VirtualClock {
        &self.scheduler.inner.clock
    }

    /// Live scheduler handle, for follow-up scheduling or cancellation.
    pub fn scheduler(&self) -> &'a Scheduler<C, K, P> {
        self.scheduler
    }

    /// Application context the scheduler was built with.
    pub fn app(&self) -> &'a C {
        &self.scheduler.inner.app
    }
}

/// Returned by `schedule`/`schedule_in`.
#[derive(Clone)]
pub struct ScheduledHandle {
    cancel: CancelHandle,
    scheduler: Weak<dyn Rearm>,
}

trait Rearm {
    fn request_rearm(&self);
}

impl ScheduledHandle {
    pub fn id(&self) -> EventId {
        self.cancel.id()
    }

    pub fn time(&self) -> f64 {
        self.cancel.time()
    }

    /// Cancel the event in O(1). `true` only on the first call. A successful
    /// cancellation re-arms the timer, since this may have been the next due
    /// event.
    pub fn cancel(&self) -> bool {
        if !self.cancel.cancel() {
            return false;
        }
        if let Some(scheduler) = self.scheduler.upgrade() {
            scheduler.request_rearm();
        }
        true
    }

    pub fn is_canceled(&self) -> bool {
        self.cancel.is_canceled()
    }
}

impl Debug for ScheduledHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScheduledHandle")
            .field("id", &self.id())
            .field("time", &self.time())
            .field("canceled", &self.is_canceled())
            .finish()
    }
}

impl<C, K, P> Scheduler<C, K, P>
where
    C: 'static,
    K: Debug + 'static,
    P: 'static,
{
    pub fn new(clock: VirtualClock, host: Rc<dyn Host>, app: C) -> Self {
        Self::with_config(clock, host, app, SchedulerConfig::default())
    }

    /// Build a scheduler, subscribe to `clock`, and arm the first timer
    /// (nothing is armed while the queue is empty or the clock is paused).
    pub fn with_config(
        clock: VirtualClock,
        host: Rc<dyn Host>,
        app: C,
        config: SchedulerConfig,
    ) -> Self {
        let inner = Rc::new_cyclic(|this| Inner {
            this: this.clone(),
            clock,
            host,
            app,
            config,
            state: RefCell::new(State {
                queue: EventQueue::new(),
                timer: None,
                subscription: None,
                depth: 0,
                disposed: false,
            }),
            metrics: Rc::new(RefCell::new(SchedulerMetrics::default())),
        });

        let weak = Rc::downgrade(&inner);
        let subscription = inner.clock.on_change(Rc::new(move || {
            if let Some(inner) = weak.upgrade() {
                inner.request_rearm();
            }
        }));
        inner.state.borrow_mut().subscription = Some(subscription);
        inner.rearm_timer();

        Self { inner }
    }

    /// Schedule an event at absolute simulation time `time`.
    pub fn schedule(
        &self,
        time: f64,
        spec: EventSpec<C, K, P>,
    ) -> SchedulerResult<ScheduledHandle> {
        let cancel = {
            let mut state = self.inner.state.borrow_mut();
            if state.disposed {
                return Err(SchedulerError::Disposed);
            }
            if !time.is_finite() {
                return Err(SchedulerError::NonFiniteTime(time));
            }
            let EventSpec {
                kind,
                payload,
                handler,
            } = spec;
            trace!(?kind, time, "event scheduled");
            state.queue.push(
                time,
                Pending {
                    kind,
                    payload,
                    handler,
                },
            )
        };
        self.inner.request_rearm();
        let scheduler: Weak<dyn Rearm> = self.inner.this.clone();
        Ok(ScheduledHandle { cancel, scheduler })
    }

    /// Schedule `delay_ms` after the current simulation time. Zero and
    /// negative delays are accepted and fire as soon as possible.
    pub fn schedule_in(
        &self,
        delay_ms: f64,
        spec: EventSpec<C, K, P>,
    ) -> SchedulerResult<ScheduledHandle> {
        self.schedule(self.inner.clock.now() + delay_ms, spec)
    }

    /// Seek the clock to `target` and synchronously execute every event due
    /// at or before it, including events scheduled by those handlers.
    pub fn run_until(&self, target: f64) -> SchedulerResult<()> {
        if self.inner.state.borrow().disposed {
            return Err(SchedulerError::Disposed);
        }
        if !target.is_finite() {
            return Err(SchedulerError::NonFiniteTime(target));
        }
        {
            let _batch = self.inner.enter_batch();
            self.inner.clock.seek(target);
            self.inner.process_due(target, None);
        }
        self.inner.request_rearm();
        Ok(())
    }

    /// Cancel by raw id (linear scan). Re-arms on success.
    pub fn cancel(&self, id: EventId) -> bool {
        let canceled = self.inner.state.borrow().queue.cancel(id);
        if canceled {
            self.inner.request_rearm();
        }
        canceled
    }

    /// Drop every queued event and the armed timer. The clock is untouched.
    /// No-op after disposal.
    pub fn clear(&self) {
        let timer = {
            let mut state = self.inner.state.borrow_mut();
            if state.disposed {
                return;
            }
            state.queue.clear();
            state.timer.take()
        };
        if let Some(timer) = timer {
            self.inner.host.cancel(timer);
        }
        debug!("scheduler cleared");
    }

    /// Number of live queued events.
    pub fn size(&self) -> usize {
        self.inner.state.borrow().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.state.borrow().queue.is_empty()
    }

    pub fn next_event_time(&self) -> Option<f64> {
        self.inner.state.borrow_mut().queue.peek_time()
    }

    /// Unsubscribe from the clock, cancel the timer and clear the queue.
    /// Idempotent; afterwards `schedule`, `schedule_in` and `run_until` fail
    /// with [SchedulerError::Disposed].
    pub fn dispose(&self) {
        self.inner.dispose();
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.state.borrow().disposed
    }

    /// Whether a host timer is currently armed.
    pub fn has_armed_timer(&self) -> bool {
        self.inner.state.borrow().timer.is_some()
    }

    pub fn clock(&self) -> &VirtualClock {
        &self.inner.clock
    }

    pub fn app(&self) -> &C {
        &self.inner.app
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.inner.config
    }

    /// Snapshot of the counters.
    pub fn metrics(&self) -> SchedulerMetrics {
        self.inner.metrics.borrow().clone()
    }
}

impl<C, K, P> Inner<C, K, P>
where
    C: 'static,
    K: Debug + 'static,
    P: 'static,
{
    fn enter_batch(&self) -> BatchGuard<'_, C, K, P> {
        self.state.borrow_mut().depth += 1;
        BatchGuard { inner: self }
    }

    fn rearm_timer(&self) {
        let (previous, next_time) = {
            let mut state = self.state.borrow_mut();
            let previous = state.timer.take();
            let next_time = if state.disposed {
                None
            } else {
                state.queue.peek_time()
            };
            (previous, next_time)
        };
        if let Some(previous) = previous {
            self.host.cancel(previous);
        }
        let Some(next_time) = next_time else {
            return;
        };
        if self.clock.is_paused() {
            return;
        }

        let dt_sim = next_time - self.clock.now();
        let delay_ms = if dt_sim <= 0.0 {
            0.0
        } else {
            dt_sim / self.clock.speed().max(self.config.min_speed)
        };
        let this = self.this.clone();
        let handle = self.host.arm(
            delay_ms,
            Box::new(move || {
                if let Some(inner) = this.upgrade() {
                    inner.on_timer_fire();
                }
            }),
        );
        self.state.borrow_mut().timer = Some(handle);
        self.metrics.borrow_mut().record_timer_armed();
        trace!(%handle, next_time, delay_ms, "timer armed");
    }

    fn on_timer_fire(&self) {
        let next_time = {
            let mut state = self.state.borrow_mut();
            state.timer = None;
            if state.disposed {
                return;
            }
            state.queue.peek_time()
        };
        let Some(next_time) = next_time else {
            return;
        };
        {
            let _batch = self.enter_batch();
            self.clock.seek(next_time);
            self.process_due(next_time, self.config.burst_limit);
        }
        self.request_rearm();
    }

    /// Pop and run events due at or before `target` one at a time, so events
    /// scheduled by a handler land in heap order within the same pass. With a
    /// `burst_limit`, stop after that many handlers; the remainder is still
    /// due, so the closing re-arm picks it up with a zero-delay timer.
    fn process_due(&self, target: f64, burst_limit: Option<usize>) {
        let mut executed = 0usize;
        loop {
            let entry = {
                let mut state = self.state.borrow_mut();
                if state.disposed {
                    break;
                }
                state.queue.pop_due(target)
            };
            let Some(entry) = entry else { break };
            self.dispatch(entry);
            executed += 1;

            if let Some(limit) = burst_limit {
                if executed >= limit && self.has_due(target) {
                    self.metrics.borrow_mut().record_burst_deferred();
                    debug!(executed, target, "burst limit reached, deferring remainder");
                    break;
                }
            }
        }
        if executed > 0 {
            debug!(executed, target, "processed due events");
        }
    }

    fn has_due(&self, target: f64) -> bool {
        self.state
            .borrow_mut()
            .queue
            .peek_time()
            .is_some_and(|time| time <= target)
    }

    fn dispatch(&self, entry: Queued<Pending<C, K, P>>) {
        let Some(inner) = self.this.upgrade() else {
            return;
        };
        let scheduler = Scheduler { inner };
        let id = entry.id();
        let time = entry.time();
        let Pending {
            kind,
            payload,
            handler,
        } = entry.into_item();
        let label = format!("{kind:?}");
        self.metrics.borrow_mut().record_event(&label);

        let event = Event {
            id,
            time,
            kind,
            payload,
        };
        let ctx = HandlerContext {
            scheduler: &scheduler,
        };
        let outcome = catch_unwind(AssertUnwindSafe(|| match handler {
            Handler::Sync(f) => f(&ctx, event).map(|()| None),
            Handler::Spawn(f) => Ok(Some(f(&ctx, event))),
        }));

        match outcome {
            Ok(Ok(None)) => {}
            Ok(Ok(Some(task))) => self.spawn_handler_task(label, time, task),
            Ok(Err(err)) => {
                self.metrics.borrow_mut().record_fault();
                error!(kind = %label, time, error = %format!("{err:#}"), "event handler failed");
            }
            Err(payload) => {
                self.metrics.borrow_mut().record_fault();
                error!(
                    kind = %label,
                    time,
                    error = %panic_message(&*payload),
                    "event handler panicked"
                );
            }
        }
    }

    fn spawn_handler_task(&self, label: String, time: f64, task: HandlerFuture) {
        let metrics = Rc::clone(&self.metrics);
        self.host.spawn(Box::pin(async move {
            let failure = match AssertUnwindSafe(task).catch_unwind().await {
                Ok(Ok(())) => None,
                Ok(Err(err)) => Some(format!("{err:#}")),
                Err(payload) => Some(panic_message(&*payload)),
            };
            if let Some(failure) = failure {
                metrics.borrow_mut().record_fault();
                error!(kind = %label, time, error = %failure, "async event handler failed");
            }
        }));
    }

    fn dispose(&self) {
        let (subscription, timer) = {
            let mut state = self.state.borrow_mut();
            if state.disposed {
                return;
            }
            state.disposed = true;
            state.queue.clear();
            (state.subscription.take(), state.timer.take())
        };
        if let Some(subscription) = subscription {
            subscription.unsubscribe();
        }
        if let Some(timer) = timer {
            self.host.cancel(timer);
        }
        debug!("scheduler disposed");
    }
}

impl<C, K, P> Rearm for Inner<C, K, P>
where
    C: 'static,
    K: Debug + 'static,
    P: 'static,
{
    fn request_rearm(&self) {
        let skip = {
            let state = self.state.borrow();
            state.disposed || state.depth > 0
        };
        if !skip {
            self.rearm_timer();
        }
    }
}

impl<C, K, P> Drop for Inner<C, K, P> {
    fn drop(&mut self) {
        let state = self.state.get_mut();
        if let Some(subscription) = state.subscription.take() {
            subscription.unsubscribe();
        }
        if let Some(timer) = state.timer.take() {
            self.host.cancel(timer);
        }
    }
}

struct BatchGuard<'a, C, K, P> {
    inner: &'a Inner<C, K, P>,
}

impl<C, K, P> Drop for BatchGuard<'_, C, K, P> {
    fn drop(&mut self) {
        self.inner.state.borrow_mut().depth -= 1;
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use super::*;
    use crate::config::ClockConfig;
    use crate::host::ManualHost;

    type Log = Rc<RefCell<Vec<(&'static str, f64)>>>;
    type TestScheduler = Scheduler<Log, &'static str>;
    type TestHandler = Handler<Log, &'static str, ()>;

    fn setup(config: ClockConfig) -> (Rc<ManualHost>, TestScheduler) {
        let host = Rc::new(ManualHost::new());
        let clock = VirtualClock::with_config(host.real_clock(), &config);
        let log: Log = Rc::new(RefCell::new(Vec::new()));
        let scheduler = Scheduler::new(clock, host.clone(), log);
        (host, scheduler)
    }

    fn record(label: &'static str) -> EventSpec<Log, &'static str, ()> {
        EventSpec::new(
            label,
            TestHandler::sync(move |ctx, _event| {
                ctx.app().borrow_mut().push((label, ctx.now()));
                Ok(())
            }),
        )
    }

    fn labels(scheduler: &TestScheduler) -> Vec<&'static str> {
        scheduler.app().borrow().iter().map(|(l, _)| *l).collect()
    }

    #[test]
    fn construction_on_paused_clock_arms_nothing() {
        let (host, scheduler) = setup(ClockConfig::default());
        scheduler.schedule_in(1_000.0, record("a")).expect("schedule");
        assert!(!scheduler.has_armed_timer());
        assert_eq!(host.armed_count(), 0);
    }

    #[test]
    fn run_until_fires_and_seeks() {
        let (_host, scheduler) = setup(ClockConfig::default());
        scheduler.schedule_in(1_000.0, record("a")).expect("schedule");
        scheduler.run_until(1_000.0).expect("run");
        assert_eq!(labels(&scheduler), vec!["a"]);
        assert_eq!(scheduler.clock().now(), 1_000.0);
        assert_eq!(scheduler.size(), 0);
    }

    #[test]
    fn timer_delay_accounts_for_speed() {
        let (host, scheduler) = setup(ClockConfig::default().with_speed(2.0).playing());
        scheduler.schedule_in(1_000.0, record("a")).expect("schedule");
        assert_eq!(host.armed_delays(), vec![500.0]);
    }

    #[test]
    fn only_one_timer_is_armed() {
        let (host, scheduler) = setup(ClockConfig::default().playing());
        scheduler.schedule(3_000.0, record("c")).expect("schedule");
        scheduler.schedule(1_000.0, record("a")).expect("schedule");
        scheduler.schedule(2_000.0, record("b")).expect("schedule");
        assert_eq!(host.armed_delays(), vec![1_000.0]);
    }

    #[test]
    fn timer_fire_seeks_to_exact_event_time() {
        let (host, scheduler) = setup(ClockConfig::default().playing());
        scheduler.schedule(1_000.0, record("a")).expect("schedule");
        // Fire late, as a jittery host timer would.
        host.clock().advance(1_030.0);
        host.fire_due();
        assert_eq!(*scheduler.app().borrow(), vec![("a", 1_000.0)]);
    }

    #[test]
    fn canceling_next_event_rearms_for_the_following_one() {
        let (host, scheduler) = setup(ClockConfig::default().playing());
        let first = scheduler.schedule(1_000.0, record("a")).expect("schedule");
        scheduler.schedule(4_000.0, record("b")).expect("schedule");
        assert!(first.cancel());
        assert_eq!(host.armed_delays(), vec![4_000.0]);
        assert!(!first.cancel());
    }

    #[test]
    fn pause_disarms_and_play_rearms() {
        let (host, scheduler) = setup(ClockConfig::default().playing());
        scheduler.schedule(1_000.0, record("a")).expect("schedule");
        scheduler.clock().pause();
        assert_eq!(host.armed_count(), 0);
        scheduler.clock().play();
        assert_eq!(host.armed_delays(), vec![1_000.0]);
    }

    #[test]
    fn handler_can_cancel_a_later_event_in_the_same_pass() {
        let (_host, scheduler) = setup(ClockConfig::default());
        let victim: Rc<RefCell<Option<ScheduledHandle>>> = Rc::new(RefCell::new(None));
        let slot = Rc::clone(&victim);
        scheduler
            .schedule(
                10.0,
                EventSpec::new(
                    "killer",
                    TestHandler::sync(move |_ctx, _event| {
                        if let Some(handle) = slot.borrow().as_ref() {
                            handle.cancel();
                        }
                        Ok(())
                    }),
                ),
            )
            .expect("schedule");
        let handle = scheduler.schedule(10.0, record("victim")).expect("schedule");
        *victim.borrow_mut() = Some(handle);
        scheduler.run_until(10.0).expect("run");
        assert!(labels(&scheduler).is_empty());
    }

    #[test]
    fn dispose_inside_handler_stops_the_batch() {
        let (_host, scheduler) = setup(ClockConfig::default());
        scheduler
            .schedule(
                1.0,
                EventSpec::new(
                    "stop",
                    TestHandler::sync(|ctx, _event| {
                        ctx.scheduler().dispose();
                        Ok(())
                    }),
                ),
            )
            .expect("schedule");
        scheduler.schedule(1.0, record("after")).expect("schedule");
        scheduler.run_until(5.0).expect("run");
        assert!(labels(&scheduler).is_empty());
        assert!(scheduler.is_disposed());
    }

    #[test]
    fn dropping_last_handle_unsubscribes_from_clock() {
        let host = Rc::new(ManualHost::new());
        let clock = VirtualClock::with_config(host.real_clock(), &ClockConfig::default());
        let scheduler: Scheduler<(), &'static str> = Scheduler::new(clock.clone(), host, ());
        assert_eq!(clock.listener_count(), 1);
        drop(scheduler);
        assert_eq!(clock.listener_count(), 0);
    }

    #[test]
    fn spawned_handler_does_not_block_the_batch() {
        let (host, scheduler) = setup(ClockConfig::default());
        let finished = Rc::new(Cell::new(false));
        let flag = Rc::clone(&finished);
        scheduler
            .schedule(
                5.0,
                EventSpec::new(
                    "async",
                    TestHandler::spawn(move |_ctx, _event| {
                        Box::pin(async move {
                            flag.set(true);
                            Ok(())
                        })
                    }),
                ),
            )
            .expect("schedule");
        scheduler.schedule(5.0, record("sync")).expect("schedule");
        scheduler.run_until(5.0).expect("run");
        assert_eq!(labels(&scheduler), vec!["sync"]);
        assert!(!finished.get());
        host.run_tasks();
        assert!(finished.get());
    }
}
