//! Test helpers shared by unit tests, integration tests and benches.
//!
//! [Harness] wires a [ManualHost], a [VirtualClock] on the host's manual real
//! clock, and a [Scheduler] whose context is a [Recorder] that handlers
//! built here append to.

use std::cell::RefCell;
use std::rc::Rc;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};

use crate::clock::VirtualClock;
use crate::config::{ClockConfig, SchedulerConfig};
use crate::event::{EventSpec, Handler};
use crate::host::ManualHost;
use crate::realtime::ManualClock;
use crate::scheduler::Scheduler;

/// One handler invocation as seen by a [Recorder].
#[derive(Debug, Clone, PartialEq)]
pub struct Fired {
    pub label: &'static str,
    /// Scheduled time of the event.
    pub time: f64,
    /// Clock reading when the handler ran.
    pub now: f64,
    pub payload: Option<u64>,
}

/// Application context that logs every recorded invocation.
#[derive(Debug, Default)]
pub struct Recorder {
    fired: RefCell<Vec<Fired>>,
}

impl Recorder {
    pub fn push(&self, fired: Fired) {
        self.fired.borrow_mut().push(fired);
    }

    pub fn fired(&self) -> Vec<Fired> {
        self.fired.borrow().clone()
    }

    pub fn labels(&self) -> Vec<&'static str> {
        self.fired.borrow().iter().map(|f| f.label).collect()
    }

    pub fn payloads(&self) -> Vec<u64> {
        self.fired.borrow().iter().filter_map(|f| f.payload).collect()
    }

    pub fn times(&self) -> Vec<f64> {
        self.fired.borrow().iter().map(|f| f.time).collect()
    }

    pub fn len(&self) -> usize {
        self.fired.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.fired.borrow().is_empty()
    }
}

pub type TestScheduler = Scheduler<Recorder, &'static str, u64>;
pub type TestHandler = Handler<Recorder, &'static str, u64>;
pub type TestSpec = EventSpec<Recorder, &'static str, u64>;

/// Spec whose handler records `label` and returns `Ok`.
pub fn record(label: &'static str) -> TestSpec {
    EventSpec::new(
        label,
        TestHandler::sync(move |ctx, event| {
            ctx.app().push(Fired {
                label,
                time: event.time,
                now: ctx.now(),
                payload: event.payload,
            });
            Ok(())
        }),
    )
}

/// Spec whose handler fails with an error after recording `label`.
pub fn failing(label: &'static str) -> TestSpec {
    EventSpec::new(
        label,
        TestHandler::sync(move |ctx, event| {
            ctx.app().push(Fired {
                label,
                time: event.time,
                now: ctx.now(),
                payload: event.payload,
            });
            anyhow::bail!("{label} failed on purpose")
        }),
    )
}

/// Spec whose handler records `label`, then schedules `follow_up` at
/// `event.time + offset_ms` (which may be zero for same-instant chaining).
pub fn chain(label: &'static str, offset_ms: f64, follow_up: &'static str) -> TestSpec {
    EventSpec::new(
        label,
        TestHandler::sync(move |ctx, event| {
            ctx.app().push(Fired {
                label,
                time: event.time,
                now: ctx.now(),
                payload: event.payload,
            });
            ctx.scheduler()
                .schedule(event.time + offset_ms, record(follow_up))?;
            Ok(())
        }),
    )
}

pub struct Harness {
    pub host: Rc<ManualHost>,
    pub real: ManualClock,
    pub clock: VirtualClock,
    pub scheduler: TestScheduler,
}

impl Harness {
    /// Paused clock at 0, speed 1.0, default scheduler config.
    pub fn new() -> Self {
        Self::with_config(ClockConfig::default(), SchedulerConfig::default())
    }

    pub fn playing(speed: f64) -> Self {
        Self::with_config(
            ClockConfig::default().with_speed(speed).playing(),
            SchedulerConfig::default(),
        )
    }

    pub fn with_config(clock_config: ClockConfig, config: SchedulerConfig) -> Self {
        let host = Rc::new(ManualHost::new());
        let real = host.clock();
        let clock = VirtualClock::with_config(host.real_clock(), &clock_config);
        let scheduler =
            Scheduler::with_config(clock.clone(), host.clone(), Recorder::default(), config);
        Self {
            host,
            real,
            clock,
            scheduler,
        }
    }

    pub fn recorder(&self) -> &Recorder {
        self.scheduler.app()
    }
}

impl Default for Harness {
    fn default() -> Self {
        Self::new()
    }
}

/// `count` random event times in `[0, max_ms)`, with deliberate duplicates.
pub fn random_times(seed: u64, count: usize, max_ms: u64) -> Vec<f64> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut times: Vec<f64> = (0..count)
        .map(|_| rng.gen_range(0..max_ms.max(1)) as f64)
        .collect();
    // Duplicate a slice of the times so ties are always exercised.
    let dupes: Vec<f64> = times.iter().take(count / 4).copied().collect();
    times.extend(dupes);
    times.shuffle(&mut rng);
    times
}
