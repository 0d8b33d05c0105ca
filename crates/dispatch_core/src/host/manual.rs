use std::cell::{Cell, RefCell};
use std::rc::Rc;

use futures::executor::{LocalPool, LocalSpawner};
use futures::future::LocalBoxFuture;
use futures::task::LocalSpawnExt;
use tracing::warn;

use super::{Spawner, TimerCallback, TimerHandle, TimerService};
use crate::realtime::{ManualClock, RealClock};

struct Armed {
    handle: TimerHandle,
    due_ms: f64,
    delay_ms: f64,
    callback: TimerCallback,
}

/// Deterministic host: timers fire only when real time is advanced by hand,
/// and spawned tasks run only when [ManualHost::run_tasks] is called (or as
/// part of [ManualHost::advance]).
pub struct ManualHost {
    clock: ManualClock,
    timers: RefCell<Vec<Armed>>,
    next_handle: Cell<u64>,
    pool: RefCell<LocalPool>,
    spawner: LocalSpawner,
}

impl ManualHost {
    pub fn new() -> Self {
        Self::with_clock(ManualClock::new())
    }

    pub fn with_clock(clock: ManualClock) -> Self {
        let pool = LocalPool::new();
        let spawner = pool.spawner();
        Self {
            clock,
            timers: RefCell::new(Vec::new()),
            next_handle: Cell::new(0),
            pool: RefCell::new(pool),
            spawner,
        }
    }

    /// The real clock this host fires timers against.
    pub fn clock(&self) -> ManualClock {
        self.clock.clone()
    }

    pub fn real_clock(&self) -> Rc<dyn RealClock> {
        Rc::new(self.clock.clone())
    }

    pub fn now_ms(&self) -> f64 {
        self.clock.now_ms()
    }

    pub fn armed_count(&self) -> usize {
        self.timers.borrow().len()
    }

    /// Requested delays of the armed timers, earliest due first.
    pub fn armed_delays(&self) -> Vec<f64> {
        let timers = self.timers.borrow();
        let mut armed: Vec<(f64, TimerHandle, f64)> = timers
            .iter()
            .map(|t| (t.due_ms, t.handle, t.delay_ms))
            .collect();
        armed.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));
        armed.into_iter().map(|(_, _, delay)| delay).collect()
    }

    pub fn next_due_ms(&self) -> Option<f64> {
        self.timers
            .borrow()
            .iter()
            .map(|t| t.due_ms)
            .min_by(f64::total_cmp)
    }

    /// Advance real time by `ms`, firing every timer that comes due along the
    /// way in due order. Timers armed by callbacks fire too if they fall
    /// inside the window. Returns the number of callbacks run.
    pub fn advance(&self, ms: f64) -> usize {
        let target = self.clock.now_ms() + ms.max(0.0);
        let fired = self.fire_until(target);
        self.clock.set(target);
        self.run_tasks();
        fired
    }

    /// Fire timers already due at the current real time.
    pub fn fire_due(&self) -> usize {
        let fired = self.fire_until(self.clock.now_ms());
        self.run_tasks();
        fired
    }

    /// Fire only the earliest timer already due, if any.
    pub fn fire_next(&self) -> bool {
        let Some(armed) = self.take_next_due(self.clock.now_ms()) else {
            return false;
        };
        (armed.callback)();
        self.run_tasks();
        true
    }

    /// Keep firing until no timer remains or `max_fires` callbacks have run,
    /// jumping real time to each timer's due instant.
    pub fn run_until_idle(&self, max_fires: usize) -> usize {
        let mut fired = 0;
        while fired < max_fires {
            let Some(due) = self.next_due_ms() else { break };
            fired += self.fire_until(due.max(self.clock.now_ms()));
            self.run_tasks();
        }
        fired
    }

    /// Poll spawned tasks until none can make progress.
    pub fn run_tasks(&self) {
        self.pool.borrow_mut().run_until_stalled();
    }

    fn fire_until(&self, target: f64) -> usize {
        let mut fired = 0;
        while let Some(armed) = self.take_next_due(target) {
            self.clock.set(armed.due_ms);
            (armed.callback)();
            fired += 1;
        }
        fired
    }

    fn take_next_due(&self, target: f64) -> Option<Armed> {
        let mut timers = self.timers.borrow_mut();
        let index = timers
            .iter()
            .enumerate()
            .filter(|(_, t)| t.due_ms <= target)
            .min_by(|(_, a), (_, b)| {
                a.due_ms
                    .total_cmp(&b.due_ms)
                    .then(a.handle.cmp(&b.handle))
            })
            .map(|(index, _)| index)?;
        Some(timers.remove(index))
    }
}

impl Default for ManualHost {
    fn default() -> Self {
        Self::new()
    }
}

impl TimerService for ManualHost {
    fn arm(&self, delay_ms: f64, callback: TimerCallback) -> TimerHandle {
        let handle = TimerHandle(self.next_handle.get());
        self.next_handle.set(handle.0 + 1);
        self.timers.borrow_mut().push(Armed {
            handle,
            due_ms: self.clock.now_ms() + delay_ms.max(0.0),
            delay_ms,
            callback,
        });
        handle
    }

    fn cancel(&self, handle: TimerHandle) {
        self.timers.borrow_mut().retain(|t| t.handle != handle);
    }
}

impl Spawner for ManualHost {
    fn spawn(&self, task: LocalBoxFuture<'static, ()>) {
        if let Err(err) = self.spawner.spawn_local(task) {
            warn!(error = %err, "manual host failed to spawn task");
        }
    }
}
