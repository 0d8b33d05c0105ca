//! Virtual clock: a controllable simulation time base.
//!
//! Time is derived from two anchors instead of a ticking timer:
//! while playing, `now = sim_anchor + (real_now - real_anchor) * speed`;
//! while paused, `now = sim_anchor`. Every state change re-anchors so the
//! reading stays continuous, except for [VirtualClock::seek], which jumps.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::rc::{Rc, Weak};

use tracing::{error, trace};

use crate::config::ClockConfig;
use crate::error::panic_message;
use crate::realtime::{MonotonicClock, RealClock};

/// Callback invoked synchronously after every clock state change.
pub type ChangeListener = Rc<dyn Fn()>;

#[derive(Debug, Clone, Copy, PartialEq)]
struct Anchors {
    sim: f64,
    real: f64,
    speed: f64,
    paused: bool,
}

struct ListenerEntry {
    id: u64,
    callback: ChangeListener,
}

struct ClockInner {
    real: Rc<dyn RealClock>,
    anchors: Cell<Anchors>,
    listeners: RefCell<Vec<ListenerEntry>>,
    next_listener_id: Cell<u64>,
}

/// Shared handle to a virtual clock. Clones observe and mutate the same clock.
#[derive(Clone)]
pub struct VirtualClock {
    inner: Rc<ClockInner>,
}

impl VirtualClock {
    /// Paused clock at time 0, speed 1.0.
    pub fn new(real: Rc<dyn RealClock>) -> Self {
        Self::with_config(real, &ClockConfig::default())
    }

    /// Clock anchored on a fresh [MonotonicClock].
    pub fn monotonic(config: &ClockConfig) -> Self {
        Self::with_config(Rc::new(MonotonicClock::new()), config)
    }

    pub fn with_config(real: Rc<dyn RealClock>, config: &ClockConfig) -> Self {
        let anchors = Anchors {
            sim: config.start_ms,
            real: real.now_ms(),
            speed: config.speed.max(0.0),
            paused: config.paused,
        };
        Self {
            inner: Rc::new(ClockInner {
                real,
                anchors: Cell::new(anchors),
                listeners: RefCell::new(Vec::new()),
                next_listener_id: Cell::new(0),
            }),
        }
    }

    /// Current simulation time in ms.
    pub fn now(&self) -> f64 {
        let a = self.inner.anchors.get();
        if a.paused {
            a.sim
        } else {
            a.sim + (self.inner.real.now_ms() - a.real) * a.speed
        }
    }

    pub fn speed(&self) -> f64 {
        self.inner.anchors.get().speed
    }

    pub fn is_paused(&self) -> bool {
        self.inner.anchors.get().paused
    }

    pub fn play(&self) {
        let mut a = self.inner.anchors.get();
        if !a.paused {
            return;
        }
        a.real = self.inner.real.now_ms();
        a.paused = false;
        self.inner.anchors.set(a);
        trace!(sim_ms = a.sim, "clock playing");
        self.notify();
    }

    pub fn pause(&self) {
        let mut a = self.inner.anchors.get();
        if a.paused {
            return;
        }
        a.sim = self.now();
        a.paused = true;
        self.inner.anchors.set(a);
        trace!(sim_ms = a.sim, "clock paused");
        self.notify();
    }

    /// Change the speed multiplier (clamped to `>= 0`) without a time jump.
    pub fn set_speed(&self, speed: f64) {
        let speed = speed.max(0.0);
        let mut a = self.inner.anchors.get();
        if a.speed == speed {
            return;
        }
        a.sim = self.now();
        a.real = self.inner.real.now_ms();
        a.speed = speed;
        self.inner.anchors.set(a);
        trace!(sim_ms = a.sim, speed, "clock speed changed");
        self.notify();
    }

    /// Jump to `sim_ms`, forwards or backwards. Always notifies.
    pub fn seek(&self, sim_ms: f64) {
        let mut a = self.inner.anchors.get();
        a.sim = sim_ms;
        a.real = self.inner.real.now_ms();
        self.inner.anchors.set(a);
        trace!(sim_ms, "clock seek");
        self.notify();
    }

    /// Register a change listener. Registering the same `Rc` twice keeps a
    /// single entry; both returned subscriptions refer to it.
    pub fn on_change(&self, listener: ChangeListener) -> Subscription {
        let mut listeners = self.inner.listeners.borrow_mut();
        let existing = listeners
            .iter()
            .find(|entry| same_listener(&entry.callback, &listener))
            .map(|entry| entry.id);
        let id = match existing {
            Some(id) => id,
            None => {
                let id = self.inner.next_listener_id.get();
                self.inner.next_listener_id.set(id + 1);
                listeners.push(ListenerEntry {
                    id,
                    callback: listener,
                });
                id
            }
        };
        Subscription {
            id,
            clock: Rc::downgrade(&self.inner),
        }
    }

    pub fn listener_count(&self) -> usize {
        self.inner.listeners.borrow().len()
    }

    fn is_registered(&self, id: u64) -> bool {
        self.inner
            .listeners
            .borrow()
            .iter()
            .any(|entry| entry.id == id)
    }

    /// Run every listener registered when the change happened. Listeners
    /// added during the pass wait for the next change; listeners removed
    /// during the pass are skipped if they have not run yet.
    fn notify(&self) {
        let snapshot: Vec<(u64, ChangeListener)> = self
            .inner
            .listeners
            .borrow()
            .iter()
            .map(|entry| (entry.id, Rc::clone(&entry.callback)))
            .collect();
        for (id, callback) in snapshot {
            if !self.is_registered(id) {
                continue;
            }
            if let Err(payload) = catch_unwind(AssertUnwindSafe(|| callback())) {
                error!(
                    listener = id,
                    error = %panic_message(&*payload),
                    "clock change listener panicked"
                );
            }
        }
    }
}

impl fmt::Debug for VirtualClock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let a = self.inner.anchors.get();
        f.debug_struct("VirtualClock")
            .field("now", &self.now())
            .field("speed", &a.speed)
            .field("paused", &a.paused)
            .field("listeners", &self.listener_count())
            .finish()
    }
}

fn same_listener(a: &ChangeListener, b: &ChangeListener) -> bool {
    std::ptr::eq(Rc::as_ptr(a) as *const (), Rc::as_ptr(b) as *const ())
}

/// Handle returned by [VirtualClock::on_change].
#[derive(Debug, Clone)]
pub struct Subscription {
    id: u64,
    clock: Weak<ClockInner>,
}

impl Subscription {
    /// Remove the listener. Returns `false` if it was already removed or the
    /// clock no longer exists.
    pub fn unsubscribe(&self) -> bool {
        let Some(clock) = self.clock.upgrade() else {
            return false;
        };
        let mut listeners = clock.listeners.borrow_mut();
        let before = listeners.len();
        listeners.retain(|entry| entry.id != self.id);
        listeners.len() != before
    }
}
