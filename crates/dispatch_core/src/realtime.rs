//! Wall-clock sources that [crate::clock::VirtualClock] anchors against.

use std::cell::Cell;
use std::rc::Rc;
use std::time::Instant;

/// Monotonic real-time source in milliseconds.
pub trait RealClock {
    /// Current real time in ms. Must never decrease between calls.
    fn now_ms(&self) -> f64;
}

/// Real clock backed by [Instant]; time 0 is the moment it was created.
#[derive(Debug, Clone, Copy)]
pub struct MonotonicClock {
    origin: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl RealClock for MonotonicClock {
    fn now_ms(&self) -> f64 {
        self.origin.elapsed().as_secs_f64() * 1000.0
    }
}

/// Hand-driven real clock. Clones share the same reading.
///
/// Used by [crate::host::ManualHost] so tests and fast-forward runs control
/// exactly how much "wall" time passes between timer fires.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    now: Rc<Cell<f64>>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn starting_at(ms: f64) -> Self {
        Self {
            now: Rc::new(Cell::new(ms)),
        }
    }

    /// Move the reading forward to `ms`. Earlier values are ignored so the
    /// clock stays monotonic.
    pub fn set(&self, ms: f64) {
        if ms > self.now.get() {
            self.now.set(ms);
        }
    }

    /// Advance by `ms` (negative values are ignored).
    pub fn advance(&self, ms: f64) {
        self.set(self.now.get() + ms);
    }
}

impl RealClock for ManualClock {
    fn now_ms(&self) -> f64 {
        self.now.get()
    }
}
