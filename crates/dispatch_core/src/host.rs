//! Host environment abstractions: a single-shot timer primitive and a local
//! task spawner for asynchronous handler bodies.
//!
//! Implementations must never invoke a timer callback from inside `arm`;
//! callbacks run on a later turn of the host's loop.

use std::fmt;

use futures::future::LocalBoxFuture;

mod manual;
#[cfg(feature = "tokio-host")]
mod runtime;

pub use manual::ManualHost;
#[cfg(feature = "tokio-host")]
pub use runtime::TokioHost;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimerHandle(u64);

impl TimerHandle {
    pub fn new(raw: u64) -> Self {
        TimerHandle(raw)
    }

    pub fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for TimerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "timer#{}", self.0)
    }
}

pub type TimerCallback = Box<dyn FnOnce()>;

pub trait TimerService {
    /// Run `callback` once, at or after `delay_ms` real milliseconds.
    fn arm(&self, delay_ms: f64, callback: TimerCallback) -> TimerHandle;

    /// Prevent a pending callback from running. Unknown or already fired
    /// handles are ignored.
    fn cancel(&self, handle: TimerHandle);
}

pub trait Spawner {
    /// Run `task` to completion on the host without blocking the caller.
    fn spawn(&self, task: LocalBoxFuture<'static, ()>);
}

/// Everything a [crate::scheduler::Scheduler] needs from its environment.
pub trait Host: TimerService + Spawner {}

impl<T: TimerService + Spawner + ?Sized> Host for T {}
