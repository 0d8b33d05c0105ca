//! Discrete-event scheduling core for the dispatch training simulator.
//!
//! [clock::VirtualClock] is a controllable time base (speed, pause, seek),
//! [queue::EventQueue] a deterministic `(time, sequence)` min-heap with lazy
//! cancellation, and [scheduler::Scheduler] bridges the two onto a single
//! real timer supplied by a [host::Host].

pub mod clock;
pub mod config;
pub mod error;
pub mod event;
pub mod host;
pub mod profiling;
pub mod queue;
pub mod realtime;
pub mod scheduler;

#[cfg(feature = "test-helpers")]
pub mod test_helpers;

pub use clock::{Subscription, VirtualClock};
pub use config::{ClockConfig, CoreConfig, SchedulerConfig};
pub use error::{ConfigError, SchedulerError, SchedulerResult};
pub use event::{Event, EventSpec, Handler, HandlerError, HandlerFuture};
pub use host::{Host, ManualHost, Spawner, TimerHandle, TimerService};
pub use queue::{CancelHandle, EventId, EventQueue, Queued};
pub use realtime::{ManualClock, MonotonicClock, RealClock};
pub use scheduler::{HandlerContext, ScheduledHandle, Scheduler};

#[cfg(feature = "tokio-host")]
pub use host::TokioHost;
