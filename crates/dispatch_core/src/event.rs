//! Events as seen by callers (what to schedule) and by handlers (what fired).

use std::fmt;

use futures::future::LocalBoxFuture;

use crate::queue::EventId;
use crate::scheduler::HandlerContext;

/// Error type handlers report. Logged and counted, never propagated.
pub type HandlerError = anyhow::Error;

/// Body of an asynchronous handler, run on the host's [crate::host::Spawner].
pub type HandlerFuture = LocalBoxFuture<'static, Result<(), HandlerError>>;

type SyncFn<C, K, P> =
    Box<dyn FnOnce(&HandlerContext<'_, C, K, P>, Event<K, P>) -> Result<(), HandlerError>>;
type SpawnFn<C, K, P> = Box<dyn FnOnce(&HandlerContext<'_, C, K, P>, Event<K, P>) -> HandlerFuture>;

/// A fired event handed to its handler.
#[derive(Debug, Clone, PartialEq)]
pub struct Event<K, P> {
    pub id: EventId,
    /// Scheduled simulation time (exact, independent of timer jitter).
    pub time: f64,
    pub kind: K,
    pub payload: Option<P>,
}

/// Code run when an event fires. Each event fires at most once, so handlers
/// are `FnOnce` and may move captured state out.
pub enum Handler<C, K, P> {
    Sync(SyncFn<C, K, P>),
    /// The returned future is spawned and the batch moves on without
    /// waiting for it: invocation order is guaranteed, completion order is not.
    Spawn(SpawnFn<C, K, P>),
}

impl<C, K, P> Handler<C, K, P> {
    pub fn sync<F>(f: F) -> Self
    where
        F: FnOnce(&HandlerContext<'_, C, K, P>, Event<K, P>) -> Result<(), HandlerError> + 'static,
    {
        Handler::Sync(Box::new(f))
    }

    pub fn spawn<F>(f: F) -> Self
    where
        F: FnOnce(&HandlerContext<'_, C, K, P>, Event<K, P>) -> HandlerFuture + 'static,
    {
        Handler::Spawn(Box::new(f))
    }
}

impl<C, K, P> fmt::Debug for Handler<C, K, P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Handler::Sync(_) => f.write_str("Handler::Sync"),
            Handler::Spawn(_) => f.write_str("Handler::Spawn"),
        }
    }
}

/// An event to be scheduled: kind tag, optional payload, and handler.
#[derive(Debug)]
pub struct EventSpec<C, K, P> {
    pub kind: K,
    pub payload: Option<P>,
    pub handler: Handler<C, K, P>,
}

impl<C, K, P> EventSpec<C, K, P> {
    pub fn new(kind: K, handler: Handler<C, K, P>) -> Self {
        Self {
            kind,
            payload: None,
            handler,
        }
    }

    pub fn with_payload(mut self, payload: P) -> Self {
        self.payload = Some(payload);
        self
    }
}
