//! Deterministic event queue.
//!
//! A [BinaryHeap] with reversed `Ord` on [Queued] acts as a min-heap keyed
//! by `(time, sequence)`. The sequence is a strictly increasing insertion
//! counter, so entries never compare equal and same-time events pop in push
//! order. Cancellation is lazy: a canceled entry stays in the heap until it
//! reaches the root, where `peek`/`pop` discard it.

use std::cell::Cell;
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::fmt;
use std::rc::Rc;

/// Unique, strictly increasing handle of a pushed event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EventId(u64);

impl EventId {
    #[inline]
    pub fn new(raw: u64) -> Self {
        EventId(raw)
    }

    #[inline]
    pub fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "E#{}", self.0)
    }
}

/// O(1) cancellation handle sharing the canceled flag with its heap entry.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    id: EventId,
    time: f64,
    canceled: Rc<Cell<bool>>,
}

impl CancelHandle {
    pub fn id(&self) -> EventId {
        self.id
    }

    /// Scheduled simulation time of the event.
    pub fn time(&self) -> f64 {
        self.time
    }

    /// Mark the event canceled. `true` on the first call only.
    pub fn cancel(&self) -> bool {
        !self.canceled.replace(true)
    }

    pub fn is_canceled(&self) -> bool {
        self.canceled.get()
    }
}

/// An entry owned by the queue.
pub struct Queued<T> {
    id: EventId,
    time: f64,
    sequence: u64,
    canceled: Rc<Cell<bool>>,
    item: T,
}

impl<T> Queued<T> {
    pub fn id(&self) -> EventId {
        self.id
    }

    pub fn time(&self) -> f64 {
        self.time
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn item(&self) -> &T {
        &self.item
    }

    pub fn into_item(self) -> T {
        self.item
    }

    fn is_canceled(&self) -> bool {
        self.canceled.get()
    }
}

impl<T: fmt::Debug> fmt::Debug for Queued<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Queued")
            .field("id", &self.id)
            .field("time", &self.time)
            .field("sequence", &self.sequence)
            .field("canceled", &self.canceled.get())
            .field("item", &self.item)
            .finish()
    }
}

impl<T> PartialEq for Queued<T> {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl<T> Eq for Queued<T> {}

/// Reversed so that `BinaryHeap` pops the smallest `(time, sequence)` first.
impl<T> Ord for Queued<T> {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .time
            .total_cmp(&self.time)
            .then_with(|| other.sequence.cmp(&self.sequence))
    }
}

impl<T> PartialOrd for Queued<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

pub struct EventQueue<T> {
    heap: BinaryHeap<Queued<T>>,
    next_sequence: u64,
    next_id: u64,
}

impl<T> EventQueue<T> {
    pub fn new() -> Self {
        Self {
            heap: BinaryHeap::new(),
            next_sequence: 0,
            next_id: 0,
        }
    }

    /// Insert `item` at simulation time `time`. O(log n).
    pub fn push(&mut self, time: f64, item: T) -> CancelHandle {
        let id = EventId(self.next_id);
        self.next_id += 1;
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        let canceled = Rc::new(Cell::new(false));
        self.heap.push(Queued {
            id,
            time,
            sequence,
            canceled: Rc::clone(&canceled),
            item,
        });
        CancelHandle { id, time, canceled }
    }

    /// Next live entry. Discards canceled entries sitting at the root.
    pub fn peek(&mut self) -> Option<&Queued<T>> {
        self.discard_canceled_root();
        self.heap.peek()
    }

    pub fn peek_time(&mut self) -> Option<f64> {
        self.peek().map(Queued::time)
    }

    pub fn pop(&mut self) -> Option<Queued<T>> {
        self.discard_canceled_root();
        self.heap.pop()
    }

    /// Pop the next live entry only if it is due at or before `target`.
    pub fn pop_due(&mut self, target: f64) -> Option<Queued<T>> {
        match self.peek_time() {
            Some(time) if time <= target => self.heap.pop(),
            _ => None,
        }
    }

    /// Cancel by raw id. Linear scan; prefer [CancelHandle::cancel].
    pub fn cancel(&self, id: EventId) -> bool {
        self.heap
            .iter()
            .find(|entry| entry.id == id)
            .is_some_and(|entry| !entry.canceled.replace(true))
    }

    /// Number of live (non-canceled) entries. O(n).
    pub fn len(&self) -> usize {
        self.heap.iter().filter(|entry| !entry.is_canceled()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.iter().all(Queued::is_canceled)
    }

    /// Drop everything and restart id/sequence numbering.
    pub fn clear(&mut self) {
        self.heap.clear();
        self.next_sequence = 0;
        self.next_id = 0;
    }

    fn discard_canceled_root(&mut self) {
        while self.heap.peek().is_some_and(Queued::is_canceled) {
            self.heap.pop();
        }
    }
}

impl<T> Default for EventQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for EventQueue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventQueue")
            .field("live", &self.len())
            .field("stored", &self.heap.len())
            .field("next_id", &self.next_id)
            .finish()
    }
}
