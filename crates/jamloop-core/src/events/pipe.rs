//! One typed event pipe: a fixed pool of in-flight events plus listeners

use std::any::Any;
use std::sync::atomic::{AtomicUsize, Ordering};

use crossbeam::queue::ArrayQueue;
use parking_lot::Mutex;

/// Identifier of a registered listener, unique within one bus
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(pub u64);

type Listener<T> = Box<dyn FnMut(&T) + Send>;

/// Pre-allocated slots for one event type
///
/// The `ArrayQueue` is the slab: its slots are allocated at registration,
/// `push` moves an event into a free slot and `pop` moves it out again, so
/// sending and dispatching never allocate. Listeners are only touched on the
/// control thread, which is the one place a lock is allowed.
pub(crate) struct EventPipe<T> {
    name: &'static str,
    ready: ArrayQueue<T>,
    listeners: Mutex<Vec<(ListenerId, Listener<T>)>>,
    high_water: AtomicUsize,
}

impl<T: Send + 'static> EventPipe<T> {
    pub(crate) fn new(name: &'static str, capacity: usize) -> Self {
        Self {
            name,
            ready: ArrayQueue::new(capacity),
            listeners: Mutex::new(Vec::new()),
            high_water: AtomicUsize::new(0),
        }
    }

    /// Move an event into a free slot; hands it back when the pool is exhausted
    #[inline]
    pub(crate) fn push(&self, event: T) -> Result<(), T> {
        self.ready.push(event)?;
        self.high_water.fetch_max(self.ready.len(), Ordering::Relaxed);
        Ok(())
    }

    pub(crate) fn add_listener(&self, id: ListenerId, listener: Listener<T>) {
        self.listeners.lock().push((id, listener));
    }

    pub(crate) fn capacity(&self) -> usize {
        self.ready.capacity()
    }

    pub(crate) fn high_water(&self) -> usize {
        self.high_water.load(Ordering::Relaxed)
    }
}

/// Type-erased pipe operations used by the bus
pub(crate) trait ErasedPipe: Send + Sync {
    fn name(&self) -> &'static str;

    fn as_any(&self) -> &dyn Any;

    /// Deliver every event queued when the call started, in send order
    fn dispatch(&self) -> usize;

    /// Drop every queued event without invoking listeners
    fn discard(&self) -> usize;

    fn remove_listener(&self, id: ListenerId) -> bool;

    fn pending(&self) -> usize;
}

impl<T: Send + 'static> ErasedPipe for EventPipe<T> {
    fn name(&self) -> &'static str {
        self.name
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn dispatch(&self) -> usize {
        // Events sent by listeners during this dispatch wait for the next tick
        let queued = self.ready.len();
        let mut listeners = self.listeners.lock();
        let mut delivered = 0;
        for _ in 0..queued {
            let Some(event) = self.ready.pop() else {
                break;
            };
            for (_, listener) in listeners.iter_mut() {
                listener(&event);
            }
            delivered += 1;
        }
        delivered
    }

    fn discard(&self) -> usize {
        let mut dropped = 0;
        while self.ready.pop().is_some() {
            dropped += 1;
        }
        dropped
    }

    fn remove_listener(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.lock();
        match listeners.iter().position(|(existing, _)| *existing == id) {
            Some(index) => {
                listeners.remove(index);
                true
            }
            None => false,
        }
    }

    fn pending(&self) -> usize {
        self.ready.len()
    }
}
