//! Typed publish/subscribe between any thread and the control thread
//!
//! Every event type is registered up front with a fixed number of in-flight
//! events. `send` can be called from any thread, including the audio
//! thread: it never blocks and never allocates. Listeners run only inside
//! [`EventBus::dispatch`], which the control thread calls once per tick.
//!
//! Events of one type are delivered in send order. There is no ordering
//! across types; types are dispatched in registration order.
//!
//! ```ignore
//! let bus = EventBusBuilder::new()
//!     .register::<StemAmalgamEvent>(64)?
//!     .build();
//!
//! let handle = bus.add_listener(|event: &StemAmalgamEvent| ui.update(event));
//! // audio thread
//! bus.try_send(event);
//! // control thread, once per tick
//! bus.dispatch();
//! ```

use std::any::TypeId;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use crate::error::{EventBusError, EventBusResult};

use super::pipe::{ErasedPipe, EventPipe, ListenerId};

/// Why `try_send` handed an event back
pub enum SendError<T> {
    /// Every slot for this type is in flight
    Full(T),
    /// The bus has been shut down
    Closed(T),
    /// The type was never registered
    Unregistered(T),
}

impl<T> SendError<T> {
    pub fn into_inner(self) -> T {
        match self {
            SendError::Full(event) | SendError::Closed(event) | SendError::Unregistered(event) => {
                event
            }
        }
    }
}

impl<T> fmt::Debug for SendError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SendError::Full(_) => f.write_str("Full(..)"),
            SendError::Closed(_) => f.write_str("Closed(..)"),
            SendError::Unregistered(_) => f.write_str("Unregistered(..)"),
        }
    }
}

/// Registers event types before the bus is shared
#[derive(Default)]
pub struct EventBusBuilder {
    pipes: Vec<Box<dyn ErasedPipe>>,
    index: HashMap<TypeId, usize>,
}

impl EventBusBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-allocate `capacity` in-flight slots for events of type `T`
    pub fn register<T: Send + 'static>(mut self, capacity: usize) -> EventBusResult<Self> {
        let name = std::any::type_name::<T>();
        if capacity == 0 {
            return Err(EventBusError::ZeroCapacity(name));
        }
        let type_id = TypeId::of::<T>();
        if self.index.contains_key(&type_id) {
            return Err(EventBusError::AlreadyRegistered(name));
        }
        self.index.insert(type_id, self.pipes.len());
        self.pipes.push(Box::new(EventPipe::<T>::new(name, capacity)));
        log::debug!("EventBus: registered {} (capacity {})", name, capacity);
        Ok(self)
    }

    pub fn build(self) -> Arc<EventBus> {
        Arc::new(EventBus {
            pipes: self.pipes,
            index: self.index,
            closed: AtomicBool::new(false),
            next_listener: AtomicU64::new(1),
        })
    }
}

pub struct EventBus {
    pipes: Vec<Box<dyn ErasedPipe>>,
    index: HashMap<TypeId, usize>,
    closed: AtomicBool,
    next_listener: AtomicU64,
}

impl EventBus {
    #[inline]
    fn pipe<T: Send + 'static>(&self) -> Option<&EventPipe<T>> {
        let slot = *self.index.get(&TypeId::of::<T>())?;
        self.pipes[slot].as_any().downcast_ref::<EventPipe<T>>()
    }

    pub fn is_registered<T: Send + 'static>(&self) -> bool {
        self.index.contains_key(&TypeId::of::<T>())
    }

    /// Send an event from any thread
    ///
    /// Returns `false` only when the bus has been shut down.
    ///
    /// # Panics
    ///
    /// When `T` isn't registered or all of its slots are in flight. Both
    /// are sizing mistakes; use [`EventBus::try_send`] where that can't be
    /// ruled out.
    pub fn send<T: Send + 'static>(&self, event: T) -> bool {
        match self.try_send(event) {
            Ok(()) => true,
            Err(SendError::Closed(_)) => false,
            Err(SendError::Full(_)) => panic!(
                "EventBus: capacity exceeded for {}",
                std::any::type_name::<T>()
            ),
            Err(SendError::Unregistered(_)) => panic!(
                "EventBus: event type not registered: {}",
                std::any::type_name::<T>()
            ),
        }
    }

    /// Send without panicking, handing the event back on failure
    pub fn try_send<T: Send + 'static>(&self, event: T) -> Result<(), SendError<T>> {
        if self.closed.load(Ordering::Acquire) {
            return Err(SendError::Closed(event));
        }
        let Some(pipe) = self.pipe::<T>() else {
            return Err(SendError::Unregistered(event));
        };
        pipe.push(event).map_err(SendError::Full)
    }

    /// Subscribe to events of type `T` (control thread)
    ///
    /// Listeners run inside [`EventBus::dispatch`], in registration order.
    /// They must not block, and must not add or remove listeners for the
    /// same event type.
    ///
    /// # Panics
    ///
    /// When `T` isn't registered.
    pub fn add_listener<T, F>(self: &Arc<Self>, listener: F) -> ListenerHandle
    where
        T: Send + 'static,
        F: FnMut(&T) + Send + 'static,
    {
        let Some(pipe) = self.pipe::<T>() else {
            panic!("EventBus: event type not registered: {}", std::any::type_name::<T>());
        };
        let id = ListenerId(self.next_listener.fetch_add(1, Ordering::Relaxed));
        pipe.add_listener(id, Box::new(listener));
        ListenerHandle {
            bus: Arc::downgrade(self),
            type_id: TypeId::of::<T>(),
            id,
        }
    }

    /// Unsubscribe; returns `false` if the listener was already gone
    pub fn remove_listener(&self, handle: &ListenerHandle) -> bool {
        self.index
            .get(&handle.type_id)
            .is_some_and(|slot| self.pipes[*slot].remove_listener(handle.id))
    }

    /// Deliver queued events to listeners (control thread, once per tick)
    ///
    /// Returns the number of events delivered. After shutdown nothing is
    /// delivered.
    pub fn dispatch(&self) -> usize {
        if self.closed.load(Ordering::Acquire) {
            return 0;
        }
        self.pipes.iter().map(|pipe| pipe.dispatch()).sum()
    }

    /// Events waiting for the next dispatch, across all types
    pub fn pending(&self) -> usize {
        self.pipes.iter().map(|pipe| pipe.pending()).sum()
    }

    /// Most events of type `T` that were ever in flight at once
    pub fn high_water<T: Send + 'static>(&self) -> Option<usize> {
        self.pipe::<T>().map(|pipe| pipe.high_water())
    }

    pub fn capacity<T: Send + 'static>(&self) -> Option<usize> {
        self.pipe::<T>().map(|pipe| pipe.capacity())
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Refuse further sends and drop queued events without delivering them
    pub fn shutdown(&self) -> usize {
        self.closed.store(true, Ordering::Release);
        let discarded: usize = self.pipes.iter().map(|pipe| pipe.discard()).sum();
        if discarded > 0 {
            log::debug!("EventBus: discarded {} undelivered events", discarded);
        }
        for pipe in &self.pipes {
            log::trace!("EventBus: closed pipe {}", pipe.name());
        }
        discarded
    }
}

impl Drop for EventBus {
    fn drop(&mut self) {
        if !self.is_closed() {
            self.shutdown();
        }
    }
}

/// Weak handle to a registered listener
///
/// Tolerates the bus being dropped first: removal then does nothing.
#[derive(Debug)]
pub struct ListenerHandle {
    bus: Weak<EventBus>,
    type_id: TypeId,
    id: ListenerId,
}

impl ListenerHandle {
    pub fn id(&self) -> ListenerId {
        self.id
    }

    /// Unsubscribe; `false` when the bus or the listener is already gone
    pub fn remove(self) -> bool {
        match self.bus.upgrade() {
            Some(bus) => bus.remove_listener(&self),
            None => false,
        }
    }
}
