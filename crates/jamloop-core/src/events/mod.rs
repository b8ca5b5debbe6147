//! Event bus - typed, allocation-free cross-thread notifications

mod bus;
mod pipe;

pub use bus::{EventBus, EventBusBuilder, ListenerHandle, SendError};
pub use pipe::ListenerId;
