//! Jamloop Core - realtime riff mixing for the jamloop player
//!
//! Control threads talk to the audio thread only through lock-free queues:
//! commands go in through [`engine::EngineHandle`], state comes back through
//! atomics, the [`events::EventBus`] and the realtime notice ring.

pub mod analysis;
pub mod config;
pub mod context;
pub mod engine;
pub mod error;
pub mod events;
pub mod music;
pub mod riff;
pub mod types;

pub use types::*;
