//! Audio engine - command queue, riff mixer, master chain
//!
//! The realtime half of the core:
//! - [`EngineHandle`] / [`AudioEngine`]: control-side producer and audio-side
//!   consumer of the lock-free command queue, with completion counters
//! - [`RiffMixer`]: stems to stereo, riff transitions on musical boundaries
//! - [`PermutationBlender`]: per-stem gain targets blended over beats or bars
//! - Master effect stack, clipper, sample processors and mute
//! - [`Collector`]: deferred deallocation of everything dropped on the audio thread

mod command;
mod completion;
mod effect;
mod engine;
mod gc;
mod handle;
mod master_clipper;
mod mixer;
mod notice;
mod permutation;
mod transition;

pub use command::*;
pub use completion::*;
pub use effect::*;
pub use engine::*;
pub use gc::*;
pub use handle::{create_engine, register_engine_events, EngineHandle, ProcessorToken};
pub use master_clipper::*;
pub use mixer::*;
pub use notice::*;
pub use permutation::*;
pub use transition::*;
