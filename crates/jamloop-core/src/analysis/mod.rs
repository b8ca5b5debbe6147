//! Stem analysis - per-stem beat/energy signals and their consensus
//!
//! - [`StemOnsetProbe`] turns the mixer's per-stem buffers into one
//!   [`StemSignals`] per analysis window.
//! - [`StemAmalgamAnalyzer`] folds those signals into a [`StemDataAmalgam`]
//!   with a decaying consensus beat.
//! - [`BeatEnergyRecord`] is the fixed-layout binary form of a snapshot for
//!   readers in other processes.

mod amalgam;
mod onset;
mod record;

pub use amalgam::{StemAmalgamAnalyzer, StemAmalgamEvent, StemDataAmalgam, StemSignals};
pub use onset::StemOnsetProbe;
pub use record::{BeatEnergyRecord, BEAT_ENERGY_RECORD_VERSION};
