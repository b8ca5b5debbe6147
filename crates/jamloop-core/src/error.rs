//! Error types for setup-time failures
//!
//! Nothing on the audio thread returns these. They are produced while riffs
//! are resolved, while the event bus is registered, and while configuration or
//! shared-memory records are read.

use thiserror::Error;

use crate::riff::SyncState;

/// Invalid riff timing constants
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimingError {
    #[error("Bar length must be greater than zero")]
    ZeroBarLength,

    #[error("Sample rate must be greater than zero")]
    ZeroSampleRate,

    #[error("Riff must contain at least one bar")]
    ZeroBarCount,

    #[error("Bar must contain at least one beat segment")]
    ZeroSegments,
}

/// Errors raised while building or resolving a riff
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RiffError {
    #[error("Invalid riff timing: {0}")]
    Timing(#[from] TimingError),

    #[error("Riff declares {0} stems, at most {max} are supported", max = crate::types::NUM_STEMS)]
    TooManyStems(usize),

    #[error("Stem slot {0} is out of range")]
    StemSlotOutOfRange(usize),

    #[error("Stem slot {0} has no audio frames")]
    EmptyStem(usize),

    #[error("Illegal sync transition: {from:?} -> {to:?}")]
    InvalidSyncTransition { from: SyncState, to: SyncState },

    #[error("Riff is not ready (state: {0:?})")]
    NotReady(SyncState),
}

/// Event bus registration errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EventBusError {
    #[error("Event type already registered: {0}")]
    AlreadyRegistered(&'static str),

    #[error("Event pool capacity must be greater than zero: {0}")]
    ZeroCapacity(&'static str),
}

/// Errors reading a shared beat/energy record
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordError {
    #[error("Record too short: {len} bytes, expected {expected}")]
    TooShort { len: usize, expected: usize },

    #[error("Record version mismatch: found {found}, expected {expected}")]
    VersionMismatch { found: u32, expected: u32 },
}

/// Invalid engine configuration
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Configuration value `{0}` must be greater than zero")]
    ZeroValue(&'static str),

    #[error("Event bus has no pool for {0}")]
    UnregisteredEvent(&'static str),
}

pub type TimingResult<T> = Result<T, TimingError>;
pub type RiffResult<T> = Result<T, RiffError>;
pub type EventBusResult<T> = Result<T, EventBusError>;
