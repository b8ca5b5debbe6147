//! Command queue bridging control threads and the audio thread
//!
//! Any thread may submit an [`EngineCommand`]; the audio thread drains the
//! queue at the start of every callback and applies each command exactly
//! once, in submission order per producer.
//!
//! The queue is a bounded `crossbeam` `ArrayQueue`, allocated once at
//! startup. Push and pop are lock-free and never allocate, so the audio
//! thread can drain it inside the callback.
//!
//! Heavy payloads travel as `basedrop` handles. When the engine replaces a
//! mixer or pops an effect, the old value is dropped on the audio thread,
//! which only enqueues it for the collector thread.

use basedrop::{Owned, Shared};
use crossbeam::queue::ArrayQueue;

use crate::config::PermutationChangeRate;
use crate::context::AsyncCommandCounter;
use crate::riff::Riff;

use super::effect::{MasterEffect, SampleProcessor};
use super::mixer::RiffMixer;

/// Identifier of an attached sample processor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProcessorId(pub u64);

/// Where a queued riff switch takes effect, measured on the outgoing riff
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TransitionBoundary {
    /// At the start of the next callback chunk
    Immediate,
    /// Next beat segment
    NextSegment,
    /// Next bar line
    #[default]
    NextBar,
    /// When the outgoing riff wraps
    NextLoop,
}

/// Commands sent from control threads to the audio thread
///
/// One payload shape per variant. Nothing here can fail when applied:
/// commands that name something the engine doesn't have are ignored and
/// reported as a realtime notice.
pub enum EngineCommand {
    /// Replace the active mixer
    SwapMixer(Owned<RiffMixer>),
    /// Push an effect on top of the master effect stack
    PushEffect(Owned<Box<dyn MasterEffect>>),
    /// Pop the top of the master effect stack
    PopEffect,
    SetMute(bool),
    ToggleMute,
    /// Linear master gain
    SetMasterGain(f32),
    /// Attach a processor that observes the pre-mute master buffer
    AttachProcessor {
        id: ProcessorId,
        processor: Owned<Box<dyn SampleProcessor>>,
    },
    DetachProcessor(ProcessorId),
    /// Switch to a resolved riff at the given boundary
    PlayRiff {
        riff: Shared<Riff>,
        boundary: TransitionBoundary,
    },
    /// Drop the current riff and any pending transition
    Stop,
    /// Change how fast permutation changes are blended in
    SetChangeRate(PermutationChangeRate),
}

impl EngineCommand {
    /// Short name for logging
    pub fn kind(&self) -> &'static str {
        match self {
            EngineCommand::SwapMixer(_) => "SwapMixer",
            EngineCommand::PushEffect(_) => "PushEffect",
            EngineCommand::PopEffect => "PopEffect",
            EngineCommand::SetMute(_) => "SetMute",
            EngineCommand::ToggleMute => "ToggleMute",
            EngineCommand::SetMasterGain(_) => "SetMasterGain",
            EngineCommand::AttachProcessor { .. } => "AttachProcessor",
            EngineCommand::DetachProcessor(_) => "DetachProcessor",
            EngineCommand::PlayRiff { .. } => "PlayRiff",
            EngineCommand::Stop => "Stop",
            EngineCommand::SetChangeRate(_) => "SetChangeRate",
        }
    }
}

/// A command tagged with the counter its submitter waits on
pub struct QueuedCommand {
    pub counter: AsyncCommandCounter,
    pub command: EngineCommand,
}

/// Bounded multi-producer queue of commands, drained by the audio thread
pub struct CommandQueue {
    queue: ArrayQueue<QueuedCommand>,
}

impl CommandQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            queue: ArrayQueue::new(capacity),
        }
    }

    /// Enqueue without blocking; hands the command back when full
    #[inline]
    pub fn push(&self, command: QueuedCommand) -> Result<(), QueuedCommand> {
        self.queue.push(command)
    }

    #[inline]
    pub fn pop(&self) -> Option<QueuedCommand> {
        self.queue.pop()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.queue.capacity()
    }
}
