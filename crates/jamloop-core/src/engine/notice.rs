//! Realtime notices - anomalies reported by the audio thread
//!
//! The audio thread never logs. When it has to ignore something (an unknown
//! processor id, a full effect stack, a riff that isn't ready) it pushes a
//! [`RealtimeNotice`] onto a wait-free `rtrb` ring. The control thread drains
//! the ring and logs each notice. A full ring drops the notice and counts it.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::riff::{RiffId, SyncState};

use super::command::ProcessorId;

/// Something the audio thread ignored or could not honour
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RealtimeNotice {
    /// `DetachProcessor` named a processor that isn't attached
    UnknownProcessor(ProcessorId),
    /// `AttachProcessor` while every processor slot is taken
    ProcessorSlotsFull(ProcessorId),
    /// `PushEffect` while the effect stack is at capacity
    EffectStackFull,
    /// `PopEffect` on an empty stack
    EffectStackEmpty,
    /// `PlayRiff` for a riff that isn't in the `Success` state
    RiffNotReady { riff: RiffId, state: SyncState },
    /// Riff command arrived while no mixer is installed
    NoMixer,
    /// Stem analysis snapshot could not be published
    SnapshotDropped,
    /// Interleaved output buffer had an odd number of samples
    MalformedOutput { samples: usize },
    /// Non-finite master gain was rejected
    InvalidGain,
}

impl RealtimeNotice {
    /// Whether the notice indicates a caller mistake rather than load
    pub fn is_warning(&self) -> bool {
        !matches!(self, RealtimeNotice::EffectStackEmpty | RealtimeNotice::SnapshotDropped)
    }
}

impl fmt::Display for RealtimeNotice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RealtimeNotice::UnknownProcessor(id) => write!(f, "detach of unknown processor {:?} ignored", id),
            RealtimeNotice::ProcessorSlotsFull(id) => {
                write!(f, "processor {:?} not attached: all slots in use", id)
            }
            RealtimeNotice::EffectStackFull => write!(f, "effect push ignored: stack is full"),
            RealtimeNotice::EffectStackEmpty => write!(f, "effect pop ignored: stack is empty"),
            RealtimeNotice::RiffNotReady { riff, state } => {
                write!(f, "play of riff {:?} ignored: state is {:?}", riff, state)
            }
            RealtimeNotice::NoMixer => write!(f, "riff command ignored: no mixer installed"),
            RealtimeNotice::SnapshotDropped => write!(f, "stem analysis snapshot dropped"),
            RealtimeNotice::MalformedOutput { samples } => {
                write!(f, "interleaved output of {} samples is not stereo", samples)
            }
            RealtimeNotice::InvalidGain => write!(f, "non-finite master gain ignored"),
        }
    }
}

/// Audio-thread side of the notice ring
pub struct NoticeSender {
    producer: rtrb::Producer<RealtimeNotice>,
    dropped: Arc<AtomicU64>,
}

impl NoticeSender {
    /// Push a notice; never blocks
    #[inline]
    pub fn push(&mut self, notice: RealtimeNotice) {
        if self.producer.push(notice).is_err() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
    }
}

/// Control-thread side of the notice ring
pub struct NoticeReceiver {
    consumer: rtrb::Consumer<RealtimeNotice>,
    dropped: Arc<AtomicU64>,
}

impl NoticeReceiver {
    /// Pop every pending notice into `f`, returning how many were popped
    pub fn drain_with(&mut self, mut f: impl FnMut(RealtimeNotice)) -> usize {
        let mut count = 0;
        while let Ok(notice) = self.consumer.pop() {
            f(notice);
            count += 1;
        }
        count
    }

    /// Pop and log every pending notice
    pub fn drain(&mut self) -> usize {
        self.drain_with(|notice| {
            if notice.is_warning() {
                log::warn!("Audio engine: {}", notice);
            } else {
                log::debug!("Audio engine: {}", notice);
            }
        })
    }

    /// Notices lost because the ring was full
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Create a notice ring with room for `capacity` notices
pub fn notice_channel(capacity: usize) -> (NoticeSender, NoticeReceiver) {
    let (producer, consumer) = rtrb::RingBuffer::new(capacity);
    let dropped = Arc::new(AtomicU64::new(0));
    (
        NoticeSender {
            producer,
            dropped: Arc::clone(&dropped),
        },
        NoticeReceiver { consumer, dropped },
    )
}
