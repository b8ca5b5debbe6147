//! Permutation blender - smoothed per-stem mute/solo multipliers
//!
//! A [`Permutation`] is the per-stem gain multiplier vector (0 = muted,
//! 1 = fully on). Control threads enqueue target permutations; once per
//! callback the audio thread flushes the queue, keeping only the latest
//! request, and walks the current permutation linearly towards it.
//!
//! The blend length comes from [`PermutationChangeRate`] and the riff's bar
//! length: after exactly that many samples the current permutation equals
//! the target, and it never overshoots on the way.

use std::sync::atomic::{AtomicU32, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;

use crossbeam::queue::ArrayQueue;

use crate::config::PermutationChangeRate;
use crate::context::{EngineContext, OperationId};
use crate::types::{StemIndex, NUM_STEMS};

/// Per-stem gain multipliers in 0..1
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Permutation {
    gains: [f32; NUM_STEMS],
}

impl Permutation {
    pub fn new(gains: [f32; NUM_STEMS]) -> Self {
        Self {
            gains: gains.map(|g| if g.is_finite() { g.clamp(0.0, 1.0) } else { 0.0 }),
        }
    }

    /// Every stem at full level
    pub const fn all_on() -> Self {
        Self {
            gains: [1.0; NUM_STEMS],
        }
    }

    pub const fn silent() -> Self {
        Self {
            gains: [0.0; NUM_STEMS],
        }
    }

    /// Only `stem` audible
    pub fn solo(stem: StemIndex) -> Self {
        let mut gains = [0.0; NUM_STEMS];
        gains[stem.get()] = 1.0;
        Self { gains }
    }

    /// Build from an on/off mask (bit `i` = stem `i`)
    pub fn from_mask(mask: u8) -> Self {
        Self {
            gains: std::array::from_fn(|i| if mask & (1 << i) != 0 { 1.0 } else { 0.0 }),
        }
    }

    /// Copy with one stem set to `gain`
    pub fn with_gain(mut self, stem: StemIndex, gain: f32) -> Self {
        self.gains[stem.get()] = if gain.is_finite() { gain.clamp(0.0, 1.0) } else { 0.0 };
        self
    }

    #[inline]
    pub fn gain(&self, stem: StemIndex) -> f32 {
        self.gains[stem.get()]
    }

    #[inline]
    pub fn gains(&self) -> &[f32; NUM_STEMS] {
        &self.gains
    }
}

impl Default for Permutation {
    fn default() -> Self {
        Self::all_on()
    }
}

/// A queued permutation with the id handed back to its submitter
#[derive(Debug, Clone, Copy)]
pub struct PermutationRequest {
    pub id: OperationId,
    pub target: Permutation,
}

/// Bounded multi-producer queue of permutation requests
///
/// Only the newest request matters, so a full queue evicts the oldest entry
/// instead of rejecting the new one.
pub struct PermutationQueue {
    ctx: Arc<EngineContext>,
    queue: ArrayQueue<PermutationRequest>,
}

impl PermutationQueue {
    pub fn new(ctx: Arc<EngineContext>, capacity: usize) -> Self {
        Self {
            ctx,
            queue: ArrayQueue::new(capacity.max(1)),
        }
    }

    /// Queue a target permutation; never blocks
    pub fn enqueue_permutation(&self, target: Permutation) -> OperationId {
        let id = self.ctx.next_operation_id();
        self.queue.force_push(PermutationRequest { id, target });
        id
    }

    /// Pop everything, returning only the newest request
    #[inline]
    fn take_latest(&self) -> Option<PermutationRequest> {
        let mut latest = None;
        while let Some(request) = self.queue.pop() {
            latest = Some(request);
        }
        latest
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}

/// Lock-free view of the blender state for observers
#[derive(Debug)]
pub struct PermutationObserver {
    current: [AtomicU32; NUM_STEMS],
    target: [AtomicU32; NUM_STEMS],
    /// Id of the last request taken from the queue (0 = none)
    last_applied: AtomicU64,
    /// Live [`PermutationChangeRate`] as `u8`; seeds every new blender
    change_rate: AtomicU8,
}

impl PermutationObserver {
    pub fn new() -> Self {
        Self::with_change_rate(PermutationChangeRate::default())
    }

    pub fn with_change_rate(rate: PermutationChangeRate) -> Self {
        Self {
            current: std::array::from_fn(|_| AtomicU32::new(1.0f32.to_bits())),
            target: std::array::from_fn(|_| AtomicU32::new(1.0f32.to_bits())),
            last_applied: AtomicU64::new(0),
            change_rate: AtomicU8::new(rate as u8),
        }
    }

    /// Change rate of the running blender
    pub fn change_rate(&self) -> PermutationChangeRate {
        PermutationChangeRate::from_u8(self.change_rate.load(Ordering::Relaxed))
    }

    pub fn current(&self) -> Permutation {
        Permutation {
            gains: std::array::from_fn(|i| f32::from_bits(self.current[i].load(Ordering::Relaxed))),
        }
    }

    pub fn target(&self) -> Permutation {
        Permutation {
            gains: std::array::from_fn(|i| f32::from_bits(self.target[i].load(Ordering::Relaxed))),
        }
    }

    /// Whether the request with this id (or a later one) has been picked up
    pub fn has_applied(&self, id: OperationId) -> bool {
        self.last_applied.load(Ordering::Acquire) >= id.0
    }

    fn publish_current(&self, p: &Permutation) {
        for (slot, gain) in self.current.iter().zip(p.gains.iter()) {
            slot.store(gain.to_bits(), Ordering::Relaxed);
        }
    }

    fn publish_target(&self, p: &Permutation, id: OperationId) {
        for (slot, gain) in self.target.iter().zip(p.gains.iter()) {
            slot.store(gain.to_bits(), Ordering::Relaxed);
        }
        self.last_applied.store(id.0, Ordering::Release);
    }
}

impl Default for PermutationObserver {
    fn default() -> Self {
        Self::new()
    }
}

/// Audio-thread side: tracks current/target and the per-sample delta
pub struct PermutationBlender {
    queue: Arc<PermutationQueue>,
    observer: Arc<PermutationObserver>,
    current: Permutation,
    target: Permutation,
    delta: [f32; NUM_STEMS],
    samples_remaining: u64,
    change_rate: PermutationChangeRate,
    sample_rate: u32,
    bar_length_seconds: f64,
}

impl PermutationBlender {
    /// Resume from the observer's published state, including its change rate
    pub fn new(
        queue: Arc<PermutationQueue>,
        observer: Arc<PermutationObserver>,
        sample_rate: u32,
    ) -> Self {
        let current = observer.current();
        let target = observer.target();
        let change_rate = observer.change_rate();
        let mut blender = Self {
            queue,
            observer,
            current,
            target,
            delta: [0.0; NUM_STEMS],
            samples_remaining: 0,
            change_rate,
            sample_rate,
            bar_length_seconds: 2.0,
        };
        // Pick up a blend that was in flight in a previous mixer
        if current != target {
            blender.retarget();
        }
        blender
    }

    /// Bar length used for the next blend span
    pub fn set_bar_length(&mut self, bar_length_seconds: f64) {
        if bar_length_seconds.is_finite() && bar_length_seconds > 0.0 {
            self.bar_length_seconds = bar_length_seconds;
        }
    }

    /// Drain pending requests, keeping only the most recent one
    ///
    /// Calling this again with nothing queued leaves target and delta as
    /// they are.
    pub fn flush_pending_permutations(&mut self) {
        let Some(request) = self.queue.take_latest() else {
            return;
        };
        self.observer.publish_target(&request.target, request.id);
        if request.target == self.target {
            return;
        }
        self.target = request.target;
        self.retarget();
    }

    /// Advance `current` by `samples`, clamped at the target
    pub fn update_permutations(&mut self, samples: usize, bar_length_seconds: f64) {
        self.set_bar_length(bar_length_seconds);
        if self.samples_remaining == 0 {
            return;
        }

        let step = (samples as u64).min(self.samples_remaining);
        self.samples_remaining -= step;
        if self.samples_remaining == 0 {
            self.current = self.target;
        } else {
            for i in 0..NUM_STEMS {
                let target = self.target.gains[i];
                let next = self.current.gains[i] + self.delta[i] * step as f32;
                self.current.gains[i] = if self.delta[i] >= 0.0 {
                    next.min(target)
                } else {
                    next.max(target)
                };
            }
        }
        self.observer.publish_current(&self.current);
    }

    /// Change the blend rate; an in-flight blend is re-spread over the new span
    pub fn set_change_rate(&mut self, rate: PermutationChangeRate) {
        self.change_rate = rate;
        self.observer.change_rate.store(rate as u8, Ordering::Relaxed);
        if self.samples_remaining > 0 {
            self.retarget();
        }
    }

    /// Recompute delta and span from the current distance to target
    fn retarget(&mut self) {
        let span = self
            .change_rate
            .span_samples(self.bar_length_seconds, self.sample_rate);
        self.samples_remaining = span;
        for i in 0..NUM_STEMS {
            self.delta[i] = (self.target.gains[i] - self.current.gains[i]) / span as f32;
        }
    }

    #[inline]
    pub fn current_permutation(&self) -> Permutation {
        self.current
    }

    #[inline]
    pub fn target_permutation(&self) -> Permutation {
        self.target
    }

    pub fn delta(&self) -> &[f32; NUM_STEMS] {
        &self.delta
    }

    pub fn samples_remaining(&self) -> u64 {
        self.samples_remaining
    }

    pub fn is_blending(&self) -> bool {
        self.samples_remaining > 0
    }

    pub fn change_rate(&self) -> PermutationChangeRate {
        self.change_rate
    }

    pub fn bar_length_seconds(&self) -> f64 {
        self.bar_length_seconds
    }
}
