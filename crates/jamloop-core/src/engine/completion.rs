//! Command completion watermark
//!
//! Producers take a counter from [`EngineContext`] before pushing, so with
//! several producers the queue order can differ from counter order. The
//! tracker records which counters have been retired in a pre-allocated ring
//! of flags and only advances the shared `completed` watermark over a
//! contiguous run. `completed >= n` therefore always means every command up
//! to `n` has been applied.
//!
//! Only the audio thread advances the watermark. A producer whose push was
//! rejected retires its own counter so the watermark doesn't stall on it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::context::{AsyncCommandCounter, EngineContext};

pub struct CompletionTracker {
    ctx: Arc<EngineContext>,
    retired: Box<[AtomicBool]>,
}

impl CompletionTracker {
    /// `window` must exceed the number of counters that can be outstanding
    /// at once (queue capacity plus producers racing to push)
    pub fn new(ctx: Arc<EngineContext>, window: usize) -> Self {
        let window = window.max(2);
        Self {
            ctx,
            retired: (0..window).map(|_| AtomicBool::new(false)).collect(),
        }
    }

    pub fn context(&self) -> &Arc<EngineContext> {
        &self.ctx
    }

    #[inline]
    fn slot(&self, counter: u64) -> &AtomicBool {
        &self.retired[(counter % self.retired.len() as u64) as usize]
    }

    /// Mark a counter as finished without advancing the watermark
    #[inline]
    pub fn retire(&self, counter: AsyncCommandCounter) {
        debug_assert!(
            counter.0 > self.ctx.completed()
                && counter.0 - self.ctx.completed() <= self.retired.len() as u64,
            "completion window overrun"
        );
        self.slot(counter.0).store(true, Ordering::Release);
    }

    /// Advance the watermark over every contiguous retired counter
    ///
    /// Audio thread only. Returns how far it moved.
    #[inline]
    pub fn advance(&self) -> u64 {
        let mut moved = 0;
        loop {
            let next = self.ctx.completed() + 1;
            let slot = self.slot(next);
            if !slot.load(Ordering::Acquire) {
                return moved;
            }
            slot.store(false, Ordering::Relaxed);
            self.ctx.advance_completed();
            moved += 1;
        }
    }

    /// Retire and advance in one step (audio thread only)
    #[inline]
    pub fn complete(&self, counter: AsyncCommandCounter) -> u64 {
        self.retire(counter);
        self.advance()
    }
}
