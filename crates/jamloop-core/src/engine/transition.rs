//! Riff transition state machine
//!
//! `Idle -> Queued -> Transitioning -> Idle`
//!
//! A play request is queued until the chosen boundary of the outgoing riff
//! is reached. At the boundary the incoming riff becomes current (its bar 0
//! starts at that sample) and is crossfaded in over a fixed number of
//! samples while the outgoing riff fades out. A later request replaces a
//! pending one; `stop` clears everything in one step.
//!
//! Everything here runs on the audio thread. Replaced riffs are
//! `basedrop::Shared` handles, so dropping them never frees memory here.

use basedrop::Shared;

use crate::riff::Riff;

use super::command::TransitionBoundary;

/// Observable phase of the state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum TransitionPhase {
    Idle = 0,
    Queued = 1,
    Transitioning = 2,
}

impl TransitionPhase {
    pub(crate) fn from_u8(value: u8) -> Self {
        match value {
            1 => TransitionPhase::Queued,
            2 => TransitionPhase::Transitioning,
            _ => TransitionPhase::Idle,
        }
    }
}

/// A riff placed on the master timeline
pub struct PlayingRiff {
    pub riff: Shared<Riff>,
    /// Absolute sample at which this riff's bar 0 started
    pub origin: u64,
}

impl PlayingRiff {
    /// Sample index relative to the riff's origin
    #[inline]
    pub fn local(&self, sample: u64) -> u64 {
        sample.saturating_sub(self.origin)
    }

    /// Samples from `sample` until `boundary` on this riff (0 when on it)
    pub fn samples_to(&self, boundary: TransitionBoundary, sample: u64) -> u64 {
        let timing = self.riff.timing();
        let local = self.local(sample);
        match boundary {
            TransitionBoundary::Immediate => 0,
            TransitionBoundary::NextSegment => timing.samples_to_next_segment(local),
            TransitionBoundary::NextBar => timing.samples_to_next_bar(local),
            TransitionBoundary::NextLoop => timing.samples_to_loop_end(local),
        }
    }
}

pub struct RiffTransition {
    phase: TransitionPhase,
    current: Option<PlayingRiff>,
    outgoing: Option<PlayingRiff>,
    pending: Option<(Shared<Riff>, TransitionBoundary)>,
    elapsed: u32,
    length: u32,
}

impl RiffTransition {
    pub fn new(length: u32) -> Self {
        Self {
            phase: TransitionPhase::Idle,
            current: None,
            outgoing: None,
            pending: None,
            elapsed: 0,
            length,
        }
    }

    #[inline]
    pub fn phase(&self) -> TransitionPhase {
        self.phase
    }

    pub fn current(&self) -> Option<&PlayingRiff> {
        self.current.as_ref()
    }

    pub fn outgoing(&self) -> Option<&PlayingRiff> {
        self.outgoing.as_ref()
    }

    pub fn has_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// Riff waiting for its boundary
    pub fn pending_riff(&self) -> Option<&Shared<Riff>> {
        self.pending.as_ref().map(|(riff, _)| riff)
    }

    /// Queue a riff switch, replacing any pending one
    pub fn request(&mut self, riff: Shared<Riff>, boundary: TransitionBoundary) {
        self.pending = Some((riff, boundary));
        if self.phase == TransitionPhase::Idle {
            self.phase = TransitionPhase::Queued;
        }
    }

    /// Discard current, outgoing and pending riffs
    pub fn stop(&mut self) {
        self.current = None;
        self.outgoing = None;
        self.pending = None;
        self.elapsed = 0;
        self.phase = TransitionPhase::Idle;
    }

    /// Samples from `now` until the queued switch happens
    ///
    /// `None` unless a switch is queued. With nothing playing there is no
    /// boundary to wait for, so the switch is due immediately.
    pub fn samples_until_switch(&self, now: u64) -> Option<u64> {
        if self.phase != TransitionPhase::Queued {
            return None;
        }
        let (_, boundary) = self.pending.as_ref()?;
        Some(match &self.current {
            Some(current) => current.samples_to(*boundary, now),
            None => 0,
        })
    }

    /// Samples left in the running crossfade
    pub fn samples_until_settled(&self) -> Option<u64> {
        (self.phase == TransitionPhase::Transitioning).then(|| u64::from(self.length - self.elapsed))
    }

    /// Make the pending riff current, starting its timeline at `now`
    pub fn switch(&mut self, now: u64) {
        let Some((riff, _)) = self.pending.take() else {
            return;
        };
        self.outgoing = self.current.take();
        self.current = Some(PlayingRiff { riff, origin: now });
        self.elapsed = 0;
        self.phase = TransitionPhase::Transitioning;
        if self.length == 0 {
            self.settle();
        }
    }

    /// Blend factor of the current riff at `offset` samples into the chunk
    #[inline]
    pub fn blend_at(&self, offset: u64) -> f32 {
        if self.phase != TransitionPhase::Transitioning || self.length == 0 {
            return 1.0;
        }
        ((self.elapsed as u64 + offset) as f32 / self.length as f32).min(1.0)
    }

    /// Advance the crossfade by `samples`
    pub fn advance(&mut self, samples: u64) {
        if self.phase != TransitionPhase::Transitioning {
            return;
        }
        let remaining = u64::from(self.length - self.elapsed);
        if samples >= remaining {
            self.settle();
        } else {
            self.elapsed += samples as u32;
        }
    }

    fn settle(&mut self) {
        self.outgoing = None;
        self.elapsed = self.length;
        self.phase = if self.pending.is_some() {
            TransitionPhase::Queued
        } else {
            TransitionPhase::Idle
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::EngineContext;
    use crate::riff::tests::ready_riff;

    fn shared_riff(ctx: &EngineContext, collector: &basedrop::Collector) -> Shared<Riff> {
        Shared::new(&collector.handle(), ready_riff(ctx, &[0.5], 1024))
    }

    #[test]
    fn test_first_riff_starts_immediately() {
        let ctx = EngineContext::new();
        let collector = basedrop::Collector::new();
        let mut t = RiffTransition::new(100);

        t.request(shared_riff(&ctx, &collector), TransitionBoundary::NextBar);
        assert_eq!(t.phase(), TransitionPhase::Queued);
        assert_eq!(t.samples_until_switch(12_345), Some(0));

        t.switch(12_345);
        assert_eq!(t.phase(), TransitionPhase::Transitioning);
        assert_eq!(t.current().unwrap().origin, 12_345);
        assert!(t.outgoing().is_none());

        t.advance(60);
        assert!((t.blend_at(0) - 0.6).abs() < 1e-6);
        t.advance(40);
        assert_eq!(t.phase(), TransitionPhase::Idle);
        assert_eq!(t.blend_at(0), 1.0);
    }

    #[test]
    fn test_waits_for_bar_of_outgoing_riff() {
        let ctx = EngineContext::new();
        let collector = basedrop::Collector::new();
        let mut t = RiffTransition::new(0);
        t.request(shared_riff(&ctx, &collector), TransitionBoundary::Immediate);
        t.switch(0);
        assert_eq!(t.phase(), TransitionPhase::Idle);

        // 2 s bars at 48 kHz
        t.request(shared_riff(&ctx, &collector), TransitionBoundary::NextBar);
        assert_eq!(t.samples_until_switch(1000), Some(95_000));
        t.request(shared_riff(&ctx, &collector), TransitionBoundary::NextSegment);
        assert_eq!(t.samples_until_switch(1000), Some(23_000));
        t.request(shared_riff(&ctx, &collector), TransitionBoundary::NextLoop);
        assert_eq!(t.samples_until_switch(1000), Some(191_000));
    }

    #[test]
    fn test_later_request_supersedes_pending() {
        let ctx = EngineContext::new();
        let collector = basedrop::Collector::new();
        let mut t = RiffTransition::new(0);
        let first = shared_riff(&ctx, &collector);
        let second = shared_riff(&ctx, &collector);
        let second_id = second.id();

        t.request(first, TransitionBoundary::NextBar);
        t.request(second, TransitionBoundary::NextBar);
        t.switch(0);
        assert_eq!(t.current().unwrap().riff.id(), second_id);
        assert!(!t.has_pending());
    }

    #[test]
    fn test_request_during_crossfade_waits() {
        let ctx = EngineContext::new();
        let collector = basedrop::Collector::new();
        let mut t = RiffTransition::new(100);
        t.request(shared_riff(&ctx, &collector), TransitionBoundary::Immediate);
        t.switch(0);

        t.request(shared_riff(&ctx, &collector), TransitionBoundary::Immediate);
        assert_eq!(t.phase(), TransitionPhase::Transitioning);
        assert_eq!(t.samples_until_switch(10), None);
        assert_eq!(t.samples_until_settled(), Some(100));

        t.advance(100);
        assert_eq!(t.phase(), TransitionPhase::Queued);
        assert_eq!(t.samples_until_switch(100), Some(0));
    }

    #[test]
    fn test_stop_clears_everything() {
        let ctx = EngineContext::new();
        let collector = basedrop::Collector::new();
        let mut t = RiffTransition::new(100);
        t.request(shared_riff(&ctx, &collector), TransitionBoundary::Immediate);
        t.switch(0);
        t.request(shared_riff(&ctx, &collector), TransitionBoundary::NextBar);

        t.stop();
        assert_eq!(t.phase(), TransitionPhase::Idle);
        assert!(t.current().is_none());
        assert!(t.outgoing().is_none());
        assert!(!t.has_pending());
        assert_eq!(t.samples_until_switch(0), None);
    }
}
