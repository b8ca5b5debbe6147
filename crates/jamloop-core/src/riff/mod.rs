//! Riff model - resolved multi-stem loops and their timing
//!
//! A [`Riff`] is built from [`RiffMetadata`] by the resolution subsystem,
//! which decodes stems off-thread and attaches them while the riff is
//! `Working`. Once it reaches [`SyncState::Success`] it is wrapped in a
//! `basedrop::Shared` and handed to the engine; from then on it is read-only.

mod sync;
mod timing;

pub use sync::{SyncState, SyncStatus};
pub use timing::{RiffProgression, TimingDetails};

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::context::EngineContext;
use crate::error::{RiffError, RiffResult};
use crate::music::MusicalKey;
use crate::types::{StemIndex, StereoSample, NUM_STEMS};

/// Identifier of a riff within one engine context
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RiffId(pub u64);

/// Per-stem metadata: static gain and on/off flag
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StemSpec {
    pub gain: f32,
    pub enabled: bool,
}

impl Default for StemSpec {
    fn default() -> Self {
        Self {
            gain: 1.0,
            enabled: true,
        }
    }
}

/// Resolved metadata a riff is constructed from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiffMetadata {
    pub name: String,
    pub key: MusicalKey,
    pub beats_per_second: f64,
    /// Beats (segments) per bar
    pub beats_per_bar: u32,
    pub bar_count: u32,
    pub stems: Vec<StemSpec>,
}

/// A fully decoded stem at the engine sample rate
#[derive(Debug, Clone)]
pub struct StemAudio {
    frames: Vec<StereoSample>,
}

impl StemAudio {
    pub fn new(frames: Vec<StereoSample>) -> Self {
        Self { frames }
    }

    #[inline]
    pub fn frames(&self) -> &[StereoSample] {
        &self.frames
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Linearly interpolated read at a fractional frame position
    #[inline]
    pub fn read(&self, position: f64) -> StereoSample {
        let len = self.frames.len();
        let idx = position as usize % len;
        let frac = (position - position.floor()) as f32;
        let a = self.frames[idx];
        let b = self.frames[(idx + 1) % len];
        a.lerp(b, frac)
    }
}

/// What a stem's loop is phase-locked to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopLock {
    /// Stem is a bar or shorter: repeats inside every bar
    Bar,
    /// Stem spans several bars: repeats inside the riff
    Riff,
}

/// How a stem of arbitrary authored length maps onto the master timeline
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StemLoop {
    pub lock: LoopLock,
    /// Whole repetitions of the stem per locked span (>= 1)
    pub repetitions: u32,
    /// Authored stem time / master time (1.0 when the stem fits exactly)
    pub time_scale: f64,
}

impl StemLoop {
    /// Fit a stem of `stem_len` frames onto the riff timing
    pub fn fit(stem_len: usize, timing: &TimingDetails) -> Self {
        let stem_len = stem_len.max(1) as f64;
        let (lock, span) = if stem_len <= timing.samples_per_bar() * 1.001 {
            (LoopLock::Bar, timing.samples_per_bar())
        } else {
            (LoopLock::Riff, timing.length_samples() as f64)
        };
        let repetitions = (span / stem_len).round().max(1.0) as u32;
        Self {
            lock,
            repetitions,
            time_scale: stem_len * repetitions as f64 / span,
        }
    }

    /// Read position in stem frames at a sample index local to the riff
    ///
    /// The offset into the locked span is scaled by `time_scale` and wrapped
    /// to the stem, so every repetition starts exactly on its grid line.
    #[inline]
    pub fn read_position(&self, local_sample: u64, timing: &TimingDetails, stem_len: usize) -> f64 {
        let wrapped = (local_sample % timing.length_samples()) as f64;
        let offset = match self.lock {
            LoopLock::Bar => wrapped % timing.samples_per_bar(),
            LoopLock::Riff => wrapped,
        };
        (offset * self.time_scale) % stem_len.max(1) as f64
    }
}

/// One stem slot of a riff
#[derive(Debug, Clone, Default)]
pub struct StemSlot {
    pub spec: StemSpec,
    audio: Option<StemAudio>,
    fit: Option<StemLoop>,
}

impl StemSlot {
    /// Decoded audio, if this slot has been resolved
    pub fn audio(&self) -> Option<&StemAudio> {
        self.audio.as_ref()
    }

    pub fn fit(&self) -> Option<&StemLoop> {
        self.fit.as_ref()
    }

    /// Enabled and loaded
    pub fn is_audible(&self) -> bool {
        self.spec.enabled && self.audio.is_some()
    }
}

/// A resolved multi-stem loop
#[derive(Debug)]
pub struct Riff {
    id: RiffId,
    name: String,
    key: MusicalKey,
    beats_per_second: f64,
    timing: TimingDetails,
    stems: [StemSlot; NUM_STEMS],
    stem_count: usize,
    status: Arc<SyncStatus>,
}

impl Riff {
    /// Construct a `Waiting` riff from resolved metadata
    pub fn new(ctx: &EngineContext, metadata: RiffMetadata, sample_rate: u32) -> RiffResult<Self> {
        if metadata.stems.len() > NUM_STEMS {
            return Err(RiffError::TooManyStems(metadata.stems.len()));
        }
        let timing = TimingDetails::from_tempo(
            metadata.beats_per_second,
            metadata.beats_per_bar,
            metadata.bar_count,
            sample_rate,
        )?;

        let mut stems: [StemSlot; NUM_STEMS] = Default::default();
        for (slot, spec) in stems.iter_mut().zip(metadata.stems.iter()) {
            slot.spec = *spec;
        }

        Ok(Self {
            id: RiffId(ctx.next_operation_id().0),
            name: metadata.name,
            key: metadata.key,
            beats_per_second: metadata.beats_per_second,
            timing,
            stems,
            stem_count: metadata.stems.len(),
            status: Arc::new(SyncStatus::new()),
        })
    }

    pub fn id(&self) -> RiffId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn key(&self) -> MusicalKey {
        self.key
    }

    pub fn beats_per_second(&self) -> f64 {
        self.beats_per_second
    }

    pub fn timing(&self) -> &TimingDetails {
        &self.timing
    }

    /// Number of stems declared in the metadata
    pub fn stem_count(&self) -> usize {
        self.stem_count
    }

    pub fn stem(&self, idx: StemIndex) -> &StemSlot {
        &self.stems[idx.get()]
    }

    pub fn stems(&self) -> &[StemSlot; NUM_STEMS] {
        &self.stems
    }

    #[inline]
    pub fn sync_state(&self) -> SyncState {
        self.status.get()
    }

    pub fn is_ready(&self) -> bool {
        self.sync_state() == SyncState::Success
    }

    /// Shared status for observers on other threads
    pub fn status_handle(&self) -> Arc<SyncStatus> {
        Arc::clone(&self.status)
    }

    /// `Waiting -> Working`
    pub fn begin_sync(&mut self) -> RiffResult<()> {
        self.transition(SyncState::Waiting, SyncState::Working)
    }

    /// Attach decoded audio to a declared stem slot (only while `Working`)
    pub fn attach_stem(&mut self, slot: usize, audio: StemAudio) -> RiffResult<()> {
        let state = self.sync_state();
        if state != SyncState::Working {
            return Err(RiffError::InvalidSyncTransition {
                from: state,
                to: SyncState::Working,
            });
        }
        if slot >= self.stem_count {
            return Err(RiffError::StemSlotOutOfRange(slot));
        }
        if audio.is_empty() {
            return Err(RiffError::EmptyStem(slot));
        }
        let fit = StemLoop::fit(audio.len(), &self.timing);
        let stem = &mut self.stems[slot];
        stem.audio = Some(audio);
        stem.fit = Some(fit);
        Ok(())
    }

    /// `Working -> Success`
    pub fn complete(&mut self) -> RiffResult<()> {
        self.transition(SyncState::Working, SyncState::Success)?;
        log::debug!("Riff {:?} '{}' resolved", self.id, self.name);
        Ok(())
    }

    /// `Working -> Failed`
    pub fn fail(&mut self) -> RiffResult<()> {
        self.transition(SyncState::Working, SyncState::Failed)?;
        log::warn!("Riff {:?} '{}' failed to resolve", self.id, self.name);
        Ok(())
    }

    fn transition(&self, from: SyncState, to: SyncState) -> RiffResult<()> {
        self.status
            .transition(from, to)
            .map_err(|actual| RiffError::InvalidSyncTransition { from: actual, to })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::music::Scale;

    pub(crate) fn metadata(stems: usize) -> RiffMetadata {
        RiffMetadata {
            name: "test riff".to_string(),
            key: MusicalKey::new(9, Scale::Minor),
            beats_per_second: 2.0,
            beats_per_bar: 4,
            bar_count: 2,
            stems: vec![StemSpec::default(); stems],
        }
    }

    /// A ready riff whose stems are constant DC of the given levels
    pub(crate) fn ready_riff(ctx: &EngineContext, levels: &[f32], stem_frames: usize) -> Riff {
        let mut riff = Riff::new(ctx, metadata(levels.len()), 48000).unwrap();
        riff.begin_sync().unwrap();
        for (slot, level) in levels.iter().enumerate() {
            let audio = StemAudio::new(vec![StereoSample::mono(*level); stem_frames]);
            riff.attach_stem(slot, audio).unwrap();
        }
        riff.complete().unwrap();
        riff
    }

    #[test]
    fn test_lifecycle() {
        let ctx = EngineContext::new();
        let mut riff = Riff::new(&ctx, metadata(2), 48000).unwrap();
        assert_eq!(riff.sync_state(), SyncState::Waiting);
        assert!(riff
            .attach_stem(0, StemAudio::new(vec![StereoSample::silence(); 8]))
            .is_err());

        riff.begin_sync().unwrap();
        riff.attach_stem(0, StemAudio::new(vec![StereoSample::mono(0.5); 96_000]))
            .unwrap();
        assert_eq!(
            riff.attach_stem(5, StemAudio::new(vec![StereoSample::mono(0.5); 16])),
            Err(RiffError::StemSlotOutOfRange(5))
        );
        riff.complete().unwrap();

        assert!(riff.is_ready());
        assert!(riff.stem(StemIndex::ALL[0]).is_audible());
        assert!(!riff.stem(StemIndex::ALL[1]).is_audible());
        assert!(riff.fail().is_err());
    }

    #[test]
    fn test_too_many_stems() {
        let ctx = EngineContext::new();
        assert_eq!(
            Riff::new(&ctx, metadata(NUM_STEMS + 1), 48000).unwrap_err(),
            RiffError::TooManyStems(NUM_STEMS + 1)
        );
    }

    #[test]
    fn test_zero_bar_length_rejected() {
        let ctx = EngineContext::new();
        let mut meta = metadata(1);
        meta.beats_per_second = 0.0;
        assert!(matches!(
            Riff::new(&ctx, meta, 48000),
            Err(RiffError::Timing(crate::error::TimingError::ZeroBarLength))
        ));
    }

    #[test]
    fn test_stem_loop_fit() {
        let timing = TimingDetails::new(4, 2, 2.0, 48000).unwrap();

        // Half-bar stem repeats twice per bar
        let short = StemLoop::fit(48_000, &timing);
        assert_eq!(short.lock, LoopLock::Bar);
        assert_eq!(short.repetitions, 2);
        assert!((short.time_scale - 1.0).abs() < 1e-12);

        // Full-length stem plays once per riff
        let full = StemLoop::fit(192_000, &timing);
        assert_eq!(full.lock, LoopLock::Riff);
        assert_eq!(full.repetitions, 1);

        // Slightly short authoring is stretched, not drifted
        let drifted = StemLoop::fit(95_000, &timing);
        assert_eq!(drifted.repetitions, 1);
        assert!(drifted.time_scale < 1.0);

        // 3/4 through bar 0 is halfway through the second repetition
        assert!((short.read_position(72_000, &timing, 48_000) - 24_000.0).abs() < 1e-9);
        // Same position one bar later
        assert!((short.read_position(168_000, &timing, 48_000) - 24_000.0).abs() < 1e-9);
        assert!((full.read_position(96_000, &timing, 192_000) - 96_000.0).abs() < 1e-9);
    }

    #[test]
    fn test_time_scale_stretches_short_authoring() {
        let timing = TimingDetails::new(4, 2, 2.0, 48000).unwrap();
        let drifted = StemLoop::fit(95_000, &timing);

        // Halfway through the bar reads halfway through the stem
        assert!((drifted.read_position(48_000, &timing, 95_000) - 47_500.0).abs() < 1e-6);
        // One master sample advances the read head by `time_scale` frames
        let a = drifted.read_position(1000, &timing, 95_000);
        let b = drifted.read_position(1001, &timing, 95_000);
        assert!((b - a - drifted.time_scale).abs() < 1e-9);
        // And the next bar starts the stem again
        assert!(drifted.read_position(96_000, &timing, 95_000).abs() < 1e-9);
    }

    #[test]
    fn test_stem_audio_interpolated_read() {
        let audio = StemAudio::new(vec![StereoSample::mono(0.0), StereoSample::mono(1.0)]);
        assert_eq!(audio.read(0.5), StereoSample::mono(0.5));
        // Wraps around the end
        assert_eq!(audio.read(1.5), StereoSample::mono(0.5));
    }
}
