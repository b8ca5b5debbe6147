//! Riff mixer - stems to stereo, with riff transitions
//!
//! Each callback the mixer:
//! 1. picks up the latest permutation request,
//! 2. renders every stem of the current (and, during a crossfade, the
//!    outgoing) riff into its own pre-allocated scratch buffer, splitting
//!    the buffer at the exact sample where a queued transition fires,
//! 3. applies static stem gain and the live permutation multiplier per
//!    sample and sums the stems into the output,
//! 4. publishes position, transition and level state to [`MixerAtomics`].
//!
//! Stems are phase-locked to the master position: a stem shorter than a bar
//! restarts on every bar (repeating inside it if it fits several times), a
//! longer stem is locked to the riff. No stem ever free-runs.

use std::sync::atomic::{AtomicU32, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;

use basedrop::Shared;

use crate::config::{EngineConfig, PermutationChangeRate};
use crate::riff::{Riff, RiffId};
use crate::types::{StereoBuffer, StereoSample, NUM_STEMS};

use super::command::TransitionBoundary;
use super::permutation::{PermutationBlender, PermutationObserver, PermutationQueue};
use super::transition::{PlayingRiff, RiffTransition, TransitionPhase};

/// Lock-free mixer state for UI reads
///
/// Written by the audio thread once per callback with `Relaxed` stores.
#[derive(Debug)]
pub struct MixerAtomics {
    /// Absolute sample position at the end of the last callback
    pub position: AtomicU64,
    pub bar_index: AtomicU32,
    pub segment_index: AtomicU32,
    /// Riff percentage as `f64` bits
    pub riff_percentage: AtomicU64,
    /// [`TransitionPhase`] as `u8`
    pub phase: AtomicU8,
    /// Current riff id (0 = nothing playing)
    pub current_riff: AtomicU64,
    /// Crossfade blend of the current riff as `f32` bits
    pub blend: AtomicU32,
    /// Per-stem RMS after gain and permutation, as `f32` bits
    pub stem_levels: [AtomicU32; NUM_STEMS],
}

impl MixerAtomics {
    pub fn new() -> Self {
        Self {
            position: AtomicU64::new(0),
            bar_index: AtomicU32::new(0),
            segment_index: AtomicU32::new(0),
            riff_percentage: AtomicU64::new(0.0f64.to_bits()),
            phase: AtomicU8::new(TransitionPhase::Idle as u8),
            current_riff: AtomicU64::new(0),
            blend: AtomicU32::new(1.0f32.to_bits()),
            stem_levels: std::array::from_fn(|_| AtomicU32::new(0)),
        }
    }

    #[inline]
    pub fn position(&self) -> u64 {
        self.position.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn bar_index(&self) -> u32 {
        self.bar_index.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn segment_index(&self) -> u32 {
        self.segment_index.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn riff_percentage(&self) -> f64 {
        f64::from_bits(self.riff_percentage.load(Ordering::Relaxed))
    }

    #[inline]
    pub fn phase(&self) -> TransitionPhase {
        TransitionPhase::from_u8(self.phase.load(Ordering::Relaxed))
    }

    #[inline]
    pub fn current_riff(&self) -> Option<RiffId> {
        match self.current_riff.load(Ordering::Relaxed) {
            0 => None,
            id => Some(RiffId(id)),
        }
    }

    #[inline]
    pub fn blend(&self) -> f32 {
        f32::from_bits(self.blend.load(Ordering::Relaxed))
    }

    #[inline]
    pub fn stem_level(&self, stem: usize) -> f32 {
        self.stem_levels
            .get(stem)
            .map_or(0.0, |level| f32::from_bits(level.load(Ordering::Relaxed)))
    }
}

impl Default for MixerAtomics {
    fn default() -> Self {
        Self::new()
    }
}

/// Shared state a mixer is wired to
///
/// A replacement mixer built from the same links keeps receiving the same
/// permutation requests and keeps publishing to the same atomics.
#[derive(Clone)]
pub struct MixerLinks {
    pub permutations: Arc<PermutationQueue>,
    pub observer: Arc<PermutationObserver>,
    pub atomics: Arc<MixerAtomics>,
}

pub struct RiffMixer {
    transition: RiffTransition,
    blender: PermutationBlender,
    stem_buffers: [StereoBuffer; NUM_STEMS],
    stem_active: [bool; NUM_STEMS],
    atomics: Arc<MixerAtomics>,
    max_frames: usize,
}

impl RiffMixer {
    pub(crate) fn new(config: &EngineConfig, links: &MixerLinks) -> Self {
        Self {
            transition: RiffTransition::new(config.transition_samples),
            blender: PermutationBlender::new(
                Arc::clone(&links.permutations),
                Arc::clone(&links.observer),
                config.sample_rate,
            ),
            stem_buffers: std::array::from_fn(|_| StereoBuffer::silence(config.max_buffer_frames)),
            stem_active: [false; NUM_STEMS],
            atomics: Arc::clone(&links.atomics),
            max_frames: config.max_buffer_frames,
        }
    }

    /// Queue a switch to a ready riff
    pub fn play(&mut self, riff: Shared<Riff>, boundary: TransitionBoundary) {
        self.transition.request(riff, boundary);
    }

    /// Drop the current riff and any pending transition
    pub fn stop(&mut self) {
        self.transition.stop();
    }

    pub fn set_change_rate(&mut self, rate: PermutationChangeRate) {
        self.blender.set_change_rate(rate);
    }

    pub fn phase(&self) -> TransitionPhase {
        self.transition.phase()
    }

    pub fn current_riff(&self) -> Option<&Riff> {
        self.transition.current().map(|playing| &*playing.riff)
    }

    pub fn blender(&self) -> &PermutationBlender {
        &self.blender
    }

    /// Per-stem output of the last callback, after gain and permutation
    pub fn stem_buffers(&self) -> &[StereoBuffer; NUM_STEMS] {
        &self.stem_buffers
    }

    /// Stems that were loaded, enabled and not fully muted in the last callback
    pub fn active_stems(&self) -> [bool; NUM_STEMS] {
        self.stem_active
    }

    pub fn max_frames(&self) -> usize {
        self.max_frames
    }

    /// Render `output.len()` frames starting at absolute sample `position`
    ///
    /// `output` is overwritten. Its length must not exceed `max_frames`.
    pub fn process(&mut self, output: &mut StereoBuffer, position: u64) {
        let n = output.len().min(self.max_frames);
        output.set_len_from_capacity(n);
        output.fill_silence();
        for buffer in &mut self.stem_buffers {
            buffer.set_len_from_capacity(n);
            buffer.fill_silence();
        }

        // Blend spans follow the bar of the riff playing when the request lands,
        // which is the incoming one if it starts inside this callback
        let governing = match self.transition.samples_until_switch(position) {
            Some(until) if until < n as u64 => self.transition.pending_riff(),
            _ => self.transition.current().map(|playing| &playing.riff),
        };
        if let Some(riff) = governing {
            self.blender.set_bar_length(riff.timing().seconds_per_bar());
        }
        self.blender.flush_pending_permutations();

        let mut offset = 0usize;
        while offset < n {
            let now = position + offset as u64;
            if self.transition.samples_until_switch(now) == Some(0) {
                self.transition.switch(now);
                if let Some(current) = self.transition.current() {
                    self.blender.set_bar_length(current.riff.timing().seconds_per_bar());
                }
                continue;
            }

            let mut chunk = (n - offset) as u64;
            if let Some(until) = self.transition.samples_until_switch(now) {
                chunk = chunk.min(until);
            }
            if let Some(until) = self.transition.samples_until_settled() {
                chunk = chunk.min(until.max(1));
            }
            let chunk = chunk as usize;

            self.render_chunk(offset, chunk, now);
            self.transition.advance(chunk as u64);
            offset += chunk;
        }

        self.apply_permutation(output, n);
        self.publish(position + n as u64);
    }

    fn render_chunk(&mut self, offset: usize, len: usize, start: u64) {
        let transition = &self.transition;
        for (stem, buffer) in self.stem_buffers.iter_mut().enumerate() {
            let dst = &mut buffer.as_mut_slice()[offset..offset + len];
            if let Some(current) = transition.current() {
                add_stem(dst, current, stem, start, |k| transition.blend_at(k));
            }
            if let Some(outgoing) = transition.outgoing() {
                add_stem(dst, outgoing, stem, start, |k| 1.0 - transition.blend_at(k));
            }
        }
    }

    /// Scale each stem by its per-sample permutation gain and sum into `output`
    fn apply_permutation(&mut self, output: &mut StereoBuffer, n: usize) {
        let current = self.blender.current_permutation();
        let target = self.blender.target_permutation();
        let delta = *self.blender.delta();
        let remaining = self.blender.samples_remaining();

        let playing = self.transition.current().map(|p| &p.riff);
        for (stem, buffer) in self.stem_buffers.iter_mut().enumerate() {
            let (from, to, step) = (current.gains()[stem], target.gains()[stem], delta[stem]);
            for (k, (out, sample)) in output.iter_mut().zip(buffer.iter_mut()).enumerate() {
                let gain = if k as u64 >= remaining {
                    to
                } else if step >= 0.0 {
                    (from + step * k as f32).min(to)
                } else {
                    (from + step * k as f32).max(to)
                };
                *sample *= gain;
                *out += *sample;
            }
            let audible = playing.is_some_and(|riff| riff.stems()[stem].is_audible());
            self.stem_active[stem] = audible && (from > 0.0 || to > 0.0);
        }

        let bar_length = self
            .transition
            .current()
            .map_or(self.blender.bar_length_seconds(), |p| p.riff.timing().seconds_per_bar());
        self.blender.update_permutations(n, bar_length);
    }

    fn publish(&self, end: u64) {
        let atomics = &self.atomics;
        atomics.position.store(end, Ordering::Relaxed);
        atomics.phase.store(self.transition.phase() as u8, Ordering::Relaxed);
        atomics.blend.store(self.transition.blend_at(0).to_bits(), Ordering::Relaxed);

        match self.transition.current() {
            Some(playing) => {
                let progression = playing.riff.timing().progression(playing.local(end));
                atomics.bar_index.store(progression.bar_index, Ordering::Relaxed);
                atomics.segment_index.store(progression.segment_index, Ordering::Relaxed);
                atomics
                    .riff_percentage
                    .store(progression.riff_percentage.to_bits(), Ordering::Relaxed);
                atomics.current_riff.store(playing.riff.id().0, Ordering::Relaxed);
            }
            None => {
                atomics.bar_index.store(0, Ordering::Relaxed);
                atomics.segment_index.store(0, Ordering::Relaxed);
                atomics.riff_percentage.store(0.0f64.to_bits(), Ordering::Relaxed);
                atomics.current_riff.store(0, Ordering::Relaxed);
            }
        }

        for (level, buffer) in atomics.stem_levels.iter().zip(self.stem_buffers.iter()) {
            level.store(buffer.rms().to_bits(), Ordering::Relaxed);
        }
    }
}

/// Add one phase-locked stem of `playing` into `dst`, weighted per sample
#[inline]
fn add_stem(
    dst: &mut [StereoSample],
    playing: &PlayingRiff,
    stem: usize,
    start: u64,
    weight: impl Fn(u64) -> f32,
) {
    let slot = &playing.riff.stems()[stem];
    if !slot.spec.enabled {
        return;
    }
    let (Some(audio), Some(fit)) = (slot.audio(), slot.fit()) else {
        return;
    };
    let timing = playing.riff.timing();
    let gain = slot.spec.gain;

    for (k, out) in dst.iter_mut().enumerate() {
        let local = playing.local(start + k as u64);
        let position = fit.read_position(local, timing, audio.len());
        *out += audio.read(position) * (gain * weight(k as u64));
    }
}
