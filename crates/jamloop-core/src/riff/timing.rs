//! Riff timing model - absolute sample counter to musical position
//!
//! [`TimingDetails`] holds the static constants of a riff (bar length, bar
//! count, beat segments per bar, sample rate). [`TimingDetails::progression`]
//! turns the engine's absolute sample counter into a [`RiffProgression`].
//!
//! The riff wrap is done in integer samples, so the output is exactly
//! periodic in the riff length regardless of how long the session has been
//! running. Everything below the riff wrap uses `f64`.
//!
//! No allocation, no locking; safe to call on the audio thread every callback.

use crate::error::{TimingError, TimingResult};

/// Static timing constants of a riff
///
/// Only constructible through [`TimingDetails::new`] / [`TimingDetails::from_tempo`],
/// so the riff length is never zero.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimingDetails {
    /// Beat segments per bar (quarter-beat subdivisions)
    segments_per_bar: u32,
    bar_count: u32,
    seconds_per_bar: f64,
    sample_rate: u32,
    /// `1 / sample_rate`
    inv_sample_rate: f64,
    /// Riff length as rendered, i.e. `length_samples / sample_rate`
    length_seconds: f64,
    length_samples: u64,
    /// Length of one bar in samples (fractional)
    samples_per_bar: f64,
}

/// Musical position derived from an absolute sample counter
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct RiffProgression {
    /// Time within the riff (sample time modulo riff length)
    pub riff_seconds: f64,
    /// Riff position in 0..1
    pub riff_percentage: f64,
    /// Time within the current bar
    pub bar_seconds: f64,
    /// Bar position in 0..1
    pub bar_percentage: f64,
    /// Position within the current beat segment in 0..1
    pub segment_percentage: f64,
    /// Index of the current bar within the riff
    pub bar_index: u32,
    /// Index of the current beat segment within the bar
    pub segment_index: u32,
    /// Signed distance in seconds to the nearest segment boundary:
    /// positive just after a boundary, negative just before the next one
    pub segment_offset_seconds: f64,
}

impl TimingDetails {
    /// Build timing constants from a bar length in seconds
    pub fn new(
        segments_per_bar: u32,
        bar_count: u32,
        seconds_per_bar: f64,
        sample_rate: u32,
    ) -> TimingResult<Self> {
        if !(seconds_per_bar > 0.0) || !seconds_per_bar.is_finite() {
            return Err(TimingError::ZeroBarLength);
        }
        if sample_rate == 0 {
            return Err(TimingError::ZeroSampleRate);
        }
        if bar_count == 0 {
            return Err(TimingError::ZeroBarCount);
        }
        if segments_per_bar == 0 {
            return Err(TimingError::ZeroSegments);
        }

        let samples_per_bar = seconds_per_bar * sample_rate as f64;
        let length_samples = (samples_per_bar * bar_count as f64).round() as u64;
        if length_samples == 0 {
            return Err(TimingError::ZeroBarLength);
        }
        let inv_sample_rate = 1.0 / sample_rate as f64;

        Ok(Self {
            segments_per_bar,
            bar_count,
            seconds_per_bar,
            sample_rate,
            inv_sample_rate,
            length_seconds: length_samples as f64 * inv_sample_rate,
            length_samples,
            samples_per_bar,
        })
    }

    /// Build timing constants from a tempo
    ///
    /// One beat segment per beat: `beats_per_bar` beats at `beats_per_second`.
    pub fn from_tempo(
        beats_per_second: f64,
        beats_per_bar: u32,
        bar_count: u32,
        sample_rate: u32,
    ) -> TimingResult<Self> {
        if !(beats_per_second > 0.0) || beats_per_bar == 0 {
            return Err(TimingError::ZeroBarLength);
        }
        Self::new(
            beats_per_bar,
            bar_count,
            beats_per_bar as f64 / beats_per_second,
            sample_rate,
        )
    }

    #[inline]
    pub fn segments_per_bar(&self) -> u32 {
        self.segments_per_bar
    }

    #[inline]
    pub fn bar_count(&self) -> u32 {
        self.bar_count
    }

    /// Length of one bar in seconds
    #[inline]
    pub fn seconds_per_bar(&self) -> f64 {
        self.seconds_per_bar
    }

    #[inline]
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    #[inline]
    pub fn length_seconds(&self) -> f64 {
        self.length_seconds
    }

    /// Riff length in samples, never zero
    #[inline]
    pub fn length_samples(&self) -> u64 {
        self.length_samples
    }

    /// Length of one bar in samples (fractional)
    #[inline]
    pub fn samples_per_bar(&self) -> f64 {
        self.samples_per_bar
    }

    /// Total number of beat segments in the riff
    pub fn quarter_beat_count(&self) -> u32 {
        self.segments_per_bar * self.bar_count
    }

    /// Length of one beat segment in samples (fractional)
    #[inline]
    pub fn samples_per_segment(&self) -> f64 {
        self.samples_per_bar / self.segments_per_bar as f64
    }

    /// Compute the musical position at an absolute sample index
    pub fn progression(&self, sample: u64) -> RiffProgression {
        let wrapped = sample % self.length_samples;
        let riff_seconds = wrapped as f64 * self.inv_sample_rate;
        let riff_percentage = wrapped as f64 / self.length_samples as f64;

        let bar_seconds = riff_seconds % self.seconds_per_bar;
        let bar_percentage = bar_seconds / self.seconds_per_bar;
        let bar_index = ((riff_seconds / self.seconds_per_bar).floor() as u32).min(self.bar_count - 1);

        let segments = self.segments_per_bar as f64;
        let segment_position = bar_percentage * segments;
        let segment_index = (segment_position.floor() as u32).min(self.segments_per_bar - 1);
        let segment_percentage = (segment_position - segment_index as f64).clamp(0.0, 1.0);

        let segment_seconds = self.seconds_per_bar / segments;
        let segment_offset_seconds = if segment_percentage < 0.5 {
            segment_percentage * segment_seconds
        } else {
            (segment_percentage - 1.0) * segment_seconds
        };

        RiffProgression {
            riff_seconds,
            riff_percentage,
            bar_seconds,
            bar_percentage,
            segment_percentage,
            bar_index,
            segment_index,
            segment_offset_seconds,
        }
    }

    /// Samples from `sample` until the next beat segment boundary (0 when on one)
    pub fn samples_to_next_segment(&self, sample: u64) -> u64 {
        self.samples_to_grid(sample, self.samples_per_segment())
    }

    /// Samples from `sample` until the next bar boundary (0 when on one)
    pub fn samples_to_next_bar(&self, sample: u64) -> u64 {
        self.samples_to_grid(sample, self.samples_per_bar)
    }

    /// Samples from `sample` until the riff wraps (0 when at the start)
    pub fn samples_to_loop_end(&self, sample: u64) -> u64 {
        self.samples_to_grid(sample, self.length_samples as f64)
    }

    /// Distance to the next multiple of `step` within the riff, rounding
    /// fractional grid positions up to the following whole sample
    fn samples_to_grid(&self, sample: u64, step: f64) -> u64 {
        let pos = sample % self.length_samples;
        let idx = (pos as f64 / step).floor();
        let current = (idx * step).ceil() as u64;
        if current == pos {
            return 0;
        }
        let next = ((idx + 1.0) * step).ceil() as u64;
        next.min(self.length_samples).saturating_sub(pos)
    }
}
