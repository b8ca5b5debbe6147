//! Common types for Jamloop
//!
//! Sample and buffer types shared by the mixer, the effect stack, sample
//! processors and the stem analyzer.

use std::ops::{Index, IndexMut};

/// Default sample rate (48kHz). The host reports the real rate at startup.
pub const SAMPLE_RATE: u32 = 48000;

/// Number of stem slots in a riff
pub const NUM_STEMS: usize = 8;

/// Audio sample type
pub type Sample = f32;

/// Index of a stem slot within a riff (0-7)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StemIndex(usize);

impl StemIndex {
    /// All stem slots in order
    pub const ALL: [StemIndex; NUM_STEMS] = [
        StemIndex(0),
        StemIndex(1),
        StemIndex(2),
        StemIndex(3),
        StemIndex(4),
        StemIndex(5),
        StemIndex(6),
        StemIndex(7),
    ];

    /// Convert from a raw slot number, `None` when out of range
    pub fn new(idx: usize) -> Option<Self> {
        (idx < NUM_STEMS).then_some(Self(idx))
    }

    /// Raw slot number
    #[inline]
    pub fn get(self) -> usize {
        self.0
    }
}

/// A single stereo sample (left and right channels)
///
/// `#[repr(C)]` keeps the layout `[left, right]` so slices can be viewed as
/// interleaved `f32` through bytemuck without copying.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct StereoSample {
    pub left: Sample,
    pub right: Sample,
}

impl StereoSample {
    #[inline]
    pub fn new(left: Sample, right: Sample) -> Self {
        Self { left, right }
    }

    #[inline]
    pub fn silence() -> Self {
        Self::default()
    }

    /// Same value in both channels
    #[inline]
    pub fn mono(value: Sample) -> Self {
        Self { left: value, right: value }
    }

    /// Linear interpolation between two frames (`t` in 0..1)
    #[inline]
    pub fn lerp(self, other: Self, t: Sample) -> Self {
        Self {
            left: self.left + (other.left - self.left) * t,
            right: self.right + (other.right - self.right) * t,
        }
    }

    /// Peak amplitude of the two channels
    #[inline]
    pub fn peak(&self) -> Sample {
        self.left.abs().max(self.right.abs())
    }
}

impl std::ops::Add for StereoSample {
    type Output = Self;

    #[inline]
    fn add(self, other: Self) -> Self {
        Self::new(self.left + other.left, self.right + other.right)
    }
}

impl std::ops::AddAssign for StereoSample {
    #[inline]
    fn add_assign(&mut self, other: Self) {
        self.left += other.left;
        self.right += other.right;
    }
}

impl std::ops::Mul<Sample> for StereoSample {
    type Output = Self;

    #[inline]
    fn mul(self, factor: Sample) -> Self {
        Self::new(self.left * factor, self.right * factor)
    }
}

impl std::ops::MulAssign<Sample> for StereoSample {
    #[inline]
    fn mul_assign(&mut self, factor: Sample) {
        self.left *= factor;
        self.right *= factor;
    }
}

/// A buffer of stereo samples
///
/// Buffers used on the audio thread are allocated once at `max_buffer_frames`
/// capacity and then resized with [`StereoBuffer::set_len_from_capacity`],
/// which never reallocates.
#[derive(Debug, Clone, Default)]
pub struct StereoBuffer {
    samples: Vec<StereoSample>,
}

impl StereoBuffer {
    /// Empty buffer with room for `capacity` frames
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            samples: Vec::with_capacity(capacity),
        }
    }

    /// Buffer of `len` silent frames
    pub fn silence(len: usize) -> Self {
        Self {
            samples: vec![StereoSample::silence(); len],
        }
    }

    /// Build from interleaved `[L, R, L, R, ...]` data
    pub fn from_interleaved(interleaved: &[Sample]) -> Self {
        assert!(interleaved.len() % 2 == 0, "Interleaved buffer must have even length");
        Self {
            samples: bytemuck::cast_slice::<Sample, StereoSample>(interleaved).to_vec(),
        }
    }

    pub fn from_vec(samples: Vec<StereoSample>) -> Self {
        Self { samples }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.samples.capacity()
    }

    /// Set the working length of a pre-allocated buffer (real-time safe)
    ///
    /// Newly exposed frames are silent. Growing past capacity is a bug and
    /// trips a debug assertion.
    #[inline]
    pub fn set_len_from_capacity(&mut self, new_len: usize) {
        if new_len > self.samples.len() {
            debug_assert!(
                new_len <= self.samples.capacity(),
                "set_len_from_capacity called with len > capacity"
            );
            self.samples.resize(new_len, StereoSample::silence());
        } else {
            self.samples.truncate(new_len);
        }
    }

    pub fn fill_silence(&mut self) {
        self.samples.fill(StereoSample::silence());
    }

    #[inline]
    pub fn as_slice(&self) -> &[StereoSample] {
        &self.samples
    }

    #[inline]
    pub fn as_mut_slice(&mut self) -> &mut [StereoSample] {
        &mut self.samples
    }

    /// Zero-copy interleaved view `[L, R, L, R, ...]`
    #[inline]
    pub fn as_interleaved(&self) -> &[Sample] {
        bytemuck::cast_slice(&self.samples)
    }

    /// Copy into an interleaved output slice
    pub fn to_interleaved(&self, output: &mut [Sample]) {
        let n = (output.len() / 2).min(self.samples.len()) * 2;
        output[..n].copy_from_slice(&self.as_interleaved()[..n]);
    }

    /// Sum another buffer into this one (lengths must match)
    pub fn add_buffer(&mut self, other: &StereoBuffer) {
        assert_eq!(self.len(), other.len(), "Buffer lengths must match");
        for (dst, src) in self.samples.iter_mut().zip(other.samples.iter()) {
            *dst += *src;
        }
    }

    pub fn scale(&mut self, factor: Sample) {
        for sample in &mut self.samples {
            *sample *= factor;
        }
    }

    /// Copy from another buffer without reallocating when capacity allows
    pub fn copy_from(&mut self, other: &StereoBuffer) {
        let len = other.samples.len();
        debug_assert!(
            len <= self.samples.capacity(),
            "copy_from: insufficient capacity ({} < {})",
            self.samples.capacity(),
            len
        );
        self.set_len_from_capacity(len);
        self.samples.copy_from_slice(&other.samples);
    }

    pub fn iter(&self) -> impl Iterator<Item = &StereoSample> {
        self.samples.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut StereoSample> {
        self.samples.iter_mut()
    }

    pub fn peak(&self) -> Sample {
        self.samples.iter().map(|s| s.peak()).fold(0.0, Sample::max)
    }

    /// Root-mean-square level over both channels
    pub fn rms(&self) -> Sample {
        if self.samples.is_empty() {
            return 0.0;
        }
        let sum: f32 = self
            .samples
            .iter()
            .map(|s| s.left * s.left + s.right * s.right)
            .sum();
        (sum / (self.samples.len() * 2) as f32).sqrt()
    }
}

impl Index<usize> for StereoBuffer {
    type Output = StereoSample;

    #[inline]
    fn index(&self, index: usize) -> &Self::Output {
        &self.samples[index]
    }
}

impl IndexMut<usize> for StereoBuffer {
    #[inline]
    fn index_mut(&mut self, index: usize) -> &mut Self::Output {
        &mut self.samples[index]
    }
}
