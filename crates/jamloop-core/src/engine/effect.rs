//! Master effects and sample processors
//!
//! Both are installed through the command queue and run on the audio
//! thread, so implementations must not block or allocate in `process`.
//!
//! - [`MasterEffect`]s form a stack applied to the mixed master buffer,
//!   before master gain and clipping.
//! - [`SampleProcessor`]s (disk writers, scopes, meters) observe the final
//!   master buffer once per callback, before mute is applied.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use crate::types::StereoBuffer;

/// An in-place effect on the master bus
pub trait MasterEffect: Send {
    fn process(&mut self, buffer: &mut StereoBuffer);

    fn name(&self) -> &str;

    /// Clear internal state (delay lines, envelopes)
    fn reset(&mut self) {}
}

/// A read-only consumer of the master buffer
pub trait SampleProcessor: Send {
    fn process(&mut self, buffer: &StereoBuffer, sample_rate: u32);

    fn name(&self) -> &str {
        "processor"
    }
}

/// Peak/RMS readout shared with the UI
#[derive(Debug, Default)]
pub struct LevelReadout {
    peak: AtomicU32,
    rms: AtomicU32,
}

impl LevelReadout {
    #[inline]
    pub fn peak(&self) -> f32 {
        f32::from_bits(self.peak.load(Ordering::Relaxed))
    }

    #[inline]
    pub fn rms(&self) -> f32 {
        f32::from_bits(self.rms.load(Ordering::Relaxed))
    }
}

/// Master level meter
///
/// Peak holds and decays by `release` per callback; RMS is per callback.
pub struct LevelMeter {
    readout: Arc<LevelReadout>,
    release: f32,
    held_peak: f32,
}

impl LevelMeter {
    pub fn new() -> Self {
        Self::with_release(0.9)
    }

    pub fn with_release(release: f32) -> Self {
        Self {
            readout: Arc::new(LevelReadout::default()),
            release: release.clamp(0.0, 1.0),
            held_peak: 0.0,
        }
    }

    pub fn readout(&self) -> Arc<LevelReadout> {
        Arc::clone(&self.readout)
    }
}

impl Default for LevelMeter {
    fn default() -> Self {
        Self::new()
    }
}

impl SampleProcessor for LevelMeter {
    fn process(&mut self, buffer: &StereoBuffer, _sample_rate: u32) {
        self.held_peak = buffer.peak().max(self.held_peak * self.release);
        self.readout.peak.store(self.held_peak.to_bits(), Ordering::Relaxed);
        self.readout.rms.store(buffer.rms().to_bits(), Ordering::Relaxed);
    }

    fn name(&self) -> &str {
        "level meter"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::StereoSample;

    #[test]
    fn test_level_meter_peak_hold_and_release() {
        let mut meter = LevelMeter::with_release(0.5);
        let readout = meter.readout();

        let loud = StereoBuffer::from_vec(vec![StereoSample::new(0.8, -0.4); 64]);
        meter.process(&loud, 48000);
        assert!((readout.peak() - 0.8).abs() < 1e-6);
        assert!(readout.rms() > 0.0);

        meter.process(&StereoBuffer::silence(64), 48000);
        assert!((readout.peak() - 0.4).abs() < 1e-6);
        assert_eq!(readout.rms(), 0.0);
    }
}
