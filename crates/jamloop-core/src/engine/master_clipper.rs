//! Master safety clipper
//!
//! Last stage before the output sink. Below the knee samples pass through
//! untouched; above it the overshoot is folded smoothly into the ceiling
//! with a `tanh` curve, so the output never exceeds the ceiling and the
//! transfer curve has no corner at the knee.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::types::StereoBuffer;

/// Fraction of the ceiling where soft clipping starts
const KNEE: f32 = 0.9;

pub struct MasterClipper {
    ceiling: f32,
    knee: f32,
    /// Set by the audio thread when a buffer clipped; the UI reads and clears it
    clip_active: Arc<AtomicBool>,
}

impl MasterClipper {
    /// Clipper with a ceiling of -0.3 dBFS
    pub fn new() -> Self {
        Self::with_threshold_db(-0.3)
    }

    pub fn with_threshold_db(db: f32) -> Self {
        let ceiling = 10.0_f32.powf(db.min(0.0) / 20.0);
        Self {
            ceiling,
            knee: ceiling * KNEE,
            clip_active: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Ceiling in linear amplitude
    pub fn ceiling(&self) -> f32 {
        self.ceiling
    }

    pub fn clip_indicator(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.clip_active)
    }

    pub fn process(&mut self, buffer: &mut StereoBuffer) {
        let mut clipped = false;
        for sample in buffer.iter_mut() {
            sample.left = self.shape(sample.left, &mut clipped);
            sample.right = self.shape(sample.right, &mut clipped);
        }
        if clipped {
            self.clip_active.store(true, Ordering::Relaxed);
        }
    }

    #[inline]
    fn shape(&self, x: f32, clipped: &mut bool) -> f32 {
        let magnitude = x.abs();
        if magnitude <= self.knee {
            return x;
        }
        if !magnitude.is_finite() {
            *clipped = true;
            return if x.is_nan() { 0.0 } else { self.ceiling.copysign(x) };
        }
        *clipped = true;
        let headroom = self.ceiling - self.knee;
        let folded = (self.knee + headroom * ((magnitude - self.knee) / headroom).tanh()).min(self.ceiling);
        folded.copysign(x)
    }
}

impl Default for MasterClipper {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::StereoSample;

    #[test]
    fn test_below_knee_is_bypassed() {
        let mut clipper = MasterClipper::new();
        let level = clipper.ceiling() * 0.5;
        let mut buf = StereoBuffer::from_vec(vec![StereoSample::new(level, -level); 16]);
        clipper.process(&mut buf);

        assert!(buf.iter().all(|s| s.left == level && s.right == -level));
        assert!(!clipper.clip_indicator().load(Ordering::Relaxed));
    }

    #[test]
    fn test_hot_signal_stays_under_ceiling() {
        let mut clipper = MasterClipper::with_threshold_db(-1.0);
        let ceiling = clipper.ceiling();
        let mut buf = StereoBuffer::from_vec(vec![StereoSample::new(3.0, -3.0); 16]);
        clipper.process(&mut buf);

        for s in buf.iter() {
            assert!(s.left <= ceiling && s.left > ceiling * KNEE);
            assert!(s.right >= -ceiling && s.right < -ceiling * KNEE);
        }
        assert!(clipper.clip_indicator().load(Ordering::Relaxed));
    }

    #[test]
    fn test_non_finite_input_is_contained() {
        let mut clipper = MasterClipper::new();
        let mut buf = StereoBuffer::from_vec(vec![StereoSample::new(f32::INFINITY, f32::NAN)]);
        clipper.process(&mut buf);
        assert_eq!(buf[0].left, clipper.ceiling());
        assert_eq!(buf[0].right, 0.0);
    }
}
