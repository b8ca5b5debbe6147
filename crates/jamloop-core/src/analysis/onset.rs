//! Per-stem energy and beat detection over fixed analysis windows
//!
//! Energy is the RMS of a window. A stem "beats" when its energy rises above
//! `BEAT_RATIO` times its slow running average and above an absolute floor,
//! so steady pads don't trigger and silence never does.

use crate::types::{StereoBuffer, NUM_STEMS};

use super::amalgam::StemSignals;

const BEAT_RATIO: f32 = 1.5;
/// RMS below this never counts as a beat (about -46 dBFS)
const ENERGY_FLOOR: f32 = 0.005;
/// Weight of the newest window in the running average
const AVERAGE_WEIGHT: f32 = 0.1;

pub struct StemOnsetProbe {
    window_frames: usize,
    frames: usize,
    sum_squares: [f64; NUM_STEMS],
    average: [f32; NUM_STEMS],
}

impl StemOnsetProbe {
    pub fn new(window_frames: usize) -> Self {
        Self {
            window_frames: window_frames.max(1),
            frames: 0,
            sum_squares: [0.0; NUM_STEMS],
            average: [0.0; NUM_STEMS],
        }
    }

    pub fn window_frames(&self) -> usize {
        self.window_frames
    }

    /// Feed one callback of stem audio; `on_window` runs for every window
    /// that completes inside it
    pub fn process(
        &mut self,
        stems: &[StereoBuffer; NUM_STEMS],
        active: [bool; NUM_STEMS],
        mut on_window: impl FnMut(&StemSignals),
    ) {
        let len = stems.iter().map(StereoBuffer::len).min().unwrap_or(0);
        let mut offset = 0;
        while offset < len {
            let take = (self.window_frames - self.frames).min(len - offset);
            for (sum, stem) in self.sum_squares.iter_mut().zip(stems.iter()) {
                *sum += stem.as_slice()[offset..offset + take]
                    .iter()
                    .map(|s| f64::from(s.left * s.left + s.right * s.right))
                    .sum::<f64>();
            }
            self.frames += take;
            offset += take;

            if self.frames == self.window_frames {
                let signals = self.close_window(active);
                on_window(&signals);
            }
        }
    }

    fn close_window(&mut self, active: [bool; NUM_STEMS]) -> StemSignals {
        let mut signals = StemSignals {
            active,
            ..StemSignals::default()
        };
        let denom = (self.window_frames * 2) as f64;
        for i in 0..NUM_STEMS {
            let energy = (self.sum_squares[i] / denom).sqrt() as f32;
            signals.energy[i] = energy;
            signals.beats[i] = active[i] && energy > ENERGY_FLOOR && energy > self.average[i] * BEAT_RATIO;
            self.average[i] += (energy - self.average[i]) * AVERAGE_WEIGHT;
            self.sum_squares[i] = 0.0;
        }
        self.frames = 0;
        signals
    }

    pub fn reset(&mut self) {
        self.frames = 0;
        self.sum_squares = [0.0; NUM_STEMS];
        self.average = [0.0; NUM_STEMS];
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::StereoSample;

    fn stems(levels: [f32; NUM_STEMS], frames: usize) -> [StereoBuffer; NUM_STEMS] {
        std::array::from_fn(|i| StereoBuffer::from_vec(vec![StereoSample::mono(levels[i]); frames]))
    }

    #[test]
    fn test_windows_span_callbacks() {
        let mut probe = StemOnsetProbe::new(256);
        let mut windows = 0;
        let quiet = stems([0.0; NUM_STEMS], 100);
        for _ in 0..5 {
            probe.process(&quiet, [true; NUM_STEMS], |_| windows += 1);
        }
        // 500 frames -> one full window, 244 frames carried over
        assert_eq!(windows, 1);
    }

    #[test]
    fn test_onset_after_silence_is_a_beat() {
        let mut probe = StemOnsetProbe::new(128);
        let mut levels = [0.0; NUM_STEMS];
        let mut last = StemSignals::default();
        probe.process(&stems(levels, 128), [true; NUM_STEMS], |s| last = *s);
        assert!(!last.beats.iter().any(|b| *b));

        levels[3] = 0.5;
        probe.process(&stems(levels, 128), [true; NUM_STEMS], |s| last = *s);
        assert!(last.beats[3]);
        assert!((last.energy[3] - 0.5).abs() < 1e-6);
        assert_eq!(last.beats.iter().filter(|b| **b).count(), 1);

        // A sustained level stops counting once the average catches up
        for _ in 0..40 {
            probe.process(&stems(levels, 128), [true; NUM_STEMS], |s| last = *s);
        }
        assert!(!last.beats[3]);
    }

    #[test]
    fn test_inactive_stems_never_beat() {
        let mut probe = StemOnsetProbe::new(64);
        let mut active = [true; NUM_STEMS];
        active[0] = false;
        let mut last = StemSignals::default();
        probe.process(&stems([0.9; NUM_STEMS], 64), active, |s| last = *s);
        assert!(!last.beats[0]);
        assert!(last.beats[1]);
    }
}
