//! Consensus beat across stems
//!
//! When at least `threshold` active stems beat in the same window the
//! consensus beat jumps to 1.0. Otherwise it decays exponentially with the
//! elapsed time and snaps to zero once it is inaudibly small, so observers
//! see it actually reach 0.

use crate::types::NUM_STEMS;

/// Below this the consensus beat is reported as exactly zero
const CONSENSUS_EPSILON: f32 = 1e-4;

/// Instantaneous per-stem signals for one analysis window
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct StemSignals {
    pub beats: [bool; NUM_STEMS],
    pub energy: [f32; NUM_STEMS],
    /// Stems that are loaded and audible; inactive stems never vote
    pub active: [bool; NUM_STEMS],
}

/// Aggregated snapshot of all stems
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct StemDataAmalgam {
    pub beats: [bool; NUM_STEMS],
    pub energy: [f32; NUM_STEMS],
    pub consensus_beat: f32,
}

impl StemDataAmalgam {
    /// Number of stems beating in this snapshot
    pub fn beat_count(&self) -> usize {
        self.beats.iter().filter(|beat| **beat).count()
    }

    /// Beat flags as a bitmask (bit `i` = stem `i`)
    pub fn beat_mask(&self) -> u32 {
        self.beats
            .iter()
            .enumerate()
            .fold(0, |mask, (i, beat)| if *beat { mask | (1 << i) } else { mask })
    }
}

/// Snapshot published on the event bus
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StemAmalgamEvent {
    /// Absolute sample position at the end of the analysed window
    pub sample_position: u64,
    pub amalgam: StemDataAmalgam,
}

pub struct StemAmalgamAnalyzer {
    threshold: usize,
    decay_per_second: f32,
    current: StemDataAmalgam,
}

impl StemAmalgamAnalyzer {
    pub fn new(threshold: usize, decay_per_second: f32) -> Self {
        Self {
            threshold: threshold.clamp(1, NUM_STEMS),
            decay_per_second: decay_per_second.max(0.0),
            current: StemDataAmalgam::default(),
        }
    }

    /// Fold one window of signals in; `elapsed_seconds` is the time since
    /// the previous window
    pub fn ingest(&mut self, signals: &StemSignals, elapsed_seconds: f32) -> StemDataAmalgam {
        let mut beats = [false; NUM_STEMS];
        for (i, beat) in beats.iter_mut().enumerate() {
            *beat = signals.beats[i] && signals.active[i];
        }
        let voting = beats.iter().filter(|beat| **beat).count();

        let consensus = if voting >= self.threshold {
            1.0
        } else {
            let decayed =
                self.current.consensus_beat * (-self.decay_per_second * elapsed_seconds.max(0.0)).exp();
            if decayed < CONSENSUS_EPSILON {
                0.0
            } else {
                decayed
            }
        };

        self.current = StemDataAmalgam {
            beats,
            energy: signals.energy,
            consensus_beat: consensus,
        };
        self.current
    }

    pub fn current(&self) -> &StemDataAmalgam {
        &self.current
    }

    pub fn reset(&mut self) {
        self.current = StemDataAmalgam::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signals(beating: &[usize]) -> StemSignals {
        let mut s = StemSignals {
            active: [true; NUM_STEMS],
            ..StemSignals::default()
        };
        for &i in beating {
            s.beats[i] = true;
            s.energy[i] = 0.5;
        }
        s
    }

    #[test]
    fn test_three_stems_trigger_then_decay_to_zero() {
        let mut analyzer = StemAmalgamAnalyzer::new(3, 4.0);
        let hit = analyzer.ingest(&signals(&[0, 3, 6]), 0.02);
        assert_eq!(hit.consensus_beat, 1.0);
        assert_eq!(hit.beat_count(), 3);
        assert_eq!(hit.beat_mask(), 0b0100_1001);

        let mut previous = hit.consensus_beat;
        let mut windows = 0;
        while previous > 0.0 {
            let next = analyzer.ingest(&signals(&[]), 0.02).consensus_beat;
            assert!(next < previous, "consensus must strictly decrease");
            previous = next;
            windows += 1;
            assert!(windows < 1000, "consensus never reached zero");
        }
        assert_eq!(previous, 0.0);
    }

    #[test]
    fn test_two_stems_are_not_enough() {
        let mut analyzer = StemAmalgamAnalyzer::new(3, 4.0);
        assert_eq!(analyzer.ingest(&signals(&[1, 2]), 0.02).consensus_beat, 0.0);
    }

    #[test]
    fn test_inactive_stems_do_not_vote() {
        let mut analyzer = StemAmalgamAnalyzer::new(3, 4.0);
        let mut s = signals(&[0, 1, 2]);
        s.active[2] = false;
        let out = analyzer.ingest(&s, 0.02);
        assert_eq!(out.consensus_beat, 0.0);
        assert!(!out.beats[2]);
    }

    #[test]
    fn test_decay_follows_elapsed_time() {
        let mut analyzer = StemAmalgamAnalyzer::new(3, 2.0);
        analyzer.ingest(&signals(&[0, 1, 2]), 0.0);
        let after = analyzer.ingest(&signals(&[]), 0.5).consensus_beat;
        assert!((after - (-1.0f32).exp()).abs() < 1e-6);
    }
}
