//! Engine sizing and musical defaults

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::types::SAMPLE_RATE;

/// How quickly a permutation (mute/solo) change is blended in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[repr(u8)]
pub enum PermutationChangeRate {
    /// Next sample
    Instant,
    /// One beat (a quarter of a bar)
    #[default]
    Beat,
    Bar,
    TwoBars,
    FourBars,
}

impl PermutationChangeRate {
    pub(crate) fn from_u8(value: u8) -> Self {
        match value {
            0 => PermutationChangeRate::Instant,
            2 => PermutationChangeRate::Bar,
            3 => PermutationChangeRate::TwoBars,
            4 => PermutationChangeRate::FourBars,
            _ => PermutationChangeRate::Beat,
        }
    }

    /// Blend length in bars (0 for instant)
    pub fn bars(self) -> f64 {
        match self {
            PermutationChangeRate::Instant => 0.0,
            PermutationChangeRate::Beat => 0.25,
            PermutationChangeRate::Bar => 1.0,
            PermutationChangeRate::TwoBars => 2.0,
            PermutationChangeRate::FourBars => 4.0,
        }
    }

    /// Blend length in samples for a given bar length (at least 1)
    pub fn span_samples(self, bar_length_seconds: f64, sample_rate: u32) -> u64 {
        let span = (self.bars() * bar_length_seconds * sample_rate as f64).round();
        if span.is_finite() && span >= 1.0 {
            span as u64
        } else {
            1
        }
    }
}

/// Configuration for one engine instance
///
/// Every capacity here is allocated once when the engine is built; the audio
/// thread never grows any of them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Output sample rate in Hz
    /// Default: 48000
    pub sample_rate: u32,

    /// Largest callback buffer the engine pre-allocates for
    /// Larger host buffers are rendered in chunks of this size.
    /// Default: 8192
    pub max_buffer_frames: usize,

    /// Bounded command queue (control -> audio)
    /// Default: 1024
    pub command_queue_capacity: usize,

    /// Bounded permutation request queue
    /// Default: 64
    pub permutation_queue_capacity: usize,

    /// Realtime notice ring (audio -> control)
    /// Default: 256
    pub notice_queue_capacity: usize,

    /// Maximum number of stacked master effects
    /// Default: 8
    pub effect_stack_capacity: usize,

    /// Maximum number of attached sample processors
    /// Default: 8
    pub processor_capacity: usize,

    /// Riff crossfade length in samples
    /// Default: 4800 (100 ms at 48 kHz)
    pub transition_samples: u32,

    /// Permutation blend rate
    /// Default: Beat
    pub change_rate: PermutationChangeRate,

    /// Number of simultaneously beating stems that trigger a consensus beat
    /// Default: 3
    pub consensus_threshold: usize,

    /// Exponential decay rate of the consensus beat (per second)
    /// Default: 4.0
    pub consensus_decay_per_second: f32,

    /// Frames per stem analysis window
    /// Default: 1024
    pub analysis_window_frames: usize,

    /// In-flight stem amalgam snapshots on the event bus
    /// Default: 64
    pub snapshot_event_capacity: usize,

    /// Linear master gain applied before the clipper
    /// Default: 1.0
    pub master_gain: f32,

    /// Soft clipper ceiling in dBFS
    /// Default: -0.3
    pub clip_threshold_db: f32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sample_rate: SAMPLE_RATE,
            max_buffer_frames: 8192,
            command_queue_capacity: 1024,
            permutation_queue_capacity: 64,
            notice_queue_capacity: 256,
            effect_stack_capacity: 8,
            processor_capacity: 8,
            transition_samples: 4800,
            change_rate: PermutationChangeRate::Beat,
            consensus_threshold: 3,
            consensus_decay_per_second: 4.0,
            analysis_window_frames: 1024,
            snapshot_event_capacity: 64,
            master_gain: 1.0,
            clip_threshold_db: -0.3,
        }
    }
}

impl EngineConfig {
    /// Reject values the engine cannot be built with
    pub fn validate(&self) -> Result<(), ConfigError> {
        let checks: [(&'static str, bool); 8] = [
            ("sample_rate", self.sample_rate == 0),
            ("max_buffer_frames", self.max_buffer_frames == 0),
            ("command_queue_capacity", self.command_queue_capacity == 0),
            ("permutation_queue_capacity", self.permutation_queue_capacity == 0),
            ("notice_queue_capacity", self.notice_queue_capacity == 0),
            ("consensus_threshold", self.consensus_threshold == 0),
            ("analysis_window_frames", self.analysis_window_frames == 0),
            ("snapshot_event_capacity", self.snapshot_event_capacity == 0),
        ];
        match checks.iter().find(|(_, zero)| *zero) {
            Some((name, _)) => Err(ConfigError::ZeroValue(name)),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        assert!(EngineConfig::default().validate().is_ok());
    }

    #[test]
    fn test_zero_capacity_rejected() {
        let config = EngineConfig {
            command_queue_capacity: 0,
            ..EngineConfig::default()
        };
        assert_eq!(
            config.validate(),
            Err(ConfigError::ZeroValue("command_queue_capacity"))
        );
    }

    #[test]
    fn test_change_rate_spans() {
        // 2 second bars at 48 kHz
        assert_eq!(PermutationChangeRate::Instant.span_samples(2.0, 48000), 1);
        assert_eq!(PermutationChangeRate::Beat.span_samples(2.0, 48000), 24_000);
        assert_eq!(PermutationChangeRate::Bar.span_samples(2.0, 48000), 96_000);
        assert_eq!(PermutationChangeRate::FourBars.span_samples(2.0, 48000), 384_000);
        // Degenerate bar length never yields a zero span
        assert_eq!(PermutationChangeRate::Bar.span_samples(0.0, 48000), 1);
    }
}
