//! Fixed-layout beat/energy record for inter-process readers
//!
//! The layout is `#[repr(C)]` with no padding and starts with a version
//! tag. Readers must check the version before trusting the rest.

use bytemuck::{Pod, Zeroable};

use crate::error::RecordError;
use crate::types::NUM_STEMS;

use super::amalgam::StemDataAmalgam;

pub const BEAT_ENERGY_RECORD_VERSION: u32 = 1;

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct BeatEnergyRecord {
    pub version: u32,
    /// Bit `i` set when stem `i` beat in the window
    pub beat_mask: u32,
    pub consensus_beat: f32,
    pub reserved: u32,
    /// Absolute sample position at the end of the window
    pub sample_position: u64,
    pub energy: [f32; NUM_STEMS],
}

impl BeatEnergyRecord {
    pub const SIZE: usize = std::mem::size_of::<Self>();

    pub fn from_amalgam(amalgam: &StemDataAmalgam, sample_position: u64) -> Self {
        Self {
            version: BEAT_ENERGY_RECORD_VERSION,
            beat_mask: amalgam.beat_mask(),
            consensus_beat: amalgam.consensus_beat,
            reserved: 0,
            sample_position,
            energy: amalgam.energy,
        }
    }

    pub fn to_bytes(&self) -> &[u8] {
        bytemuck::bytes_of(self)
    }

    /// Read a record from the front of `bytes` (alignment not required)
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, RecordError> {
        if bytes.len() < Self::SIZE {
            return Err(RecordError::TooShort {
                len: bytes.len(),
                expected: Self::SIZE,
            });
        }
        let record: Self = bytemuck::pod_read_unaligned(&bytes[..Self::SIZE]);
        if record.version != BEAT_ENERGY_RECORD_VERSION {
            return Err(RecordError::VersionMismatch {
                found: record.version,
                expected: BEAT_ENERGY_RECORD_VERSION,
            });
        }
        Ok(record)
    }

    pub fn beat(&self, stem: usize) -> bool {
        stem < NUM_STEMS && self.beat_mask & (1 << stem) != 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout_is_stable() {
        assert_eq!(BeatEnergyRecord::SIZE, 56);
        assert_eq!(std::mem::align_of::<BeatEnergyRecord>(), 8);
        let record = BeatEnergyRecord::zeroed();
        // Version tag leads the record
        let bytes = BeatEnergyRecord { version: 0xA1B2_C3D4, ..record }.to_bytes().to_vec();
        assert_eq!(u32::from_ne_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]), 0xA1B2_C3D4);
    }

    #[test]
    fn test_from_amalgam_and_back() {
        let mut amalgam = StemDataAmalgam::default();
        amalgam.beats[1] = true;
        amalgam.beats[7] = true;
        amalgam.energy[1] = 0.25;
        amalgam.consensus_beat = 0.5;

        let record = BeatEnergyRecord::from_amalgam(&amalgam, 96_000);
        // Unaligned source buffer
        let mut buffer = vec![0u8; BeatEnergyRecord::SIZE + 1];
        buffer[1..].copy_from_slice(record.to_bytes());
        let read = BeatEnergyRecord::from_bytes(&buffer[1..]).unwrap();

        assert_eq!(read, record);
        assert!(read.beat(1) && read.beat(7) && !read.beat(0));
        assert_eq!(read.sample_position, 96_000);
    }

    #[test]
    fn test_rejects_short_and_foreign_versions() {
        assert_eq!(
            BeatEnergyRecord::from_bytes(&[0u8; 8]),
            Err(RecordError::TooShort { len: 8, expected: 56 })
        );
        let future = BeatEnergyRecord {
            version: 2,
            ..BeatEnergyRecord::zeroed()
        };
        assert_eq!(
            BeatEnergyRecord::from_bytes(future.to_bytes()),
            Err(RecordError::VersionMismatch { found: 2, expected: 1 })
        );
    }
}
