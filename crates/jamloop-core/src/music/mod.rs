//! Musical key and scale carried in riff metadata
//!
//! The core never transposes audio; the key is resolved with the riff and
//! exposed to observers (UI, telemetry) unchanged.

use serde::{Deserialize, Serialize};

const NOTE_NAMES: [&str; 12] = ["C", "C#", "D", "D#", "E", "F", "F#", "G", "G#", "A", "A#", "B"];

/// Scale of a riff
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Scale {
    #[default]
    Major,
    Minor,
    Dorian,
    Phrygian,
    Lydian,
    Mixolydian,
    Locrian,
    Chromatic,
}

impl Scale {
    /// Short suffix used when printing a key ("" for major, "m" for minor)
    pub fn suffix(&self) -> &'static str {
        match self {
            Scale::Major => "",
            Scale::Minor => "m",
            Scale::Dorian => " dorian",
            Scale::Phrygian => " phrygian",
            Scale::Lydian => " lydian",
            Scale::Mixolydian => " mixolydian",
            Scale::Locrian => " locrian",
            Scale::Chromatic => " chromatic",
        }
    }
}

/// Musical key with root note and scale
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct MusicalKey {
    /// Root note as semitone offset from C (0=C, 1=C#, ..., 11=B)
    pub root: u8,
    pub scale: Scale,
}

impl MusicalKey {
    pub const fn new(root: u8, scale: Scale) -> Self {
        Self {
            root: root % 12,
            scale,
        }
    }

    /// Parse strings like "Am", "C#", "Bb minor", "F dorian"
    pub fn parse(s: &str) -> Option<Self> {
        let s = s.trim();
        let mut chars = s.chars().peekable();

        let base_root = match chars.next()?.to_ascii_uppercase() {
            'C' => 0,
            'D' => 2,
            'E' => 4,
            'F' => 5,
            'G' => 7,
            'A' => 9,
            'B' => 11,
            _ => return None,
        };

        let root = match chars.peek() {
            Some('#') => {
                chars.next();
                (base_root + 1) % 12
            }
            Some('b') => {
                chars.next();
                (base_root + 11) % 12
            }
            _ => base_root,
        };

        let rest: String = chars.collect::<String>().trim().to_lowercase();
        let scale = match rest.as_str() {
            "" | "maj" | "major" => Scale::Major,
            "m" | "min" | "minor" => Scale::Minor,
            "dorian" => Scale::Dorian,
            "phrygian" => Scale::Phrygian,
            "lydian" => Scale::Lydian,
            "mixolydian" => Scale::Mixolydian,
            "locrian" => Scale::Locrian,
            "chromatic" => Scale::Chromatic,
            _ => return None,
        };

        Some(Self::new(root, scale))
    }

    /// Relative major/minor; other modes map to themselves
    pub fn relative(&self) -> Self {
        match self.scale {
            Scale::Minor => Self::new(self.root + 3, Scale::Major),
            Scale::Major => Self::new(self.root + 9, Scale::Minor),
            _ => *self,
        }
    }

    /// Same key or relative major/minor
    pub fn is_compatible_with(&self, other: &MusicalKey) -> bool {
        self == other || self.relative() == *other
    }
}

impl std::fmt::Display for MusicalKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}{}", NOTE_NAMES[self.root as usize], self.scale.suffix())
    }
}
