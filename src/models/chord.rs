use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use strum::{Display, EnumIter, EnumString};

/// Pitch class names, sharp spelling, index 0 = C.
pub const PITCH_NAMES: [&str; 12] = [
    "C", "C#", "D", "D#", "E", "F", "F#", "G", "G#", "A", "A#", "B",
];

/// A semitone class (0 = C ... 11 = B), independent of octave.
///
/// Serialized by name (`"F#"`), so results read naturally in JSON.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PitchClass(u8);

impl PitchClass {
    /// Wraps any semitone offset into 0..12.
    pub fn wrapping(semitones: i32) -> Self {
        Self(semitones.rem_euclid(12) as u8)
    }

    pub fn index(self) -> usize {
        self.0 as usize
    }

    pub fn name(self) -> &'static str {
        PITCH_NAMES[self.index()]
    }

    /// Pitch class `semitones` above this one.
    pub fn transpose(self, semitones: u8) -> Self {
        Self((self.0 + semitones % 12) % 12)
    }

    pub fn all() -> impl Iterator<Item = PitchClass> {
        (0..12).map(PitchClass)
    }
}

impl fmt::Display for PitchClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for PitchClass {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        PITCH_NAMES
            .iter()
            .position(|name| *name == s)
            .map(|i| PitchClass(i as u8))
            .ok_or_else(|| format!("unknown pitch class: {s}"))
    }
}

impl TryFrom<String> for PitchClass {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<PitchClass> for String {
    fn from(pc: PitchClass) -> Self {
        pc.name().to_string()
    }
}

/// Chord quality. Declaration order is the canonical library order.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumIter,
    EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ChordQuality {
    Major,
    Minor,
    Dominant7,
    Major7,
    Minor7,
    Diminished,
    Augmented,
    Sus4,
    Sus2,
    Major6,
    Minor6,
    Dominant9,
    Dominant7Sharp11,
}

impl ChordQuality {
    /// Semitone offsets above the root.
    pub fn intervals(self) -> &'static [u8] {
        match self {
            Self::Major => &[0, 4, 7],
            Self::Minor => &[0, 3, 7],
            Self::Dominant7 => &[0, 4, 7, 10],
            Self::Major7 => &[0, 4, 7, 11],
            Self::Minor7 => &[0, 3, 7, 10],
            Self::Diminished => &[0, 3, 6],
            Self::Augmented => &[0, 4, 8],
            Self::Sus4 => &[0, 5, 7],
            Self::Sus2 => &[0, 2, 7],
            Self::Major6 => &[0, 4, 7, 9],
            Self::Minor6 => &[0, 3, 7, 9],
            Self::Dominant9 => &[0, 2, 4, 7, 10],
            Self::Dominant7Sharp11 => &[0, 4, 6, 7, 10],
        }
    }

    /// Symbol suffix appended to the root name.
    pub fn suffix(self) -> &'static str {
        match self {
            Self::Major => "",
            Self::Minor => "m",
            Self::Dominant7 => "7",
            Self::Major7 => "maj7",
            Self::Minor7 => "m7",
            Self::Diminished => "dim",
            Self::Augmented => "aug",
            Self::Sus4 => "sus4",
            Self::Sus2 => "sus2",
            Self::Major6 => "6",
            Self::Minor6 => "m6",
            Self::Dominant9 => "9",
            Self::Dominant7Sharp11 => "7#11",
        }
    }

    /// Tones beyond the basic triad, by name.
    pub fn extensions(self) -> &'static [&'static str] {
        match self {
            Self::Major | Self::Minor | Self::Diminished | Self::Augmented => &[],
            Self::Dominant7 | Self::Minor7 => &["7"],
            Self::Major7 => &["maj7"],
            Self::Sus4 => &["sus4"],
            Self::Sus2 => &["sus2"],
            Self::Major6 | Self::Minor6 => &["6"],
            Self::Dominant9 => &["7", "9"],
            Self::Dominant7Sharp11 => &["7", "#11"],
        }
    }

    /// Qualities built on a minor third count as minor for key estimation.
    pub fn is_minor(self) -> bool {
        matches!(
            self,
            Self::Minor | Self::Minor7 | Self::Minor6 | Self::Diminished
        )
    }
}

/// Static reference pattern for one root/quality combination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChordTemplate {
    pub root: PitchClass,
    pub quality: ChordQuality,
    pub extensions: &'static [&'static str],
    /// 12-bit presence vector; bit `i` set means pitch class `i` sounds.
    pub pattern: u16,
}

impl ChordTemplate {
    pub fn new(root: PitchClass, quality: ChordQuality) -> Self {
        let pattern = quality
            .intervals()
            .iter()
            .fold(0u16, |mask, &iv| mask | 1 << root.transpose(iv).index());
        Self {
            root,
            quality,
            extensions: quality.extensions(),
            pattern,
        }
    }

    pub fn symbol(&self) -> String {
        format!("{}{}", self.root, self.quality.suffix())
    }

    pub fn contains(&self, pc: PitchClass) -> bool {
        self.pattern & (1 << pc.index()) != 0
    }

    /// Presence pattern as a 0/1 vector.
    pub fn pattern_vector(&self) -> [f64; 12] {
        let mut out = [0.0; 12];
        for pc in PitchClass::all() {
            if self.contains(pc) {
                out[pc.index()] = 1.0;
            }
        }
        out
    }

    pub fn note_count(&self) -> u32 {
        self.pattern.count_ones()
    }
}
