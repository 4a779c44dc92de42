use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use strum::{Display, EnumString};

use crate::models::audio::ChromaVector;
use crate::models::chord::{ChordQuality, ChordTemplate, PitchClass};

/// Best template for one chroma vector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChordMatch {
    pub symbol: String,
    pub root: PitchClass,
    pub quality: ChordQuality,
    pub extensions: BTreeSet<String>,
    /// Similarity to the winning template, in [0, 1].
    pub confidence: f64,
}

impl ChordMatch {
    pub fn from_template(template: &ChordTemplate, confidence: f64) -> Self {
        Self {
            symbol: template.symbol(),
            root: template.root,
            quality: template.quality,
            extensions: template.extensions.iter().map(|e| e.to_string()).collect(),
            confidence: confidence.clamp(0.0, 1.0),
        }
    }
}

/// A chord match placed on the timeline (seconds, absolute within the source).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimedChord {
    #[serde(flatten)]
    pub chord: ChordMatch,
    pub start_time: f64,
    pub end_time: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Mode {
    Major,
    Minor,
}

/// Best-effort key derived from the dominant chord roots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyEstimate {
    pub tonic: PitchClass,
    pub mode: Mode,
}

impl fmt::Display for KeyEstimate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.tonic, self.mode)
    }
}

/// Where a result was computed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ResultOrigin {
    #[default]
    Local,
    Remote,
}

/// Final output of a completed analysis job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub chord_progression: Vec<TimedChord>,
    pub average_confidence: f64,
    #[serde(default)]
    pub key_estimate: Option<KeyEstimate>,
    #[serde(default)]
    pub tempo_estimate: Option<f64>,
    /// Whole-segment chroma, for visualization.
    #[serde(default)]
    pub chroma_vector: Option<ChromaVector>,
    #[serde(default)]
    pub strategy: String,
    #[serde(default)]
    pub origin: ResultOrigin,
    #[serde(default)]
    pub analysis_seconds: f64,
}

impl AnalysisResult {
    /// The single chord when the span was analyzed as one window.
    pub fn primary_chord(&self) -> Option<&ChordMatch> {
        self.chord_progression.first().map(|c| &c.chord)
    }
}

/// Mean of the per-window confidences; 0 for an empty progression.
pub fn average_confidence(progression: &[TimedChord]) -> f64 {
    if progression.is_empty() {
        return 0.0;
    }
    progression.iter().map(|c| c.chord.confidence).sum::<f64>() / progression.len() as f64
}

/// Most frequent root among the matches; mode by the majority quality for that root.
///
/// Root ties go to the root that appears first in the progression. Mode ties are major.
pub fn estimate_key(progression: &[TimedChord]) -> Option<KeyEstimate> {
    let mut counts = [0usize; 12];
    let mut first_seen = [usize::MAX; 12];
    for (pos, timed) in progression.iter().enumerate() {
        let idx = timed.chord.root.index();
        counts[idx] += 1;
        first_seen[idx] = first_seen[idx].min(pos);
    }

    let tonic_idx = (0..12)
        .filter(|&i| counts[i] > 0)
        .max_by(|&a, &b| counts[a].cmp(&counts[b]).then(first_seen[b].cmp(&first_seen[a])))?;
    let tonic = PitchClass::wrapping(tonic_idx as i32);

    let (minor, major) = progression
        .iter()
        .filter(|c| c.chord.root == tonic)
        .fold((0usize, 0usize), |(mi, ma), c| {
            if c.chord.quality.is_minor() {
                (mi + 1, ma)
            } else {
                (mi, ma + 1)
            }
        });

    let mode = if minor > major { Mode::Minor } else { Mode::Major };
    Some(KeyEstimate { tonic, mode })
}
