use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tempfile::TempPath;

use crate::models::chord::PitchClass;

/// Energy sums below this cannot be normalized.
pub const SILENCE_EPSILON: f64 = 1e-10;

/// Input quieter than this RMS level is silence. One LSB of 16-bit noise sits
/// near -90 dBFS; quiet but audible music is well above -60.
pub const SILENCE_FLOOR_DBFS: f64 = -60.0;

/// A decoded, trimmed piece of audio ready for analysis.
///
/// Segments produced by the acquisition gateway own their decoded artifact:
/// the file is removed when the segment is dropped.
#[derive(Debug)]
pub struct AudioSegment {
    location: PathBuf,
    duration_seconds: f64,
    sample_rate: u32,
    channel_count: u16,
    artifact: Option<TempPath>,
}

impl AudioSegment {
    /// Segment backed by a temporary artifact that is deleted on drop.
    pub fn owned(artifact: TempPath, duration_seconds: f64, sample_rate: u32, channel_count: u16) -> Self {
        Self {
            location: artifact.to_path_buf(),
            duration_seconds,
            sample_rate,
            channel_count,
            artifact: Some(artifact),
        }
    }

    pub fn location(&self) -> &Path {
        &self.location
    }

    pub fn duration_seconds(&self) -> f64 {
        self.duration_seconds
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channel_count(&self) -> u16 {
        self.channel_count
    }

    /// Deletes the owned artifact now rather than at drop.
    pub fn release(mut self) -> std::io::Result<()> {
        match self.artifact.take() {
            Some(path) => path.close(),
            None => Ok(()),
        }
    }
}

/// Un-normalized pitch-class energy gathered from a run of samples, together
/// with the signal level it was measured at.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ChromaEnergy {
    pub bins: [f64; 12],
    pub sum_squares: f64,
    pub samples: usize,
}

impl ChromaEnergy {
    pub fn merge(&mut self, other: &ChromaEnergy) {
        for (acc, e) in self.bins.iter_mut().zip(other.bins.iter()) {
            *acc += e;
        }
        self.sum_squares += other.sum_squares;
        self.samples += other.samples;
    }

    pub fn rms(&self) -> f64 {
        if self.samples == 0 {
            return 0.0;
        }
        (self.sum_squares / self.samples as f64).sqrt()
    }

    /// RMS level relative to full scale. Empty or all-zero input is `-inf`.
    pub fn level_dbfs(&self) -> f64 {
        20.0 * self.rms().log10()
    }

    pub fn is_silent(&self) -> bool {
        // NaN levels count as silent too.
        !(self.level_dbfs() >= SILENCE_FLOOR_DBFS)
    }

    /// Normalized chroma, or the uniform vector below [`SILENCE_FLOOR_DBFS`].
    pub fn to_chroma(&self) -> ChromaVector {
        if self.is_silent() {
            return ChromaVector::uniform();
        }
        ChromaVector::from_energies(self.bins)
    }
}

/// Normalized 12-bin pitch-class energy histogram. Components sum to 1.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ChromaVector([f64; 12]);

impl ChromaVector {
    /// L1-normalizes raw energies. A sum below [`SILENCE_EPSILON`] maps to the
    /// uniform vector. Negative or non-finite inputs are clamped to zero first.
    ///
    /// This does not look at signal level; use [`ChromaEnergy::to_chroma`] for
    /// energies measured from audio.
    pub fn from_energies(energies: [f64; 12]) -> Self {
        let mut clean = energies;
        for v in clean.iter_mut() {
            if !v.is_finite() || *v < 0.0 {
                *v = 0.0;
            }
        }
        let sum: f64 = clean.iter().sum();
        if sum < SILENCE_EPSILON {
            return Self::uniform();
        }
        for v in clean.iter_mut() {
            *v /= sum;
        }
        Self(clean)
    }

    pub fn uniform() -> Self {
        Self([1.0 / 12.0; 12])
    }

    pub fn values(&self) -> &[f64; 12] {
        &self.0
    }

    pub fn get(&self, pc: PitchClass) -> f64 {
        self.0[pc.index()]
    }

    pub fn sum(&self) -> f64 {
        self.0.iter().sum()
    }

    pub fn is_uniform(&self, tolerance: f64) -> bool {
        self.0.iter().all(|v| (v - 1.0 / 12.0).abs() <= tolerance)
    }

    /// Euclidean norm.
    pub fn norm(&self) -> f64 {
        self.0.iter().map(|v| v * v).sum::<f64>().sqrt()
    }

    /// Pitch class with the most energy; ties go to the lower index.
    pub fn dominant(&self) -> PitchClass {
        let mut best = 0;
        for (i, v) in self.0.iter().enumerate() {
            if *v > self.0[best] {
                best = i;
            }
        }
        PitchClass::wrapping(best as i32)
    }
}
