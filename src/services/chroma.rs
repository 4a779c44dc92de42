//! Chroma feature extraction.
//!
//! Hann-windowed STFT over overlapping frames. Magnitudes inside the analysis
//! band are optionally reduced to their harmonic part (median-filter
//! harmonic/percussive separation), then every bin is folded onto its nearest
//! semitone class. Accumulators are summed over all frames and L1-normalized.

use rustfft::{num_complex::Complex, Fft, FftPlanner};
use std::f32::consts::PI;
use std::sync::Arc;

use crate::models::audio::{AudioSegment, ChromaEnergy, ChromaVector};
use crate::services::decoder::{self, DecodeError};

pub const DEFAULT_FRAME_SIZE: usize = 4096;
pub const DEFAULT_HOP_SIZE: usize = 1024;
/// Median filter length, in frames along time and in bins along frequency.
pub const DEFAULT_HARMONIC_KERNEL: usize = 17;

/// Below this the FFT resolution cannot separate semitones.
const MIN_FREQUENCY_HZ: f64 = 55.0;
/// Above this, bins carry mostly harmonics and noise.
const MAX_FREQUENCY_HZ: f64 = 5_000.0;
const A4_HZ: f64 = 440.0;

#[derive(Clone)]
pub struct ChromaExtractor {
    frame_size: usize,
    hop_size: usize,
    harmonic_kernel: Option<usize>,
    fft: Arc<dyn Fft<f32>>,
    window: Arc<[f32]>,
}

impl std::fmt::Debug for ChromaExtractor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChromaExtractor")
            .field("frame_size", &self.frame_size)
            .field("hop_size", &self.hop_size)
            .field("harmonic_kernel", &self.harmonic_kernel)
            .finish()
    }
}

impl Default for ChromaExtractor {
    fn default() -> Self {
        Self::new(DEFAULT_FRAME_SIZE, DEFAULT_HOP_SIZE)
    }
}

impl ChromaExtractor {
    /// `hop_size` is clamped to `1..=frame_size`. Harmonic separation is on.
    pub fn new(frame_size: usize, hop_size: usize) -> Self {
        let frame_size = frame_size.max(16);
        let hop_size = hop_size.clamp(1, frame_size);
        let fft = FftPlanner::<f32>::new().plan_fft_forward(frame_size);
        let window: Arc<[f32]> = (0..frame_size)
            .map(|i| 0.5 - 0.5 * (2.0 * PI * i as f32 / (frame_size - 1) as f32).cos())
            .collect();
        Self {
            frame_size,
            hop_size,
            harmonic_kernel: Some(DEFAULT_HARMONIC_KERNEL),
            fft,
            window,
        }
    }

    /// Toggle harmonic/percussive separation before folding.
    pub fn with_harmonic_separation(mut self, enabled: bool) -> Self {
        self.harmonic_kernel = enabled.then_some(DEFAULT_HARMONIC_KERNEL);
        self
    }

    /// Chroma of a whole decoded segment.
    pub fn extract(&self, segment: &AudioSegment) -> Result<ChromaVector, ChromaError> {
        let pcm = decoder::read_pcm(segment.location())?;
        Ok(self.extract_samples(&pcm.samples, pcm.sample_rate))
    }

    /// Chroma of raw mono samples. Input below the silence floor yields the
    /// uniform vector.
    pub fn extract_samples(&self, samples: &[f32], sample_rate: u32) -> ChromaVector {
        self.accumulate(samples, sample_rate).to_chroma()
    }

    /// Un-normalized per-pitch-class energy summed over all frames, plus the
    /// input level.
    pub fn accumulate(&self, samples: &[f32], sample_rate: u32) -> ChromaEnergy {
        let mut energy = ChromaEnergy {
            sum_squares: samples.iter().map(|s| (*s as f64) * (*s as f64)).sum(),
            samples: samples.len(),
            ..ChromaEnergy::default()
        };
        if samples.is_empty() || sample_rate == 0 {
            return energy;
        }

        let band = self.band_bins(sample_rate);
        if band.is_empty() {
            return energy;
        }

        let mut spectrogram = self.band_magnitudes(samples, &band);
        if let Some(kernel) = self.harmonic_kernel {
            keep_harmonic(&mut spectrogram, kernel);
        }

        for frame in &spectrogram {
            for (magnitude, (_, pc)) in frame.iter().zip(band.iter()) {
                energy.bins[*pc] += *magnitude as f64;
            }
        }
        energy
    }

    /// STFT magnitudes restricted to `band`, one row per frame.
    fn band_magnitudes(&self, samples: &[f32], band: &[(usize, usize)]) -> Vec<Vec<f32>> {
        let mut buffer = vec![Complex::new(0.0f32, 0.0); self.frame_size];
        let mut scratch = vec![Complex::new(0.0f32, 0.0); self.fft.get_inplace_scratch_len()];

        self.frame_starts(samples.len())
            .map(|start| {
                let end = (start + self.frame_size).min(samples.len());
                for (i, slot) in buffer.iter_mut().enumerate() {
                    // Short trailing frames are zero-padded.
                    let s = if start + i < end { samples[start + i] } else { 0.0 };
                    *slot = Complex::new(s * self.window[i], 0.0);
                }
                self.fft.process_with_scratch(&mut buffer, &mut scratch);
                band.iter().map(|(bin, _)| buffer[*bin].norm()).collect()
            })
            .collect()
    }

    fn frame_starts(&self, len: usize) -> impl Iterator<Item = usize> {
        let last = len.saturating_sub(self.frame_size);
        let hop = self.hop_size;
        (0..last / hop + 1).map(move |i| i * hop)
    }

    /// `(bin, pitch class)` for every positive-frequency bin inside the band.
    fn band_bins(&self, sample_rate: u32) -> Vec<(usize, usize)> {
        let bin_hz = sample_rate as f64 / self.frame_size as f64;
        (0..=self.frame_size / 2)
            .filter_map(|bin| {
                let freq = bin as f64 * bin_hz;
                if !(MIN_FREQUENCY_HZ..=MAX_FREQUENCY_HZ).contains(&freq) {
                    return None;
                }
                let midi = 69.0 + 12.0 * (freq / A4_HZ).log2();
                Some((bin, (midi.round() as i64).rem_euclid(12) as usize))
            })
            .collect()
    }
}

/// Scales each cell of a magnitude spectrogram by the soft harmonic mask
/// `H² / (H² + P²)`.
///
/// `H` is the median of the cell's row over `kernel` frames (sustained tones are
/// smooth in time), `P` the median of its column over `kernel` bins (transients
/// are smooth in frequency). Filters are truncated at the edges.
fn keep_harmonic(spectrogram: &mut [Vec<f32>], kernel: usize) {
    let frames = spectrogram.len();
    let Some(bins) = spectrogram.first().map(Vec::len) else {
        return;
    };
    let half = kernel / 2;
    let mut scratch = Vec::with_capacity(kernel);

    let mut masks = vec![vec![0.0f32; bins]; frames];
    for (t, mask_row) in masks.iter_mut().enumerate() {
        let time = t.saturating_sub(half)..(t + half + 1).min(frames);
        for (b, mask) in mask_row.iter_mut().enumerate() {
            scratch.clear();
            scratch.extend(spectrogram[time.clone()].iter().map(|row| row[b]));
            let h = median(&mut scratch);

            scratch.clear();
            scratch.extend_from_slice(&spectrogram[t][b.saturating_sub(half)..(b + half + 1).min(bins)]);
            let p = median(&mut scratch);

            let (h2, p2) = (h * h, p * p);
            *mask = if h2 + p2 > 0.0 { h2 / (h2 + p2) } else { 0.0 };
        }
    }

    for (row, mask_row) in spectrogram.iter_mut().zip(masks.iter()) {
        for (cell, mask) in row.iter_mut().zip(mask_row.iter()) {
            *cell *= mask;
        }
    }
}

/// Upper median; reorders `values`.
fn median(values: &mut [f32]) -> f32 {
    let mid = values.len() / 2;
    *values.select_nth_unstable_by(mid, f32::total_cmp).1
}

#[derive(Debug, thiserror::Error)]
pub enum ChromaError {
    #[error("Failed to read segment audio: {0}")]
    Decode(#[from] DecodeError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::chord::PitchClass;

    const SR: u32 = 22_050;

    fn tone(freqs: &[f32], seconds: f32) -> Vec<f32> {
        let n = (seconds * SR as f32) as usize;
        (0..n)
            .map(|i| {
                let t = i as f32 / SR as f32;
                freqs.iter().map(|f| (2.0 * PI * f * t).sin()).sum::<f32>() / freqs.len() as f32
            })
            .collect()
    }

    /// Deterministic full-band noise of the given peak amplitude.
    fn noise(amplitude: f32, seconds: f32) -> Vec<f32> {
        let mut state = 0x2545_f491u32;
        (0..(seconds * SR as f32) as usize)
            .map(|_| {
                state = state.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
                if state >> 31 == 1 {
                    amplitude
                } else {
                    -amplitude
                }
            })
            .collect()
    }

    fn a_share(extractor: &ChromaExtractor, samples: &[f32]) -> f64 {
        extractor
            .extract_samples(samples, SR)
            .get("A".parse::<PitchClass>().unwrap())
    }

    #[test]
    fn test_single_note_dominates_its_pitch_class() {
        let chroma = ChromaExtractor::default().extract_samples(&tone(&[440.0], 1.0), SR);
        assert_eq!(chroma.dominant().name(), "A");
        assert!(chroma.get("A".parse::<PitchClass>().unwrap()) > 0.5);
    }

    #[test]
    fn test_normalized_sum() {
        let chroma =
            ChromaExtractor::default().extract_samples(&tone(&[261.63, 329.63, 392.0], 0.8), SR);
        assert!((chroma.sum() - 1.0).abs() < 1e-6);
        assert!(chroma.values().iter().all(|v| *v >= 0.0));
    }

    #[test]
    fn test_silence_is_uniform() {
        let chroma = ChromaExtractor::default().extract_samples(&vec![0.0; 20_000], SR);
        assert!(chroma.is_uniform(1e-9));

        let empty = ChromaExtractor::default().extract_samples(&[], SR);
        assert!(empty.is_uniform(1e-9));
    }

    #[test]
    fn test_lsb_noise_is_silence() {
        let samples = noise(1.0 / 32768.0, 1.0);
        for extractor in [
            ChromaExtractor::default(),
            ChromaExtractor::default().with_harmonic_separation(false),
        ] {
            let energy = extractor.accumulate(&samples, SR);
            assert!(energy.bins.iter().sum::<f64>() > 0.0);
            assert!(extractor.extract_samples(&samples, SR).is_uniform(1e-12));
        }
    }

    #[test]
    fn test_quiet_tone_is_not_silence() {
        // Peak 0.014 is roughly -40 dBFS RMS.
        let samples: Vec<f32> = tone(&[440.0], 1.0).iter().map(|s| s * 0.014).collect();
        let chroma = ChromaExtractor::default().extract_samples(&samples, SR);
        assert!(!chroma.is_uniform(1e-3));
        assert_eq!(chroma.dominant().name(), "A");
    }

    #[test]
    fn test_deterministic() {
        let samples = tone(&[196.0, 246.94, 293.66], 0.5);
        let extractor = ChromaExtractor::default();
        let a = extractor.extract_samples(&samples, SR);
        let b = extractor.extract_samples(&samples, SR);
        assert_eq!(a, b);
    }

    #[test]
    fn test_segment_shorter_than_frame_is_padded() {
        let chroma = ChromaExtractor::default().extract_samples(&tone(&[440.0], 0.05), SR);
        assert_eq!(chroma.dominant().name(), "A");
    }

    #[test]
    fn test_frames_overlap() {
        let extractor = ChromaExtractor::new(1024, 256);
        let starts: Vec<usize> = extractor.frame_starts(2048).collect();
        assert_eq!(starts, vec![0, 256, 512, 768, 1024]);
        assert_eq!(extractor.frame_starts(10).collect::<Vec<_>>(), vec![0]);
    }

    #[test]
    fn test_extract_reads_segment_audio() {
        let dir = tempfile::tempdir().unwrap();
        let file = tempfile::Builder::new()
            .suffix(".wav")
            .tempfile_in(dir.path())
            .unwrap();
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: SR,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(file.path(), spec).unwrap();
        for s in tone(&[196.0], 1.0) {
            writer.write_sample((s * 0.8 * i16::MAX as f32) as i16).unwrap();
        }
        writer.finalize().unwrap();

        let segment = AudioSegment::owned(file.into_temp_path(), 1.0, SR, 1);
        let extractor = ChromaExtractor::default();
        let chroma = extractor.extract(&segment).unwrap();
        assert!((chroma.sum() - 1.0).abs() < 1e-6);
        assert_eq!(chroma.dominant().name(), "G");
        assert_eq!(extractor.extract(&segment).unwrap(), chroma);
    }

    #[test]
    fn test_extract_missing_segment_fails() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let segment = AudioSegment::owned(file.into_temp_path(), 1.0, SR, 1);
        let path = segment.location().to_path_buf();
        std::fs::remove_file(&path).unwrap();
        assert!(matches!(
            ChromaExtractor::default().extract(&segment),
            Err(ChromaError::Decode(_))
        ));
    }

    #[test]
    fn test_harmonic_mask_separates_rows_from_columns() {
        // Bin 5 sustained in every frame, frame 4 a broadband click.
        let mut spectrogram = vec![vec![0.0f32; 20]; 9];
        for row in spectrogram.iter_mut() {
            row[5] = 1.0;
        }
        spectrogram[4] = vec![1.0; 20];

        keep_harmonic(&mut spectrogram, 5);

        for (t, row) in spectrogram.iter().enumerate() {
            if t != 4 {
                assert_eq!(row[5], 1.0, "frame {t}");
            }
        }
        for (b, cell) in spectrogram[4].iter().enumerate() {
            if b != 5 {
                assert_eq!(*cell, 0.0, "bin {b}");
            }
        }
    }

    #[test]
    fn test_harmonic_separation_suppresses_clicks() {
        let mut samples: Vec<f32> = tone(&[440.0], 2.0).iter().map(|s| s * 0.3).collect();
        for click in (0..samples.len()).step_by(SR as usize / 2).skip(1) {
            samples[click] = 1.0;
        }

        let separated = a_share(&ChromaExtractor::default(), &samples);
        let raw = a_share(&ChromaExtractor::default().with_harmonic_separation(false), &samples);
        assert!(separated > raw, "separated {separated} <= raw {raw}");
    }

    #[test]
    fn test_median_is_upper_middle() {
        assert_eq!(median(&mut [3.0, 1.0, 2.0]), 2.0);
        assert_eq!(median(&mut [4.0, 1.0, 3.0, 2.0]), 3.0);
        assert_eq!(median(&mut [7.0]), 7.0);
    }
}
