//! Synthetic audio fixtures: sine-tone chords rendered to WAV with hound.

#![allow(dead_code)]

use std::f32::consts::PI;
use std::path::{Path, PathBuf};

pub const SAMPLE_RATE: u32 = 22_050;

/// Triads as frequencies in Hz.
pub const C_MAJOR: &[f32] = &[261.63, 329.63, 392.00];
pub const A_MINOR: &[f32] = &[220.00, 261.63, 329.63];
pub const G_MAJOR: &[f32] = &[196.00, 246.94, 293.66];
pub const F_MAJOR: &[f32] = &[174.61, 220.00, 261.63];

/// Equal-amplitude sum of sines, scaled to stay within [-1, 1].
pub fn chord(freqs: &[f32], seconds: f32) -> Vec<f32> {
    let n = (seconds * SAMPLE_RATE as f32) as usize;
    (0..n)
        .map(|i| {
            let t = i as f32 / SAMPLE_RATE as f32;
            0.8 * freqs.iter().map(|f| (2.0 * PI * f * t).sin()).sum::<f32>() / freqs.len() as f32
        })
        .collect()
}

/// Chords back to back, each lasting `seconds_each`.
pub fn progression(chords: &[&[f32]], seconds_each: f32) -> Vec<f32> {
    chords.iter().flat_map(|c| chord(c, seconds_each)).collect()
}

pub fn silence(seconds: f32) -> Vec<f32> {
    vec![0.0; (seconds * SAMPLE_RATE as f32) as usize]
}

/// Near-silence that survives 16-bit quantization as +/-1 LSB.
pub fn lsb_noise(seconds: f32) -> Vec<f32> {
    let lsb = 2.0 / 32768.0;
    (0..(seconds * SAMPLE_RATE as f32) as usize)
        .map(|i| if (i * 7919) % 5 < 2 { lsb } else { -lsb })
        .collect()
}

/// Write 16-bit PCM with the given channel count (samples are duplicated per channel).
pub fn write_wav(dir: &Path, name: &str, samples: &[f32], channels: u16) -> PathBuf {
    let path = dir.join(name);
    let spec = hound::WavSpec {
        channels,
        sample_rate: SAMPLE_RATE,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(&path, spec).expect("create wav");
    for s in samples {
        let v = (s.clamp(-1.0, 1.0) * i16::MAX as f32) as i16;
        for _ in 0..channels {
            writer.write_sample(v).expect("write sample");
        }
    }
    writer.finalize().expect("finalize wav");
    path
}
