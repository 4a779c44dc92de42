//! Audio decoding to canonical PCM.
//!
//! Uploads of any container symphonia understands are decoded, trimmed to the
//! requested span while decoding, mixed to mono, resampled with rubato and
//! written as 16-bit mono WAV. Analysis reads those WAV artifacts back with hound.

use rubato::{
    Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction,
};
use std::fs::File;
use std::path::Path;
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, SeekMode, SeekTo};
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use symphonia::core::units::{Time, TimeBase};

use crate::models::job::TimeSpan;

/// Mono PCM samples in [-1.0, 1.0].
#[derive(Debug, Clone)]
pub struct DecodedAudio {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
    /// Channel count of the source before mixdown.
    pub source_channels: u16,
}

impl DecodedAudio {
    pub fn duration_seconds(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f64 / self.sample_rate as f64
    }
}

/// Checks that the file is an audio container with a decodable track.
pub fn probe(path: &Path) -> Result<(), DecodeError> {
    let format = open_format(path)?;
    let track = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .ok_or(DecodeError::NoAudioTrack)?;
    symphonia::default::get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .map_err(|e| DecodeError::UnsupportedFormat(e.to_string()))?;
    Ok(())
}

/// Decode `span` of the file to mono f32 at the source sample rate.
pub fn decode_span(path: &Path, span: &TimeSpan) -> Result<DecodedAudio, DecodeError> {
    let mut format = open_format(path)?;

    let track = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .ok_or(DecodeError::NoAudioTrack)?;
    let track_id = track.id;
    let time_base = track.codec_params.time_base;
    let sample_rate = track
        .codec_params
        .sample_rate
        .ok_or_else(|| DecodeError::UnsupportedFormat("sample rate unknown".to_string()))?;
    let source_channels = track
        .codec_params
        .channels
        .map(|c| c.count() as u16)
        .unwrap_or(1);

    let mut decoder = symphonia::default::get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .map_err(|e| DecodeError::UnsupportedFormat(e.to_string()))?;

    // Skip straight to the span start when the container supports it.
    if span.start_time > 0.0 {
        let seek = format.seek(
            SeekMode::Accurate,
            SeekTo::Time {
                time: Time::from(span.start_time),
                track_id: Some(track_id),
            },
        );
        match seek {
            Ok(seeked) => {
                decoder.reset();
                tracing::debug!(
                    path = %path.display(),
                    required_ts = seeked.required_ts,
                    actual_ts = seeked.actual_ts,
                    "Seeked to span start"
                );
            }
            Err(e) => {
                tracing::debug!(path = %path.display(), error = %e, "Seek unsupported, decoding from start");
            }
        }
    }

    let end_time = span.end_time.unwrap_or(f64::INFINITY);
    let mut samples: Vec<f32> = Vec::new();
    let mut frames_seen: u64 = 0;
    let mut sample_buf: Option<SampleBuffer<f32>> = None;

    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
            Err(SymphoniaError::ResetRequired) => break,
            Err(e) => return Err(DecodeError::Corrupt(e.to_string())),
        };

        if packet.track_id() != track_id {
            continue;
        }

        let packet_start = match time_base {
            Some(tb) => seconds_at(tb, packet.ts()),
            None => frames_seen as f64 / sample_rate as f64,
        };
        if packet_start >= end_time {
            break;
        }

        let decoded = match decoder.decode(&packet) {
            Ok(decoded) => decoded,
            // Recoverable: drop the damaged packet and keep going.
            Err(SymphoniaError::DecodeError(e)) => {
                tracing::warn!(path = %path.display(), error = %e, "Skipping undecodable packet");
                continue;
            }
            Err(e) => return Err(DecodeError::Corrupt(e.to_string())),
        };

        let spec = *decoded.spec();
        let frames = decoded.frames();
        let channels = spec.channels.count().max(1);
        let buf = sample_buf.get_or_insert_with(|| SampleBuffer::new(decoded.capacity() as u64, spec));
        if buf.capacity() < decoded.capacity() * channels {
            *buf = SampleBuffer::new(decoded.capacity() as u64, spec);
        }
        buf.copy_interleaved_ref(decoded);

        for (i, frame) in buf.samples().chunks(channels).take(frames).enumerate() {
            let t = packet_start + i as f64 / sample_rate as f64;
            if t < span.start_time {
                continue;
            }
            if t >= end_time {
                break;
            }
            samples.push(frame.iter().sum::<f32>() / channels as f32);
        }
        frames_seen += frames as u64;
    }

    if samples.is_empty() {
        let decoded_secs = frames_seen as f64 / sample_rate as f64;
        if span.start_time > 0.0 {
            return Err(DecodeError::SpanOutOfRange {
                start_time: span.start_time,
                duration: decoded_secs,
            });
        }
        return Err(DecodeError::Empty);
    }

    tracing::debug!(
        path = %path.display(),
        samples = samples.len(),
        sample_rate,
        source_channels,
        "Decoded span"
    );

    Ok(DecodedAudio {
        samples,
        sample_rate,
        source_channels,
    })
}

/// Sinc resampling of a mono signal.
pub fn resample_mono(samples: Vec<f32>, from_rate: u32, to_rate: u32) -> Result<Vec<f32>, DecodeError> {
    if from_rate == to_rate || samples.is_empty() {
        return Ok(samples);
    }

    let params = SincInterpolationParameters {
        sinc_len: 128,
        f_cutoff: 0.95,
        interpolation: SincInterpolationType::Linear,
        oversampling_factor: 128,
        window: WindowFunction::BlackmanHarris2,
    };
    let ratio = to_rate as f64 / from_rate as f64;

    let mut resampler = SincFixedIn::<f32>::new(ratio, 2.0, params, samples.len(), 1)
        .map_err(|e| DecodeError::Resample(e.to_string()))?;
    let mut output = resampler
        .process(&[samples], None)
        .map_err(|e| DecodeError::Resample(e.to_string()))?;

    Ok(output.pop().unwrap_or_default())
}

/// Write mono samples as 16-bit PCM WAV.
pub fn write_canonical_wav(path: &Path, samples: &[f32], sample_rate: u32) -> Result<(), DecodeError> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(path, spec)?;
    for &s in samples {
        writer.write_sample((s.clamp(-1.0, 1.0) * i16::MAX as f32).round() as i16)?;
    }
    writer.finalize()?;
    Ok(())
}

/// Read a WAV file as mono f32.
pub fn read_pcm(path: &Path) -> Result<DecodedAudio, DecodeError> {
    let mut reader = hound::WavReader::open(path)?;
    let spec = reader.spec();
    let channels = spec.channels.max(1) as usize;

    let interleaved: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Float => reader.samples::<f32>().collect::<Result<_, _>>()?,
        hound::SampleFormat::Int => {
            let scale = (1i64 << (spec.bits_per_sample.saturating_sub(1))) as f32;
            reader
                .samples::<i32>()
                .map(|s| s.map(|v| v as f32 / scale))
                .collect::<Result<_, _>>()?
        }
    };

    let samples = interleaved
        .chunks(channels)
        .map(|frame| frame.iter().sum::<f32>() / channels as f32)
        .collect();

    Ok(DecodedAudio {
        samples,
        sample_rate: spec.sample_rate,
        source_channels: spec.channels,
    })
}

fn open_format(path: &Path) -> Result<Box<dyn symphonia::core::formats::FormatReader>, DecodeError> {
    let file = File::open(path)?;
    let mss = MediaSourceStream::new(Box::new(file), Default::default());

    let mut hint = Hint::new();
    if let Some(extension) = path.extension().and_then(|e| e.to_str()) {
        hint.with_extension(extension);
    }

    let probed = symphonia::default::get_probe()
        .format(&hint, mss, &FormatOptions::default(), &MetadataOptions::default())
        .map_err(|e| DecodeError::UnsupportedFormat(e.to_string()))?;
    Ok(probed.format)
}

fn seconds_at(time_base: TimeBase, ts: u64) -> f64 {
    let time = time_base.calc_time(ts);
    time.seconds as f64 + time.frac
}

#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Unsupported audio format: {0}")]
    UnsupportedFormat(String),

    #[error("No decodable audio track found")]
    NoAudioTrack,

    #[error("Corrupt audio stream: {0}")]
    Corrupt(String),

    #[error("Start time {start_time:.2}s is beyond audio duration {duration:.2}s")]
    SpanOutOfRange { start_time: f64, duration: f64 },

    #[error("Audio contains no samples")]
    Empty,

    #[error("Resampling failed: {0}")]
    Resample(String),

    #[error("WAV error: {0}")]
    Wav(#[from] hound::Error),
}
