//! Audio source gateway: turns a job's source into a decoded, trimmed segment.

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::{Builder, TempPath};

use crate::models::audio::AudioSegment;
use crate::models::job::{ErrorKind, SourceSpec, TimeSpan};
use crate::services::decoder::{self, DecodeError};
use crate::services::extractor::{ExtractorError, RemoteExtractor};

/// Container extensions accepted for uploads.
pub const SUPPORTED_EXTENSIONS: &[&str] = &["wav", "mp3", "m4a", "flac", "ogg"];

static VIDEO_URL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^(https?://)?((www|m|music)\.)?(youtube\.com/(watch\?([^#]*&)?v=|shorts/|embed/|live/)|youtu\.be/)[A-Za-z0-9_-]{11}([?&#].*)?$",
    )
    .expect("video URL pattern is valid")
});

#[async_trait]
pub trait AudioSource: Send + Sync {
    /// Resolve `source` into a local segment covering `span`.
    async fn acquire(&self, source: &SourceSpec, span: &TimeSpan) -> Result<AudioSegment, AcquisitionError>;
}

/// Cheap checks that can run at submission time, before any I/O-heavy work.
pub async fn validate_source(source: &SourceSpec) -> Result<(), AcquisitionError> {
    match source {
        SourceSpec::RemoteVideo { url } => {
            if VIDEO_URL.is_match(url.trim()) {
                Ok(())
            } else {
                Err(AcquisitionError::InvalidSource(format!(
                    "not a recognised video URL: {url}"
                )))
            }
        }
        SourceSpec::UploadedFile { path } => {
            let extension = path
                .extension()
                .and_then(|e| e.to_str())
                .map(str::to_ascii_lowercase)
                .unwrap_or_default();
            if !SUPPORTED_EXTENSIONS.contains(&extension.as_str()) {
                return Err(AcquisitionError::InvalidSource(format!(
                    "file must be an audio file ({})",
                    SUPPORTED_EXTENSIONS.join(", ")
                )));
            }
            let metadata = tokio::fs::metadata(path).await.map_err(|e| {
                AcquisitionError::InvalidSource(format!("cannot read {}: {e}", path.display()))
            })?;
            if !metadata.is_file() || metadata.len() == 0 {
                return Err(AcquisitionError::InvalidSource(format!(
                    "{} is empty or not a regular file",
                    path.display()
                )));
            }
            Ok(())
        }
    }
}

/// Default gateway: symphonia for uploads, external extractors for remote videos.
pub struct AudioSourceGateway {
    work_dir: PathBuf,
    sample_rate: u32,
    primary: Arc<dyn RemoteExtractor>,
    fallback: Arc<dyn RemoteExtractor>,
}

impl AudioSourceGateway {
    pub fn new(
        work_dir: impl Into<PathBuf>,
        sample_rate: u32,
        primary: Arc<dyn RemoteExtractor>,
        fallback: Arc<dyn RemoteExtractor>,
    ) -> Self {
        Self {
            work_dir: work_dir.into(),
            sample_rate,
            primary,
            fallback,
        }
    }

    fn new_artifact(&self) -> Result<TempPath, AcquisitionError> {
        std::fs::create_dir_all(&self.work_dir)?;
        let file = Builder::new()
            .prefix("segment-")
            .suffix(".wav")
            .tempfile_in(&self.work_dir)?;
        Ok(file.into_temp_path())
    }

    async fn acquire_upload(&self, path: &Path, span: &TimeSpan) -> Result<AudioSegment, AcquisitionError> {
        let artifact = self.new_artifact()?;
        let source = path.to_path_buf();
        let span = *span;
        let target_rate = self.sample_rate;

        // Decoding and resampling are CPU-bound.
        tokio::task::spawn_blocking(move || -> Result<AudioSegment, AcquisitionError> {
            decoder::probe(&source)?;
            let decoded = decoder::decode_span(&source, &span)?;
            let source_channels = decoded.source_channels;
            let samples = decoder::resample_mono(decoded.samples, decoded.sample_rate, target_rate)?;
            decoder::write_canonical_wav(&artifact, &samples, target_rate)?;

            let duration = samples.len() as f64 / target_rate as f64;
            tracing::debug!(
                path = %source.display(),
                duration_seconds = duration,
                source_channels,
                "Upload decoded to canonical PCM"
            );
            Ok(AudioSegment::owned(artifact, duration, target_rate, 1))
        })
        .await
        .map_err(|e| AcquisitionError::Internal(e.to_string()))?
    }

    async fn acquire_remote(&self, url: &str, span: &TimeSpan) -> Result<AudioSegment, AcquisitionError> {
        match self.run_extractor(self.primary.as_ref(), url, span).await {
            Ok(segment) => Ok(segment),
            Err(primary_err) => {
                tracing::warn!(
                    url,
                    extractor = self.primary.name(),
                    error = %primary_err,
                    "Primary extraction failed, trying fallback"
                );
                metrics::counter!("analysis_extraction_fallbacks_total").increment(1);

                self.run_extractor(self.fallback.as_ref(), url, span)
                    .await
                    .map_err(|e| {
                        tracing::error!(url, extractor = self.fallback.name(), error = %e, "Fallback extraction failed");
                        AcquisitionError::ExtractionFailed(e)
                    })
            }
        }
    }

    async fn run_extractor(
        &self,
        extractor: &dyn RemoteExtractor,
        url: &str,
        span: &TimeSpan,
    ) -> Result<AudioSegment, ExtractorError> {
        let artifact = self
            .new_artifact()
            .map_err(|e| ExtractorError::BadOutput(e.to_string()))?;
        extractor.extract(url, span, &artifact, self.sample_rate).await?;
        inspect_wav(artifact)
    }
}

/// Wraps an extractor's WAV output in a segment, checking it is readable and non-empty.
fn inspect_wav(artifact: TempPath) -> Result<AudioSegment, ExtractorError> {
    let reader = hound::WavReader::open(&artifact).map_err(|e| ExtractorError::BadOutput(e.to_string()))?;
    let spec = reader.spec();
    let frames = reader.duration();
    if frames == 0 || spec.sample_rate == 0 {
        return Err(ExtractorError::BadOutput("no audio frames".to_string()));
    }
    let duration = frames as f64 / spec.sample_rate as f64;
    drop(reader);
    Ok(AudioSegment::owned(artifact, duration, spec.sample_rate, spec.channels))
}

#[async_trait]
impl AudioSource for AudioSourceGateway {
    async fn acquire(&self, source: &SourceSpec, span: &TimeSpan) -> Result<AudioSegment, AcquisitionError> {
        validate_source(source).await?;
        match source {
            SourceSpec::UploadedFile { path } => self.acquire_upload(path, span).await,
            SourceSpec::RemoteVideo { url } => self.acquire_remote(url.trim(), span).await,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AcquisitionError {
    #[error("Invalid source: {0}")]
    InvalidSource(String),

    #[error("Unsupported audio format: {0}")]
    UnsupportedFormat(String),

    #[error("Audio extraction failed: {0}")]
    ExtractionFailed(#[source] ExtractorError),

    #[error("Start time {start_time:.2}s is beyond audio duration {duration:.2}s")]
    SpanOutOfRange { start_time: f64, duration: f64 },

    #[error("Failed to decode audio: {0}")]
    Decode(DecodeError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Acquisition task failed: {0}")]
    Internal(String),
}

impl AcquisitionError {
    /// Job error kind this failure is recorded under.
    pub fn kind(&self) -> ErrorKind {
        match self {
            AcquisitionError::InvalidSource(_) => ErrorKind::InvalidSource,
            AcquisitionError::UnsupportedFormat(_) | AcquisitionError::Decode(_) => ErrorKind::UnsupportedFormat,
            AcquisitionError::ExtractionFailed(_) => ErrorKind::ExtractionFailed,
            AcquisitionError::SpanOutOfRange { .. } => ErrorKind::InvalidRequest,
            AcquisitionError::Io(_) | AcquisitionError::Internal(_) => ErrorKind::AnalysisFailed,
        }
    }
}

impl From<DecodeError> for AcquisitionError {
    fn from(err: DecodeError) -> Self {
        match err {
            DecodeError::UnsupportedFormat(msg) => AcquisitionError::UnsupportedFormat(msg),
            DecodeError::NoAudioTrack | DecodeError::Empty => {
                AcquisitionError::UnsupportedFormat(err.to_string())
            }
            DecodeError::SpanOutOfRange {
                start_time,
                duration,
            } => AcquisitionError::SpanOutOfRange {
                start_time,
                duration,
            },
            DecodeError::Io(e) => AcquisitionError::Io(e),
            other => AcquisitionError::Decode(other),
        }
    }
}
