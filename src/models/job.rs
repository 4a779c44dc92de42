use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use strum::{Display, EnumString};
use uuid::Uuid;

use crate::models::analysis::AnalysisResult;

/// Lifecycle state of an analysis job. Every state except `Processing` is terminal.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum JobStatus {
    Processing,
    Completed,
    Error,
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, JobStatus::Processing)
    }
}

/// Why a job ended in `error`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ErrorKind {
    InvalidRequest,
    InvalidSource,
    UnsupportedFormat,
    ExtractionFailed,
    RemoteDelegateError,
    AnalysisFailed,
    Timeout,
}

/// Where the audio comes from.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SourceSpec {
    UploadedFile { path: PathBuf },
    RemoteVideo { url: String },
}

impl SourceSpec {
    /// Short description for logs.
    pub fn describe(&self) -> String {
        match self {
            SourceSpec::UploadedFile { path } => format!("upload:{}", path.display()),
            SourceSpec::RemoteVideo { url } => format!("remote:{url}"),
        }
    }
}

/// Time range within the source, in seconds.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct TimeSpan {
    #[serde(default)]
    pub start_time: f64,
    #[serde(default)]
    pub end_time: Option<f64>,
}

impl TimeSpan {
    pub fn new(start_time: f64, end_time: Option<f64>) -> Self {
        Self { start_time, end_time }
    }

    pub fn full() -> Self {
        Self::default()
    }

    /// Checks `start_time >= 0` and `end_time > start_time`.
    pub fn validate(&self) -> Result<(), String> {
        if !self.start_time.is_finite() || self.start_time < 0.0 {
            return Err(format!(
                "start_time must be a non-negative number, got {}",
                self.start_time
            ));
        }
        if let Some(end) = self.end_time {
            if !end.is_finite() {
                return Err(format!("end_time must be finite, got {end}"));
            }
            if end <= self.start_time {
                return Err(format!(
                    "end_time ({end}) must be greater than start_time ({})",
                    self.start_time
                ));
            }
        }
        Ok(())
    }

    pub fn is_trimmed(&self) -> bool {
        self.start_time > 0.0 || self.end_time.is_some()
    }

    /// Requested length, if bounded.
    pub fn duration(&self) -> Option<f64> {
        self.end_time.map(|end| end - self.start_time)
    }
}

/// One tracked analysis request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AnalysisJob {
    pub id: Uuid,
    pub source: SourceSpec,
    pub span: TimeSpan,
    pub status: JobStatus,
    pub progress: f64,
    pub strategy: String,
    pub window_seconds: Option<f64>,
    pub result: Option<AnalysisResult>,
    pub error_message: Option<String>,
    pub error_kind: Option<ErrorKind>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl AnalysisJob {
    pub fn new(
        id: Uuid,
        source: SourceSpec,
        span: TimeSpan,
        strategy: String,
        window_seconds: Option<f64>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id,
            source,
            span,
            status: JobStatus::Processing,
            progress: 0.0,
            strategy,
            window_seconds,
            result: None,
            error_message: None,
            error_kind: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Raises progress; never lowers it.
    pub fn advance(&mut self, progress: f64) {
        self.progress = self.progress.max(progress.clamp(0.0, 1.0));
        self.touch();
    }

    pub fn complete(&mut self, result: AnalysisResult) {
        self.status = JobStatus::Completed;
        self.progress = 1.0;
        self.result = Some(result);
        self.touch();
    }

    /// Progress is left where the failing stage stopped.
    pub fn fail(&mut self, kind: ErrorKind, message: String) {
        self.status = JobStatus::Error;
        self.error_kind = Some(kind);
        self.error_message = Some(message);
        self.touch();
    }

    pub fn cancel(&mut self) {
        self.status = JobStatus::Cancelled;
        self.touch();
    }

    fn touch(&mut self) {
        let now = Utc::now();
        // Keep updated_at strictly moving even when the clock has coarse resolution.
        self.updated_at = if now > self.updated_at {
            now
        } else {
            self.updated_at + chrono::Duration::microseconds(1)
        };
    }
}
