use chrono::{DateTime, Utc};
use garde::Validate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::job::{AnalysisJob, JobStatus, SourceSpec, TimeSpan};

/// Request to analyze a span of an audio source.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct SubmitRequest {
    #[garde(skip)]
    pub source: SourceSpec,

    #[serde(default)]
    #[garde(range(min = 0.0))]
    pub start_time: f64,

    #[serde(default)]
    #[garde(range(min = 0.0))]
    pub end_time: Option<f64>,

    /// Client-chosen id; generated when absent.
    #[serde(default)]
    #[garde(skip)]
    pub job_id: Option<Uuid>,

    #[serde(default)]
    #[garde(length(min = 1, max = 64))]
    pub strategy: Option<String>,

    /// Progression window width; absent means one chord for the whole span.
    #[serde(default)]
    #[garde(range(min = 0.1, max = 120.0))]
    pub window_seconds: Option<f64>,
}

impl SubmitRequest {
    pub fn new(source: SourceSpec, span: TimeSpan) -> Self {
        Self {
            source,
            start_time: span.start_time,
            end_time: span.end_time,
            job_id: None,
            strategy: None,
            window_seconds: None,
        }
    }

    pub fn with_job_id(mut self, id: Uuid) -> Self {
        self.job_id = Some(id);
        self
    }

    pub fn with_strategy(mut self, name: impl Into<String>) -> Self {
        self.strategy = Some(name.into());
        self
    }

    pub fn with_window(mut self, seconds: f64) -> Self {
        self.window_seconds = Some(seconds);
        self
    }

    pub fn span(&self) -> TimeSpan {
        TimeSpan::new(self.start_time, self.end_time)
    }
}

/// Response after submitting an analysis.
#[derive(Debug, Serialize, Deserialize)]
pub struct SubmitResponse {
    pub job_id: Uuid,
    pub status: JobStatus,
    pub progress: f64,
    pub created_at: DateTime<Utc>,
    pub message: String,
}

impl From<&AnalysisJob> for SubmitResponse {
    fn from(job: &AnalysisJob) -> Self {
        Self {
            job_id: job.id,
            status: job.status,
            progress: job.progress,
            created_at: job.created_at,
            message: "Analysis submitted".to_string(),
        }
    }
}

/// Pagination for job listing.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct ListQuery {
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct StrategyInfo {
    pub name: String,
    pub description: String,
    pub is_default: bool,
}

#[derive(Debug, Serialize)]
pub struct TemplateInfo {
    pub symbol: String,
    pub root: String,
    pub quality: String,
    pub extensions: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn remote() -> SourceSpec {
        SourceSpec::RemoteVideo {
            url: "https://youtu.be/dQw4w9WgXcQ".to_string(),
        }
    }

    #[test]
    fn test_request_parses_with_defaults() {
        let req: SubmitRequest = serde_json::from_value(serde_json::json!({
            "source": {"type": "remote_video", "url": "https://youtu.be/dQw4w9WgXcQ"}
        }))
        .unwrap();
        assert_eq!(req.start_time, 0.0);
        assert!(req.end_time.is_none());
        assert!(req.validate().is_ok());
    }

    #[test]
    fn test_negative_start_rejected() {
        let mut req = SubmitRequest::new(remote(), TimeSpan::full());
        req.start_time = -2.0;
        assert!(req.validate().is_err());
    }

    #[test]
    fn test_window_range() {
        let req = SubmitRequest::new(remote(), TimeSpan::full()).with_window(0.01);
        assert!(req.validate().is_err());
        let req = SubmitRequest::new(remote(), TimeSpan::full()).with_window(2.0);
        assert!(req.validate().is_ok());
    }

    #[test]
    fn test_empty_strategy_name_rejected() {
        let req = SubmitRequest::new(remote(), TimeSpan::full()).with_strategy("");
        assert!(req.validate().is_err());
    }
}
