use async_trait::async_trait;
use base64::Engine;
use reqwest::Client;
use serde::Serialize;
use std::time::Duration;

use crate::models::analysis::AnalysisResult;
use crate::models::audio::AudioSegment;
use crate::models::job::TimeSpan;

/// External recognition service the orchestrator prefers over local analysis.
#[async_trait]
pub trait RemoteRecognitionDelegate: Send + Sync {
    fn name(&self) -> &str;

    /// `false` when unreachable or reporting itself unhealthy.
    async fn health_check(&self) -> bool;

    async fn analyze(&self, segment: &AudioSegment, span: &TimeSpan) -> Result<AnalysisResult, DelegateError>;
}

/// Client for an HTTP recognizer exposing `/health` and `/analyze`.
pub struct HttpRecognitionDelegate {
    http: Client,
    base_url: String,
    health_timeout: Duration,
}

#[derive(Serialize)]
struct AnalyzeRequest<'a> {
    audio_base64: String,
    sample_rate: u32,
    start_time: f64,
    end_time: Option<f64>,
    format: &'a str,
}

impl HttpRecognitionDelegate {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, DelegateError> {
        let http = Client::builder().timeout(timeout).build().map_err(DelegateError::Http)?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            health_timeout: (timeout / 4).min(Duration::from_secs(5)),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[async_trait]
impl RemoteRecognitionDelegate for HttpRecognitionDelegate {
    fn name(&self) -> &str {
        &self.base_url
    }

    async fn health_check(&self) -> bool {
        let url = format!("{}/health", self.base_url);
        match self.http.get(&url).timeout(self.health_timeout).send().await {
            Ok(resp) if resp.status().is_success() => true,
            Ok(resp) => {
                tracing::debug!(url, status = %resp.status(), "Remote recognizer reports unhealthy");
                false
            }
            Err(e) => {
                tracing::debug!(url, error = %e, "Remote recognizer unreachable");
                false
            }
        }
    }

    /// Send the segment's WAV bytes and adopt the returned result as-is.
    async fn analyze(&self, segment: &AudioSegment, span: &TimeSpan) -> Result<AnalysisResult, DelegateError> {
        let audio = tokio::fs::read(segment.location()).await.map_err(DelegateError::Io)?;

        let body = AnalyzeRequest {
            audio_base64: base64::engine::general_purpose::STANDARD.encode(&audio),
            sample_rate: segment.sample_rate(),
            start_time: span.start_time,
            end_time: span.end_time,
            format: "wav",
        };

        let response = self
            .http
            .post(format!("{}/analyze", self.base_url))
            .json(&body)
            .send()
            .await
            .map_err(DelegateError::Http)?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(DelegateError::Status {
                status: status.as_u16(),
                body: text.chars().take(200).collect(),
            });
        }

        let bytes = response.bytes().await.map_err(DelegateError::Http)?;
        serde_json::from_slice(&bytes).map_err(DelegateError::Parse)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DelegateError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Remote recognizer returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Failed to parse remote result: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Failed to read segment: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url_is_normalized() {
        let d = HttpRecognitionDelegate::new("http://recognizer:9000/", Duration::from_secs(8)).unwrap();
        assert_eq!(d.base_url(), "http://recognizer:9000");
        assert_eq!(d.health_timeout, Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_unreachable_delegate_is_unhealthy() {
        // Port 9 (discard) on localhost is closed in test environments.
        let d = HttpRecognitionDelegate::new("http://127.0.0.1:9", Duration::from_secs(2)).unwrap();
        assert!(!d.health_check().await);
    }
}
