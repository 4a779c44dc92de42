use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Server bind address (e.g., "0.0.0.0:8001").
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// Directory for uploaded audio files
    #[serde(default = "default_upload_dir")]
    pub upload_dir: PathBuf,

    /// Directory for decoded segment artifacts
    #[serde(default = "default_work_dir")]
    pub work_dir: PathBuf,

    /// Canonical PCM sample rate for decoded segments
    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,

    /// Request body ceiling in bytes
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: usize,

    /// Timeout for the acquisition stage
    #[serde(default = "default_acquire_timeout_secs")]
    pub acquire_timeout_secs: u64,

    /// Timeout for remote recognizer calls
    #[serde(default = "default_delegate_timeout_secs")]
    pub delegate_timeout_secs: u64,

    /// Base URL of the remote recognition service. Unset means local analysis only.
    pub remote_delegate_url: Option<String>,

    /// Progression window width in seconds. Unset means one chord per span.
    pub window_seconds: Option<f64>,

    /// Matcher strategy used when a request names none
    #[serde(default = "default_strategy")]
    pub default_strategy: String,

    /// Separate sustained tones from transients before chroma folding
    #[serde(default = "default_harmonic_separation")]
    pub harmonic_separation: bool,

    /// Upper bound on concurrently running pipelines. Unset means unbounded.
    pub max_concurrent_jobs: Option<usize>,

    /// Primary remote extraction tool
    #[serde(default = "default_ytdlp_bin")]
    pub ytdlp_bin: String,

    /// Transcoder used by the fallback extraction path
    #[serde(default = "default_ffmpeg_bin")]
    pub ffmpeg_bin: String,
}

fn default_bind_addr() -> String {
    "0.0.0.0:8001".to_string()
}

fn default_upload_dir() -> PathBuf {
    std::env::temp_dir().join("chord-analyzer").join("uploads")
}

fn default_work_dir() -> PathBuf {
    std::env::temp_dir().join("chord-analyzer").join("work")
}

fn default_sample_rate() -> u32 {
    22_050
}

fn default_max_upload_bytes() -> usize {
    50 * 1024 * 1024
}

fn default_acquire_timeout_secs() -> u64 {
    120
}

fn default_delegate_timeout_secs() -> u64 {
    60
}

fn default_strategy() -> String {
    crate::services::matcher::TEMPLATE_CORRELATION.to_string()
}

fn default_harmonic_separation() -> bool {
    true
}

fn default_ytdlp_bin() -> String {
    "yt-dlp".to_string()
}

fn default_ffmpeg_bin() -> String {
    "ffmpeg".to_string()
}

impl AppConfig {
    pub fn from_env() -> Result<Self, envy::Error> {
        dotenvy::dotenv().ok();
        envy::from_env()
    }

    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_secs(self.acquire_timeout_secs)
    }

    pub fn delegate_timeout(&self) -> Duration {
        Duration::from_secs(self.delegate_timeout_secs)
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            upload_dir: default_upload_dir(),
            work_dir: default_work_dir(),
            sample_rate: default_sample_rate(),
            max_upload_bytes: default_max_upload_bytes(),
            acquire_timeout_secs: default_acquire_timeout_secs(),
            delegate_timeout_secs: default_delegate_timeout_secs(),
            remote_delegate_url: None,
            window_seconds: None,
            default_strategy: default_strategy(),
            harmonic_separation: default_harmonic_separation(),
            max_concurrent_jobs: None,
            ytdlp_bin: default_ytdlp_bin(),
            ffmpeg_bin: default_ffmpeg_bin(),
        }
    }
}
