//! External tools that pull audio out of a remote video.
//!
//! Every extractor writes the requested span as mono 16-bit PCM WAV at the
//! canonical sample rate to the destination path.

use async_trait::async_trait;
use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;

use crate::models::job::TimeSpan;

#[async_trait]
pub trait RemoteExtractor: Send + Sync {
    fn name(&self) -> &str;

    async fn extract(
        &self,
        url: &str,
        span: &TimeSpan,
        dest: &Path,
        sample_rate: u32,
    ) -> Result<(), ExtractorError>;
}

/// Primary path: yt-dlp downloads only the requested section and transcodes it.
#[derive(Debug, Clone)]
pub struct YtDlpExtractor {
    program: String,
    ffmpeg: String,
}

impl YtDlpExtractor {
    pub fn new(program: impl Into<String>, ffmpeg: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            ffmpeg: ffmpeg.into(),
        }
    }

    fn args(&self, url: &str, span: &TimeSpan, dest: &Path, sample_rate: u32) -> Vec<String> {
        // yt-dlp picks the extension itself; "<stem>.%(ext)s" with wav output lands on dest.
        let template = dest.with_extension("%(ext)s");
        let mut args = vec![
            "--no-playlist".to_string(),
            "--quiet".to_string(),
            "--force-overwrites".to_string(),
            "-f".to_string(),
            "bestaudio/best".to_string(),
            "-x".to_string(),
            "--audio-format".to_string(),
            "wav".to_string(),
            "--ffmpeg-location".to_string(),
            self.ffmpeg.clone(),
            "--postprocessor-args".to_string(),
            format!("ExtractAudio:-ac 1 -ar {sample_rate} -sample_fmt s16"),
            "-o".to_string(),
            template.to_string_lossy().into_owned(),
        ];
        if span.is_trimmed() {
            let end = span
                .end_time
                .map(|e| format!("{e:.3}"))
                .unwrap_or_else(|| "inf".to_string());
            args.push("--download-sections".to_string());
            args.push(format!("*{:.3}-{end}", span.start_time));
        }
        args.push(url.to_string());
        args
    }
}

#[async_trait]
impl RemoteExtractor for YtDlpExtractor {
    fn name(&self) -> &str {
        "yt-dlp"
    }

    async fn extract(
        &self,
        url: &str,
        span: &TimeSpan,
        dest: &Path,
        sample_rate: u32,
    ) -> Result<(), ExtractorError> {
        run(&self.program, &self.args(url, span, dest, sample_rate)).await?;
        Ok(())
    }
}

/// Fallback path: resolve a direct stream URL, then let ffmpeg seek and transcode it.
#[derive(Debug, Clone)]
pub struct FfmpegStreamExtractor {
    resolver: String,
    ffmpeg: String,
}

impl FfmpegStreamExtractor {
    pub fn new(resolver: impl Into<String>, ffmpeg: impl Into<String>) -> Self {
        Self {
            resolver: resolver.into(),
            ffmpeg: ffmpeg.into(),
        }
    }

    fn ffmpeg_args(stream_url: &str, span: &TimeSpan, dest: &Path, sample_rate: u32) -> Vec<String> {
        let mut args = vec![
            "-y".to_string(),
            "-nostdin".to_string(),
            "-loglevel".to_string(),
            "error".to_string(),
        ];
        // Input-side seek avoids decoding what precedes the span.
        if span.start_time > 0.0 {
            args.push("-ss".to_string());
            args.push(format!("{:.3}", span.start_time));
        }
        if let Some(duration) = span.duration() {
            args.push("-t".to_string());
            args.push(format!("{duration:.3}"));
        }
        args.extend([
            "-i".to_string(),
            stream_url.to_string(),
            "-vn".to_string(),
            "-ac".to_string(),
            "1".to_string(),
            "-ar".to_string(),
            sample_rate.to_string(),
            "-c:a".to_string(),
            "pcm_s16le".to_string(),
            dest.to_string_lossy().into_owned(),
        ]);
        args
    }
}

#[async_trait]
impl RemoteExtractor for FfmpegStreamExtractor {
    fn name(&self) -> &str {
        "ffmpeg-stream"
    }

    async fn extract(
        &self,
        url: &str,
        span: &TimeSpan,
        dest: &Path,
        sample_rate: u32,
    ) -> Result<(), ExtractorError> {
        let resolver_args = [
            "--no-playlist".to_string(),
            "-g".to_string(),
            "-f".to_string(),
            "bestaudio/best".to_string(),
            url.to_string(),
        ];
        let stdout = run(&self.resolver, &resolver_args).await?;
        let stream_url = stdout
            .lines()
            .map(str::trim)
            .find(|l| !l.is_empty())
            .ok_or_else(|| ExtractorError::Parse("resolver returned no stream URL".to_string()))?
            .to_string();

        run(&self.ffmpeg, &Self::ffmpeg_args(&stream_url, span, dest, sample_rate)).await?;
        Ok(())
    }
}

/// Run a tool to completion, returning stdout. The child is killed if the future is dropped.
async fn run(program: &str, args: &[String]) -> Result<String, ExtractorError> {
    tracing::debug!(program, ?args, "Running extraction tool");

    let output = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|e| ExtractorError::ToolUnavailable {
            tool: program.to_string(),
            source: e,
        })?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        let tail: String = stderr.lines().rev().take(3).collect::<Vec<_>>().join(" | ");
        return Err(ExtractorError::ToolFailed {
            tool: program.to_string(),
            status: output.status.code(),
            stderr: tail,
        });
    }

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

#[derive(Debug, thiserror::Error)]
pub enum ExtractorError {
    #[error("{tool} could not be started: {source}")]
    ToolUnavailable {
        tool: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{tool} exited with status {status:?}: {stderr}")]
    ToolFailed {
        tool: String,
        status: Option<i32>,
        stderr: String,
    },

    #[error("Unexpected tool output: {0}")]
    Parse(String),

    #[error("Extracted audio is unusable: {0}")]
    BadOutput(String),
}
