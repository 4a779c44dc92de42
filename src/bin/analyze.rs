//! One-shot chord analysis of a local audio file or a remote video.
//!
//! ```bash
//! analyze --audio-path song.mp3 --start-time 30 --end-time 45 --window-seconds 2
//! analyze --url https://youtu.be/dQw4w9WgXcQ --output-format json
//! ```
//!
//! Runs the same orchestrator as the server, in-process, and waits for the job.

use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

use chord_analyzer::app_state::build_orchestrator;
use chord_analyzer::config::AppConfig;
use chord_analyzer::models::analysis::AnalysisResult;
use chord_analyzer::models::job::{AnalysisJob, JobStatus, SourceSpec, TimeSpan};
use chord_analyzer::models::request::SubmitRequest;

const POLL_INTERVAL: Duration = Duration::from_millis(200);

#[derive(Debug, Clone, Copy, ValueEnum)]
enum OutputFormat {
    Json,
    Text,
}

/// Recognize chords in a span of audio
#[derive(Parser, Debug)]
#[command(name = "analyze", version)]
struct Args {
    /// Local audio file (wav, mp3, m4a, flac, ogg)
    #[arg(long, conflicts_with = "url", required_unless_present = "url")]
    audio_path: Option<PathBuf>,

    /// Remote video URL
    #[arg(long)]
    url: Option<String>,

    /// Span start in seconds
    #[arg(long, default_value_t = 0.0)]
    start_time: f64,

    /// Span end in seconds (defaults to the end of the audio)
    #[arg(long)]
    end_time: Option<f64>,

    /// Emit one chord per window of this many seconds
    #[arg(long, env = "WINDOW_SECONDS")]
    window_seconds: Option<f64>,

    /// Matcher strategy
    #[arg(long)]
    strategy: Option<String>,

    #[arg(long, value_enum, default_value = "text")]
    output_format: OutputFormat,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let config = match AppConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("error: invalid configuration: {e}");
            return ExitCode::FAILURE;
        }
    };

    let orchestrator = match build_orchestrator(&config) {
        Ok(orchestrator) => orchestrator,
        Err(e) => {
            eprintln!("error: {e}");
            return ExitCode::FAILURE;
        }
    };

    let source = match (args.audio_path, args.url) {
        (Some(path), _) => SourceSpec::UploadedFile { path },
        (None, Some(url)) => SourceSpec::RemoteVideo { url },
        (None, None) => {
            eprintln!("error: one of --audio-path or --url is required");
            return ExitCode::FAILURE;
        }
    };

    let mut request = SubmitRequest::new(source, TimeSpan::new(args.start_time, args.end_time));
    request.strategy = args.strategy;
    request.window_seconds = args.window_seconds;

    let job = match orchestrator.submit(request).await {
        Ok(job) => job,
        Err(e) => {
            eprintln!("error: {e}");
            return ExitCode::FAILURE;
        }
    };

    let job = loop {
        match orchestrator.get_status(job.id).await {
            Ok(current) if current.is_terminal() => break current,
            Ok(_) => tokio::time::sleep(POLL_INTERVAL).await,
            Err(e) => {
                eprintln!("error: {e}");
                return ExitCode::FAILURE;
            }
        }
    };

    match (&job.status, &job.result) {
        (JobStatus::Completed, Some(result)) => {
            match args.output_format {
                OutputFormat::Json => match serde_json::to_string_pretty(result) {
                    Ok(json) => println!("{json}"),
                    Err(e) => {
                        eprintln!("error: {e}");
                        return ExitCode::FAILURE;
                    }
                },
                OutputFormat::Text => print_text(result),
            }
            ExitCode::SUCCESS
        }
        _ => {
            report_failure(&job);
            ExitCode::FAILURE
        }
    }
}

fn print_text(result: &AnalysisResult) {
    for timed in &result.chord_progression {
        println!(
            "{:>8.2} - {:>8.2}  {:<6} {:.3}",
            timed.start_time, timed.end_time, timed.chord.symbol, timed.chord.confidence
        );
    }
    if let Some(key) = &result.key_estimate {
        println!("key: {key}");
    }
    println!(
        "average confidence: {:.3} ({}, {})",
        result.average_confidence, result.strategy, result.origin
    );
}

fn report_failure(job: &AnalysisJob) {
    let kind = job
        .error_kind
        .map(|k| k.to_string())
        .unwrap_or_else(|| job.status.to_string());
    eprintln!(
        "analysis {}: {}",
        kind,
        job.error_message.as_deref().unwrap_or("no result")
    );
}
