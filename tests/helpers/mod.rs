//! Scripted collaborators for driving the orchestrator in tests: audio sources,
//! extractors and remote recognizers with controllable behaviour.

#![allow(dead_code)]

use async_trait::async_trait;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, Instant};
use uuid::Uuid;

use chord_analyzer::db::InMemoryJobStore;
use chord_analyzer::models::analysis::{self, AnalysisResult, ChordMatch, ResultOrigin, TimedChord};
use chord_analyzer::models::audio::AudioSegment;
use chord_analyzer::models::job::{AnalysisJob, SourceSpec, TimeSpan};
use chord_analyzer::services::acquisition::{AcquisitionError, AudioSource};
use chord_analyzer::services::chroma::ChromaExtractor;
use chord_analyzer::services::decoder;
use chord_analyzer::services::delegate::{DelegateError, RemoteRecognitionDelegate};
use chord_analyzer::services::extractor::{ExtractorError, RemoteExtractor};
use chord_analyzer::services::matcher::{StrategyRegistry, TEMPLATE_CORRELATION};
use chord_analyzer::services::orchestrator::{AnalysisOrchestrator, OrchestratorSettings};
use chord_analyzer::services::recognition::LocalRecognizer;
use chord_analyzer::services::templates;

use crate::fixtures::SAMPLE_RATE;

pub const VIDEO_URL: &str = "https://www.youtube.com/watch?v=dQw4w9WgXcQ";

pub fn remote_video() -> SourceSpec {
    SourceSpec::RemoteVideo {
        url: VIDEO_URL.to_string(),
    }
}

// ── Audio sources ──────────────────────────────────────────────

/// Serves fixed samples trimmed to the requested span, like a decoded upload.
pub struct SynthSource {
    samples: Vec<f32>,
    delay: Duration,
    pub calls: AtomicUsize,
}

impl SynthSource {
    pub fn new(samples: Vec<f32>) -> Self {
        Self {
            samples,
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

#[async_trait]
impl AudioSource for SynthSource {
    async fn acquire(&self, _source: &SourceSpec, span: &TimeSpan) -> Result<AudioSegment, AcquisitionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            sleep(self.delay).await;
        }

        let rate = SAMPLE_RATE as f64;
        let duration = self.samples.len() as f64 / rate;
        let from = (span.start_time * rate) as usize;
        if from >= self.samples.len() {
            return Err(AcquisitionError::SpanOutOfRange {
                start_time: span.start_time,
                duration,
            });
        }
        let to = span
            .end_time
            .map(|end| (end * rate) as usize)
            .unwrap_or(self.samples.len())
            .min(self.samples.len());

        let artifact = tempfile::Builder::new()
            .suffix(".wav")
            .tempfile()?
            .into_temp_path();
        decoder::write_canonical_wav(&artifact, &self.samples[from..to], SAMPLE_RATE)?;
        Ok(AudioSegment::owned(artifact, (to - from) as f64 / rate, SAMPLE_RATE, 1))
    }
}

/// Always fails with the error produced by `make`.
pub struct FailingSource {
    make: fn() -> AcquisitionError,
}

impl FailingSource {
    pub fn new(make: fn() -> AcquisitionError) -> Self {
        Self { make }
    }
}

#[async_trait]
impl AudioSource for FailingSource {
    async fn acquire(&self, _: &SourceSpec, _: &TimeSpan) -> Result<AudioSegment, AcquisitionError> {
        Err((self.make)())
    }
}

/// Never finishes.
pub struct HangingSource;

#[async_trait]
impl AudioSource for HangingSource {
    async fn acquire(&self, _: &SourceSpec, _: &TimeSpan) -> Result<AudioSegment, AcquisitionError> {
        std::future::pending().await
    }
}

// ── Remote extractors ──────────────────────────────────────────

/// Writes a fixed clip to the destination, ignoring the span.
pub struct ToneExtractor {
    samples: Vec<f32>,
    pub calls: AtomicUsize,
}

impl ToneExtractor {
    pub fn new(samples: Vec<f32>) -> Self {
        Self {
            samples,
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl RemoteExtractor for ToneExtractor {
    fn name(&self) -> &str {
        "tone"
    }

    async fn extract(&self, _: &str, _: &TimeSpan, dest: &Path, sample_rate: u32) -> Result<(), ExtractorError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        decoder::write_canonical_wav(dest, &self.samples, sample_rate)
            .map_err(|e| ExtractorError::BadOutput(e.to_string()))
    }
}

/// Exits like a crashed external tool.
pub struct BrokenExtractor {
    tool: &'static str,
    pub calls: AtomicUsize,
}

impl BrokenExtractor {
    pub fn new(tool: &'static str) -> Self {
        Self {
            tool,
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl RemoteExtractor for BrokenExtractor {
    fn name(&self) -> &str {
        self.tool
    }

    async fn extract(&self, _: &str, _: &TimeSpan, _: &Path, _: u32) -> Result<(), ExtractorError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(ExtractorError::ToolFailed {
            tool: self.tool.to_string(),
            status: Some(1),
            stderr: "ERROR: unable to download video data".to_string(),
        })
    }
}

// ── Remote recognizers ─────────────────────────────────────────

pub enum Reply {
    Result(AnalysisResult),
    Fail,
    Hang,
}

pub struct StubDelegate {
    healthy: bool,
    reply: Reply,
    pub health_calls: AtomicUsize,
    pub analyze_calls: AtomicUsize,
}

impl StubDelegate {
    pub fn new(healthy: bool, reply: Reply) -> Self {
        Self {
            healthy,
            reply,
            health_calls: AtomicUsize::new(0),
            analyze_calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl RemoteRecognitionDelegate for StubDelegate {
    fn name(&self) -> &str {
        "stub"
    }

    async fn health_check(&self) -> bool {
        self.health_calls.fetch_add(1, Ordering::SeqCst);
        self.healthy
    }

    async fn analyze(&self, segment: &AudioSegment, _: &TimeSpan) -> Result<AnalysisResult, DelegateError> {
        self.analyze_calls.fetch_add(1, Ordering::SeqCst);
        assert!(segment.location().exists(), "segment must still exist while the delegate reads it");
        match &self.reply {
            Reply::Result(result) => Ok(result.clone()),
            Reply::Fail => Err(DelegateError::Status {
                status: 500,
                body: "model crashed".to_string(),
            }),
            Reply::Hang => std::future::pending().await,
        }
    }
}

/// What a remote recognizer might send back: a single `G` at 0.99.
pub fn remote_result() -> AnalysisResult {
    let template = templates::library().find("G").expect("G template");
    let progression = vec![TimedChord {
        chord: ChordMatch::from_template(template, 0.99),
        start_time: 0.0,
        end_time: 2.0,
    }];
    AnalysisResult {
        average_confidence: analysis::average_confidence(&progression),
        key_estimate: analysis::estimate_key(&progression),
        tempo_estimate: Some(120.0),
        chroma_vector: None,
        strategy: "deep_chroma".to_string(),
        origin: ResultOrigin::Local,
        analysis_seconds: 0.5,
        chord_progression: progression,
    }
}

// ── Orchestrator wiring ────────────────────────────────────────

pub fn recognizer() -> LocalRecognizer {
    LocalRecognizer::new(ChromaExtractor::default(), Arc::new(StrategyRegistry::with_defaults()))
}

pub fn settings() -> OrchestratorSettings {
    OrchestratorSettings {
        acquire_timeout: Duration::from_secs(10),
        delegate_timeout: Duration::from_secs(10),
        default_strategy: TEMPLATE_CORRELATION.to_string(),
        window_seconds: None,
        max_concurrent_jobs: None,
    }
}

pub fn orchestrator(
    source: Arc<dyn AudioSource>,
    delegate: Option<Arc<dyn RemoteRecognitionDelegate>>,
    settings: OrchestratorSettings,
) -> AnalysisOrchestrator {
    AnalysisOrchestrator::new(
        Arc::new(InMemoryJobStore::new()),
        source,
        delegate,
        recognizer(),
        settings,
    )
}

/// Poll until the job is terminal, returning every snapshot observed.
pub async fn observe_until_terminal(orchestrator: &AnalysisOrchestrator, id: Uuid) -> Vec<AnalysisJob> {
    let deadline = Instant::now() + Duration::from_secs(20);
    let mut seen = Vec::new();
    loop {
        let job = orchestrator.get_status(id).await.expect("job exists");
        let done = job.is_terminal();
        seen.push(job);
        if done {
            return seen;
        }
        assert!(Instant::now() < deadline, "job {id} did not finish in time");
        sleep(Duration::from_millis(2)).await;
    }
}

pub async fn wait_for_terminal(orchestrator: &AnalysisOrchestrator, id: Uuid) -> AnalysisJob {
    observe_until_terminal(orchestrator, id)
        .await
        .pop()
        .expect("at least one snapshot")
}
