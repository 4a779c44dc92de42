//! Job lifecycle: submission, the background pipeline, status, results and
//! cooperative cancellation.
//!
//! Every job write goes through [`Inner::apply`], which serializes transitions
//! per job and ignores writes to jobs that are already terminal. A cancelled job
//! therefore can never be overwritten by a pipeline stage that was already in
//! flight.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use garde::Validate;
use tokio::sync::Semaphore;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::AppConfig;
use crate::db::{JobStore, StoreError};
use crate::models::analysis::{AnalysisResult, ResultOrigin};
use crate::models::audio::AudioSegment;
use crate::models::job::{AnalysisJob, ErrorKind, JobStatus};
use crate::models::request::{StrategyInfo, SubmitRequest};
use crate::services::acquisition::{self, AcquisitionError, AudioSource};
use crate::services::delegate::RemoteRecognitionDelegate;
use crate::services::recognition::LocalRecognizer;

const PROGRESS_STARTED: f64 = 0.1;
const PROGRESS_ACQUIRED: f64 = 0.4;
const PROGRESS_RECOGNIZING: f64 = 0.7;

type JobLock = Arc<tokio::sync::Mutex<()>>;

#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    pub acquire_timeout: Duration,
    pub delegate_timeout: Duration,
    pub default_strategy: String,
    pub window_seconds: Option<f64>,
    pub max_concurrent_jobs: Option<usize>,
}

impl OrchestratorSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            acquire_timeout: config.acquire_timeout(),
            delegate_timeout: config.delegate_timeout(),
            default_strategy: config.default_strategy.clone(),
            window_seconds: config.window_seconds,
            max_concurrent_jobs: config.max_concurrent_jobs,
        }
    }
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self::from_config(&AppConfig::default())
    }
}

/// Owns job state and runs one pipeline task per submitted job. Cheap to clone.
#[derive(Clone)]
pub struct AnalysisOrchestrator {
    inner: Arc<Inner>,
}

struct Inner {
    store: Arc<dyn JobStore>,
    source: Arc<dyn AudioSource>,
    delegate: Option<Arc<dyn RemoteRecognitionDelegate>>,
    recognizer: LocalRecognizer,
    settings: OrchestratorSettings,
    permits: Option<Arc<Semaphore>>,
    running: Mutex<HashMap<Uuid, CancellationToken>>,
    /// Write locks for jobs that can still change.
    transitions: Mutex<HashMap<Uuid, JobLock>>,
}

/// Outcome of a guarded state change.
enum Transition {
    Applied(AnalysisJob),
    /// The job was already terminal; it is returned unchanged.
    Ignored(AnalysisJob),
    Missing,
}

/// Why a pipeline stopped short of a result.
enum Halt {
    /// Cancelled, or the job left `processing` some other way.
    Stopped,
    Failed(ErrorKind, String),
}

impl AnalysisOrchestrator {
    pub fn new(
        store: Arc<dyn JobStore>,
        source: Arc<dyn AudioSource>,
        delegate: Option<Arc<dyn RemoteRecognitionDelegate>>,
        recognizer: LocalRecognizer,
        settings: OrchestratorSettings,
    ) -> Self {
        let permits = settings
            .max_concurrent_jobs
            .filter(|n| *n > 0)
            .map(|n| Arc::new(Semaphore::new(n)));

        Self {
            inner: Arc::new(Inner {
                store,
                source,
                delegate,
                recognizer,
                settings,
                permits,
                running: Mutex::new(HashMap::new()),
                transitions: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Validate and record a new job, then start its pipeline in the background.
    ///
    /// Only request, span and source validation errors are returned here. Anything
    /// that goes wrong later ends the job in `error` instead.
    pub async fn submit(&self, request: SubmitRequest) -> Result<AnalysisJob, AnalysisError> {
        request
            .validate()
            .map_err(|e| AnalysisError::InvalidRequest(e.to_string()))?;

        let span = request.span();
        span.validate().map_err(AnalysisError::InvalidRequest)?;

        acquisition::validate_source(&request.source).await.map_err(|e| match e {
            AcquisitionError::InvalidSource(msg) => AnalysisError::InvalidSource(msg),
            other => AnalysisError::InvalidSource(other.to_string()),
        })?;

        let strategy = request
            .strategy
            .clone()
            .unwrap_or_else(|| self.inner.settings.default_strategy.clone());
        let registry = self.inner.recognizer.registry();
        if !registry.contains(&strategy) {
            return Err(AnalysisError::InvalidRequest(format!(
                "unknown strategy '{strategy}' (available: {})",
                registry.names().join(", ")
            )));
        }

        let window_seconds = request.window_seconds.or(self.inner.settings.window_seconds);
        let id = request.job_id.unwrap_or_else(Uuid::new_v4);
        let job = AnalysisJob::new(id, request.source, span, strategy, window_seconds);

        {
            let lock = self.inner.job_lock(id);
            let _guard = lock.lock().await;
            if let Some(existing) = self.inner.store.get(id).await? {
                if existing.is_terminal() {
                    self.inner.forget_lock(id, &lock);
                }
                return Err(AnalysisError::InvalidRequest(format!("job {id} already exists")));
            }
            self.inner.store.put(job.clone()).await?;
        }

        let token = CancellationToken::new();
        self.inner.running().insert(id, token.clone());

        metrics::counter!("analysis_jobs_submitted_total").increment(1);
        tracing::info!(
            job_id = %id,
            source = %job.source.describe(),
            start_time = span.start_time,
            end_time = ?span.end_time,
            strategy = %job.strategy,
            "Analysis submitted"
        );

        let inner = Arc::clone(&self.inner);
        let pipeline_job = job.clone();
        tokio::spawn(async move {
            inner.run(pipeline_job, token).await;
        });

        Ok(job)
    }

    pub async fn get_status(&self, id: Uuid) -> Result<AnalysisJob, AnalysisError> {
        self.inner
            .store
            .get(id)
            .await?
            .ok_or(AnalysisError::NotFound(id))
    }

    /// The result of a completed job. Any other status is `NotReady`.
    pub async fn get_result(&self, id: Uuid) -> Result<AnalysisResult, AnalysisError> {
        let job = self.get_status(id).await?;
        match (job.status, job.result) {
            (JobStatus::Completed, Some(result)) => Ok(result),
            (status, _) => Err(AnalysisError::NotReady { id, status }),
        }
    }

    /// Mark a job cancelled. A job that already finished is returned unchanged.
    pub async fn cancel(&self, id: Uuid) -> Result<AnalysisJob, AnalysisError> {
        match self.inner.apply(id, AnalysisJob::cancel).await? {
            Transition::Applied(job) => {
                if let Some(token) = self.inner.running().get(&id) {
                    token.cancel();
                }
                metrics::counter!("analysis_jobs_cancelled_total").increment(1);
                tracing::info!(job_id = %id, progress = job.progress, "Analysis cancelled");
                Ok(job)
            }
            Transition::Ignored(job) => {
                tracing::debug!(job_id = %id, status = %job.status, "Cancel on finished job ignored");
                Ok(job)
            }
            Transition::Missing => Err(AnalysisError::NotFound(id)),
        }
    }

    pub async fn list(&self, limit: usize, offset: usize) -> Result<Vec<AnalysisJob>, AnalysisError> {
        Ok(self.inner.store.list(limit, offset).await?)
    }

    pub fn strategies(&self) -> Vec<StrategyInfo> {
        let default = &self.inner.settings.default_strategy;
        self.inner
            .recognizer
            .registry()
            .iter()
            .map(|s| StrategyInfo {
                name: s.name().to_string(),
                description: s.description().to_string(),
                is_default: s.name() == default.as_str(),
            })
            .collect()
    }

    pub fn store(&self) -> &Arc<dyn JobStore> {
        &self.inner.store
    }

    pub fn delegate(&self) -> Option<&Arc<dyn RemoteRecognitionDelegate>> {
        self.inner.delegate.as_ref()
    }

    /// Number of pipelines that have not finished yet.
    pub fn running_jobs(&self) -> usize {
        self.inner.running().len()
    }
}

impl Inner {
    fn running(&self) -> MutexGuard<'_, HashMap<Uuid, CancellationToken>> {
        self.running.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn transitions(&self) -> MutexGuard<'_, HashMap<Uuid, JobLock>> {
        self.transitions.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn job_lock(&self, id: Uuid) -> JobLock {
        Arc::clone(self.transitions().entry(id).or_default())
    }

    /// Drops the entry for `id` if it is still `lock`. Only called by the lock's
    /// holder once no further write can happen through it.
    fn forget_lock(&self, id: Uuid, lock: &JobLock) {
        let mut locks = self.transitions();
        if locks.get(&id).is_some_and(|current| Arc::ptr_eq(current, lock)) {
            locks.remove(&id);
        }
    }

    /// The single write path for job state. Writes to one job are serialized;
    /// terminal jobs are never modified.
    async fn apply<F>(&self, id: Uuid, change: F) -> Result<Transition, StoreError>
    where
        F: FnOnce(&mut AnalysisJob),
    {
        let lock = self.job_lock(id);
        let _guard = lock.lock().await;
        let Some(mut job) = self.store.get(id).await? else {
            self.forget_lock(id, &lock);
            return Ok(Transition::Missing);
        };
        if job.is_terminal() {
            self.forget_lock(id, &lock);
            return Ok(Transition::Ignored(job));
        }
        change(&mut job);
        self.store.put(job.clone()).await?;
        if job.is_terminal() {
            self.forget_lock(id, &lock);
        }
        Ok(Transition::Applied(job))
    }

    async fn run(&self, job: AnalysisJob, token: CancellationToken) {
        let id = job.id;
        let started = Instant::now();

        let _permit = match &self.permits {
            Some(permits) => tokio::select! {
                _ = token.cancelled() => {
                    self.running().remove(&id);
                    return;
                }
                permit = Arc::clone(permits).acquire_owned() => permit.ok(),
            },
            None => None,
        };

        let outcome = self.execute(&job, &token).await;
        self.finish(id, outcome).await;

        metrics::histogram!("analysis_processing_seconds").record(started.elapsed().as_secs_f64());
        self.running().remove(&id);
    }

    async fn execute(&self, job: &AnalysisJob, token: &CancellationToken) -> Result<AnalysisResult, Halt> {
        self.checkpoint(job.id, token, PROGRESS_STARTED).await?;

        let acquired = timeout(
            self.settings.acquire_timeout,
            self.source.acquire(&job.source, &job.span),
        )
        .await;
        let segment = match acquired {
            Ok(Ok(segment)) => segment,
            Ok(Err(e)) => return Err(Halt::Failed(e.kind(), e.to_string())),
            Err(_) => {
                return Err(Halt::Failed(
                    ErrorKind::Timeout,
                    format!(
                        "audio acquisition timed out after {}s",
                        self.settings.acquire_timeout.as_secs_f64()
                    ),
                ))
            }
        };

        tracing::debug!(
            job_id = %job.id,
            duration_seconds = segment.duration_seconds(),
            sample_rate = segment.sample_rate(),
            channels = segment.channel_count(),
            "Audio acquired"
        );

        self.recognize(job, segment, token).await
    }

    /// Remote delegate when healthy, otherwise the local pipeline.
    async fn recognize(
        &self,
        job: &AnalysisJob,
        segment: AudioSegment,
        token: &CancellationToken,
    ) -> Result<AnalysisResult, Halt> {
        self.checkpoint(job.id, token, PROGRESS_ACQUIRED).await?;

        let mut remote_failure = None;
        if let Some(delegate) = &self.delegate {
            if self.delegate_healthy(delegate.as_ref()).await {
                let answered = timeout(self.settings.delegate_timeout, delegate.analyze(&segment, &job.span)).await;
                match answered {
                    Ok(Ok(mut result)) => {
                        release(job.id, segment);
                        result.origin = ResultOrigin::Remote;
                        if result.strategy.is_empty() {
                            result.strategy = "remote".to_string();
                        }
                        return Ok(result);
                    }
                    Ok(Err(e)) => {
                        // Not a job failure: the local pipeline still gets its turn.
                        let kind = ErrorKind::RemoteDelegateError;
                        tracing::warn!(
                            job_id = %job.id,
                            delegate = delegate.name(),
                            kind = %kind,
                            error = %e,
                            "Remote recognizer failed, falling back to local analysis"
                        );
                        metrics::counter!("analysis_delegate_fallbacks_total", "reason" => kind.to_string())
                            .increment(1);
                        remote_failure = Some(e.to_string());
                    }
                    Err(_) => {
                        release(job.id, segment);
                        return Err(Halt::Failed(
                            ErrorKind::Timeout,
                            format!(
                                "remote recognizer timed out after {}s",
                                self.settings.delegate_timeout.as_secs_f64()
                            ),
                        ));
                    }
                }
            } else {
                tracing::info!(
                    job_id = %job.id,
                    delegate = delegate.name(),
                    "Remote recognizer unavailable, using local analysis"
                );
                metrics::counter!("analysis_delegate_fallbacks_total", "reason" => "unhealthy").increment(1);
            }
        }

        self.checkpoint(job.id, token, PROGRESS_RECOGNIZING).await?;

        let recognizer = self.recognizer.clone();
        let span = job.span;
        let strategy = job.strategy.clone();
        let window_seconds = job.window_seconds;

        // Feature extraction and matching are CPU-bound.
        let (outcome, segment) = tokio::task::spawn_blocking(move || {
            let outcome = recognizer.analyze(&segment, &span, &strategy, window_seconds);
            (outcome, segment)
        })
        .await
        .map_err(|e| Halt::Failed(ErrorKind::AnalysisFailed, format!("recognition task failed: {e}")))?;
        release(job.id, segment);

        outcome.map_err(|e| {
            let message = match remote_failure {
                Some(remote) => format!("{e} (remote recognizer also failed: {remote})"),
                None => e.to_string(),
            };
            Halt::Failed(ErrorKind::AnalysisFailed, message)
        })
    }

    async fn delegate_healthy(&self, delegate: &dyn RemoteRecognitionDelegate) -> bool {
        timeout(self.settings.delegate_timeout, delegate.health_check())
            .await
            .unwrap_or(false)
    }

    /// Stop if cancelled, otherwise record progress.
    async fn checkpoint(&self, id: Uuid, token: &CancellationToken, progress: f64) -> Result<(), Halt> {
        if token.is_cancelled() {
            return Err(Halt::Stopped);
        }
        match self.apply(id, |job| job.advance(progress)).await {
            Ok(Transition::Applied(_)) => Ok(()),
            Ok(_) => Err(Halt::Stopped),
            Err(e) => Err(Halt::Failed(ErrorKind::AnalysisFailed, e.to_string())),
        }
    }

    /// Converts a pipeline outcome into the job's terminal state.
    async fn finish(&self, id: Uuid, outcome: Result<AnalysisResult, Halt>) {
        match outcome {
            Ok(result) => {
                let chords = result.chord_progression.len();
                let average_confidence = result.average_confidence;
                let origin = result.origin;
                match self.apply(id, |job| job.complete(result)).await {
                    Ok(Transition::Applied(_)) => {
                        metrics::counter!("analysis_jobs_completed_total").increment(1);
                        tracing::info!(
                            job_id = %id,
                            chords,
                            average_confidence,
                            origin = ?origin,
                            "Analysis completed"
                        );
                    }
                    Ok(Transition::Ignored(job)) => {
                        tracing::debug!(job_id = %id, status = %job.status, "Discarding result for finished job");
                    }
                    Ok(Transition::Missing) => {
                        tracing::warn!(job_id = %id, "Job disappeared before completion");
                    }
                    Err(e) => {
                        tracing::error!(job_id = %id, error = %e, "Failed to store result");
                    }
                }
            }
            Err(Halt::Stopped) => {
                tracing::debug!(job_id = %id, "Pipeline stopped");
            }
            Err(Halt::Failed(kind, message)) => {
                tracing::error!(job_id = %id, kind = %kind, error = %message, "Analysis failed");
                match self.apply(id, |job| job.fail(kind, message)).await {
                    Ok(Transition::Applied(_)) => {
                        metrics::counter!("analysis_jobs_failed_total", "kind" => kind.to_string()).increment(1);
                    }
                    Ok(_) => {}
                    Err(e) => {
                        tracing::error!(job_id = %id, error = %e, "Failed to record job failure");
                    }
                }
            }
        }
    }
}

fn release(job_id: Uuid, segment: AudioSegment) {
    if let Err(e) = segment.release() {
        tracing::warn!(job_id = %job_id, error = %e, "Failed to remove segment artifact");
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AnalysisError {
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Invalid source: {0}")]
    InvalidSource(String),

    #[error("Job {0} not found")]
    NotFound(Uuid),

    #[error("Result for job {id} is not ready (status: {status})")]
    NotReady { id: Uuid, status: JobStatus },

    #[error(transparent)]
    Store(#[from] StoreError),
}
