use std::sync::Arc;

use crate::config::AppConfig;
use crate::db::InMemoryJobStore;
use crate::services::{
    acquisition::AudioSourceGateway,
    chroma::ChromaExtractor,
    delegate::{DelegateError, HttpRecognitionDelegate, RemoteRecognitionDelegate},
    extractor::{FfmpegStreamExtractor, YtDlpExtractor},
    matcher::StrategyRegistry,
    orchestrator::{AnalysisOrchestrator, OrchestratorSettings},
    recognition::LocalRecognizer,
};

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: AnalysisOrchestrator,
    pub config: Arc<AppConfig>,
}

impl AppState {
    pub fn new(orchestrator: AnalysisOrchestrator, config: AppConfig) -> Self {
        Self {
            orchestrator,
            config: Arc::new(config),
        }
    }

    /// Wire the production collaborators: in-memory store, symphonia/yt-dlp gateway,
    /// optional HTTP delegate and the local recognizer.
    pub fn from_config(config: AppConfig) -> Result<Self, DelegateError> {
        Ok(Self::new(build_orchestrator(&config)?, config))
    }
}

pub fn build_orchestrator(config: &AppConfig) -> Result<AnalysisOrchestrator, DelegateError> {
    let gateway = AudioSourceGateway::new(
        &config.work_dir,
        config.sample_rate,
        Arc::new(YtDlpExtractor::new(&config.ytdlp_bin, &config.ffmpeg_bin)),
        Arc::new(FfmpegStreamExtractor::new(&config.ytdlp_bin, &config.ffmpeg_bin)),
    );

    let delegate: Option<Arc<dyn RemoteRecognitionDelegate>> = match &config.remote_delegate_url {
        Some(url) if !url.trim().is_empty() => {
            tracing::info!(url = %url, "Remote recognizer configured");
            Some(Arc::new(HttpRecognitionDelegate::new(url.trim(), config.delegate_timeout())?))
        }
        _ => {
            tracing::info!("No remote recognizer configured, using local analysis only");
            None
        }
    };

    let extractor = ChromaExtractor::default().with_harmonic_separation(config.harmonic_separation);
    let recognizer = LocalRecognizer::new(extractor, Arc::new(StrategyRegistry::with_defaults()));

    Ok(AnalysisOrchestrator::new(
        Arc::new(InMemoryJobStore::new()),
        Arc::new(gateway),
        delegate,
        recognizer,
        OrchestratorSettings::from_config(config),
    ))
}
