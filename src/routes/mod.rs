use axum::extract::DefaultBodyLimit;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;

use crate::app_state::AppState;
use crate::services::orchestrator::AnalysisError;

pub mod analysis;
pub mod catalog;
pub mod health;
pub mod metrics;

/// API routes with their state applied. The server adds `/metrics` and the
/// tower-http layers on top.
pub fn api_router(state: AppState) -> Router {
    let body_limit = state.config.max_upload_bytes;

    Router::new()
        .route("/health", get(health::health_check))
        .route(
            "/api/v1/analyses",
            post(analysis::submit_analysis).get(analysis::list_analyses),
        )
        .route("/api/v1/analyses/upload", post(analysis::upload_analysis))
        .route(
            "/api/v1/analyses/{job_id}",
            get(analysis::get_analysis).delete(analysis::cancel_analysis),
        )
        .route("/api/v1/analyses/{job_id}/result", get(analysis::get_analysis_result))
        .route("/api/v1/models", get(catalog::list_models))
        .route("/api/v1/chord-templates", get(catalog::list_chord_templates))
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state(state)
}

/// Handler error. Serialized as `{"error": ..., "message": ...}`.
#[derive(Debug)]
pub enum ApiError {
    Analysis(AnalysisError),
    BadRequest(String),
    PayloadTooLarge(String),
    Internal(String),
}

impl From<AnalysisError> for ApiError {
    fn from(err: AnalysisError) -> Self {
        ApiError::Analysis(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message) = match self {
            ApiError::Analysis(err) => match &err {
                AnalysisError::InvalidRequest(_) => (StatusCode::BAD_REQUEST, "invalid_request", err.to_string()),
                AnalysisError::InvalidSource(_) => (StatusCode::BAD_REQUEST, "invalid_source", err.to_string()),
                AnalysisError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found", err.to_string()),
                AnalysisError::NotReady { .. } => (StatusCode::CONFLICT, "not_ready", err.to_string()),
                AnalysisError::Store(e) => {
                    tracing::error!(error = %e, "Job store error");
                    (
                        StatusCode::INTERNAL_SERVER_ERROR,
                        "internal",
                        "Job store unavailable".to_string(),
                    )
                }
            },
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "invalid_request", msg),
            ApiError::PayloadTooLarge(msg) => (StatusCode::PAYLOAD_TOO_LARGE, "payload_too_large", msg),
            ApiError::Internal(msg) => {
                tracing::error!("Internal error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal",
                    "Internal server error".to_string(),
                )
            }
        };

        (status, Json(json!({ "error": code, "message": message }))).into_response()
    }
}
