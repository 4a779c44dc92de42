use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde::Serialize;
use std::time::Instant;

use crate::app_state::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub running_jobs: usize,
    pub checks: HealthChecks,
}

#[derive(Serialize)]
pub struct HealthChecks {
    pub job_store: ComponentHealth,
    pub remote_delegate: ComponentHealth,
}

#[derive(Serialize)]
pub struct ComponentHealth {
    pub status: String,
    pub latency_ms: Option<u64>,
}

impl ComponentHealth {
    fn ok(started: Instant) -> Self {
        Self {
            status: "ok".to_string(),
            latency_ms: Some(started.elapsed().as_millis() as u64),
        }
    }

    fn with_status(status: &str) -> Self {
        Self {
            status: status.to_string(),
            latency_ms: None,
        }
    }
}

/// GET /health: liveness plus collaborator status.
///
/// A down job store makes the service unavailable. A down remote recognizer only
/// degrades it, since analysis falls back to the local pipeline.
pub async fn health_check(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let orchestrator = &state.orchestrator;

    let start = Instant::now();
    let store_check = match orchestrator.store().health_check().await {
        Ok(()) => ComponentHealth::ok(start),
        Err(e) => {
            tracing::warn!(error = %e, "Job store health check failed");
            ComponentHealth::with_status("error")
        }
    };

    let delegate_check = match orchestrator.delegate() {
        None => ComponentHealth::with_status("not_configured"),
        Some(delegate) => {
            let start = Instant::now();
            if delegate.health_check().await {
                ComponentHealth::ok(start)
            } else {
                ComponentHealth::with_status("unavailable")
            }
        }
    };

    let store_ok = store_check.status == "ok";
    let delegate_ok = matches!(delegate_check.status.as_str(), "ok" | "not_configured");

    let (status_code, status) = match (store_ok, delegate_ok) {
        (true, true) => (StatusCode::OK, "ok"),
        (true, false) => (StatusCode::OK, "degraded"),
        (false, _) => (StatusCode::SERVICE_UNAVAILABLE, "error"),
    };

    let response = HealthResponse {
        status: status.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        running_jobs: orchestrator.running_jobs(),
        checks: HealthChecks {
            job_store: store_check,
            remote_delegate: delegate_check,
        },
    };

    (status_code, Json(response))
}
