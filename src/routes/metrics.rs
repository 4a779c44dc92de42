use axum::extract::State;
use axum::response::IntoResponse;
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;

/// GET /metrics: Prometheus text exposition of the analysis counters and timings.
pub async fn prometheus_metrics(State(handle): State<Arc<PrometheusHandle>>) -> impl IntoResponse {
    handle.render()
}

/// Register descriptions for every metric the service emits.
pub fn describe() {
    metrics::describe_counter!("analysis_jobs_submitted_total", "Total analysis jobs submitted");
    metrics::describe_counter!("analysis_jobs_completed_total", "Total analysis jobs completed");
    metrics::describe_counter!(
        "analysis_jobs_failed_total",
        "Total analysis jobs that ended in error, by error kind"
    );
    metrics::describe_counter!("analysis_jobs_cancelled_total", "Total analysis jobs cancelled");
    metrics::describe_counter!(
        "analysis_delegate_fallbacks_total",
        "Jobs analyzed locally because the remote recognizer was unavailable or failed"
    );
    metrics::describe_counter!(
        "analysis_extraction_fallbacks_total",
        "Remote extractions retried with the fallback extractor"
    );
    metrics::describe_histogram!(
        "analysis_processing_seconds",
        metrics::Unit::Seconds,
        "Time from pipeline start to terminal state"
    );
}
