use axum::extract::{Multipart, Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use std::path::{Component, Path as FsPath, PathBuf};
use uuid::Uuid;

use super::ApiError;
use crate::app_state::AppState;
use crate::models::analysis::AnalysisResult;
use crate::models::job::{AnalysisJob, SourceSpec, TimeSpan};
use crate::models::request::{ListQuery, SubmitRequest, SubmitResponse};
use crate::services::acquisition::SUPPORTED_EXTENSIONS;

const DEFAULT_PAGE_SIZE: usize = 50;
const MAX_PAGE_SIZE: usize = 200;

/// POST /api/v1/analyses: submit a remote video or a previously uploaded file.
pub async fn submit_analysis(
    State(state): State<AppState>,
    Json(request): Json<SubmitRequest>,
) -> Result<(StatusCode, Json<SubmitResponse>), ApiError> {
    if let SourceSpec::UploadedFile { path } = &request.source {
        ensure_within(&state.config.upload_dir, path)?;
    }

    let job = state.orchestrator.submit(request).await?;
    Ok((StatusCode::ACCEPTED, Json(SubmitResponse::from(&job))))
}

/// POST /api/v1/analyses/upload: multipart audio upload followed by submission.
pub async fn upload_analysis(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<SubmitResponse>), ApiError> {
    let mut stored: Option<PathBuf> = None;
    let mut span = TimeSpan::full();
    let mut strategy = None;
    let mut window_seconds = None;
    let mut job_id = None;

    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "file" => {
                let extension = field
                    .file_name()
                    .and_then(|n| FsPath::new(n).extension())
                    .and_then(|e| e.to_str())
                    .map(str::to_ascii_lowercase)
                    .unwrap_or_default();
                if !SUPPORTED_EXTENSIONS.contains(&extension.as_str()) {
                    return Err(ApiError::BadRequest(format!(
                        "file must be an audio file ({})",
                        SUPPORTED_EXTENSIONS.join(", ")
                    )));
                }

                let data = field.bytes().await.map_err(multipart_error)?;
                if data.is_empty() {
                    return Err(ApiError::BadRequest("uploaded file is empty".to_string()));
                }

                tokio::fs::create_dir_all(&state.config.upload_dir)
                    .await
                    .map_err(|e| ApiError::Internal(format!("cannot create upload dir: {e}")))?;
                let path = state
                    .config
                    .upload_dir
                    .join(format!("{}.{extension}", Uuid::new_v4()));
                tokio::fs::write(&path, &data)
                    .await
                    .map_err(|e| ApiError::Internal(format!("cannot store upload: {e}")))?;

                tracing::info!(path = %path.display(), bytes = data.len(), "Upload stored");
                stored = Some(path);
            }
            "start_time" => span.start_time = parse_number(&name, &field.text().await.map_err(multipart_error)?)?,
            "end_time" => span.end_time = Some(parse_number(&name, &field.text().await.map_err(multipart_error)?)?),
            "window_seconds" => {
                window_seconds = Some(parse_number(&name, &field.text().await.map_err(multipart_error)?)?)
            }
            "strategy" => strategy = Some(field.text().await.map_err(multipart_error)?.trim().to_string()),
            "job_id" => {
                let text = field.text().await.map_err(multipart_error)?;
                job_id = Some(
                    text.trim()
                        .parse::<Uuid>()
                        .map_err(|_| ApiError::BadRequest(format!("job_id is not a UUID: {text}")))?,
                );
            }
            _ => {}
        }
    }

    let path = stored.ok_or_else(|| ApiError::BadRequest("missing 'file' field".to_string()))?;

    let mut request = SubmitRequest::new(SourceSpec::UploadedFile { path: path.clone() }, span);
    request.strategy = strategy;
    request.window_seconds = window_seconds;
    request.job_id = job_id;

    match state.orchestrator.submit(request).await {
        Ok(job) => Ok((StatusCode::ACCEPTED, Json(SubmitResponse::from(&job)))),
        Err(e) => {
            if let Err(io) = tokio::fs::remove_file(&path).await {
                tracing::warn!(path = %path.display(), error = %io, "Failed to remove rejected upload");
            }
            Err(e.into())
        }
    }
}

/// GET /api/v1/analyses: most recent jobs first.
pub async fn list_analyses(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<AnalysisJob>>, ApiError> {
    let limit = query.limit.unwrap_or(DEFAULT_PAGE_SIZE).min(MAX_PAGE_SIZE);
    let offset = query.offset.unwrap_or(0);
    Ok(Json(state.orchestrator.list(limit, offset).await?))
}

/// GET /api/v1/analyses/{job_id}
pub async fn get_analysis(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
) -> Result<Json<AnalysisJob>, ApiError> {
    Ok(Json(state.orchestrator.get_status(job_id).await?))
}

/// GET /api/v1/analyses/{job_id}/result: 409 until the job has completed.
pub async fn get_analysis_result(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
) -> Result<Json<AnalysisResult>, ApiError> {
    Ok(Json(state.orchestrator.get_result(job_id).await?))
}

/// DELETE /api/v1/analyses/{job_id}: cancel; finished jobs come back unchanged.
pub async fn cancel_analysis(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
) -> Result<Json<AnalysisJob>, ApiError> {
    Ok(Json(state.orchestrator.cancel(job_id).await?))
}

fn parse_number(field: &str, text: &str) -> Result<f64, ApiError> {
    text.trim()
        .parse::<f64>()
        .map_err(|_| ApiError::BadRequest(format!("{field} must be a number, got '{text}'")))
}

fn multipart_error(err: axum::extract::multipart::MultipartError) -> ApiError {
    if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        ApiError::PayloadTooLarge(err.body_text())
    } else {
        ApiError::BadRequest(err.body_text())
    }
}

/// Uploaded paths named in JSON requests must point inside the upload directory.
fn ensure_within(root: &FsPath, path: &FsPath) -> Result<(), ApiError> {
    let escapes = path
        .components()
        .any(|c| matches!(c, Component::ParentDir));
    if escapes || !path.starts_with(root) {
        return Err(ApiError::BadRequest(format!(
            "uploaded files must live under {}",
            root.display()
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upload_paths_are_confined() {
        let root = FsPath::new("/srv/uploads");
        assert!(ensure_within(root, FsPath::new("/srv/uploads/a.wav")).is_ok());
        assert!(ensure_within(root, FsPath::new("/etc/passwd.wav")).is_err());
        assert!(ensure_within(root, FsPath::new("/srv/uploads/../secret.wav")).is_err());
    }

    #[test]
    fn test_parse_number() {
        assert_eq!(parse_number("start_time", " 12.5 ").unwrap(), 12.5);
        assert!(parse_number("start_time", "soon").is_err());
    }
}
