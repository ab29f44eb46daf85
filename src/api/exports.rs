//! Export artifact API handlers
//!
//! POST /api/exports/:job_id/generate, GET /api/exports/:job_id/status,
//! GET /api/exports/:job_id/:format/download

use axum::{
    extract::{Path, State},
    http::{header, HeaderMap},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::api::require_user;
use crate::db;
use crate::error::{ApiError, ApiResult};
use crate::models::{ExportArtifact, ExportFormat, JobStatus, PipelineJob};
use crate::pipeline::artifacts;
use crate::AppState;

/// POST /api/exports/:job_id/generate request
#[derive(Debug, Deserialize)]
pub struct GenerateExportsRequest {
    pub formats: Option<Vec<String>>,
}

#[derive(Debug, Serialize)]
pub struct ExportsResponse {
    pub exports: Vec<ExportArtifact>,
}

async fn load_completed_job(
    state: &AppState,
    job_id: Uuid,
    user_id: Uuid,
) -> ApiResult<PipelineJob> {
    let job = db::jobs::load_job_for_user(&state.db, job_id, user_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Job not found: {}", job_id)))?;

    if job.status != JobStatus::Completed {
        return Err(ApiError::BadRequest(
            "Job must be completed before generating exports".to_string(),
        ));
    }

    Ok(job)
}

/// POST /api/exports/:job_id/generate
///
/// Idempotent per (job, format): missing artifacts are synthesized, existing
/// ones returned as-is. Unknown format names are skipped; a request with no
/// valid format is rejected.
pub async fn generate_exports(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(job_id): Path<Uuid>,
    Json(request): Json<GenerateExportsRequest>,
) -> ApiResult<Json<ExportsResponse>> {
    let user_id = require_user(&headers)?;

    let requested = request
        .formats
        .ok_or_else(|| ApiError::BadRequest("Formats array is required".to_string()))?;

    let mut formats: Vec<ExportFormat> = Vec::new();
    for name in &requested {
        if let Ok(format) = ExportFormat::parse(name) {
            if !formats.contains(&format) {
                formats.push(format);
            }
        }
    }
    if formats.is_empty() {
        return Err(ApiError::BadRequest(
            "No valid export formats requested".to_string(),
        ));
    }

    let job = load_completed_job(&state, job_id, user_id).await?;

    let exports = artifacts::synthesize_exports(&state.db, &job, &formats).await?;

    tracing::info!(
        job_id = %job_id,
        formats = formats.len(),
        "Export generation request served"
    );

    Ok(Json(ExportsResponse { exports }))
}

/// GET /api/exports/:job_id/status
///
/// Existing artifacts for the job, if any.
pub async fn export_status(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(job_id): Path<Uuid>,
) -> ApiResult<Json<ExportsResponse>> {
    let user_id = require_user(&headers)?;

    db::jobs::load_job_for_user(&state.db, job_id, user_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Job not found: {}", job_id)))?;

    let exports = db::exports::list_artifacts(&state.db, job_id).await?;

    Ok(Json(ExportsResponse { exports }))
}

/// GET /api/exports/:job_id/:format/download
///
/// Serves the artifact payload with a content-disposition filename. 404 when
/// no artifact exists for the (job, format) pair or the caller lacks access.
pub async fn download_export(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path((job_id, format)): Path<(Uuid, String)>,
) -> ApiResult<Response> {
    let user_id = require_user(&headers)?;

    db::jobs::load_job_for_user(&state.db, job_id, user_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Job not found: {}", job_id)))?;

    // An unknown format string can't name an artifact; same 404 as absent
    let format = ExportFormat::parse(&format)
        .map_err(|_| ApiError::NotFound(format!("Export not found: {}", format)))?;

    let artifact = db::exports::load_artifact(&state.db, job_id, format)
        .await?
        .ok_or_else(|| {
            ApiError::NotFound(format!("Export not found: {}", format.as_str()))
        })?;

    let payload = artifacts::render_export_payload(&artifact);

    tracing::debug!(
        job_id = %job_id,
        format = format.as_str(),
        bytes = payload.len(),
        "Export download"
    );

    Ok((
        [
            (header::CONTENT_TYPE, "application/zip".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", artifact.filename),
            ),
        ],
        payload,
    )
        .into_response())
}

pub fn export_routes() -> Router<AppState> {
    Router::new()
        .route("/api/exports/:job_id/generate", post(generate_exports))
        .route("/api/exports/:job_id/status", get(export_status))
        .route("/api/exports/:job_id/:format/download", get(download_export))
}
