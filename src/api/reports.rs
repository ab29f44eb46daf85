//! Quality report API handlers
//!
//! POST /api/reports/:job_id/generate, GET /api/reports/:job_id/download

use axum::{
    extract::{Path, State},
    http::{header, HeaderMap},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use uuid::Uuid;

use crate::api::require_user;
use crate::db;
use crate::error::{ApiError, ApiResult};
use crate::models::{PipelineJob, QualityReport};
use crate::pipeline::artifacts;
use crate::AppState;

#[derive(Debug, Serialize)]
pub struct GenerateReportResponse {
    pub download_url: String,
}

/// 404 until the job has completed and the terminal producer has written the
/// report row.
async fn load_report_for_user(
    state: &AppState,
    job_id: Uuid,
    user_id: Uuid,
) -> ApiResult<(PipelineJob, QualityReport)> {
    let job = db::jobs::load_job_for_user(&state.db, job_id, user_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Job not found: {}", job_id)))?;

    let report = db::reports::load_report(&state.db, job_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Quality report not found".to_string()))?;

    Ok((job, report))
}

/// POST /api/reports/:job_id/generate
pub async fn generate_report(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(job_id): Path<Uuid>,
) -> ApiResult<Json<GenerateReportResponse>> {
    let user_id = require_user(&headers)?;

    load_report_for_user(&state, job_id, user_id).await?;

    Ok(Json(GenerateReportResponse {
        download_url: format!("/api/reports/{}/download", job_id),
    }))
}

/// GET /api/reports/:job_id/download
pub async fn download_report(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(job_id): Path<Uuid>,
) -> ApiResult<Response> {
    let user_id = require_user(&headers)?;

    let (job, report) = load_report_for_user(&state, job_id, user_id).await?;

    let payload = artifacts::render_report_document(&job, &report);

    tracing::debug!(job_id = %job_id, bytes = payload.len(), "Report download");

    Ok((
        [
            (header::CONTENT_TYPE, "application/json".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"quality_report_{}.json\"", job_id),
            ),
        ],
        payload,
    )
        .into_response())
}

pub fn report_routes() -> Router<AppState> {
    Router::new()
        .route("/api/reports/:job_id/generate", post(generate_report))
        .route("/api/reports/:job_id/download", get(download_report))
}
