//! Pipeline job API handlers
//!
//! POST /api/pipeline/start, GET /api/pipeline/:job_id/status,
//! POST /api/pipeline/:job_id/cancel, POST /api/pipeline/:job_id/retry

use axum::{
    extract::{Path, State},
    http::HeaderMap,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::api::require_user;
use crate::db;
use crate::error::{ApiError, ApiResult};
use crate::models::{JobStatus, NewJob, PipelineJob, PipelineStep};
use crate::AppState;

/// POST /api/pipeline/start request
///
/// All fields except `glossary_id` are required; each is `Option` so a
/// missing one maps to a 400 with a named field instead of the extractor's
/// generic rejection.
#[derive(Debug, Deserialize)]
pub struct StartPipelineRequest {
    pub project_id: Option<Uuid>,
    pub upload_id: Option<Uuid>,
    /// Content is opaque to this service
    pub settings: Option<serde_json::Value>,
    /// Attestations (policy / PHI / DPA agreement)
    pub compliance_checks: Option<serde_json::Value>,
    pub glossary_id: Option<Uuid>,
}

/// Job snapshot returned by start and status
#[derive(Debug, Serialize)]
pub struct JobStatusResponse {
    pub job: PipelineJob,
    pub steps: Vec<PipelineStep>,
}

/// POST /api/pipeline/start
///
/// Creates the job plus its 8 step placeholders atomically, then detaches the
/// sequencer. The response returns immediately with the queued snapshot; no
/// step executes before the caller gets it.
pub async fn start_pipeline(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<StartPipelineRequest>,
) -> ApiResult<Json<JobStatusResponse>> {
    let user_id = require_user(&headers)?;

    let project_id = request
        .project_id
        .ok_or_else(|| ApiError::BadRequest("Missing required field: project_id".to_string()))?;
    let upload_id = request
        .upload_id
        .ok_or_else(|| ApiError::BadRequest("Missing required field: upload_id".to_string()))?;
    let settings = request
        .settings
        .ok_or_else(|| ApiError::BadRequest("Missing required field: settings".to_string()))?;
    let compliance_checks = request.compliance_checks.ok_or_else(|| {
        ApiError::BadRequest("Missing required field: compliance_checks".to_string())
    })?;

    // Both checks collapse to 404 so callers can't probe for foreign projects
    if !db::registry::user_has_project_access(&state.db, project_id, user_id).await? {
        return Err(ApiError::NotFound(
            "Project not found or access denied".to_string(),
        ));
    }
    if !db::registry::upload_in_project(&state.db, upload_id, project_id).await? {
        return Err(ApiError::NotFound("Upload not found".to_string()));
    }

    let job = db::jobs::create_job_with_steps(
        &state.db,
        &NewJob {
            project_id,
            upload_id,
            glossary_id: request.glossary_id,
            settings,
            compliance_checks,
            started_by: user_id,
        },
    )
    .await?;

    let steps = db::jobs::list_steps(&state.db, job.job_id).await?;

    state.spawn_sequencer(job.job_id).await;

    Ok(Json(JobStatusResponse { job, steps }))
}

/// GET /api/pipeline/:job_id/status
///
/// Pure, repeatable read. Steps come back in fixed pipeline order regardless
/// of when they completed.
pub async fn job_status(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(job_id): Path<Uuid>,
) -> ApiResult<Json<JobStatusResponse>> {
    let user_id = require_user(&headers)?;

    let job = db::jobs::load_job_for_user(&state.db, job_id, user_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Job not found: {}", job_id)))?;

    let steps = db::jobs::list_steps(&state.db, job_id).await?;

    tracing::debug!(job_id = %job_id, status = job.status.as_str(), "Status query");

    Ok(Json(JobStatusResponse { job, steps }))
}

/// POST /api/pipeline/:job_id/cancel
///
/// Cooperative: a queued job is cancelled directly; a running job is flagged
/// and signalled, and the sequencer stops at the next step boundary. The
/// poller observes the terminal state like any other.
pub async fn cancel_job(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(job_id): Path<Uuid>,
) -> ApiResult<Json<JobStatusResponse>> {
    let user_id = require_user(&headers)?;

    let job = db::jobs::load_job_for_user(&state.db, job_id, user_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Job not found: {}", job_id)))?;

    if job.status.is_terminal() {
        return Err(ApiError::Conflict(format!(
            "Job already in terminal state: {}",
            job.status.as_str()
        )));
    }

    db::jobs::request_cancel(&state.db, job_id).await?;

    if job.status == JobStatus::Queued {
        // May lose the race against a sequencer that just claimed the lease;
        // the persisted flag covers that case
        db::jobs::cancel_queued_job(&state.db, job_id).await?;
    }

    state.signal_cancel(job_id).await;

    tracing::info!(job_id = %job_id, "Cancellation requested");

    let job = db::jobs::load_job(&state.db, job_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Job not found: {}", job_id)))?;
    let steps = db::jobs::list_steps(&state.db, job_id).await?;

    Ok(Json(JobStatusResponse { job, steps }))
}

/// POST /api/pipeline/:job_id/retry
///
/// Re-queues a failed or cancelled job and restarts the sequencer from the
/// first non-completed step, under the same lease discipline as a fresh
/// submission.
pub async fn retry_job(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(job_id): Path<Uuid>,
) -> ApiResult<Json<JobStatusResponse>> {
    let user_id = require_user(&headers)?;

    let job = db::jobs::load_job_for_user(&state.db, job_id, user_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Job not found: {}", job_id)))?;

    if !matches!(job.status, JobStatus::Failed | JobStatus::Cancelled) {
        return Err(ApiError::Conflict(format!(
            "Only failed or cancelled jobs can be retried (status: {})",
            job.status.as_str()
        )));
    }

    if !db::jobs::reset_job_for_retry(&state.db, job_id).await? {
        // Lost a race with another retry; treat as already re-queued
        tracing::debug!(job_id = %job_id, "Retry reset was a no-op");
    }
    db::jobs::reset_failed_steps(&state.db, job_id).await?;

    state.spawn_sequencer(job_id).await;

    tracing::info!(job_id = %job_id, "Job re-queued for retry");

    let job = db::jobs::load_job(&state.db, job_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Job not found: {}", job_id)))?;
    let steps = db::jobs::list_steps(&state.db, job_id).await?;

    Ok(Json(JobStatusResponse { job, steps }))
}

pub fn pipeline_routes() -> Router<AppState> {
    Router::new()
        .route("/api/pipeline/start", post(start_pipeline))
        .route("/api/pipeline/:job_id/status", get(job_status))
        .route("/api/pipeline/:job_id/cancel", post(cancel_job))
        .route("/api/pipeline/:job_id/retry", post(retry_job))
}
