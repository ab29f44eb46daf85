//! Job store: pipeline job and step persistence
//!
//! The sequencer is the only writer of job/step status; the status endpoint
//! and poller only read. Transition guards live in the UPDATE statements
//! themselves so two racing writers can never move a record backwards.

use chrono::{DateTime, Duration, Utc};
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::models::{
    JobStatus, NewJob, PipelineJob, PipelineStep, StepKey, StepStatus, PIPELINE_STEPS,
};

fn parse_dt(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| Error::Internal(format!("Failed to parse timestamp: {}", e)))
}

fn parse_opt_dt(s: Option<String>) -> Result<Option<DateTime<Utc>>> {
    s.as_deref().map(parse_dt).transpose()
}

fn parse_opt_uuid(s: Option<String>) -> Result<Option<Uuid>> {
    s.as_deref()
        .map(|v| Uuid::parse_str(v).map_err(|e| Error::Internal(format!("Bad uuid: {}", e))))
        .transpose()
}

fn parse_json(s: &str) -> Result<serde_json::Value> {
    serde_json::from_str(s).map_err(|e| Error::Internal(format!("Failed to parse JSON: {}", e)))
}

fn job_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<PipelineJob> {
    let job_id: String = row.get("job_id");
    let project_id: String = row.get("project_id");
    let upload_id: String = row.get("upload_id");
    let started_by: String = row.get("started_by");
    let status: String = row.get("status");
    let settings: String = row.get("settings");
    let compliance_checks: String = row.get("compliance_checks");
    let started_at: String = row.get("started_at");

    Ok(PipelineJob {
        job_id: Uuid::parse_str(&job_id)
            .map_err(|e| Error::Internal(format!("Bad job_id: {}", e)))?,
        project_id: Uuid::parse_str(&project_id)
            .map_err(|e| Error::Internal(format!("Bad project_id: {}", e)))?,
        upload_id: Uuid::parse_str(&upload_id)
            .map_err(|e| Error::Internal(format!("Bad upload_id: {}", e)))?,
        glossary_id: parse_opt_uuid(row.get("glossary_id"))?,
        status: JobStatus::parse(&status)?,
        settings: parse_json(&settings)?,
        compliance_checks: parse_json(&compliance_checks)?,
        started_by: Uuid::parse_str(&started_by)
            .map_err(|e| Error::Internal(format!("Bad started_by: {}", e)))?,
        error_message: row.get("error_message"),
        started_at: parse_dt(&started_at)?,
        completed_at: parse_opt_dt(row.get("completed_at"))?,
        lease_holder: parse_opt_uuid(row.get("lease_holder"))?,
        lease_expires_at: parse_opt_dt(row.get("lease_expires_at"))?,
    })
}

fn step_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<PipelineStep> {
    let job_id: String = row.get("job_id");
    let step_key: String = row.get("step_key");
    let status: String = row.get("status");

    Ok(PipelineStep {
        job_id: Uuid::parse_str(&job_id)
            .map_err(|e| Error::Internal(format!("Bad job_id: {}", e)))?,
        step_key: StepKey::parse(&step_key)?,
        step_label: row.get("step_label"),
        position: row.get("position"),
        status: StepStatus::parse(&status)?,
        logs: row.get("logs"),
        error_message: row.get("error_message"),
        started_at: parse_opt_dt(row.get("started_at"))?,
        completed_at: parse_opt_dt(row.get("completed_at"))?,
    })
}

/// Create a job and all 8 step rows in one transaction.
///
/// Partial creation (a job without its steps, or vice versa) is never
/// observable: readers either see nothing or the complete set.
pub async fn create_job_with_steps(pool: &SqlitePool, new: &NewJob) -> Result<PipelineJob> {
    let job_id = Uuid::new_v4();
    let now = Utc::now();
    let now_str = now.to_rfc3339();

    let mut tx = pool.begin().await?;

    sqlx::query(
        r#"
        INSERT INTO pipeline_jobs (
            job_id, project_id, upload_id, glossary_id, status,
            settings, compliance_checks, started_by, started_at
        ) VALUES (?, ?, ?, ?, 'queued', ?, ?, ?, ?)
        "#,
    )
    .bind(job_id.to_string())
    .bind(new.project_id.to_string())
    .bind(new.upload_id.to_string())
    .bind(new.glossary_id.map(|id| id.to_string()))
    .bind(new.settings.to_string())
    .bind(new.compliance_checks.to_string())
    .bind(new.started_by.to_string())
    .bind(&now_str)
    .execute(&mut *tx)
    .await?;

    for (position, key) in PIPELINE_STEPS.iter().enumerate() {
        // Upload registration happened synchronously with submission, so the
        // first step is born completed.
        let (status, started_at, completed_at) = if *key == StepKey::Register {
            (StepStatus::Completed, Some(&now_str), Some(&now_str))
        } else {
            (StepStatus::Queued, None, None)
        };

        sqlx::query(
            r#"
            INSERT INTO pipeline_job_steps (
                job_id, step_key, step_label, position, status, started_at, completed_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(job_id.to_string())
        .bind(key.as_str())
        .bind(key.label())
        .bind(position as i64)
        .bind(status.as_str())
        .bind(started_at)
        .bind(completed_at)
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;

    tracing::info!(
        job_id = %job_id,
        project_id = %new.project_id,
        upload_id = %new.upload_id,
        "Pipeline job created with step placeholders"
    );

    Ok(PipelineJob {
        job_id,
        project_id: new.project_id,
        upload_id: new.upload_id,
        glossary_id: new.glossary_id,
        status: JobStatus::Queued,
        settings: new.settings.clone(),
        compliance_checks: new.compliance_checks.clone(),
        started_by: new.started_by,
        error_message: None,
        started_at: now,
        completed_at: None,
        lease_holder: None,
        lease_expires_at: None,
    })
}

/// Load a job without any visibility check (sequencer-internal)
pub async fn load_job(pool: &SqlitePool, job_id: Uuid) -> Result<Option<PipelineJob>> {
    let row = sqlx::query("SELECT * FROM pipeline_jobs WHERE job_id = ?")
        .bind(job_id.to_string())
        .fetch_optional(pool)
        .await?;

    row.as_ref().map(job_from_row).transpose()
}

/// Load a job visible to `user_id` through team membership.
///
/// Returns `None` both when the job doesn't exist and when the requester has
/// no access; callers cannot distinguish the two.
pub async fn load_job_for_user(
    pool: &SqlitePool,
    job_id: Uuid,
    user_id: Uuid,
) -> Result<Option<PipelineJob>> {
    let row = sqlx::query(
        r#"
        SELECT j.* FROM pipeline_jobs j
        JOIN projects p ON p.project_id = j.project_id
        JOIN team_memberships m ON m.team_id = p.team_id AND m.user_id = ?
        WHERE j.job_id = ?
        "#,
    )
    .bind(user_id.to_string())
    .bind(job_id.to_string())
    .fetch_optional(pool)
    .await?;

    row.as_ref().map(job_from_row).transpose()
}

/// List a project's jobs, newest first
pub async fn list_jobs_for_project(
    pool: &SqlitePool,
    project_id: Uuid,
) -> Result<Vec<PipelineJob>> {
    let rows = sqlx::query(
        "SELECT * FROM pipeline_jobs WHERE project_id = ? ORDER BY started_at DESC",
    )
    .bind(project_id.to_string())
    .fetch_all(pool)
    .await?;

    rows.iter().map(job_from_row).collect()
}

/// Steps in fixed pipeline order. Ordering is by position, never by
/// completion time, so never-started steps keep their place.
pub async fn list_steps(pool: &SqlitePool, job_id: Uuid) -> Result<Vec<PipelineStep>> {
    let rows = sqlx::query("SELECT * FROM pipeline_job_steps WHERE job_id = ? ORDER BY position")
        .bind(job_id.to_string())
        .fetch_all(pool)
        .await?;

    rows.iter().map(step_from_row).collect()
}

pub async fn load_step(
    pool: &SqlitePool,
    job_id: Uuid,
    step_key: StepKey,
) -> Result<Option<PipelineStep>> {
    let row = sqlx::query("SELECT * FROM pipeline_job_steps WHERE job_id = ? AND step_key = ?")
        .bind(job_id.to_string())
        .bind(step_key.as_str())
        .fetch_optional(pool)
        .await?;

    row.as_ref().map(step_from_row).transpose()
}

/// Advance one step to `new_status`.
///
/// Idempotent: re-applying the current status is a no-op (timestamps are
/// COALESCEd, so the first stamp wins). A transition whose current status is
/// not an allowed predecessor is rejected with `InvalidTransition`.
pub async fn advance_step(
    pool: &SqlitePool,
    job_id: Uuid,
    step_key: StepKey,
    new_status: StepStatus,
    logs: Option<&str>,
    error_message: Option<&str>,
) -> Result<()> {
    let now = Utc::now().to_rfc3339();
    let allowed: Vec<&str> = StepStatus::allowed_predecessors(new_status)
        .iter()
        .map(|s| s.as_str())
        .collect();
    // allowed_predecessors returns at most 3 entries
    let placeholders = ["?"; 3][..allowed.len()].join(", ");

    let sql = format!(
        r#"
        UPDATE pipeline_job_steps SET
            status = ?,
            started_at = CASE WHEN ? = 'running' THEN COALESCE(started_at, ?) ELSE started_at END,
            completed_at = CASE WHEN ? IN ('completed', 'failed', 'cancelled')
                           THEN COALESCE(completed_at, ?) ELSE completed_at END,
            logs = COALESCE(?, logs),
            error_message = COALESCE(?, error_message)
        WHERE job_id = ? AND step_key = ? AND status IN ({})
        "#,
        placeholders
    );

    let mut query = sqlx::query(&sql)
        .bind(new_status.as_str())
        .bind(new_status.as_str())
        .bind(&now)
        .bind(new_status.as_str())
        .bind(&now)
        .bind(logs)
        .bind(error_message)
        .bind(job_id.to_string())
        .bind(step_key.as_str());
    for status in &allowed {
        query = query.bind(*status);
    }

    let result = query.execute(pool).await?;

    if result.rows_affected() == 0 {
        let current = load_step(pool, job_id, step_key)
            .await?
            .ok_or_else(|| Error::NotFound(format!("Step not found: {}", step_key.as_str())))?;
        return Err(Error::InvalidTransition(format!(
            "Step {} cannot move {} -> {}",
            step_key.as_str(),
            current.status.as_str(),
            new_status.as_str()
        )));
    }

    tracing::debug!(
        job_id = %job_id,
        step_key = step_key.as_str(),
        status = new_status.as_str(),
        "Step transition applied"
    );

    Ok(())
}

/// Acquire the per-job execution lease via compare-and-swap.
///
/// Succeeds for exactly one caller on a queued job (queued -> running), and
/// for a re-claim when a prior holder's lease has expired (process restart).
/// Returns false when another sequencer holds the job or the job is terminal.
pub async fn acquire_lease(
    pool: &SqlitePool,
    job_id: Uuid,
    holder: Uuid,
    ttl: Duration,
) -> Result<bool> {
    let now = Utc::now();
    let expires = (now + ttl).to_rfc3339();

    let result = sqlx::query(
        r#"
        UPDATE pipeline_jobs SET
            status = 'running',
            lease_holder = ?,
            lease_expires_at = ?
        WHERE job_id = ? AND (
            status = 'queued'
            OR (status = 'running' AND (lease_expires_at IS NULL OR lease_expires_at < ?))
        )
        "#,
    )
    .bind(holder.to_string())
    .bind(&expires)
    .bind(job_id.to_string())
    .bind(now.to_rfc3339())
    .execute(pool)
    .await?;

    let claimed = result.rows_affected() == 1;
    if claimed {
        tracing::info!(job_id = %job_id, holder = %holder, "Execution lease acquired");
    } else {
        tracing::debug!(job_id = %job_id, holder = %holder, "Execution lease not available");
    }

    Ok(claimed)
}

/// Renew the lease while advancing steps. Returns false if the holder no
/// longer owns the job (another process re-claimed an expired lease).
pub async fn renew_lease(
    pool: &SqlitePool,
    job_id: Uuid,
    holder: Uuid,
    ttl: Duration,
) -> Result<bool> {
    let expires = (Utc::now() + ttl).to_rfc3339();

    let result = sqlx::query(
        r#"
        UPDATE pipeline_jobs SET lease_expires_at = ?
        WHERE job_id = ? AND lease_holder = ? AND status = 'running'
        "#,
    )
    .bind(&expires)
    .bind(job_id.to_string())
    .bind(holder.to_string())
    .execute(pool)
    .await?;

    Ok(result.rows_affected() == 1)
}

/// Set a terminal status and stamp `completed_at`, releasing the lease.
///
/// Guarded on `status = 'running'`: finalizing a job twice, or one that never
/// started, fails with `PreconditionFailed`.
pub async fn finalize_job(
    pool: &SqlitePool,
    job_id: Uuid,
    outcome: JobStatus,
    error_message: Option<&str>,
) -> Result<()> {
    if !outcome.is_terminal() {
        return Err(Error::InvalidInput(format!(
            "Not a terminal status: {}",
            outcome.as_str()
        )));
    }

    let result = sqlx::query(
        r#"
        UPDATE pipeline_jobs SET
            status = ?,
            completed_at = ?,
            error_message = ?,
            lease_holder = NULL,
            lease_expires_at = NULL
        WHERE job_id = ? AND status = 'running'
        "#,
    )
    .bind(outcome.as_str())
    .bind(Utc::now().to_rfc3339())
    .bind(error_message)
    .bind(job_id.to_string())
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(Error::PreconditionFailed(format!(
            "Job {} is not running; cannot finalize as {}",
            job_id,
            outcome.as_str()
        )));
    }

    tracing::info!(job_id = %job_id, status = outcome.as_str(), "Job finalized");

    Ok(())
}

/// Cancel a job that no sequencer has claimed yet (queued -> cancelled CAS).
/// Returns false if the job already left the queued state.
pub async fn cancel_queued_job(pool: &SqlitePool, job_id: Uuid) -> Result<bool> {
    let result = sqlx::query(
        r#"
        UPDATE pipeline_jobs SET
            status = 'cancelled',
            completed_at = ?,
            lease_holder = NULL,
            lease_expires_at = NULL
        WHERE job_id = ? AND status = 'queued'
        "#,
    )
    .bind(Utc::now().to_rfc3339())
    .bind(job_id.to_string())
    .execute(pool)
    .await?;

    Ok(result.rows_affected() == 1)
}

/// Flag a queued or running job for cooperative cancellation. Idempotent.
pub async fn request_cancel(pool: &SqlitePool, job_id: Uuid) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE pipeline_jobs SET cancel_requested = 1
        WHERE job_id = ? AND status IN ('queued', 'running')
        "#,
    )
    .bind(job_id.to_string())
    .execute(pool)
    .await?;

    Ok(())
}

/// Whether cancellation has been requested for the job. Checked by the
/// sequencer at each step boundary so cancels raised by another process
/// still take effect.
pub async fn is_cancel_requested(pool: &SqlitePool, job_id: Uuid) -> Result<bool> {
    let flagged: Option<i64> =
        sqlx::query_scalar("SELECT cancel_requested FROM pipeline_jobs WHERE job_id = ?")
            .bind(job_id.to_string())
            .fetch_optional(pool)
            .await?;

    Ok(flagged.unwrap_or(0) != 0)
}

/// Move a failed or cancelled job back to queued for retry, clearing terminal
/// bookkeeping. The sequencer re-runs from the first non-completed step.
pub async fn reset_job_for_retry(pool: &SqlitePool, job_id: Uuid) -> Result<bool> {
    let result = sqlx::query(
        r#"
        UPDATE pipeline_jobs SET
            status = 'queued',
            error_message = NULL,
            completed_at = NULL,
            cancel_requested = 0,
            lease_holder = NULL,
            lease_expires_at = NULL
        WHERE job_id = ? AND status IN ('failed', 'cancelled')
        "#,
    )
    .bind(job_id.to_string())
    .execute(pool)
    .await?;

    Ok(result.rows_affected() == 1)
}

/// Reset failed/cancelled steps back to queued (completed steps keep their
/// results), so a retry resumes instead of re-running the whole pipeline.
///
/// Running steps are left alone: a failed or cancelled job never has one
/// (the failure path marks the step failed, the cancel path cancelled), and
/// a duplicate retry that lost the job re-queue must not touch the step the
/// winning sequencer is executing.
pub async fn reset_failed_steps(pool: &SqlitePool, job_id: Uuid) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE pipeline_job_steps SET
            status = 'queued',
            logs = NULL,
            error_message = NULL,
            started_at = NULL,
            completed_at = NULL
        WHERE job_id = ? AND status IN ('failed', 'cancelled')
        "#,
    )
    .bind(job_id.to_string())
    .execute(pool)
    .await?;

    Ok(())
}

/// Jobs left `running` with an expired (or missing) lease by a dead process,
/// plus queued jobs nobody ever claimed. Used for startup recovery.
pub async fn list_resumable_jobs(pool: &SqlitePool) -> Result<Vec<Uuid>> {
    let rows: Vec<String> = sqlx::query_scalar(
        r#"
        SELECT job_id FROM pipeline_jobs
        WHERE status = 'queued'
           OR (status = 'running' AND (lease_expires_at IS NULL OR lease_expires_at < ?))
        ORDER BY started_at
        "#,
    )
    .bind(Utc::now().to_rfc3339())
    .fetch_all(pool)
    .await?;

    rows.iter()
        .map(|s| Uuid::parse_str(s).map_err(|e| Error::Internal(format!("Bad job_id: {}", e))))
        .collect()
}
