//! Step sequencer: drives a queued job to a terminal state
//!
//! Exactly one sequencer may advance a given job at a time. The guarantee
//! comes from the persisted execution lease: a compare-and-swap moves the job
//! queued -> running for one caller only, and the lease is renewed at each
//! step boundary. A second invocation (duplicate submission, retry race,
//! process restart while the holder is alive) acquires nothing and returns
//! without touching the job. A restart after the holder died re-claims the
//! expired lease and resumes from the first non-completed step.

use chrono::Duration;
use sqlx::SqlitePool;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::db;
use crate::error::{Error, Result};
use crate::models::{ExportFormat, JobStatus, PipelineJob, StepStatus};
use crate::pipeline::{artifacts, StepExecutor};

pub struct StepSequencer {
    db: SqlitePool,
    executor: Arc<dyn StepExecutor>,
    /// Identity of this process for lease ownership
    holder_id: Uuid,
    lease_ttl: Duration,
    /// Formats synthesized automatically after completion
    default_formats: Vec<ExportFormat>,
}

impl StepSequencer {
    pub fn new(
        db: SqlitePool,
        executor: Arc<dyn StepExecutor>,
        holder_id: Uuid,
        lease_ttl_secs: i64,
        default_formats: Vec<ExportFormat>,
    ) -> Self {
        Self {
            db,
            executor,
            holder_id,
            lease_ttl: Duration::seconds(lease_ttl_secs),
            default_formats,
        }
    }

    /// Advance the job through its remaining steps and finalize it.
    ///
    /// Safe to invoke for a job in any state: without the lease this is a
    /// no-op. Step failures and cancellation are recorded on the job, not
    /// returned as errors; the Err path covers store failures only.
    pub async fn run(&self, job_id: Uuid, cancel: CancellationToken) -> Result<()> {
        let claimed =
            db::jobs::acquire_lease(&self.db, job_id, self.holder_id, self.lease_ttl).await?;
        if !claimed {
            tracing::debug!(
                job_id = %job_id,
                holder = %self.holder_id,
                "Sequencer not started: lease unavailable"
            );
            return Ok(());
        }

        let job = db::jobs::load_job(&self.db, job_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("Job not found: {}", job_id)))?;

        tracing::info!(job_id = %job_id, "Sequencer started");

        // Completed steps are skipped so a retry or restart resumes in place
        let steps = db::jobs::list_steps(&self.db, job_id).await?;
        for step in steps.iter().filter(|s| s.status != StepStatus::Completed) {
            if self.cancellation_pending(&job, &cancel).await? {
                db::jobs::finalize_job(&self.db, job_id, JobStatus::Cancelled, None).await?;
                tracing::info!(job_id = %job_id, "Job cancelled at step boundary");
                return Ok(());
            }

            if !db::jobs::renew_lease(&self.db, job_id, self.holder_id, self.lease_ttl).await? {
                tracing::warn!(
                    job_id = %job_id,
                    holder = %self.holder_id,
                    "Lease lost, stopping advancement"
                );
                return Ok(());
            }

            db::jobs::advance_step(&self.db, job_id, step.step_key, StepStatus::Running, None, None)
                .await?;

            tracing::info!(
                job_id = %job_id,
                step_key = step.step_key.as_str(),
                position = step.position,
                "Step running"
            );

            let outcome = tokio::select! {
                result = self.executor.execute(&job, step.step_key) => result,
                _ = cancel.cancelled() => {
                    db::jobs::advance_step(
                        &self.db,
                        job_id,
                        step.step_key,
                        StepStatus::Cancelled,
                        None,
                        Some("Cancelled by user"),
                    )
                    .await?;
                    db::jobs::finalize_job(&self.db, job_id, JobStatus::Cancelled, None).await?;
                    tracing::info!(
                        job_id = %job_id,
                        step_key = step.step_key.as_str(),
                        "Job cancelled mid-step"
                    );
                    return Ok(());
                }
            };

            match outcome {
                Ok(logs) => {
                    db::jobs::advance_step(
                        &self.db,
                        job_id,
                        step.step_key,
                        StepStatus::Completed,
                        Some(&logs),
                        None,
                    )
                    .await?;
                }
                Err(e) => {
                    let message = e.to_string();
                    tracing::warn!(
                        job_id = %job_id,
                        step_key = step.step_key.as_str(),
                        error = %message,
                        "Step failed, stopping advancement"
                    );
                    db::jobs::advance_step(
                        &self.db,
                        job_id,
                        step.step_key,
                        StepStatus::Failed,
                        None,
                        Some(&message),
                    )
                    .await?;
                    db::jobs::finalize_job(&self.db, job_id, JobStatus::Failed, Some(&message))
                        .await?;
                    return Ok(());
                }
            }
        }

        db::jobs::finalize_job(&self.db, job_id, JobStatus::Completed, None).await?;
        tracing::info!(job_id = %job_id, "All steps completed");

        // Terminal artifacts fire once; the inserts are conflict-ignoring so
        // a duplicate trigger cannot create duplicates
        artifacts::produce_terminal_artifacts(&self.db, &job, &self.default_formats).await?;

        Ok(())
    }

    /// Cancellation can arrive through this process's token or, from another
    /// process, through the persisted flag.
    async fn cancellation_pending(
        &self,
        job: &PipelineJob,
        cancel: &CancellationToken,
    ) -> Result<bool> {
        if cancel.is_cancelled() {
            return Ok(true);
        }
        db::jobs::is_cancel_requested(&self.db, job.job_id).await
    }
}
