//! medpipe - pipeline job lifecycle service
//!
//! Backend for the medical data pipeline dashboard: teams submit processing
//! jobs over uploaded datasets, a detached sequencer advances each job
//! through its fixed 8-step pipeline, and the dashboard polls job status
//! until it observes a terminal state. Completed jobs get a synthesized
//! quality report and downloadable export artifacts.

pub mod api;
pub mod client;
pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod pipeline;

pub use crate::config::AppConfig;
pub use crate::error::{ApiError, ApiResult, Error, Result};

use axum::Router;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::pipeline::{SimulatedStepExecutor, StepExecutor, StepSequencer};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    /// Database connection pool: the single source of truth
    pub db: SqlitePool,
    pub config: Arc<AppConfig>,
    /// Per-step work implementation; swapped for deterministic executors in tests
    pub executor: Arc<dyn StepExecutor>,
    /// Lease-holder identity of this process
    pub holder_id: Uuid,
    /// Cancellation tokens for sequencers running in this process
    cancel_tokens: Arc<RwLock<HashMap<Uuid, CancellationToken>>>,
    pub startup_time: DateTime<Utc>,
}

impl AppState {
    pub fn new(db: SqlitePool, config: AppConfig) -> Self {
        let executor = Arc::new(SimulatedStepExecutor::new(
            config.pipeline.step_delay_min_ms,
            config.pipeline.step_delay_max_ms,
        ));
        Self::with_executor(db, config, executor)
    }

    pub fn with_executor(
        db: SqlitePool,
        config: AppConfig,
        executor: Arc<dyn StepExecutor>,
    ) -> Self {
        Self {
            db,
            config: Arc::new(config),
            executor,
            holder_id: Uuid::new_v4(),
            cancel_tokens: Arc::new(RwLock::new(HashMap::new())),
            startup_time: Utc::now(),
        }
    }

    fn sequencer(&self) -> StepSequencer {
        let formats = self
            .config
            .default_export_formats()
            .unwrap_or_else(|_| crate::models::ALL_FORMATS.to_vec());
        StepSequencer::new(
            self.db.clone(),
            Arc::clone(&self.executor),
            self.holder_id,
            self.config.pipeline.lease_ttl_secs,
            formats,
        )
    }

    /// Detach a sequencer task for the job. The submission request returns
    /// immediately; failures inside the task are recorded on the job record,
    /// not surfaced to any caller.
    pub async fn spawn_sequencer(&self, job_id: Uuid) {
        let sequencer = self.sequencer();
        let tokens = Arc::clone(&self.cancel_tokens);
        let token = CancellationToken::new();

        // Register before spawning so a cancel arriving right after the
        // submission response still finds the token
        tokens.write().await.insert(job_id, token.clone());

        tokio::spawn(async move {
            tracing::info!(job_id = %job_id, "Background sequencer task started");

            if let Err(e) = sequencer.run(job_id, token).await {
                tracing::error!(job_id = %job_id, error = %e, "Sequencer task failed");
            } else {
                tracing::info!(job_id = %job_id, "Background sequencer task finished");
            }

            tokens.write().await.remove(&job_id);
        });
    }

    /// Signal this process's sequencer for the job, if one is running
    pub async fn signal_cancel(&self, job_id: Uuid) {
        if let Some(token) = self.cancel_tokens.read().await.get(&job_id) {
            token.cancel();
        }
    }

    /// Startup recovery: re-spawn sequencers for queued jobs nobody claimed
    /// and running jobs whose lease expired with a dead process.
    pub async fn resume_orphaned_jobs(&self) -> Result<()> {
        let job_ids = db::jobs::list_resumable_jobs(&self.db).await?;

        for job_id in job_ids {
            tracing::info!(job_id = %job_id, "Resuming orphaned job");
            self.spawn_sequencer(job_id).await;
        }

        Ok(())
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .merge(api::pipeline_routes())
        .merge(api::export_routes())
        .merge(api::report_routes())
        .merge(api::health_routes())
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(state)
}
