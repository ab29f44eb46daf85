//! Shared test utilities: temp databases, tenant fixtures and deterministic
//! step executors.

// Not every test binary uses every helper
#![allow(dead_code)]

use async_trait::async_trait;
use serde_json::json;
use sqlx::SqlitePool;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use uuid::Uuid;

use medpipe::error::{Error, Result};
use medpipe::models::{NewJob, PipelineJob, StepKey};
use medpipe::pipeline::StepExecutor;
use medpipe::{AppConfig, AppState};

/// Temporary SQLite database with the schema applied.
///
/// The TempDir must be kept alive for the duration of the test.
pub async fn create_test_pool() -> (TempDir, SqlitePool) {
    let temp_dir = TempDir::new().expect("create temp dir");
    let db_path = temp_dir.path().join("test_medpipe.db");
    let pool = medpipe::db::init_database_pool(&db_path)
        .await
        .expect("init database");
    (temp_dir, pool)
}

/// Seeded multi-tenant fixture: one team with a member, project and upload,
/// plus an outsider who belongs to a different team.
pub struct Tenant {
    pub team_id: Uuid,
    pub user_id: Uuid,
    pub outsider_id: Uuid,
    pub project_id: Uuid,
    pub upload_id: Uuid,
    /// Upload under the outsider's project
    pub foreign_upload_id: Uuid,
}

pub async fn seed_tenant(pool: &SqlitePool) -> Tenant {
    use medpipe::db::registry;

    let team_id = registry::create_team(pool, "Radiology Lab").await.unwrap();
    let user_id = Uuid::new_v4();
    registry::add_member(pool, team_id, user_id, "owner")
        .await
        .unwrap();
    let project_id = registry::create_project(pool, team_id, "Chest CT 2025")
        .await
        .unwrap();
    let upload_id = registry::register_upload(pool, project_id, "dataset.csv", 12345)
        .await
        .unwrap();

    let other_team = registry::create_team(pool, "Other Lab").await.unwrap();
    let outsider_id = Uuid::new_v4();
    registry::add_member(pool, other_team, outsider_id, "owner")
        .await
        .unwrap();
    let foreign_project = registry::create_project(pool, other_team, "Foreign")
        .await
        .unwrap();
    let foreign_upload_id = registry::register_upload(pool, foreign_project, "foreign.csv", 1)
        .await
        .unwrap();

    Tenant {
        team_id,
        user_id,
        outsider_id,
        project_id,
        upload_id,
        foreign_upload_id,
    }
}

/// Submission payload matching the fixture
pub fn new_job(tenant: &Tenant) -> NewJob {
    NewJob {
        project_id: tenant.project_id,
        upload_id: tenant.upload_id,
        glossary_id: None,
        settings: json!({ "glossaryEnabled": true, "deidLevel": 70 }),
        compliance_checks: json!({ "agreePolicy": true, "agreePHI": true, "agreeDPA": true }),
        started_by: tenant.user_id,
    }
}

/// Zero-delay configuration for fast sequencer runs
pub fn test_config() -> AppConfig {
    let mut config = AppConfig::default();
    config.pipeline.step_delay_min_ms = 0;
    config.pipeline.step_delay_max_ms = 0;
    config.polling.interval_ms = 20;
    config
}

pub fn test_state(pool: SqlitePool, executor: Arc<dyn StepExecutor>) -> AppState {
    AppState::with_executor(pool, test_config(), executor)
}

/// Completes every step immediately
pub struct InstantExecutor;

#[async_trait]
impl StepExecutor for InstantExecutor {
    async fn execute(&self, _job: &PipelineJob, step: StepKey) -> Result<String> {
        Ok(format!("Step {} completed successfully.", step.as_str()))
    }
}

/// Fails on one configured step, succeeds on the rest
pub struct FailingExecutor {
    pub fail_on: StepKey,
}

#[async_trait]
impl StepExecutor for FailingExecutor {
    async fn execute(&self, _job: &PipelineJob, step: StepKey) -> Result<String> {
        if step == self.fail_on {
            Err(Error::StepFailed(format!(
                "simulated failure in {}",
                step.as_str()
            )))
        } else {
            Ok(format!("Step {} completed successfully.", step.as_str()))
        }
    }
}

/// Records the order steps were executed in
pub struct RecordingExecutor {
    pub order: Arc<Mutex<Vec<StepKey>>>,
}

impl RecordingExecutor {
    pub fn new() -> (Self, Arc<Mutex<Vec<StepKey>>>) {
        let order = Arc::new(Mutex::new(Vec::new()));
        (
            Self {
                order: Arc::clone(&order),
            },
            order,
        )
    }
}

#[async_trait]
impl StepExecutor for RecordingExecutor {
    async fn execute(&self, _job: &PipelineJob, step: StepKey) -> Result<String> {
        self.order.lock().unwrap().push(step);
        Ok(format!("Step {} completed successfully.", step.as_str()))
    }
}

/// Hangs long enough for a cancellation to land mid-step
pub struct BlockingExecutor {
    pub delay: Duration,
}

#[async_trait]
impl StepExecutor for BlockingExecutor {
    async fn execute(&self, _job: &PipelineJob, step: StepKey) -> Result<String> {
        tokio::time::sleep(self.delay).await;
        Ok(format!("Step {} completed successfully.", step.as_str()))
    }
}
