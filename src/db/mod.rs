//! Database access for medpipe
//!
//! Single SQLite database holding the job store plus the minimal collaborator
//! tables (teams, projects, uploads) needed for access checks. All timestamps
//! are stored as RFC 3339 text; settings and report payloads as JSON text.

pub mod exports;
pub mod jobs;
pub mod registry;
pub mod reports;

use anyhow::Result;
use sqlx::SqlitePool;
use std::path::Path;

/// Initialize database connection pool and bootstrap the schema
pub async fn init_database_pool(db_path: &Path) -> Result<SqlitePool> {
    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    // mode=rwc: read, write, create
    let db_url = format!("sqlite://{}?mode=rwc", db_path.display());
    tracing::debug!("Connecting to database: {}", db_url);

    let pool = SqlitePool::connect(&db_url).await?;
    init_tables(&pool).await?;

    Ok(pool)
}

/// In-memory pool for tests and ephemeral runs
pub async fn init_memory_pool() -> Result<SqlitePool> {
    let pool = SqlitePool::connect("sqlite::memory:").await?;
    init_tables(&pool).await?;
    Ok(pool)
}

/// Create tables if they don't exist
async fn init_tables(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS teams (
            team_id TEXT PRIMARY KEY,
            name TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS team_memberships (
            team_id TEXT NOT NULL REFERENCES teams(team_id),
            user_id TEXT NOT NULL,
            role TEXT NOT NULL DEFAULT 'member',
            PRIMARY KEY (team_id, user_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS projects (
            project_id TEXT PRIMARY KEY,
            team_id TEXT NOT NULL REFERENCES teams(team_id),
            name TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS uploads (
            upload_id TEXT PRIMARY KEY,
            project_id TEXT NOT NULL REFERENCES projects(project_id),
            filename TEXT NOT NULL,
            file_size INTEGER NOT NULL DEFAULT 0,
            uploaded_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS pipeline_jobs (
            job_id TEXT PRIMARY KEY,
            project_id TEXT NOT NULL REFERENCES projects(project_id),
            upload_id TEXT NOT NULL REFERENCES uploads(upload_id),
            glossary_id TEXT,
            status TEXT NOT NULL DEFAULT 'queued',
            settings TEXT NOT NULL,
            compliance_checks TEXT NOT NULL,
            started_by TEXT NOT NULL,
            error_message TEXT,
            cancel_requested INTEGER NOT NULL DEFAULT 0,
            lease_holder TEXT,
            lease_expires_at TEXT,
            started_at TEXT NOT NULL,
            completed_at TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS pipeline_job_steps (
            job_id TEXT NOT NULL REFERENCES pipeline_jobs(job_id) ON DELETE CASCADE,
            step_key TEXT NOT NULL,
            step_label TEXT NOT NULL,
            position INTEGER NOT NULL,
            status TEXT NOT NULL DEFAULT 'queued',
            logs TEXT,
            error_message TEXT,
            started_at TEXT,
            completed_at TEXT,
            PRIMARY KEY (job_id, step_key)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS quality_reports (
            report_id TEXT PRIMARY KEY,
            job_id TEXT NOT NULL UNIQUE REFERENCES pipeline_jobs(job_id),
            overall_score INTEGER NOT NULL,
            component_scores TEXT NOT NULL,
            pass_fail_stats TEXT NOT NULL,
            histogram_data TEXT NOT NULL,
            report_data TEXT NOT NULL,
            created_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS export_artifacts (
            artifact_id TEXT PRIMARY KEY,
            job_id TEXT NOT NULL REFERENCES pipeline_jobs(job_id),
            format TEXT NOT NULL,
            filename TEXT NOT NULL,
            file_size INTEGER NOT NULL,
            storage_path TEXT NOT NULL,
            download_url TEXT NOT NULL,
            created_at TEXT NOT NULL,
            UNIQUE (job_id, format)
        )
        "#,
    )
    .execute(pool)
    .await?;

    tracing::info!("Database tables initialized");

    Ok(())
}
