//! Export artifact persistence

use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::models::{ExportArtifact, ExportFormat};

fn artifact_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<ExportArtifact> {
    let artifact_id: String = row.get("artifact_id");
    let job_id: String = row.get("job_id");
    let format: String = row.get("format");
    let created_at: String = row.get("created_at");

    Ok(ExportArtifact {
        artifact_id: Uuid::parse_str(&artifact_id)
            .map_err(|e| Error::Internal(format!("Bad artifact_id: {}", e)))?,
        job_id: Uuid::parse_str(&job_id)
            .map_err(|e| Error::Internal(format!("Bad job_id: {}", e)))?,
        format: ExportFormat::parse(&format)?,
        filename: row.get("filename"),
        file_size: row.get("file_size"),
        storage_path: row.get("storage_path"),
        download_url: row.get("download_url"),
        created_at: DateTime::parse_from_rfc3339(&created_at)
            .map_err(|e| Error::Internal(format!("Bad created_at: {}", e)))?
            .with_timezone(&Utc),
    })
}

/// Insert an artifact unless that (job, format) pair already exists.
/// Returns true if a row was created.
pub async fn insert_artifact(pool: &SqlitePool, artifact: &ExportArtifact) -> Result<bool> {
    let result = sqlx::query(
        r#"
        INSERT INTO export_artifacts (
            artifact_id, job_id, format, filename, file_size,
            storage_path, download_url, created_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT (job_id, format) DO NOTHING
        "#,
    )
    .bind(artifact.artifact_id.to_string())
    .bind(artifact.job_id.to_string())
    .bind(artifact.format.as_str())
    .bind(&artifact.filename)
    .bind(artifact.file_size)
    .bind(&artifact.storage_path)
    .bind(&artifact.download_url)
    .bind(artifact.created_at.to_rfc3339())
    .execute(pool)
    .await?;

    Ok(result.rows_affected() == 1)
}

/// All artifacts for a job, in the order formats were created
pub async fn list_artifacts(pool: &SqlitePool, job_id: Uuid) -> Result<Vec<ExportArtifact>> {
    let rows = sqlx::query(
        "SELECT * FROM export_artifacts WHERE job_id = ? ORDER BY created_at, format",
    )
    .bind(job_id.to_string())
    .fetch_all(pool)
    .await?;

    rows.iter().map(artifact_from_row).collect()
}

pub async fn load_artifact(
    pool: &SqlitePool,
    job_id: Uuid,
    format: ExportFormat,
) -> Result<Option<ExportArtifact>> {
    let row = sqlx::query("SELECT * FROM export_artifacts WHERE job_id = ? AND format = ?")
        .bind(job_id.to_string())
        .bind(format.as_str())
        .fetch_optional(pool)
        .await?;

    row.as_ref().map(artifact_from_row).transpose()
}
