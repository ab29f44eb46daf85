//! Quality report persistence

use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::models::QualityReport;

fn report_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<QualityReport> {
    let report_id: String = row.get("report_id");
    let job_id: String = row.get("job_id");
    let component_scores: String = row.get("component_scores");
    let pass_fail_stats: String = row.get("pass_fail_stats");
    let histogram_data: String = row.get("histogram_data");
    let report_data: String = row.get("report_data");
    let created_at: String = row.get("created_at");

    let parse = |s: &str| {
        serde_json::from_str(s).map_err(|e| Error::Internal(format!("Bad report JSON: {}", e)))
    };

    Ok(QualityReport {
        report_id: Uuid::parse_str(&report_id)
            .map_err(|e| Error::Internal(format!("Bad report_id: {}", e)))?,
        job_id: Uuid::parse_str(&job_id)
            .map_err(|e| Error::Internal(format!("Bad job_id: {}", e)))?,
        overall_score: row.get("overall_score"),
        component_scores: parse(&component_scores)?,
        pass_fail_stats: parse(&pass_fail_stats)?,
        histogram_data: parse(&histogram_data)?,
        report_data: parse(&report_data)?,
        created_at: DateTime::parse_from_rfc3339(&created_at)
            .map_err(|e| Error::Internal(format!("Bad created_at: {}", e)))?
            .with_timezone(&Utc),
    })
}

/// Insert a report unless one already exists for the job.
///
/// The UNIQUE(job_id) constraint plus DO NOTHING makes the terminal-artifact
/// trigger idempotent at the job level.
pub async fn insert_report(pool: &SqlitePool, report: &QualityReport) -> Result<bool> {
    let result = sqlx::query(
        r#"
        INSERT INTO quality_reports (
            report_id, job_id, overall_score, component_scores,
            pass_fail_stats, histogram_data, report_data, created_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT (job_id) DO NOTHING
        "#,
    )
    .bind(report.report_id.to_string())
    .bind(report.job_id.to_string())
    .bind(report.overall_score)
    .bind(report.component_scores.to_string())
    .bind(report.pass_fail_stats.to_string())
    .bind(report.histogram_data.to_string())
    .bind(report.report_data.to_string())
    .bind(report.created_at.to_rfc3339())
    .execute(pool)
    .await?;

    Ok(result.rows_affected() == 1)
}

pub async fn load_report(pool: &SqlitePool, job_id: Uuid) -> Result<Option<QualityReport>> {
    let row = sqlx::query("SELECT * FROM quality_reports WHERE job_id = ?")
        .bind(job_id.to_string())
        .fetch_optional(pool)
        .await?;

    row.as_ref().map(report_from_row).transpose()
}
