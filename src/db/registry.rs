//! Collaborator records: teams, memberships, projects, uploads
//!
//! Team/project CRUD and file upload mechanics live outside this service;
//! these helpers exist for the access checks the job store needs and for
//! seeding fixtures. Multi-tenant isolation is enforced by the membership
//! join in the query layer.

use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::error::{Error, Result};

/// Registered dataset upload
#[derive(Debug, Clone)]
pub struct Upload {
    pub upload_id: Uuid,
    pub project_id: Uuid,
    pub filename: String,
    pub file_size: i64,
    pub uploaded_at: DateTime<Utc>,
}

pub async fn create_team(pool: &SqlitePool, name: &str) -> Result<Uuid> {
    let team_id = Uuid::new_v4();
    sqlx::query("INSERT INTO teams (team_id, name) VALUES (?, ?)")
        .bind(team_id.to_string())
        .bind(name)
        .execute(pool)
        .await?;
    Ok(team_id)
}

pub async fn add_member(pool: &SqlitePool, team_id: Uuid, user_id: Uuid, role: &str) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO team_memberships (team_id, user_id, role) VALUES (?, ?, ?)
        ON CONFLICT (team_id, user_id) DO UPDATE SET role = excluded.role
        "#,
    )
    .bind(team_id.to_string())
    .bind(user_id.to_string())
    .bind(role)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn create_project(pool: &SqlitePool, team_id: Uuid, name: &str) -> Result<Uuid> {
    let project_id = Uuid::new_v4();
    sqlx::query("INSERT INTO projects (project_id, team_id, name) VALUES (?, ?, ?)")
        .bind(project_id.to_string())
        .bind(team_id.to_string())
        .bind(name)
        .execute(pool)
        .await?;
    Ok(project_id)
}

pub async fn register_upload(
    pool: &SqlitePool,
    project_id: Uuid,
    filename: &str,
    file_size: i64,
) -> Result<Uuid> {
    let upload_id = Uuid::new_v4();
    sqlx::query(
        r#"
        INSERT INTO uploads (upload_id, project_id, filename, file_size, uploaded_at)
        VALUES (?, ?, ?, ?, ?)
        "#,
    )
    .bind(upload_id.to_string())
    .bind(project_id.to_string())
    .bind(filename)
    .bind(file_size)
    .bind(Utc::now().to_rfc3339())
    .execute(pool)
    .await?;
    Ok(upload_id)
}

pub async fn load_upload(pool: &SqlitePool, upload_id: Uuid) -> Result<Option<Upload>> {
    let row = sqlx::query("SELECT * FROM uploads WHERE upload_id = ?")
        .bind(upload_id.to_string())
        .fetch_optional(pool)
        .await?;

    match row {
        Some(row) => {
            let upload_id: String = row.get("upload_id");
            let project_id: String = row.get("project_id");
            let uploaded_at: String = row.get("uploaded_at");
            Ok(Some(Upload {
                upload_id: Uuid::parse_str(&upload_id)
                    .map_err(|e| Error::Internal(format!("Bad upload_id: {}", e)))?,
                project_id: Uuid::parse_str(&project_id)
                    .map_err(|e| Error::Internal(format!("Bad project_id: {}", e)))?,
                filename: row.get("filename"),
                file_size: row.get("file_size"),
                uploaded_at: DateTime::parse_from_rfc3339(&uploaded_at)
                    .map_err(|e| Error::Internal(format!("Bad uploaded_at: {}", e)))?
                    .with_timezone(&Utc),
            }))
        }
        None => Ok(None),
    }
}

/// The upload must belong to the submitted project
pub async fn upload_in_project(
    pool: &SqlitePool,
    upload_id: Uuid,
    project_id: Uuid,
) -> Result<bool> {
    let count: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM uploads WHERE upload_id = ? AND project_id = ?",
    )
    .bind(upload_id.to_string())
    .bind(project_id.to_string())
    .fetch_one(pool)
    .await?;

    Ok(count > 0)
}

/// Membership check against the project's owning team
pub async fn user_has_project_access(
    pool: &SqlitePool,
    project_id: Uuid,
    user_id: Uuid,
) -> Result<bool> {
    let count: i64 = sqlx::query_scalar(
        r#"
        SELECT COUNT(*) FROM projects p
        JOIN team_memberships m ON m.team_id = p.team_id
        WHERE p.project_id = ? AND m.user_id = ?
        "#,
    )
    .bind(project_id.to_string())
    .bind(user_id.to_string())
    .fetch_one(pool)
    .await?;

    Ok(count > 0)
}
