//! Terminal artifact producers
//!
//! Fired once when a job reaches `completed`: one quality report synthesis
//! and one export-artifact synthesis per requested format. Both are
//! idempotent at the job level (UNIQUE constraints + conflict-ignoring
//! inserts), so a duplicate trigger never creates duplicate records. The
//! numeric content is placeholder data; real scoring and format conversion
//! would slot in behind the same functions.

use chrono::Utc;
use rand::Rng;
use serde_json::json;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::db;
use crate::error::{Error, Result};
use crate::models::{ExportArtifact, ExportFormat, PipelineJob, QualityReport};

/// Produce the quality report and the default export set for a completed job.
pub async fn produce_terminal_artifacts(
    pool: &SqlitePool,
    job: &PipelineJob,
    formats: &[ExportFormat],
) -> Result<()> {
    synthesize_quality_report(pool, job.job_id).await?;
    synthesize_exports(pool, job, formats).await?;
    Ok(())
}

/// Create the job's quality report if it doesn't exist yet.
pub async fn synthesize_quality_report(pool: &SqlitePool, job_id: Uuid) -> Result<QualityReport> {
    let report = build_report(job_id);

    let created = db::reports::insert_report(pool, &report).await?;
    if !created {
        tracing::debug!(job_id = %job_id, "Quality report already exists, keeping it");
        return db::reports::load_report(pool, job_id)
            .await?
            .ok_or_else(|| Error::Internal("Quality report vanished after insert".to_string()));
    }

    tracing::info!(
        job_id = %job_id,
        overall_score = report.overall_score,
        "Quality report synthesized"
    );

    Ok(report)
}

fn build_report(job_id: Uuid) -> QualityReport {
    let mut rng = rand::thread_rng();

    QualityReport {
        report_id: Uuid::new_v4(),
        job_id,
        overall_score: rng.gen_range(75..95),
        component_scores: json!({
            "term_consistency": rng.gen_range(70..95),
            "glossary_adherence": rng.gen_range(80..95),
            "label_text_alignment": rng.gen_range(65..95),
            "fluency": rng.gen_range(85..95),
        }),
        pass_fail_stats: json!({
            "pass": rng.gen_range(60..80),
            "warn": rng.gen_range(15..30),
            "fail": rng.gen_range(5..20),
        }),
        histogram_data: json!([
            { "bucket": "0-20", "count": rng.gen_range(0..5) },
            { "bucket": "20-40", "count": rng.gen_range(5..15) },
            { "bucket": "40-60", "count": rng.gen_range(15..30) },
            { "bucket": "60-80", "count": rng.gen_range(30..50) },
            { "bucket": "80-100", "count": rng.gen_range(20..35) },
        ]),
        report_data: json!({
            "pipeline_hash": format!("{:032x}", rng.gen::<u128>()),
            "model_versions": {
                "translator": "qwen3-7b-instruct",
                "deid": "phi-detector-v2.1",
                "qa": "medical-qa-scorer-v1.3",
            },
        }),
        created_at: Utc::now(),
    }
}

/// Create any missing artifacts for the requested formats and return the
/// artifacts for exactly those formats. Per-(job, format) uniqueness makes
/// repeated calls return the same set.
pub async fn synthesize_exports(
    pool: &SqlitePool,
    job: &PipelineJob,
    formats: &[ExportFormat],
) -> Result<Vec<ExportArtifact>> {
    let upload = db::registry::load_upload(pool, job.upload_id)
        .await?
        .ok_or_else(|| Error::NotFound(format!("Upload not found: {}", job.upload_id)))?;
    let stem = upload
        .filename
        .rsplit_once('.')
        .map(|(stem, _ext)| stem)
        .unwrap_or(&upload.filename)
        .to_string();

    let mut artifacts = Vec::with_capacity(formats.len());

    for format in formats {
        let file_size = rand::thread_rng().gen_range(1_000_000..6_000_000);
        let candidate = ExportArtifact {
            artifact_id: Uuid::new_v4(),
            job_id: job.job_id,
            format: *format,
            filename: format!("{}_{}.zip", stem, format.as_str()),
            file_size,
            storage_path: format!("exports/{}/{}.zip", job.job_id, format.as_str()),
            download_url: format!("/api/exports/{}/{}/download", job.job_id, format.as_str()),
            created_at: Utc::now(),
        };

        let created = db::exports::insert_artifact(pool, &candidate).await?;
        if created {
            tracing::info!(
                job_id = %job.job_id,
                format = format.as_str(),
                filename = %candidate.filename,
                "Export artifact synthesized"
            );
            artifacts.push(candidate);
        } else {
            let existing = db::exports::load_artifact(pool, job.job_id, *format)
                .await?
                .ok_or_else(|| {
                    Error::Internal("Export artifact vanished after insert".to_string())
                })?;
            artifacts.push(existing);
        }
    }

    Ok(artifacts)
}

/// Render the placeholder export payload served by the download endpoint.
pub fn render_export_payload(artifact: &ExportArtifact) -> Vec<u8> {
    match artifact.format {
        ExportFormat::Coco => serde_json::to_vec_pretty(&json!({
            "info": {
                "description": format!("COCO export - {}", artifact.filename),
                "version": "1.0",
                "date_created": artifact.created_at.to_rfc3339(),
            },
            "licenses": [{ "id": 1, "name": "Research Use Only" }],
            "images": [{
                "id": 1,
                "width": 512,
                "height": 512,
                "file_name": "sample_001.jpg",
                "license": 1,
            }],
            "annotations": [{
                "id": 1,
                "image_id": 1,
                "category_id": 1,
                "bbox": [100, 100, 200, 150],
                "area": 30000,
                "iscrowd": 0,
            }],
            "categories": [{
                "id": 1,
                "name": "medical_condition",
                "supercategory": "medical",
            }],
        }))
        .unwrap_or_default(),
        ExportFormat::Yolo => format!(
            "# YOLO export\n\
             # Generated: {}\n\
             # Classes: medical_condition, anatomy, procedure\n\n\
             train: ./train/images\n\
             val: ./val/images\n\
             test: ./test/images\n\n\
             names:\n  0: medical_condition\n  1: anatomy\n  2: procedure\n",
            artifact.created_at.to_rfc3339()
        )
        .into_bytes(),
        ExportFormat::Jsonl => {
            let records = [
                json!({
                    "id": "001",
                    "text_ko": "복통과 구토로 내원한 35세 여성 환자",
                    "text_en": "35-year-old female patient presenting with abdominal pain and vomiting",
                    "label": "GI/abdomen",
                    "confidence": 0.95,
                }),
                json!({
                    "id": "002",
                    "text_ko": "흉통을 호소하는 45세 남성",
                    "text_en": "45-year-old male complaining of chest pain",
                    "label": "cardio/chest",
                    "confidence": 0.92,
                }),
            ];
            let mut out = Vec::new();
            for record in &records {
                out.extend_from_slice(record.to_string().as_bytes());
                out.push(b'\n');
            }
            out
        }
    }
}

/// Render the quality report as a downloadable document.
pub fn render_report_document(job: &PipelineJob, report: &QualityReport) -> Vec<u8> {
    serde_json::to_vec_pretty(&json!({
        "title": "Quality Assessment Report",
        "job_id": job.job_id,
        "project_id": job.project_id,
        "generated_at": Utc::now().to_rfc3339(),
        "overall_score": report.overall_score,
        "component_scores": report.component_scores,
        "pass_fail_stats": report.pass_fail_stats,
        "histogram_data": report.histogram_data,
        "report_data": report.report_data,
    }))
    .unwrap_or_default()
}
