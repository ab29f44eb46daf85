//! Export artifact descriptors

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, Result};

/// Supported export formats. Each format may exist at most once per job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    Coco,
    Yolo,
    Jsonl,
}

/// All supported formats, in the order the dashboard offers them
pub const ALL_FORMATS: [ExportFormat; 3] =
    [ExportFormat::Coco, ExportFormat::Yolo, ExportFormat::Jsonl];

impl ExportFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExportFormat::Coco => "coco",
            ExportFormat::Yolo => "yolo",
            ExportFormat::Jsonl => "jsonl",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "coco" => Ok(ExportFormat::Coco),
            "yolo" => Ok(ExportFormat::Yolo),
            "jsonl" => Ok(ExportFormat::Jsonl),
            other => Err(Error::InvalidInput(format!(
                "Unknown export format: {}",
                other
            ))),
        }
    }
}

/// One generated output file descriptor, unique per (job, format)
#[derive(Debug, Clone, Serialize)]
pub struct ExportArtifact {
    pub artifact_id: Uuid,
    pub job_id: Uuid,
    pub format: ExportFormat,
    pub filename: String,
    pub file_size: i64,
    pub storage_path: String,
    pub download_url: String,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_round_trips() {
        for format in ALL_FORMATS {
            assert_eq!(ExportFormat::parse(format.as_str()).unwrap(), format);
        }
        assert!(ExportFormat::parse("parquet").is_err());
    }
}
