//! Quality report produced once per completed job

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

/// Synthesized quality assessment. At most one per job, created only after the
/// owning job reaches `completed`.
#[derive(Debug, Clone, Serialize)]
pub struct QualityReport {
    pub report_id: Uuid,
    pub job_id: Uuid,
    /// Overall score, 0-100
    pub overall_score: i64,
    /// Named component scores, each 0-100
    pub component_scores: serde_json::Value,
    /// Pass/warn/fail counts
    pub pass_fail_stats: serde_json::Value,
    /// Ordered score-bucket histogram
    pub histogram_data: serde_json::Value,
    /// Pipeline fingerprint and per-subsystem model versions
    pub report_data: serde_json::Value,
    pub created_at: DateTime<Utc>,
}
