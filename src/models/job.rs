//! Pipeline job state machine
//!
//! A job progresses queued → running → (completed | failed | cancelled), never
//! backwards. Each job owns a fixed sequence of 8 steps; the first (`register`)
//! is completed synchronously with job creation, the remaining 7 are driven by
//! the step sequencer strictly in order.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, Result};

/// Job-level status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    /// Created, waiting for a sequencer to claim the execution lease
    Queued,
    /// A sequencer holds the lease and is advancing steps
    Running,
    /// All steps completed; terminal
    Completed,
    /// A step failed; terminal
    Failed,
    /// Cancelled by the user; terminal
    Cancelled,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "queued" => Ok(JobStatus::Queued),
            "running" => Ok(JobStatus::Running),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            "cancelled" => Ok(JobStatus::Cancelled),
            other => Err(Error::Internal(format!("Unknown job status: {}", other))),
        }
    }

    /// Terminal states accept no further transitions
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }
}

/// Step-level status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    Queued,
    Running,
    Completed,
    Failed,
    /// In-flight step abandoned at cancellation
    Cancelled,
}

impl StepStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepStatus::Queued => "queued",
            StepStatus::Running => "running",
            StepStatus::Completed => "completed",
            StepStatus::Failed => "failed",
            StepStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "queued" => Ok(StepStatus::Queued),
            "running" => Ok(StepStatus::Running),
            "completed" => Ok(StepStatus::Completed),
            "failed" => Ok(StepStatus::Failed),
            "cancelled" => Ok(StepStatus::Cancelled),
            other => Err(Error::Internal(format!("Unknown step status: {}", other))),
        }
    }

    /// Statuses a step is allowed to be in when transitioning to `target`.
    ///
    /// Including `target` itself makes re-applying a transition a no-op rather
    /// than an error; everything else is a monotonicity violation.
    pub fn allowed_predecessors(target: StepStatus) -> &'static [StepStatus] {
        match target {
            StepStatus::Queued => &[StepStatus::Queued],
            StepStatus::Running => &[StepStatus::Queued, StepStatus::Running],
            StepStatus::Completed => &[StepStatus::Running, StepStatus::Completed],
            StepStatus::Failed => &[StepStatus::Running, StepStatus::Failed],
            StepStatus::Cancelled => &[
                StepStatus::Queued,
                StepStatus::Running,
                StepStatus::Cancelled,
            ],
        }
    }
}

/// Identifier of one fixed pipeline stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepKey {
    Register,
    Schema,
    Glossary,
    Translate,
    Deid,
    Qa,
    Format,
    Report,
}

/// All 8 steps in pipeline order. `register` is pre-completed at creation.
pub const PIPELINE_STEPS: [StepKey; 8] = [
    StepKey::Register,
    StepKey::Schema,
    StepKey::Glossary,
    StepKey::Translate,
    StepKey::Deid,
    StepKey::Qa,
    StepKey::Format,
    StepKey::Report,
];

/// The 7 steps the sequencer actually executes
pub const EXECUTABLE_STEPS: [StepKey; 7] = [
    StepKey::Schema,
    StepKey::Glossary,
    StepKey::Translate,
    StepKey::Deid,
    StepKey::Qa,
    StepKey::Format,
    StepKey::Report,
];

impl StepKey {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepKey::Register => "register",
            StepKey::Schema => "schema",
            StepKey::Glossary => "glossary",
            StepKey::Translate => "translate",
            StepKey::Deid => "deid",
            StepKey::Qa => "qa",
            StepKey::Format => "format",
            StepKey::Report => "report",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "register" => Ok(StepKey::Register),
            "schema" => Ok(StepKey::Schema),
            "glossary" => Ok(StepKey::Glossary),
            "translate" => Ok(StepKey::Translate),
            "deid" => Ok(StepKey::Deid),
            "qa" => Ok(StepKey::Qa),
            "format" => Ok(StepKey::Format),
            "report" => Ok(StepKey::Report),
            other => Err(Error::Internal(format!("Unknown step key: {}", other))),
        }
    }

    /// Human-readable label shown in the dashboard
    pub fn label(&self) -> &'static str {
        match self {
            StepKey::Register => "Upload Registered",
            StepKey::Schema => "Schema Detection",
            StepKey::Glossary => "Glossary Application",
            StepKey::Translate => "Translation",
            StepKey::Deid => "De-identification",
            StepKey::Qa => "Quality Assessment",
            StepKey::Format => "Format Conversion",
            StepKey::Report => "Report Generation",
        }
    }

    /// Position within the fixed pipeline order (0-based)
    pub fn position(&self) -> i64 {
        PIPELINE_STEPS
            .iter()
            .position(|k| k == self)
            .map(|p| p as i64)
            .unwrap_or(0)
    }
}

/// One pipeline run over one uploaded dataset
#[derive(Debug, Clone, Serialize)]
pub struct PipelineJob {
    pub job_id: Uuid,
    pub project_id: Uuid,
    pub upload_id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub glossary_id: Option<Uuid>,
    pub status: JobStatus,
    /// Free-form configuration, echoed back but not interpreted here
    pub settings: serde_json::Value,
    /// Boolean attestations captured at submission time
    pub compliance_checks: serde_json::Value,
    pub started_by: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    /// Execution lease, internal to the sequencer
    #[serde(skip_serializing)]
    pub lease_holder: Option<Uuid>,
    #[serde(skip_serializing)]
    pub lease_expires_at: Option<DateTime<Utc>>,
}

/// One named stage within a job's fixed pipeline
#[derive(Debug, Clone, Serialize)]
pub struct PipelineStep {
    pub job_id: Uuid,
    pub step_key: StepKey,
    pub step_label: String,
    pub position: i64,
    pub status: StepStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logs: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

/// Validated submission payload for a new pipeline run
#[derive(Debug, Clone)]
pub struct NewJob {
    pub project_id: Uuid,
    pub upload_id: Uuid,
    pub glossary_id: Option<Uuid>,
    pub settings: serde_json::Value,
    pub compliance_checks: serde_json::Value,
    pub started_by: Uuid,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pipeline_order_is_fixed() {
        assert_eq!(PIPELINE_STEPS.len(), 8);
        assert_eq!(PIPELINE_STEPS[0], StepKey::Register);
        assert_eq!(PIPELINE_STEPS[7], StepKey::Report);
        assert_eq!(EXECUTABLE_STEPS.len(), 7);
        // Executable steps are the pipeline minus register, same order
        for (i, key) in EXECUTABLE_STEPS.iter().enumerate() {
            assert_eq!(*key, PIPELINE_STEPS[i + 1]);
        }
    }

    #[test]
    fn step_positions_match_order() {
        for (i, key) in PIPELINE_STEPS.iter().enumerate() {
            assert_eq!(key.position(), i as i64);
        }
    }

    #[test]
    fn status_round_trips_through_text() {
        for status in [
            JobStatus::Queued,
            JobStatus::Running,
            JobStatus::Completed,
            JobStatus::Failed,
            JobStatus::Cancelled,
        ] {
            assert_eq!(JobStatus::parse(status.as_str()).unwrap(), status);
        }
        assert!(JobStatus::parse("paused").is_err());
    }

    #[test]
    fn terminal_statuses() {
        assert!(!JobStatus::Queued.is_terminal());
        assert!(!JobStatus::Running.is_terminal());
        assert!(JobStatus::Completed.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
        assert!(JobStatus::Cancelled.is_terminal());
    }

    #[test]
    fn completed_step_cannot_regress() {
        let allowed = StepStatus::allowed_predecessors(StepStatus::Running);
        assert!(!allowed.contains(&StepStatus::Completed));
        assert!(!allowed.contains(&StepStatus::Failed));
        // Re-applying the current status is always permitted
        assert!(StepStatus::allowed_predecessors(StepStatus::Completed)
            .contains(&StepStatus::Completed));
    }
}
