//! Data model for pipeline jobs, steps, quality reports and export artifacts

pub mod export;
pub mod job;
pub mod report;

pub use export::{ExportArtifact, ExportFormat, ALL_FORMATS};
pub use job::{
    JobStatus, NewJob, PipelineJob, PipelineStep, StepKey, StepStatus, EXECUTABLE_STEPS,
    PIPELINE_STEPS,
};
pub use report::QualityReport;
