//! Per-step execution seam
//!
//! The sequencer drives steps through a `StepExecutor` so the simulated
//! processing can be swapped for real translation/de-identification/QA
//! engines (or deterministic test doubles) without touching the lifecycle
//! logic.

use async_trait::async_trait;
use rand::Rng;
use std::time::Duration;

use crate::error::Result;
use crate::models::{PipelineJob, StepKey};

/// Executes the work behind one pipeline step and returns its log line.
#[async_trait]
pub trait StepExecutor: Send + Sync {
    async fn execute(&self, job: &PipelineJob, step: StepKey) -> Result<String>;
}

/// Reference executor: suspends for a bounded random duration in place of
/// real processing, then reports success.
pub struct SimulatedStepExecutor {
    min_delay_ms: u64,
    max_delay_ms: u64,
}

impl SimulatedStepExecutor {
    pub fn new(min_delay_ms: u64, max_delay_ms: u64) -> Self {
        Self {
            min_delay_ms,
            max_delay_ms: max_delay_ms.max(min_delay_ms),
        }
    }
}

#[async_trait]
impl StepExecutor for SimulatedStepExecutor {
    async fn execute(&self, job: &PipelineJob, step: StepKey) -> Result<String> {
        // Draw before the await; the RNG handle must not live across it
        let delay_ms = rand::thread_rng().gen_range(self.min_delay_ms..=self.max_delay_ms);

        tracing::debug!(
            job_id = %job.job_id,
            step_key = step.as_str(),
            delay_ms = delay_ms,
            "Simulating step work"
        );

        tokio::time::sleep(Duration::from_millis(delay_ms)).await;

        Ok(format!(
            "Step {} completed successfully. Processed data according to configuration.",
            step.as_str()
        ))
    }
}
