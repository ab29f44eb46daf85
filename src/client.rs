//! Status polling client
//!
//! The dashboard synchronizes with the server purely by re-reading job
//! status on a fixed interval. A single failed poll is transient (retried on
//! the next tick); polling stops the instant a terminal status is observed.

use std::time::Duration;

use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::models::{JobStatus, StepStatus};

/// Polling discipline
#[derive(Debug, Clone)]
pub struct PollerConfig {
    pub interval_ms: u64,
    /// Always true in practice; kept as a knob for completeness
    pub stop_on_terminal: bool,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            interval_ms: 2000,
            stop_on_terminal: true,
        }
    }
}

/// Job fields the poller cares about; the rest of the payload is ignored
#[derive(Debug, Clone, Deserialize)]
pub struct JobView {
    pub job_id: Uuid,
    pub status: JobStatus,
    #[serde(default)]
    pub error_message: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StepView {
    pub step_key: String,
    pub status: StepStatus,
}

/// One observed status snapshot
#[derive(Debug, Clone, Deserialize)]
pub struct StatusSnapshot {
    pub job: JobView,
    pub steps: Vec<StepView>,
}

/// Periodic, read-only status poller
pub struct StatusPoller {
    http: reqwest::Client,
    base_url: String,
    user_id: Uuid,
    config: PollerConfig,
}

impl StatusPoller {
    pub fn new(base_url: impl Into<String>, user_id: Uuid, config: PollerConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
            user_id,
            config,
        }
    }

    /// Single status fetch
    pub async fn fetch(&self, job_id: Uuid) -> Result<StatusSnapshot> {
        let url = format!("{}/api/pipeline/{}/status", self.base_url, job_id);

        let response = self
            .http
            .get(&url)
            .header("x-user-id", self.user_id.to_string())
            .send()
            .await
            .map_err(|e| Error::Internal(format!("Status request failed: {}", e)))?
            .error_for_status()
            .map_err(|e| Error::Internal(format!("Status request failed: {}", e)))?;

        response
            .json::<StatusSnapshot>()
            .await
            .map_err(|e| Error::Internal(format!("Bad status payload: {}", e)))
    }

    /// Poll on the fixed interval until a terminal status is observed or the
    /// token is cancelled (UI teardown). Returns `None` on cancellation.
    pub async fn poll_until_terminal(
        &self,
        job_id: Uuid,
        cancel: CancellationToken,
    ) -> Result<Option<StatusSnapshot>> {
        let interval = Duration::from_millis(self.config.interval_ms.max(1));

        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = cancel.cancelled() => {
                    tracing::debug!(job_id = %job_id, "Polling cancelled");
                    return Ok(None);
                }
            }

            match self.fetch(job_id).await {
                Ok(snapshot) => {
                    tracing::debug!(
                        job_id = %job_id,
                        status = snapshot.job.status.as_str(),
                        "Poll observed status"
                    );

                    if self.config.stop_on_terminal && snapshot.job.status.is_terminal() {
                        return Ok(Some(snapshot));
                    }
                }
                Err(e) => {
                    // Transient: keep the interval and try again
                    tracing::warn!(job_id = %job_id, error = %e, "Poll failed, will retry");
                }
            }
        }
    }
}
