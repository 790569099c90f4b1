use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use super::RemediationStrategy;
use crate::classifier::{FailureCategory, StrategyKind};
use crate::clock::{Clock, Deadline, with_deadline};
use crate::collaborators::{JobStore, WorkerManager};
use crate::error::HealdecError;
use crate::state_machine::{HealingAttempt, Job};

/// Configuration for worker restarts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestartConfig {
    #[serde(default = "default_max_restarts")]
    pub max_restarts: u32,
    /// Pause between stopping the old worker and starting the new one.
    #[serde(default = "default_restart_cooldown_ms")]
    pub restart_cooldown_ms: u64,
    #[serde(default = "default_graceful_shutdown_timeout_ms")]
    pub graceful_shutdown_timeout_ms: u64,
}

fn default_max_restarts() -> u32 {
    3
}

fn default_restart_cooldown_ms() -> u64 {
    5000
}

fn default_graceful_shutdown_timeout_ms() -> u64 {
    10_000
}

impl Default for RestartConfig {
    fn default() -> Self {
        Self {
            max_restarts: default_max_restarts(),
            restart_cooldown_ms: default_restart_cooldown_ms(),
            graceful_shutdown_timeout_ms: default_graceful_shutdown_timeout_ms(),
        }
    }
}

impl RestartConfig {
    pub fn apply(&mut self, patch: &RestartConfigPatch) {
        if let Some(max_restarts) = patch.max_restarts {
            self.max_restarts = max_restarts;
        }
        if let Some(cooldown) = patch.restart_cooldown_ms {
            self.restart_cooldown_ms = cooldown;
        }
        if let Some(timeout) = patch.graceful_shutdown_timeout_ms {
            self.graceful_shutdown_timeout_ms = timeout;
        }
    }
}

/// Partial update of [`RestartConfig`]; `None` fields keep their value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestartConfigPatch {
    pub max_restarts: Option<u32>,
    pub restart_cooldown_ms: Option<u64>,
    pub graceful_shutdown_timeout_ms: Option<u64>,
}

/// Handles worker crashes: stop the worker (gracefully, then by force), wait
/// out the cooldown, start a fresh instance and hand the job back to it.
pub struct RestartStrategy {
    config: RwLock<RestartConfig>,
    workers: Arc<dyn WorkerManager>,
    store: Arc<dyn JobStore>,
    clock: Arc<dyn Clock>,
}

impl RestartStrategy {
    pub fn new(
        workers: Arc<dyn WorkerManager>,
        store: Arc<dyn JobStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            config: RwLock::new(RestartConfig::default()),
            workers,
            store,
            clock,
        }
    }

    pub fn with_config(self, config: RestartConfig) -> Self {
        *self.config.write() = config;
        self
    }

    pub fn config(&self) -> RestartConfig {
        self.config.read().clone()
    }

    pub fn update_config(&self, patch: RestartConfigPatch) -> RestartConfig {
        let mut config = self.config.write();
        config.apply(&patch);
        info!(
            max_restarts = config.max_restarts,
            restart_cooldown_ms = config.restart_cooldown_ms,
            graceful_shutdown_timeout_ms = config.graceful_shutdown_timeout_ms,
            "Updated restart strategy config"
        );
        config.clone()
    }

    /// True only if the worker confirmed the shutdown within `timeout`.
    async fn graceful_shutdown(&self, worker_id: &str, timeout: Duration) -> bool {
        info!(
            worker_id,
            timeout_ms = timeout.as_millis() as u64,
            "Attempting graceful worker shutdown"
        );

        let outcome = with_deadline(
            self.clock.as_ref(),
            timeout,
            self.workers.shutdown(worker_id, timeout),
        )
        .await;

        match outcome {
            Deadline::Completed(Ok(true)) => {
                info!(worker_id, "Worker shutdown completed");
                true
            }
            Deadline::Completed(Ok(false)) => {
                warn!(worker_id, "Worker refused graceful shutdown");
                false
            }
            Deadline::Completed(Err(e)) => {
                warn!(worker_id, error = %e, "Graceful shutdown failed");
                false
            }
            Deadline::Elapsed => {
                warn!(worker_id, "Graceful shutdown timed out");
                false
            }
        }
    }

    /// Best effort; a failed kill does not stop the restart.
    async fn force_kill(&self, worker_id: &str) {
        warn!(worker_id, "Force killing worker");
        match self.workers.kill(worker_id).await {
            Ok(()) => info!(worker_id, "Worker forcefully terminated"),
            Err(e) => warn!(worker_id, error = %e, "Force kill failed, continuing restart"),
        }
    }
}

#[async_trait]
impl RemediationStrategy for RestartStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Restart
    }

    fn can_handle(&self, category: FailureCategory) -> bool {
        category == FailureCategory::Crash
    }

    async fn execute(&self, job: &mut Job, attempt: &HealingAttempt) -> Result<bool, HealdecError> {
        let config = self.config();
        info!(
            job_id = %job.id,
            worker_id = ?job.worker_id,
            attempt = attempt.attempts,
            "Executing restart strategy"
        );

        if attempt.attempts >= config.max_restarts {
            warn!(
                job_id = %job.id,
                worker_id = ?job.worker_id,
                attempts = attempt.attempts,
                "Max restarts exceeded"
            );
            return Ok(false);
        }

        let Some(worker_id) = job.worker_id.clone() else {
            error!(job_id = %job.id, "Cannot restart: no worker ID associated with job");
            return Ok(false);
        };

        if !job.has_attempts_left() {
            warn!(
                job_id = %job.id,
                attempts = job.attempts,
                max_attempts = job.max_attempts,
                "Job has no attempts left"
            );
            return Ok(false);
        }

        // Step 1: stop the crashed worker
        let timeout = Duration::from_millis(config.graceful_shutdown_timeout_ms);
        if !self.graceful_shutdown(&worker_id, timeout).await {
            self.force_kill(&worker_id).await;
        }

        // Step 2: cooldown
        info!(
            worker_id = %worker_id,
            cooldown_ms = config.restart_cooldown_ms,
            "Waiting for restart cooldown"
        );
        self.clock
            .sleep(Duration::from_millis(config.restart_cooldown_ms))
            .await;

        // Step 3: fresh worker under the same id
        info!(worker_id = %worker_id, kind = %job.kind, "Starting new worker instance");
        self.workers.start(&worker_id, job.kind).await?;

        // Step 4: hand the job back; the caller's copy changes only once the
        // store accepted it
        let mut reassigned = job.clone();
        reassigned.reset_for_reassignment();
        self.store.reassign(&reassigned).await?;
        *job = reassigned;

        info!(
            job_id = %job.id,
            worker_id = %worker_id,
            "Successfully restarted worker and reassigned job"
        );
        Ok(true)
    }
}
