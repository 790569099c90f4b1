use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::RemediationStrategy;
use crate::classifier::{FailureCategory, StrategyKind};
use crate::clock::{Clock, RandomSource};
use crate::collaborators::JobQueue;
use crate::error::HealdecError;
use crate::state_machine::{HealingAttempt, Job, JobStatus};

/// Jitter spread around the exponential delay (±20%).
const JITTER_FACTOR: f64 = 0.2;

/// Configuration for retry behavior.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Attempts at or above this count are not retried.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Base delay in milliseconds for exponential backoff.
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    /// Upper bound on any single delay.
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

fn default_max_retries() -> u32 {
    5
}

fn default_base_delay_ms() -> u64 {
    1000
}

fn default_max_delay_ms() -> u64 {
    30_000
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

impl RetryConfig {
    /// delay = base_delay_ms * 2^attempts, before jitter and capping.
    pub fn exponential_delay_ms(&self, attempts: u32) -> f64 {
        self.base_delay_ms as f64 * 2f64.powi(attempts.min(1023) as i32)
    }

    /// Jittered, capped backoff for `attempts`, with `unit` uniform in `[0, 1)`.
    pub fn backoff(&self, attempts: u32, unit: f64) -> Duration {
        let exponential = self.exponential_delay_ms(attempts);
        let jitter = exponential * JITTER_FACTOR * (unit * 2.0 - 1.0);
        let delay = (exponential + jitter).min(self.max_delay_ms as f64).round();
        Duration::from_millis(delay.max(0.0) as u64)
    }

    pub fn apply(&mut self, patch: &RetryConfigPatch) {
        if let Some(max_retries) = patch.max_retries {
            self.max_retries = max_retries;
        }
        if let Some(base_delay_ms) = patch.base_delay_ms {
            self.base_delay_ms = base_delay_ms;
        }
        if let Some(max_delay_ms) = patch.max_delay_ms {
            self.max_delay_ms = max_delay_ms;
        }
    }
}

/// Partial update of [`RetryConfig`]; `None` fields keep their value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryConfigPatch {
    pub max_retries: Option<u32>,
    pub base_delay_ms: Option<u64>,
    pub max_delay_ms: Option<u64>,
}

/// Handles transient failures by re-queueing the job after an exponential backoff.
pub struct RetryStrategy {
    config: RwLock<RetryConfig>,
    queue: Arc<dyn JobQueue>,
    clock: Arc<dyn Clock>,
    random: Arc<dyn RandomSource>,
}

impl RetryStrategy {
    pub fn new(
        queue: Arc<dyn JobQueue>,
        clock: Arc<dyn Clock>,
        random: Arc<dyn RandomSource>,
    ) -> Self {
        Self {
            config: RwLock::new(RetryConfig::default()),
            queue,
            clock,
            random,
        }
    }

    pub fn with_config(self, config: RetryConfig) -> Self {
        *self.config.write() = config;
        self
    }

    pub fn config(&self) -> RetryConfig {
        self.config.read().clone()
    }

    /// Apply a partial update and return the resulting configuration.
    pub fn update_config(&self, patch: RetryConfigPatch) -> RetryConfig {
        let mut config = self.config.write();
        config.apply(&patch);
        info!(
            max_retries = config.max_retries,
            base_delay_ms = config.base_delay_ms,
            max_delay_ms = config.max_delay_ms,
            "Updated retry strategy config"
        );
        config.clone()
    }
}

#[async_trait]
impl RemediationStrategy for RetryStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Retry
    }

    fn can_handle(&self, category: FailureCategory) -> bool {
        category == FailureCategory::Transient
    }

    async fn execute(&self, job: &mut Job, attempt: &HealingAttempt) -> Result<bool, HealdecError> {
        let config = self.config();
        info!(job_id = %job.id, attempt = attempt.attempts, "Executing retry strategy");

        if attempt.attempts >= config.max_retries {
            warn!(job_id = %job.id, attempts = attempt.attempts, "Max retries exceeded");
            return Ok(false);
        }
        if !job.has_attempts_left() {
            warn!(
                job_id = %job.id,
                attempts = job.attempts,
                max_attempts = job.max_attempts,
                "Job has no attempts left"
            );
            return Ok(false);
        }

        let delay = config.backoff(attempt.attempts, self.random.next_f64());
        info!(
            job_id = %job.id,
            delay_ms = delay.as_millis() as u64,
            attempt = attempt.attempts + 1,
            "Waiting before retry"
        );
        self.clock.sleep(delay).await;

        if !self.queue.requeue(&job.id).await? {
            warn!(job_id = %job.id, "Queue refused to requeue job");
            return Ok(false);
        }

        job.status = JobStatus::Pending;
        job.error = None;
        info!(job_id = %job.id, "Successfully requeued job");
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::FailureClassifier;
    use crate::clock::{FixedRandom, ManualClock};
    use crate::collaborators::InMemoryJobQueue;
    use crate::state_machine::JobKind;
    use proptest::prelude::*;
    use serde_json::json;

    struct Fixture {
        queue: Arc<InMemoryJobQueue>,
        clock: ManualClock,
        strategy: RetryStrategy,
    }

    fn fixture(unit: f64) -> Fixture {
        let queue = Arc::new(InMemoryJobQueue::new());
        let clock = ManualClock::new();
        let strategy = RetryStrategy::new(
            queue.clone(),
            Arc::new(clock.clone()),
            Arc::new(FixedRandom(unit)),
        );
        Fixture {
            queue,
            clock,
            strategy,
        }
    }

    fn failed_job(attempts: u32) -> Job {
        Job::new(JobKind::Index, json!({"repo": "acme/api"}))
            .with_id("job-1")
            .with_attempts(attempts)
            .with_error("ETIMEDOUT while fetching")
    }

    fn attempt_for(job: &Job) -> HealingAttempt {
        let classification = FailureClassifier::classify(job, job.error.as_deref().unwrap_or(""));
        HealingAttempt::begin(job, &classification, chrono::Utc::now())
    }

    #[test]
    fn default_config_values() {
        let config = RetryConfig::default();
        assert_eq!(config.max_retries, 5);
        assert_eq!(config.base_delay_ms, 1000);
        assert_eq!(config.max_delay_ms, 30_000);
    }

    #[test]
    fn backoff_without_jitter_is_exponential() {
        let config = RetryConfig::default();
        assert_eq!(config.backoff(0, 0.5), Duration::from_millis(1000));
        assert_eq!(config.backoff(1, 0.5), Duration::from_millis(2000));
        assert_eq!(config.backoff(2, 0.5), Duration::from_millis(4000));
        assert_eq!(config.backoff(4, 0.5), Duration::from_millis(16_000));
    }

    #[test]
    fn backoff_jitter_extremes() {
        let config = RetryConfig::default();
        assert_eq!(config.backoff(1, 0.0), Duration::from_millis(1600));
        assert_eq!(config.backoff(1, 0.75), Duration::from_millis(2200));
    }

    #[test]
    fn backoff_is_capped() {
        let config = RetryConfig::default();
        assert_eq!(config.backoff(5, 0.5), Duration::from_millis(30_000));
        assert_eq!(config.backoff(40, 0.99), Duration::from_millis(30_000));
    }

    proptest! {
        #[test]
        fn backoff_stays_within_jitter_band(
            attempts in 0u32..12,
            base_steps in 1u64..400,
            unit in 0.0f64..1.0,
        ) {
            // Multiples of 5 keep the ±20% band on whole milliseconds.
            let config = RetryConfig {
                max_retries: 20,
                base_delay_ms: base_steps * 5,
                max_delay_ms: 30_000,
            };
            let exponential = config.exponential_delay_ms(attempts);
            let delay = config.backoff(attempts, unit).as_millis() as f64;

            let low = (exponential * 0.8).min(config.max_delay_ms as f64);
            let high = (exponential * 1.2).min(config.max_delay_ms as f64);
            prop_assert!(delay >= low, "{delay} < {low}");
            prop_assert!(delay <= high, "{delay} > {high}");
        }
    }

    #[tokio::test]
    async fn requeues_after_one_backoff_sleep() {
        let f = fixture(0.5);
        let mut job = failed_job(1);
        f.queue.push(job.clone());
        let attempt = attempt_for(&job);

        assert!(f.strategy.execute(&mut job, &attempt).await.unwrap());
        assert_eq!(f.clock.sleeps(), vec![Duration::from_millis(2000)]);
        assert_eq!(f.queue.requeued(), vec!["job-1".to_string()]);
        assert_eq!(job.status, JobStatus::Pending);
        assert!(job.error.is_none());
    }

    #[tokio::test]
    async fn declines_without_sleeping_at_max_retries() {
        let f = fixture(0.5);
        let mut job = failed_job(5).with_max_attempts(10);
        f.queue.push(job.clone());
        let attempt = attempt_for(&job);

        assert!(!f.strategy.execute(&mut job, &attempt).await.unwrap());
        assert!(f.clock.sleeps().is_empty());
        assert!(f.queue.requeued().is_empty());
        assert_eq!(job.status, JobStatus::Failed);
    }

    #[tokio::test]
    async fn declines_when_job_budget_is_spent() {
        let f = fixture(0.5);
        let mut job = failed_job(2).with_max_attempts(2);
        let attempt = attempt_for(&job);

        assert!(!f.strategy.execute(&mut job, &attempt).await.unwrap());
        assert!(f.clock.sleeps().is_empty());
    }

    #[tokio::test]
    async fn refused_requeue_is_a_plain_failure() {
        let f = fixture(0.5);
        let mut job = failed_job(0);
        f.queue.push(job.clone());
        f.queue.refuse_requeue(true);
        let attempt = attempt_for(&job);

        assert!(!f.strategy.execute(&mut job, &attempt).await.unwrap());
        assert_eq!(f.clock.sleeps(), vec![Duration::from_millis(1000)]);
        assert_eq!(job.status, JobStatus::Failed);
    }

    #[tokio::test]
    async fn requeue_fault_propagates() {
        let f = fixture(0.5);
        let mut job = failed_job(0);
        f.queue.fail_requeue("broker connection lost");
        let attempt = attempt_for(&job);

        let err = f.strategy.execute(&mut job, &attempt).await.unwrap_err();
        assert!(err.to_string().contains("broker connection lost"));
    }

    #[test]
    fn update_config_is_partial() {
        let f = fixture(0.5);
        let updated = f.strategy.update_config(RetryConfigPatch {
            max_retries: Some(8),
            ..Default::default()
        });
        assert_eq!(updated.max_retries, 8);
        assert_eq!(updated.base_delay_ms, 1000);
        assert_eq!(updated.max_delay_ms, 30_000);
        assert_eq!(f.strategy.config(), updated);
    }

    #[tokio::test]
    async fn updated_limits_apply_to_next_execution() {
        let f = fixture(0.5);
        f.strategy.update_config(RetryConfigPatch {
            max_retries: Some(1),
            base_delay_ms: Some(10),
            max_delay_ms: None,
        });
        let mut job = failed_job(1);
        let attempt = attempt_for(&job);
        assert!(!f.strategy.execute(&mut job, &attempt).await.unwrap());
    }

    #[test]
    fn handles_only_transient() {
        let f = fixture(0.5);
        assert_eq!(f.strategy.kind(), StrategyKind::Retry);
        assert!(f.strategy.can_handle(FailureCategory::Transient));
        assert!(!f.strategy.can_handle(FailureCategory::Crash));
    }

    #[test]
    fn deserialize_partial_toml() {
        let config: RetryConfig = toml::from_str("max_retries = 2").unwrap();
        assert_eq!(config.max_retries, 2);
        assert_eq!(config.base_delay_ms, 1000);
    }
}
