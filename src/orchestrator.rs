use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tracing::{error, info, warn};

use crate::classifier::{FailureClassification, FailureClassifier, StrategyKind};
use crate::clock::{Clock, RandomSource};
use crate::collaborators::{EventSink, JobQueue, JobStore, WorkerManager};
use crate::error::{HealError, HealdecError};
use crate::state_machine::{HealingAttempt, HealingStatus, Job};
use crate::strategy::{RemediationStrategy, RestartStrategy, RetryStrategy, StrategyRegistry};

/// Drives one healing attempt per failure: classify, dispatch, record.
pub struct HealingOrchestrator {
    registry: StrategyRegistry,
    sink: Arc<dyn EventSink>,
    clock: Arc<dyn Clock>,
    last_started: Mutex<Option<DateTime<Utc>>>,
}

impl HealingOrchestrator {
    /// Create an orchestrator with an empty registry.
    pub fn new(sink: Arc<dyn EventSink>, clock: Arc<dyn Clock>) -> Self {
        Self {
            registry: StrategyRegistry::new(),
            sink,
            clock,
            last_started: Mutex::new(None),
        }
    }

    /// Orchestrator with the built-in strategies registered: retry, then restart.
    pub fn with_defaults(
        queue: Arc<dyn JobQueue>,
        workers: Arc<dyn WorkerManager>,
        store: Arc<dyn JobStore>,
        sink: Arc<dyn EventSink>,
        clock: Arc<dyn Clock>,
        random: Arc<dyn RandomSource>,
    ) -> Self {
        let mut orchestrator = Self::new(sink, clock.clone());
        orchestrator.register_strategy(Arc::new(RetryStrategy::new(
            queue,
            clock.clone(),
            random,
        )));
        orchestrator.register_strategy(Arc::new(RestartStrategy::new(workers, store, clock)));
        orchestrator
    }

    pub fn classify<E>(&self, job: &Job, error: &E) -> FailureClassification
    where
        E: std::fmt::Display + ?Sized,
    {
        FailureClassifier::classify(job, error)
    }

    pub fn register_strategy(&mut self, strategy: Arc<dyn RemediationStrategy>) {
        self.registry.register(strategy);
    }

    /// Registered strategy kinds, in registration order.
    pub fn strategies(&self) -> Vec<StrategyKind> {
        self.registry.names()
    }

    pub fn strategy(&self, kind: StrategyKind) -> Option<Arc<dyn RemediationStrategy>> {
        self.registry.lookup(kind)
    }

    /// Run the recommended strategy against `job` and record the attempt.
    ///
    /// A declined strategy yields `Ok` with a `failed` attempt. Only faults
    /// (missing strategy, collaborator errors) come back as [`HealError`],
    /// which still carries the finalized attempt.
    pub async fn heal(
        &self,
        job: &mut Job,
        classification: &FailureClassification,
    ) -> Result<HealingAttempt, HealError> {
        let mut attempt = HealingAttempt::begin(job, classification, self.next_start());
        info!(
            attempt_id = %attempt.id,
            job_id = %job.id,
            category = %classification.category,
            strategy = %classification.recommended_strategy,
            "Starting healing attempt"
        );

        let Some(strategy) = self.registry.lookup(classification.recommended_strategy) else {
            let source = HealdecError::StrategyNotFound(classification.recommended_strategy);
            return Err(self.abort(attempt, source).await);
        };

        if !strategy.can_handle(classification.category) {
            warn!(
                strategy = %strategy.kind(),
                category = %classification.category,
                "Strategy does not declare support for this category, executing anyway"
            );
        }

        match strategy.execute(job, &attempt).await {
            Ok(healed) => {
                let status = if healed {
                    HealingStatus::Succeeded
                } else {
                    HealingStatus::Failed
                };
                if let Err(e) = attempt.finish(status, self.finished_at(&attempt)) {
                    return Err(self.abort(attempt, e).await);
                }
                info!(
                    attempt_id = %attempt.id,
                    job_id = %attempt.job_id,
                    status = %attempt.status,
                    duration_ms = ?attempt.duration_ms(),
                    "Healing attempt completed"
                );
                self.record(&attempt).await;
                Ok(attempt)
            }
            Err(e) => Err(self.abort(attempt, e).await),
        }
    }

    /// Finalize `attempt` as failed with the error text, sink it and wrap it.
    async fn abort(&self, mut attempt: HealingAttempt, source: HealdecError) -> HealError {
        error!(
            attempt_id = %attempt.id,
            job_id = %attempt.job_id,
            error = %source,
            "Healing attempt failed"
        );
        if !attempt.status.is_terminal() {
            let completed_at = self.finished_at(&attempt);
            if let Err(e) = attempt.fail(source.to_string(), completed_at) {
                warn!(attempt_id = %attempt.id, error = %e, "Could not finalize healing attempt");
            }
        }
        self.record(&attempt).await;
        HealError {
            attempt: Box::new(attempt),
            source,
        }
    }

    /// Start time for a new attempt. Strictly after the previous attempt at
    /// millisecond precision, so attempt ids stay unique and ordered when
    /// the clock stalls or steps back.
    fn next_start(&self) -> DateTime<Utc> {
        let now = self.clock.now();
        let mut last = self.last_started.lock();
        let start = match *last {
            Some(prev) if now.timestamp_millis() <= prev.timestamp_millis() => {
                prev + chrono::Duration::milliseconds(1)
            }
            _ => now,
        };
        *last = Some(start);
        start
    }

    fn finished_at(&self, attempt: &HealingAttempt) -> DateTime<Utc> {
        self.clock.now().max(attempt.started_at)
    }

    async fn record(&self, attempt: &HealingAttempt) {
        if let Err(e) = self.sink.record(attempt).await {
            warn!(attempt_id = %attempt.id, error = %e, "Failed to record healing attempt");
        }
    }
}

impl std::fmt::Debug for HealingOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HealingOrchestrator")
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}
