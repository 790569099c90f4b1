//! Built-in healing scenarios run against the in-memory collaborators.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tracing::info;

use crate::classifier::FailureClassification;
use crate::cli::Scenario;
use crate::clock::{Clock, FastRandom, ManualClock, RandomSource, TokioClock};
use crate::collaborators::{
    InMemoryEventSink, InMemoryJobQueue, InMemoryWorkerManager, ShutdownBehavior, WorkerCall,
};
use crate::config::HealdecConfig;
use crate::error::HealdecError;
use crate::orchestrator::HealingOrchestrator;
use crate::state_machine::{HealingAttempt, Job, JobKind, JobStatus};
use crate::strategy::{RestartStrategy, RetryStrategy};
use crate::worker::{CancellationToken, JobProcessor, WorkerPool};

#[derive(Debug, Clone, Default)]
pub struct DemoSettings {
    pub config: HealdecConfig,
    pub seed: Option<u64>,
    pub real_time: bool,
}

/// What happened in one scenario.
#[derive(Debug)]
pub struct ScenarioReport {
    pub scenario: Scenario,
    pub error_text: String,
    pub classification: FailureClassification,
    /// Attempts seen by the event sink, in order.
    pub attempts: Vec<HealingAttempt>,
    /// Set when healing aborted instead of producing an outcome.
    pub failure: Option<String>,
    pub worker_calls: Vec<WorkerCall>,
    pub job: Job,
}

struct Harness {
    queue: Arc<InMemoryJobQueue>,
    workers: Arc<InMemoryWorkerManager>,
    sink: Arc<InMemoryEventSink>,
    clock: Arc<dyn Clock>,
    orchestrator: Arc<HealingOrchestrator>,
}

impl Harness {
    fn new(settings: &DemoSettings) -> Self {
        let queue = Arc::new(InMemoryJobQueue::new());
        let workers = Arc::new(InMemoryWorkerManager::new());
        let sink = Arc::new(InMemoryEventSink::new());
        let clock: Arc<dyn Clock> = if settings.real_time {
            Arc::new(TokioClock)
        } else {
            Arc::new(ManualClock::new())
        };
        let random: Arc<dyn RandomSource> = match settings.seed {
            Some(seed) => Arc::new(FastRandom::seeded(seed)),
            None => Arc::new(FastRandom::new()),
        };

        let mut orchestrator = HealingOrchestrator::new(sink.clone(), clock.clone());
        orchestrator.register_strategy(Arc::new(
            RetryStrategy::new(queue.clone(), clock.clone(), random)
                .with_config(settings.config.retry.clone()),
        ));
        orchestrator.register_strategy(Arc::new(
            RestartStrategy::new(workers.clone(), queue.clone(), clock.clone())
                .with_config(settings.config.restart.clone()),
        ));

        Self {
            queue,
            workers,
            sink,
            clock,
            orchestrator: Arc::new(orchestrator),
        }
    }

    /// Classify and heal a job directly, as an external failure handler would.
    async fn heal(self, scenario: Scenario, job: Job) -> ScenarioReport {
        let error_text = job.error.clone().unwrap_or_default();
        self.queue.push(job.clone());
        let mut job = job;

        let classification = self.orchestrator.classify(&job, error_text.as_str());
        let failure = self
            .orchestrator
            .heal(&mut job, &classification)
            .await
            .err()
            .map(|e| e.to_string());

        ScenarioReport {
            scenario,
            error_text,
            classification,
            attempts: self.sink.attempts(),
            failure,
            worker_calls: self.workers.calls(),
            job,
        }
    }
}

/// Hangs on its first run until cancelled, succeeds afterwards.
#[derive(Default)]
struct StallingUpstream {
    calls: AtomicU32,
}

#[async_trait]
impl JobProcessor for StallingUpstream {
    async fn process(&self, job: &Job, cancel: CancellationToken) -> Result<(), HealdecError> {
        if self.calls.fetch_add(1, Ordering::SeqCst) > 0 {
            return Ok(());
        }
        cancel.cancelled().await;
        Err(HealdecError::Job(format!("upstream stalled for job {}", job.id)))
    }
}

pub async fn run(scenario: Scenario, settings: &DemoSettings) -> ScenarioReport {
    info!(
        ?scenario,
        real_time = settings.real_time,
        seed = ?settings.seed,
        "Running demo scenario"
    );
    let harness = Harness::new(settings);

    match scenario {
        Scenario::Transient | Scenario::All => {
            let job = Job::new(JobKind::Index, json!({"repo": "acme/api"}))
                .with_id("index-42")
                .with_attempts(1)
                .with_error("ETIMEDOUT while fetching repository metadata");
            harness.heal(Scenario::Transient, job).await
        }
        Scenario::Crash => {
            let job = Job::new(JobKind::Identity, json!({"account": 7}))
                .with_id("identity-7")
                .with_worker("identity-worker-1")
                .with_error("worker process terminated unexpectedly (exit code 137)");
            harness.heal(scenario, job).await
        }
        Scenario::HungWorker => {
            harness.workers.set_shutdown(ShutdownBehavior::Hang);
            let job = Job::new(JobKind::Sync, json!({}))
                .with_id("sync-3")
                .with_worker("sync-worker-2")
                .with_error("Worker sync-worker-2 crashed: SIGKILL");
            harness.heal(scenario, job).await
        }
        Scenario::DataError => {
            let job = Job::new(JobKind::Ingest, json!({"file": "events-0412.csv"}))
                .with_id("ingest-9")
                .with_error("validation failed: malformed timestamp in row 12");
            harness.heal(scenario, job).await
        }
        Scenario::WorkerTimeout => worker_timeout(harness, settings).await,
    }
}

/// A polled job times out inside a real worker pool; the loop heals it with
/// a retry and the second run completes.
async fn worker_timeout(harness: Harness, settings: &DemoSettings) -> ScenarioReport {
    let mut worker_config = settings.config.worker(JobKind::Score);
    worker_config.timeout_ms = worker_config.timeout_ms.min(500);
    worker_config.poll_interval_ms = worker_config.poll_interval_ms.min(50);
    let error_text =
        HealdecError::JobTimeout(Duration::from_millis(worker_config.timeout_ms)).to_string();

    let job = Job::new(JobKind::Score, json!({"repo": "acme/web"})).with_id("score-5");
    harness.queue.push(job.clone());

    let pool = WorkerPool::start(
        JobKind::Score,
        worker_config,
        Arc::new(StallingUpstream::default()),
        harness.queue.clone(),
        harness.clock.clone(),
        Some(harness.orchestrator.clone()),
    );
    let failure = pool.as_ref().err().map(|e| e.to_string());
    for _ in 0..500 {
        let done = harness
            .queue
            .get(&job.id)
            .is_some_and(|j| j.status == JobStatus::Completed);
        if done {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    if let Ok(pool) = &pool {
        pool.stop().await;
    }

    let attempts = harness.sink.attempts();
    let classification = match attempts.first() {
        Some(first) => FailureClassification::for_category(first.failure_category),
        None => harness.orchestrator.classify(&job, "timeout"),
    };
    ScenarioReport {
        scenario: Scenario::WorkerTimeout,
        error_text,
        classification,
        attempts,
        failure,
        worker_calls: harness.workers.calls(),
        job: harness.queue.get(&job.id).unwrap_or(job),
    }
}
