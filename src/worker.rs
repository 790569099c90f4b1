//! Job-execution contract: one active job per worker, bounded execution
//! time, attempt counting and a polling loop that hands failures to the
//! healing orchestrator.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, warn};

use crate::clock::{Clock, Deadline, with_deadline};
use crate::collaborators::JobSource;
use crate::config::WorkerConfig;
use crate::error::{HealdecError, WorkerError};
use crate::orchestrator::HealingOrchestrator;
use crate::state_machine::{Job, JobKind, JobStatus, WorkerEvent, WorkerState, WorkerStateMachine};

/// Cooperative cancellation handed to a [`JobProcessor`]. Signalled when
/// the job outlives its timeout; processors may ignore it.
pub use tokio_util::sync::CancellationToken;

/// The work a worker performs for each job.
#[async_trait]
pub trait JobProcessor: Send + Sync {
    async fn process(&self, job: &Job, cancel: CancellationToken) -> Result<(), HealdecError>;
}

pub struct Worker {
    id: String,
    kind: JobKind,
    config: WorkerConfig,
    processor: Arc<dyn JobProcessor>,
    source: Arc<dyn JobSource>,
    clock: Arc<dyn Clock>,
    orchestrator: Option<Arc<HealingOrchestrator>>,
    machine: Mutex<WorkerStateMachine>,
    wake: Notify,
    job_done: Notify,
    poll_loop: Mutex<Option<JoinHandle<()>>>,
}

impl Worker {
    pub fn new(
        id: impl Into<String>,
        kind: JobKind,
        config: WorkerConfig,
        processor: Arc<dyn JobProcessor>,
        source: Arc<dyn JobSource>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            id: id.into(),
            kind,
            config,
            processor,
            source,
            clock,
            orchestrator: None,
            machine: Mutex::new(WorkerStateMachine::new()),
            wake: Notify::new(),
            job_done: Notify::new(),
            poll_loop: Mutex::new(None),
        }
    }

    /// Heal failed jobs picked up by the polling loop.
    pub fn with_orchestrator(mut self, orchestrator: Arc<HealingOrchestrator>) -> Self {
        self.orchestrator = Some(orchestrator);
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn kind(&self) -> JobKind {
        self.kind
    }

    pub fn state(&self) -> WorkerState {
        self.machine.lock().state()
    }

    pub fn current_job(&self) -> Option<String> {
        self.machine.lock().current_job().map(str::to_string)
    }

    /// Start the polling loop on a background task.
    pub fn start(self: &Arc<Self>) -> Result<(), HealdecError> {
        self.machine.lock().next(WorkerEvent::Start)?;
        info!(worker_id = %self.id, kind = %self.kind, "Worker started");

        let worker = Arc::clone(self);
        let handle = tokio::spawn(async move { worker.poll_loop().await });
        *self.poll_loop.lock() = Some(handle);
        Ok(())
    }

    /// Stop accepting jobs and wait up to `shutdown_grace_ms` for the
    /// in-flight job. The worker ends `Stopped` either way.
    pub async fn stop(&self) {
        let state = match self.machine.lock().next(WorkerEvent::Stop) {
            Ok(state) => state,
            Err(e) => {
                warn!(worker_id = %self.id, error = %e, "Unexpected stop transition");
                return;
            }
        };
        self.wake.notify_one();

        if state == WorkerState::Draining {
            info!(
                worker_id = %self.id,
                grace_ms = self.config.shutdown_grace_ms,
                "Worker draining"
            );
            let grace = Duration::from_millis(self.config.shutdown_grace_ms);
            let drained = with_deadline(self.clock.as_ref(), grace, self.quiesce()).await;
            if drained == Deadline::Elapsed {
                warn!(
                    worker_id = %self.id,
                    job_id = ?self.current_job(),
                    "Grace period elapsed with a job still running, detaching it"
                );
            }
            self.machine.lock().next(WorkerEvent::Drained).ok();
        }

        info!(worker_id = %self.id, "Worker stopped");
    }

    /// Waits for the polling loop to exit, or for the in-flight job to
    /// settle when the job was run outside the loop.
    async fn quiesce(&self) {
        let handle = self.poll_loop.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await
                && e.is_panic()
            {
                error!(worker_id = %self.id, "Polling loop panicked");
            }
            return;
        }
        loop {
            let settled = self.job_done.notified();
            if self.machine.lock().current_job().is_none() {
                return;
            }
            settled.await;
        }
    }

    /// Run one job under the timeout.
    ///
    /// Counts the attempt, marks the job running, and leaves it completed or
    /// failed. On timeout the processing task is signalled through its
    /// [`CancellationToken`] and keeps running in the background.
    pub async fn execute_job(&self, job: &mut Job) -> Result<(), HealdecError> {
        self.machine
            .lock()
            .next(WorkerEvent::BeginJob(job.id.clone()))?;

        job.attempts += 1;
        job.status = JobStatus::Running;
        job.started_at = Some(self.clock.now());
        job.worker_id = Some(self.id.clone());
        job.error = None;
        debug!(
            worker_id = %self.id,
            job_id = %job.id,
            attempt = job.attempts,
            "Executing job"
        );

        let result = self.run_processor(job).await;

        match &result {
            Ok(()) => {
                job.status = JobStatus::Completed;
                job.completed_at = Some(self.clock.now());
                info!(worker_id = %self.id, job_id = %job.id, "Job completed");
            }
            Err(e) => {
                job.status = JobStatus::Failed;
                job.error = Some(e.to_string());
                warn!(worker_id = %self.id, job_id = %job.id, error = %e, "Job failed");
            }
        }

        self.machine.lock().next(WorkerEvent::FinishJob).ok();
        self.job_done.notify_waiters();
        result
    }

    async fn run_processor(&self, job: &Job) -> Result<(), HealdecError> {
        let cancel = CancellationToken::new();
        let processor = Arc::clone(&self.processor);
        let snapshot = job.clone();
        let token = cancel.clone();
        let mut task =
            tokio::spawn(async move { processor.process(&snapshot, token).await });

        let limit = Duration::from_millis(self.config.timeout_ms);
        match with_deadline(self.clock.as_ref(), limit, &mut task).await {
            Deadline::Completed(Ok(outcome)) => outcome,
            Deadline::Completed(Err(e)) => Err(WorkerError::Panicked(e.to_string()).into()),
            Deadline::Elapsed => {
                cancel.cancel();
                Err(HealdecError::JobTimeout(limit))
            }
        }
    }

    async fn poll_loop(self: Arc<Self>) {
        let mut consecutive_errors = 0usize;

        while self.machine.lock().is_polling() {
            match self.source.next_job(self.kind).await {
                Ok(Some(job)) => {
                    consecutive_errors = 0;
                    if !self.handle(job).await {
                        break;
                    }
                }
                Ok(None) => {
                    consecutive_errors = 0;
                    self.idle(Duration::from_millis(self.config.poll_interval_ms))
                        .await;
                }
                Err(e) => {
                    let delay = self.config.poll_backoff_ms(consecutive_errors);
                    consecutive_errors += 1;
                    warn!(
                        worker_id = %self.id,
                        error = %e,
                        consecutive_errors,
                        delay_ms = delay,
                        "Polling failed, backing off"
                    );
                    self.idle(Duration::from_millis(delay)).await;
                }
            }
        }

        self.machine.lock().next(WorkerEvent::Drained).ok();
        debug!(worker_id = %self.id, "Polling loop exited");
    }

    /// Sleep unless woken by `stop`.
    async fn idle(&self, duration: Duration) {
        tokio::select! {
            _ = self.clock.sleep(duration) => {}
            _ = self.wake.notified() => {}
        }
    }

    /// Execute a polled job, persist it and heal it on failure.
    /// Returns false once the worker no longer accepts jobs; the job is then
    /// released back to the source untouched.
    async fn handle(&self, mut job: Job) -> bool {
        if let Err(HealdecError::Worker(e)) = self.execute_job(&mut job).await {
            warn!(worker_id = %self.id, job_id = %job.id, error = %e, "Releasing polled job");
            if let Err(e) = self.source.release(&job).await {
                error!(worker_id = %self.id, job_id = %job.id, error = %e, "Failed to release job");
            }
            return false;
        }

        if let Err(e) = self.source.save(&job).await {
            error!(worker_id = %self.id, job_id = %job.id, error = %e, "Failed to save job");
        }

        if job.status == JobStatus::Failed
            && let Some(orchestrator) = &self.orchestrator
        {
            let error = job.error.clone().unwrap_or_default();
            let classification = orchestrator.classify(&job, error.as_str());
            match orchestrator.heal(&mut job, &classification).await {
                Ok(attempt) => info!(
                    job_id = %job.id,
                    attempt_id = %attempt.id,
                    status = %attempt.status,
                    "Healing finished"
                ),
                Err(e) => warn!(job_id = %job.id, error = %e, "Healing aborted"),
            }
        }
        true
    }
}

/// `concurrency` workers of one kind sharing a job source.
pub struct WorkerPool {
    kind: JobKind,
    workers: Vec<Arc<Worker>>,
}

impl WorkerPool {
    /// Build and start the workers, named `{kind}-worker-{n}` from 1.
    pub fn start(
        kind: JobKind,
        config: WorkerConfig,
        processor: Arc<dyn JobProcessor>,
        source: Arc<dyn JobSource>,
        clock: Arc<dyn Clock>,
        orchestrator: Option<Arc<HealingOrchestrator>>,
    ) -> Result<Self, HealdecError> {
        let size = config.concurrency.max(1);
        let mut workers = Vec::with_capacity(size);
        for n in 1..=size {
            let mut worker = Worker::new(
                format!("{kind}-worker-{n}"),
                kind,
                config.clone(),
                Arc::clone(&processor),
                Arc::clone(&source),
                Arc::clone(&clock),
            );
            if let Some(orchestrator) = &orchestrator {
                worker = worker.with_orchestrator(Arc::clone(orchestrator));
            }
            let worker = Arc::new(worker);
            worker.start()?;
            workers.push(worker);
        }
        info!(%kind, size, "Worker pool started");
        Ok(Self { kind, workers })
    }

    pub fn workers(&self) -> &[Arc<Worker>] {
        &self.workers
    }

    /// Stop every worker; the grace periods run side by side.
    pub async fn stop(&self) {
        let mut stopping = JoinSet::new();
        for worker in &self.workers {
            let worker = Arc::clone(worker);
            stopping.spawn(async move { worker.stop().await });
        }
        while let Some(result) = stopping.join_next().await {
            if let Err(e) = result {
                error!(kind = %self.kind, error = %e, "Worker stop panicked");
            }
        }
        info!(kind = %self.kind, "Worker pool stopped");
    }
}

impl std::fmt::Debug for Worker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Worker")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}
