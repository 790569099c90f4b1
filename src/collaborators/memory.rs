use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::debug;

use super::{EventSink, JobQueue, JobSource, JobStore, WorkerManager};
use crate::error::HealdecError;
use crate::state_machine::{HealingAttempt, Job, JobKind, JobStatus};

/// Job queue, job store and job source in one process-local structure.
#[derive(Debug, Default)]
pub struct InMemoryJobQueue {
    state: Mutex<QueueState>,
}

#[derive(Debug, Default)]
struct QueueState {
    jobs: HashMap<String, Job>,
    pending: VecDeque<String>,
    requeued: Vec<String>,
    reassigned: Vec<String>,
    refuse_requeue: bool,
    requeue_error: Option<String>,
    reassign_error: Option<String>,
    failing_polls: u32,
}

impl QueueState {
    fn enqueue(&mut self, job_id: &str) {
        if !self.pending.iter().any(|id| id == job_id) {
            self.pending.push_back(job_id.to_string());
        }
    }
}

impl InMemoryJobQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a job; pending jobs are also queued for execution.
    pub fn push(&self, job: Job) {
        let mut state = self.state.lock();
        if job.status == JobStatus::Pending {
            state.enqueue(&job.id);
        }
        state.jobs.insert(job.id.clone(), job);
    }

    pub fn get(&self, job_id: &str) -> Option<Job> {
        self.state.lock().jobs.get(job_id).cloned()
    }

    pub fn pending_ids(&self) -> Vec<String> {
        self.state.lock().pending.iter().cloned().collect()
    }

    pub fn requeued(&self) -> Vec<String> {
        self.state.lock().requeued.clone()
    }

    pub fn reassigned(&self) -> Vec<String> {
        self.state.lock().reassigned.clone()
    }

    /// Make `requeue` answer `Ok(false)`.
    pub fn refuse_requeue(&self, refuse: bool) {
        self.state.lock().refuse_requeue = refuse;
    }

    /// Make `requeue` fail with the given message.
    pub fn fail_requeue(&self, message: impl Into<String>) {
        self.state.lock().requeue_error = Some(message.into());
    }

    pub fn fail_reassign(&self, message: impl Into<String>) {
        self.state.lock().reassign_error = Some(message.into());
    }

    /// Make the next `count` polls fail.
    pub fn fail_polls(&self, count: u32) {
        self.state.lock().failing_polls = count;
    }
}

#[async_trait]
impl JobQueue for InMemoryJobQueue {
    async fn requeue(&self, job_id: &str) -> Result<bool, HealdecError> {
        let mut state = self.state.lock();
        if let Some(message) = &state.requeue_error {
            return Err(HealdecError::collaborator("requeue", message.clone()));
        }
        if state.refuse_requeue {
            return Ok(false);
        }
        let Some(job) = state.jobs.get_mut(job_id) else {
            debug!(job_id, "Requeue of unknown job refused");
            return Ok(false);
        };
        job.status = JobStatus::Pending;
        job.error = None;
        state.enqueue(job_id);
        state.requeued.push(job_id.to_string());
        Ok(true)
    }
}

#[async_trait]
impl JobStore for InMemoryJobQueue {
    async fn reassign(&self, job: &Job) -> Result<(), HealdecError> {
        let mut state = self.state.lock();
        if let Some(message) = &state.reassign_error {
            return Err(HealdecError::collaborator("reassign", message.clone()));
        }
        state.jobs.insert(job.id.clone(), job.clone());
        state.enqueue(&job.id);
        state.reassigned.push(job.id.clone());
        Ok(())
    }
}

#[async_trait]
impl JobSource for InMemoryJobQueue {
    async fn next_job(&self, kind: JobKind) -> Result<Option<Job>, HealdecError> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        if state.failing_polls > 0 {
            state.failing_polls -= 1;
            return Err(HealdecError::collaborator("poll", "job source unavailable"));
        }
        let position = state
            .pending
            .iter()
            .position(|id| state.jobs.get(id).is_some_and(|job| job.kind == kind));
        let Some(position) = position else {
            return Ok(None);
        };
        let job = state
            .pending
            .remove(position)
            .and_then(|id| state.jobs.get(&id).cloned());
        Ok(job)
    }

    async fn save(&self, job: &Job) -> Result<(), HealdecError> {
        self.state.lock().jobs.insert(job.id.clone(), job.clone());
        Ok(())
    }

    async fn release(&self, job: &Job) -> Result<(), HealdecError> {
        let mut state = self.state.lock();
        if !state.pending.iter().any(|id| *id == job.id) {
            state.pending.push_front(job.id.clone());
        }
        state.jobs.insert(job.id.clone(), job.clone());
        debug!(job_id = %job.id, "Job released back to the queue");
        Ok(())
    }
}

/// A call made against [`InMemoryWorkerManager`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerCall {
    Shutdown { worker_id: String, timeout: Duration },
    Kill(String),
    Start { worker_id: String, kind: JobKind },
}

/// How the in-memory manager answers a shutdown request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ShutdownBehavior {
    #[default]
    Succeed,
    /// Reports that the worker did not stop.
    Refuse,
    /// Fails with an error.
    Error,
    /// Never answers.
    Hang,
}

/// Worker manager that records every call and can be scripted to fail.
#[derive(Debug, Default)]
pub struct InMemoryWorkerManager {
    calls: Mutex<Vec<WorkerCall>>,
    shutdown: Mutex<ShutdownBehavior>,
    kill_fails: Mutex<bool>,
    start_error: Mutex<Option<String>>,
}

impl InMemoryWorkerManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<WorkerCall> {
        self.calls.lock().clone()
    }

    pub fn set_shutdown(&self, behavior: ShutdownBehavior) {
        *self.shutdown.lock() = behavior;
    }

    pub fn set_kill_fails(&self, fails: bool) {
        *self.kill_fails.lock() = fails;
    }

    pub fn fail_start(&self, message: impl Into<String>) {
        *self.start_error.lock() = Some(message.into());
    }
}

#[async_trait]
impl WorkerManager for InMemoryWorkerManager {
    async fn shutdown(&self, worker_id: &str, timeout: Duration) -> Result<bool, HealdecError> {
        self.calls.lock().push(WorkerCall::Shutdown {
            worker_id: worker_id.to_string(),
            timeout,
        });
        let behavior = *self.shutdown.lock();
        match behavior {
            ShutdownBehavior::Succeed => Ok(true),
            ShutdownBehavior::Refuse => Ok(false),
            ShutdownBehavior::Error => Err(HealdecError::collaborator(
                "shutdown",
                format!("worker {worker_id} did not acknowledge SIGTERM"),
            )),
            ShutdownBehavior::Hang => std::future::pending().await,
        }
    }

    async fn kill(&self, worker_id: &str) -> Result<(), HealdecError> {
        self.calls.lock().push(WorkerCall::Kill(worker_id.to_string()));
        if *self.kill_fails.lock() {
            return Err(HealdecError::collaborator(
                "kill",
                format!("no such process for worker {worker_id}"),
            ));
        }
        Ok(())
    }

    async fn start(&self, worker_id: &str, kind: JobKind) -> Result<(), HealdecError> {
        self.calls.lock().push(WorkerCall::Start {
            worker_id: worker_id.to_string(),
            kind,
        });
        if let Some(message) = self.start_error.lock().clone() {
            return Err(HealdecError::collaborator("start", message));
        }
        Ok(())
    }
}

/// Event sink that keeps every recorded attempt.
#[derive(Debug, Default)]
pub struct InMemoryEventSink {
    attempts: Mutex<Vec<HealingAttempt>>,
    fail: Mutex<bool>,
}

impl InMemoryEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attempts(&self) -> Vec<HealingAttempt> {
        self.attempts.lock().clone()
    }

    /// Make `record` fail (attempts are not stored while failing).
    pub fn set_failing(&self, fail: bool) {
        *self.fail.lock() = fail;
    }
}

#[async_trait]
impl EventSink for InMemoryEventSink {
    async fn record(&self, attempt: &HealingAttempt) -> Result<(), HealdecError> {
        if *self.fail.lock() {
            return Err(HealdecError::collaborator("record", "event store unavailable"));
        }
        self.attempts.lock().push(attempt.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn failed_job(id: &str, kind: JobKind) -> Job {
        Job::new(kind, json!({})).with_id(id).with_error("boom")
    }

    #[tokio::test]
    async fn requeue_marks_job_pending() {
        let queue = InMemoryJobQueue::new();
        queue.push(failed_job("job-1", JobKind::Index));
        assert!(queue.pending_ids().is_empty());

        assert!(queue.requeue("job-1").await.unwrap());
        let job = queue.get("job-1").unwrap();
        assert_eq!(job.status, JobStatus::Pending);
        assert!(job.error.is_none());
        assert_eq!(queue.pending_ids(), vec!["job-1".to_string()]);
        assert_eq!(queue.requeued(), vec!["job-1".to_string()]);
    }

    #[tokio::test]
    async fn requeue_unknown_or_refused() {
        let queue = InMemoryJobQueue::new();
        assert!(!queue.requeue("ghost").await.unwrap());

        queue.push(failed_job("job-1", JobKind::Index));
        queue.refuse_requeue(true);
        assert!(!queue.requeue("job-1").await.unwrap());

        queue.fail_requeue("redis down");
        assert!(queue.requeue("job-1").await.is_err());
    }

    #[tokio::test]
    async fn next_job_filters_by_kind_and_dequeues() {
        let queue = InMemoryJobQueue::new();
        queue.push(Job::new(JobKind::Score, json!({})).with_id("score-1"));
        queue.push(Job::new(JobKind::Index, json!({})).with_id("index-1"));

        let job = queue.next_job(JobKind::Index).await.unwrap().unwrap();
        assert_eq!(job.id, "index-1");
        assert!(queue.next_job(JobKind::Index).await.unwrap().is_none());
        assert_eq!(queue.pending_ids(), vec!["score-1".to_string()]);
    }

    #[tokio::test]
    async fn released_job_goes_to_the_front() {
        let queue = InMemoryJobQueue::new();
        queue.push(Job::new(JobKind::Index, json!({})).with_id("index-1"));
        queue.push(Job::new(JobKind::Index, json!({})).with_id("index-2"));

        let job = queue.next_job(JobKind::Index).await.unwrap().unwrap();
        queue.release(&job).await.unwrap();
        queue.release(&job).await.unwrap();

        assert_eq!(queue.pending_ids(), vec!["index-1".to_string(), "index-2".to_string()]);
    }

    #[tokio::test]
    async fn failing_polls_recover() {
        let queue = InMemoryJobQueue::new();
        queue.fail_polls(1);
        assert!(queue.next_job(JobKind::Index).await.is_err());
        assert!(queue.next_job(JobKind::Index).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn worker_manager_records_calls() {
        let manager = InMemoryWorkerManager::new();
        manager.set_shutdown(ShutdownBehavior::Refuse);

        assert!(!manager.shutdown("w-1", Duration::from_secs(10)).await.unwrap());
        manager.kill("w-1").await.unwrap();
        manager.start("w-1", JobKind::Sync).await.unwrap();

        assert_eq!(
            manager.calls(),
            vec![
                WorkerCall::Shutdown {
                    worker_id: "w-1".into(),
                    timeout: Duration::from_secs(10)
                },
                WorkerCall::Kill("w-1".into()),
                WorkerCall::Start {
                    worker_id: "w-1".into(),
                    kind: JobKind::Sync
                },
            ]
        );
    }

    #[tokio::test]
    async fn event_sink_can_fail() {
        let sink = InMemoryEventSink::new();
        sink.set_failing(true);
        let job = failed_job("job-1", JobKind::Index);
        let classification = crate::classifier::FailureClassifier::classify(&job, "boom");
        let attempt = HealingAttempt::begin(&job, &classification, chrono::Utc::now());

        assert!(sink.record(&attempt).await.is_err());
        assert!(sink.attempts().is_empty());

        sink.set_failing(false);
        sink.record(&attempt).await.unwrap();
        assert_eq!(sink.attempts().len(), 1);
    }
}
