//! Narrow interfaces to the systems the healing loop acts upon.
//!
//! Persistence, process management and telemetry live outside this crate.
//! Strategies only see these traits; [`memory`] provides in-process
//! implementations used by the CLI demo and the tests.

pub mod memory;

use std::time::Duration;

use async_trait::async_trait;
use tracing::info;

use crate::error::HealdecError;
use crate::state_machine::{HealingAttempt, HealingEvent, Job, JobKind};

pub use memory::{
    InMemoryEventSink, InMemoryJobQueue, InMemoryWorkerManager, ShutdownBehavior, WorkerCall,
};

/// Puts a job back on the execution queue.
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// `Ok(false)` means the queue refused the job; `Err` is an unexpected fault.
    async fn requeue(&self, job_id: &str) -> Result<bool, HealdecError>;
}

/// Controls worker processes.
#[async_trait]
pub trait WorkerManager: Send + Sync {
    /// Ask the worker to finish up and exit within `timeout`.
    async fn shutdown(&self, worker_id: &str, timeout: Duration) -> Result<bool, HealdecError>;

    async fn kill(&self, worker_id: &str) -> Result<(), HealdecError>;

    async fn start(&self, worker_id: &str, kind: JobKind) -> Result<(), HealdecError>;
}

/// Persistent job records.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Persist a job that was reset to pending for its restarted worker.
    async fn reassign(&self, job: &Job) -> Result<(), HealdecError>;
}

/// Where finished healing attempts are reported.
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn record(&self, attempt: &HealingAttempt) -> Result<(), HealdecError>;
}

/// Where a worker pulls its next job from.
#[async_trait]
pub trait JobSource: Send + Sync {
    async fn next_job(&self, kind: JobKind) -> Result<Option<Job>, HealdecError>;

    /// Write back a job after it ran.
    async fn save(&self, job: &Job) -> Result<(), HealdecError>;

    /// Hand back a job that was taken but never started. It goes to the
    /// front of the queue.
    async fn release(&self, job: &Job) -> Result<(), HealdecError>;
}

/// Event sink that only logs a timeline entry per attempt.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingEventSink;

#[async_trait]
impl EventSink for TracingEventSink {
    async fn record(&self, attempt: &HealingAttempt) -> Result<(), HealdecError> {
        let event = HealingEvent::from_attempt(attempt);
        info!(
            attempt_id = %attempt.id,
            job_id = %attempt.job_id,
            status = %attempt.status,
            severity = ?event.severity,
            duration_ms = ?attempt.duration_ms(),
            "{}",
            event.message
        );
        Ok(())
    }
}
