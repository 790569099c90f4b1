use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::WorkerError;

/// Lifecycle states of a worker.
///
/// A worker flows through: IDLE → POLLING ⇄ EXECUTING → DRAINING → STOPPED
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerState {
    Idle,
    Polling,
    Executing,
    Draining,
    Stopped,
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkerState::Idle => write!(f, "IDLE"),
            WorkerState::Polling => write!(f, "POLLING"),
            WorkerState::Executing => write!(f, "EXECUTING"),
            WorkerState::Draining => write!(f, "DRAINING"),
            WorkerState::Stopped => write!(f, "STOPPED"),
        }
    }
}

/// Events that move a worker between states.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerEvent {
    /// `start` was called.
    Start,
    /// A job with the given id is about to run.
    BeginJob(String),
    /// The in-flight job settled (completed, failed or timed out).
    FinishJob,
    /// `stop` was called.
    Stop,
    /// The polling loop has exited or the grace period ran out.
    Drained,
}

/// Drives a worker through its lifecycle and enforces one active job at a time.
#[derive(Debug, Clone)]
pub struct WorkerStateMachine {
    state: WorkerState,
    resume: WorkerState,
    current_job: Option<String>,
}

impl Default for WorkerStateMachine {
    fn default() -> Self {
        Self {
            state: WorkerState::Idle,
            resume: WorkerState::Idle,
            current_job: None,
        }
    }
}

impl WorkerStateMachine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> WorkerState {
        self.state
    }

    pub fn current_job(&self) -> Option<&str> {
        self.current_job.as_deref()
    }

    /// True while the polling loop should keep going.
    pub fn is_polling(&self) -> bool {
        self.state == WorkerState::Polling
            || (self.state == WorkerState::Executing && self.resume == WorkerState::Polling)
    }

    /// Apply an event and return the resulting state.
    ///
    /// - `Start` is only legal from `Idle` or `Stopped`.
    /// - `BeginJob` is only legal from `Idle` or `Polling`; the worker returns
    ///   to that state on `FinishJob`.
    /// - `Stop` while executing moves to `Draining`; the in-flight job may
    ///   still finish, after which `Drained` completes the shutdown.
    /// - `FinishJob` and `Drained` never fail, since they can arrive after the
    ///   grace period already forced the worker to `Stopped`.
    pub fn next(&mut self, event: WorkerEvent) -> Result<WorkerState, WorkerError> {
        let next = match (self.state, event) {
            (WorkerState::Idle | WorkerState::Stopped, WorkerEvent::Start) => WorkerState::Polling,
            (_, WorkerEvent::Start) => return Err(WorkerError::AlreadyRunning),

            (WorkerState::Idle | WorkerState::Polling, WorkerEvent::BeginJob(job_id)) => {
                self.resume = self.state;
                self.current_job = Some(job_id);
                WorkerState::Executing
            }
            (WorkerState::Executing, WorkerEvent::BeginJob(_)) => {
                return Err(WorkerError::Busy(
                    self.current_job.clone().unwrap_or_default(),
                ));
            }
            (state, WorkerEvent::BeginJob(_)) => {
                return Err(WorkerError::NotAccepting(state.to_string()));
            }

            (WorkerState::Executing, WorkerEvent::FinishJob) => {
                self.current_job = None;
                self.resume
            }
            (state, WorkerEvent::FinishJob) => {
                self.current_job = None;
                state
            }

            (WorkerState::Idle, WorkerEvent::Stop) => WorkerState::Stopped,
            (WorkerState::Polling | WorkerState::Executing, WorkerEvent::Stop) => {
                WorkerState::Draining
            }
            (state @ (WorkerState::Draining | WorkerState::Stopped), WorkerEvent::Stop) => state,

            (WorkerState::Draining, WorkerEvent::Drained) => WorkerState::Stopped,
            (state, WorkerEvent::Drained) => state,
        };

        self.state = next;
        Ok(next)
    }
}
