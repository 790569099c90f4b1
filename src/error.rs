use std::time::Duration;

use thiserror::Error;

use crate::classifier::StrategyKind;
use crate::state_machine::{HealingAttempt, HealingStatus};

#[derive(Debug, Error)]
pub enum HealdecError {
    #[error("Strategy not found: {0}")]
    StrategyNotFound(StrategyKind),

    #[error("Collaborator error ({operation}): {message}")]
    Collaborator { operation: String, message: String },

    #[error("Job timeout after {}ms", .0.as_millis())]
    JobTimeout(Duration),

    #[error("Job failed: {0}")]
    Job(String),

    #[error("Invalid healing status transition: {from} -> {to}")]
    InvalidTransition { from: HealingStatus, to: HealingStatus },

    #[error("Worker error: {0}")]
    Worker(#[from] WorkerError),

    #[error("Config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl HealdecError {
    /// Shorthand for failures reported by an external collaborator.
    pub fn collaborator(operation: impl Into<String>, message: impl Into<String>) -> Self {
        HealdecError::Collaborator {
            operation: operation.into(),
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WorkerError {
    #[error("Worker is already running")]
    AlreadyRunning,

    #[error("Worker is busy with job {0}")]
    Busy(String),

    #[error("Worker is not accepting jobs (state: {0})")]
    NotAccepting(String),

    #[error("Worker task panicked: {0}")]
    Panicked(String),
}

/// A `heal` call that ended in a fault rather than a plain outcome.
///
/// The attempt has already been finalized as failed and handed to the event
/// sink by the time this error reaches the caller.
#[derive(Debug, Error)]
#[error("Healing attempt {} failed: {}", .attempt.id, .source)]
pub struct HealError {
    pub attempt: Box<HealingAttempt>,
    #[source]
    pub source: HealdecError,
}

impl HealError {
    pub fn is_strategy_not_found(&self) -> bool {
        matches!(self.source, HealdecError::StrategyNotFound(_))
    }
}
