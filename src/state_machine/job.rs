use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The closed set of job kinds produced by the scheduling pipelines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    Index,
    Identity,
    Score,
    Ingest,
    Sync,
    Gc,
    Alert,
    Export,
    Audit,
    Repair,
    Backfill,
    Maintenance,
}

impl JobKind {
    pub const ALL: [JobKind; 12] = [
        JobKind::Index,
        JobKind::Identity,
        JobKind::Score,
        JobKind::Ingest,
        JobKind::Sync,
        JobKind::Gc,
        JobKind::Alert,
        JobKind::Export,
        JobKind::Audit,
        JobKind::Repair,
        JobKind::Backfill,
        JobKind::Maintenance,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::Index => "index",
            JobKind::Identity => "identity",
            JobKind::Score => "score",
            JobKind::Ingest => "ingest",
            JobKind::Sync => "sync",
            JobKind::Gc => "gc",
            JobKind::Alert => "alert",
            JobKind::Export => "export",
            JobKind::Audit => "audit",
            JobKind::Repair => "repair",
            JobKind::Backfill => "backfill",
            JobKind::Maintenance => "maintenance",
        }
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.to_lowercase();
        JobKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == lower)
            .ok_or_else(|| format!("unknown job kind: {s}"))
    }
}

/// Lifecycle status of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Quarantined,
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobStatus::Pending => write!(f, "pending"),
            JobStatus::Running => write!(f, "running"),
            JobStatus::Completed => write!(f, "completed"),
            JobStatus::Failed => write!(f, "failed"),
            JobStatus::Quarantined => write!(f, "quarantined"),
        }
    }
}

const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// A unit of work that may fail and become a candidate for healing.
///
/// `attempts <= max_attempts` is not enforced here; strategies decline to act
/// once the limit is reached.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub kind: JobKind,
    pub status: JobStatus,
    pub payload: serde_json::Value,
    pub worker_id: Option<String>,
    pub attempts: u32,
    pub max_attempts: u32,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
    pub metadata: Option<serde_json::Value>,
}

impl Job {
    pub fn new(kind: JobKind, payload: serde_json::Value) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            kind,
            status: JobStatus::Pending,
            payload,
            worker_id: None,
            attempts: 0,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            error: None,
            metadata: None,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_worker(mut self, worker_id: impl Into<String>) -> Self {
        self.worker_id = Some(worker_id.into());
        self
    }

    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = attempts;
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Marks the job as failed with the given error text.
    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.status = JobStatus::Failed;
        self.error = Some(error.into());
        self
    }

    pub fn has_attempts_left(&self) -> bool {
        self.attempts < self.max_attempts
    }

    /// Puts the job back in the pending state so the scheduler picks it up again.
    pub fn reset_for_reassignment(&mut self) {
        self.status = JobStatus::Pending;
        self.error = None;
        self.started_at = None;
    }
}
