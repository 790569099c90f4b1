use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use super::job::Job;
use crate::classifier::{FailureCategory, FailureClassification, StrategyKind};
use crate::error::HealdecError;

/// Status of a single healing attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealingStatus {
    Pending,
    InProgress,
    Succeeded,
    Failed,
}

impl HealingStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, HealingStatus::Succeeded | HealingStatus::Failed)
    }

    /// Transitions only move forward: pending → in_progress → terminal.
    pub fn can_transition_to(&self, next: HealingStatus) -> bool {
        match self {
            HealingStatus::Pending => next != HealingStatus::Pending,
            HealingStatus::InProgress => next.is_terminal(),
            HealingStatus::Succeeded | HealingStatus::Failed => false,
        }
    }
}

impl fmt::Display for HealingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HealingStatus::Pending => write!(f, "pending"),
            HealingStatus::InProgress => write!(f, "in_progress"),
            HealingStatus::Succeeded => write!(f, "succeeded"),
            HealingStatus::Failed => write!(f, "failed"),
        }
    }
}

/// One remediation attempt for one job failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealingAttempt {
    pub id: String,
    pub job_id: String,
    pub failure_category: FailureCategory,
    pub strategy: StrategyKind,
    pub status: HealingStatus,
    pub attempts: u32,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub details: Option<serde_json::Value>,
    pub error: Option<String>,
}

impl HealingAttempt {
    /// Opens an attempt in the `in_progress` state, copying the job's attempt count.
    pub fn begin(
        job: &Job,
        classification: &FailureClassification,
        started_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: format!("heal-{}-{}", job.id, started_at.timestamp_millis()),
            job_id: job.id.clone(),
            failure_category: classification.category,
            strategy: classification.recommended_strategy,
            status: HealingStatus::InProgress,
            attempts: job.attempts,
            started_at,
            completed_at: None,
            details: Some(json!({
                "confidence": classification.confidence,
                "reasoning": classification.reasoning,
            })),
            error: None,
        }
    }

    pub fn transition(&mut self, next: HealingStatus) -> Result<(), HealdecError> {
        if !self.status.can_transition_to(next) {
            return Err(HealdecError::InvalidTransition {
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        Ok(())
    }

    /// Moves the attempt to a terminal status and stamps `completed_at`.
    pub fn finish(
        &mut self,
        status: HealingStatus,
        completed_at: DateTime<Utc>,
    ) -> Result<(), HealdecError> {
        if !status.is_terminal() {
            return Err(HealdecError::InvalidTransition {
                from: self.status,
                to: status,
            });
        }
        self.transition(status)?;
        self.completed_at = Some(completed_at);
        Ok(())
    }

    /// Finishes the attempt as failed and records the error text.
    pub fn fail(
        &mut self,
        error: impl Into<String>,
        completed_at: DateTime<Utc>,
    ) -> Result<(), HealdecError> {
        self.finish(HealingStatus::Failed, completed_at)?;
        self.error = Some(error.into());
        Ok(())
    }

    pub fn duration_ms(&self) -> Option<i64> {
        self.completed_at
            .map(|done| (done - self.started_at).num_milliseconds())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventSeverity {
    Info,
    Warning,
    Error,
    Critical,
}

/// Timeline entry emitted for a finished healing attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealingEvent {
    pub id: String,
    pub event_type: String,
    pub severity: EventSeverity,
    pub message: String,
    pub details: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl HealingEvent {
    pub fn from_attempt(attempt: &HealingAttempt) -> Self {
        let severity = match (attempt.status, &attempt.error) {
            (HealingStatus::Succeeded, _) => EventSeverity::Info,
            _ if attempt.failure_category == FailureCategory::Critical => EventSeverity::Critical,
            (_, Some(_)) => EventSeverity::Error,
            _ => EventSeverity::Warning,
        };
        let message = match &attempt.error {
            Some(err) => format!(
                "{} healing of job {} {}: {err}",
                attempt.strategy, attempt.job_id, attempt.status
            ),
            None => format!(
                "{} healing of job {} {}",
                attempt.strategy, attempt.job_id, attempt.status
            ),
        };

        Self {
            id: Uuid::new_v4().to_string(),
            event_type: "healing".to_string(),
            severity,
            message,
            details: serde_json::to_value(attempt).unwrap_or(serde_json::Value::Null),
            created_at: attempt.completed_at.unwrap_or_else(Utc::now),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::FailureClassifier;
    use crate::state_machine::JobKind;

    fn attempt_for(error: &str) -> HealingAttempt {
        let job = Job::new(JobKind::Index, json!({}))
            .with_id("job-1")
            .with_attempts(2);
        let classification = FailureClassifier::classify(&job, error);
        HealingAttempt::begin(&job, &classification, Utc::now())
    }

    #[test]
    fn begin_copies_job_state() {
        let attempt = attempt_for("ECONNRESET");
        assert!(attempt.id.starts_with("heal-job-1-"));
        assert_eq!(attempt.job_id, "job-1");
        assert_eq!(attempt.attempts, 2);
        assert_eq!(attempt.status, HealingStatus::InProgress);
        assert_eq!(attempt.strategy, StrategyKind::Retry);
        assert_eq!(attempt.details.as_ref().unwrap()["confidence"], 0.9);
    }

    #[test]
    fn finish_stamps_completion() {
        let mut attempt = attempt_for("ECONNRESET");
        attempt.finish(HealingStatus::Succeeded, Utc::now()).unwrap();
        assert_eq!(attempt.status, HealingStatus::Succeeded);
        assert!(attempt.completed_at.is_some());
        assert!(attempt.duration_ms().unwrap() >= 0);
    }

    #[test]
    fn terminal_status_never_moves_backward() {
        let mut attempt = attempt_for("ECONNRESET");
        attempt.fail("nope", Utc::now()).unwrap();

        assert!(attempt.transition(HealingStatus::InProgress).is_err());
        assert!(attempt.finish(HealingStatus::Succeeded, Utc::now()).is_err());
        assert_eq!(attempt.status, HealingStatus::Failed);
        assert_eq!(attempt.error.as_deref(), Some("nope"));
    }

    #[test]
    fn finish_rejects_non_terminal_status() {
        let mut attempt = attempt_for("ECONNRESET");
        let err = attempt.finish(HealingStatus::Pending, Utc::now()).unwrap_err();
        assert!(matches!(err, HealdecError::InvalidTransition { .. }));
        assert_eq!(attempt.status, HealingStatus::InProgress);
    }

    #[test]
    fn status_transition_table() {
        use HealingStatus::*;
        assert!(Pending.can_transition_to(InProgress));
        assert!(Pending.can_transition_to(Failed));
        assert!(!Pending.can_transition_to(Pending));
        assert!(InProgress.can_transition_to(Succeeded));
        assert!(!InProgress.can_transition_to(Pending));
        assert!(!Succeeded.can_transition_to(Failed));
    }

    #[test]
    fn event_severity_follows_outcome() {
        let mut ok = attempt_for("ECONNRESET");
        ok.finish(HealingStatus::Succeeded, Utc::now()).unwrap();
        assert_eq!(HealingEvent::from_attempt(&ok).severity, EventSeverity::Info);

        let mut declined = attempt_for("ECONNRESET");
        declined.finish(HealingStatus::Failed, Utc::now()).unwrap();
        assert_eq!(
            HealingEvent::from_attempt(&declined).severity,
            EventSeverity::Warning
        );

        let mut faulted = attempt_for("ECONNRESET");
        faulted.fail("queue down", Utc::now()).unwrap();
        let event = HealingEvent::from_attempt(&faulted);
        assert_eq!(event.severity, EventSeverity::Error);
        assert_eq!(event.event_type, "healing");
        assert!(event.message.ends_with("queue down"));
        assert_eq!(event.details["job_id"], "job-1");
    }

    #[test]
    fn unhealed_critical_failure_is_critical() {
        let mut attempt = attempt_for("disk quota exceeded");
        assert_eq!(attempt.failure_category, FailureCategory::Critical);
        attempt.fail("Strategy not found: escalate", Utc::now()).unwrap();
        assert_eq!(
            HealingEvent::from_attempt(&attempt).severity,
            EventSeverity::Critical
        );

        let mut healed = attempt_for("disk quota exceeded");
        healed.finish(HealingStatus::Succeeded, Utc::now()).unwrap();
        assert_eq!(HealingEvent::from_attempt(&healed).severity, EventSeverity::Info);
    }
}
