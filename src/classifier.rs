//! Failure classification.
//!
//! [`FailureClassifier`] maps the text of an error to a [`FailureCategory`]
//! using five pattern families evaluated in a fixed priority order. The first
//! family with a matching pattern wins, so an error that mentions both a
//! timeout and a crash is classified as transient.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::state_machine::Job;

/// Kind of failure that terminated a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureCategory {
    Transient,
    Crash,
    DataError,
    PartialSuccess,
    Critical,
}

impl FailureCategory {
    /// Categories in classification priority order.
    pub const PRIORITY: [FailureCategory; 5] = [
        FailureCategory::Transient,
        FailureCategory::Crash,
        FailureCategory::DataError,
        FailureCategory::PartialSuccess,
        FailureCategory::Critical,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            FailureCategory::Transient => "transient",
            FailureCategory::Crash => "crash",
            FailureCategory::DataError => "data_error",
            FailureCategory::PartialSuccess => "partial_success",
            FailureCategory::Critical => "critical",
        }
    }

    pub fn confidence(&self) -> f64 {
        match self {
            FailureCategory::Transient => 0.9,
            FailureCategory::Crash => 0.85,
            FailureCategory::DataError => 0.8,
            FailureCategory::PartialSuccess => 0.75,
            FailureCategory::Critical => 0.7,
        }
    }

    pub fn reasoning(&self) -> &'static str {
        match self {
            FailureCategory::Transient => {
                "Error indicates a temporary issue (network, timeout, or rate limit)"
            }
            FailureCategory::Crash => "Worker process crashed or became unresponsive",
            FailureCategory::DataError => "Invalid or corrupted data caused the failure",
            FailureCategory::PartialSuccess => "Operation partially succeeded but needs rollback",
            FailureCategory::Critical => "Unknown error type - requires manual intervention",
        }
    }

    pub fn recommended_strategy(&self) -> StrategyKind {
        match self {
            FailureCategory::Transient => StrategyKind::Retry,
            FailureCategory::Crash => StrategyKind::Restart,
            FailureCategory::DataError => StrategyKind::Quarantine,
            FailureCategory::PartialSuccess => StrategyKind::Rollback,
            FailureCategory::Critical => StrategyKind::Escalate,
        }
    }
}

impl fmt::Display for FailureCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FailureCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        FailureCategory::PRIORITY
            .into_iter()
            .find(|category| category.as_str() == s)
            .ok_or_else(|| format!("unknown failure category: {s}"))
    }
}

/// Remediation strategies known to the healing engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    Retry,
    Restart,
    Quarantine,
    Rollback,
    Escalate,
}

impl StrategyKind {
    pub const COUNT: usize = 5;

    pub const ALL: [StrategyKind; StrategyKind::COUNT] = [
        StrategyKind::Retry,
        StrategyKind::Restart,
        StrategyKind::Quarantine,
        StrategyKind::Rollback,
        StrategyKind::Escalate,
    ];

    /// Slot of this strategy in fixed-size tables.
    pub fn index(&self) -> usize {
        match self {
            StrategyKind::Retry => 0,
            StrategyKind::Restart => 1,
            StrategyKind::Quarantine => 2,
            StrategyKind::Rollback => 3,
            StrategyKind::Escalate => 4,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StrategyKind::Retry => "retry",
            StrategyKind::Restart => "restart",
            StrategyKind::Quarantine => "quarantine",
            StrategyKind::Rollback => "rollback",
            StrategyKind::Escalate => "escalate",
        }
    }

    /// Strategy for a category given by name. Unknown names escalate.
    pub fn recommended_for_name(category: &str) -> StrategyKind {
        category
            .parse::<FailureCategory>()
            .map(|c| c.recommended_strategy())
            .unwrap_or(StrategyKind::Escalate)
    }
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StrategyKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        StrategyKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| format!("unknown strategy: {s}"))
    }
}

/// Result of classifying one failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureClassification {
    pub category: FailureCategory,
    /// Confidence in the category, 0.0 - 1.0.
    pub confidence: f64,
    pub recommended_strategy: StrategyKind,
    pub reasoning: String,
}

impl FailureClassification {
    pub fn for_category(category: FailureCategory) -> Self {
        Self {
            category,
            confidence: category.confidence(),
            recommended_strategy: category.recommended_strategy(),
            reasoning: category.reasoning().to_string(),
        }
    }
}

/// A single textual pattern of a failure family.
#[derive(Debug, Clone, Copy)]
enum Pattern {
    /// Case-insensitive substring.
    Contains(&'static str),
    /// Case-sensitive substring (status codes).
    Exact(&'static str),
    /// Two case-insensitive substrings, the second after the first.
    Sequence(&'static str, &'static str),
}

impl Pattern {
    fn matches(&self, original: &str, lower: &str) -> bool {
        match *self {
            Pattern::Contains(needle) => lower.contains(needle),
            Pattern::Exact(needle) => original.contains(needle),
            Pattern::Sequence(first, second) => lower
                .find(first)
                .is_some_and(|pos| lower[pos + first.len()..].contains(second)),
        }
    }
}

const TRANSIENT_PATTERNS: &[Pattern] = &[
    Pattern::Contains("timeout"),
    Pattern::Contains("network"),
    Pattern::Contains("econnreset"),
    Pattern::Contains("etimedout"),
    Pattern::Contains("rate limit"),
    Pattern::Exact("503"),
    Pattern::Exact("502"),
    Pattern::Exact("429"),
];

const CRASH_PATTERNS: &[Pattern] = &[
    Pattern::Sequence("worker", "crashed"),
    Pattern::Sequence("process", "terminated"),
    Pattern::Contains("sigterm"),
    Pattern::Contains("sigkill"),
    Pattern::Contains("exit code"),
];

const DATA_ERROR_PATTERNS: &[Pattern] = &[
    Pattern::Contains("validation"),
    Pattern::Contains("invalid data"),
    Pattern::Contains("parse error"),
    Pattern::Contains("malformed"),
    Pattern::Contains("corrupt"),
];

const PARTIAL_SUCCESS_PATTERNS: &[Pattern] = &[
    Pattern::Contains("partial"),
    Pattern::Contains("incomplete"),
    Pattern::Contains("rollback"),
];

/// Pattern families in priority order; anything unmatched is critical.
const FAMILIES: &[(FailureCategory, &[Pattern])] = &[
    (FailureCategory::Transient, TRANSIENT_PATTERNS),
    (FailureCategory::Crash, CRASH_PATTERNS),
    (FailureCategory::DataError, DATA_ERROR_PATTERNS),
    (FailureCategory::PartialSuccess, PARTIAL_SUCCESS_PATTERNS),
];

/// Classifies job failures from the text of their error.
pub struct FailureClassifier;

impl FailureClassifier {
    /// Classify a failure. Pure: the same error text always yields the same
    /// classification.
    pub fn classify<E>(job: &Job, error: &E) -> FailureClassification
    where
        E: fmt::Display + ?Sized,
    {
        let message = error.to_string();
        let category = Self::categorize(&message);

        debug!(
            job_id = %job.id,
            error = %message,
            category = %category,
            "Classified failure"
        );

        FailureClassification::for_category(category)
    }

    /// Category of the first pattern family matching `message`.
    pub fn categorize(message: &str) -> FailureCategory {
        let lower = message.to_lowercase();
        FAMILIES
            .iter()
            .find(|(_, patterns)| patterns.iter().any(|p| p.matches(message, &lower)))
            .map(|(category, _)| *category)
            .unwrap_or(FailureCategory::Critical)
    }
}
