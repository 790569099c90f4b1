//! healdec: auto-healing for failed background jobs.
//!
//! A failed job and its error go through [`classifier::FailureClassifier`],
//! and the resulting classification is handed to
//! [`orchestrator::HealingOrchestrator::heal`], which dispatches to a
//! registered [`strategy::RemediationStrategy`] and records the attempt.

pub mod classifier;
pub mod cli;
pub mod clock;
pub mod collaborators;
pub mod config;
pub mod demo;
pub mod error;
pub mod logging;
pub mod orchestrator;
pub mod state_machine;
pub mod strategy;
pub mod ui;
pub mod worker;

pub use classifier::{FailureCategory, FailureClassification, FailureClassifier, StrategyKind};
pub use error::{HealError, HealdecError, WorkerError};
pub use orchestrator::HealingOrchestrator;
