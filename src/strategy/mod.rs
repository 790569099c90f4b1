//! Remediation strategies and the registry that dispatches to them.

mod registry;
mod restart;
mod retry;

use async_trait::async_trait;

use crate::classifier::{FailureCategory, StrategyKind};
use crate::error::HealdecError;
use crate::state_machine::{HealingAttempt, Job};

pub use registry::StrategyRegistry;
pub use restart::{RestartConfig, RestartConfigPatch, RestartStrategy};
pub use retry::{RetryConfig, RetryConfigPatch, RetryStrategy};

/// A remediation algorithm bound to one strategy kind.
///
/// Strategies report their outcome only through the returned boolean; the
/// attempt itself belongs to the orchestrator. `Ok(false)` means the strategy
/// declined (limits reached, nothing to act on). `Err` is a fault and is
/// propagated unchanged.
#[async_trait]
pub trait RemediationStrategy: Send + Sync {
    fn kind(&self) -> StrategyKind;

    fn can_handle(&self, category: FailureCategory) -> bool;

    async fn execute(&self, job: &mut Job, attempt: &HealingAttempt) -> Result<bool, HealdecError>;
}
