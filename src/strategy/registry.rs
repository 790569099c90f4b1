use std::sync::Arc;

use tracing::info;

use super::RemediationStrategy;
use crate::classifier::StrategyKind;

/// Fixed-size table of strategies indexed by [`StrategyKind`].
///
/// Registration is expected once at startup; lookups afterwards are shared.
#[derive(Default)]
pub struct StrategyRegistry {
    slots: [Option<Arc<dyn RemediationStrategy>>; StrategyKind::COUNT],
    order: Vec<StrategyKind>,
}

impl StrategyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a strategy under its kind. A later registration of the same kind
    /// replaces the earlier one but keeps its position in [`names`](Self::names).
    pub fn register(&mut self, strategy: Arc<dyn RemediationStrategy>) {
        let kind = strategy.kind();
        let replaced = self.slots[kind.index()].replace(strategy).is_some();
        if !replaced {
            self.order.push(kind);
        }
        info!(strategy = %kind, replaced, "Registered healing strategy");
    }

    pub fn lookup(&self, kind: StrategyKind) -> Option<Arc<dyn RemediationStrategy>> {
        self.slots[kind.index()].clone()
    }

    pub fn contains(&self, kind: StrategyKind) -> bool {
        self.slots[kind.index()].is_some()
    }

    /// Registered kinds in registration order.
    pub fn names(&self) -> Vec<StrategyKind> {
        self.order.clone()
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

impl std::fmt::Debug for StrategyRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StrategyRegistry")
            .field("strategies", &self.order)
            .finish()
    }
}
