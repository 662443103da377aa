//! Analyzer capability trait and the tier lookup table.

use super::{AnalysisInput, Tier, TierOutcome};
use crate::error::AnalysisError;
use std::collections::BTreeMap;
use std::sync::Arc;

/// A content analyzer for one tier
pub trait Analyzer: Send + Sync {
    /// The tier this analyzer implements
    fn tier(&self) -> Tier;

    /// Short human-readable name for logs
    fn name(&self) -> &str;

    /// Score the input
    ///
    /// Recoverable errors (see [`AnalysisError::is_recoverable`]) make the
    /// orchestrator degrade to a lower tier.
    fn analyze(&self, input: &AnalysisInput) -> Result<TierOutcome, AnalysisError>;
}

/// Analyzers keyed by tier
#[derive(Default, Clone)]
pub struct AnalyzerRegistry {
    analyzers: BTreeMap<Tier, Arc<dyn Analyzer>>,
}

impl AnalyzerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an analyzer, replacing any previous one for its tier
    pub fn register(&mut self, analyzer: Arc<dyn Analyzer>) {
        self.analyzers.insert(analyzer.tier(), analyzer);
    }

    pub fn with(mut self, analyzer: Arc<dyn Analyzer>) -> Self {
        self.register(analyzer);
        self
    }

    pub fn get(&self, tier: Tier) -> Option<&Arc<dyn Analyzer>> {
        self.analyzers.get(&tier)
    }

    /// Highest registered tier strictly below `tier`
    pub fn next_lower(&self, tier: Tier) -> Option<Tier> {
        self.analyzers.range(..tier).next_back().map(|(t, _)| *t)
    }
}

impl std::fmt::Debug for AnalyzerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_map()
            .entries(self.analyzers.iter().map(|(tier, a)| (tier, a.name())))
            .finish()
    }
}
