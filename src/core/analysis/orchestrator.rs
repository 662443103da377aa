//! Tier state machine with degrade-on-failure.
//!
//! ```text
//! REQUESTED(t) -> RUNNING(t) -> COMPLETED(t)
//!                            -> DEGRADED(t -> lower) -> RUNNING(lower) -> ...
//!                            -> FAILED
//! ```

use super::{AnalysisInput, AnalysisResult, Analyzer, AnalyzerRegistry, Tier};
use crate::core::pipeline::ItemContext;
use crate::core::timeout::{call_with_timeout, CallError, Deadline};
use crate::error::{AnalysisError, InfraKind, InfrastructureError, Stage};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

const LOG_TARGET: &str = "pdf_gate::analysis";

/// A transition of the tier state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TierState {
    Requested(Tier),
    Running(Tier),
    Completed(Tier),
    Degraded { from: Tier, to: Tier },
    Failed,
}

impl fmt::Display for TierState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TierState::Requested(tier) => write!(f, "REQUESTED({})", tier),
            TierState::Running(tier) => write!(f, "RUNNING({})", tier),
            TierState::Completed(tier) => write!(f, "COMPLETED({})", tier),
            TierState::Degraded { from, to } => write!(f, "DEGRADED({} -> {})", from, to),
            TierState::Failed => write!(f, "FAILED"),
        }
    }
}

/// Runs analysis at a requested tier, degrading to lower tiers on failure
pub struct TierOrchestrator {
    registry: AnalyzerRegistry,
    timeout: Duration,
}

impl TierOrchestrator {
    pub fn new(registry: AnalyzerRegistry, timeout: Duration) -> Self {
        Self { registry, timeout }
    }

    /// Analyze `input` at `requested`, recording every transition in `ctx`
    ///
    /// A lower tier is tried only after a recoverable failure. If no tier
    /// succeeds the result is an analysis-stage infrastructure error.
    pub fn run(
        &self,
        requested: Tier,
        input: &AnalysisInput,
        ctx: &mut ItemContext,
    ) -> Result<AnalysisResult, InfrastructureError> {
        ctx.record_tier(TierState::Requested(requested));
        let mut reasons: Vec<String> = Vec::new();

        let mut current = if self.registry.get(requested).is_some() {
            requested
        } else {
            match self.registry.next_lower(requested) {
                Some(lower) => {
                    reasons.push(format!("{} analyzer not configured", requested));
                    self.degrade(ctx, requested, lower, &reasons);
                    lower
                }
                None => {
                    ctx.record_tier(TierState::Failed);
                    return Err(InfrastructureError::new(
                        Stage::Analysis,
                        InfraKind::Unavailable,
                        format!("no analyzer configured at or below {}", requested),
                    ));
                }
            }
        };

        loop {
            ctx.record_tier(TierState::Running(current));
            let Some(analyzer) = self.registry.get(current) else {
                ctx.record_tier(TierState::Failed);
                return Err(InfrastructureError::new(
                    Stage::Analysis,
                    InfraKind::Internal,
                    format!("{} analyzer disappeared from registry", current),
                ));
            };

            debug!(target: LOG_TARGET, item = %ctx.item_id, tier = %current, analyzer = analyzer.name(), "running analyzer");
            let error = match self.invoke(analyzer, input, ctx.deadline) {
                Ok(outcome) => {
                    ctx.record_tier(TierState::Completed(current));
                    let fallback_used = current != requested;
                    if fallback_used {
                        info!(target: LOG_TARGET, item = %ctx.item_id, requested = %requested, tier = %current, "completed at fallback tier");
                    }
                    return Ok(AnalysisResult {
                        tier: current,
                        requested_tier: requested,
                        score: outcome.score,
                        confidence: outcome.confidence,
                        issues: outcome.issues,
                        fallback_used,
                        fallback_reason: fallback_used.then(|| reasons.join("; ")),
                        ensemble: outcome.ensemble,
                    });
                }
                Err(error) => error,
            };

            reasons.push(format!("{} tier failed: {}", current, error));
            let lower = self.registry.next_lower(current);
            match lower {
                Some(lower) if error.is_recoverable() && !ctx.deadline.is_expired() => {
                    self.degrade(ctx, current, lower, &reasons);
                    current = lower;
                }
                _ => {
                    ctx.record_tier(TierState::Failed);
                    warn!(target: LOG_TARGET, item = %ctx.item_id, "analysis failed: {}", reasons.join("; "));
                    return Err(InfrastructureError::new(
                        Stage::Analysis,
                        error.infra_kind(),
                        reasons.join("; "),
                    ));
                }
            }
        }
    }

    fn degrade(&self, ctx: &mut ItemContext, from: Tier, to: Tier, reasons: &[String]) {
        warn!(
            target: LOG_TARGET,
            item = %ctx.item_id,
            from = %from,
            to = %to,
            "degrading analysis tier: {}",
            reasons.last().map(String::as_str).unwrap_or_default()
        );
        ctx.record_tier(TierState::Degraded { from, to });
    }

    fn invoke(
        &self,
        analyzer: &Arc<dyn Analyzer>,
        input: &AnalysisInput,
        deadline: Deadline,
    ) -> Result<super::TierOutcome, AnalysisError> {
        let analyzer = Arc::clone(analyzer);
        let input = input.clone();
        match call_with_timeout(deadline.clamp(self.timeout), move || analyzer.analyze(&input)) {
            Ok(result) => {
                let outcome = result?;
                outcome.ensure_finite()?;
                Ok(outcome)
            }
            Err(CallError::TimedOut(after)) => Err(AnalysisError::Timeout { after }),
            Err(CallError::Panicked) => Err(AnalysisError::Internal("analyzer panicked".to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::analysis::test_support::{content_page, input};
    use crate::core::analysis::{HeuristicAnalyzer, TierOutcome};

    struct Broken {
        tier: Tier,
        error: AnalysisError,
    }

    impl Analyzer for Broken {
        fn tier(&self) -> Tier {
            self.tier
        }
        fn name(&self) -> &str {
            "broken"
        }
        fn analyze(&self, _: &AnalysisInput) -> Result<TierOutcome, AnalysisError> {
            Err(self.error.clone())
        }
    }

    fn broken(tier: Tier, error: AnalysisError) -> Arc<dyn Analyzer> {
        Arc::new(Broken { tier, error })
    }

    fn ctx() -> ItemContext {
        ItemContext::new("item-1", Deadline::none())
    }

    fn sample() -> AnalysisInput {
        input(vec![content_page()], vec![content_page()])
    }

    #[test]
    fn requested_tier_completes_without_fallback() {
        let orchestrator = TierOrchestrator::new(
            AnalyzerRegistry::new().with(Arc::new(HeuristicAnalyzer::new())),
            Duration::from_secs(5),
        );
        let mut ctx = ctx();

        let result = orchestrator.run(Tier::Heuristic, &sample(), &mut ctx).unwrap();

        assert_eq!(result.tier, Tier::Heuristic);
        assert!(!result.fallback_used);
        assert!(result.fallback_reason.is_none());
        assert_eq!(
            ctx.tier_trace(),
            &[
                TierState::Requested(Tier::Heuristic),
                TierState::Running(Tier::Heuristic),
                TierState::Completed(Tier::Heuristic),
            ]
        );
    }

    #[test]
    fn top_tier_failure_degrades_to_next_configured_tier() {
        let orchestrator = TierOrchestrator::new(
            AnalyzerRegistry::new()
                .with(Arc::new(HeuristicAnalyzer::new()))
                .with(broken(Tier::Extraction, AnalysisError::Unavailable("no pdftotext".into())))
                .with(broken(
                    Tier::AiVisionEnsemble,
                    AnalysisError::AllBackendsFailed {
                        attempted: 2,
                        reasons: vec!["a: down".into(), "b: down".into()],
                    },
                )),
            Duration::from_secs(5),
        );
        let mut ctx = ctx();

        let result = orchestrator.run(Tier::AiVisionEnsemble, &sample(), &mut ctx).unwrap();

        assert!(result.fallback_used);
        assert_eq!(result.tier, Tier::Heuristic);
        assert_eq!(result.requested_tier, Tier::AiVisionEnsemble);
        let reason = result.fallback_reason.unwrap();
        assert!(reason.contains("aiVisionEnsemble tier failed"));
        assert!(reason.contains("no pdftotext"));
        assert!(ctx.tier_trace().contains(&TierState::Degraded {
            from: Tier::AiVisionEnsemble,
            to: Tier::Extraction,
        }));
    }

    #[test]
    fn unconfigured_tier_falls_back_visibly() {
        let orchestrator = TierOrchestrator::new(
            AnalyzerRegistry::new().with(Arc::new(HeuristicAnalyzer::new())),
            Duration::from_secs(5),
        );

        let result = orchestrator
            .run(Tier::Extraction, &sample(), &mut ctx())
            .unwrap();

        assert!(result.fallback_used);
        assert_eq!(result.tier, Tier::Heuristic);
    }

    #[test]
    fn lowest_tier_failure_is_an_infrastructure_error() {
        let orchestrator = TierOrchestrator::new(
            AnalyzerRegistry::new().with(broken(
                Tier::Heuristic,
                AnalysisError::Unsupported("empty".into()),
            )),
            Duration::from_secs(5),
        );
        let mut ctx = ctx();

        let err = orchestrator.run(Tier::Heuristic, &sample(), &mut ctx).unwrap_err();

        assert_eq!(err.stage, Stage::Analysis);
        assert_eq!(ctx.tier_trace().last(), Some(&TierState::Failed));
    }

    #[test]
    fn internal_errors_do_not_degrade() {
        let orchestrator = TierOrchestrator::new(
            AnalyzerRegistry::new()
                .with(Arc::new(HeuristicAnalyzer::new()))
                .with(broken(Tier::Extraction, AnalysisError::Internal("bug".into()))),
            Duration::from_secs(5),
        );

        let err = orchestrator
            .run(Tier::Extraction, &sample(), &mut ctx())
            .unwrap_err();

        assert_eq!(err.kind, InfraKind::Internal);
    }

    #[test]
    fn hung_analyzer_times_out_and_degrades() {
        struct Hung;
        impl Analyzer for Hung {
            fn tier(&self) -> Tier {
                Tier::Extraction
            }
            fn name(&self) -> &str {
                "hung"
            }
            fn analyze(&self, _: &AnalysisInput) -> Result<TierOutcome, AnalysisError> {
                std::thread::sleep(Duration::from_millis(500));
                TierOutcome::new(100.0, 1.0, Vec::new())
            }
        }

        let orchestrator = TierOrchestrator::new(
            AnalyzerRegistry::new()
                .with(Arc::new(HeuristicAnalyzer::new()))
                .with(Arc::new(Hung)),
            Duration::from_millis(30),
        );

        let result = orchestrator
            .run(Tier::Extraction, &sample(), &mut ctx())
            .unwrap();

        assert_eq!(result.tier, Tier::Heuristic);
        assert!(result.fallback_reason.unwrap().contains("timed out"));
    }

    #[test]
    fn nan_outcome_degrades_instead_of_completing() {
        struct NotANumber;
        impl Analyzer for NotANumber {
            fn tier(&self) -> Tier {
                Tier::Extraction
            }
            fn name(&self) -> &str {
                "nan"
            }
            fn analyze(&self, _: &AnalysisInput) -> Result<TierOutcome, AnalysisError> {
                Ok(TierOutcome {
                    score: f64::NAN,
                    confidence: 1.0,
                    issues: Vec::new(),
                    ensemble: None,
                })
            }
        }

        let orchestrator = TierOrchestrator::new(
            AnalyzerRegistry::new()
                .with(Arc::new(HeuristicAnalyzer::new()))
                .with(Arc::new(NotANumber)),
            Duration::from_secs(5),
        );

        let result = orchestrator
            .run(Tier::Extraction, &sample(), &mut ctx())
            .unwrap();

        assert_eq!(result.tier, Tier::Heuristic);
        assert!(result.score.is_finite());
        assert!(result.fallback_reason.unwrap().contains("not supported"));
    }
}
