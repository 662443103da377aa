//! Consensus scoring across independent vision backends.
//!
//! Every backend is invoked on its own thread under one shared timeout.
//! Scores more than `max_deviation` points from the median are dropped as
//! outliers, and the rest are aggregated. When the survivors still spread
//! wider than `disagreement_threshold`, the result is marked as a
//! disagreement and carries the full per-backend breakdown.
//!
//! A consensus needs at least [`MIN_BACKENDS`] backends. A backend whose
//! score is NaN counts as failed, not as a vote.

use super::{AnalysisInput, Analyzer, FeatureScores, Issue, Severity, Tier, TierOutcome};
use crate::error::AnalysisError;
use crossbeam_channel::{unbounded, RecvTimeoutError};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

const LOG_TARGET: &str = "pdf_gate::ensemble";

/// Fewest backends the ensemble tier is registered with
pub const MIN_BACKENDS: usize = 2;

/// An external vision model that scores a rendered document
pub trait VisionBackend: Send + Sync {
    fn name(&self) -> &str;

    fn evaluate(&self, input: &AnalysisInput) -> Result<BackendVerdict, AnalysisError>;
}

/// A backend's per-feature scores and findings
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BackendVerdict {
    pub features: FeatureScores,
    pub issues: Vec<Issue>,
}

/// How surviving scores are combined
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Aggregate {
    Mean,
    #[default]
    Median,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EnsembleConfig {
    pub aggregate: Aggregate,
    /// Points from the median beyond which a score is an outlier
    pub max_deviation: f64,
    /// Spread of surviving scores above which backends disagree
    pub disagreement_threshold: f64,
    pub timeout_secs: u64,
}

impl Default for EnsembleConfig {
    fn default() -> Self {
        Self {
            aggregate: Aggregate::Median,
            max_deviation: 15.0,
            disagreement_threshold: 20.0,
            timeout_secs: 60,
        }
    }
}

impl EnsembleConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// One backend's contribution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackendScore {
    pub backend: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Excluded from the consensus as a statistical outlier
    pub outlier: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnsembleResult {
    pub per_backend_scores: Vec<BackendScore>,
    pub consensus_score: f64,
    pub disagreement: bool,
    pub surviving_backends: Vec<String>,
    /// Some backend failed or timed out
    pub reduced_confidence: bool,
    pub excluded: Vec<String>,
}

/// Runs backends concurrently and reduces them to a consensus
pub struct EnsembleScorer {
    backends: Vec<Arc<dyn VisionBackend>>,
    config: EnsembleConfig,
}

fn median(sorted: &[f64]) -> f64 {
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    }
}

impl EnsembleScorer {
    pub fn new(backends: Vec<Arc<dyn VisionBackend>>, config: EnsembleConfig) -> Self {
        Self { backends, config }
    }

    /// Invoke every backend and build the consensus
    ///
    /// Returns the ensemble breakdown, issues from surviving backends and a
    /// confidence in `0..=1`.
    pub fn score(
        &self,
        input: &AnalysisInput,
    ) -> Result<(EnsembleResult, Vec<Issue>, f64), AnalysisError> {
        if self.backends.is_empty() {
            return Err(AnalysisError::Unavailable(
                "no vision backends configured".to_string(),
            ));
        }

        let verdicts = self.collect(input);

        let mut per_backend = Vec::with_capacity(self.backends.len());
        let mut scored: Vec<(usize, f64, Vec<Issue>)> = Vec::new();
        let mut reasons = Vec::new();

        for (index, (backend, verdict)) in self.backends.iter().zip(verdicts).enumerate() {
            let name = backend.name().to_string();
            let outcome = verdict.and_then(|v| {
                let score = input.weights.weighted_score(&v.features)?;
                Ok((score, v.issues))
            });

            match outcome {
                Ok((score, issues)) => {
                    debug!(target: LOG_TARGET, backend = %name, score, "backend scored");
                    per_backend.push(BackendScore {
                        backend: name,
                        score: Some(score),
                        error: None,
                        outlier: false,
                    });
                    scored.push((index, score, issues));
                }
                Err(e) => {
                    warn!(target: LOG_TARGET, backend = %name, "backend failed: {}", e);
                    reasons.push(format!("{}: {}", name, e));
                    per_backend.push(BackendScore {
                        backend: name,
                        score: None,
                        error: Some(e.to_string()),
                        outlier: false,
                    });
                }
            }
        }

        if scored.is_empty() {
            return Err(AnalysisError::AllBackendsFailed {
                attempted: self.backends.len(),
                reasons,
            });
        }

        let mut sorted: Vec<f64> = scored.iter().map(|(_, s, _)| *s).collect();
        sorted.sort_by(f64::total_cmp);
        let center = median(&sorted);

        let mut survivors: Vec<&(usize, f64, Vec<Issue>)> = scored
            .iter()
            .filter(|(_, s, _)| (s - center).abs() <= self.config.max_deviation)
            .collect();
        if survivors.is_empty() {
            survivors = scored.iter().collect();
        }

        let mut excluded = Vec::new();
        for (index, _, _) in &scored {
            if !survivors.iter().any(|(i, _, _)| i == index) {
                per_backend[*index].outlier = true;
                excluded.push(per_backend[*index].backend.clone());
            }
        }

        let mut surviving: Vec<f64> = survivors.iter().map(|(_, s, _)| *s).collect();
        surviving.sort_by(f64::total_cmp);
        let consensus_score = match self.config.aggregate {
            Aggregate::Mean => surviving.iter().sum::<f64>() / surviving.len() as f64,
            Aggregate::Median => median(&surviving),
        };
        let spread = surviving[surviving.len() - 1] - surviving[0];
        let disagreement = spread > self.config.disagreement_threshold;
        let reduced_confidence = scored.len() < self.backends.len();

        let mut confidence = survivors.len() as f64 / self.backends.len() as f64;
        let mut issues: Vec<Issue> = survivors
            .iter()
            .flat_map(|(index, _, found)| {
                let name = per_backend[*index].backend.clone();
                found.iter().cloned().map(move |mut issue| {
                    issue.message = format!("[{}] {}", name, issue.message);
                    issue
                })
            })
            .collect();

        if disagreement {
            confidence /= 2.0;
            warn!(target: LOG_TARGET, spread, "vision backends disagree");
            issues.push(Issue::new(
                Severity::Warning,
                format!("vision backends disagree by {:.1} points", spread),
            ));
        }

        let result = EnsembleResult {
            surviving_backends: survivors
                .iter()
                .map(|(index, _, _)| per_backend[*index].backend.clone())
                .collect(),
            per_backend_scores: per_backend,
            consensus_score,
            disagreement,
            reduced_confidence,
            excluded,
        };

        Ok((result, issues, confidence))
    }

    /// Run all backends in parallel, one slot per backend in order
    ///
    /// Waits for the ensemble timeout or the item deadline, whichever comes
    /// first.
    fn collect(&self, input: &AnalysisInput) -> Vec<Result<BackendVerdict, AnalysisError>> {
        let timeout = input.deadline.clamp(self.config.timeout());
        let (sender, receiver) = unbounded();

        for (index, backend) in self.backends.iter().enumerate() {
            let backend = Arc::clone(backend);
            let input = input.clone();
            let sender = sender.clone();
            thread::spawn(move || {
                // The scorer stops listening once the wait below gives up
                let _ = sender.send((index, backend.evaluate(&input)));
            });
        }
        drop(sender);

        let mut slots: Vec<Option<Result<BackendVerdict, AnalysisError>>> =
            (0..self.backends.len()).map(|_| None).collect();
        let give_up = Instant::now() + timeout;

        let mut pending = self.backends.len();
        while pending > 0 {
            match receiver.recv_deadline(give_up) {
                Ok((index, verdict)) => {
                    slots[index] = Some(verdict);
                    pending -= 1;
                }
                Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => break,
            }
        }

        slots
            .into_iter()
            .map(|slot| slot.unwrap_or_else(|| Err(AnalysisError::Timeout { after: timeout })))
            .collect()
    }
}

/// Top tier: an [`EnsembleScorer`] behind the [`Analyzer`] interface
pub struct EnsembleAnalyzer {
    scorer: EnsembleScorer,
}

impl EnsembleAnalyzer {
    pub fn new(scorer: EnsembleScorer) -> Self {
        Self { scorer }
    }
}

impl Analyzer for EnsembleAnalyzer {
    fn tier(&self) -> Tier {
        Tier::AiVisionEnsemble
    }

    fn name(&self) -> &str {
        "ai-vision-ensemble"
    }

    fn analyze(&self, input: &AnalysisInput) -> Result<TierOutcome, AnalysisError> {
        let (ensemble, issues, confidence) = self.scorer.score(input)?;
        let mut outcome = TierOutcome::new(ensemble.consensus_score, confidence, issues)?;
        outcome.ensemble = Some(ensemble);
        Ok(outcome)
    }
}
