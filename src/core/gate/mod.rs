//! # Gate Module
//!
//! Pure pass/fail decision for one item.
//!
//! The overall score blends a diff component (mean of `100 - diffPercentage`
//! over pages) with the analysis score. An item passes when the score reaches
//! the threshold and nothing critical was found; infrastructure errors
//! anywhere upstream override both. A score that is not a finite number
//! never passes.
//!
//! An optional `maxVisualDiff` also fails items whose mean page diff is too
//! high, however well their content scored.

use crate::core::analysis::{AnalysisResult, Severity};
use crate::core::diff::{DiffClass, DiffResult};
use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Final status of an item or batch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GateStatus {
    Pass,
    Fail,
    InfraError,
}

impl GateStatus {
    /// Process exit code, shared by single-item and batch runs
    pub fn exit_code(self) -> u8 {
        match self {
            GateStatus::Pass => 0,
            GateStatus::Fail => 1,
            GateStatus::InfraError => 3,
        }
    }
}

impl fmt::Display for GateStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GateStatus::Pass => write!(f, "PASS"),
            GateStatus::Fail => write!(f, "FAIL"),
            GateStatus::InfraError => write!(f, "INFRA_ERROR"),
        }
    }
}

/// Relative weight of the diff and content components
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GateWeights {
    pub diff: f64,
    pub content: f64,
}

impl Default for GateWeights {
    fn default() -> Self {
        Self {
            diff: 0.5,
            content: 0.5,
        }
    }
}

impl GateWeights {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let valid = |w: f64| w.is_finite() && w >= 0.0;
        if !valid(self.diff) || !valid(self.content) || self.diff + self.content <= 0.0 {
            return Err(ConfigError::Invalid(
                "gateWeights must be non-negative and not both zero".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GateDecision {
    pub status: GateStatus,
    pub overall_score: f64,
    pub reasons: Vec<String>,
}

impl GateDecision {
    pub fn infrastructure(reason: impl Into<String>) -> Self {
        Self {
            status: GateStatus::InfraError,
            overall_score: 0.0,
            reasons: vec![reason.into()],
        }
    }
}

/// Mean of `100 - diffPercentage` across pages, floored at 0
pub fn diff_component(diffs: &[DiffResult]) -> f64 {
    if diffs.is_empty() {
        return 100.0;
    }
    diffs
        .iter()
        .map(|d| (100.0 - d.diff_percentage).max(0.0))
        .sum::<f64>()
        / diffs.len() as f64
}

/// Everything the gate needs besides the item's results
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GatePolicy {
    /// Minimum overall score, 0-100
    pub threshold: f64,
    pub fail_on_critical_issues: bool,
    /// Largest mean `diffPercentage` across pages still allowed
    pub max_visual_diff: Option<f64>,
    pub weights: GateWeights,
}

impl Default for GatePolicy {
    fn default() -> Self {
        Self {
            threshold: 80.0,
            fail_on_critical_issues: false,
            max_visual_diff: None,
            weights: GateWeights::default(),
        }
    }
}

/// Mean `diffPercentage` across pages, 0 when there are none
pub fn mean_visual_diff(diffs: &[DiffResult]) -> f64 {
    if diffs.is_empty() {
        return 0.0;
    }
    diffs.iter().map(|d| d.diff_percentage).sum::<f64>() / diffs.len() as f64
}

/// Decide PASS or FAIL for an item whose stages all succeeded
pub fn evaluate(analysis: &AnalysisResult, diffs: &[DiffResult], policy: &GatePolicy) -> GateDecision {
    let weights = &policy.weights;
    let diff_score = diff_component(diffs);
    let total_weight = weights.diff + weights.content;
    let blended = if total_weight > 0.0 {
        (weights.diff * diff_score + weights.content * analysis.score) / total_weight
    } else {
        analysis.score
    };

    let mut reasons = Vec::new();
    // NaN compares false against any threshold, so it is rejected outright
    let overall_score = if blended.is_finite() {
        if blended < policy.threshold {
            reasons.push(format!(
                "score {:.1} is below threshold {:.1}",
                blended, policy.threshold
            ));
        }
        blended
    } else {
        reasons.push(format!("overall score is not a finite number ({})", blended));
        0.0
    };

    let critical_pages: Vec<String> = diffs
        .iter()
        .filter(|d| d.classification == DiffClass::Critical)
        .map(|d| d.page.to_string())
        .collect();
    if !critical_pages.is_empty() {
        reasons.push(format!(
            "critical visual diff on page(s) {}",
            critical_pages.join(", ")
        ));
    }

    if let Some(max_visual_diff) = policy.max_visual_diff {
        let mean = mean_visual_diff(diffs);
        if mean > max_visual_diff {
            reasons.push(format!(
                "average visual diff {:.2}% exceeds {:.2}%",
                mean, max_visual_diff
            ));
        }
    }

    if policy.fail_on_critical_issues {
        if analysis.ensemble.as_ref().is_some_and(|e| e.disagreement) {
            reasons.push("analysis backends disagree".to_string());
        }
        let critical_issues = analysis
            .issues
            .iter()
            .filter(|i| i.severity == Severity::Critical)
            .count();
        if critical_issues > 0 {
            reasons.push(format!("{} critical analysis issue(s)", critical_issues));
        }
    }

    let status = if reasons.is_empty() {
        GateStatus::Pass
    } else {
        GateStatus::Fail
    };

    GateDecision {
        status,
        overall_score,
        reasons,
    }
}
