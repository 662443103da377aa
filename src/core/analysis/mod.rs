//! # Analysis Module
//!
//! Content analysis of a rendered document at one of three tiers:
//!
//! | tier               | analyzer                | needs                      |
//! |--------------------|-------------------------|----------------------------|
//! | `heuristic`        | [`HeuristicAnalyzer`]   | nothing external           |
//! | `extraction`       | [`ExtractionAnalyzer`]  | a [`TextExtractor`]        |
//! | `aiVisionEnsemble` | [`EnsembleAnalyzer`]    | two or more [`VisionBackend`]s |
//!
//! Analyzers are registered by tier in an [`AnalyzerRegistry`]. The
//! [`TierOrchestrator`] runs the requested tier and walks down to lower
//! registered tiers when an analyzer fails recoverably, flagging the result
//! as a fallback.
//!
//! Every tier scores the same features, combined with a shared
//! [`FeatureWeights`] map.

mod ensemble;
mod extraction;
mod heuristic;
mod orchestrator;
mod palette;
mod traits;

pub use ensemble::{
    Aggregate, BackendScore, BackendVerdict, EnsembleAnalyzer, EnsembleConfig, EnsembleResult,
    EnsembleScorer, VisionBackend, MIN_BACKENDS,
};
pub use extraction::{ExtractionAnalyzer, PdftotextExtractor, TextExtractor};
pub use heuristic::HeuristicAnalyzer;
pub use orchestrator::{TierOrchestrator, TierState};
pub use palette::{dominant_colors, palette_score, to_hex, PageStats};
pub use traits::{Analyzer, AnalyzerRegistry};

use crate::core::baseline::Baseline;
use crate::core::diff::DiffResult;
use crate::core::raster::RasterizedDocument;
use crate::core::timeout::Deadline;
use crate::error::{AnalysisError, ConfigError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

/// Analysis sophistication, ordered from cheapest to most expensive
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "camelCase")]
pub enum Tier {
    #[default]
    Heuristic,
    Extraction,
    AiVisionEnsemble,
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Tier::Heuristic => write!(f, "heuristic"),
            Tier::Extraction => write!(f, "extraction"),
            Tier::AiVisionEnsemble => write!(f, "aiVisionEnsemble"),
        }
    }
}

/// Scored feature category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Feature {
    Structural,
    Layout,
    Palette,
}

impl Feature {
    pub const ALL: [Feature; 3] = [Feature::Structural, Feature::Layout, Feature::Palette];
}

impl fmt::Display for Feature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Feature::Structural => write!(f, "structural"),
            Feature::Layout => write!(f, "layout"),
            Feature::Palette => write!(f, "palette"),
        }
    }
}

/// Per-feature scores on a 0-100 scale
pub type FeatureScores = BTreeMap<Feature, f64>;

/// Relative weight of each feature in a tier's score
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FeatureWeights(BTreeMap<Feature, f64>);

impl Default for FeatureWeights {
    fn default() -> Self {
        Self(BTreeMap::from([
            (Feature::Structural, 0.4),
            (Feature::Layout, 0.3),
            (Feature::Palette, 0.3),
        ]))
    }
}

impl FeatureWeights {
    pub fn new(weights: impl IntoIterator<Item = (Feature, f64)>) -> Self {
        Self(weights.into_iter().collect())
    }

    pub fn get(&self, feature: Feature) -> Option<f64> {
        self.0.get(&feature).copied()
    }

    pub fn features(&self) -> impl Iterator<Item = Feature> + '_ {
        self.0.keys().copied()
    }

    /// Drop disabled features and re-normalize the rest to sum to 1.0
    pub fn without(&self, disabled: &[Feature]) -> Self {
        Self(
            self.0
                .iter()
                .filter(|(feature, _)| !disabled.contains(feature))
                .map(|(feature, weight)| (*feature, *weight))
                .collect(),
        )
        .normalized()
    }

    /// Scale weights to sum to 1.0; an all-zero map is returned unchanged
    pub fn normalized(&self) -> Self {
        let total: f64 = self.0.values().sum();
        if total <= 0.0 {
            return self.clone();
        }
        Self(self.0.iter().map(|(f, w)| (*f, w / total)).collect())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some((feature, weight)) = self.0.iter().find(|(_, w)| !w.is_finite() || **w < 0.0) {
            return Err(ConfigError::Invalid(format!(
                "featureWeights.{} must be a non-negative number, got {}",
                feature, weight
            )));
        }
        if self.0.values().sum::<f64>() <= 0.0 {
            return Err(ConfigError::Invalid(
                "featureWeights must enable at least one feature with a positive weight"
                    .to_string(),
            ));
        }
        Ok(())
    }

    /// Weighted mean of the scores available for weighted features
    ///
    /// Features without a score are left out and the remaining weights
    /// re-normalized. Fails as `Unsupported` when nothing overlaps or when a
    /// weighted feature scored NaN or infinity.
    pub fn weighted_score(&self, scores: &FeatureScores) -> Result<f64, AnalysisError> {
        let mut sum = 0.0;
        let mut total = 0.0;
        for (feature, weight) in &self.0 {
            let Some(score) = scores.get(feature) else {
                continue;
            };
            if !score.is_finite() {
                return Err(AnalysisError::Unsupported(format!(
                    "{} score is not a finite number ({})",
                    feature, score
                )));
            }
            sum += score.clamp(0.0, 100.0) * weight;
            total += weight;
        }
        if total > 0.0 {
            Ok(sum / total)
        } else {
            Err(AnalysisError::Unsupported(
                "no scores for enabled features".to_string(),
            ))
        }
    }
}

/// How serious an analysis finding is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

/// A finding reported by an analyzer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Issue {
    pub severity: Severity,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub feature: Option<Feature>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page: Option<u32>,
    pub message: String,
}

impl Issue {
    pub fn new(severity: Severity, message: impl Into<String>) -> Self {
        Self {
            severity,
            feature: None,
            page: None,
            message: message.into(),
        }
    }

    pub fn feature(mut self, feature: Feature) -> Self {
        self.feature = Some(feature);
        self
    }

    pub fn page(mut self, page: u32) -> Self {
        self.page = Some(page);
        self
    }
}

/// Final analysis outcome for an item
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisResult {
    /// Tier that actually produced the score
    pub tier: Tier,
    pub requested_tier: Tier,
    /// 0-100
    pub score: f64,
    /// 0-1
    pub confidence: f64,
    pub issues: Vec<Issue>,
    pub fallback_used: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fallback_reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ensemble: Option<EnsembleResult>,
}

/// What an analyzer sees
#[derive(Debug, Clone)]
pub struct AnalysisInput {
    pub source: PathBuf,
    pub document: Arc<RasterizedDocument>,
    pub baseline: Arc<Baseline>,
    pub diffs: Arc<Vec<DiffResult>>,
    /// Already stripped of disabled features and normalized
    pub weights: FeatureWeights,
    /// When the item as a whole runs out of time
    pub deadline: Deadline,
}

/// What a single tier's analyzer produces
#[derive(Debug, Clone, PartialEq)]
pub struct TierOutcome {
    pub score: f64,
    pub confidence: f64,
    pub issues: Vec<Issue>,
    pub ensemble: Option<EnsembleResult>,
}

impl TierOutcome {
    /// Clamp into range; NaN or infinite inputs are `Unsupported`
    pub fn new(score: f64, confidence: f64, issues: Vec<Issue>) -> Result<Self, AnalysisError> {
        let outcome = Self {
            score: score.clamp(0.0, 100.0),
            confidence: confidence.clamp(0.0, 1.0),
            issues,
            ensemble: None,
        };
        outcome.ensure_finite()?;
        Ok(outcome)
    }

    pub fn ensure_finite(&self) -> Result<(), AnalysisError> {
        if self.score.is_finite() && self.confidence.is_finite() {
            Ok(())
        } else {
            Err(AnalysisError::Unsupported(format!(
                "analyzer produced score {} with confidence {}",
                self.score, self.confidence
            )))
        }
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::core::baseline::BaselineManifest;
    use crate::core::cache::{ContentHash, DocumentId, Scale};
    use crate::core::raster::PageImage;
    use image::{Rgba, RgbaImage};
    use std::path::Path;

    pub fn white_page() -> Arc<RgbaImage> {
        Arc::new(RgbaImage::from_pixel(40, 40, Rgba([255, 255, 255, 255])))
    }

    /// White page with a dark block in the middle
    pub fn content_page() -> Arc<RgbaImage> {
        let mut page = RgbaImage::from_pixel(40, 40, Rgba([255, 255, 255, 255]));
        for y in 15..25 {
            for x in 15..25 {
                page.put_pixel(x, y, Rgba([30, 30, 30, 255]));
            }
        }
        Arc::new(page)
    }

    pub fn input(test: Vec<Arc<RgbaImage>>, baseline: Vec<Arc<RgbaImage>>) -> AnalysisInput {
        let to_pages = |images: Vec<Arc<RgbaImage>>| {
            images
                .into_iter()
                .zip(1u32..)
                .map(|(image, page)| PageImage { page, image })
                .collect::<Vec<_>>()
        };
        let baseline_pages = to_pages(baseline);
        AnalysisInput {
            source: Path::new("/jobs/doc.pdf").to_path_buf(),
            document: Arc::new(RasterizedDocument {
                document: DocumentId::for_path(Path::new("/jobs/doc.pdf")),
                source_hash: ContentHash::of_bytes(b"doc"),
                scale: Scale::default(),
                pages: to_pages(test),
            }),
            baseline: Arc::new(Baseline::from_parts(
                "base",
                BaselineManifest {
                    page_count: baseline_pages.len() as u32,
                    dominant_color_summary: vec!["#ffffff".to_string(), "#1e1e1e".to_string()],
                    edge_content_flags: Vec::new(),
                },
                baseline_pages,
            )),
            diffs: Arc::new(Vec::new()),
            weights: FeatureWeights::default(),
            deadline: Deadline::none(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabling_a_feature_renormalizes() {
        let weights = FeatureWeights::default().without(&[Feature::Palette]);

        assert_eq!(weights.get(Feature::Palette), None);
        let structural = weights.get(Feature::Structural).unwrap();
        let layout = weights.get(Feature::Layout).unwrap();
        assert!((structural - 0.4 / 0.7).abs() < 1e-9);
        assert!((structural + layout - 1.0).abs() < 1e-9);
    }

    #[test]
    fn weighted_score_uses_available_features() {
        let weights = FeatureWeights::default();
        let scores = FeatureScores::from([(Feature::Structural, 100.0), (Feature::Layout, 50.0)]);

        let score = weights.weighted_score(&scores).unwrap();
        assert!((score - (0.4 * 100.0 + 0.3 * 50.0) / 0.7).abs() < 1e-9);
        assert!(matches!(
            weights.weighted_score(&FeatureScores::new()),
            Err(AnalysisError::Unsupported(_))
        ));
    }

    #[test]
    fn non_finite_feature_score_is_rejected() {
        let weights = FeatureWeights::default();
        let scores = FeatureScores::from([(Feature::Structural, 90.0), (Feature::Layout, f64::NAN)]);

        let err = weights.weighted_score(&scores).unwrap_err();
        assert!(matches!(err, AnalysisError::Unsupported(_)));
        assert!(err.is_recoverable());

        // A NaN on a disabled feature never reaches the mean
        let structural_only = weights.without(&[Feature::Layout, Feature::Palette]);
        assert_eq!(structural_only.weighted_score(&scores).unwrap(), 90.0);
    }

    #[test]
    fn tier_outcome_rejects_nan_and_clamps_the_rest() {
        assert!(TierOutcome::new(f64::NAN, 1.0, Vec::new()).is_err());
        assert!(TierOutcome::new(80.0, f64::NAN, Vec::new()).is_err());

        let outcome = TierOutcome::new(140.0, 2.0, Vec::new()).unwrap();
        assert_eq!((outcome.score, outcome.confidence), (100.0, 1.0));
    }

    #[test]
    fn negative_weights_are_rejected() {
        let weights = FeatureWeights::new([(Feature::Structural, -1.0), (Feature::Layout, 2.0)]);
        assert!(weights.validate().is_err());

        let empty = FeatureWeights::default().without(&Feature::ALL);
        assert!(empty.validate().is_err());
    }

    #[test]
    fn tiers_are_ordered_and_camel_cased() {
        assert!(Tier::Heuristic < Tier::Extraction);
        assert!(Tier::Extraction < Tier::AiVisionEnsemble);
        assert_eq!(
            serde_json::to_string(&Tier::AiVisionEnsemble).unwrap(),
            "\"aiVisionEnsemble\""
        );
    }

    #[test]
    fn weights_deserialize_from_a_plain_map() {
        let weights: FeatureWeights =
            serde_json::from_str(r#"{"structural":0.5,"layout":0.5}"#).unwrap();
        assert_eq!(weights.get(Feature::Layout), Some(0.5));
        assert_eq!(weights.get(Feature::Palette), None);
    }
}
