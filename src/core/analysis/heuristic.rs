//! Built-in tier that needs nothing beyond the rendered pages.

use super::palette::{dominant_colors, palette_score, to_hex, PageStats};
use super::{
    AnalysisInput, Analyzer, Feature, FeatureScores, Issue, Severity, Tier, TierOutcome,
};
use crate::error::AnalysisError;

const CONFIDENCE: f64 = 0.6;
const COLORS_PER_PAGE: usize = 5;
const PALETTE_WARNING: f64 = 60.0;

/// Scores structure, layout and palette from pixels alone
#[derive(Debug, Clone, Default)]
pub struct HeuristicAnalyzer;

impl HeuristicAnalyzer {
    pub fn new() -> Self {
        Self
    }
}

impl Analyzer for HeuristicAnalyzer {
    fn tier(&self) -> Tier {
        Tier::Heuristic
    }

    fn name(&self) -> &str {
        "heuristic"
    }

    fn analyze(&self, input: &AnalysisInput) -> Result<TierOutcome, AnalysisError> {
        if input.document.pages.is_empty() {
            return Err(AnalysisError::Unsupported(
                "document has no pages".to_string(),
            ));
        }

        let mut scores = FeatureScores::new();
        let mut issues = Vec::new();

        for feature in input.weights.features() {
            let (score, mut found) = match feature {
                Feature::Structural => structural(input),
                Feature::Layout => layout(input),
                Feature::Palette => palette(input),
            };
            scores.insert(feature, score);
            issues.append(&mut found);
        }

        let score = input.weights.weighted_score(&scores)?;
        TierOutcome::new(score, CONFIDENCE, issues)
    }
}

/// Page-count agreement averaged with the share of non-blank pages
pub(super) fn structural(input: &AnalysisInput) -> (f64, Vec<Issue>) {
    let mut issues = Vec::new();
    let rendered = input.document.page_count();
    let expected = input.baseline.page_count();

    let count_agreement = if rendered == expected {
        100.0
    } else {
        issues.push(
            Issue::new(
                Severity::Critical,
                format!("document has {} pages, baseline has {}", rendered, expected),
            )
            .feature(Feature::Structural),
        );
        rendered.min(expected) as f64 * 100.0 / rendered.max(expected).max(1) as f64
    };

    let mut non_blank = 0usize;
    for page in &input.document.pages {
        let blank = PageStats::of(&page.image).is_blank();
        let expected_blank = input
            .baseline
            .page(page.page)
            .is_some_and(|b| PageStats::of(&b.image).is_blank());

        if !blank || expected_blank {
            non_blank += 1;
        } else {
            issues.push(
                Issue::new(Severity::Warning, "page is blank")
                    .feature(Feature::Structural)
                    .page(page.page),
            );
        }
    }
    let content_ratio = non_blank as f64 * 100.0 / input.document.pages.len() as f64;

    ((count_agreement + content_ratio) / 2.0, issues)
}

/// Share of pages without content pushed into the margins
pub(super) fn layout(input: &AnalysisInput) -> (f64, Vec<Issue>) {
    if input.diffs.is_empty() {
        return (100.0, Vec::new());
    }

    let issues: Vec<Issue> = input
        .diffs
        .iter()
        .filter(|d| d.edge_content_flag)
        .map(|d| {
            Issue::new(
                Severity::Warning,
                "content near the page edge, possible truncation",
            )
            .feature(Feature::Layout)
            .page(d.page)
        })
        .collect();

    let clean = input.diffs.len() - issues.len();
    (clean as f64 * 100.0 / input.diffs.len() as f64, issues)
}

/// Overlap between each page's dominant colors and the approved palette
pub(super) fn palette(input: &AnalysisInput) -> (f64, Vec<Issue>) {
    let mut reference = input.baseline.dominant_colors();
    if reference.is_empty() {
        reference = input
            .baseline
            .pages
            .iter()
            .flat_map(|p| dominant_colors(&p.image, COLORS_PER_PAGE))
            .collect();
    }

    let mut issues = Vec::new();
    let mut total = 0.0;
    for page in &input.document.pages {
        let colors = dominant_colors(&page.image, COLORS_PER_PAGE);
        let score = palette_score(&colors, &reference);
        if score < PALETTE_WARNING {
            let off: Vec<String> = colors
                .iter()
                .filter(|c| palette_score(std::slice::from_ref(*c), &reference) == 0.0)
                .map(|c| to_hex(*c))
                .collect();
            issues.push(
                Issue::new(
                    Severity::Warning,
                    format!("off-palette colors {}", off.join(", ")),
                )
                .feature(Feature::Palette)
                .page(page.page),
            );
        }
        total += score;
    }

    (total / input.document.pages.len().max(1) as f64, issues)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::analysis::test_support::{content_page, input, white_page};
    use crate::core::analysis::FeatureWeights;
    use image::{Rgba, RgbaImage};
    use std::sync::Arc;

    #[test]
    fn matching_document_scores_high() {
        let input = input(vec![content_page(), content_page()], vec![content_page(), content_page()]);
        let outcome = HeuristicAnalyzer::new().analyze(&input).unwrap();

        assert!(outcome.score > 95.0, "score was {}", outcome.score);
        assert!(outcome.issues.is_empty());
        assert_eq!(outcome.confidence, CONFIDENCE);
    }

    #[test]
    fn missing_page_is_critical() {
        let input = input(vec![content_page()], vec![content_page(), content_page()]);
        let outcome = HeuristicAnalyzer::new().analyze(&input).unwrap();

        assert!(outcome
            .issues
            .iter()
            .any(|i| i.severity == Severity::Critical && i.feature == Some(Feature::Structural)));
        assert!(outcome.score < 95.0);
    }

    #[test]
    fn unexpected_blank_page_is_reported() {
        let input = input(vec![content_page(), white_page()], vec![content_page(), content_page()]);
        let outcome = HeuristicAnalyzer::new().analyze(&input).unwrap();

        assert!(outcome.issues.iter().any(|i| i.page == Some(2) && i.message.contains("blank")));
    }

    #[test]
    fn off_palette_page_is_reported() {
        let red = Arc::new(RgbaImage::from_pixel(40, 40, Rgba([220, 10, 10, 255])));
        let input = input(vec![red], vec![content_page()]);
        let outcome = HeuristicAnalyzer::new().analyze(&input).unwrap();

        assert!(outcome.issues.iter().any(|i| i.feature == Some(Feature::Palette)));
    }

    #[test]
    fn disabled_features_are_not_scored() {
        let red = Arc::new(RgbaImage::from_pixel(40, 40, Rgba([220, 10, 10, 255])));
        let mut input = input(vec![red], vec![content_page()]);
        input.weights = FeatureWeights::default().without(&[Feature::Palette]);

        let outcome = HeuristicAnalyzer::new().analyze(&input).unwrap();
        assert!(outcome.issues.iter().all(|i| i.feature != Some(Feature::Palette)));
    }

    #[test]
    fn empty_document_is_unsupported() {
        let input = input(Vec::new(), vec![content_page()]);
        assert!(matches!(
            HeuristicAnalyzer::new().analyze(&input),
            Err(AnalysisError::Unsupported(_))
        ));
    }
}
