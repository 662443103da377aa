//! Tier that scores the document's extracted text.

use super::heuristic;
use super::{
    AnalysisInput, Analyzer, Feature, FeatureScores, Issue, Severity, Tier, TierOutcome,
};
use crate::error::{AnalysisError, ConfigError};
use regex::Regex;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;

const CONFIDENCE: f64 = 0.8;

/// Tokens that mark unfinished copy
pub const DEFAULT_PLACEHOLDERS: &[&str] =
    &["lorem ipsum", "Lorem ipsum", "TODO", "XXX", "[placeholder]", "TK"];

/// External text extraction capability
pub trait TextExtractor: Send + Sync {
    /// Text of each page, in page order
    fn extract(&self, path: &Path) -> Result<Vec<String>, AnalysisError>;
}

/// Extracts text with poppler's `pdftotext`
#[derive(Debug, Clone)]
pub struct PdftotextExtractor {
    binary: PathBuf,
}

impl PdftotextExtractor {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }
}

impl Default for PdftotextExtractor {
    fn default() -> Self {
        Self::new("pdftotext")
    }
}

impl TextExtractor for PdftotextExtractor {
    fn extract(&self, path: &Path) -> Result<Vec<String>, AnalysisError> {
        let output = Command::new(&self.binary)
            .arg("-layout")
            .arg("-enc")
            .arg("UTF-8")
            .arg(path)
            .arg("-")
            .output()
            .map_err(|e| match e.kind() {
                ErrorKind::NotFound => {
                    AnalysisError::Unavailable(format!("{} is not installed", self.binary.display()))
                }
                _ => AnalysisError::Unavailable(e.to_string()),
            })?;

        if !output.status.success() {
            return Err(AnalysisError::Unsupported(format!(
                "pdftotext failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        let text = String::from_utf8_lossy(&output.stdout);
        let mut pages: Vec<String> = text.split('\u{c}').map(str::to_string).collect();
        // pdftotext ends the last page with a form feed too
        if pages.last().is_some_and(|p| p.trim().is_empty()) && pages.len() > 1 {
            pages.pop();
        }
        Ok(pages)
    }
}

/// Scores text presence and placeholder copy
pub struct ExtractionAnalyzer {
    extractor: Arc<dyn TextExtractor>,
    placeholders: Regex,
}

impl ExtractionAnalyzer {
    /// Build with the default placeholder tokens
    pub fn new(extractor: Arc<dyn TextExtractor>) -> Result<Self, ConfigError> {
        Self::with_placeholders(extractor, DEFAULT_PLACEHOLDERS)
    }

    pub fn with_placeholders<S: AsRef<str>>(
        extractor: Arc<dyn TextExtractor>,
        tokens: &[S],
    ) -> Result<Self, ConfigError> {
        if tokens.is_empty() {
            return Err(ConfigError::Invalid(
                "at least one placeholder token is required".to_string(),
            ));
        }
        let alternatives: Vec<String> = tokens.iter().map(|t| regex::escape(t.as_ref())).collect();
        let pattern = format!(r"(?:^|[^\w])({})(?:[^\w]|$)", alternatives.join("|"));
        let placeholders = Regex::new(&pattern)
            .map_err(|e| ConfigError::Invalid(format!("bad placeholder token: {}", e)))?;

        Ok(Self {
            extractor,
            placeholders,
        })
    }

    fn placeholder_in<'t>(&self, text: &'t str) -> Option<&'t str> {
        self.placeholders
            .captures(text)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str())
    }

    fn text_features(&self, input: &AnalysisInput, pages: &[String]) -> [(f64, Vec<Issue>); 2] {
        let rendered = input.document.pages.len().max(1);

        let mut structural_issues = Vec::new();
        let mut with_text = 0usize;
        for page in &input.document.pages {
            let text = pages.get(page.page as usize - 1).map(|t| t.trim()).unwrap_or("");
            if text.is_empty() {
                structural_issues.push(
                    Issue::new(Severity::Info, "page carries no extractable text")
                        .feature(Feature::Structural)
                        .page(page.page),
                );
            } else {
                with_text += 1;
            }
        }

        let mut layout_issues = Vec::new();
        for (text, page) in pages.iter().zip(1u32..) {
            if let Some(token) = self.placeholder_in(text) {
                layout_issues.push(
                    Issue::new(
                        Severity::Critical,
                        format!("placeholder text {:?} left in copy", token),
                    )
                    .feature(Feature::Layout)
                    .page(page),
                );
            }
        }
        let clean = pages.len().saturating_sub(layout_issues.len());

        [
            (with_text as f64 * 100.0 / rendered as f64, structural_issues),
            (clean as f64 * 100.0 / pages.len().max(1) as f64, layout_issues),
        ]
    }
}

impl Analyzer for ExtractionAnalyzer {
    fn tier(&self) -> Tier {
        Tier::Extraction
    }

    fn name(&self) -> &str {
        "extraction"
    }

    fn analyze(&self, input: &AnalysisInput) -> Result<TierOutcome, AnalysisError> {
        let pages = self.extractor.extract(&input.source)?;
        if pages.iter().all(|p| p.trim().is_empty()) {
            return Err(AnalysisError::Unsupported(
                "document has no extractable text".to_string(),
            ));
        }

        let [structural, layout] = self.text_features(input, &pages);
        let mut scores = FeatureScores::new();
        let mut issues = Vec::new();

        for feature in input.weights.features() {
            let (score, mut found) = match feature {
                Feature::Structural => structural.clone(),
                Feature::Layout => layout.clone(),
                Feature::Palette => heuristic::palette(input),
            };
            scores.insert(feature, score);
            issues.append(&mut found);
        }

        let score = input.weights.weighted_score(&scores)?;
        TierOutcome::new(score, CONFIDENCE, issues)
    }
}
