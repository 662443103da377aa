//! Fakes shared by the integration tests.
#![allow(dead_code)]

use image::{Rgba, RgbaImage};
use pdf_gate::core::analysis::{AnalysisInput, Analyzer, TextExtractor, Tier, TierOutcome};
use pdf_gate::core::baseline::{Baseline, BaselineManifest, BaselineStore};
use pdf_gate::core::cache::Scale;
use pdf_gate::core::raster::{PageImage, PageRenderer};
use pdf_gate::error::{AnalysisError, RenderError};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// A white page with a dark block in the middle
pub fn page() -> RgbaImage {
    let mut page = RgbaImage::from_pixel(40, 40, Rgba([255, 255, 255, 255]));
    for y in 15..25 {
        for x in 15..25 {
            page.put_pixel(x, y, Rgba([30, 30, 30, 255]));
        }
    }
    page
}

/// Renders the same pages every time and counts how often it was asked
pub struct CountingRenderer {
    pages: Vec<RgbaImage>,
    delay: Duration,
    calls: AtomicUsize,
}

impl CountingRenderer {
    pub fn new(pages: Vec<RgbaImage>) -> Self {
        Self {
            pages,
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn slow(pages: Vec<RgbaImage>, delay: Duration) -> Self {
        Self {
            delay,
            ..Self::new(pages)
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl PageRenderer for CountingRenderer {
    fn render(&self, path: &Path, _: Scale) -> Result<Vec<RgbaImage>, RenderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }
        if path.to_string_lossy().contains("broken") {
            return Err(RenderError::Unsupported {
                path: path.to_path_buf(),
                reason: "not a PDF".to_string(),
            });
        }
        Ok(self.pages.clone())
    }
}

/// Text extraction that is never available
pub struct NoText;

impl TextExtractor for NoText {
    fn extract(&self, _: &Path) -> Result<Vec<String>, AnalysisError> {
        Err(AnalysisError::Unavailable("pdftotext is not installed".into()))
    }
}

/// Heuristic-tier analyzer with a fixed content score
pub struct Scored(pub f64);

impl Analyzer for Scored {
    fn tier(&self) -> Tier {
        Tier::Heuristic
    }

    fn name(&self) -> &str {
        "scored"
    }

    fn analyze(&self, _: &AnalysisInput) -> Result<TierOutcome, AnalysisError> {
        TierOutcome::new(self.0, 1.0, Vec::new())
    }
}

/// A store holding one in-memory baseline called `brochure`
pub fn baselines(pages: Vec<RgbaImage>) -> Arc<BaselineStore> {
    let store = BaselineStore::new("/nonexistent-baselines");
    let manifest = BaselineManifest {
        page_count: pages.len() as u32,
        dominant_color_summary: vec!["#ffffff".into(), "#1e1e1e".into()],
        edge_content_flags: vec![false; pages.len()],
    };
    let pages = pages
        .into_iter()
        .zip(1u32..)
        .map(|(image, page)| PageImage {
            page,
            image: Arc::new(image),
        })
        .collect();
    store.insert(Baseline::from_parts("brochure", manifest, pages));
    Arc::new(store)
}

pub fn write_document(dir: &Path, name: &str, bytes: &[u8]) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, bytes).unwrap();
    path
}
