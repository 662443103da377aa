//! Page-by-page comparison of a rendered document against its baseline.

use super::{edge_content_flag, DiffClass, DiffConfig, DiffResult, DimensionPolicy, FastResizer};
use crate::core::baseline::Baseline;
use crate::core::raster::PageImage;
use crate::error::{InfraKind, InfrastructureError, Stage};
use image::{imageops, Rgba, RgbaImage};
use rayon::prelude::*;
use std::borrow::Cow;
use tracing::debug;

const LOG_TARGET: &str = "pdf_gate::diff";
const PAD_COLOR: Rgba<u8> = Rgba([255, 255, 255, 255]);

/// Compares rendered pages against baseline pages
#[derive(Debug, Clone, Default)]
pub struct DiffEngine {
    config: DiffConfig,
}

impl DiffEngine {
    pub fn new(config: DiffConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &DiffConfig {
        &self.config
    }

    /// Compare every page; pages present on only one side are critical
    ///
    /// Results are in page order. Pages are compared in parallel.
    pub fn compare_document(
        &self,
        test: &[PageImage],
        baseline: &Baseline,
    ) -> Result<Vec<DiffResult>, InfrastructureError> {
        let last_test = test.iter().map(|p| p.page).max().unwrap_or(0);
        let last_page = last_test.max(baseline.page_count());

        let results = (1..=last_page)
            .into_par_iter()
            .map(|page| {
                let test_page = test.iter().find(|p| p.page == page).map(|p| p.image.as_ref());
                let baseline_page = baseline.page(page).map(|p| p.image.as_ref());
                self.compare_page(page, test_page, baseline_page, baseline.edge_flag(page))
            })
            .collect::<Result<Vec<_>, _>>()?;

        debug!(
            target: LOG_TARGET,
            baseline = %baseline.id,
            pages = results.len(),
            worst = ?results.iter().map(|r| r.classification).max(),
            "compared document"
        );
        Ok(results)
    }

    /// Compare one page pair, either side of which may be missing
    pub fn compare_page(
        &self,
        page: u32,
        test: Option<&RgbaImage>,
        baseline: Option<&RgbaImage>,
        recorded_edge_flag: Option<bool>,
    ) -> Result<DiffResult, InfrastructureError> {
        let (test, baseline) = match (test, baseline) {
            (Some(test), Some(baseline)) => (test, baseline),
            (Some(only), None) | (None, Some(only)) => return Ok(Self::unmatched_page(page, only)),
            (None, None) => {
                return Err(InfrastructureError::new(
                    Stage::Diff,
                    InfraKind::InvalidInput,
                    format!("page {} exists in neither document", page),
                ))
            }
        };

        let dimension_mismatch = test.dimensions() != baseline.dimensions();
        let (left, right) = if dimension_mismatch {
            self.align(page, test, baseline)?
        } else {
            (Cow::Borrowed(test), Cow::Borrowed(baseline))
        };

        let total_pixels = left.width() as u64 * left.height() as u64;
        let diff_pixels = count_differences(&left, &right, self.config.color_tolerance);
        let diff_percentage = if total_pixels == 0 {
            0.0
        } else {
            diff_pixels as f64 * 100.0 / total_pixels as f64
        };

        Ok(DiffResult {
            page,
            total_pixels,
            diff_pixels,
            diff_percentage,
            classification: self.config.thresholds.classify(diff_percentage),
            edge_content_flag: edge_content_flag(
                test,
                Some(baseline),
                recorded_edge_flag,
                &self.config.edge,
            ),
            dimension_mismatch,
        })
    }

    fn unmatched_page(page: u32, present: &RgbaImage) -> DiffResult {
        let total_pixels = present.width() as u64 * present.height() as u64;
        DiffResult {
            page,
            total_pixels,
            diff_pixels: total_pixels,
            diff_percentage: 100.0,
            classification: DiffClass::Critical,
            edge_content_flag: false,
            dimension_mismatch: true,
        }
    }

    fn align<'a>(
        &self,
        page: u32,
        test: &'a RgbaImage,
        baseline: &'a RgbaImage,
    ) -> Result<(Cow<'a, RgbaImage>, Cow<'a, RgbaImage>), InfrastructureError> {
        debug!(
            target: LOG_TARGET,
            page,
            test = ?test.dimensions(),
            baseline = ?baseline.dimensions(),
            policy = ?self.config.dimension_policy,
            "page dimensions differ"
        );

        match self.config.dimension_policy {
            DimensionPolicy::Pad => {
                let width = test.width().max(baseline.width());
                let height = test.height().max(baseline.height());
                Ok((
                    Cow::Owned(pad(test, width, height)),
                    Cow::Owned(pad(baseline, width, height)),
                ))
            }
            DimensionPolicy::Resize => {
                let resized = FastResizer::new()
                    .resize_rgba(test, baseline.width(), baseline.height())
                    .map_err(|reason| {
                        InfrastructureError::new(
                            Stage::Diff,
                            InfraKind::Internal,
                            format!("page {}: {}", page, reason),
                        )
                    })?;
                Ok((Cow::Owned(resized), Cow::Borrowed(baseline)))
            }
        }
    }
}

fn pad(image: &RgbaImage, width: u32, height: u32) -> RgbaImage {
    if image.dimensions() == (width, height) {
        return image.clone();
    }
    let mut canvas = RgbaImage::from_pixel(width, height, PAD_COLOR);
    imageops::replace(&mut canvas, image, 0, 0);
    canvas
}

fn count_differences(a: &RgbaImage, b: &RgbaImage, tolerance: u8) -> u64 {
    a.pixels()
        .zip(b.pixels())
        .filter(|(p, q)| p.0.iter().zip(q.0.iter()).any(|(x, y)| x.abs_diff(*y) > tolerance))
        .count() as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::baseline::BaselineManifest;
    use std::sync::Arc;

    const WHITE: Rgba<u8> = Rgba([255, 255, 255, 255]);
    const INK: Rgba<u8> = Rgba([20, 20, 20, 255]);

    fn blank(width: u32, height: u32) -> RgbaImage {
        RgbaImage::from_pixel(width, height, WHITE)
    }

    /// 10x10 page with the first `count` pixels (row-major) inked
    fn with_changes(count: u32) -> RgbaImage {
        let mut page = blank(10, 10);
        for i in 0..count {
            page.put_pixel(i % 10, i / 10, INK);
        }
        page
    }

    fn baseline_of(pages: Vec<RgbaImage>) -> Baseline {
        let page_count = pages.len() as u32;
        Baseline::from_parts(
            "test",
            BaselineManifest {
                page_count,
                ..BaselineManifest::default()
            },
            pages
                .into_iter()
                .zip(1u32..)
                .map(|(image, page)| PageImage {
                    page,
                    image: Arc::new(image),
                })
                .collect(),
        )
    }

    fn pages_of(images: Vec<RgbaImage>) -> Vec<PageImage> {
        images
            .into_iter()
            .zip(1u32..)
            .map(|(image, page)| PageImage {
                page,
                image: Arc::new(image),
            })
            .collect()
    }

    #[test]
    fn identical_pages_pass() {
        let engine = DiffEngine::default();
        let result = engine
            .compare_page(1, Some(&blank(10, 10)), Some(&blank(10, 10)), None)
            .unwrap();

        assert_eq!(result.diff_pixels, 0);
        assert_eq!(result.classification, DiffClass::Pass);
        assert!(!result.dimension_mismatch);
    }

    #[test]
    fn percentage_is_share_of_pixels() {
        let engine = DiffEngine::default();
        let result = engine
            .compare_page(1, Some(&with_changes(12)), Some(&blank(10, 10)), None)
            .unwrap();

        assert_eq!(result.total_pixels, 100);
        assert_eq!(result.diff_pixels, 12);
        assert!((result.diff_percentage - 12.0).abs() < 1e-9);
        assert_eq!(result.classification, DiffClass::Warning);
    }

    #[test]
    fn more_changed_pixels_never_lower_the_percentage() {
        let engine = DiffEngine::default();
        let reference = blank(10, 10);
        let mut previous = -1.0;

        for count in 0..=100 {
            let result = engine
                .compare_page(1, Some(&with_changes(count)), Some(&reference), None)
                .unwrap();
            assert!(result.diff_percentage >= previous);
            previous = result.diff_percentage;
        }
    }

    #[test]
    fn color_tolerance_absorbs_small_shifts() {
        let shifted = RgbaImage::from_pixel(10, 10, Rgba([250, 250, 250, 255]));
        let strict = DiffEngine::default();
        let tolerant = DiffEngine::new(DiffConfig {
            color_tolerance: 8,
            ..DiffConfig::default()
        });

        let a = strict.compare_page(1, Some(&shifted), Some(&blank(10, 10)), None).unwrap();
        let b = tolerant.compare_page(1, Some(&shifted), Some(&blank(10, 10)), None).unwrap();

        assert_eq!(a.diff_pixels, 100);
        assert_eq!(b.diff_pixels, 0);
    }

    #[test]
    fn padding_flags_dimension_mismatch() {
        let engine = DiffEngine::default();
        let result = engine
            .compare_page(1, Some(&blank(10, 12)), Some(&blank(10, 10)), None)
            .unwrap();

        assert!(result.dimension_mismatch);
        assert_eq!(result.total_pixels, 120);
        // White padding matches a white page
        assert_eq!(result.diff_pixels, 0);
    }

    #[test]
    fn resize_policy_scales_test_page() {
        let engine = DiffEngine::new(DiffConfig {
            dimension_policy: DimensionPolicy::Resize,
            ..DiffConfig::default()
        });
        let result = engine
            .compare_page(1, Some(&blank(20, 20)), Some(&blank(10, 10)), None)
            .unwrap();

        assert!(result.dimension_mismatch);
        assert_eq!(result.total_pixels, 100);
        assert_eq!(result.classification, DiffClass::Pass);
    }

    #[test]
    fn missing_pages_are_critical() {
        let engine = DiffEngine::default();
        let baseline = baseline_of(vec![blank(10, 10), blank(10, 10)]);
        let test = pages_of(vec![blank(10, 10)]);

        let results = engine.compare_document(&test, &baseline).unwrap();

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].classification, DiffClass::Pass);
        assert_eq!(results[1].page, 2);
        assert_eq!(results[1].classification, DiffClass::Critical);
        assert!(results[1].dimension_mismatch);
        assert_eq!(results[1].diff_percentage, 100.0);
    }

    #[test]
    fn document_results_are_in_page_order() {
        let engine = DiffEngine::default();
        let baseline = baseline_of((0..6).map(|_| blank(10, 10)).collect());
        let test = pages_of((0..6).map(|i| with_changes(i * 5)).collect());

        let results = engine.compare_document(&test, &baseline).unwrap();
        let pages: Vec<u32> = results.iter().map(|r| r.page).collect();

        assert_eq!(pages, vec![1, 2, 3, 4, 5, 6]);
        assert_eq!(results[5].diff_pixels, 25);
    }
}
