//! Border-strip content detection.

use super::EdgeConfig;
use image::{Rgba, RgbaImage};

/// Share of non-background pixels in each border strip
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct EdgeDensity {
    pub top: f64,
    pub bottom: f64,
    pub left: f64,
    pub right: f64,
}

impl EdgeDensity {
    /// Measure a page's border strips against its dominant background
    pub fn measure(image: &RgbaImage, config: &EdgeConfig) -> Self {
        let (width, height) = image.dimensions();
        if width == 0 || height == 0 {
            return Self::default();
        }

        let background = background_luma(image);
        let strip_w = strip(width, config.strip_fraction);
        let strip_h = strip(height, config.strip_fraction);

        let density = |x0: u32, y0: u32, w: u32, h: u32| {
            let mut content = 0u64;
            for y in y0..y0 + h {
                for x in x0..x0 + w {
                    if luma(image.get_pixel(x, y)).abs_diff(background) > config.intensity_delta {
                        content += 1;
                    }
                }
            }
            content as f64 / (w as u64 * h as u64) as f64
        };

        Self {
            top: density(0, 0, width, strip_h),
            bottom: density(0, height - strip_h, width, strip_h),
            left: density(0, 0, strip_w, height),
            right: density(width - strip_w, 0, strip_w, height),
        }
    }

    pub fn max(&self) -> f64 {
        self.top.max(self.bottom).max(self.left).max(self.right)
    }

    pub fn has_content(&self, config: &EdgeConfig) -> bool {
        self.max() > config.density_threshold
    }
}

fn strip(extent: u32, fraction: f64) -> u32 {
    ((extent as f64 * fraction).round() as u32).clamp(1, extent)
}

/// Luminance after compositing over white
fn luma(pixel: &Rgba<u8>) -> u8 {
    let [r, g, b, a] = pixel.0;
    let over_white = |c: u8| (c as u32 * a as u32 + 255 * (255 - a as u32)) / 255;
    ((299 * over_white(r) + 587 * over_white(g) + 114 * over_white(b)) / 1000) as u8
}

/// Most common luminance value on the page
fn background_luma(image: &RgbaImage) -> u8 {
    let mut histogram = [0u64; 256];
    for pixel in image.pixels() {
        histogram[luma(pixel) as usize] += 1;
    }
    histogram
        .iter()
        .enumerate()
        .max_by_key(|(_, count)| **count)
        .map(|(value, _)| value as u8)
        .unwrap_or(255)
}

/// Whether `test` carries edge content its baseline page lacks
///
/// The baseline's answer comes from its manifest when recorded, otherwise it
/// is measured from the baseline image.
pub fn edge_content_flag(
    test: &RgbaImage,
    baseline: Option<&RgbaImage>,
    recorded: Option<bool>,
    config: &EdgeConfig,
) -> bool {
    if !EdgeDensity::measure(test, config).has_content(config) {
        return false;
    }

    let baseline_has_content = recorded
        .or_else(|| baseline.map(|page| EdgeDensity::measure(page, config).has_content(config)))
        .unwrap_or(false);

    !baseline_has_content
}

#[cfg(test)]
mod tests {
    use super::*;

    const WHITE: Rgba<u8> = Rgba([255, 255, 255, 255]);
    const BLACK: Rgba<u8> = Rgba([0, 0, 0, 255]);

    /// White page with a black block in the middle
    fn centered_page() -> RgbaImage {
        let mut page = RgbaImage::from_pixel(100, 100, WHITE);
        for y in 40..60 {
            for x in 40..60 {
                page.put_pixel(x, y, BLACK);
            }
        }
        page
    }

    /// Same page with text running into the right margin
    fn bleeding_page() -> RgbaImage {
        let mut page = centered_page();
        for y in 10..90 {
            for x in 96..100 {
                page.put_pixel(x, y, BLACK);
            }
        }
        page
    }

    #[test]
    fn centered_content_has_no_edge_density() {
        let density = EdgeDensity::measure(&centered_page(), &EdgeConfig::default());
        assert_eq!(density.max(), 0.0);
    }

    #[test]
    fn content_in_margin_is_detected() {
        let config = EdgeConfig::default();
        let density = EdgeDensity::measure(&bleeding_page(), &config);

        assert!(density.right > config.density_threshold);
        assert_eq!(density.left, 0.0);
    }

    #[test]
    fn flag_requires_content_absent_from_baseline() {
        let config = EdgeConfig::default();
        let test = bleeding_page();

        assert!(edge_content_flag(&test, Some(&centered_page()), None, &config));
        assert!(!edge_content_flag(&test, Some(&bleeding_page()), None, &config));
        assert!(!edge_content_flag(&test, None, Some(true), &config));
        assert!(!edge_content_flag(&centered_page(), None, Some(false), &config));
    }

    #[test]
    fn transparent_pixels_read_as_white() {
        assert_eq!(luma(&Rgba([0, 0, 0, 0])), 255);
        assert_eq!(luma(&BLACK), 0);
    }
}
