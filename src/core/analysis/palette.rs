//! Color and tone statistics for rendered pages.

use image::{imageops, RgbaImage};
use std::borrow::Cow;
use std::collections::HashMap;

/// Longest side a page is reduced to before color counting
const SAMPLE_SIZE: u32 = 64;

/// Max per-channel distance for two colors to count as the same swatch
const MATCH_DISTANCE: u8 = 48;

/// Below this luminance standard deviation a page is considered blank
const BLANK_STD_DEV: f64 = 2.0;

/// Downscale so the longest side is at most `SAMPLE_SIZE`
fn sample(image: &RgbaImage) -> Cow<'_, RgbaImage> {
    let longest = image.width().max(image.height());
    if longest <= SAMPLE_SIZE {
        return Cow::Borrowed(image);
    }
    let ratio = SAMPLE_SIZE as f64 / longest as f64;
    let width = ((image.width() as f64 * ratio).round() as u32).max(1);
    let height = ((image.height() as f64 * ratio).round() as u32).max(1);
    Cow::Owned(imageops::thumbnail(image, width, height))
}

/// Tone statistics of a page
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PageStats {
    /// Mean luminance (0-255)
    pub brightness: f64,
    /// Luminance standard deviation
    pub contrast: f64,
}

impl PageStats {
    pub fn of(image: &RgbaImage) -> Self {
        let sample = sample(image);
        let values: Vec<f64> = sample
            .pixels()
            .map(|p| {
                let [r, g, b, a] = p.0;
                let white = 255.0 * (1.0 - a as f64 / 255.0);
                let alpha = a as f64 / 255.0;
                0.299 * (r as f64 * alpha + white)
                    + 0.587 * (g as f64 * alpha + white)
                    + 0.114 * (b as f64 * alpha + white)
            })
            .collect();

        if values.is_empty() {
            return Self {
                brightness: 255.0,
                contrast: 0.0,
            };
        }

        let n = values.len() as f64;
        let mean = values.iter().sum::<f64>() / n;
        let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;

        Self {
            brightness: mean,
            contrast: variance.sqrt(),
        }
    }

    pub fn is_blank(&self) -> bool {
        self.contrast < BLANK_STD_DEV
    }
}

/// Most frequent colors of a page, most common first
///
/// Colors are quantized to 4 bits per channel so anti-aliasing does not
/// split one swatch into dozens.
pub fn dominant_colors(image: &RgbaImage, count: usize) -> Vec<[u8; 3]> {
    let sample = sample(image);
    let mut histogram: HashMap<[u8; 3], usize> = HashMap::new();

    for pixel in sample.pixels() {
        let [r, g, b, a] = pixel.0;
        let over_white = |c: u8| ((c as u32 * a as u32 + 255 * (255 - a as u32)) / 255) as u8;
        let bucket = [over_white(r) >> 4, over_white(g) >> 4, over_white(b) >> 4];
        *histogram.entry(bucket).or_default() += 1;
    }

    let mut buckets: Vec<([u8; 3], usize)> = histogram.into_iter().collect();
    buckets.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
    buckets
        .into_iter()
        .take(count)
        .map(|(bucket, _)| bucket.map(|q| (q << 4) | 0x08))
        .collect()
}

fn close(a: &[u8; 3], b: &[u8; 3]) -> bool {
    a.iter().zip(b.iter()).all(|(x, y)| x.abs_diff(*y) <= MATCH_DISTANCE)
}

/// Share (0-100) of `colors` that match some `reference` color
///
/// With no reference palette there is nothing to deviate from.
pub fn palette_score(colors: &[[u8; 3]], reference: &[[u8; 3]]) -> f64 {
    if reference.is_empty() || colors.is_empty() {
        return 100.0;
    }
    let matched = colors
        .iter()
        .filter(|c| reference.iter().any(|r| close(c, r)))
        .count();
    matched as f64 * 100.0 / colors.len() as f64
}

pub fn to_hex(color: [u8; 3]) -> String {
    format!("#{:02x}{:02x}{:02x}", color[0], color[1], color[2])
}
