//! # Diff Module
//!
//! Pixel-level comparison of rendered pages against a baseline.
//!
//! ## Classification
//! `diff_percentage` (0-100) is mapped to a [`DiffClass`] by five lower
//! bounds. A value exactly on a boundary belongs to the more severe class:
//!
//! | percentage   | class      |
//! |--------------|------------|
//! | `< 5`        | `pass`     |
//! | `5 .. 10`    | `minor`    |
//! | `10 .. 20`   | `warning`  |
//! | `20 .. 30`   | `major`    |
//! | `>= 30`      | `critical` |
//!
//! ## Edge content
//! Independent of the numeric diff, each page's border strips are sampled
//! for content. Content near the edge that the baseline did not have usually
//! means something was pushed off the page.

mod edge;
mod engine;
mod fast_resize;

pub use edge::{edge_content_flag, EdgeDensity};
pub use engine::DiffEngine;
pub use fast_resize::FastResizer;

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Severity class of a page diff, ordered from best to worst
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiffClass {
    Pass,
    Minor,
    Warning,
    Major,
    Critical,
}

impl fmt::Display for DiffClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DiffClass::Pass => "pass",
            DiffClass::Minor => "minor",
            DiffClass::Warning => "warning",
            DiffClass::Major => "major",
            DiffClass::Critical => "critical",
        };
        f.write_str(name)
    }
}

/// Lower bound (inclusive, in percent) of each class
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DiffThresholds {
    pub pass: f64,
    pub minor: f64,
    pub warning: f64,
    pub major: f64,
    pub critical: f64,
}

impl Default for DiffThresholds {
    fn default() -> Self {
        Self {
            pass: 0.0,
            minor: 5.0,
            warning: 10.0,
            major: 20.0,
            critical: 30.0,
        }
    }
}

impl DiffThresholds {
    /// Boundaries must start at 0 and increase strictly
    pub fn validate(&self) -> Result<(), ConfigError> {
        let bounds = [self.pass, self.minor, self.warning, self.major, self.critical];
        if bounds.iter().any(|b| !b.is_finite()) {
            return Err(ConfigError::Invalid(
                "diffThresholds must be finite numbers".to_string(),
            ));
        }
        if self.pass != 0.0 {
            return Err(ConfigError::Invalid(
                "diffThresholds.pass must be 0".to_string(),
            ));
        }
        if bounds.windows(2).any(|pair| pair[0] >= pair[1]) {
            return Err(ConfigError::Invalid(format!(
                "diffThresholds must be strictly increasing, got {:?}",
                bounds
            )));
        }
        if self.critical > 100.0 {
            return Err(ConfigError::Invalid(
                "diffThresholds.critical must not exceed 100".to_string(),
            ));
        }
        Ok(())
    }

    /// Class for a diff percentage; boundary values take the more severe class
    pub fn classify(&self, percentage: f64) -> DiffClass {
        if percentage.is_nan() || percentage >= self.critical {
            DiffClass::Critical
        } else if percentage >= self.major {
            DiffClass::Major
        } else if percentage >= self.warning {
            DiffClass::Warning
        } else if percentage >= self.minor {
            DiffClass::Minor
        } else {
            DiffClass::Pass
        }
    }
}

/// Comparison outcome for one page
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiffResult {
    /// 1-based page number
    pub page: u32,
    pub total_pixels: u64,
    pub diff_pixels: u64,
    /// Share of differing pixels, 0-100
    pub diff_percentage: f64,
    pub classification: DiffClass,
    pub edge_content_flag: bool,
    pub dimension_mismatch: bool,
}

/// How pages of different sizes are brought to a common size
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DimensionPolicy {
    /// Pad both pages with white up to the larger width and height
    #[default]
    Pad,
    /// Scale the test page to the baseline's size
    Resize,
}

/// Border-strip sampling settings
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EdgeConfig {
    /// Strip thickness as a fraction of the page dimension
    pub strip_fraction: f64,
    /// Share of strip pixels that must differ from the background
    pub density_threshold: f64,
    /// Luminance difference from the background that counts as content
    pub intensity_delta: u8,
}

impl Default for EdgeConfig {
    fn default() -> Self {
        Self {
            strip_fraction: 0.05,
            density_threshold: 0.02,
            intensity_delta: 32,
        }
    }
}

impl EdgeConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.strip_fraction > 0.0 && self.strip_fraction <= 0.5) {
            return Err(ConfigError::Invalid(
                "edge.stripFraction must be in (0, 0.5]".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.density_threshold) {
            return Err(ConfigError::Invalid(
                "edge.densityThreshold must be in [0, 1]".to_string(),
            ));
        }
        Ok(())
    }
}

/// Everything the diff engine needs to know
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct DiffConfig {
    pub thresholds: DiffThresholds,
    /// Largest per-channel difference still treated as equal
    pub color_tolerance: u8,
    pub dimension_policy: DimensionPolicy,
    pub edge: EdgeConfig,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn boundary_values_take_the_more_severe_class() {
        let t = DiffThresholds::default();

        assert_eq!(t.classify(0.0), DiffClass::Pass);
        assert_eq!(t.classify(4.99), DiffClass::Pass);
        assert_eq!(t.classify(5.0), DiffClass::Minor);
        assert_eq!(t.classify(10.0), DiffClass::Warning);
        assert_eq!(t.classify(20.0), DiffClass::Major);
        assert_eq!(t.classify(30.0), DiffClass::Critical);
        assert_eq!(t.classify(100.0), DiffClass::Critical);
    }

    #[test]
    fn classification_is_monotonic() {
        let t = DiffThresholds::default();
        let mut previous = DiffClass::Pass;
        for step in 0..=1000 {
            let class = t.classify(step as f64 / 10.0);
            assert!(class >= previous);
            previous = class;
        }
    }

    #[test]
    fn thresholds_must_increase() {
        let mut t = DiffThresholds::default();
        assert!(t.validate().is_ok());

        t.warning = 5.0;
        assert!(t.validate().is_err());

        let shifted = DiffThresholds {
            pass: 1.0,
            ..DiffThresholds::default()
        };
        assert!(shifted.validate().is_err());
    }

    #[test]
    fn classes_serialize_lowercase() {
        assert_eq!(serde_json::to_string(&DiffClass::Critical).unwrap(), "\"critical\"");
        assert_eq!(
            serde_json::from_str::<DimensionPolicy>("\"resize\"").unwrap(),
            DimensionPolicy::Resize
        );
    }
}
