//! # Config Module
//!
//! Run configuration, loadable from a camelCase JSON file.
//!
//! Every field has a default, so an empty object (or no file at all) is a
//! valid configuration:
//! ```json
//! { "concurrency": 8, "tier": "extraction", "threshold": 85 }
//! ```

use crate::core::analysis::{EnsembleConfig, Feature, FeatureWeights, Tier};
use crate::core::cache::Scale;
use crate::core::diff::{DiffConfig, DiffThresholds, DimensionPolicy, EdgeConfig};
use crate::core::gate::{GatePolicy, GateWeights};
use crate::core::raster::RetryPolicy;
use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

const SECS_PER_DAY: u64 = 24 * 60 * 60;

/// Configuration for a validation run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ValidatorConfig {
    /// Parallel batch workers
    pub concurrency: usize,
    /// Rasterization scale factor (1.0 = 100 dpi)
    pub scale: f32,
    /// Default analysis tier for items that do not name one
    pub tier: Tier,
    pub feature_weights: FeatureWeights,
    /// Features removed from scoring; remaining weights are re-normalized
    pub disabled_features: Vec<Feature>,
    pub diff_thresholds: DiffThresholds,
    pub cache_ttl_days: u64,
    pub fail_on_critical_issues: bool,
    /// Default pass threshold for items that do not name one
    pub threshold: f64,
    /// Fail items whose mean page `diffPercentage` exceeds this
    pub max_visual_diff: Option<f64>,
    pub item_timeout_secs: u64,
    pub batch_timeout_secs: Option<u64>,
    pub render_timeout_secs: u64,
    pub render_attempts: u32,
    pub analysis_timeout_secs: u64,
    pub color_tolerance: u8,
    pub dimension_policy: DimensionPolicy,
    pub edge: EdgeConfig,
    pub ensemble: EnsembleConfig,
    pub gate_weights: GateWeights,
    /// Persistent cache root; in-memory caching when unset and no default exists
    pub cache_dir: Option<PathBuf>,
    pub baseline_dir: PathBuf,
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            concurrency: 5,
            scale: 2.0,
            tier: Tier::default(),
            feature_weights: FeatureWeights::default(),
            disabled_features: Vec::new(),
            diff_thresholds: DiffThresholds::default(),
            cache_ttl_days: 30,
            fail_on_critical_issues: false,
            threshold: 80.0,
            max_visual_diff: None,
            item_timeout_secs: 300,
            batch_timeout_secs: None,
            render_timeout_secs: 120,
            render_attempts: 2,
            analysis_timeout_secs: 120,
            color_tolerance: 0,
            dimension_policy: DimensionPolicy::default(),
            edge: EdgeConfig::default(),
            ensemble: EnsembleConfig::default(),
            gate_weights: GateWeights::default(),
            cache_dir: None,
            baseline_dir: PathBuf::from("baselines"),
        }
    }
}

impl ValidatorConfig {
    /// Read and validate a JSON config file
    pub fn from_json_file(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = serde_json::from_str(&text).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.concurrency == 0 {
            return Err(ConfigError::Invalid(
                "concurrency must be at least 1".to_string(),
            ));
        }
        if !(self.scale.is_finite() && self.scale > 0.0 && self.scale <= 20.0) {
            return Err(ConfigError::Invalid(format!(
                "scale must be in (0, 20], got {}",
                self.scale
            )));
        }
        if !(0.0..=100.0).contains(&self.threshold) {
            return Err(ConfigError::Invalid(format!(
                "threshold must be in [0, 100], got {}",
                self.threshold
            )));
        }
        if let Some(max) = self.max_visual_diff {
            if !(max.is_finite() && (0.0..=100.0).contains(&max)) {
                return Err(ConfigError::Invalid(format!(
                    "maxVisualDiff must be in [0, 100], got {}",
                    max
                )));
            }
        }
        if self.render_attempts == 0 {
            return Err(ConfigError::Invalid(
                "renderAttempts must be at least 1".to_string(),
            ));
        }
        if self.item_timeout_secs == 0
            || self.render_timeout_secs == 0
            || self.analysis_timeout_secs == 0
            || self.ensemble.timeout_secs == 0
            || self.batch_timeout_secs == Some(0)
        {
            return Err(ConfigError::Invalid(
                "timeouts must be at least one second".to_string(),
            ));
        }
        if self.ensemble.max_deviation < 0.0 || self.ensemble.disagreement_threshold < 0.0 {
            return Err(ConfigError::Invalid(
                "ensemble deviation and disagreement thresholds must be non-negative".to_string(),
            ));
        }

        self.feature_weights.validate()?;
        self.effective_weights().validate()?;
        self.diff_thresholds.validate()?;
        self.edge.validate()?;
        self.gate_weights.validate()?;
        Ok(())
    }

    /// Feature weights with disabled features removed, summing to 1.0
    pub fn effective_weights(&self) -> FeatureWeights {
        self.feature_weights.without(&self.disabled_features)
    }

    /// Gate settings, with `threshold` taking precedence over the configured one
    pub fn gate_policy(&self, threshold: Option<f64>) -> GatePolicy {
        GatePolicy {
            threshold: threshold.unwrap_or(self.threshold),
            fail_on_critical_issues: self.fail_on_critical_issues,
            max_visual_diff: self.max_visual_diff,
            weights: self.gate_weights,
        }
    }

    /// Overwrite the gate settings with a named preset
    pub fn apply_profile(&mut self, profile: QaProfile) {
        let preset = profile.preset();
        self.threshold = preset.threshold;
        self.max_visual_diff = Some(preset.max_visual_diff);
        self.fail_on_critical_issues = preset.fail_on_critical_issues;
    }

    pub fn scale(&self) -> Scale {
        Scale::from_factor(self.scale)
    }

    pub fn diff_config(&self) -> DiffConfig {
        DiffConfig {
            thresholds: self.diff_thresholds,
            color_tolerance: self.color_tolerance,
            dimension_policy: self.dimension_policy,
            edge: self.edge,
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            attempts: self.render_attempts,
            timeout: Duration::from_secs(self.render_timeout_secs),
            ..RetryPolicy::default()
        }
    }

    pub fn item_timeout(&self) -> Duration {
        Duration::from_secs(self.item_timeout_secs)
    }

    pub fn batch_timeout(&self) -> Option<Duration> {
        self.batch_timeout_secs.map(Duration::from_secs)
    }

    pub fn analysis_timeout(&self) -> Duration {
        Duration::from_secs(self.analysis_timeout_secs)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_days.saturating_mul(SECS_PER_DAY))
    }

    /// Configured cache root, else the platform cache directory
    pub fn resolved_cache_dir(&self) -> Option<PathBuf> {
        self.cache_dir
            .clone()
            .or_else(|| dirs::cache_dir().map(|dir| dir.join("pdf-gate")))
    }
}

/// Named quality bars for common review situations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum QaProfile {
    /// Early drafts: only gross regressions fail
    Draft,
    Standard,
    /// Print-ready sign-off
    Strict,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProfilePreset {
    pub threshold: f64,
    pub max_visual_diff: f64,
    pub fail_on_critical_issues: bool,
}

impl QaProfile {
    pub fn preset(self) -> ProfilePreset {
        match self {
            QaProfile::Draft => ProfilePreset {
                threshold: 60.0,
                max_visual_diff: 15.0,
                fail_on_critical_issues: false,
            },
            QaProfile::Standard => ProfilePreset {
                threshold: 80.0,
                max_visual_diff: 5.0,
                fail_on_critical_issues: false,
            },
            QaProfile::Strict => ProfilePreset {
                threshold: 90.0,
                max_visual_diff: 2.0,
                fail_on_critical_issues: true,
            },
        }
    }
}
