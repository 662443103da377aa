//! # Error Module
//!
//! Error types for the PDF quality gate.
//!
//! ## Taxonomy
//! - **Validation failures** are not errors at all: they are a `FAIL` gate
//!   status carried in the item report.
//! - **Infrastructure errors** (unreachable services, corrupted cache,
//!   malformed input) are captured per item as [`InfrastructureError`] values
//!   so that one broken document never aborts a batch.
//! - **Degraded results** (tier fallback) are flagged on the analysis result.
//!
//! The enums below are what subsystems return internally; they are converted
//! into an [`InfrastructureError`] tagged with the failing [`Stage`] before
//! they reach a report.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Top-level application error
#[derive(Error, Debug)]
pub enum GateError {
    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("Rasterization error: {0}")]
    Render(#[from] RenderError),

    #[error("Analysis error: {0}")]
    Analysis(#[from] AnalysisError),

    #[error("Baseline error: {0}")]
    Baseline(#[from] BaselineError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Batch error: {0}")]
    Batch(#[from] BatchError),

    #[error("Failed to write report: {0}")]
    Report(#[source] std::io::Error),
}

/// Errors raised by cache backends
#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Cache I/O failed at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Cache entry at {path} is corrupted: {reason}")]
    Corrupted { path: PathBuf, reason: String },

    #[error("Failed to serialize cache manifest: {0}")]
    Serialization(String),

    #[error("Cache lock was poisoned by a panicking worker")]
    Poisoned,
}

/// Errors raised by a page rasterizer
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RenderError {
    #[error("Document not found: {path}")]
    MissingInput { path: PathBuf },

    #[error("Cannot rasterize {path}: {reason}")]
    Unsupported { path: PathBuf, reason: String },

    #[error("Rasterizer produced no pages for {path}")]
    EmptyDocument { path: PathBuf },

    #[error("Transient rasterizer failure: {0}")]
    Transient(String),

    #[error("Rasterizer timed out after {}s", .after.as_secs_f32())]
    Timeout { after: Duration },
}

impl RenderError {
    /// Whether another attempt could plausibly succeed
    pub fn is_transient(&self) -> bool {
        matches!(self, RenderError::Transient(_) | RenderError::Timeout { .. })
    }

    /// Tag this error as a rasterization-stage infrastructure error
    pub fn into_infrastructure(self) -> InfrastructureError {
        let kind = match &self {
            RenderError::MissingInput { .. } | RenderError::EmptyDocument { .. } => {
                InfraKind::InvalidInput
            }
            RenderError::Unsupported { .. } | RenderError::Transient(_) => InfraKind::Unavailable,
            RenderError::Timeout { .. } => InfraKind::Timeout,
        };
        InfrastructureError::new(Stage::Rasterization, kind, self.to_string())
    }
}

/// Errors raised by content analyzers
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AnalysisError {
    #[error("Input not supported by this analyzer: {0}")]
    Unsupported(String),

    #[error("Analyzer dependency unavailable: {0}")]
    Unavailable(String),

    #[error("Analyzer timed out after {}s", .after.as_secs_f32())]
    Timeout { after: Duration },

    #[error("All {attempted} analysis backends failed: {}", .reasons.join("; "))]
    AllBackendsFailed {
        attempted: usize,
        reasons: Vec<String>,
    },

    #[error("Analyzer failed: {0}")]
    Internal(String),
}

impl AnalysisError {
    /// Recoverable failures trigger degradation to a lower tier
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, AnalysisError::Internal(_))
    }

    /// The infrastructure error kind this failure maps to
    pub fn infra_kind(&self) -> InfraKind {
        match self {
            AnalysisError::Unsupported(_) => InfraKind::InvalidInput,
            AnalysisError::Unavailable(_) | AnalysisError::AllBackendsFailed { .. } => {
                InfraKind::Unavailable
            }
            AnalysisError::Timeout { .. } => InfraKind::Timeout,
            AnalysisError::Internal(_) => InfraKind::Internal,
        }
    }
}

/// Errors raised while loading a baseline reference
#[derive(Error, Debug)]
pub enum BaselineError {
    #[error("Invalid baseline reference id: {id:?}")]
    InvalidId { id: String },

    #[error("Baseline {id} not found at {path}")]
    NotFound { id: String, path: PathBuf },

    #[error("Baseline manifest {path} is invalid: {reason}")]
    InvalidManifest { path: PathBuf, reason: String },

    #[error("Baseline page {path} is unreadable: {reason}")]
    PageUnreadable { path: PathBuf, reason: String },
}

impl BaselineError {
    /// Tag this error as a baseline-stage infrastructure error
    pub fn into_infrastructure(self) -> InfrastructureError {
        let kind = match &self {
            BaselineError::InvalidId { .. } | BaselineError::NotFound { .. } => {
                InfraKind::InvalidInput
            }
            BaselineError::InvalidManifest { .. } | BaselineError::PageUnreadable { .. } => {
                InfraKind::Corrupted
            }
        };
        InfrastructureError::new(Stage::Baseline, kind, self.to_string())
    }
}

/// Errors in configuration files or values
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {reason}")]
    Parse { path: PathBuf, reason: String },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Errors in batch item bookkeeping
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BatchError {
    #[error("Item {id} cannot move from {from} to {to}")]
    InvalidTransition {
        id: String,
        from: &'static str,
        to: &'static str,
    },
}

/// Pipeline stage an infrastructure error originated from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Stage {
    Rasterization,
    Baseline,
    Diff,
    Analysis,
    Gate,
    Scheduler,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Rasterization => "rasterization",
            Stage::Baseline => "baseline",
            Stage::Diff => "diff",
            Stage::Analysis => "analysis",
            Stage::Gate => "gate",
            Stage::Scheduler => "scheduler",
        };
        f.write_str(name)
    }
}

/// What went wrong, independent of where
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum InfraKind {
    Timeout,
    Unavailable,
    Corrupted,
    InvalidInput,
    Cancelled,
    Internal,
}

impl fmt::Display for InfraKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            InfraKind::Timeout => "timeout",
            InfraKind::Unavailable => "unavailable",
            InfraKind::Corrupted => "corrupted",
            InfraKind::InvalidInput => "invalid input",
            InfraKind::Cancelled => "cancelled",
            InfraKind::Internal => "internal",
        };
        f.write_str(name)
    }
}

/// A stage-tagged infrastructure failure carried in an item's report
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[error("{stage} failed ({kind}): {message}")]
pub struct InfrastructureError {
    pub stage: Stage,
    pub kind: InfraKind,
    pub message: String,
}

impl InfrastructureError {
    pub fn new(stage: Stage, kind: InfraKind, message: impl Into<String>) -> Self {
        Self {
            stage,
            kind,
            message: message.into(),
        }
    }

    pub fn timeout(stage: Stage, after: Duration) -> Self {
        Self::new(
            stage,
            InfraKind::Timeout,
            format!("timed out after {:.1}s", after.as_secs_f32()),
        )
    }

    pub fn cancelled(stage: Stage, message: impl Into<String>) -> Self {
        Self::new(stage, InfraKind::Cancelled, message)
    }
}

/// Convenience Result type alias
pub type Result<T> = std::result::Result<T, GateError>;
