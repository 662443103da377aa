//! # Core Module
//!
//! The validation engine, independent of any front end.
//!
//! ## Modules
//! - `cache` - Content-addressed storage of rendered pages
//! - `raster` - Cached, retrying, deduplicated page rasterization
//! - `baseline` - Approved reference documents
//! - `diff` - Pixel comparison and page classification
//! - `analysis` - Tiered content scoring with fallback
//! - `gate` - Pass/fail decision and exit codes
//! - `pipeline` - One document through every stage
//! - `batch` - Many documents on a worker pool

pub mod analysis;
pub mod baseline;
pub mod batch;
pub mod cache;
pub mod diff;
pub mod gate;
pub mod pipeline;
pub mod raster;
pub mod timeout;

// Re-export commonly used types
pub use analysis::{AnalysisResult, Tier};
pub use batch::{BatchReport, BatchScheduler};
pub use diff::{DiffClass, DiffResult};
pub use gate::{GateDecision, GateStatus};
pub use pipeline::{ItemOutcome, ItemPipeline, ItemRequest};
