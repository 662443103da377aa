//! # Pipeline Module
//!
//! Runs one document through the full validation workflow.
//!
//! ## Stages
//! 1. **Rasterize** - render pages, or load them from the cache
//! 2. **Baseline** - load the approved reference
//! 3. **Diff** - compare pages pixel by pixel
//! 4. **Analyze** - score content at the requested tier, degrading on failure
//! 5. **Gate** - decide PASS, FAIL or INFRA_ERROR
//!
//! ## Parallelism
//! Items run in parallel on batch workers; within an item the stages are
//! strictly sequential. Only the diff stage fans out, across pages, with rayon.

mod context;
mod executor;

pub use context::{ItemContext, ItemLog, StepRecord};
pub use executor::{ItemOutcome, ItemPipeline, ItemPipelineBuilder, ItemRequest};
