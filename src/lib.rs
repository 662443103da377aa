//! # pdf-gate
//!
//! Visual regression and quality gate for generated PDF documents.
//!
//! Each document is rendered to page images, compared pixel by pixel
//! against an approved baseline, scored by a tiered content analysis, and
//! gated to PASS, FAIL or INFRA_ERROR.
//!
//! ## Architecture
//! - `core` - The validation engine (cache, rasterizer, diff, analysis, gate, batch)
//! - `config` - Run configuration loaded from JSON
//! - `events` - Progress events for front ends
//! - `error` - Error types and the infrastructure error taxonomy

pub mod config;
pub mod core;
pub mod error;
pub mod events;

// Re-export commonly used types at the crate root
pub use config::ValidatorConfig;
pub use error::{GateError, InfrastructureError, Result};

/// Install the `tracing` subscriber, filtered by `RUST_LOG`
///
/// Called by the binary. Does nothing if a subscriber is already set.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .try_init();
}
