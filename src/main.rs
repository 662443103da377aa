//! # pdf-gate CLI
//!
//! Visual regression and quality gate for generated PDFs.
//!
//! ## Usage
//! ```bash
//! pdf-gate validate out/brochure.pdf --baseline brochure-v3 --threshold 85
//! pdf-gate batch jobs.json --output jsonl
//! ```

mod cli;

use console::style;
use pdf_gate::core::gate::GateStatus;
use std::process::ExitCode;

fn main() -> ExitCode {
    pdf_gate::init_tracing();

    match cli::run() {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            eprintln!("{} {}", style("error:").red().bold(), e);
            ExitCode::from(GateStatus::InfraError.exit_code())
        }
    }
}
