//! # CLI Module
//!
//! Command-line front end for the quality gate.
//!
//! ## Usage
//! ```bash
//! # Validate one document against a baseline
//! pdf-gate validate out/brochure.pdf --baseline brochure-v3
//!
//! # Validate a batch described in a JSON file
//! pdf-gate batch jobs.json --config gate.json --output json --report report.json
//!
//! # Sign-off run with the strict quality bar
//! pdf-gate batch jobs.json --profile strict
//!
//! # Inspect or maintain the render cache
//! pdf-gate cache stats
//! pdf-gate cache prune --days 7
//! ```
//!
//! The process exit code is the gate status: 0 pass, 1 fail, 3 infrastructure
//! error.

use clap::{Parser, Subcommand, ValueEnum};
use console::{style, Term};
use indicatif::{ProgressBar, ProgressStyle};
use pdf_gate::config::{QaProfile, ValidatorConfig};
use pdf_gate::core::analysis::Tier;
use pdf_gate::core::batch::{
    export_csv, export_json, export_json_lines, BatchReport, BatchScheduler, CancellationToken,
};
use pdf_gate::core::cache::{CacheBackend, DiskCache, InMemoryCache};
use pdf_gate::core::diff::DiffClass;
use pdf_gate::core::gate::GateStatus;
use pdf_gate::core::pipeline::{ItemPipeline, ItemRequest};
use pdf_gate::error::{ConfigError, GateError, Result};
use pdf_gate::events::{BatchEvent, Event, EventChannel, ItemEvent};
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::info;

/// PDF quality gate - compare generated documents against approved baselines
#[derive(Parser, Debug)]
#[command(name = "pdf-gate")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// JSON configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Render cache directory (defaults to the platform cache dir)
    #[arg(long, global = true)]
    cache_dir: Option<PathBuf>,

    /// Keep rendered pages in memory only
    #[arg(long, global = true)]
    no_cache: bool,

    /// Quality bar preset, overriding the config file's gate settings
    #[arg(long, global = true, value_enum)]
    profile: Option<ProfileArg>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Validate a single document
    Validate {
        /// Document to validate
        document: PathBuf,

        /// Baseline reference id
        #[arg(short, long)]
        baseline: String,

        /// Directory holding baseline references
        #[arg(long)]
        baseline_dir: Option<PathBuf>,

        /// Analysis tier
        #[arg(short, long)]
        tier: Option<TierArg>,

        /// Pass threshold (0-100)
        #[arg(long)]
        threshold: Option<f64>,

        #[command(flatten)]
        output: OutputArgs,
    },

    /// Validate every document listed in a JSON request file
    Batch {
        /// JSON array of `{documentPath, baselineReferenceId, tier?, threshold?}`
        requests: PathBuf,

        /// Directory holding baseline references
        #[arg(long)]
        baseline_dir: Option<PathBuf>,

        /// Parallel workers
        #[arg(short = 'j', long)]
        concurrency: Option<usize>,

        #[command(flatten)]
        output: OutputArgs,
    },

    /// Inspect or maintain the render cache
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },
}

#[derive(Subcommand, Debug)]
enum CacheAction {
    /// Show cache statistics
    Stats,
    /// Remove documents older than the configured TTL
    Prune {
        /// Override `cacheTtlDays`
        #[arg(long)]
        days: Option<u64>,
    },
    /// Remove everything
    Clear,
}

#[derive(clap::Args, Debug)]
struct OutputArgs {
    /// Output format
    #[arg(short, long, default_value = "pretty")]
    output: OutputFormat,

    /// Also write the full JSON report to this file
    #[arg(long)]
    report: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum TierArg {
    /// Image statistics only
    Heuristic,
    /// Extracted text plus image statistics
    Extraction,
    /// Consensus of vision backends
    AiVisionEnsemble,
}

impl From<TierArg> for Tier {
    fn from(tier: TierArg) -> Self {
        match tier {
            TierArg::Heuristic => Tier::Heuristic,
            TierArg::Extraction => Tier::Extraction,
            TierArg::AiVisionEnsemble => Tier::AiVisionEnsemble,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum ProfileArg {
    /// Threshold 60, average diff up to 15%
    Draft,
    /// Threshold 80, average diff up to 5%
    Standard,
    /// Threshold 90, average diff up to 2%, critical issues fail
    Strict,
}

impl From<ProfileArg> for QaProfile {
    fn from(profile: ProfileArg) -> Self {
        match profile {
            ProfileArg::Draft => QaProfile::Draft,
            ProfileArg::Standard => QaProfile::Standard,
            ProfileArg::Strict => QaProfile::Strict,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    /// Human-readable output with colors
    Pretty,
    /// One JSON document
    Json,
    /// One JSON record per item, then the aggregate
    Jsonl,
    /// CSV summary
    Csv,
}

/// Run the CLI and return the process exit code
pub fn run() -> Result<u8> {
    let cli = Cli::parse();
    let mut config = match &cli.config {
        Some(path) => ValidatorConfig::from_json_file(path)?,
        None => ValidatorConfig::default(),
    };
    if cli.cache_dir.is_some() {
        config.cache_dir = cli.cache_dir.clone();
    }
    if let Some(profile) = cli.profile {
        info!(profile = ?profile, "applying QA profile");
        config.apply_profile(profile.into());
    }

    match cli.command {
        Commands::Validate {
            document,
            baseline,
            baseline_dir,
            tier,
            threshold,
            output,
        } => {
            if let Some(dir) = baseline_dir {
                config.baseline_dir = dir;
            }
            let mut request = ItemRequest::new(display_id(&document), document, baseline);
            request.tier = tier.map(Tier::from);
            request.threshold = threshold;
            run_batch(config, cli.no_cache, vec![request], &output)
        }
        Commands::Batch {
            requests,
            baseline_dir,
            concurrency,
            output,
        } => {
            if let Some(dir) = baseline_dir {
                config.baseline_dir = dir;
            }
            if let Some(concurrency) = concurrency {
                config.concurrency = concurrency;
            }
            let requests = read_requests(&requests)?;
            run_batch(config, cli.no_cache, requests, &output)
        }
        Commands::Cache { action } => run_cache(&config, action),
    }
}

fn display_id(path: &Path) -> String {
    path.file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

fn read_requests(path: &Path) -> Result<Vec<ItemRequest>> {
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let requests: Vec<ItemRequest> = serde_json::from_str(&text).map_err(|e| ConfigError::Parse {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;
    Ok(requests)
}

fn open_cache(config: &ValidatorConfig, no_cache: bool) -> Result<Arc<dyn CacheBackend>> {
    let dir = match config.resolved_cache_dir() {
        Some(dir) if !no_cache => dir,
        _ => return Ok(Arc::new(InMemoryCache::new()) as Arc<dyn CacheBackend>),
    };
    let cache = DiskCache::open(&dir)?;
    let pruned = cache.prune_older_than(config.cache_ttl())?;
    if pruned > 0 {
        info!(target: "pdf_gate::cache", pruned, dir = %dir.display(), "pruned expired documents");
    }
    Ok(Arc::new(cache) as Arc<dyn CacheBackend>)
}

fn run_batch(
    config: ValidatorConfig,
    no_cache: bool,
    requests: Vec<ItemRequest>,
    output: &OutputArgs,
) -> Result<u8> {
    config.validate()?;
    let term = Term::stderr();
    let pretty = output.output == OutputFormat::Pretty;

    if pretty {
        term.write_line(&format!(
            "{} {}",
            style("pdf-gate").bold().cyan(),
            style(env!("CARGO_PKG_VERSION")).dim()
        ))
        .ok();
        term.write_line("").ok();
    }

    let cache = open_cache(&config, no_cache)?;
    let pipeline = ItemPipeline::builder().config(config).cache(cache).build()?;
    let scheduler = BatchScheduler::new(pipeline);

    let (sender, receiver) = EventChannel::new();
    let bar = pretty.then(|| {
        let bar = ProgressBar::new(requests.len() as u64);
        if let Ok(bar_style) = ProgressStyle::default_bar()
            .template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
        {
            bar.set_style(bar_style.progress_chars("█▓░"));
        }
        bar.enable_steady_tick(Duration::from_millis(120));
        bar
    });

    let event_thread = thread::spawn(move || {
        for event in receiver.iter() {
            let Some(bar) = &bar else { continue };
            match event {
                Event::Item(ItemEvent::Started { id, .. }) => bar.set_message(id),
                Event::Item(ItemEvent::Finished { id, status, .. }) => {
                    bar.inc(1);
                    if status != GateStatus::Pass {
                        bar.println(format!("  {} {}", status_label(status), id));
                    }
                }
                Event::Batch(BatchEvent::Aborted { reason }) => {
                    bar.println(format!("  {} {}", style("aborted:").red(), reason));
                }
                Event::Batch(BatchEvent::Completed { .. }) => bar.finish_and_clear(),
                _ => {}
            }
        }
    });

    let report = scheduler.run_with(requests, &CancellationToken::new(), &sender);

    drop(sender);
    event_thread.join().ok();

    if let Some(path) = &output.report {
        let file = File::create(path).map_err(GateError::Report)?;
        export_json(&report, BufWriter::new(file)).map_err(GateError::Report)?;
    }

    let stdout = io::stdout();
    let written = match output.output {
        OutputFormat::Pretty => {
            print_pretty_report(&term, &report);
            Ok(())
        }
        OutputFormat::Json => {
            export_json(&report, stdout.lock()).and_then(|_| writeln!(stdout.lock()))
        }
        OutputFormat::Jsonl => export_json_lines(&report, stdout.lock()),
        OutputFormat::Csv => export_csv(&report, stdout.lock()),
    };
    written.map_err(GateError::Report)?;

    Ok(report.exit_code())
}

fn status_label(status: GateStatus) -> String {
    match status {
        GateStatus::Pass => style("PASS").green().bold().to_string(),
        GateStatus::Fail => style("FAIL").yellow().bold().to_string(),
        GateStatus::InfraError => style("INFRA_ERROR").red().bold().to_string(),
    }
}

fn print_pretty_report(term: &Term, report: &BatchReport) {
    let aggregate = &report.aggregate;
    let counts = &aggregate.status_counts;

    term.write_line(&format!(
        "{} {} item(s) validated in {:.1}s",
        style("✓").green().bold(),
        style(report.items.len()).cyan(),
        report.aggregate.total_duration_ms as f64 / 1000.0
    ))
    .ok();
    term.write_line(&format!(
        "  {} passed, {} failed, {} infrastructure error(s)",
        style(counts.pass).green(),
        style(counts.fail).yellow(),
        style(counts.infra_error).red()
    ))
    .ok();
    term.write_line(&format!(
        "  average score {}",
        style(format!("{:.1}", aggregate.average_score)).cyan()
    ))
    .ok();
    if aggregate.cache_hits > 0 || aggregate.deduplicated > 0 {
        term.write_line(&format!(
            "  {}",
            style(format!(
                "{} cache hit(s), {} deduplicated render(s)",
                aggregate.cache_hits, aggregate.deduplicated
            ))
            .dim()
        ))
        .ok();
    }
    term.write_line("").ok();

    for record in &report.items {
        let outcome = &record.outcome;
        term.write_line(&format!(
            "{} {} ({:.1})",
            status_label(outcome.status),
            style(&outcome.id).bold(),
            outcome.overall_score
        ))
        .ok();

        if let Some(tier) = outcome.analysis_tier {
            let tier_line = if outcome.fallback_used {
                format!(
                    "    tier {} (requested {}): {}",
                    tier,
                    outcome.requested_tier,
                    outcome.fallback_reason.as_deref().unwrap_or("fallback")
                )
            } else {
                format!("    tier {}", tier)
            };
            term.write_line(&style(tier_line).dim().to_string()).ok();
        }

        for diff in outcome.per_page_diff.iter().filter(|d| {
            d.classification != DiffClass::Pass
                || d.edge_content_flag
                || d.dimension_mismatch
        }) {
            let mut flags = Vec::new();
            if diff.edge_content_flag {
                flags.push("edge content");
            }
            if diff.dimension_mismatch {
                flags.push("size mismatch");
            }
            term.write_line(&format!(
                "    page {}: {:.2}% {}{}",
                diff.page,
                diff.diff_percentage,
                diff.classification,
                if flags.is_empty() {
                    String::new()
                } else {
                    format!(" [{}]", flags.join(", "))
                }
            ))
            .ok();
        }

        for reason in &outcome.reasons {
            term.write_line(&format!("    {} {}", style("•").dim(), reason)).ok();
        }
    }
}

fn run_cache(config: &ValidatorConfig, action: CacheAction) -> Result<u8> {
    let term = Term::stdout();
    let Some(dir) = config.resolved_cache_dir() else {
        term.write_line("No cache directory available on this platform").ok();
        return Ok(GateStatus::InfraError.exit_code());
    };
    let cache = DiskCache::open(&dir)?;

    match action {
        CacheAction::Stats => {
            let stats = cache.stats()?;
            term.write_line(&format!("{}", style(dir.display()).bold())).ok();
            term.write_line(&format!("  {} document(s)", style(stats.documents).cyan()))
                .ok();
            term.write_line(&format!("  {} page image(s)", style(stats.pages).cyan()))
                .ok();
            term.write_line(&format!(
                "  {}",
                style(format_bytes(stats.total_size_bytes)).yellow()
            ))
            .ok();
            if let (Some(oldest), Some(newest)) = (stats.oldest_entry, stats.newest_entry) {
                term.write_line(&format!(
                    "  {}",
                    style(format!("oldest {}, newest {}", oldest.to_rfc3339(), newest.to_rfc3339()))
                        .dim()
                ))
                .ok();
            }
        }
        CacheAction::Prune { days } => {
            let ttl = days
                .map(|d| Duration::from_secs(d.saturating_mul(24 * 60 * 60)))
                .unwrap_or_else(|| config.cache_ttl());
            let removed = cache.prune_older_than(ttl)?;
            term.write_line(&format!("Pruned {} document(s)", style(removed).cyan()))
                .ok();
        }
        CacheAction::Clear => {
            cache.clear()?;
            term.write_line("Cache cleared").ok();
        }
    }

    Ok(GateStatus::Pass.exit_code())
}

fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.1} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} bytes", bytes)
    }
}
