//! Batch report and its exports.

use super::{BatchItem, ItemState};
use crate::core::gate::GateStatus;
use crate::core::pipeline::ItemOutcome;
use crate::core::raster::RasterSource;
use crate::events::BatchSummary;
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::time::Duration;
use uuid::Uuid;

/// One item's entry in the report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemRecord {
    pub state: ItemState,
    #[serde(flatten)]
    pub outcome: ItemOutcome,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusCounts {
    pub pass: usize,
    pub fail: usize,
    pub infra_error: usize,
}

impl StatusCounts {
    fn add(&mut self, status: GateStatus) {
        match status {
            GateStatus::Pass => self.pass += 1,
            GateStatus::Fail => self.fail += 1,
            GateStatus::InfraError => self.infra_error += 1,
        }
    }
}

/// Batch-level numbers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregateStats {
    pub status_counts: StatusCounts,
    /// Mean overall score of items that reached the gate
    pub average_score: f64,
    /// Wall time of the whole batch; the report's only duration field
    pub total_duration_ms: u64,
    /// Items whose pages came straight from the cache
    pub cache_hits: usize,
    /// Items that joined another item's in-flight rasterization
    pub deduplicated: usize,
    /// Items analyzed at a lower tier than requested
    pub fallbacks: usize,
}

impl AggregateStats {
    fn collect(records: &[ItemRecord], total_duration: Duration) -> Self {
        let mut status_counts = StatusCounts::default();
        let mut scored = Vec::new();
        let mut cache_hits = 0;
        let mut deduplicated = 0;
        let mut fallbacks = 0;

        for record in records {
            let outcome = &record.outcome;
            status_counts.add(outcome.status);
            if outcome.status != GateStatus::InfraError {
                scored.push(outcome.overall_score);
            }
            match outcome.raster_source {
                Some(RasterSource::Cache) => cache_hits += 1,
                Some(RasterSource::Joined) => deduplicated += 1,
                _ => {}
            }
            if outcome.fallback_used {
                fallbacks += 1;
            }
        }

        let average_score = if scored.is_empty() {
            0.0
        } else {
            scored.iter().sum::<f64>() / scored.len() as f64
        };

        Self {
            status_counts,
            average_score,
            total_duration_ms: total_duration.as_millis() as u64,
            cache_hits,
            deduplicated,
            fallbacks,
        }
    }
}

/// Final result of a batch, in submission order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchReport {
    pub run_id: Uuid,
    pub items: Vec<ItemRecord>,
    /// Includes the batch's `totalDurationMs`
    pub aggregate: AggregateStats,
}

impl BatchReport {
    /// Build the report from items that have all reached a terminal state
    ///
    /// Items are re-sorted by submission order. An item without an outcome
    /// is a scheduler bug and is left out rather than reported as passing.
    pub fn new(run_id: Uuid, mut items: Vec<BatchItem>, total_duration: Duration) -> Self {
        items.sort_by_key(|item| item.seq);
        let records: Vec<ItemRecord> = items
            .into_iter()
            .filter_map(|item| {
                let (state, outcome) = item.into_parts();
                outcome.map(|outcome| ItemRecord { state, outcome })
            })
            .collect();

        Self {
            run_id,
            aggregate: AggregateStats::collect(&records, total_duration),
            items: records,
        }
    }

    /// Worst item status; an empty batch passes
    pub fn status(&self) -> GateStatus {
        self.items
            .iter()
            .map(|record| record.outcome.status)
            .max()
            .unwrap_or(GateStatus::Pass)
    }

    pub fn exit_code(&self) -> u8 {
        self.status().exit_code()
    }

    pub fn summary(&self) -> BatchSummary {
        let counts = self.aggregate.status_counts;
        BatchSummary {
            total_items: self.items.len(),
            passed: counts.pass,
            failed: counts.fail,
            infra_errors: counts.infra_error,
            duration_ms: self.aggregate.total_duration_ms,
            exit_code: self.exit_code(),
        }
    }
}

/// Write the whole report as one pretty-printed JSON document
pub fn export_json<W: Write>(report: &BatchReport, writer: W) -> std::io::Result<()> {
    serde_json::to_writer_pretty(writer, report)?;
    Ok(())
}

/// Write one JSON record per item, then the aggregate, one per line
pub fn export_json_lines<W: Write>(report: &BatchReport, mut writer: W) -> std::io::Result<()> {
    for record in &report.items {
        serde_json::to_writer(&mut writer, record)?;
        writeln!(writer)?;
    }
    serde_json::to_writer(&mut writer, &report.aggregate)?;
    writeln!(writer)?;
    Ok(())
}

/// Write a CSV summary with one row per item
///
/// Columns: id, state, status, overall score, analysis tier, fallback used,
/// worst page class, document path
pub fn export_csv<W: Write>(report: &BatchReport, mut writer: W) -> std::io::Result<()> {
    writeln!(
        writer,
        "id,state,status,overallScore,analysisTier,fallbackUsed,worstPage,path"
    )?;

    for record in &report.items {
        let outcome = &record.outcome;
        let worst = outcome
            .per_page_diff
            .iter()
            .map(|d| d.classification)
            .max()
            .map(|c| c.to_string())
            .unwrap_or_default();
        let tier = outcome
            .analysis_tier
            .map(|t| t.to_string())
            .unwrap_or_default();

        writeln!(
            writer,
            "{},{},{},{:.2},{},{},{},{}",
            csv_field(&outcome.id),
            record.state,
            outcome.status,
            outcome.overall_score,
            tier,
            outcome.fallback_used,
            worst,
            csv_field(&outcome.path.display().to_string())
        )?;
    }

    Ok(())
}

fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}
