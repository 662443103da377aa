//! Progress events emitted while a batch runs.

use crate::core::analysis::Tier;
use crate::core::gate::GateStatus;
use crate::core::raster::RasterSource;
use crate::error::Stage;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use uuid::Uuid;

/// Everything the engine reports while working
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Event {
    Batch(BatchEvent),
    Item(ItemEvent),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum BatchEvent {
    Started { run_id: Uuid, total_items: usize },
    /// Remaining queued items will not be dispatched
    Aborted { reason: String },
    Completed { summary: BatchSummary },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ItemEvent {
    Started {
        id: String,
        path: PathBuf,
    },
    Rasterized {
        id: String,
        pages: u32,
        source: RasterSource,
    },
    /// A pipeline stage finished, successfully or not
    Stage {
        id: String,
        stage: Stage,
        ok: bool,
    },
    Analyzed {
        id: String,
        tier: Tier,
        fallback_used: bool,
    },
    Finished {
        id: String,
        status: GateStatus,
        overall_score: f64,
        duration_ms: u64,
    },
}

impl ItemEvent {
    pub fn item_id(&self) -> &str {
        match self {
            ItemEvent::Started { id, .. }
            | ItemEvent::Rasterized { id, .. }
            | ItemEvent::Stage { id, .. }
            | ItemEvent::Analyzed { id, .. }
            | ItemEvent::Finished { id, .. } => id,
        }
    }
}

/// Headline numbers for a finished batch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchSummary {
    pub total_items: usize,
    pub passed: usize,
    pub failed: usize,
    pub infra_errors: usize,
    pub duration_ms: u64,
    pub exit_code: u8,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn item_events_round_trip_through_json() {
        let event = Event::Item(ItemEvent::Finished {
            id: "invoice-7".to_string(),
            status: GateStatus::Fail,
            overall_score: 71.5,
            duration_ms: 940,
        });

        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"status\":\"FAIL\""));
        assert!(json.contains("\"overallScore\":71.5"));

        let back: Event = serde_json::from_str(&json).unwrap();
        assert_eq!(back, event);
    }

    #[test]
    fn item_id_is_available_for_every_variant() {
        let event = ItemEvent::Stage {
            id: "a".to_string(),
            stage: Stage::Diff,
            ok: true,
        };

        assert_eq!(event.item_id(), "a");
    }
}
