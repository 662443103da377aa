//! Per-item execution context.

use crate::core::analysis::TierState;
use crate::core::timeout::Deadline;
use crate::error::Stage;
use serde::{Deserialize, Serialize};
use std::time::Instant;

/// One pipeline step as it happened
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepRecord {
    pub stage: Stage,
    pub ok: bool,
    pub detail: String,
    pub duration_ms: u64,
}

/// The serializable part of an [`ItemContext`]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemLog {
    pub steps: Vec<StepRecord>,
    pub tier_trace: Vec<TierState>,
}

/// State owned by the worker running one item
///
/// Passed by `&mut` through every stage and handed back with the result, so
/// nothing about an item's progress lives in shared state.
#[derive(Debug, Clone)]
pub struct ItemContext {
    pub item_id: String,
    pub deadline: Deadline,
    log: ItemLog,
}

impl ItemContext {
    pub fn new(item_id: impl Into<String>, deadline: Deadline) -> Self {
        Self {
            item_id: item_id.into(),
            deadline,
            log: ItemLog::default(),
        }
    }

    pub fn record(&mut self, stage: Stage, ok: bool, detail: impl Into<String>, started: Instant) {
        self.log.steps.push(StepRecord {
            stage,
            ok,
            detail: detail.into(),
            duration_ms: started.elapsed().as_millis() as u64,
        });
    }

    pub fn record_tier(&mut self, state: TierState) {
        self.log.tier_trace.push(state);
    }

    pub fn steps(&self) -> &[StepRecord] {
        &self.log.steps
    }

    pub fn tier_trace(&self) -> &[TierState] {
        &self.log.tier_trace
    }

    pub fn into_log(self) -> ItemLog {
        self.log
    }
}
