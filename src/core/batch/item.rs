//! Batch item lifecycle.

use crate::core::gate::GateStatus;
use crate::core::pipeline::{ItemOutcome, ItemRequest};
use crate::error::BatchError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

/// Where an item is in its lifecycle
///
/// `queued -> running -> completed | failed`. Terminal states never change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemState {
    Queued,
    Running,
    Completed,
    Failed,
}

impl ItemState {
    fn name(self) -> &'static str {
        match self {
            ItemState::Queued => "queued",
            ItemState::Running => "running",
            ItemState::Completed => "completed",
            ItemState::Failed => "failed",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, ItemState::Completed | ItemState::Failed)
    }
}

impl fmt::Display for ItemState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A submitted document and, once terminal, its outcome
#[derive(Debug, Clone)]
pub struct BatchItem {
    /// Submission order
    pub seq: usize,
    request: ItemRequest,
    state: ItemState,
    result: Option<ItemOutcome>,
}

impl BatchItem {
    pub fn new(seq: usize, request: ItemRequest) -> Self {
        Self {
            seq,
            request,
            state: ItemState::Queued,
            result: None,
        }
    }

    pub fn id(&self) -> &str {
        &self.request.id
    }

    pub fn path(&self) -> &Path {
        &self.request.document_path
    }

    pub fn request(&self) -> &ItemRequest {
        &self.request
    }

    pub fn state(&self) -> ItemState {
        self.state
    }

    pub fn result(&self) -> Option<&ItemOutcome> {
        self.result.as_ref()
    }

    /// A worker picked the item up
    pub fn start(&mut self) -> Result<(), BatchError> {
        self.transition(ItemState::Running, &[ItemState::Queued])
    }

    /// Record the outcome; infrastructure errors end the item `failed`
    ///
    /// Allowed from `queued` as well, for items a batch abort never
    /// dispatched.
    pub fn finish(&mut self, outcome: ItemOutcome) -> Result<(), BatchError> {
        let next = if outcome.status == GateStatus::InfraError {
            ItemState::Failed
        } else {
            ItemState::Completed
        };
        self.transition(next, &[ItemState::Queued, ItemState::Running])?;
        self.result = Some(outcome);
        Ok(())
    }

    pub fn into_parts(self) -> (ItemState, Option<ItemOutcome>) {
        (self.state, self.result)
    }

    fn transition(&mut self, to: ItemState, allowed_from: &[ItemState]) -> Result<(), BatchError> {
        if !allowed_from.contains(&self.state) {
            return Err(BatchError::InvalidTransition {
                id: self.request.id.clone(),
                from: self.state.name(),
                to: to.name(),
            });
        }
        self.state = to;
        Ok(())
    }
}
