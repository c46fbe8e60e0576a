//! Batches and their lifecycle

use crate::{ConversionResult, ItemDescriptor, RejectedItem};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Batch lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    /// Cut but not started
    Pending,
    /// Being processed
    InProgress,
    /// Every item accounted for; marker written
    Complete,
    /// Batch-level failure
    Failed,
}

impl BatchStatus {
    /// Whether `self -> next` is allowed. Moves are one-way:
    /// Pending -> InProgress -> {Complete, Failed}.
    pub fn can_transition_to(self, next: BatchStatus) -> bool {
        matches!(
            (self, next),
            (BatchStatus::Pending, BatchStatus::InProgress)
                | (BatchStatus::InProgress, BatchStatus::Complete)
                | (BatchStatus::InProgress, BatchStatus::Failed)
        )
    }

    /// Complete or Failed
    pub fn is_resolved(self) -> bool {
        matches!(self, BatchStatus::Complete | BatchStatus::Failed)
    }

    /// Lowercase label for logs and metrics
    pub fn as_str(self) -> &'static str {
        match self {
            BatchStatus::Pending => "pending",
            BatchStatus::InProgress => "in_progress",
            BatchStatus::Complete => "complete",
            BatchStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for BatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Rejected status change
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("batch {index}: invalid transition {from} -> {to}")]
pub struct TransitionError {
    /// Batch index
    pub index: u64,
    /// Current status
    pub from: BatchStatus,
    /// Requested status
    pub to: BatchStatus,
}

/// A contiguous slice of the item stream
#[derive(Debug, Clone)]
pub struct Batch {
    /// Batch ordinal
    pub index: u64,
    /// Items in stream order
    pub items: Vec<ItemDescriptor>,
    /// Records of this slice that failed validation
    pub rejected: Vec<RejectedItem>,
    /// `<root>/batch_{index}`
    pub output_dir: PathBuf,
    status: BatchStatus,
}

impl Batch {
    /// New Pending batch
    pub fn new(index: u64, items: Vec<ItemDescriptor>, output_dir: PathBuf) -> Self {
        Self {
            index,
            items,
            rejected: Vec::new(),
            output_dir,
            status: BatchStatus::Pending,
        }
    }

    /// Attach rejected records, reported as permanent failures
    pub fn with_rejected(mut self, rejected: Vec<RejectedItem>) -> Self {
        self.rejected = rejected;
        self
    }

    /// Current status
    pub fn status(&self) -> BatchStatus {
        self.status
    }

    /// Move to `next`, rejecting backwards or skipping moves
    pub fn transition(&mut self, next: BatchStatus) -> Result<(), TransitionError> {
        if !self.status.can_transition_to(next) {
            return Err(TransitionError {
                index: self.index,
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        Ok(())
    }

    /// Item ids in order
    pub fn item_ids(&self) -> Vec<u64> {
        self.items.iter().map(|i| i.id).collect()
    }

    /// Number of convertible items (rejected records excluded)
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Whether the batch has no items
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// What the worker pool reports for one batch
#[derive(Debug, Clone)]
pub struct BatchOutcome {
    /// Batch index
    pub index: u64,
    /// Complete or Failed
    pub status: BatchStatus,
    /// One result per item in batch order, then one per rejected record
    pub results: Vec<ConversionResult>,
    /// Batch-level problems (crashed workers, unaccounted items)
    pub errors: Vec<String>,
}

impl BatchOutcome {
    /// Items that produced artifacts
    pub fn succeeded(&self) -> impl Iterator<Item = &ConversionResult> {
        self.results.iter().filter(|r| r.is_success())
    }

    /// Items that failed
    pub fn failed(&self) -> impl Iterator<Item = &ConversionResult> {
        self.results.iter().filter(|r| !r.is_success())
    }

    /// Count of successes
    pub fn success_count(&self) -> usize {
        self.succeeded().count()
    }

    /// Count of failures
    pub fn failure_count(&self) -> usize {
        self.failed().count()
    }
}
