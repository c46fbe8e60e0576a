//! Run manifest and the in-memory run state
//!
//! `run_state.json` records the batch size the output root was built with,
//! the last batch index once the end of the stream has been seen, and one
//! record per batch. Completion markers are authoritative: a batch is
//! Complete only if its `complete.json` exists and parses.

use super::marker::CompletionMarker;
use super::ResumeError;
use crate::output::OutputLayout;
use crate::pipeline::BatchStatus;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{debug, info, warn};

/// Current run manifest schema version
pub const SCHEMA_VERSION: &str = "1.0.0";

/// Maximum allowed manifest size (10 MB) to prevent memory exhaustion
pub const MAX_STATE_FILE_SIZE: u64 = 10 * 1024 * 1024;

/// Persisted record of one batch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchRecord {
    /// Last known status
    pub status: BatchStatus,
    /// Items assigned to the batch
    #[serde(default)]
    pub items: usize,
    /// Items converted successfully
    #[serde(default)]
    pub succeeded: usize,
    /// Items that failed
    #[serde(default)]
    pub failed: usize,
    /// Batch-level errors (scheduling, fetch)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
    /// Last update, unix millis
    pub updated_at: i64,
}

impl BatchRecord {
    /// Record with a status and no counts
    pub fn with_status(status: BatchStatus) -> Self {
        Self {
            status,
            items: 0,
            succeeded: 0,
            failed: 0,
            errors: Vec::new(),
            updated_at: Utc::now().timestamp_millis(),
        }
    }
}

/// Status of every batch seen under one output root
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunState {
    schema_version: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    batch_size: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    last_batch: Option<u64>,
    batches: BTreeMap<u64, BatchRecord>,
    created_at: i64,
    updated_at: i64,
}

impl Default for RunState {
    fn default() -> Self {
        Self::new()
    }
}

impl RunState {
    /// Empty state
    pub fn new() -> Self {
        let now = Utc::now().timestamp_millis();
        Self {
            schema_version: SCHEMA_VERSION.to_string(),
            batch_size: None,
            last_batch: None,
            batches: BTreeMap::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Load the manifest (if any) and reconcile it with the markers on disk
    pub fn scan(root: &Path) -> Result<Self, ResumeError> {
        let layout = OutputLayout::new(root);
        let manifest = layout.manifest();

        let mut state = if manifest.exists() {
            Self::load(&manifest)?
        } else {
            debug!(root = %root.display(), "No run manifest, starting fresh state");
            Self::new()
        };

        // Manifest entries claiming Complete must be backed by a marker
        let claimed: Vec<u64> = state
            .batches
            .iter()
            .filter(|(_, r)| r.status == BatchStatus::Complete)
            .map(|(i, _)| *i)
            .collect();
        for index in claimed {
            if !layout.marker(index).exists() {
                warn!(batch = index, "Manifest says complete but marker is missing; batch will be regenerated");
                if let Some(record) = state.batches.get_mut(&index) {
                    record.status = BatchStatus::InProgress;
                }
            }
        }

        let indices = layout
            .batch_indices()
            .map_err(|e| ResumeError::IoError(e.to_string()))?;
        for index in indices {
            let marker_path = layout.marker(index);
            if !marker_path.exists() {
                continue;
            }
            match CompletionMarker::load(&marker_path) {
                Ok(marker) => {
                    if marker.batch != index {
                        warn!(batch = index, marker_batch = marker.batch, "Marker index mismatch; ignoring marker");
                        state.demote(index);
                        continue;
                    }
                    if state.batch_size.is_none() {
                        state.batch_size = Some(marker.batch_size);
                    }
                    state.batches.insert(index, marker.to_record());
                }
                Err(e) => {
                    warn!(batch = index, error = %e, "Unreadable completion marker; batch will be regenerated");
                    state.demote(index);
                }
            }
        }

        info!(
            root = %root.display(),
            complete = state.complete_indices().len(),
            last_batch = ?state.last_batch,
            "Run state loaded"
        );
        Ok(state)
    }

    /// Read and validate a manifest file
    pub fn load(path: &Path) -> Result<Self, ResumeError> {
        let metadata = std::fs::metadata(path).map_err(|e| ResumeError::IoError(e.to_string()))?;
        if metadata.len() > MAX_STATE_FILE_SIZE {
            return Err(ResumeError::StateTooLarge {
                size: metadata.len(),
                max: MAX_STATE_FILE_SIZE,
            });
        }

        let contents =
            std::fs::read_to_string(path).map_err(|e| ResumeError::IoError(e.to_string()))?;
        let state: RunState = serde_json::from_str(&contents).map_err(|e| {
            warn!(error = %e, "Failed to deserialize run manifest");
            ResumeError::DeserializationError(e.to_string())
        })?;
        state.validate_schema_version()?;
        Ok(state)
    }

    /// Validate schema version (accepts current version only)
    pub fn validate_schema_version(&self) -> Result<(), ResumeError> {
        if self.schema_version != SCHEMA_VERSION {
            return Err(ResumeError::SchemaVersionMismatch {
                expected: SCHEMA_VERSION.to_string(),
                found: self.schema_version.clone(),
            });
        }
        Ok(())
    }

    /// Batch size the output root was built with
    pub fn batch_size(&self) -> Option<u64> {
        self.batch_size
    }

    /// Record the batch size, failing if a different one is already recorded
    pub fn bind_batch_size(&mut self, batch_size: u64) -> Result<(), ResumeError> {
        match self.batch_size {
            Some(existing) if existing != batch_size => Err(ResumeError::BatchSizeMismatch {
                recorded: existing,
                requested: batch_size,
            }),
            _ => {
                self.batch_size = Some(batch_size);
                Ok(())
            }
        }
    }

    /// Last batch index of the stream, once discovered
    pub fn last_batch(&self) -> Option<u64> {
        self.last_batch
    }

    /// Record that the stream ends inside batch `index`
    pub fn record_last_batch(&mut self, index: u64) {
        if self.last_batch != Some(index) {
            info!(last_batch = index, "End of item stream recorded");
            self.last_batch = Some(index);
            self.touch();
        }
    }

    /// Status of batch `index` (Pending when never seen)
    pub fn status(&self, index: u64) -> BatchStatus {
        self.batches
            .get(&index)
            .map(|r| r.status)
            .unwrap_or(BatchStatus::Pending)
    }

    /// Whether batch `index` is Complete
    pub fn is_complete(&self, index: u64) -> bool {
        self.status(index) == BatchStatus::Complete
    }

    /// Record for batch `index`
    pub fn record(&self, index: u64) -> Option<&BatchRecord> {
        self.batches.get(&index)
    }

    /// All records in index order
    pub fn records(&self) -> impl Iterator<Item = (u64, &BatchRecord)> {
        self.batches.iter().map(|(i, r)| (*i, r))
    }

    /// Store the record for batch `index`
    pub fn set_record(&mut self, index: u64, record: BatchRecord) {
        debug!(batch = index, status = %record.status, "Updating batch record");
        self.batches.insert(index, record);
        self.touch();
    }

    /// Mark batch `index` InProgress
    pub fn mark_in_progress(&mut self, index: u64) {
        self.set_record(index, BatchRecord::with_status(BatchStatus::InProgress));
    }

    /// Indices with the given status
    pub fn indices_with(&self, status: BatchStatus) -> Vec<u64> {
        self.batches
            .iter()
            .filter(|(_, r)| r.status == status)
            .map(|(i, _)| *i)
            .collect()
    }

    /// Complete batch indices
    pub fn complete_indices(&self) -> Vec<u64> {
        self.indices_with(BatchStatus::Complete)
    }

    /// Whether every batch from `start_batch` through the last batch is Complete
    pub fn is_finished_from(&self, start_batch: u64) -> bool {
        match self.last_batch {
            Some(last) if last >= start_batch => (start_batch..=last).all(|i| self.is_complete(i)),
            _ => false,
        }
    }

    fn demote(&mut self, index: u64) {
        if let Some(record) = self.batches.get_mut(&index) {
            if record.status == BatchStatus::Complete {
                record.status = BatchStatus::InProgress;
            }
        }
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now().timestamp_millis();
    }
}
