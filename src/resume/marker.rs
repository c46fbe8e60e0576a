//! Per-batch completion markers
//!
//! `batch_{i}/complete.json` is written last, atomically, after every artifact
//! of the batch is on disk. Its presence is what makes a batch Complete.

use super::state::BatchRecord;
use super::ResumeError;
use crate::output::write_json_atomic;
use crate::pipeline::BatchStatus;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Current marker schema version
pub const MARKER_SCHEMA_VERSION: &str = "1.0.0";

/// Largest marker accepted when loading
const MAX_MARKER_SIZE: u64 = 4 * 1024 * 1024;

/// Item that produced an artifact
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SucceededEntry {
    /// Item id
    pub id: u64,
    /// Artifact file name inside the batch directory
    pub artifact: String,
}

/// Item that failed, with the reason
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedEntry {
    /// Item id
    pub id: u64,
    /// Failure reason
    pub reason: String,
}

/// Contents of `complete.json`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletionMarker {
    /// Schema version
    pub schema_version: String,
    /// Batch index
    pub batch: u64,
    /// Batch size the batch was cut with
    pub batch_size: u64,
    /// When the batch completed
    pub completed_at: DateTime<Utc>,
    /// Items that produced artifacts
    pub succeeded: Vec<SucceededEntry>,
    /// Items that failed
    pub failed: Vec<FailedEntry>,
}

impl CompletionMarker {
    /// Marker stamped with the current time
    pub fn new(
        batch: u64,
        batch_size: u64,
        succeeded: Vec<SucceededEntry>,
        failed: Vec<FailedEntry>,
    ) -> Self {
        Self {
            schema_version: MARKER_SCHEMA_VERSION.to_string(),
            batch,
            batch_size,
            completed_at: Utc::now(),
            succeeded,
            failed,
        }
    }

    /// Items accounted for by the marker
    pub fn item_count(&self) -> usize {
        self.succeeded.len() + self.failed.len()
    }

    /// Write atomically to `path`
    pub fn save(&self, path: &Path) -> Result<(), ResumeError> {
        write_json_atomic(path, self).map_err(|e| ResumeError::IoError(e.to_string()))
    }

    /// Read and validate a marker
    pub fn load(path: &Path) -> Result<Self, ResumeError> {
        let metadata = std::fs::metadata(path).map_err(|e| ResumeError::IoError(e.to_string()))?;
        if metadata.len() > MAX_MARKER_SIZE {
            return Err(ResumeError::StateTooLarge {
                size: metadata.len(),
                max: MAX_MARKER_SIZE,
            });
        }
        let contents = std::fs::read(path).map_err(|e| ResumeError::IoError(e.to_string()))?;
        let marker: CompletionMarker = serde_json::from_slice(&contents)
            .map_err(|e| ResumeError::DeserializationError(e.to_string()))?;
        if marker.schema_version != MARKER_SCHEMA_VERSION {
            return Err(ResumeError::SchemaVersionMismatch {
                expected: MARKER_SCHEMA_VERSION.to_string(),
                found: marker.schema_version,
            });
        }
        Ok(marker)
    }

    /// Manifest record equivalent to this marker
    pub fn to_record(&self) -> BatchRecord {
        BatchRecord {
            status: BatchStatus::Complete,
            items: self.item_count(),
            succeeded: self.succeeded.len(),
            failed: self.failed.len(),
            errors: Vec::new(),
            updated_at: self.completed_at.timestamp_millis(),
        }
    }

    /// Artifact names listed as written, checked against `batch_dir`
    pub fn missing_artifacts(&self, batch_dir: &Path) -> Vec<String> {
        self.succeeded
            .iter()
            .filter(|entry| !batch_dir.join(&entry.artifact).is_file())
            .map(|entry| entry.artifact.clone())
            .collect()
    }
}
