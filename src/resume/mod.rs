//! Resumable run state
//!
//! Persistent state for batch-granular resume: the run manifest, per-batch
//! completion markers, and the run lock. All writes are atomic.

pub mod lock;
pub mod marker;
pub mod state;

pub use lock::RunLock;
pub use marker::{CompletionMarker, FailedEntry, SucceededEntry};
pub use state::{BatchRecord, RunState};

use crate::output::{write_json_atomic, OutputLayout};
use std::path::Path;
use tracing::info;

/// Resume state errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum ResumeError {
    /// IO error
    #[error("IO error: {0}")]
    IoError(String),

    /// Serialization error
    #[error("serialization error: {0}")]
    SerializationError(String),

    /// Deserialization error
    #[error("deserialization error: {0}")]
    DeserializationError(String),

    /// Schema version mismatch
    #[error("schema version mismatch: expected {expected}, found {found}")]
    SchemaVersionMismatch {
        /// Expected version
        expected: String,
        /// Found version
        found: String,
    },

    /// State file exceeds maximum allowed size
    #[error("state file too large: {size} bytes (max {max} bytes)")]
    StateTooLarge {
        /// Actual file size in bytes
        size: u64,
        /// Maximum allowed size in bytes
        max: u64,
    },

    /// The output root was built with another batch size
    #[error("output root was built with batch size {recorded}, requested {requested}; use --resume reset or a new output directory")]
    BatchSizeMismatch {
        /// Batch size in the manifest or markers
        recorded: u64,
        /// Batch size of this run
        requested: u64,
    },

    /// Lock error
    #[error("lock error: {0}")]
    LockError(String),
}

/// Persistence seam for run state.
///
/// The orchestrator is the only writer and calls these between batches.
pub trait StateStore: Send + Sync {
    /// Load state, reconciling the manifest with completion markers
    fn load(&self) -> Result<RunState, ResumeError>;

    /// Persist the manifest
    fn save(&self, state: &RunState) -> Result<(), ResumeError>;

    /// Write a batch's completion marker
    fn write_marker(&self, marker: &CompletionMarker) -> Result<(), ResumeError>;

    /// Drop all markers and the manifest
    fn reset(&self) -> Result<(), ResumeError>;
}

/// File-marker store under an output root
#[derive(Debug, Clone)]
pub struct FileStateStore {
    layout: OutputLayout,
}

impl FileStateStore {
    /// Store rooted at `root`
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            layout: OutputLayout::new(root.as_ref()),
        }
    }

    /// Storage layout
    pub fn layout(&self) -> &OutputLayout {
        &self.layout
    }
}

impl StateStore for FileStateStore {
    fn load(&self) -> Result<RunState, ResumeError> {
        RunState::scan(self.layout.root())
    }

    fn save(&self, state: &RunState) -> Result<(), ResumeError> {
        write_json_atomic(&self.layout.manifest(), state).map_err(|e| match e {
            crate::output::OutputError::SerializationError(msg) => {
                ResumeError::SerializationError(msg)
            }
            other => ResumeError::IoError(other.to_string()),
        })
    }

    fn write_marker(&self, marker: &CompletionMarker) -> Result<(), ResumeError> {
        marker.save(&self.layout.marker(marker.batch))
    }

    fn reset(&self) -> Result<(), ResumeError> {
        let indices = self
            .layout
            .batch_indices()
            .map_err(|e| ResumeError::IoError(e.to_string()))?;
        let mut removed = 0usize;
        for index in indices {
            let marker = self.layout.marker(index);
            if marker.exists() {
                std::fs::remove_file(&marker).map_err(|e| ResumeError::IoError(e.to_string()))?;
                removed += 1;
            }
        }
        let manifest = self.layout.manifest();
        if manifest.exists() {
            std::fs::remove_file(&manifest).map_err(|e| ResumeError::IoError(e.to_string()))?;
        }
        info!(root = %self.layout.root().display(), markers = removed, "Resume state reset");
        Ok(())
    }
}
