//! On-disk layout of a run
//!
//! ```text
//! <root>/
//!   run_state.json
//!   .run.lock
//!   run.log
//!   errors/{id}_{slug}.html
//!   batch_{index}/
//!     {id}.html
//!     batch.log
//!     complete.json
//! ```

use super::{OutputError, OutputResult};
use std::path::{Path, PathBuf};

/// Run manifest file name
pub const MANIFEST_FILE: &str = "run_state.json";
/// Run lock file name
pub const LOCK_FILE: &str = ".run.lock";
/// Run log file name
pub const RUN_LOG_FILE: &str = "run.log";
/// Error documents directory name
pub const ERRORS_DIR: &str = "errors";
/// Per-batch log file name
pub const BATCH_LOG_FILE: &str = "batch.log";
/// Completion marker file name
pub const MARKER_FILE: &str = "complete.json";
/// Batch directory prefix
pub const BATCH_DIR_PREFIX: &str = "batch_";

/// Paths under one output root
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputLayout {
    root: PathBuf,
}

impl OutputLayout {
    /// Layout rooted at `root`
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Output root
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Create the output root
    pub fn ensure_root(&self) -> OutputResult<()> {
        std::fs::create_dir_all(&self.root).map_err(|e| {
            OutputError::IoError(format!(
                "Failed to create output root {}: {e}",
                self.root.display()
            ))
        })
    }

    /// `<root>/run_state.json`
    pub fn manifest(&self) -> PathBuf {
        self.root.join(MANIFEST_FILE)
    }

    /// `<root>/.run.lock`
    pub fn lock_file(&self) -> PathBuf {
        self.root.join(LOCK_FILE)
    }

    /// `<root>/run.log`
    pub fn run_log(&self) -> PathBuf {
        self.root.join(RUN_LOG_FILE)
    }

    /// `<root>/errors`
    pub fn errors_dir(&self) -> PathBuf {
        self.root.join(ERRORS_DIR)
    }

    /// `<root>/batch_{index}`
    pub fn batch_dir(&self, index: u64) -> PathBuf {
        self.root.join(format!("{BATCH_DIR_PREFIX}{index}"))
    }

    /// `<root>/batch_{index}/batch.log`
    pub fn batch_log(&self, index: u64) -> PathBuf {
        self.batch_dir(index).join(BATCH_LOG_FILE)
    }

    /// `<root>/batch_{index}/complete.json`
    pub fn marker(&self, index: u64) -> PathBuf {
        self.batch_dir(index).join(MARKER_FILE)
    }

    /// Remove a batch directory's contents and recreate it empty
    pub fn reset_batch_dir(&self, index: u64) -> OutputResult<PathBuf> {
        let dir = self.batch_dir(index);
        if dir.exists() {
            std::fs::remove_dir_all(&dir).map_err(|e| {
                OutputError::IoError(format!("Failed to clear {}: {e}", dir.display()))
            })?;
        }
        std::fs::create_dir_all(&dir)
            .map_err(|e| OutputError::IoError(format!("Failed to create {}: {e}", dir.display())))?;
        Ok(dir)
    }

    /// Batch indices with a directory under the root, ascending
    pub fn batch_indices(&self) -> OutputResult<Vec<u64>> {
        let entries = match std::fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(OutputError::IoError(e.to_string())),
        };

        let mut indices: Vec<u64> = entries
            .filter_map(Result::ok)
            .filter(|entry| entry.path().is_dir())
            .filter_map(|entry| parse_batch_dir_name(&entry.file_name().to_string_lossy()))
            .collect();
        indices.sort_unstable();
        Ok(indices)
    }
}

/// Index encoded in a `batch_{index}` directory name
pub fn parse_batch_dir_name(name: &str) -> Option<u64> {
    let digits = name.strip_prefix(BATCH_DIR_PREFIX)?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

/// File name of an item's artifact
pub fn artifact_file_name(item_id: u64) -> String {
    format!("{item_id}.html")
}
