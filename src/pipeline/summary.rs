//! Run summary and log line formatting

use super::batch::BatchOutcome;
use super::orchestrator::{RunError, RunPhase};
use super::progress::format_duration;
use chrono::Utc;
use serde::{Serialize, Serializer};
use std::fmt::Write as _;
use std::time::Duration;

/// Failed item as reported to the operator
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailedItem {
    /// Batch index
    pub batch: u64,
    /// Item id
    pub id: u64,
    /// Item title
    pub title: String,
    /// Failure reason
    pub reason: String,
}

/// Batch that never got its items
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailedBatch {
    /// Batch index
    pub batch: u64,
    /// What went wrong
    pub reason: String,
}

/// Outcome of a whole run
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    /// Finished or Aborted
    pub phase: RunPhase,
    /// Why the run aborted
    #[serde(skip_serializing_if = "Option::is_none")]
    pub abort_reason: Option<String>,
    /// Batches completed in this run
    pub batches_processed: u64,
    /// Batches that failed in this run
    pub batches_failed: u64,
    /// Batches skipped because a previous run completed them
    pub batches_skipped: u64,
    /// Items with artifacts
    pub items_succeeded: u64,
    /// Items without artifacts
    pub items_failed: u64,
    /// Media references omitted from otherwise successful documents
    pub media_warnings: u64,
    /// Distinct media URLs fetched over the network
    pub media_fetches: u64,
    /// Last batch of the stream, when known
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_batch: Option<u64>,
    /// Every failed item
    pub failed_items: Vec<FailedItem>,
    /// Batches whose fetch or processing failed
    pub failed_batches: Vec<FailedBatch>,
    /// Wall-clock duration
    #[serde(serialize_with = "serialize_secs", rename = "duration_secs")]
    pub duration: Duration,
}

fn serialize_secs<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_f64(duration.as_secs_f64())
}

impl Default for RunSummary {
    fn default() -> Self {
        Self::new()
    }
}

impl RunSummary {
    /// Empty summary in the NotStarted phase
    pub fn new() -> Self {
        Self {
            phase: RunPhase::NotStarted,
            abort_reason: None,
            batches_processed: 0,
            batches_failed: 0,
            batches_skipped: 0,
            items_succeeded: 0,
            items_failed: 0,
            media_warnings: 0,
            media_fetches: 0,
            last_batch: None,
            failed_items: Vec::new(),
            failed_batches: Vec::new(),
            duration: Duration::ZERO,
        }
    }

    /// Fold one resolved batch into the totals
    pub fn record_outcome(&mut self, outcome: &BatchOutcome) {
        if outcome.status == super::BatchStatus::Complete {
            self.batches_processed += 1;
        } else {
            self.batches_failed += 1;
            self.failed_batches.push(FailedBatch {
                batch: outcome.index,
                reason: if outcome.errors.is_empty() {
                    "interrupted".to_string()
                } else {
                    outcome.errors.join("; ")
                },
            });
        }

        for result in &outcome.results {
            if result.is_success() {
                self.items_succeeded += 1;
                self.media_warnings += result.warnings.len() as u64;
            } else {
                self.items_failed += 1;
                self.failed_items.push(FailedItem {
                    batch: outcome.index,
                    id: result.item_id,
                    title: result.title.clone(),
                    reason: result.outcome.reason().unwrap_or_default().to_string(),
                });
            }
        }
    }

    /// Record a batch whose items could not be fetched
    pub fn record_fetch_failure(&mut self, batch: u64, reason: impl Into<String>) {
        self.batches_failed += 1;
        self.failed_batches.push(FailedBatch {
            batch,
            reason: reason.into(),
        });
    }

    /// Whether the run reached Finished
    pub fn is_finished(&self) -> bool {
        self.phase == RunPhase::Finished
    }

    /// `Err(RunError::Aborted)` unless the run finished
    pub fn ensure_finished(&self) -> Result<(), RunError> {
        match self.phase {
            RunPhase::Finished => Ok(()),
            _ => Err(RunError::Aborted(
                self.abort_reason
                    .clone()
                    .unwrap_or_else(|| format!("run ended in phase {}", self.phase)),
            )),
        }
    }

    /// Multi-line operator report
    pub fn format_human(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "Run {} in {}", self.phase, format_duration(self.duration));
        if let Some(reason) = &self.abort_reason {
            let _ = writeln!(out, "  Reason: {reason}");
        }
        let _ = writeln!(
            out,
            "  Batches: {} completed, {} failed, {} skipped",
            self.batches_processed, self.batches_failed, self.batches_skipped
        );
        let _ = writeln!(
            out,
            "  Items: {} succeeded, {} failed",
            self.items_succeeded, self.items_failed
        );
        let _ = writeln!(
            out,
            "  Media: {} fetched, {} omitted",
            self.media_fetches, self.media_warnings
        );
        if let Some(last) = self.last_batch {
            let _ = writeln!(out, "  Last batch: {last}");
        }

        if !self.failed_batches.is_empty() {
            let _ = writeln!(out, "\nFailed batches:");
            for batch in &self.failed_batches {
                let _ = writeln!(out, "  batch {}: {}", batch.batch, batch.reason);
            }
        }
        if !self.failed_items.is_empty() {
            let _ = writeln!(out, "\nFailed items:");
            for item in &self.failed_items {
                let _ = writeln!(
                    out,
                    "  [batch {}] {} \"{}\": {}",
                    item.batch, item.id, item.title, item.reason
                );
            }
        }
        out
    }
}

/// Contents of `batch_{i}/batch.log`: one line per item, warnings indented
pub fn format_batch_log(outcome: &BatchOutcome) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "{} batch {} {} ({} succeeded, {} failed)",
        Utc::now().to_rfc3339(),
        outcome.index,
        outcome.status,
        outcome.success_count(),
        outcome.failure_count()
    );
    for result in &outcome.results {
        match (&result.artifact, result.outcome.reason()) {
            (Some(path), None) => {
                let name = path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default();
                let _ = writeln!(out, "{} OK {}", result.item_id, name);
            }
            _ => {
                let _ = writeln!(out, "{} FAILED {}", result.item_id, result.outcome);
            }
        }
        for warning in &result.warnings {
            let _ = writeln!(out, "    warning: {warning}");
        }
    }
    for error in &outcome.errors {
        let _ = writeln!(out, "error: {error}");
    }
    out
}

/// One line of `run.log`
pub fn format_run_log_line(batch: u64, status: &str, detail: &str) -> String {
    format!("{} batch {batch} {status} {detail}", Utc::now().to_rfc3339())
}
