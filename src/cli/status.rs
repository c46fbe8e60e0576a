//! `status` command: run state of an output root, no network access

use super::{print_json, CliError, OutputFormat, OUTPUT_ENV};
use crate::pipeline::config::DEFAULT_OUTPUT_ROOT;
use crate::pipeline::BatchStatus;
use crate::resume::RunState;
use clap::Parser;
use serde::Serialize;
use std::path::PathBuf;

/// Arguments of `post-archiver status`
#[derive(Parser, Debug)]
pub struct StatusCommand {
    /// Output root directory
    #[arg(long, env = OUTPUT_ENV, default_value = DEFAULT_OUTPUT_ROOT)]
    pub output: PathBuf,
}

/// What `status` reports
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusReport {
    /// Output root
    pub root: PathBuf,
    /// Batch size the root was built with
    pub batch_size: Option<u64>,
    /// Last batch of the stream, when discovered
    pub last_batch: Option<u64>,
    /// Batches with completion markers
    pub complete: Vec<u64>,
    /// Batches that failed
    pub failed: Vec<u64>,
    /// Batches started but never completed
    pub in_progress: Vec<u64>,
    /// Items with artifacts across complete batches
    pub items_succeeded: usize,
    /// Failed items across complete batches
    pub items_failed: usize,
}

impl StatusReport {
    /// Build from loaded state
    pub fn from_state(root: PathBuf, state: &RunState) -> Self {
        let (items_succeeded, items_failed) = state
            .records()
            .filter(|(_, r)| r.status == BatchStatus::Complete)
            .fold((0, 0), |(s, f), (_, r)| (s + r.succeeded, f + r.failed));
        Self {
            root,
            batch_size: state.batch_size(),
            last_batch: state.last_batch(),
            complete: state.complete_indices(),
            failed: state.indices_with(BatchStatus::Failed),
            in_progress: state.indices_with(BatchStatus::InProgress),
            items_succeeded,
            items_failed,
        }
    }

    fn format_human(&self) -> String {
        let list = |v: &[u64]| {
            if v.is_empty() {
                "-".to_string()
            } else {
                v.iter().map(u64::to_string).collect::<Vec<_>>().join(", ")
            }
        };
        let opt = |v: Option<u64>| v.map_or_else(|| "unknown".to_string(), |n| n.to_string());

        format!(
            "Output root: {}\n  Batch size: {}\n  Last batch: {}\n  Complete: {}\n  Failed: {}\n  In progress: {}\n  Items: {} succeeded, {} failed\n",
            self.root.display(),
            opt(self.batch_size),
            opt(self.last_batch),
            list(&self.complete),
            list(&self.failed),
            list(&self.in_progress),
            self.items_succeeded,
            self.items_failed,
        )
    }
}

impl StatusCommand {
    /// Print the state of the output root
    pub fn execute(&self, format: OutputFormat) -> Result<StatusReport, CliError> {
        let state = RunState::scan(&self.output)?;
        let report = StatusReport::from_state(self.output.clone(), &state);
        match format {
            OutputFormat::Json => print_json(&report)?,
            OutputFormat::Human => print!("{}", report.format_human()),
        }
        Ok(report)
    }
}
