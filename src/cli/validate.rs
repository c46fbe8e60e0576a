//! `validate` command: completion markers against artifacts on disk

use super::{print_json, CliError, OutputFormat, OUTPUT_ENV};
use crate::output::OutputLayout;
use crate::pipeline::config::DEFAULT_OUTPUT_ROOT;
use crate::resume::{CompletionMarker, RunState};
use clap::Parser;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::{error, info};

/// Arguments of `post-archiver validate`
#[derive(Parser, Debug)]
pub struct ValidateCommand {
    /// Output root directory
    #[arg(long, env = OUTPUT_ENV, default_value = DEFAULT_OUTPUT_ROOT)]
    pub output: PathBuf,
}

/// One inconsistency
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Problem {
    /// Batch index
    pub batch: u64,
    /// Description
    pub detail: String,
}

/// Result of checking an output root
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ValidationReport {
    /// Markers that parsed and matched their artifacts
    pub valid_markers: Vec<u64>,
    /// Batch directories without a marker (will be regenerated)
    pub incomplete: Vec<u64>,
    /// Everything wrong
    pub problems: Vec<Problem>,
}

impl ValidationReport {
    /// Whether nothing is wrong
    pub fn is_consistent(&self) -> bool {
        self.problems.is_empty()
    }
}

/// Check every completion marker under `root`
pub fn validate_output_root(root: &Path) -> Result<ValidationReport, CliError> {
    let layout = OutputLayout::new(root);
    let mut report = ValidationReport::default();

    let manifest_batch_size = if layout.manifest().exists() {
        match RunState::load(&layout.manifest()) {
            Ok(state) => state.batch_size(),
            Err(e) => {
                report.problems.push(Problem {
                    batch: 0,
                    detail: format!("run manifest unreadable: {e}"),
                });
                None
            }
        }
    } else {
        None
    };

    for index in layout.batch_indices()? {
        let marker_path = layout.marker(index);
        if !marker_path.exists() {
            report.incomplete.push(index);
            continue;
        }

        let marker = match CompletionMarker::load(&marker_path) {
            Ok(marker) => marker,
            Err(e) => {
                report.problems.push(Problem {
                    batch: index,
                    detail: format!("marker unreadable: {e}"),
                });
                continue;
            }
        };

        let before = report.problems.len();
        if marker.batch != index {
            report.problems.push(Problem {
                batch: index,
                detail: format!("marker names batch {}", marker.batch),
            });
        }
        if let Some(expected) = manifest_batch_size {
            if marker.batch_size != expected {
                report.problems.push(Problem {
                    batch: index,
                    detail: format!(
                        "marker batch size {} differs from manifest {expected}",
                        marker.batch_size
                    ),
                });
            }
        }
        for missing in marker.missing_artifacts(&layout.batch_dir(index)) {
            report.problems.push(Problem {
                batch: index,
                detail: format!("artifact missing: {missing}"),
            });
        }
        if report.problems.len() == before {
            report.valid_markers.push(index);
        }
    }

    Ok(report)
}

impl ValidateCommand {
    /// Validate the output root; `Err` when anything is inconsistent
    pub fn execute(&self, format: OutputFormat) -> Result<ValidationReport, CliError> {
        let report = validate_output_root(&self.output)?;

        match format {
            OutputFormat::Json => print_json(&report)?,
            OutputFormat::Human => {
                println!(
                    "{} valid marker(s), {} incomplete batch(es), {} problem(s)",
                    report.valid_markers.len(),
                    report.incomplete.len(),
                    report.problems.len()
                );
                for problem in &report.problems {
                    println!("  batch {}: {}", problem.batch, problem.detail);
                }
            }
        }

        if report.is_consistent() {
            info!(root = %self.output.display(), "Output root is consistent");
            Ok(report)
        } else {
            error!(root = %self.output.display(), problems = report.problems.len(), "Output root is inconsistent");
            Err(CliError::Inconsistent(format!(
                "{} problem(s) under {}. Use --resume reset to regenerate.",
                report.problems.len(),
                self.output.display()
            )))
        }
    }
}
