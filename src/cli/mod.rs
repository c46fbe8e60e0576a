//! CLI command implementations

pub mod error;
pub mod run;
pub mod status;
pub mod validate;

pub use error::CliError;
pub use run::RunArgs;
pub use status::StatusCommand;
pub use validate::ValidateCommand;

use clap::{Parser, Subcommand};
use std::str::FromStr;

/// Environment variable for the output root
pub const OUTPUT_ENV: &str = "POST_ARCHIVER_OUTPUT";

/// post-archiver: convert a WordPress site into self-contained documents
#[derive(Parser, Debug)]
#[command(name = "post-archiver", version, about)]
pub struct Cli {
    /// Command to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Output format (json or human)
    #[arg(long, global = true, default_value = "human")]
    pub output_format: OutputFormat,

    /// Resume mode: on, or reset to discard markers and manifest first
    #[arg(long, global = true, default_value = "on")]
    pub resume: ResumeMode,
}

/// CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Fetch posts and write documents batch by batch
    Run(RunArgs),

    /// Show run state for an output root without network access
    Status(StatusCommand),

    /// Check completion markers against the artifacts on disk
    Validate(ValidateCommand),
}

/// Output format options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// JSON output
    Json,
    /// Human-readable output
    Human,
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "json" => Ok(OutputFormat::Json),
            "human" => Ok(OutputFormat::Human),
            _ => Err(format!("Invalid output format: {s}")),
        }
    }
}

/// Resume modes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResumeMode {
    /// Skip batches with completion markers
    On,
    /// Delete markers and manifest, then run from scratch
    Reset,
}

impl FromStr for ResumeMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "on" => Ok(ResumeMode::On),
            "reset" => Ok(ResumeMode::Reset),
            _ => Err(format!("Invalid resume mode: {s}. Valid options: on, reset")),
        }
    }
}

/// Print `value` as pretty JSON
pub(crate) fn print_json<T: serde::Serialize>(value: &T) -> Result<(), CliError> {
    let text = serde_json::to_string_pretty(value)
        .map_err(|e| CliError::InvalidArgument(format!("cannot serialize output: {e}")))?;
    println!("{text}");
    Ok(())
}
