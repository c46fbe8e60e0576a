//! CLI error types and conversions

use crate::output::OutputError;
use crate::pipeline::{ConfigError, RunError};
use crate::resume::ResumeError;

/// CLI errors
#[derive(Debug, thiserror::Error)]
pub enum CliError {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Run failed or aborted
    #[error("{0}")]
    Run(#[from] RunError),

    /// Resume state error
    #[error("resume error: {0}")]
    ResumeError(#[from] ResumeError),

    /// Output error
    #[error("output error: {0}")]
    OutputError(#[from] OutputError),

    /// Invalid argument
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Output root failed validation
    #[error("validation failed: {0}")]
    Inconsistent(String),
}
