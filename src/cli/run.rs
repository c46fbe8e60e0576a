//! `run` command

use super::{print_json, Cli, CliError, OutputFormat, ResumeMode, OUTPUT_ENV};
use crate::fetcher::http::Credentials;
use crate::fetcher::retry::DEFAULT_MAX_ATTEMPTS;
use crate::metrics;
use crate::pipeline::config::{DEFAULT_BATCH_SIZE, DEFAULT_MAX_WORKERS, DEFAULT_OUTPUT_ROOT, DEFAULT_START_BATCH};
use crate::pipeline::{RunConfig, RunOrchestrator, RunSummary, MAX_WORKERS};
use crate::shutdown::SharedShutdown;
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, warn};

/// Parse and validate the worker count
fn parse_workers(s: &str) -> Result<usize, String> {
    let value: usize = s
        .parse()
        .map_err(|_| format!("'{s}' is not a valid number"))?;

    if value == 0 {
        return Err("max workers must be at least 1".to_string());
    }
    if value > MAX_WORKERS {
        return Err(format!("max workers {value} exceeds maximum of {MAX_WORKERS}"));
    }
    Ok(value)
}

/// Arguments of `post-archiver run`
#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Site root, e.g. https://blog.example.com
    #[arg(long, env = "POST_ARCHIVER_BASE_URL")]
    pub base_url: String,

    /// Account name for basic auth
    #[arg(long, env = "POST_ARCHIVER_USERNAME")]
    pub username: Option<String>,

    /// Application password for basic auth
    #[arg(long, env = "POST_ARCHIVER_PASSWORD", hide_env_values = true)]
    pub password: Option<String>,

    /// Items per batch
    #[arg(long, default_value_t = DEFAULT_BATCH_SIZE)]
    pub batch_size: u64,

    /// First batch to process
    #[arg(long, default_value_t = DEFAULT_START_BATCH)]
    pub start_batch: u64,

    /// Concurrent conversions per batch (max 32)
    #[arg(long, default_value_t = DEFAULT_MAX_WORKERS, value_parser = parse_workers)]
    pub max_workers: usize,

    /// Output root directory
    #[arg(long, env = OUTPUT_ENV, default_value = DEFAULT_OUTPUT_ROOT)]
    pub output: PathBuf,

    /// Attempts per page request (1-20)
    #[arg(long, default_value_t = DEFAULT_MAX_ATTEMPTS, value_parser = clap::value_parser!(u32).range(1..=20))]
    pub max_retries: u32,

    /// Pause between batches, in milliseconds
    #[arg(long, default_value_t = 0)]
    pub page_delay_ms: u64,

    /// Do not write error documents for failed items
    #[arg(long, default_value_t = false)]
    pub no_error_documents: bool,

    /// Serve Prometheus metrics on this address
    #[arg(long)]
    pub metrics_addr: Option<SocketAddr>,
}

impl RunArgs {
    /// Run configuration from the arguments
    pub fn to_config(&self, resume: ResumeMode) -> Result<RunConfig, CliError> {
        let credentials = match (&self.username, &self.password) {
            (Some(username), Some(password)) => Some(Credentials {
                username: username.clone(),
                password: password.clone(),
            }),
            (None, None) => None,
            _ => {
                return Err(CliError::InvalidArgument(
                    "--username and --password must be given together".to_string(),
                ))
            }
        };

        let mut config = RunConfig::new(self.base_url.clone())
            .with_batch_size(self.batch_size)
            .with_start_batch(self.start_batch)
            .with_max_workers(self.max_workers)
            .with_output_root(self.output.clone())
            .with_credentials(credentials)
            .with_error_documents(!self.no_error_documents);
        config.max_retries = self.max_retries;
        config.page_delay = Duration::from_millis(self.page_delay_ms);
        config.reset_state = resume == ResumeMode::Reset;

        config.validate()?;
        Ok(config)
    }

    /// Execute the run; `Err` when it did not finish
    pub async fn execute(&self, cli: &Cli, shutdown: SharedShutdown) -> Result<RunSummary, CliError> {
        let config = self.to_config(cli.resume)?;

        if let Some(addr) = self.metrics_addr {
            if let Err(e) = metrics::init_metrics(addr).await {
                warn!(%addr, error = %e, "Metrics exporter not started");
            }
        }

        info!(
            base_url = %config.base_url,
            output = %config.output_root.display(),
            "Starting run"
        );
        let summary = RunOrchestrator::from_config_with_shutdown(config, Some(shutdown))?
            .with_progress_bar(cli.output_format == OutputFormat::Human)
            .run()
            .await?;

        match cli.output_format {
            OutputFormat::Json => print_json(&summary)?,
            OutputFormat::Human => print!("{}", summary.format_human()),
        }

        summary.ensure_finished()?;
        Ok(summary)
    }
}
