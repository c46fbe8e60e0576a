//! Run configuration
//!
//! Plain values handed in by the CLI (or a library caller). Range checks live
//! here so every entry point fails fast with the same messages.

use crate::fetcher::http::Credentials;
use crate::fetcher::rate_limit::DEFAULT_MAX_REQUESTS;
use crate::fetcher::retry::DEFAULT_MAX_ATTEMPTS;
use crate::media::DEFAULT_MAX_DIMENSION;
use std::path::PathBuf;
use std::time::Duration;
use url::Url;

/// Items per batch
pub const DEFAULT_BATCH_SIZE: u64 = 10;

/// First batch processed when none is given
pub const DEFAULT_START_BATCH: u64 = 5;

/// Concurrent conversions per batch
pub const DEFAULT_MAX_WORKERS: usize = 5;

/// Upper bound on concurrent conversions
pub const MAX_WORKERS: usize = 32;

/// Output root
pub const DEFAULT_OUTPUT_ROOT: &str = "output";

/// Per-request HTTP timeout.
/// 25 seconds tolerates slow WordPress hosts rendering `_embed` responses.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(25);

/// Upper bound on one item's conversion, media included
pub const DEFAULT_ITEM_TIMEOUT: Duration = Duration::from_secs(300);

/// Consecutive batch fetch failures before the run aborts
pub const CONSECUTIVE_FAILURE_LIMIT: u32 = 3;

/// Configuration errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// Batch size must be positive
    #[error("batch size must be greater than 0")]
    InvalidBatchSize,

    /// Worker count outside 1..=MAX_WORKERS
    #[error("max workers must be between 1 and {max}, got {value}")]
    InvalidWorkers {
        /// Requested value
        value: usize,
        /// Allowed maximum
        max: usize,
    },

    /// Base URL missing, unparseable or not http(s)
    #[error("invalid base URL '{url}': {reason}")]
    InvalidBaseUrl {
        /// Value given
        url: String,
        /// What is wrong with it
        reason: String,
    },

    /// A timeout of zero
    #[error("{0} must be greater than 0")]
    ZeroTimeout(&'static str),

    /// Retry budget of zero attempts
    #[error("max retries must be at least 1")]
    InvalidRetries,

    /// Rate limit of zero requests
    #[error("requests per second must be at least 1")]
    InvalidRateLimit,

    /// Output root already holds batches cut with another size
    #[error("output root was built with batch size {recorded}, requested {requested}; use --resume reset or another output directory")]
    BatchSizeMismatch {
        /// Batch size on disk
        recorded: u64,
        /// Batch size of this run
        requested: u64,
    },
}

/// Everything a run needs
#[derive(Debug, Clone)]
pub struct RunConfig {
    /// Site root, e.g. `https://blog.example.com`
    pub base_url: String,
    /// Basic-auth credentials
    pub credentials: Option<Credentials>,
    /// Items per batch
    pub batch_size: u64,
    /// First batch index
    pub start_batch: u64,
    /// Concurrent conversions per batch
    pub max_workers: usize,
    /// Output root directory
    pub output_root: PathBuf,
    /// Per-request HTTP timeout
    pub request_timeout: Duration,
    /// Pause between batches
    pub page_delay: Duration,
    /// Upper bound on one item's conversion
    pub item_timeout: Duration,
    /// Write `errors/{id}_{slug}.html` for failed items
    pub error_documents: bool,
    /// Longest edge of embedded images
    pub max_image_dimension: u32,
    /// Attempts per page request
    pub max_retries: u32,
    /// HTTP requests per second, shared by pages and media
    pub requests_per_second: usize,
    /// Drop markers and manifest before running
    pub reset_state: bool,
}

impl RunConfig {
    /// Defaults for everything except the base URL
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            credentials: None,
            batch_size: DEFAULT_BATCH_SIZE,
            start_batch: DEFAULT_START_BATCH,
            max_workers: DEFAULT_MAX_WORKERS,
            output_root: PathBuf::from(DEFAULT_OUTPUT_ROOT),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            page_delay: Duration::ZERO,
            item_timeout: DEFAULT_ITEM_TIMEOUT,
            error_documents: true,
            max_image_dimension: DEFAULT_MAX_DIMENSION,
            max_retries: DEFAULT_MAX_ATTEMPTS,
            requests_per_second: DEFAULT_MAX_REQUESTS,
            reset_state: false,
        }
    }

    /// Set the batch size
    pub fn with_batch_size(mut self, batch_size: u64) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Set the first batch index
    pub fn with_start_batch(mut self, start_batch: u64) -> Self {
        self.start_batch = start_batch;
        self
    }

    /// Set the worker count
    pub fn with_max_workers(mut self, max_workers: usize) -> Self {
        self.max_workers = max_workers;
        self
    }

    /// Set the output root
    pub fn with_output_root(mut self, output_root: impl Into<PathBuf>) -> Self {
        self.output_root = output_root.into();
        self
    }

    /// Set credentials
    pub fn with_credentials(mut self, credentials: Option<Credentials>) -> Self {
        self.credentials = credentials;
        self
    }

    /// Set the per-item timeout
    pub fn with_item_timeout(mut self, item_timeout: Duration) -> Self {
        self.item_timeout = item_timeout;
        self
    }

    /// Enable or disable error documents
    pub fn with_error_documents(mut self, enabled: bool) -> Self {
        self.error_documents = enabled;
        self
    }

    /// Check every range; called before anything touches disk or network
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.batch_size == 0 {
            return Err(ConfigError::InvalidBatchSize);
        }
        if self.max_workers == 0 || self.max_workers > MAX_WORKERS {
            return Err(ConfigError::InvalidWorkers {
                value: self.max_workers,
                max: MAX_WORKERS,
            });
        }
        self.parsed_base_url()?;
        if self.request_timeout.is_zero() {
            return Err(ConfigError::ZeroTimeout("request timeout"));
        }
        if self.item_timeout.is_zero() {
            return Err(ConfigError::ZeroTimeout("item timeout"));
        }
        if self.max_retries == 0 {
            return Err(ConfigError::InvalidRetries);
        }
        if self.requests_per_second == 0 {
            return Err(ConfigError::InvalidRateLimit);
        }
        Ok(())
    }

    /// Base URL as a parsed http(s) URL
    pub fn parsed_base_url(&self) -> Result<Url, ConfigError> {
        let invalid = |reason: String| ConfigError::InvalidBaseUrl {
            url: self.base_url.clone(),
            reason,
        };

        let trimmed = self.base_url.trim();
        if trimmed.is_empty() {
            return Err(invalid("base URL is required".to_string()));
        }
        let url = Url::parse(trimmed).map_err(|e| invalid(e.to_string()))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(invalid(format!("unsupported scheme '{}'", url.scheme())));
        }
        if url.host_str().is_none() {
            return Err(invalid("missing host".to_string()));
        }
        Ok(url)
    }
}
