//! Retry message formatting.
//!
//! Every retry is logged with the attempt counter and the reason; the final
//! failure carries a short list of remediation hints.

use super::FetcherError;
use std::time::Duration;

/// Classification of retry errors for user messaging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryErrorType {
    /// Request timed out
    NetworkTimeout,
    /// Connection refused, DNS failure, or other offline scenarios
    NetworkOffline,
    /// HTTP 429 rate limit exceeded
    RateLimit,
    /// HTTP 5xx server error
    ServerError(u16),
    /// HTTP 400, including out-of-range page numbers
    InvalidRequest,
    /// Authentication failures (401/403)
    AuthFailed(u16),
    /// Other client errors (4xx, except 429)
    ClientError(u16),
    /// Response body was not what the item model expects
    MalformedResponse,
    /// Generic fallback when no better classification fits
    NetworkGeneric,
}

impl RetryErrorType {
    /// Classify a fetcher error
    pub fn from_error(err: &FetcherError) -> Self {
        match err {
            FetcherError::Timeout(_) => Self::NetworkTimeout,
            FetcherError::Network(msg) => {
                let lower = msg.to_lowercase();
                if lower.contains("dns") || lower.contains("connect") {
                    Self::NetworkOffline
                } else {
                    Self::NetworkGeneric
                }
            }
            FetcherError::RateLimited { .. } => Self::RateLimit,
            FetcherError::Server { status } => Self::ServerError(*status),
            FetcherError::Client { status, .. } => match status {
                400 => Self::InvalidRequest,
                401 | 403 => Self::AuthFailed(*status),
                other => Self::ClientError(*other),
            },
            FetcherError::Parse(_) | FetcherError::InvalidResponse(_) => Self::MalformedResponse,
            FetcherError::Exhausted { last, .. } => Self::from_error(last),
            FetcherError::Cancelled => Self::NetworkGeneric,
        }
    }

    /// User-friendly description string used inside retry log messages.
    pub fn description(&self) -> &'static str {
        match self {
            Self::NetworkTimeout => "network timeout",
            Self::NetworkOffline => "connection failed",
            Self::RateLimit => "rate limit exceeded",
            Self::ServerError(code) => match code {
                500 => "internal server error",
                502 => "bad gateway",
                503 => "service unavailable",
                504 => "gateway timeout",
                _ => "server error",
            },
            Self::InvalidRequest => "invalid request",
            Self::AuthFailed(code) => match code {
                401 => "authentication failed (401)",
                403 => "authentication failed (403)",
                _ => "authentication failed",
            },
            Self::ClientError(code) => match code {
                404 => "resource not found",
                410 => "resource gone",
                _ => "client error",
            },
            Self::MalformedResponse => "malformed response",
            Self::NetworkGeneric => "network error",
        }
    }

    /// Suggested remediation presented after the final failure.
    pub fn suggestion(&self) -> &'static str {
        match self {
            Self::NetworkTimeout => "Check your network connection; the site may be slow to respond",
            Self::NetworkOffline => "Verify the base URL, internet connectivity and DNS resolution",
            Self::RateLimit => "Lower --max-workers or add --page-delay-ms between batches",
            Self::ServerError(_) => "The site may be under load, try again later",
            Self::InvalidRequest => "Check --batch-size and --start-batch against the collection size",
            Self::AuthFailed(_) => "Verify the username and application password",
            Self::ClientError(_) => "Check that the REST API is enabled on the site",
            Self::MalformedResponse => "Check that the base URL points at a WordPress site",
            Self::NetworkGeneric => "Check network connectivity and try again",
        }
    }

    /// Whether the error type is typically retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::NetworkTimeout
                | Self::NetworkOffline
                | Self::RateLimit
                | Self::ServerError(_)
                | Self::NetworkGeneric
        )
    }
}

/// Context for formatting retry messages.
#[derive(Debug, Clone)]
pub struct RetryContext {
    /// Current attempt number (1-based)
    pub attempt: u32,
    /// Maximum number of attempts configured
    pub max_attempts: u32,
    /// Type of error that triggered the retry
    pub error_type: RetryErrorType,
    /// Backoff duration until the next attempt
    pub backoff_duration: Duration,
    /// What was being fetched (e.g. "page 3" or a media URL)
    pub operation: String,
    /// Original error message
    pub error_message: String,
}

impl RetryContext {
    /// Build a context from the error that triggered it
    pub fn new(
        attempt: u32,
        max_attempts: u32,
        error: &FetcherError,
        backoff_duration: Duration,
        operation: impl Into<String>,
    ) -> Self {
        Self {
            attempt,
            max_attempts,
            error_type: RetryErrorType::from_error(error),
            backoff_duration,
            operation: operation.into(),
            error_message: error.to_string(),
        }
    }

    /// Standardized retry message with attempt counter.
    pub fn format_retry(&self) -> String {
        format!(
            "Retrying {} (attempt {}/{}) after {} - waiting {:.1} seconds...",
            self.operation,
            self.attempt + 1,
            self.max_attempts,
            self.error_type.description(),
            self.backoff_duration.as_secs_f64()
        )
    }

    /// Final failure summary with actionable suggestions.
    pub fn format_failure(&self) -> String {
        let mut lines = vec![
            format!(
                "[FAILED] {} failed after {} attempts",
                self.operation, self.attempt
            ),
            format!("  Last error: {}", self.error_message),
            "  Suggestions:".to_string(),
        ];
        for suggestion in self.format_suggestions() {
            lines.push(format!("    - {suggestion}"));
        }
        lines.join("\n")
    }

    /// Suggestions tailored to the current context.
    pub fn format_suggestions(&self) -> Vec<String> {
        let mut suggestions = vec![self.error_type.suggestion().to_string()];
        if self.error_type.is_retryable() {
            suggestions.push(format!(
                "Try increasing --max-retries (current: {})",
                self.max_attempts
            ));
        }
        suggestions
    }
}
