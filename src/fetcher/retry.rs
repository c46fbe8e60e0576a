//! Retry policy with exponential backoff and jitter
//!
//! One [`RetryPolicy`] value describes how a class of requests is retried. The
//! transport and the media resolver each hold their own policy and apply it
//! through [`RetryPolicy::run`].

use super::retry_formatter::RetryContext;
use super::{FetcherError, FetcherResult};
use crate::metrics;
use crate::shutdown::{self, SharedShutdown};
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Default attempts for page requests (first try included).
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// Initial backoff delay in milliseconds.
pub const INITIAL_BACKOFF_MS: u64 = 1000;

/// Maximum backoff delay in milliseconds.
pub const MAX_BACKOFF_MS: u64 = 30_000;

/// Attempts for media downloads.
pub const MEDIA_MAX_ATTEMPTS: u32 = 3;

/// Initial media backoff in milliseconds.
pub const MEDIA_BACKOFF_MS: u64 = 2000;

/// Maximum media backoff in milliseconds.
pub const MEDIA_MAX_BACKOFF_MS: u64 = 10_000;

/// Upper bound on a server `Retry-After` hint.
pub const MAX_RETRY_AFTER: Duration = Duration::from_secs(300);

/// Default jitter fraction added on top of each delay.
pub const DEFAULT_JITTER: f64 = 0.2;

/// Whether an error is worth retrying
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Retry with backoff
    Transient,
    /// Give up immediately
    Permanent,
}

/// Classifier used when no custom one is installed
pub fn default_classifier(err: &FetcherError) -> ErrorClass {
    if err.is_transient() {
        ErrorClass::Transient
    } else {
        ErrorClass::Permanent
    }
}

/// Explicit retry policy
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_delay: Duration,
    max_delay: Duration,
    jitter: f64,
    classifier: fn(&FetcherError) -> ErrorClass,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(
            DEFAULT_MAX_ATTEMPTS,
            Duration::from_millis(INITIAL_BACKOFF_MS),
            Duration::from_millis(MAX_BACKOFF_MS),
        )
    }
}

impl RetryPolicy {
    /// Policy with the default classifier and jitter
    pub fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            max_delay,
            jitter: DEFAULT_JITTER,
            classifier: default_classifier,
        }
    }

    /// Policy tuned for media downloads
    pub fn media() -> Self {
        Self::new(
            MEDIA_MAX_ATTEMPTS,
            Duration::from_millis(MEDIA_BACKOFF_MS),
            Duration::from_millis(MEDIA_MAX_BACKOFF_MS),
        )
    }

    /// Override the attempt budget (first try included)
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    /// Override the jitter fraction (0.0 disables jitter)
    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter.clamp(0.0, 1.0);
        self
    }

    /// Install a custom classifier
    pub fn with_classifier(mut self, classifier: fn(&FetcherError) -> ErrorClass) -> Self {
        self.classifier = classifier;
        self
    }

    /// Attempt budget
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Classify an error with this policy's classifier
    pub fn classify(&self, err: &FetcherError) -> ErrorClass {
        (self.classifier)(err)
    }

    /// Exponential delay before retry number `attempt` (1-based), without jitter
    pub fn base_delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(20);
        let delay = self.base_delay.saturating_mul(1u32 << exponent);
        delay.min(self.max_delay)
    }

    /// Delay before retrying after `err` on attempt `attempt`
    pub fn delay_for(&self, attempt: u32, err: &FetcherError) -> Duration {
        let mut delay = self.base_delay_for(attempt);

        if self.jitter > 0.0 && !delay.is_zero() {
            let factor = rand::thread_rng().gen_range(0.0..=self.jitter);
            delay = (delay + delay.mul_f64(factor)).min(self.max_delay);
        }

        if let FetcherError::RateLimited {
            retry_after: Some(hint),
        } = err
        {
            delay = delay.max((*hint).min(MAX_RETRY_AFTER));
        }

        delay
    }

    /// Run `op` until it succeeds, fails permanently, or the budget runs out.
    ///
    /// `op` receives the 1-based attempt number. Backoff sleeps end early when
    /// shutdown is requested, yielding [`FetcherError::Cancelled`].
    pub async fn run<T, F, Fut>(
        &self,
        operation: &str,
        shutdown: Option<&SharedShutdown>,
        mut op: F,
    ) -> FetcherResult<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = FetcherResult<T>>,
    {
        let mut attempt = 1;

        loop {
            if shutdown::is_requested(shutdown) {
                return Err(FetcherError::Cancelled);
            }

            let err = match op(attempt).await {
                Ok(value) => {
                    if attempt > 1 {
                        info!(
                            operation,
                            attempt,
                            "{} succeeded on attempt {}/{}",
                            operation,
                            attempt,
                            self.max_attempts
                        );
                    }
                    return Ok(value);
                }
                Err(err) => err,
            };

            if self.classify(&err) == ErrorClass::Permanent {
                debug!(operation, attempt, error = %err, "Permanent failure, not retrying");
                return Err(err);
            }

            if attempt >= self.max_attempts {
                let ctx = RetryContext::new(attempt, self.max_attempts, &err, Duration::ZERO, operation);
                warn!("{}", ctx.format_failure());
                return Err(FetcherError::Exhausted {
                    attempts: attempt,
                    last: Box::new(err),
                });
            }

            let delay = self.delay_for(attempt, &err);
            let ctx = RetryContext::new(attempt, self.max_attempts, &err, delay, operation);
            warn!(
                operation,
                attempt,
                max_attempts = self.max_attempts,
                backoff_ms = delay.as_millis() as u64,
                error = %err,
                "{}",
                ctx.format_retry()
            );
            metrics::record_retry_backoff(delay, attempt);

            match shutdown {
                Some(handle) => {
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = handle.wait_for_shutdown() => return Err(FetcherError::Cancelled),
                    }
                }
                None => tokio::time::sleep(delay).await,
            }

            attempt += 1;
        }
    }
}
