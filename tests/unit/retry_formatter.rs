use std::time::Duration;

use post_archiver::fetcher::retry_formatter::{RetryContext, RetryErrorType};
use post_archiver::fetcher::FetcherError;

fn context(error: &FetcherError) -> RetryContext {
    RetryContext::new(2, 5, error, Duration::from_secs(4), "page 3")
}

#[test]
fn format_retry_captures_attempt_and_wait() {
    let message = context(&FetcherError::RateLimited { retry_after: None }).format_retry();
    assert!(message.contains("page 3"));
    assert!(message.contains("attempt 3/5"));
    assert!(message.contains("rate limit exceeded"));
    assert!(message.contains("4.0 seconds"));
}

#[test]
fn exhausted_errors_classify_by_last_cause() {
    let err = FetcherError::Exhausted {
        attempts: 5,
        last: Box::new(FetcherError::Server { status: 503 }),
    };
    assert_eq!(RetryErrorType::from_error(&err), RetryErrorType::ServerError(503));
    assert_eq!(RetryErrorType::ServerError(503).description(), "service unavailable");
}

#[test]
fn failure_summary_lists_suggestions() {
    let ctx = context(&FetcherError::Server { status: 502 });
    let failure = ctx.format_failure();
    assert!(failure.starts_with("[FAILED] page 3 failed after 2 attempts"));
    assert!(failure.contains("Suggestions:"));
    assert!(failure.contains("--max-retries (current: 5)"));
}

#[test]
fn auth_failures_do_not_suggest_more_retries() {
    let ctx = context(&FetcherError::Client {
        status: 401,
        message: "rest_not_logged_in".into(),
    });
    assert_eq!(ctx.error_type, RetryErrorType::AuthFailed(401));
    let suggestions = ctx.format_suggestions();
    assert_eq!(suggestions.len(), 1);
    assert!(suggestions[0].contains("application password"));
}

#[test]
fn network_messages_distinguish_offline() {
    let offline = RetryErrorType::from_error(&FetcherError::Network(
        "error trying to connect: dns error".into(),
    ));
    assert_eq!(offline, RetryErrorType::NetworkOffline);
    assert!(offline.is_retryable());
    assert!(!RetryErrorType::MalformedResponse.is_retryable());
}
