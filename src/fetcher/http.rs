//! HTTP client shared by the content source and the media resolver
//!
//! Every request goes through the rate limiter and the client's
//! [`RetryPolicy`]. Status handling:
//! - 2xx: success
//! - 429: transient, honoring `Retry-After`
//! - 5xx: transient
//! - other 4xx: permanent

use bytes::Bytes;
use reqwest::header::{HeaderMap, ACCEPT, CONTENT_TYPE, RETRY_AFTER};
use reqwest::{Client, Response};
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

use super::rate_limit::RateLimiter;
use super::retry::RetryPolicy;
use super::{FetcherError, FetcherResult};
use crate::metrics;
use crate::shutdown::SharedShutdown;

/// User agent sent with every request.
pub const USER_AGENT: &str = concat!("post-archiver/", env!("CARGO_PKG_VERSION"));

/// Connect timeout for new connections.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Longest response body excerpt kept in client errors.
const ERROR_BODY_LIMIT: usize = 512;

/// Basic-auth credentials (WordPress application passwords)
#[derive(Clone)]
pub struct Credentials {
    /// Account name
    pub username: String,
    /// Application password
    pub password: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

/// Build the underlying reqwest client
pub fn build_client(request_timeout: Duration) -> FetcherResult<Client> {
    Client::builder()
        .user_agent(USER_AGENT)
        .connect_timeout(CONNECT_TIMEOUT)
        .timeout(request_timeout)
        .build()
        .map_err(|e| FetcherError::Network(format!("Failed to build HTTP client: {e}")))
}

/// Rate-limited, retrying HTTP client
#[derive(Clone)]
pub struct HttpClient {
    client: Client,
    base_url: String,
    credentials: Option<Credentials>,
    rate_limiter: Arc<RateLimiter>,
    policy: RetryPolicy,
    shutdown: Option<SharedShutdown>,
}

impl HttpClient {
    /// Create a client rooted at `base_url`
    ///
    /// # Arguments
    /// * `client` - reqwest client (cheap to clone, pools connections)
    /// * `base_url` - Site root, e.g. "<https://blog.example.com>"
    /// * `rate_limiter` - Limiter shared with sibling clients
    pub fn new(client: Client, base_url: impl Into<String>, rate_limiter: Arc<RateLimiter>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self {
            client,
            base_url,
            credentials: None,
            rate_limiter,
            policy: RetryPolicy::default(),
            shutdown: None,
        }
    }

    /// Attach basic-auth credentials
    pub fn with_credentials(mut self, credentials: Option<Credentials>) -> Self {
        self.credentials = credentials;
        self
    }

    /// Replace the retry policy
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Attach a shutdown handle so backoff sleeps can be interrupted
    pub fn with_shutdown(mut self, shutdown: Option<SharedShutdown>) -> Self {
        self.shutdown = shutdown;
        self
    }

    /// Site root
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// GET `{base_url}{endpoint}` and decode JSON, returning the response headers too
    pub async fn get_json<T>(
        &self,
        endpoint: &str,
        params: &[(&str, String)],
    ) -> FetcherResult<(T, HeaderMap)>
    where
        T: DeserializeOwned,
    {
        let url = format!("{}{}", self.base_url, endpoint);
        let operation = describe_request(endpoint, params);

        self.policy
            .run(&operation, self.shutdown.as_ref(), |attempt| {
                let url = url.clone();
                async move {
                    let response = self.send_once(&url, params, true, attempt).await?;
                    let headers = response.headers().clone();
                    let data = response
                        .json::<T>()
                        .await
                        .map_err(|e| FetcherError::Parse(format!("Failed to deserialize response: {e}")))?;
                    Ok((data, headers))
                }
            })
            .await
    }

    /// GET an absolute URL and return the body bytes and content type
    pub async fn get_bytes(&self, url: &str) -> FetcherResult<(Bytes, Option<String>)> {
        self.policy
            .run(url, self.shutdown.as_ref(), |attempt| self.get_bytes_once(url, attempt))
            .await
    }

    /// Single GET of an absolute URL without retrying; callers own the retry policy
    pub async fn get_bytes_once(
        &self,
        url: &str,
        attempt: u32,
    ) -> FetcherResult<(Bytes, Option<String>)> {
        let response = self.send_once(url, &[], false, attempt).await?;
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.to_string());
        let body = response.bytes().await.map_err(|e| FetcherError::from_reqwest(&e))?;
        Ok((body, content_type))
    }

    /// One attempt: rate limit, send, classify the status
    async fn send_once(
        &self,
        url: &str,
        params: &[(&str, String)],
        json: bool,
        attempt: u32,
    ) -> FetcherResult<Response> {
        self.rate_limiter
            .acquire()
            .await
            .map_err(|e| FetcherError::Network(e.to_string()))?;

        let mut request = self.client.get(url);
        if !params.is_empty() {
            request = request.query(params);
        }
        if json {
            request = request.header(ACCEPT, "application/json");
        }
        if let Some(creds) = &self.credentials {
            request = request.basic_auth(&creds.username, Some(&creds.password));
        }

        debug!(url, attempt, params = params.len(), "Sending GET request");
        let started = Instant::now();

        let response = match request.send().await {
            Ok(resp) => resp,
            Err(e) => {
                metrics::record_http_request(0, started.elapsed());
                return Err(FetcherError::from_reqwest(&e));
            }
        };

        let status = response.status();
        metrics::record_http_request(status.as_u16(), started.elapsed());

        if status.is_success() {
            return Ok(response);
        }

        let retry_after = parse_retry_after(response.headers());
        let body = response.text().await.unwrap_or_default();
        let excerpt: String = body.chars().take(ERROR_BODY_LIMIT).collect();
        Err(FetcherError::from_status(status.as_u16(), excerpt, retry_after))
    }
}

/// Parse a `Retry-After` header given in seconds
pub fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    let value = headers.get(RETRY_AFTER)?.to_str().ok()?;
    value.trim().parse::<u64>().ok().map(Duration::from_secs)
}

/// Parse a numeric response header such as `X-WP-TotalPages`
pub fn parse_count_header(headers: &HeaderMap, name: &str) -> Option<u64> {
    headers.get(name)?.to_str().ok()?.trim().parse().ok()
}

fn describe_request(endpoint: &str, params: &[(&str, String)]) -> String {
    match params.iter().find(|(k, _)| *k == "page") {
        Some((_, page)) => format!("{endpoint} page {page}"),
        None => endpoint.to_string(),
    }
}
