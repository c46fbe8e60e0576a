//! Media resolution
//!
//! [`MediaResolver`] turns a media reference into an [`Arc<MediaAsset>`]. It
//! never fails: unreachable or undecodable media become `Failed` assets that
//! the renderer omits.
//!
//! Each resolver holds one run's cache. Concurrent first requests for the same
//! normalized URL share a single `OnceCell`, so the URL is fetched once no
//! matter how many workers ask for it.

use async_trait::async_trait;
use bytes::Bytes;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};
use url::Url;

use crate::fetcher::http::HttpClient;
use crate::fetcher::{FetcherError, FetcherResult, RetryPolicy};
use crate::metrics;
use crate::shutdown::SharedShutdown;
use crate::MediaAsset;

pub mod image;

pub use self::image::{normalize_image, MediaError, DEFAULT_MAX_DIMENSION};

/// WordPress thumbnail suffix, e.g. `photo-300x200.jpg`
static THUMBNAIL_SUFFIX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"-\d+x\d+(\.[^./]+)$").expect("hardcoded pattern is valid"));

/// Network seam for media bytes.
///
/// One call is one attempt; the resolver applies the retry policy around it.
#[async_trait]
pub trait MediaFetcher: Send + Sync {
    /// Fetch `url`, returning the body and the response content type
    async fn fetch(&self, url: &str) -> FetcherResult<(Bytes, Option<String>)>;
}

#[async_trait]
impl MediaFetcher for HttpClient {
    async fn fetch(&self, url: &str) -> FetcherResult<(Bytes, Option<String>)> {
        self.get_bytes_once(url, 1).await
    }
}

type Slot = Arc<OnceCell<Arc<MediaAsset>>>;

/// Per-run media cache with single-flight resolution
pub struct MediaResolver {
    fetcher: Arc<dyn MediaFetcher>,
    base_url: Option<Url>,
    policy: RetryPolicy,
    max_dimension: u32,
    shutdown: Option<SharedShutdown>,
    cache: Mutex<HashMap<String, Slot>>,
    fetch_count: AtomicU64,
}

impl MediaResolver {
    /// Resolver over `fetcher` with the media retry policy
    pub fn new(fetcher: Arc<dyn MediaFetcher>) -> Self {
        Self {
            fetcher,
            base_url: None,
            policy: RetryPolicy::media(),
            max_dimension: DEFAULT_MAX_DIMENSION,
            shutdown: None,
            cache: Mutex::new(HashMap::new()),
            fetch_count: AtomicU64::new(0),
        }
    }

    /// Base URL for relative references
    pub fn with_base_url(mut self, base_url: Option<Url>) -> Self {
        self.base_url = base_url;
        self
    }

    /// Replace the retry policy
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Longest edge of normalized images
    pub fn with_max_dimension(mut self, max_dimension: u32) -> Self {
        self.max_dimension = max_dimension.max(1);
        self
    }

    /// Interrupt retry backoff on shutdown
    pub fn with_shutdown(mut self, shutdown: Option<SharedShutdown>) -> Self {
        self.shutdown = shutdown;
        self
    }

    /// URLs resolved over the network so far (cache misses)
    pub fn fetch_count(&self) -> u64 {
        self.fetch_count.load(Ordering::SeqCst)
    }

    /// Distinct URLs in the cache
    pub fn cached_urls(&self) -> usize {
        self.cache.lock().map(|c| c.len()).unwrap_or(0)
    }

    /// Resolve one reference. Never fails; see [`MediaAsset::outcome`].
    pub async fn resolve(&self, reference: &str) -> Arc<MediaAsset> {
        let url = match normalize_url(reference, self.base_url.as_ref()) {
            Ok(url) => url,
            Err(reason) => {
                debug!(reference, %reason, "Skipping media reference");
                metrics::record_media_fetch("skipped");
                return Arc::new(MediaAsset::skipped(reference.trim(), reason));
            }
        };
        let key = url.to_string();

        let slot = match self.slot(&key) {
            Ok(slot) => slot,
            Err(reason) => return Arc::new(MediaAsset::failed(key, reason)),
        };

        if slot.initialized() {
            metrics::record_media_cache_hit();
        }

        slot.get_or_init(|| async {
            self.fetch_count.fetch_add(1, Ordering::SeqCst);
            let asset = self.fetch_and_normalize(&url).await;
            metrics::record_media_fetch(if asset.is_success() { "success" } else { "failed" });
            Arc::new(asset)
        })
        .await
        .clone()
    }

    fn slot(&self, key: &str) -> Result<Slot, String> {
        let mut cache = self
            .cache
            .lock()
            .map_err(|_| "media cache lock poisoned".to_string())?;
        Ok(cache
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(OnceCell::new()))
            .clone())
    }

    /// Full-size original first, then the referenced URL
    async fn fetch_and_normalize(&self, url: &Url) -> MediaAsset {
        let key = url.to_string();
        let mut candidates = Vec::with_capacity(2);
        if let Some(full) = full_size_url(url) {
            candidates.push(full);
        }
        candidates.push(url.clone());

        let mut last_error = String::new();
        for candidate in &candidates {
            let candidate_str = candidate.as_str();
            let fetched = self
                .policy
                .run(candidate_str, self.shutdown.as_ref(), |_| {
                    self.fetcher.fetch(candidate_str)
                })
                .await;

            let body = match fetched {
                Ok((body, _content_type)) => body,
                Err(FetcherError::Cancelled) => {
                    return MediaAsset::failed(key, FetcherError::Cancelled.to_string());
                }
                Err(e) => {
                    if candidates.len() > 1 && candidate != url {
                        warn!(url = candidate_str, error = %e, "Full-size image unavailable, trying referenced URL");
                    }
                    last_error = e.to_string();
                    continue;
                }
            };

            let max_dimension = self.max_dimension;
            let normalized =
                tokio::task::spawn_blocking(move || normalize_image(&body, max_dimension)).await;

            match normalized {
                Ok(Ok(bytes)) => {
                    info!(url = candidate_str, bytes = bytes.len(), "Resolved media");
                    return MediaAsset::success(key, bytes, image::NORMALIZED_CONTENT_TYPE);
                }
                Ok(Err(e)) => last_error = e.to_string(),
                Err(e) => last_error = format!("image task failed: {e}"),
            }
        }

        warn!(url = %key, error = %last_error, "Media resolution failed");
        MediaAsset::failed(key, last_error)
    }
}

/// Cache key for a media reference.
///
/// Relative references resolve against `base`; the fragment is dropped. `url`
/// already lowercases scheme and host. Non-http(s) references are errors
/// carrying the skip reason.
pub fn normalize_url(reference: &str, base: Option<&Url>) -> Result<Url, String> {
    let reference = reference.trim();
    if reference.is_empty() {
        return Err("empty reference".to_string());
    }
    if reference.starts_with("data:") {
        return Err("inline data URI".to_string());
    }

    let mut url = match Url::parse(reference) {
        Ok(url) => url,
        Err(url::ParseError::RelativeUrlWithoutBase) => match base {
            Some(base) => base
                .join(reference)
                .map_err(|e| format!("cannot resolve '{reference}': {e}"))?,
            None => return Err(format!("relative reference '{reference}' without base URL")),
        },
        Err(e) => return Err(format!("invalid URL '{reference}': {e}")),
    };

    if !matches!(url.scheme(), "http" | "https") {
        return Err(format!("unsupported scheme '{}'", url.scheme()));
    }
    url.set_fragment(None);
    Ok(url)
}

/// The URL with a WordPress `-{w}x{h}` thumbnail suffix removed, if it has one
pub fn full_size_url(url: &Url) -> Option<Url> {
    let path = url.path();
    if !THUMBNAIL_SUFFIX.is_match(path) {
        return None;
    }
    let full_path = THUMBNAIL_SUFFIX.replace(path, "$1").into_owned();
    let mut full = url.clone();
    full.set_path(&full_path);
    Some(full)
}
