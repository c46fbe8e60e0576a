//! Content fetching
//!
//! The transport layer turns a paginated remote API into a lazy, finite
//! sequence of validated [`ItemDescriptor`]s. Records that fail validation
//! travel alongside as [`RejectedItem`]s so each is reported against its own id.
//!
//! - [`ContentSource`] - one page per call, the seam test doubles implement
//! - [`wordpress::WordPressSource`] - `wp/v2/posts` implementation
//! - [`http::HttpClient`] - reqwest wrapper applying rate limiting and the retry policy
//! - [`retry::RetryPolicy`] - explicit backoff policy shared with the media resolver
//! - [`pagination::ItemCursor`] - page-aligned cursor and item stream

use crate::{ItemDescriptor, RejectedItem};
use async_trait::async_trait;
use std::time::Duration;

pub mod http;
pub mod pagination;
pub mod rate_limit;
pub mod retry;
pub mod retry_formatter;
pub mod wordpress;

pub use pagination::{stream_items, ItemCursor, ItemStream};
pub use retry::{ErrorClass, RetryPolicy};

/// Fetcher errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum FetcherError {
    /// Request timed out
    #[error("request timed out: {0}")]
    Timeout(String),

    /// Connection-level failure
    #[error("network error: {0}")]
    Network(String),

    /// Explicit rate-limit response (HTTP 429)
    #[error("rate limit exceeded")]
    RateLimited {
        /// Server-provided `Retry-After` hint
        retry_after: Option<Duration>,
    },

    /// HTTP 5xx
    #[error("server error: HTTP {status}")]
    Server {
        /// Status code
        status: u16,
    },

    /// HTTP 4xx other than 429
    #[error("client error: HTTP {status}: {message}")]
    Client {
        /// Status code
        status: u16,
        /// Response body excerpt
        message: String,
    },

    /// Response body could not be decoded
    #[error("parse error: {0}")]
    Parse(String),

    /// Response decoded but violates the item model
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// Transient failures outlived the retry budget
    #[error("gave up after {attempts} attempts: {last}")]
    Exhausted {
        /// Attempts made
        attempts: u32,
        /// Final error
        last: Box<FetcherError>,
    },

    /// Shutdown requested while waiting to retry
    #[error("cancelled by shutdown request")]
    Cancelled,
}

impl FetcherError {
    /// Whether retrying may succeed
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            FetcherError::Timeout(_)
                | FetcherError::Network(_)
                | FetcherError::RateLimited { .. }
                | FetcherError::Server { .. }
        )
    }

    /// HTTP status carried by the error, if any
    pub fn status(&self) -> Option<u16> {
        match self {
            FetcherError::RateLimited { .. } => Some(429),
            FetcherError::Server { status } | FetcherError::Client { status, .. } => Some(*status),
            FetcherError::Exhausted { last, .. } => last.status(),
            _ => None,
        }
    }

    /// Map a reqwest transport error
    pub fn from_reqwest(err: &reqwest::Error) -> Self {
        if err.is_timeout() {
            FetcherError::Timeout(err.to_string())
        } else if err.is_decode() {
            FetcherError::Parse(err.to_string())
        } else if let Some(status) = err.status() {
            FetcherError::from_status(status.as_u16(), err.to_string(), None)
        } else {
            FetcherError::Network(err.to_string())
        }
    }

    /// Map a non-success HTTP status
    pub fn from_status(status: u16, message: String, retry_after: Option<Duration>) -> Self {
        match status {
            429 => FetcherError::RateLimited { retry_after },
            500..=599 => FetcherError::Server { status },
            _ => FetcherError::Client { status, message },
        }
    }
}

/// Result type for fetcher operations
pub type FetcherResult<T> = Result<T, FetcherError>;

/// One record of a page
#[derive(Debug, Clone, PartialEq)]
pub enum PageEntry {
    /// Validated item
    Item(ItemDescriptor),
    /// Record that failed validation
    Rejected(RejectedItem),
}

impl PageEntry {
    /// Source identifier of the record
    pub fn id(&self) -> u64 {
        match self {
            PageEntry::Item(item) => item.id,
            PageEntry::Rejected(record) => record.id,
        }
    }

    /// The item, unless the record was rejected
    pub fn as_item(&self) -> Option<&ItemDescriptor> {
        match self {
            PageEntry::Item(item) => Some(item),
            PageEntry::Rejected(_) => None,
        }
    }
}

impl From<ItemDescriptor> for PageEntry {
    fn from(item: ItemDescriptor) -> Self {
        PageEntry::Item(item)
    }
}

/// One page of records, in source order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Page {
    /// Records in source order; rejected ones keep their position
    pub entries: Vec<PageEntry>,
    /// Whether a further page exists
    pub has_more: bool,
}

impl Page {
    /// Page of validated items
    pub fn new(items: impl IntoIterator<Item = ItemDescriptor>, has_more: bool) -> Self {
        Self {
            entries: items.into_iter().map(PageEntry::Item).collect(),
            has_more,
        }
    }

    /// Page past the end of the collection
    pub fn end() -> Self {
        Self::default()
    }

    /// Records on the page, rejected ones included
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the page carried no records
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Validated items in source order
    pub fn items(&self) -> impl Iterator<Item = &ItemDescriptor> {
        self.entries.iter().filter_map(PageEntry::as_item)
    }

    /// Rejected records in source order
    pub fn rejected(&self) -> impl Iterator<Item = &RejectedItem> {
        self.entries.iter().filter_map(|entry| match entry {
            PageEntry::Rejected(record) => Some(record),
            PageEntry::Item(_) => None,
        })
    }
}

/// Paginated content source
#[async_trait]
pub trait ContentSource: Send + Sync {
    /// Fetch one page (1-based) of at most `page_size` items
    ///
    /// Transient failures are retried inside the call; an error returned here
    /// is final for this page.
    async fn fetch_page(&self, page: u32, page_size: u32) -> FetcherResult<Page>;

    /// Largest page size the source accepts
    fn max_page_size(&self) -> u32 {
        100
    }

    /// Human-readable name used in logs
    fn name(&self) -> &str;
}
