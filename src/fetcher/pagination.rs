//! Page-aligned item cursor and lazy item stream
//!
//! Records are pulled a page at a time. Rejected records count as stream
//! positions like any other, so offsets never depend on validation. A failed page leaves the cursor on that
//! page, so the next pull re-issues it: delivery restarts at page granularity,
//! never mid-page.
//!
//! Includes safety mechanisms:
//! - Maximum page limit to prevent runaway pagination
//! - Empty page and `has_more == false` both end the stream

use super::{ContentSource, FetcherError, FetcherResult};
use super::PageEntry;
use crate::metrics;
use futures_util::stream::{self, Stream};
use std::collections::VecDeque;
use std::pin::Pin;
use std::sync::Arc;
use tracing::debug;

/// Maximum page number requested before giving up
pub const MAX_PAGES: u32 = 100_000;

/// Lazy stream of page entries
pub type ItemStream = Pin<Box<dyn Stream<Item = FetcherResult<PageEntry>> + Send>>;

/// Cursor over the source's items, addressed by absolute offset
pub struct ItemCursor {
    source: Arc<dyn ContentSource>,
    page_size: u32,
    position: u64,
    next_page: u32,
    skip_in_page: usize,
    buffer: VecDeque<PageEntry>,
    exhausted: bool,
    pages_fetched: u64,
}

impl ItemCursor {
    /// Cursor positioned at `start_offset`
    pub fn new(source: Arc<dyn ContentSource>, start_offset: u64, page_size: u32) -> Self {
        let page_size = page_size.max(1);
        let mut cursor = Self {
            source,
            page_size,
            position: 0,
            next_page: 1,
            skip_in_page: 0,
            buffer: VecDeque::new(),
            exhausted: false,
            pages_fetched: 0,
        };
        cursor.seek(start_offset);
        cursor
    }

    /// Absolute offset of the next item
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Page size used for requests
    pub fn page_size(&self) -> u32 {
        self.page_size
    }

    /// Whether the source reported its last page
    pub fn is_exhausted(&self) -> bool {
        self.exhausted && self.buffer.is_empty()
    }

    /// Pages successfully fetched so far
    pub fn pages_fetched(&self) -> u64 {
        self.pages_fetched
    }

    /// Pull up to `n` entries. Fewer are returned only at the end of the stream.
    ///
    /// On error the entries already buffered stay buffered and the failed page
    /// is requested again on the next call.
    pub async fn next_items(&mut self, n: usize) -> FetcherResult<Vec<PageEntry>> {
        while self.buffer.len() < n && !self.exhausted {
            self.fill().await?;
        }

        let take = n.min(self.buffer.len());
        self.position += take as u64;
        Ok(self.buffer.drain(..take).collect())
    }

    /// Next single entry, `None` at the end
    pub async fn next_item(&mut self) -> Option<FetcherResult<PageEntry>> {
        match self.next_items(1).await {
            Ok(mut items) => items.pop().map(Ok),
            Err(e) => Some(Err(e)),
        }
    }

    /// Advance past `n` items, fetching nothing when the skip lands outside the buffer
    pub fn skip_items(&mut self, n: u64) {
        let from_buffer = (n.min(self.buffer.len() as u64)) as usize;
        self.buffer.drain(..from_buffer);
        let remaining = n - from_buffer as u64;

        if remaining == 0 {
            self.position += n;
            return;
        }

        self.seek(self.position + n);
    }

    fn seek(&mut self, offset: u64) {
        self.buffer.clear();
        self.position = offset;
        let page_size = u64::from(self.page_size);
        self.next_page = u32::try_from(offset / page_size + 1).unwrap_or(u32::MAX);
        self.skip_in_page = (offset % page_size) as usize;
    }

    async fn fill(&mut self) -> FetcherResult<()> {
        if self.next_page > MAX_PAGES {
            return Err(FetcherError::InvalidResponse(format!(
                "Max pages ({MAX_PAGES}) exceeded - possible infinite pagination"
            )));
        }

        debug!(
            source = self.source.name(),
            page = self.next_page,
            page_size = self.page_size,
            "Fetching page"
        );
        let page = self.source.fetch_page(self.next_page, self.page_size).await?;
        self.pages_fetched += 1;
        metrics::record_page_fetched(page.len());

        let received = page.len();
        let rejected = page.rejected().count();
        if rejected > 0 {
            debug!(page = self.next_page, rejected, "Page carried rejected records");
        }
        self.buffer
            .extend(page.entries.into_iter().skip(self.skip_in_page));
        self.skip_in_page = 0;
        self.next_page = self.next_page.saturating_add(1);

        if received == 0 || !page.has_more {
            debug!(
                pages_fetched = self.pages_fetched,
                last_page = self.next_page - 1,
                "Reached end of item stream"
            );
            self.exhausted = true;
        }

        Ok(())
    }
}

/// Lazy, finite stream of items starting at `start_offset`.
///
/// The first error is yielded and then the stream ends; callers restart from
/// the last page boundary by building a new stream.
pub fn stream_items(source: Arc<dyn ContentSource>, start_offset: u64, page_size: u32) -> ItemStream {
    let cursor = ItemCursor::new(source, start_offset, page_size);
    Box::pin(stream::unfold(Some(cursor), |state| async move {
        let mut cursor = state?;
        match cursor.next_item().await {
            Some(Ok(item)) => Some((Ok(item), Some(cursor))),
            Some(Err(e)) => Some((Err(e), None)),
            None => None,
        }
    }))
}
