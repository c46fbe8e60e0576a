//! Batch partitioner
//!
//! Cuts the item stream into batches of `batch_size` items. Batch `i` covers
//! absolute offsets `[i * batch_size, (i + 1) * batch_size)`, so a batch's
//! contents depend only on the source and the batch size, never on what an
//! earlier run processed.
//!
//! Batches the resume state marks Complete are stepped over without any
//! fetch; the cursor seeks past them by offset.
//!
//! A post published mid-run shifts the date-ordered pages, so a record can be
//! delivered twice within one batch. Only its first delivery is kept.

use super::batch::Batch;
use crate::fetcher::{ContentSource, FetcherError, ItemCursor, PageEntry};
use crate::output::OutputLayout;
use crate::resume::RunState;
use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Partitioner errors
#[derive(Debug, thiserror::Error)]
pub enum PartitionError {
    /// A page of this batch could not be fetched
    #[error("batch {index}: fetch failed: {source}")]
    Fetch {
        /// Batch index
        index: u64,
        /// Final fetch error
        #[source]
        source: FetcherError,
    },
}

impl PartitionError {
    /// Batch the error belongs to
    pub fn index(&self) -> u64 {
        match self {
            PartitionError::Fetch { index, .. } => *index,
        }
    }
}

/// Largest page size not above `max_page` that divides `batch_size`, so batch
/// boundaries always fall on page boundaries
pub fn aligned_page_size(batch_size: u64, max_page: u32) -> u32 {
    let upper = batch_size.min(u64::from(max_page.max(1)));
    (1..=upper)
        .rev()
        .find(|d| batch_size % d == 0)
        .and_then(|d| u32::try_from(d).ok())
        .unwrap_or(1)
}

/// Yields batches from `start_batch` until the stream ends
pub struct BatchPartitioner {
    cursor: ItemCursor,
    layout: OutputLayout,
    batch_size: u64,
    next_index: u64,
    complete: BTreeSet<u64>,
    known_last: Option<u64>,
    discovered_last: Option<u64>,
    skipped: Vec<u64>,
    finished: bool,
}

impl BatchPartitioner {
    /// Partitioner over `source`, starting at `start_batch`.
    ///
    /// `state` is read once: the set of Complete batches and the recorded
    /// last batch are copied so the caller may keep mutating its state.
    pub fn new(
        source: Arc<dyn ContentSource>,
        batch_size: u64,
        start_batch: u64,
        state: &RunState,
        layout: OutputLayout,
    ) -> Self {
        let batch_size = batch_size.max(1);
        let page_size = aligned_page_size(batch_size, source.max_page_size());
        let start_offset = start_batch.saturating_mul(batch_size);
        debug!(batch_size, page_size, start_batch, start_offset, "Partitioner ready");

        Self {
            cursor: ItemCursor::new(source, start_offset, page_size),
            layout,
            batch_size,
            next_index: start_batch,
            complete: state.complete_indices().into_iter().collect(),
            known_last: state.last_batch(),
            discovered_last: None,
            skipped: Vec::new(),
            finished: false,
        }
    }

    /// Page size used against the source
    pub fn page_size(&self) -> u32 {
        self.cursor.page_size()
    }

    /// Pages fetched so far by this partitioner
    pub fn pages_fetched(&self) -> u64 {
        self.cursor.pages_fetched()
    }

    /// Index of the final batch, once the end of the stream has been seen
    pub fn last_batch(&self) -> Option<u64> {
        self.discovered_last
    }

    /// Complete batches stepped over since the last call
    pub fn take_skipped(&mut self) -> Vec<u64> {
        std::mem::take(&mut self.skipped)
    }

    /// Next batch to process.
    ///
    /// `None` once the stream is exhausted. A fetch failure yields
    /// `Some(Err(..))` and the partitioner moves on to the following batch.
    pub async fn next_batch(&mut self) -> Option<Result<Batch, PartitionError>> {
        loop {
            if self.finished {
                return None;
            }
            let index = self.next_index;

            if let Some(last) = self.known_last {
                if index > last {
                    debug!(index, last, "Past recorded last batch");
                    self.discovered_last = Some(last);
                    self.finished = true;
                    return None;
                }
            }

            if self.complete.contains(&index) {
                info!(batch = index, "Skipping completed batch");
                self.skipped.push(index);
                self.cursor.skip_items(self.batch_size);
                self.next_index += 1;
                if self.known_last == Some(index) {
                    self.discovered_last = Some(index);
                    self.finished = true;
                }
                continue;
            }

            return match self.cursor.next_items(self.batch_size as usize).await {
                Ok(entries) if entries.is_empty() => {
                    self.discovered_last = index.checked_sub(1);
                    self.finished = true;
                    debug!(index, "Item stream ended on a batch boundary");
                    None
                }
                Ok(entries) => {
                    if self.cursor.is_exhausted() {
                        self.discovered_last = Some(index);
                        self.finished = true;
                    }
                    self.next_index += 1;
                    Some(Ok(self.assemble(index, entries)))
                }
                Err(source) => {
                    warn!(batch = index, error = %source, "Batch fetch failed");
                    // Step to the next batch boundary; partially buffered items are dropped.
                    let next_start = (index + 1).saturating_mul(self.batch_size);
                    self.cursor
                        .skip_items(next_start.saturating_sub(self.cursor.position()));
                    self.next_index += 1;
                    Some(Err(PartitionError::Fetch { index, source }))
                }
            };
        }
    }

    fn assemble(&self, index: u64, entries: Vec<PageEntry>) -> Batch {
        let mut seen = HashSet::with_capacity(entries.len());
        let mut items = Vec::with_capacity(entries.len());
        let mut rejected = Vec::new();
        for entry in entries {
            // id 0 marks a record whose id could not be read
            if entry.id() != 0 && !seen.insert(entry.id()) {
                warn!(batch = index, item_id = entry.id(), "Dropping repeated delivery of item");
                continue;
            }
            match entry {
                PageEntry::Item(item) => items.push(item),
                PageEntry::Rejected(record) => rejected.push(record),
            }
        }
        if !rejected.is_empty() {
            info!(batch = index, rejected = rejected.len(), "Batch carries malformed records");
        }
        Batch::new(index, items, self.layout.batch_dir(index)).with_rejected(rejected)
    }
}
