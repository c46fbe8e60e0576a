//! Bounded worker pool
//!
//! One batch at a time: items go into a bounded queue, at most
//! `min(max_workers, items)` workers pull from it, and results come back over
//! a channel tagged with the item's position. The batch is Complete only when
//! every item has a result, no worker died and no shutdown was requested
//! before the workers joined.

use super::batch::{Batch, BatchOutcome, BatchStatus};
use super::converter::ItemConverter;
use super::progress::ProgressState;
use crate::shutdown::{self, SharedShutdown};
use crate::{ConversionResult, ItemDescriptor};
use indicatif::ProgressBar;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinSet;
use tracing::{debug, error, info, info_span, warn, Instrument};

/// Reason recorded for items left unprocessed by a shutdown
pub const SHUTDOWN_REASON: &str = "shutdown requested";

/// Worker pool errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PoolError {
    /// Pool built with zero workers
    #[error("worker pool needs at least one worker")]
    NoWorkers,
}

/// Fixed-size pool converting the items of one batch
pub struct WorkerPool {
    max_workers: usize,
    converter: Arc<dyn ItemConverter>,
    item_timeout: Option<Duration>,
    shutdown: Option<SharedShutdown>,
    progress: ProgressBar,
}

impl WorkerPool {
    /// Pool of `max_workers` workers
    pub fn new(max_workers: usize, converter: Arc<dyn ItemConverter>) -> Result<Self, PoolError> {
        if max_workers == 0 {
            return Err(PoolError::NoWorkers);
        }
        Ok(Self {
            max_workers,
            converter,
            item_timeout: None,
            shutdown: None,
            progress: ProgressBar::hidden(),
        })
    }

    /// Bound each item's conversion
    pub fn with_item_timeout(mut self, timeout: Duration) -> Self {
        self.item_timeout = Some(timeout);
        self
    }

    /// Stop taking new items once shutdown is requested
    pub fn with_shutdown(mut self, shutdown: Option<SharedShutdown>) -> Self {
        self.shutdown = shutdown;
        self
    }

    /// Drive `bar` while processing
    pub fn with_progress(mut self, bar: ProgressBar) -> Self {
        self.progress = bar;
        self
    }

    /// Configured worker count
    pub fn max_workers(&self) -> usize {
        self.max_workers
    }

    /// Convert every item of `batch`, returning once all are accounted for
    pub async fn process_batch(&self, batch: &Batch) -> BatchOutcome {
        let total = batch.len();
        if total == 0 {
            return BatchOutcome {
                index: batch.index,
                status: BatchStatus::Complete,
                results: batch.rejected.iter().map(ConversionResult::rejected).collect(),
                errors: Vec::new(),
            };
        }

        let workers = self.max_workers.min(total);
        debug!(batch = batch.index, items = total, workers, "Dispatching batch");
        self.progress.set_length(total as u64);
        self.progress.set_position(0);
        self.progress.set_message(format!("batch {}", batch.index));

        let (job_tx, job_rx) = mpsc::channel::<(usize, ItemDescriptor)>(self.max_workers);
        let job_rx = Arc::new(Mutex::new(job_rx));
        let (result_tx, mut result_rx) = mpsc::unbounded_channel::<(usize, ConversionResult)>();

        let mut set = JoinSet::new();
        for worker_id in 0..workers {
            let rx = job_rx.clone();
            let tx = result_tx.clone();
            let converter = self.converter.clone();
            let dir = batch.output_dir.clone();
            let timeout = self.item_timeout;
            let shutdown = self.shutdown.clone();

            set.spawn(async move {
                loop {
                    let next = { rx.lock().await.recv().await };
                    let Some((position, item)) = next else { break };

                    let result = if shutdown::is_requested(shutdown.as_ref()) {
                        ConversionResult::transiently_exhausted(&item, SHUTDOWN_REASON)
                    } else {
                        let span = info_span!("convert_item", item_id = item.id, worker = worker_id);
                        let work = converter.convert(&item, &dir).instrument(span);
                        match timeout {
                            Some(limit) => match tokio::time::timeout(limit, work).await {
                                Ok(result) => result,
                                Err(_) => {
                                    warn!(item_id = item.id, ?limit, "Item conversion timed out");
                                    ConversionResult::transiently_exhausted(
                                        &item,
                                        format!("conversion timed out after {}s", limit.as_secs()),
                                    )
                                }
                            },
                            None => work.await,
                        }
                    };

                    if tx.send((position, result)).is_err() {
                        break;
                    }
                }
            });
        }
        drop(result_tx);
        drop(job_rx);

        let items = batch.items.clone();
        let producer_shutdown = self.shutdown.clone();
        let producer = tokio::spawn(async move {
            for job in items.into_iter().enumerate() {
                if shutdown::is_requested(producer_shutdown.as_ref()) {
                    break;
                }
                if job_tx.send(job).await.is_err() {
                    break;
                }
            }
        });

        let mut progress = ProgressState::for_batch(batch.index, total as u64);
        let mut collected: Vec<Option<ConversionResult>> = vec![None; total];
        while let Some((position, result)) = result_rx.recv().await {
            self.progress.inc(1);
            if let Some(line) = progress.record(&result) {
                info!("{line}");
            }
            collected[position] = Some(result);
        }

        let mut errors = Vec::new();
        while let Some(joined) = set.join_next().await {
            if let Err(e) = joined {
                error!(batch = batch.index, error = %e, "Worker crashed");
                errors.push(format!("worker crashed: {e}"));
            }
        }
        if let Err(e) = producer.await {
            errors.push(format!("item producer crashed: {e}"));
        }

        // A request seen here may have cut media retries short inside
        // conversions that still reported success.
        let shutdown_hit = shutdown::is_requested(self.shutdown.as_ref());
        let mut results = Vec::with_capacity(total + batch.rejected.len());
        for (item, slot) in batch.items.iter().zip(collected) {
            match slot {
                Some(result) => results.push(result),
                None if shutdown_hit => {
                    results.push(ConversionResult::transiently_exhausted(item, SHUTDOWN_REASON));
                }
                None => {
                    errors.push(format!("item {} was never processed", item.id));
                    results.push(ConversionResult::transiently_exhausted(
                        item,
                        "worker stopped before processing the item",
                    ));
                }
            }
        }

        results.extend(batch.rejected.iter().map(ConversionResult::rejected));

        if shutdown_hit {
            warn!(batch = batch.index, "Shutdown requested during batch; it stays incomplete");
            errors.push(SHUTDOWN_REASON.to_string());
        }
        let status = if errors.is_empty() {
            BatchStatus::Complete
        } else {
            BatchStatus::Failed
        };
        self.progress.finish_and_clear();

        BatchOutcome {
            index: batch.index,
            status,
            results,
            errors,
        }
    }
}
