//! Run orchestrator
//!
//! Drives one run: startup checks, then batches in strict index order, each
//! one processed by the worker pool and made durable before the next begins.

use super::batch::{Batch, BatchOutcome, BatchStatus};
use super::config::{ConfigError, RunConfig, CONSECUTIVE_FAILURE_LIMIT};
use super::converter::{DocumentConverter, ItemConverter};
use super::partition::{BatchPartitioner, PartitionError};
use super::pool::WorkerPool;
use super::progress::create_progress_bar;
use super::summary::{format_batch_log, format_run_log_line, RunSummary};
use crate::fetcher::http::{build_client, HttpClient};
use crate::fetcher::rate_limit::{RateLimiter, DEFAULT_WINDOW};
use crate::fetcher::wordpress::WordPressSource;
use crate::fetcher::{ContentSource, FetcherError, RetryPolicy};
use crate::media::MediaResolver;
use crate::metrics;
use crate::output::{append_line, write_atomic, OutputLayout};
use crate::render::{render_error_document, HtmlRenderer};
use crate::resume::{
    BatchRecord, CompletionMarker, FailedEntry, FileStateStore, ResumeError, RunLock, RunState,
    StateStore, SucceededEntry,
};
use crate::shutdown::{self, SharedShutdown};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, info_span, warn, Instrument};

/// Run lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunPhase {
    /// Constructed, not yet running
    NotStarted,
    /// Processing batches
    Running,
    /// Every batch processed, item failures allowed
    Finished,
    /// Stopped early
    Aborted,
}

impl RunPhase {
    /// Move to `next`; only NotStarted -> Running -> {Finished, Aborted}
    pub fn transition(self, next: RunPhase) -> Result<RunPhase, RunError> {
        match (self, next) {
            (RunPhase::NotStarted, RunPhase::Running)
            | (RunPhase::Running, RunPhase::Finished)
            | (RunPhase::Running, RunPhase::Aborted) => Ok(next),
            (from, to) => Err(RunError::InvalidTransition { from, to }),
        }
    }
}

impl fmt::Display for RunPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            RunPhase::NotStarted => "not started",
            RunPhase::Running => "running",
            RunPhase::Finished => "finished",
            RunPhase::Aborted => "aborted",
        };
        f.write_str(label)
    }
}

/// Errors that stop a run
#[derive(Debug, thiserror::Error)]
pub enum RunError {
    /// Invalid configuration
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Startup failure (output root, lock, client)
    #[error("fatal: {0}")]
    Fatal(String),

    /// Run state could not be read or written
    #[error("run state error: {0}")]
    State(#[from] ResumeError),

    /// Run ended without finishing
    #[error("run aborted: {0}")]
    Aborted(String),

    /// Phase change out of order
    #[error("invalid run phase transition {from} -> {to}")]
    InvalidTransition {
        /// Current phase
        from: RunPhase,
        /// Requested phase
        to: RunPhase,
    },
}

/// Runs batches from `start_batch` to the end of the stream
pub struct RunOrchestrator {
    config: RunConfig,
    source: Arc<dyn ContentSource>,
    converter: Arc<dyn ItemConverter>,
    store: Arc<dyn StateStore>,
    layout: OutputLayout,
    shutdown: Option<SharedShutdown>,
    resolver: Option<Arc<MediaResolver>>,
    show_progress: bool,
    phase: RunPhase,
}

impl RunOrchestrator {
    /// Orchestrator over explicit parts
    pub fn new(
        config: RunConfig,
        source: Arc<dyn ContentSource>,
        converter: Arc<dyn ItemConverter>,
        store: Arc<dyn StateStore>,
    ) -> Self {
        let layout = OutputLayout::new(&config.output_root);
        Self {
            config,
            source,
            converter,
            store,
            layout,
            shutdown: None,
            resolver: None,
            show_progress: false,
            phase: RunPhase::NotStarted,
        }
    }

    /// Production wiring: WordPress source, HTML renderer, file markers
    pub fn from_config(config: RunConfig) -> Result<Self, RunError> {
        Self::from_config_with_shutdown(config, None)
    }

    /// Production wiring with a shutdown handle threaded into every layer
    pub fn from_config_with_shutdown(
        config: RunConfig,
        shutdown: Option<SharedShutdown>,
    ) -> Result<Self, RunError> {
        config.validate()?;
        let base_url = config.parsed_base_url()?;

        let client = build_client(config.request_timeout)
            .map_err(|e| RunError::Fatal(e.to_string()))?;
        let limiter = Arc::new(RateLimiter::request_based(
            config.requests_per_second,
            DEFAULT_WINDOW,
        ));
        let http = HttpClient::new(client, base_url.as_str(), limiter)
            .with_credentials(config.credentials.clone())
            .with_retry_policy(RetryPolicy::default().with_max_attempts(config.max_retries))
            .with_shutdown(shutdown.clone());

        let resolver = Arc::new(
            MediaResolver::new(Arc::new(http.clone()))
                .with_base_url(Some(base_url))
                .with_max_dimension(config.max_image_dimension)
                .with_shutdown(shutdown.clone()),
        );
        let converter = Arc::new(DocumentConverter::new(
            resolver.clone(),
            Arc::new(HtmlRenderer::new()),
        ));
        let source = Arc::new(WordPressSource::new(http));
        let store = Arc::new(FileStateStore::new(&config.output_root));

        Ok(Self::new(config, source, converter, store)
            .with_shutdown(shutdown)
            .with_media_resolver(resolver))
    }

    /// Observe `shutdown` between batches and in the pool
    pub fn with_shutdown(mut self, shutdown: Option<SharedShutdown>) -> Self {
        self.shutdown = shutdown;
        self
    }

    /// Resolver whose fetch count goes into the summary
    pub fn with_media_resolver(mut self, resolver: Arc<MediaResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    /// Show an indicatif bar per batch
    pub fn with_progress_bar(mut self, visible: bool) -> Self {
        self.show_progress = visible;
        self
    }

    /// Current phase
    pub fn phase(&self) -> RunPhase {
        self.phase
    }

    /// Execute the run.
    ///
    /// Startup problems return `Err`. Once batches are running, aborts are
    /// reported through the summary's phase and `abort_reason`.
    pub async fn run(mut self) -> Result<RunSummary, RunError> {
        let started = Instant::now();
        self.config.validate()?;

        self.layout
            .ensure_root()
            .map_err(|e| RunError::Fatal(format!("cannot create output root: {e}")))?;
        let _lock = RunLock::try_acquire(&self.layout.lock_file())
            .map_err(|e| RunError::Fatal(e.to_string()))?;

        if self.config.reset_state {
            self.store.reset()?;
        }
        let mut state = self.store.load()?;
        state
            .bind_batch_size(self.config.batch_size)
            .map_err(|e| match e {
                ResumeError::BatchSizeMismatch {
                    recorded,
                    requested,
                } => RunError::Config(ConfigError::BatchSizeMismatch {
                    recorded,
                    requested,
                }),
                other => RunError::State(other),
            })?;

        self.phase = self.phase.transition(RunPhase::Running)?;
        info!(
            source = self.source.name(),
            root = %self.layout.root().display(),
            batch_size = self.config.batch_size,
            start_batch = self.config.start_batch,
            workers = self.config.max_workers,
            "Run started"
        );

        let mut summary = RunSummary::new();
        let abort_reason = self.run_batches(&mut state, &mut summary).await;

        self.phase = match &abort_reason {
            None => self.phase.transition(RunPhase::Finished)?,
            Some(reason) => {
                error!(reason = %reason, "Run aborted");
                self.phase.transition(RunPhase::Aborted)?
            }
        };

        summary.phase = self.phase;
        summary.abort_reason = abort_reason;
        summary.last_batch = state.last_batch();
        summary.media_fetches = self.resolver.as_ref().map_or(0, |r| r.fetch_count());
        summary.duration = started.elapsed();

        info!(
            phase = %summary.phase,
            batches = summary.batches_processed,
            failed_batches = summary.batches_failed,
            skipped = summary.batches_skipped,
            items_succeeded = summary.items_succeeded,
            items_failed = summary.items_failed,
            "Run ended"
        );
        Ok(summary)
    }

    /// Batch loop; returns the abort reason, `None` when the stream ran out
    async fn run_batches(&self, state: &mut RunState, summary: &mut RunSummary) -> Option<String> {
        let pool = match WorkerPool::new(self.config.max_workers, self.converter.clone()) {
            Ok(pool) => pool
                .with_item_timeout(self.config.item_timeout)
                .with_shutdown(self.shutdown.clone())
                .with_progress(create_progress_bar(self.config.batch_size, self.show_progress)),
            Err(e) => return Some(e.to_string()),
        };

        let mut partitioner = BatchPartitioner::new(
            self.source.clone(),
            self.config.batch_size,
            self.config.start_batch,
            state,
            self.layout.clone(),
        );
        let mut consecutive_fetch_failures = 0u32;
        let mut first = true;

        loop {
            if shutdown::is_requested(self.shutdown.as_ref()) {
                return Some(crate::pipeline::pool::SHUTDOWN_REASON.to_string());
            }
            if !first && !self.config.page_delay.is_zero() {
                self.pause().await;
            }
            first = false;

            let next = partitioner.next_batch().await;
            summary.batches_skipped += partitioner.take_skipped().len() as u64;
            if let Some(last) = partitioner.last_batch() {
                if state.last_batch() != Some(last) {
                    state.record_last_batch(last);
                    if let Err(e) = self.store.save(state) {
                        return Some(format!("failed to persist run state: {e}"));
                    }
                }
            }

            let Some(next) = next else {
                debug!("No more batches");
                return None;
            };

            match next {
                Ok(batch) => {
                    consecutive_fetch_failures = 0;
                    if let Err(e) = self.process(batch, &pool, state, summary).await {
                        return Some(e.to_string());
                    }
                }
                Err(PartitionError::Fetch { index, source }) => {
                    if matches!(source, FetcherError::Cancelled) {
                        return Some(crate::pipeline::pool::SHUTDOWN_REASON.to_string());
                    }
                    if partitioner.pages_fetched() == 0 {
                        return Some(format!("content source unreachable: {source}"));
                    }

                    consecutive_fetch_failures += 1;
                    let reason = format!("fetch failed: {source}");
                    summary.record_fetch_failure(index, reason.clone());
                    metrics::record_batch_resolved(BatchStatus::Failed.as_str(), Default::default());
                    if let Err(e) = self.record_failed_fetch(state, index, &reason) {
                        return Some(format!("failed to persist run state: {e}"));
                    }

                    if consecutive_fetch_failures >= CONSECUTIVE_FAILURE_LIMIT {
                        return Some(format!(
                            "{consecutive_fetch_failures} consecutive batch fetch failures; last: {source}"
                        ));
                    }
                }
            }
        }
    }

    /// Process one batch end to end. `Err` only for state writes, which abort the run.
    async fn process(
        &self,
        mut batch: Batch,
        pool: &WorkerPool,
        state: &mut RunState,
        summary: &mut RunSummary,
    ) -> Result<(), RunError> {
        let index = batch.index;
        let span = info_span!("batch", index, items = batch.len());
        async {
            let started = Instant::now();
            info!("Processing batch");

            state.mark_in_progress(index);
            self.store.save(state)?;
            transition(&mut batch, BatchStatus::InProgress);

            let outcome = match self.layout.reset_batch_dir(index) {
                Ok(_) => pool.process_batch(&batch).await,
                Err(e) => BatchOutcome {
                    index,
                    status: BatchStatus::Failed,
                    results: Vec::new(),
                    errors: vec![format!("cannot prepare batch directory: {e}")],
                },
            };
            transition(&mut batch, outcome.status);

            let log = format_batch_log(&outcome);
            if let Err(e) = write_atomic(&self.layout.batch_log(index), log.as_bytes()) {
                warn!(error = %e, "Failed to write batch log");
            }
            if self.config.error_documents {
                self.write_error_documents(&batch, &outcome);
            }

            let mut record = BatchRecord::with_status(outcome.status);
            record.items = outcome.results.len();
            record.succeeded = outcome.success_count();
            record.failed = outcome.failure_count();
            record.errors = outcome.errors.clone();

            if outcome.status == BatchStatus::Complete && !shutdown::is_requested(self.shutdown.as_ref()) {
                self.store.write_marker(&completion_marker(&outcome, self.config.batch_size))?;
            }
            state.set_record(index, record);
            self.store.save(state)?;

            let detail = format!(
                "succeeded={} failed={}{}",
                outcome.success_count(),
                outcome.failure_count(),
                if outcome.errors.is_empty() {
                    String::new()
                } else {
                    format!(" errors=\"{}\"", outcome.errors.join("; "))
                }
            );
            self.append_run_log(index, outcome.status.as_str(), &detail);

            let elapsed = started.elapsed();
            metrics::record_batch_resolved(outcome.status.as_str(), elapsed);
            info!(
                status = %outcome.status,
                succeeded = outcome.success_count(),
                failed = outcome.failure_count(),
                elapsed_ms = elapsed.as_millis() as u64,
                "Batch resolved"
            );
            summary.record_outcome(&outcome);
            Ok::<(), RunError>(())
        }
        .instrument(span)
        .await
    }

    fn record_failed_fetch(
        &self,
        state: &mut RunState,
        index: u64,
        reason: &str,
    ) -> Result<(), ResumeError> {
        let mut record = BatchRecord::with_status(BatchStatus::Failed);
        record.errors = vec![reason.to_string()];
        state.set_record(index, record);
        self.store.save(state)?;
        self.append_run_log(index, BatchStatus::Failed.as_str(), reason);
        Ok(())
    }

    fn write_error_documents(&self, batch: &Batch, outcome: &BatchOutcome) {
        let dir = self.layout.errors_dir();
        for result in outcome.failed() {
            let Some(item) = batch.items.iter().find(|i| i.id == result.item_id) else {
                continue;
            };
            let doc = render_error_document(item, result.outcome.reason().unwrap_or_default());
            if let Err(e) = crate::render::write_artifact(&dir, &doc) {
                warn!(item_id = item.id, error = %e, "Failed to write error document");
            }
        }
    }

    fn append_run_log(&self, index: u64, status: &str, detail: &str) {
        let line = format_run_log_line(index, status, detail);
        if let Err(e) = append_line(&self.layout.run_log(), &line) {
            warn!(error = %e, "Failed to append run log");
        }
    }

    async fn pause(&self) {
        let delay = self.config.page_delay;
        match &self.shutdown {
            Some(shutdown) => {
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = shutdown.wait_for_shutdown() => {}
                }
            }
            None => tokio::time::sleep(delay).await,
        }
    }
}

fn transition(batch: &mut Batch, next: BatchStatus) {
    if let Err(e) = batch.transition(next) {
        warn!(error = %e, "Ignoring batch status change");
    }
}

fn completion_marker(outcome: &BatchOutcome, batch_size: u64) -> CompletionMarker {
    let succeeded = outcome
        .succeeded()
        .map(|r| SucceededEntry {
            id: r.item_id,
            artifact: r
                .artifact
                .as_ref()
                .and_then(|p| p.file_name())
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
        })
        .collect();
    let failed = outcome
        .failed()
        .map(|r| FailedEntry {
            id: r.item_id,
            reason: r.outcome.reason().unwrap_or_default().to_string(),
        })
        .collect();
    CompletionMarker::new(outcome.index, batch_size, succeeded, failed)
}
