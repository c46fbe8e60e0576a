//! Batch pipeline
//!
//! The partitioner cuts the item stream into batches, the worker pool converts
//! one batch at a time, and the orchestrator makes each resolved batch durable
//! before moving on.

pub mod batch;
pub mod config;
pub mod converter;
pub mod orchestrator;
pub mod partition;
pub mod pool;
pub mod progress;
pub mod summary;

pub use batch::{Batch, BatchOutcome, BatchStatus, TransitionError};
pub use config::{ConfigError, RunConfig, MAX_WORKERS};
pub use converter::{DocumentConverter, ItemConverter};
pub use orchestrator::{RunError, RunOrchestrator, RunPhase};
pub use partition::{aligned_page_size, BatchPartitioner, PartitionError};
pub use pool::{PoolError, WorkerPool};
pub use progress::ProgressState;
pub use summary::{FailedBatch, FailedItem, RunSummary};
