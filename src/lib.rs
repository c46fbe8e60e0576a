//! # Post Archiver Library
//!
//! Converts a paginated content API (WordPress `wp/v2/posts`) into a tree of
//! self-contained documents, one per post, processed in resumable batches.
//!
//! ## Features
//!
//! - **Batch Resume**: Each batch directory carries a completion marker; completed
//!   batches are never re-fetched or re-rendered on a later run
//! - **Bounded Concurrency**: A fixed pool of workers converts the items of one batch
//! - **Retry Policy**: Transient network, 5xx and rate-limit failures are retried with
//!   exponential backoff and jitter before escalating
//! - **Media Embedding**: Referenced images are fetched once per run, normalized and
//!   embedded into the document
//!
//! ## Quick Start
//!
//! ```no_run
//! use post_archiver::pipeline::{RunConfig, RunOrchestrator};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = RunConfig::new("https://blog.example.com")
//!     .with_batch_size(10)
//!     .with_start_batch(0)
//!     .with_max_workers(4);
//!
//! let orchestrator = RunOrchestrator::from_config(config)?;
//! let summary = orchestrator.run().await?;
//! println!("{} items converted", summary.items_succeeded);
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - [`fetcher`] - Content source trait, WordPress client, retry policy, paginated item stream
//! - [`media`] - Media resolver with per-run single-flight cache and image normalization
//! - [`render`] - Document renderer producing self-contained HTML artifacts
//! - [`resume`] - Completion markers, run manifest and run lock
//! - [`pipeline`] - Batch partitioner, worker pool and run orchestrator
//! - [`output`] - Storage layout and atomic file writes
//!
//! ## Data Types
//!
//! - [`ItemDescriptor`] - One validated content item
//! - [`MediaAsset`] - Resolved media bytes plus resolution outcome
//! - [`ConversionResult`] - Per-item outcome produced by a worker

#![warn(missing_docs)]
#![warn(clippy::all)]

use bytes::Bytes;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// CLI command implementations
pub mod cli;

/// Content fetching and retry policy
pub mod fetcher;

/// Media resolution and image normalization
pub mod media;

/// Prometheus metrics
pub mod metrics;

/// Storage layout and atomic writes
pub mod output;

/// Batch pipeline: partitioner, worker pool, orchestrator
pub mod pipeline;

/// Document rendering
pub mod render;

/// Persisted run state
pub mod resume;

/// Graceful shutdown coordination shared across modules
pub mod shutdown;

/// Taxonomy a term belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TermKind {
    /// Post category
    Category,
    /// Post tag
    Tag,
}

impl fmt::Display for TermKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TermKind::Category => write!(f, "category"),
            TermKind::Tag => write!(f, "post_tag"),
        }
    }
}

impl FromStr for TermKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "category" => Ok(TermKind::Category),
            "post_tag" => Ok(TermKind::Tag),
            _ => Err(format!("Unknown taxonomy: {s}")),
        }
    }
}

/// A category or tag attached to an item
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Term {
    /// Display name
    pub name: String,
    /// Taxonomy
    pub kind: TermKind,
}

/// One content item as delivered by the content source.
///
/// Built only at the transport boundary; the rest of the pipeline treats it as
/// immutable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemDescriptor {
    /// Identifier, unique per source
    pub id: u64,
    /// Display title (entities decoded, tags stripped)
    pub title: String,
    /// Raw body markup
    pub body: String,
    /// Media references in body order
    pub media: Vec<String>,
    /// Publication timestamp in site-local time
    pub published: NaiveDateTime,
    /// Categories and tags, deduplicated, source order kept
    pub terms: Vec<Term>,
}

impl ItemDescriptor {
    /// Validate item integrity
    pub fn validate(&self) -> Result<(), String> {
        if self.id == 0 {
            return Err("Item id must be non-zero".to_string());
        }

        if self.media.iter().any(|m| m.trim().is_empty()) {
            return Err(format!("Item {} has an empty media reference", self.id));
        }

        Ok(())
    }

    /// Terms of one taxonomy, in source order
    pub fn terms_of(&self, kind: TermKind) -> impl Iterator<Item = &str> {
        self.terms
            .iter()
            .filter(move |t| t.kind == kind)
            .map(|t| t.name.as_str())
    }
}

/// A record the source returned that failed validation.
///
/// It keeps its place in the item stream so batch offsets stay stable, and is
/// reported as a permanent per-item failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RejectedItem {
    /// Identifier as sent by the source (may be 0)
    pub id: u64,
    /// Display title, empty when unusable
    pub title: String,
    /// Why validation failed
    pub reason: String,
}

/// How a media reference was resolved
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", content = "reason", rename_all = "snake_case")]
pub enum MediaOutcome {
    /// Bytes fetched and normalized
    Success,
    /// Reference not fetchable (e.g. `data:` URI or unsupported scheme)
    Skipped(String),
    /// Fetch or normalization failed permanently
    Failed(String),
}

/// Media bytes plus the outcome of resolving them
#[derive(Debug, Clone, PartialEq)]
pub struct MediaAsset {
    /// Normalized source URL
    pub url: String,
    /// Resolved content (empty unless `outcome` is `Success`)
    pub bytes: Bytes,
    /// MIME type of `bytes`
    pub content_type: String,
    /// Resolution outcome
    pub outcome: MediaOutcome,
}

impl MediaAsset {
    /// Successfully resolved asset
    pub fn success(url: impl Into<String>, bytes: Bytes, content_type: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            bytes,
            content_type: content_type.into(),
            outcome: MediaOutcome::Success,
        }
    }

    /// Asset that was never fetched
    pub fn skipped(url: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            bytes: Bytes::new(),
            content_type: String::new(),
            outcome: MediaOutcome::Skipped(reason.into()),
        }
    }

    /// Asset whose resolution failed
    pub fn failed(url: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            bytes: Bytes::new(),
            content_type: String::new(),
            outcome: MediaOutcome::Failed(reason.into()),
        }
    }

    /// Whether the asset can be embedded
    pub fn is_success(&self) -> bool {
        self.outcome == MediaOutcome::Success
    }
}

/// Outcome of converting one item
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "reason", rename_all = "snake_case")]
pub enum ConversionOutcome {
    /// Artifact written
    Success,
    /// Failed for a reason retrying cannot fix
    PermanentFailure(String),
    /// Transient failure that outlived the retry budget
    TransientlyExhausted(String),
}

impl ConversionOutcome {
    /// Whether the item produced an artifact
    pub fn is_success(&self) -> bool {
        matches!(self, ConversionOutcome::Success)
    }

    /// Failure reason, if any
    pub fn reason(&self) -> Option<&str> {
        match self {
            ConversionOutcome::Success => None,
            ConversionOutcome::PermanentFailure(r) | ConversionOutcome::TransientlyExhausted(r) => {
                Some(r)
            }
        }
    }
}

impl fmt::Display for ConversionOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConversionOutcome::Success => write!(f, "success"),
            ConversionOutcome::PermanentFailure(r) => write!(f, "permanent failure: {r}"),
            ConversionOutcome::TransientlyExhausted(r) => write!(f, "retries exhausted: {r}"),
        }
    }
}

/// Per-item result produced by a worker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversionResult {
    /// Item identifier
    pub item_id: u64,
    /// Item title, for reporting
    pub title: String,
    /// Outcome
    pub outcome: ConversionOutcome,
    /// Artifact path when `outcome` is `Success`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artifact: Option<PathBuf>,
    /// Non-fatal problems (omitted media)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

impl ConversionResult {
    /// Successful conversion
    pub fn success(item: &ItemDescriptor, artifact: PathBuf, warnings: Vec<String>) -> Self {
        Self {
            item_id: item.id,
            title: item.title.clone(),
            outcome: ConversionOutcome::Success,
            artifact: Some(artifact),
            warnings,
        }
    }

    /// Permanent failure
    pub fn permanent_failure(item: &ItemDescriptor, reason: impl Into<String>) -> Self {
        Self {
            item_id: item.id,
            title: item.title.clone(),
            outcome: ConversionOutcome::PermanentFailure(reason.into()),
            artifact: None,
            warnings: Vec::new(),
        }
    }

    /// Transient failure that exhausted its retries
    pub fn transiently_exhausted(item: &ItemDescriptor, reason: impl Into<String>) -> Self {
        Self {
            item_id: item.id,
            title: item.title.clone(),
            outcome: ConversionOutcome::TransientlyExhausted(reason.into()),
            artifact: None,
            warnings: Vec::new(),
        }
    }

    /// Permanent failure for a record that never became an item
    pub fn rejected(record: &RejectedItem) -> Self {
        Self {
            item_id: record.id,
            title: record.title.clone(),
            outcome: ConversionOutcome::PermanentFailure(format!("malformed item: {}", record.reason)),
            artifact: None,
            warnings: Vec::new(),
        }
    }

    /// Whether the item produced an artifact
    pub fn is_success(&self) -> bool {
        self.outcome.is_success()
    }
}
