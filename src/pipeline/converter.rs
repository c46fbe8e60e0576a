//! Item conversion: resolve media, render, write the artifact.

use crate::media::MediaResolver;
use crate::metrics;
use crate::render::{write_artifact, DocumentRenderer};
use crate::{ConversionResult, ItemDescriptor, MediaOutcome};
use async_trait::async_trait;
use futures::future::join_all;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, warn};

/// Converts one item into an artifact under `batch_dir`.
///
/// Never panics on bad input and never returns an error: every problem is
/// folded into the [`ConversionResult`].
#[async_trait]
pub trait ItemConverter: Send + Sync {
    /// Convert one item
    async fn convert(&self, item: &ItemDescriptor, batch_dir: &Path) -> ConversionResult;
}

/// Media resolver + document renderer + atomic write
pub struct DocumentConverter {
    resolver: Arc<MediaResolver>,
    renderer: Arc<dyn DocumentRenderer>,
}

impl DocumentConverter {
    /// Converter over a shared resolver and renderer
    pub fn new(resolver: Arc<MediaResolver>, renderer: Arc<dyn DocumentRenderer>) -> Self {
        Self { resolver, renderer }
    }

    /// Shared media resolver
    pub fn resolver(&self) -> &Arc<MediaResolver> {
        &self.resolver
    }
}

#[async_trait]
impl ItemConverter for DocumentConverter {
    async fn convert(&self, item: &ItemDescriptor, batch_dir: &Path) -> ConversionResult {
        let result = self.convert_inner(item, batch_dir).await;
        let label = match &result.outcome {
            crate::ConversionOutcome::Success => "success",
            crate::ConversionOutcome::PermanentFailure(_) => "permanent_failure",
            crate::ConversionOutcome::TransientlyExhausted(_) => "transiently_exhausted",
        };
        metrics::record_item_converted(label);
        result
    }
}

impl DocumentConverter {
    async fn convert_inner(&self, item: &ItemDescriptor, batch_dir: &Path) -> ConversionResult {
        if let Err(reason) = item.validate() {
            return ConversionResult::permanent_failure(item, reason);
        }

        let media = join_all(item.media.iter().map(|r| self.resolver.resolve(r))).await;
        let warnings: Vec<String> = media
            .iter()
            .filter_map(|asset| match &asset.outcome {
                MediaOutcome::Success => None,
                MediaOutcome::Skipped(reason) => {
                    Some(format!("image skipped: {} ({reason})", asset.url))
                }
                MediaOutcome::Failed(reason) => {
                    Some(format!("image omitted: {} ({reason})", asset.url))
                }
            })
            .collect();
        for warning in &warnings {
            warn!(item_id = item.id, "{warning}");
        }

        let artifact = match self.renderer.render(item, &media) {
            Ok(artifact) => artifact,
            Err(e) => return ConversionResult::permanent_failure(item, e.to_string()),
        };

        match write_artifact(batch_dir, &artifact) {
            Ok(path) => {
                debug!(item_id = item.id, path = %path.display(), "Artifact written");
                ConversionResult::success(item, path, warnings)
            }
            Err(e) => ConversionResult::permanent_failure(item, e.to_string()),
        }
    }
}
