//! Document rendering
//!
//! A [`DocumentRenderer`] turns one item plus its resolved media into an
//! [`Artifact`]. Rendering is pure; [`write_artifact`] is the only step that
//! touches the filesystem.

use crate::output::{self, OutputError};
use crate::{ItemDescriptor, MediaAsset};
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub mod html;
pub mod text;

pub use html::{render_error_document, HtmlRenderer};

/// Rendering errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum RenderError {
    /// Item cannot be rendered
    #[error("invalid item: {0}")]
    InvalidItem(String),

    /// Media could not be embedded
    #[error("media encoding error: {0}")]
    Encoding(String),

    /// Artifact could not be written
    #[error("IO error: {0}")]
    Io(String),
}

impl From<OutputError> for RenderError {
    fn from(err: OutputError) -> Self {
        RenderError::Io(err.to_string())
    }
}

/// Finished document, not yet on disk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    /// File name inside the batch directory
    pub file_name: String,
    /// Document bytes
    pub bytes: Vec<u8>,
}

/// Produces a document from an item and its resolved media.
///
/// Implementations must be deterministic: the same item and media give
/// byte-identical artifacts. `media` is in body reference order; assets whose
/// outcome is not `Success` are omitted from the document.
pub trait DocumentRenderer: Send + Sync {
    /// Render one item
    fn render(
        &self,
        item: &ItemDescriptor,
        media: &[Arc<MediaAsset>],
    ) -> Result<Artifact, RenderError>;
}

/// Write an artifact into `dir` atomically, returning its path.
///
/// Writing the same artifact again overwrites the previous file.
pub fn write_artifact(dir: &Path, artifact: &Artifact) -> Result<PathBuf, RenderError> {
    if artifact.file_name.is_empty()
        || artifact.file_name.contains(['/', '\\'])
        || artifact.file_name.starts_with('.')
    {
        return Err(RenderError::InvalidItem(format!(
            "unsafe artifact file name '{}'",
            artifact.file_name
        )));
    }
    let path = dir.join(&artifact.file_name);
    output::write_atomic(&path, &artifact.bytes)?;
    Ok(path)
}
