//! Filesystem-backed content reader.

use async_trait::async_trait;
use std::path::{Component, Path, PathBuf};
use tracing::debug;

use crate::error::{ExtractionError, Result, Store};
use crate::stores::slice_lines;
use crate::traits::store::ContentReader;
use crate::types::node::SourceRef;

/// Reads node content from source files under a root directory.
///
/// Source paths must be relative and may not climb out of the root.
#[derive(Debug, Clone)]
pub struct FileContentReader {
    root: PathBuf,
}

impl FileContentReader {
    /// Create a reader rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, path: &str) -> Result<PathBuf> {
        let relative = Path::new(path);
        let escapes = relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
        if escapes {
            return Err(ExtractionError::store(
                Store::Content,
                format!("source path escapes content root: {path}"),
            ));
        }
        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl ContentReader for FileContentReader {
    async fn read(&self, source: &SourceRef) -> Result<String> {
        let full_path = self.resolve(&source.path)?;
        debug!(
            path = %full_path.display(),
            start = source.start_line,
            end = source.end_line,
            "Reading node content"
        );

        let text = tokio::fs::read_to_string(&full_path).await.map_err(|e| {
            ExtractionError::store(Store::Content, format!("{}: {e}", full_path.display()))
        })?;
        slice_lines(&text, source)
    }
}
