//! Install image content sources.
//!
//! The driver reads the image once per transfer attempt, so a source hands
//! out a fresh reader on every [`ContentSource::open`].

use std::future::Future;
use std::io::Cursor;
use std::path::{Path, PathBuf};

use bytes::Bytes;
use tokio::io::AsyncRead;

use crate::error::EngineError;

/// Supplies install image bytes.
pub trait ContentSource: Send + Sync + 'static {
    /// Reader over the image bytes.
    type Reader: AsyncRead + Unpin + Send;

    /// Opens a reader positioned at the start of the image.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Content`] if the image cannot be opened.
    fn open(&self) -> impl Future<Output = Result<Self::Reader, EngineError>> + Send;
}

/// Image stored in a local file.
#[derive(Debug, Clone)]
pub struct FileContent {
    path: PathBuf,
}

impl FileContent {
    /// Image at `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Path of the image file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ContentSource for FileContent {
    type Reader = tokio::fs::File;

    async fn open(&self) -> Result<tokio::fs::File, EngineError> {
        tokio::fs::File::open(&self.path)
            .await
            .map_err(|e| EngineError::Content(format!("{}: {e}", self.path.display())))
    }
}

/// Image held in memory.
#[derive(Debug, Clone, Default)]
pub struct MemoryContent(pub Bytes);

impl ContentSource for MemoryContent {
    type Reader = Cursor<Bytes>;

    async fn open(&self) -> Result<Cursor<Bytes>, EngineError> {
        Ok(Cursor::new(self.0.clone()))
    }
}
