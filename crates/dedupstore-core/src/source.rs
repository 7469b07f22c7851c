//! File source adapters.
//!
//! Every input the engine accepts (raw bytes, a local path, a one-shot stream,
//! an uploaded file) is normalized behind [`FileSource`].

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::Mutex;

use crate::mime::extension_of;
use crate::{Error, Result};

/// Owned, sendable async byte reader.
pub type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;

/// Uniform capabilities over heterogeneous file inputs.
#[async_trait]
pub trait FileSource: Send + Sync {
    /// Read the entire content into memory.
    async fn content(&self) -> Result<Vec<u8>>;

    /// Open a reader over the content.
    async fn open(&self) -> Result<BoxedReader>;

    /// Size in bytes, when known up front.
    async fn size(&self) -> Result<Option<u64>>;

    /// MIME type declared by the source, if any.
    fn mime_type(&self) -> Option<String>;

    /// Name the content arrived under.
    fn original_name(&self) -> Option<String>;

    /// Local filesystem path, when the content already lives on disk.
    fn pathname(&self) -> Option<&Path>;

    /// Whether the source can be read at all.
    async fn is_valid(&self) -> bool;

    /// Lowercased extension of the original name.
    fn extension(&self) -> Option<String> {
        self.original_name().and_then(|name| extension_of(&name))
    }
}

// =============================================================================
// RAW CONTENT
// =============================================================================

/// In-memory bytes. Empty content is invalid.
#[derive(Debug, Clone)]
pub struct ContentSource {
    data: Vec<u8>,
    name: Option<String>,
    mime: Option<String>,
}

impl ContentSource {
    pub fn new(data: impl Into<Vec<u8>>) -> Self {
        Self {
            data: data.into(),
            name: None,
            mime: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_mime(mut self, mime: impl Into<String>) -> Self {
        self.mime = Some(mime.into());
        self
    }
}

#[async_trait]
impl FileSource for ContentSource {
    async fn content(&self) -> Result<Vec<u8>> {
        Ok(self.data.clone())
    }

    async fn open(&self) -> Result<BoxedReader> {
        Ok(Box::new(std::io::Cursor::new(self.data.clone())))
    }

    async fn size(&self) -> Result<Option<u64>> {
        Ok(Some(self.data.len() as u64))
    }

    fn mime_type(&self) -> Option<String> {
        self.mime.clone()
    }

    fn original_name(&self) -> Option<String> {
        self.name.clone()
    }

    fn pathname(&self) -> Option<&Path> {
        None
    }

    async fn is_valid(&self) -> bool {
        !self.data.is_empty()
    }
}

// =============================================================================
// LOCAL FILE
// =============================================================================

/// A regular file on the local filesystem.
#[derive(Debug, Clone)]
pub struct LocalFileSource {
    path: PathBuf,
    name: Option<String>,
    mime: Option<String>,
}

impl LocalFileSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            name: None,
            mime: None,
        }
    }

    /// Override the name reported instead of the path's file name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_mime(mut self, mime: impl Into<String>) -> Self {
        self.mime = Some(mime.into());
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl FileSource for LocalFileSource {
    async fn content(&self) -> Result<Vec<u8>> {
        Ok(tokio::fs::read(&self.path).await?)
    }

    async fn open(&self) -> Result<BoxedReader> {
        Ok(Box::new(tokio::fs::File::open(&self.path).await?))
    }

    async fn size(&self) -> Result<Option<u64>> {
        Ok(Some(tokio::fs::metadata(&self.path).await?.len()))
    }

    fn mime_type(&self) -> Option<String> {
        self.mime.clone()
    }

    fn original_name(&self) -> Option<String> {
        self.name.clone().or_else(|| {
            self.path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
        })
    }

    fn pathname(&self) -> Option<&Path> {
        Some(&self.path)
    }

    async fn is_valid(&self) -> bool {
        tokio::fs::metadata(&self.path)
            .await
            .map(|m| m.is_file())
            .unwrap_or(false)
    }
}

// =============================================================================
// STREAM
// =============================================================================

/// A one-shot async stream. The first read consumes it; later reads fail and
/// the source reports itself invalid.
pub struct StreamSource {
    reader: Mutex<Option<BoxedReader>>,
    size: Option<u64>,
    name: Option<String>,
    mime: Option<String>,
}

impl StreamSource {
    pub fn new(reader: impl AsyncRead + Send + Unpin + 'static) -> Self {
        Self {
            reader: Mutex::new(Some(Box::new(reader))),
            size: None,
            name: None,
            mime: None,
        }
    }

    /// Declare the stream length so small streams can be hashed in buffer mode.
    pub fn with_size(mut self, size: u64) -> Self {
        self.size = Some(size);
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_mime(mut self, mime: impl Into<String>) -> Self {
        self.mime = Some(mime.into());
        self
    }

    async fn take(&self) -> Result<BoxedReader> {
        self.reader
            .lock()
            .await
            .take()
            .ok_or_else(|| Error::InvalidSource("stream already consumed".into()))
    }
}

impl std::fmt::Debug for StreamSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamSource")
            .field("size", &self.size)
            .field("name", &self.name)
            .field("mime", &self.mime)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl FileSource for StreamSource {
    async fn content(&self) -> Result<Vec<u8>> {
        let mut reader = self.take().await?;
        let mut data = Vec::new();
        reader.read_to_end(&mut data).await?;
        Ok(data)
    }

    async fn open(&self) -> Result<BoxedReader> {
        self.take().await
    }

    async fn size(&self) -> Result<Option<u64>> {
        Ok(self.size)
    }

    fn mime_type(&self) -> Option<String> {
        self.mime.clone()
    }

    fn original_name(&self) -> Option<String> {
        self.name.clone()
    }

    fn pathname(&self) -> Option<&Path> {
        None
    }

    async fn is_valid(&self) -> bool {
        self.reader.lock().await.is_some()
    }
}

// =============================================================================
// UPLOADED FILE
// =============================================================================

/// A file received over HTTP and spooled to a local path.
///
/// Name and MIME type come from the client; the caller keeps the spooled file
/// alive for as long as the source is in use.
#[derive(Debug, Clone)]
pub struct UploadedFileSource {
    inner: LocalFileSource,
    client_name: String,
    client_mime: Option<String>,
}

impl UploadedFileSource {
    pub fn new(
        path: impl Into<PathBuf>,
        client_name: impl Into<String>,
        client_mime: Option<String>,
    ) -> Self {
        Self {
            inner: LocalFileSource::new(path),
            client_name: client_name.into(),
            client_mime,
        }
    }
}

#[async_trait]
impl FileSource for UploadedFileSource {
    async fn content(&self) -> Result<Vec<u8>> {
        self.inner.content().await
    }

    async fn open(&self) -> Result<BoxedReader> {
        self.inner.open().await
    }

    async fn size(&self) -> Result<Option<u64>> {
        self.inner.size().await
    }

    fn mime_type(&self) -> Option<String> {
        self.client_mime.clone()
    }

    fn original_name(&self) -> Option<String> {
        Some(self.client_name.clone())
    }

    fn pathname(&self) -> Option<&Path> {
        self.inner.pathname()
    }

    async fn is_valid(&self) -> bool {
        self.inner.is_valid().await
    }
}
