//! The deduplicating storage engine.
//!
//! Every store hashes the source first. Content already present is never
//! written again: the caller's owner is linked to the existing object. New
//! content is written to the selected disk under a path derived from its hash
//! and recorded as a stored object.
//!
//! ## Example
//!
//! ```rust,ignore
//! let engine = StorageEngine::new(db.object_repository(), db.link_repository(), disks, options);
//! let owner = OwnerRef::new("post", "42");
//! let link = engine.store_content(b"abc".to_vec(), Some("abc.txt"), &owner, &StoreOptions::default()).await?;
//! assert_eq!(link.hash, "a9993e364706816aba3e25717850c26c9cd0d89d");
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::io::AsyncReadExt;
use tracing::{debug, info, warn};

use dedupstore_core::defaults::{MIME_SNIFF_BYTES, STREAM_THRESHOLD_BYTES};
use dedupstore_core::paths::filename_for;
use dedupstore_core::source::BoxedReader;
use dedupstore_core::{
    detect_content_type, ContentHasher, ContentHashes, ContentSource, Error, FileSource,
    InsertOutcome, Link, LinkAttributes, LinkRepository, LocalFileSource, NewStoredObject,
    ObjectRepository, OwnerRef, PathPolicy, ProcessingStatus, Result, StoreConfig, StoreOptions,
    StoredObject, StreamSource, UploadedFileSource,
};

use crate::backend::{DiskRegistry, StorageBackend};
use crate::registry::LinkRegistry;

/// Tunables for hashing and path generation.
#[derive(Debug, Clone)]
pub struct EngineOptions {
    pub path_policy: PathPolicy,
    /// Sources larger than this (or of unknown size) use streaming mode.
    pub stream_threshold: u64,
    pub chunk_size: usize,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            path_policy: PathPolicy::HashBased,
            stream_threshold: STREAM_THRESHOLD_BYTES,
            chunk_size: dedupstore_core::defaults::HASH_CHUNK_SIZE,
        }
    }
}

impl EngineOptions {
    pub fn from_config(config: &StoreConfig) -> Self {
        Self {
            path_policy: config.storage.path_policy,
            stream_threshold: config.hashing.stream_threshold,
            chunk_size: config.hashing.chunk_size,
        }
    }
}

/// A readable blob plus the metadata needed to serve it.
pub struct Download {
    pub hash: String,
    pub reader: BoxedReader,
    /// Name to present to the client: the original upload name when known.
    pub filename: String,
    pub mime_type: String,
    pub size: u64,
}

impl std::fmt::Debug for Download {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Download")
            .field("hash", &self.hash)
            .field("filename", &self.filename)
            .field("mime_type", &self.mime_type)
            .field("size", &self.size)
            .finish_non_exhaustive()
    }
}

/// Content staged for writing after hashing.
enum Staged {
    /// Small content held in memory.
    Buffer(Vec<u8>),
    /// Content already on local disk; copied directly by the backend.
    Local(PathBuf),
    /// One-shot stream spooled to a temp file; removed on drop.
    Spooled(tempfile::TempPath),
}

impl Staged {
    fn mode(&self) -> &'static str {
        match self {
            Self::Buffer(_) => "buffer",
            Self::Local(_) => "stream_local",
            Self::Spooled(_) => "stream_spooled",
        }
    }

    async fn head(&self) -> Result<Vec<u8>> {
        match self {
            Self::Buffer(data) => Ok(data[..data.len().min(MIME_SNIFF_BYTES)].to_vec()),
            Self::Local(path) => read_head(path).await,
            Self::Spooled(path) => read_head(path).await,
        }
    }

    async fn write_to(&self, backend: &dyn StorageBackend, path: &str) -> Result<()> {
        match self {
            Self::Buffer(data) => backend.put(path, data).await,
            Self::Local(local) => backend.put_file(path, local).await,
            Self::Spooled(local) => backend.put_file(path, local).await,
        }
    }
}

pub(crate) async fn read_head(path: &Path) -> Result<Vec<u8>> {
    let file = tokio::fs::File::open(path).await?;
    let mut head = Vec::with_capacity(MIME_SNIFF_BYTES);
    file.take(MIME_SNIFF_BYTES as u64)
        .read_to_end(&mut head)
        .await?;
    Ok(head)
}

/// Deduplicating store over a set of named disks.
pub struct StorageEngine {
    objects: Arc<dyn ObjectRepository>,
    links: LinkRegistry,
    disks: DiskRegistry,
    hasher: ContentHasher,
    options: EngineOptions,
}

impl StorageEngine {
    pub fn new(
        objects: Arc<dyn ObjectRepository>,
        links: Arc<dyn LinkRepository>,
        disks: DiskRegistry,
        options: EngineOptions,
    ) -> Self {
        Self {
            objects,
            links: LinkRegistry::new(links),
            disks,
            hasher: ContentHasher::new(options.chunk_size),
            options,
        }
    }

    pub fn objects(&self) -> &Arc<dyn ObjectRepository> {
        &self.objects
    }

    pub fn links(&self) -> &LinkRegistry {
        &self.links
    }

    pub fn disks(&self) -> &DiskRegistry {
        &self.disks
    }

    pub fn hasher(&self) -> &ContentHasher {
        &self.hasher
    }

    pub fn options(&self) -> &EngineOptions {
        &self.options
    }

    // =========================================================================
    // STORE
    // =========================================================================

    /// Store content and link it to `owner`.
    ///
    /// Link metadata from `options` is merged over the defaults
    /// (`status = completed`, `original_name` = the source's name).
    pub async fn store(
        &self,
        source: &dyn FileSource,
        owner: &OwnerRef,
        options: &StoreOptions,
    ) -> Result<Link> {
        let start = Instant::now();
        let object = self.ingest(source, options.disk.as_deref()).await?;

        let attrs = LinkAttributes {
            status: Some(options.link.status.unwrap_or(ProcessingStatus::Completed)),
            original_name: options
                .link
                .original_name
                .clone()
                .or_else(|| source.original_name()),
        };
        let link = self
            .links
            .create_or_update(&object.hash, owner, &attrs)
            .await?;

        info!(
            subsystem = "engine",
            op = "store",
            hash = %object.hash,
            owner_type = %owner.owner_type,
            owner_id = %owner.owner_id,
            link_id = link.id,
            duration_ms = start.elapsed().as_millis() as u64,
            "Stored content"
        );
        Ok(link)
    }

    pub async fn store_content(
        &self,
        data: Vec<u8>,
        name: Option<&str>,
        owner: &OwnerRef,
        options: &StoreOptions,
    ) -> Result<Link> {
        let mut source = ContentSource::new(data);
        if let Some(name) = name {
            source = source.with_name(name);
        }
        self.store(&source, owner, options).await
    }

    pub async fn store_path(
        &self,
        path: impl Into<PathBuf>,
        owner: &OwnerRef,
        options: &StoreOptions,
    ) -> Result<Link> {
        self.store(&LocalFileSource::new(path), owner, options).await
    }

    pub async fn store_stream(
        &self,
        reader: impl tokio::io::AsyncRead + Send + Unpin + 'static,
        name: Option<&str>,
        size: Option<u64>,
        owner: &OwnerRef,
        options: &StoreOptions,
    ) -> Result<Link> {
        let mut source = StreamSource::new(reader);
        if let Some(name) = name {
            source = source.with_name(name);
        }
        if let Some(size) = size {
            source = source.with_size(size);
        }
        self.store(&source, owner, options).await
    }

    pub async fn store_uploaded(
        &self,
        path: impl Into<PathBuf>,
        client_name: &str,
        client_mime: Option<String>,
        owner: &OwnerRef,
        options: &StoreOptions,
    ) -> Result<Link> {
        let source = UploadedFileSource::new(path, client_name, client_mime);
        self.store(&source, owner, options).await
    }

    /// Store several sources for one owner. A failing item does not affect the others.
    pub async fn store_batch(
        &self,
        sources: &[Box<dyn FileSource>],
        owner: &OwnerRef,
        options: &StoreOptions,
    ) -> Vec<Result<Link>> {
        let mut results = Vec::with_capacity(sources.len());
        for (index, source) in sources.iter().enumerate() {
            let result = self.store(source.as_ref(), owner, options).await;
            if let Err(ref e) = result {
                warn!(
                    subsystem = "engine",
                    op = "store_batch",
                    index,
                    error = %e,
                    "Batch item failed"
                );
            }
            results.push(result);
        }
        results
    }

    /// Hash `source` and make sure its content exists as a stored object.
    ///
    /// Returns the existing object when the hash is already known (no backend
    /// write). Otherwise writes the blob to `disk` (default disk when `None`)
    /// and inserts the record with status `completed`.
    pub async fn ingest(&self, source: &dyn FileSource, disk: Option<&str>) -> Result<StoredObject> {
        if !source.is_valid().await {
            return Err(Error::InvalidSource(match source.original_name() {
                Some(name) => format!("'{}' is not readable or empty", name),
                None => "source is not readable or empty".to_string(),
            }));
        }
        let (disk_name, backend) = self.disks.resolve(disk)?;

        let (staged, hashes, size) = self.stage(source).await?;
        debug!(
            subsystem = "engine",
            op = "hash",
            hash = %hashes.sha1,
            size_bytes = size,
            mode = staged.mode(),
            "Hashed source"
        );

        if let Some(existing) = self.objects.find(&hashes.sha1).await? {
            debug!(
                subsystem = "engine",
                op = "ingest",
                hash = %existing.hash,
                deduplicated = true,
                "Content already stored"
            );
            return Ok(existing);
        }

        let extension = source.extension();
        let path = self.options.path_policy.generate(
            &hashes.sha1,
            extension.as_deref(),
            Utc::now().date_naive(),
        );
        let mime_type = detect_content_type(
            source.mime_type().as_deref(),
            &staged.head().await?,
            source.original_name().as_deref(),
        );

        staged.write_to(backend.as_ref(), &path).await?;

        let inserted = self
            .objects
            .insert(NewStoredObject {
                hash: hashes.sha1.clone(),
                md5: Some(hashes.md5.clone()),
                filename: filename_for(&hashes.sha1, extension.as_deref()),
                path: path.clone(),
                mime_type,
                size: size as i64,
                status: ProcessingStatus::Completed,
                disk: disk_name.clone(),
                original_name: source.original_name(),
            })
            .await;
        let outcome = match inserted {
            Ok(outcome) => outcome,
            Err(e) => {
                self.discard_unrecorded_blob(backend.as_ref(), &hashes.sha1, &disk_name, &path)
                    .await;
                return Err(e);
            }
        };

        match outcome {
            InsertOutcome::Inserted(object) => {
                info!(
                    subsystem = "engine",
                    op = "ingest",
                    hash = %object.hash,
                    disk = %disk_name,
                    storage_path = %path,
                    size_bytes = size,
                    deduplicated = false,
                    "Stored new object"
                );
                Ok(object)
            }
            InsertOutcome::Existing(object) => {
                // Lost a race with a concurrent writer of the same content.
                if object.path != path || object.disk != disk_name {
                    if let Err(e) = backend.delete(&path).await {
                        warn!(hash = %object.hash, storage_path = %path, error = %e, "Failed to remove redundant blob");
                    }
                }
                debug!(hash = %object.hash, "Concurrent insert resolved to existing object");
                Ok(object)
            }
        }
    }

    /// Remove a blob whose object record could not be written, unless a
    /// concurrent writer has recorded an object at the same location.
    async fn discard_unrecorded_blob(
        &self,
        backend: &dyn StorageBackend,
        hash: &str,
        disk: &str,
        path: &str,
    ) {
        match self.objects.find(hash).await {
            Ok(Some(object)) if object.path == path && object.disk == disk => {
                debug!(hash, storage_path = %path, "Blob belongs to a recorded object, keeping it");
                return;
            }
            Ok(_) => {}
            Err(e) => {
                warn!(hash, storage_path = %path, error = %e, "Could not recheck object, keeping blob");
                return;
            }
        }
        if let Err(e) = backend.delete(path).await {
            warn!(hash, storage_path = %path, error = %e, "Failed to remove unrecorded blob");
        }
    }

    /// Read and hash the source, choosing buffer or streaming mode by size.
    async fn stage(&self, source: &dyn FileSource) -> Result<(Staged, ContentHashes, u64)> {
        match source.size().await? {
            Some(size) if size <= self.options.stream_threshold => {
                let data = source.content().await?;
                let hashes = ContentHasher::hash_bytes(&data);
                let len = data.len() as u64;
                Ok((Staged::Buffer(data), hashes, len))
            }
            _ => {
                if let Some(path) = source.pathname() {
                    let (hashes, len) = self.hasher.hash_file(path).await?;
                    return Ok((Staged::Local(path.to_path_buf()), hashes, len));
                }

                let (spool, spool_path) = tempfile::NamedTempFile::new()?.into_parts();
                let mut spool = tokio::fs::File::from_std(spool);
                let mut reader = source.open().await?;
                let (hashes, len) = self
                    .hasher
                    .hash_reader_into(&mut reader, &mut spool)
                    .await?;
                Ok((Staged::Spooled(spool_path), hashes, len))
            }
        }
    }

    // =========================================================================
    // LINKS
    // =========================================================================

    /// Link an existing object to `owner`. Returns `None` when no object has this hash.
    pub async fn attach(
        &self,
        hash: &str,
        owner: &OwnerRef,
        attrs: &LinkAttributes,
    ) -> Result<Option<Link>> {
        if !self.objects.exists(hash).await? {
            return Ok(None);
        }
        let link = self.links.create_or_update(hash, owner, attrs).await?;
        debug!(subsystem = "engine", op = "attach", hash = %hash, owner = %owner, "Attached");
        Ok(Some(link))
    }

    /// Remove the link between `hash` and `owner`.
    ///
    /// When that was the last link, the object record and its blob are
    /// deleted. Returns whether a link was removed.
    pub async fn detach(&self, hash: &str, owner: &OwnerRef) -> Result<bool> {
        if !self.links.remove(hash, owner).await? {
            return Ok(false);
        }

        if let Some(object) = self.objects.delete_if_unreferenced(hash).await? {
            if let Err(e) = self.delete_blob(&object).await {
                warn!(
                    subsystem = "engine",
                    op = "detach",
                    hash = %hash,
                    error = %e,
                    "Object record removed but blob delete failed"
                );
            } else {
                info!(subsystem = "engine", op = "detach", hash = %hash, "Last link removed, object deleted");
            }
        }
        Ok(true)
    }

    /// Delete an object.
    ///
    /// Without `force`, deletes only when no links remain. With `force`,
    /// removes the blob, every link, and the record. Returns false when the
    /// object is absent or (without `force`) still linked.
    pub async fn delete(&self, hash: &str, force: bool) -> Result<bool> {
        let Some(object) = self.objects.find(hash).await? else {
            return Ok(false);
        };

        if force {
            self.delete_blob(&object).await?;
            let links = self.links.remove_all(hash).await?;
            self.objects.delete(hash).await?;
            info!(subsystem = "engine", op = "delete", hash = %hash, links, force, "Force-deleted object");
            return Ok(true);
        }

        match self.objects.delete_if_unreferenced(hash).await? {
            Some(object) => {
                self.delete_blob(&object).await?;
                info!(subsystem = "engine", op = "delete", hash = %hash, "Deleted unreferenced object");
                Ok(true)
            }
            None => {
                debug!(subsystem = "engine", op = "delete", hash = %hash, "Object still linked, not deleted");
                Ok(false)
            }
        }
    }

    async fn delete_blob(&self, object: &StoredObject) -> Result<()> {
        self.disks.get(&object.disk)?.delete(&object.path).await
    }

    // =========================================================================
    // LOOKUP & DOWNLOAD
    // =========================================================================

    pub async fn exists(&self, hash: &str) -> Result<bool> {
        self.objects.exists(hash).await
    }

    pub async fn find(&self, hash: &str) -> Result<Option<StoredObject>> {
        self.objects.find(hash).await
    }

    /// Public URL of an object.
    ///
    /// `None` when the object is absent or its disk is not publicly served.
    pub async fn get_url(&self, hash: &str) -> Result<Option<String>> {
        let Some(object) = self.objects.find(hash).await? else {
            return Ok(None);
        };
        self.url_for(&object)
    }

    /// URL for an already-loaded object.
    pub fn url_for(&self, object: &StoredObject) -> Result<Option<String>> {
        match self.disks.get(&object.disk)?.url(&object.path) {
            Ok(url) => Ok(Some(url)),
            Err(Error::Unsupported(reason)) => {
                debug!(hash = %object.hash, disk = %object.disk, reason = %reason, "No public url");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Expiring URL of an object, falling back to the permanent URL when the
    /// disk cannot sign URLs.
    pub async fn get_temporary_url(&self, hash: &str, expires_in: Duration) -> Result<Option<String>> {
        let Some(object) = self.objects.find(hash).await? else {
            return Ok(None);
        };
        let backend = self.disks.get(&object.disk)?;
        match backend.temporary_url(&object.path, expires_in).await {
            Ok(url) => Ok(Some(url)),
            Err(Error::Unsupported(_)) => self.url_for(&object),
            Err(e) => Err(e),
        }
    }

    /// Open an object's blob for download. `None` when the object is absent.
    pub async fn stream_download(&self, hash: &str) -> Result<Option<Download>> {
        let Some(object) = self.objects.find(hash).await? else {
            return Ok(None);
        };
        let backend = self.disks.get(&object.disk)?;
        let reader = backend.read_stream(&object.path).await?;
        let size = match backend.size(&object.path).await {
            Ok(size) => size,
            Err(_) => object.size.max(0) as u64,
        };

        Ok(Some(Download {
            filename: object
                .original_name
                .clone()
                .unwrap_or_else(|| object.filename.clone()),
            mime_type: object.mime_type.clone(),
            hash: object.hash,
            reader,
            size,
        }))
    }
}
