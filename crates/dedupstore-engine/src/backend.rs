//! Storage backends and named disk registry.
//!
//! A backend stores blobs under storage-relative paths. [`FilesystemBackend`]
//! keeps them in a local directory tree and publishes them under an optional
//! base URL. [`DiskRegistry`] resolves configured disk names to backends once
//! at startup.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};
use uuid::Uuid;

use dedupstore_core::defaults::HEALTH_CHECK_PATH;
use dedupstore_core::source::BoxedReader;
use dedupstore_core::{DiskKind, Error, Result, StoreConfig};

/// Blob storage contract.
///
/// Paths are storage-relative (`a9/99/a9993e...d89d.txt`). Writes of the same
/// path are idempotent: concurrent writers of identical content converge on
/// one blob.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Write bytes to `path`.
    async fn put(&self, path: &str, data: &[u8]) -> Result<()>;

    /// Copy a local file to `path` without loading it into memory.
    async fn put_file(&self, path: &str, local: &Path) -> Result<()>;

    /// Read the whole blob.
    async fn get(&self, path: &str) -> Result<Vec<u8>>;

    async fn exists(&self, path: &str) -> Result<bool>;

    /// Delete the blob. Deleting a missing blob is not an error.
    async fn delete(&self, path: &str) -> Result<()>;

    /// Blob size in bytes.
    async fn size(&self, path: &str) -> Result<u64>;

    /// MIME type guessed from the blob's extension.
    async fn mime_type(&self, path: &str) -> Result<Option<String>> {
        Ok(mime_guess::from_path(path)
            .first()
            .map(|m| m.essence_str().to_string()))
    }

    /// Public URL of the blob.
    ///
    /// Returns [`Error::Unsupported`] when the backend is not publicly served.
    fn url(&self, path: &str) -> Result<String>;

    /// Signed, expiring URL of the blob.
    ///
    /// Returns [`Error::Unsupported`] when the backend cannot sign URLs.
    async fn temporary_url(&self, _path: &str, _expires_in: Duration) -> Result<String> {
        Err(Error::Unsupported("temporary urls".into()))
    }

    /// Open a reader over the blob.
    async fn read_stream(&self, path: &str) -> Result<BoxedReader>;

    /// Absolute local path of the blob, for backends that live on this host.
    fn local_path(&self, _path: &str) -> Option<PathBuf> {
        None
    }

    /// Write/read/delete round trip proving the backend is usable.
    async fn validate(&self) -> Result<()>;
}

/// Filesystem storage backend.
pub struct FilesystemBackend {
    base_path: PathBuf,
    public_url: Option<String>,
}

impl FilesystemBackend {
    /// Create a new filesystem backend with the given base directory.
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
            public_url: None,
        }
    }

    /// Serve blobs under `url` (`{url}/{path}`).
    pub fn with_public_url(mut self, url: impl Into<String>) -> Self {
        self.public_url = Some(url.into().trim_end_matches('/').to_string());
        self
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    fn full_path(&self, path: &str) -> PathBuf {
        self.base_path.join(path)
    }

    /// Unique sibling temp path so concurrent writers never share a temp file.
    fn temp_path(full_path: &Path) -> PathBuf {
        let name = full_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        full_path.with_file_name(format!(".{}.{}.tmp", name, Uuid::new_v4().simple()))
    }

    async fn prepare_parent(full_path: &Path) -> Result<()> {
        if let Some(parent) = full_path.parent() {
            fs::create_dir_all(parent).await.map_err(|e| {
                warn!(parent = %parent.display(), error = %e, "filesystem: create_dir_all failed");
                Error::BackendWrite(format!("create_dir_all({}): {}", parent.display(), e))
            })?;
        }
        Ok(())
    }

    /// Move a finished temp file into place and fix its permissions.
    async fn commit(temp_path: &Path, full_path: &Path) -> Result<()> {
        if let Err(e) = fs::rename(temp_path, full_path).await {
            warn!(from = %temp_path.display(), to = %full_path.display(), error = %e, "filesystem: rename failed");
            let _ = fs::remove_file(temp_path).await;
            return Err(Error::BackendWrite(format!(
                "rename({}): {}",
                full_path.display(),
                e
            )));
        }

        // rw-r--r--, no execute
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(full_path, std::fs::Permissions::from_mode(0o644)).await?;
        }

        Ok(())
    }
}

#[async_trait]
impl StorageBackend for FilesystemBackend {
    async fn put(&self, path: &str, data: &[u8]) -> Result<()> {
        let full_path = self.full_path(path);
        debug!(storage_path = %path, full_path = %full_path.display(), size = data.len(), "filesystem: put");

        Self::prepare_parent(&full_path).await?;

        let temp_path = Self::temp_path(&full_path);
        let written: std::io::Result<()> = async {
            let mut file = fs::File::create(&temp_path).await?;
            file.write_all(data).await?;
            file.sync_all().await
        }
        .await;
        if let Err(e) = written {
            warn!(temp_path = %temp_path.display(), error = %e, "filesystem: write failed");
            let _ = fs::remove_file(&temp_path).await;
            return Err(Error::BackendWrite(format!("write({}): {}", path, e)));
        }

        Self::commit(&temp_path, &full_path).await
    }

    async fn put_file(&self, path: &str, local: &Path) -> Result<()> {
        let full_path = self.full_path(path);
        debug!(storage_path = %path, source = %local.display(), "filesystem: put_file");

        Self::prepare_parent(&full_path).await?;

        let temp_path = Self::temp_path(&full_path);
        let copied: std::io::Result<()> = async {
            fs::copy(local, &temp_path).await?;
            fs::File::open(&temp_path).await?.sync_all().await
        }
        .await;
        if let Err(e) = copied {
            warn!(source = %local.display(), error = %e, "filesystem: copy failed");
            let _ = fs::remove_file(&temp_path).await;
            return Err(Error::BackendWrite(format!("copy({}): {}", path, e)));
        }

        Self::commit(&temp_path, &full_path).await
    }

    async fn get(&self, path: &str) -> Result<Vec<u8>> {
        Ok(fs::read(self.full_path(path)).await?)
    }

    async fn exists(&self, path: &str) -> Result<bool> {
        Ok(fs::try_exists(self.full_path(path)).await?)
    }

    async fn delete(&self, path: &str) -> Result<()> {
        let full_path = self.full_path(path);
        match fs::remove_file(&full_path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => {
                warn!(full_path = %full_path.display(), error = %e, "filesystem: delete failed");
                Err(Error::BackendWrite(format!("delete({}): {}", path, e)))
            }
        }
    }

    async fn size(&self, path: &str) -> Result<u64> {
        Ok(fs::metadata(self.full_path(path)).await?.len())
    }

    fn url(&self, path: &str) -> Result<String> {
        match &self.public_url {
            Some(base) => Ok(format!("{}/{}", base, path)),
            None => Err(Error::Unsupported(format!(
                "disk at {} has no public url",
                self.base_path.display()
            ))),
        }
    }

    async fn read_stream(&self, path: &str) -> Result<BoxedReader> {
        Ok(Box::new(fs::File::open(self.full_path(path)).await?))
    }

    fn local_path(&self, path: &str) -> Option<PathBuf> {
        let full_path = self.full_path(path);
        if full_path.is_absolute() {
            Some(full_path)
        } else {
            std::env::current_dir().ok().map(|cwd| cwd.join(full_path))
        }
    }

    async fn validate(&self) -> Result<()> {
        let data = b"storage-health-check";

        self.put(HEALTH_CHECK_PATH, data).await?;

        let read_data = self.get(HEALTH_CHECK_PATH).await?;
        if read_data != data {
            return Err(Error::BackendWrite("read-back mismatch".into()));
        }

        self.delete(HEALTH_CHECK_PATH).await?;
        if let Some(dir) = self.full_path(HEALTH_CHECK_PATH).parent() {
            let _ = fs::remove_dir(dir).await;
        }

        Ok(())
    }
}

/// Named disks resolved from configuration.
#[derive(Clone)]
pub struct DiskRegistry {
    disks: BTreeMap<String, Arc<dyn StorageBackend>>,
    default_disk: String,
}

impl DiskRegistry {
    /// Registry with a single disk, which is also the default.
    pub fn single(name: impl Into<String>, backend: impl StorageBackend + 'static) -> Self {
        let name = name.into();
        let mut disks: BTreeMap<String, Arc<dyn StorageBackend>> = BTreeMap::new();
        disks.insert(name.clone(), Arc::new(backend));
        Self {
            disks,
            default_disk: name,
        }
    }

    /// Add (or replace) a named disk.
    pub fn with_disk(mut self, name: impl Into<String>, backend: Arc<dyn StorageBackend>) -> Self {
        self.disks.insert(name.into(), backend);
        self
    }

    /// Build every configured disk.
    pub fn from_config(config: &StoreConfig) -> Result<Self> {
        let mut disks: BTreeMap<String, Arc<dyn StorageBackend>> = BTreeMap::new();
        for (name, disk) in &config.storage.disks {
            let backend: Arc<dyn StorageBackend> = match disk.kind {
                DiskKind::Local => {
                    let mut fs_backend = FilesystemBackend::new(&disk.root);
                    if let Some(url) = &disk.url {
                        fs_backend = fs_backend.with_public_url(url);
                    }
                    Arc::new(fs_backend)
                }
            };
            debug!(disk = %name, kind = %disk.kind, root = %disk.root.display(), "Registered disk");
            disks.insert(name.clone(), backend);
        }

        if !disks.contains_key(&config.storage.default_disk) {
            return Err(Error::Config(format!(
                "default disk '{}' is not configured",
                config.storage.default_disk
            )));
        }

        Ok(Self {
            disks,
            default_disk: config.storage.default_disk.clone(),
        })
    }

    pub fn default_disk(&self) -> &str {
        &self.default_disk
    }

    /// Resolve a disk by name.
    pub fn get(&self, name: &str) -> Result<Arc<dyn StorageBackend>> {
        self.disks
            .get(name)
            .cloned()
            .ok_or_else(|| Error::Config(format!("unknown disk '{}'", name)))
    }

    /// Resolve an optional override, falling back to the default disk.
    pub fn resolve(&self, name: Option<&str>) -> Result<(String, Arc<dyn StorageBackend>)> {
        let name = name.unwrap_or(&self.default_disk);
        Ok((name.to_string(), self.get(name)?))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.disks.keys().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use tokio::io::AsyncReadExt;

    #[tokio::test]
    async fn test_put_get_delete() {
        let dir = TempDir::new().unwrap();
        let backend = FilesystemBackend::new(dir.path());

        backend.put("ab/cd/abcd.txt", b"hello").await.unwrap();
        assert!(backend.exists("ab/cd/abcd.txt").await.unwrap());
        assert_eq!(backend.get("ab/cd/abcd.txt").await.unwrap(), b"hello");
        assert_eq!(backend.size("ab/cd/abcd.txt").await.unwrap(), 5);
        assert_eq!(
            backend.mime_type("ab/cd/abcd.txt").await.unwrap().as_deref(),
            Some("text/plain")
        );

        backend.delete("ab/cd/abcd.txt").await.unwrap();
        assert!(!backend.exists("ab/cd/abcd.txt").await.unwrap());
        // deleting again is not an error
        backend.delete("ab/cd/abcd.txt").await.unwrap();
    }

    #[tokio::test]
    async fn test_put_leaves_no_temp_files() {
        let dir = TempDir::new().unwrap();
        let backend = FilesystemBackend::new(dir.path());
        backend.put("x/y/file.bin", b"data").await.unwrap();
        backend.put("x/y/file.bin", b"data").await.unwrap();

        let mut entries = fs::read_dir(dir.path().join("x/y")).await.unwrap();
        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await.unwrap() {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
        assert_eq!(names, vec!["file.bin".to_string()]);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_put_sets_permissions() {
        use std::os::unix::fs::PermissionsExt;
        let dir = TempDir::new().unwrap();
        let backend = FilesystemBackend::new(dir.path());
        backend.put("p.bin", b"x").await.unwrap();
        let mode = fs::metadata(dir.path().join("p.bin"))
            .await
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(mode & 0o777, 0o644);
    }

    #[tokio::test]
    async fn test_put_file_and_read_stream() {
        let dir = TempDir::new().unwrap();
        let src = dir.path().join("source.dat");
        fs::write(&src, b"streamed").await.unwrap();

        let backend = FilesystemBackend::new(dir.path().join("store"));
        backend.put_file("s/t/source.dat", &src).await.unwrap();

        let mut reader = backend.read_stream("s/t/source.dat").await.unwrap();
        let mut buf = Vec::new();
        reader.read_to_end(&mut buf).await.unwrap();
        assert_eq!(buf, b"streamed");
        assert!(src.exists(), "put_file must copy, not move");
    }

    #[tokio::test]
    async fn test_url_requires_public_url() {
        let backend = FilesystemBackend::new("/srv/files");
        assert!(matches!(backend.url("a/b.txt"), Err(Error::Unsupported(_))));

        let backend = backend.with_public_url("https://cdn.example.com/files/");
        assert_eq!(
            backend.url("a/b.txt").unwrap(),
            "https://cdn.example.com/files/a/b.txt"
        );
        assert!(matches!(
            backend.temporary_url("a/b.txt", Duration::from_secs(60)).await,
            Err(Error::Unsupported(_))
        ));
    }

    #[tokio::test]
    async fn test_validate_round_trip() {
        let dir = TempDir::new().unwrap();
        let backend = FilesystemBackend::new(dir.path());
        backend.validate().await.unwrap();
        assert!(!dir.path().join(HEALTH_CHECK_PATH).exists());
    }

    #[test]
    fn test_local_path_is_absolute() {
        let backend = FilesystemBackend::new("relative/root");
        let path = backend.local_path("a/b.txt").unwrap();
        assert!(path.is_absolute());
        assert!(path.ends_with("relative/root/a/b.txt"));
    }

    #[test]
    fn test_registry_resolution() {
        let registry = DiskRegistry::single("public", FilesystemBackend::new("/srv/public"))
            .with_disk("private", Arc::new(FilesystemBackend::new("/srv/private")));

        assert_eq!(registry.default_disk(), "public");
        assert_eq!(registry.resolve(None).unwrap().0, "public");
        assert_eq!(registry.resolve(Some("private")).unwrap().0, "private");
        assert!(matches!(registry.get("s3"), Err(Error::Config(_))));
        assert_eq!(registry.names().collect::<Vec<_>>(), vec!["private", "public"]);
    }

    #[test]
    fn test_registry_from_config() {
        let config = StoreConfig::from_toml_str(
            r#"
[database]
url = "postgres://localhost/x"

[storage]
default_disk = "local"

[storage.disks.local]
root = "/tmp/dedupstore-local"
url = "http://localhost/files"
"#,
        )
        .unwrap();
        let registry = DiskRegistry::from_config(&config).unwrap();
        assert_eq!(
            registry.get("local").unwrap().url("a.txt").unwrap(),
            "http://localhost/files/a.txt"
        );
    }
}
