//! Directory scanning for legacy trees.
//!
//! Hidden entries (dotfiles and dot-directories) are never visited. Symlinks
//! are reported as symlinks and never followed.

use std::path::{Path, PathBuf};

use walkdir::{DirEntry, WalkDir};

use dedupstore_core::defaults::BACKUP_SUFFIX;
use dedupstore_core::{Error, Result};
use tracing::warn;

/// Kind of a scanned entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Symlink,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScannedEntry {
    pub path: PathBuf,
    pub kind: EntryKind,
}

/// `<path>.backup`
pub fn backup_path_for(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(BACKUP_SUFFIX);
    PathBuf::from(name)
}

pub fn is_backup(path: &Path) -> bool {
    path.file_name()
        .map(|n| n.to_string_lossy().ends_with(BACKUP_SUFFIX))
        .unwrap_or(false)
}

/// The original path a backup file belongs to.
pub fn original_for_backup(path: &Path) -> Option<PathBuf> {
    let s = path.to_str()?;
    s.strip_suffix(BACKUP_SUFFIX).map(PathBuf::from)
}

fn is_hidden(entry: &DirEntry) -> bool {
    entry.depth() > 0
        && entry
            .file_name()
            .to_str()
            .map(|s| s.starts_with('.'))
            .unwrap_or(false)
}

fn ensure_dir(base: &Path) -> Result<()> {
    if !base.is_dir() {
        return Err(Error::InvalidInput(format!(
            "{} is not a directory",
            base.display()
        )));
    }
    Ok(())
}

fn walk(base: &Path) -> Vec<ScannedEntry> {
    let mut entries = Vec::new();
    for entry in WalkDir::new(base)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| !is_hidden(e))
    {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!(subsystem = "engine", component = "scan", error = %e, "Skipping unreadable entry");
                continue;
            }
        };
        let file_type = entry.file_type();
        let kind = if file_type.is_symlink() {
            EntryKind::Symlink
        } else if file_type.is_file() {
            EntryKind::File
        } else {
            continue;
        };
        entries.push(ScannedEntry {
            path: entry.into_path(),
            kind,
        });
    }
    entries
}

async fn walk_blocking(base: &Path) -> Result<Vec<ScannedEntry>> {
    ensure_dir(base)?;
    let base = base.to_path_buf();
    tokio::task::spawn_blocking(move || walk(&base))
        .await
        .map_err(|e| Error::Internal(format!("directory scan panicked: {}", e)))
}

/// Regular files eligible for migration: no symlinks, no hidden entries, no backups.
pub async fn discover_files(base: &Path) -> Result<Vec<PathBuf>> {
    Ok(walk_blocking(base)
        .await?
        .into_iter()
        .filter(|e| e.kind == EntryKind::File && !is_backup(&e.path))
        .map(|e| e.path)
        .collect())
}

/// Every non-hidden file and symlink, backups included.
pub async fn discover_entries(base: &Path) -> Result<Vec<ScannedEntry>> {
    walk_blocking(base).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_discover_skips_hidden_backups_and_symlinks() {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        std::fs::create_dir_all(root.join("sub")).unwrap();
        std::fs::create_dir_all(root.join(".git")).unwrap();
        std::fs::write(root.join("a.txt"), b"a").unwrap();
        std::fs::write(root.join("sub/b.txt"), b"b").unwrap();
        std::fs::write(root.join(".hidden"), b"h").unwrap();
        std::fs::write(root.join(".git/config"), b"g").unwrap();
        std::fs::write(root.join("c.txt.backup"), b"c").unwrap();
        #[cfg(unix)]
        std::os::unix::fs::symlink(root.join("a.txt"), root.join("link.txt")).unwrap();

        let files = discover_files(root).await.unwrap();
        assert_eq!(files, vec![root.join("a.txt"), root.join("sub/b.txt")]);

        let entries = discover_entries(root).await.unwrap();
        assert!(entries.iter().any(|e| e.path == root.join("c.txt.backup")));
        #[cfg(unix)]
        assert!(entries
            .iter()
            .any(|e| e.path == root.join("link.txt") && e.kind == EntryKind::Symlink));
    }

    #[tokio::test]
    async fn test_discover_rejects_non_directory() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("f");
        std::fs::write(&file, b"x").unwrap();
        assert!(matches!(
            discover_files(&file).await,
            Err(Error::InvalidInput(_))
        ));
        assert!(discover_files(&dir.path().join("missing")).await.is_err());
    }

    #[test]
    fn test_backup_paths() {
        let path = Path::new("/srv/legacy/a.txt");
        let backup = backup_path_for(path);
        assert_eq!(backup, PathBuf::from("/srv/legacy/a.txt.backup"));
        assert!(is_backup(&backup));
        assert!(!is_backup(path));
        assert_eq!(original_for_backup(&backup).as_deref(), Some(path));
    }
}
