//! Duplicate analysis of a directory, without touching the store.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{info, warn};

use dedupstore_core::{ContentHasher, Result};

use crate::scan::discover_files;

/// Files sharing one content hash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DuplicateGroup {
    pub hash: String,
    /// Size of one copy.
    pub size: u64,
    pub paths: Vec<PathBuf>,
}

impl DuplicateGroup {
    /// Bytes freed by keeping a single copy.
    pub fn savings(&self) -> u64 {
        self.size * (self.paths.len() as u64).saturating_sub(1)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DuplicateAnalysis {
    pub total_files: u64,
    pub total_bytes: u64,
    /// Files in groups of two or more, every copy counted.
    pub duplicate_files: u64,
    pub duplicate_bytes: u64,
    pub potential_savings: u64,
    /// Files that could not be read.
    pub unreadable: u64,
    /// Largest savings first.
    pub groups: Vec<DuplicateGroup>,
}

impl DuplicateAnalysis {
    /// Savings as a percentage of all analysed bytes.
    pub fn savings_percent(&self) -> f64 {
        if self.total_bytes == 0 {
            return 0.0;
        }
        self.potential_savings as f64 / self.total_bytes as f64 * 100.0
    }
}

/// Hash every regular file under `base` and group identical content.
pub async fn analyse_directory(base: &Path, hasher: &ContentHasher) -> Result<DuplicateAnalysis> {
    let files = discover_files(base).await?;
    let mut analysis = DuplicateAnalysis::default();
    let mut by_hash: HashMap<String, DuplicateGroup> = HashMap::new();

    for path in files {
        let (hashes, size) = match hasher.hash_file(&path).await {
            Ok(result) => result,
            Err(e) => {
                warn!(file_path = %path.display(), error = %e, "Skipping unreadable file");
                analysis.unreadable += 1;
                continue;
            }
        };
        analysis.total_files += 1;
        analysis.total_bytes += size;
        by_hash
            .entry(hashes.sha1.clone())
            .or_insert_with(|| DuplicateGroup {
                hash: hashes.sha1,
                size,
                paths: Vec::new(),
            })
            .paths
            .push(path);
    }

    let mut groups: Vec<DuplicateGroup> = by_hash
        .into_values()
        .filter(|group| group.paths.len() > 1)
        .collect();
    groups.sort_by(|a, b| b.savings().cmp(&a.savings()).then_with(|| a.hash.cmp(&b.hash)));

    for group in &groups {
        let copies = group.paths.len() as u64;
        analysis.duplicate_files += copies;
        analysis.duplicate_bytes += group.size * copies;
        analysis.potential_savings += group.savings();
    }
    analysis.groups = groups;

    info!(
        subsystem = "engine",
        component = "analysis",
        base = %base.display(),
        files = analysis.total_files,
        duplicate_files = analysis.duplicate_files,
        potential_savings = analysis.potential_savings,
        "Directory analysed"
    );
    Ok(analysis)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_groups_and_savings() {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        std::fs::create_dir_all(root.join("nested")).unwrap();
        std::fs::write(root.join("a.txt"), b"same content").unwrap();
        std::fs::write(root.join("b.txt"), b"same content").unwrap();
        std::fs::write(root.join("nested/c.txt"), b"same content").unwrap();
        std::fs::write(root.join("unique.txt"), b"unique").unwrap();

        let analysis = analyse_directory(root, &ContentHasher::default()).await.unwrap();

        assert_eq!(analysis.total_files, 4);
        assert_eq!(analysis.total_bytes, 12 * 3 + 6);
        assert_eq!(analysis.duplicate_files, 3);
        assert_eq!(analysis.duplicate_bytes, 36);
        assert_eq!(analysis.potential_savings, 24);
        assert_eq!(analysis.groups.len(), 1);
        assert_eq!(analysis.groups[0].paths.len(), 3);
    }

    #[tokio::test]
    async fn test_empty_directory() {
        let dir = TempDir::new().unwrap();
        let analysis = analyse_directory(dir.path(), &ContentHasher::default())
            .await
            .unwrap();
        assert_eq!(analysis, DuplicateAnalysis::default());
        assert_eq!(analysis.savings_percent(), 0.0);
    }
}
