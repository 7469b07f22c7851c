//! Legacy file migration.
//!
//! Walks an existing directory tree and moves every regular file into the
//! deduplicated store. Each original is renamed to `<name>.backup` and
//! replaced by a symlink to its stored blob, so readers of the old tree keep
//! working. Every file gets a [`LegacyMigrationRecord`] that owns a link to
//! its object.
//!
//! Per-file states: `pending` on first observation, `processing` while new
//! content is ingested, then `migrated` or `error`. Files that turn into
//! symlinks between discovery and processing are skipped.
//!
//! [`LegacyMigrationRecord`]: dedupstore_core::LegacyMigrationRecord

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::fs;
use tracing::{debug, info, warn};

use dedupstore_core::defaults::MIGRATION_CHUNK_SIZE;
use dedupstore_core::{
    detect_content_type, LegacyMigrationRepository, LinkAttributes, LocalFileSource,
    MigrationStatus, NewLegacyMigration, Result,
};

use crate::engine::{read_head, StorageEngine};
use crate::scan::{
    backup_path_for, discover_entries, discover_files, is_backup, original_for_backup, EntryKind,
};

#[derive(Debug, Clone)]
pub struct MigrationOptions {
    /// Target disk; the default disk when `None`.
    pub disk: Option<String>,
    /// Files per progress chunk.
    pub chunk_size: usize,
    pub dry_run: bool,
    /// Leave `.backup` files in place after the run.
    pub keep_backups: bool,
}

impl Default for MigrationOptions {
    fn default() -> Self {
        Self {
            disk: None,
            chunk_size: MIGRATION_CHUNK_SIZE,
            dry_run: false,
            keep_backups: false,
        }
    }
}

/// A file that could not be processed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileFailure {
    pub path: PathBuf,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BackupCleanupReport {
    pub removed: usize,
    pub errors: Vec<FileFailure>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct MigrationReport {
    pub dry_run: bool,
    pub discovered: usize,
    /// Files that reached `migrated` (or would have, in a dry run).
    pub processed: usize,
    pub duplicates: usize,
    pub skipped: usize,
    pub symlinks_created: usize,
    /// Bytes freed by replacing duplicate files with symlinks.
    pub reclaimable_bytes: u64,
    /// Soft failures: the file is stored and linked but was not replaced.
    pub warnings: Vec<FileFailure>,
    pub failures: Vec<FileFailure>,
    pub backups: Option<BackupCleanupReport>,
}

impl MigrationReport {
    pub fn errors(&self) -> usize {
        self.failures.len()
    }
}

/// Why a rollback left an entry alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UnrestorableReason {
    SymlinkWithoutBackup,
    BackupWithoutSymlink,
    NotMigrated,
}

impl std::fmt::Display for UnrestorableReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::SymlinkWithoutBackup => "symlink without backup",
            Self::BackupWithoutSymlink => "backup exists but original is not a symlink",
            Self::NotMigrated => "not migrated",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnrestorableFile {
    pub path: PathBuf,
    pub reason: UnrestorableReason,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RollbackReport {
    pub dry_run: bool,
    pub restored: usize,
    pub unrestorable: Vec<UnrestorableFile>,
    pub failures: Vec<FileFailure>,
}

/// Result of one file.
#[derive(Debug, Clone, PartialEq, Eq)]
enum FileOutcome {
    Migrated {
        duplicate: bool,
        symlinked: bool,
        size: u64,
    },
    /// Stored and linked, but the original could not be replaced.
    Unreplaced {
        duplicate: bool,
        size: u64,
        warning: String,
    },
    Planned {
        duplicate: bool,
        size: u64,
    },
    Skipped,
    Failed(String),
}

pub struct LegacyMigrator {
    engine: Arc<StorageEngine>,
    records: Arc<dyn LegacyMigrationRepository>,
}

impl LegacyMigrator {
    pub fn new(engine: Arc<StorageEngine>, records: Arc<dyn LegacyMigrationRepository>) -> Self {
        Self { engine, records }
    }

    /// Migrate every eligible file under `base`.
    ///
    /// Fails only when `base` cannot be scanned. Per-file problems are
    /// collected in the report.
    pub async fn migrate(&self, base: &Path, options: &MigrationOptions) -> Result<MigrationReport> {
        let start = Instant::now();
        let files = discover_files(base).await?;
        let mut report = MigrationReport {
            dry_run: options.dry_run,
            discovered: files.len(),
            ..Default::default()
        };
        info!(
            subsystem = "engine",
            component = "migrator",
            op = "migrate",
            base = %base.display(),
            files = files.len(),
            dry_run = options.dry_run,
            "Starting legacy migration"
        );

        // Hashes seen during a dry run, so in-run duplicates are counted.
        let mut planned = HashSet::new();
        let chunk_size = options.chunk_size.max(1);
        for (index, chunk) in files.chunks(chunk_size).enumerate() {
            for path in chunk {
                let outcome = match self.migrate_file(path, options, &mut planned).await {
                    Ok(outcome) => outcome,
                    Err(e) => FileOutcome::Failed(e.to_string()),
                };
                record_outcome(&mut report, path, outcome);
            }
            info!(
                subsystem = "engine",
                component = "migrator",
                chunk = index + 1,
                done = (index * chunk_size + chunk.len()).min(files.len()),
                total = files.len(),
                "Migration progress"
            );
        }

        if !options.dry_run && !options.keep_backups {
            report.backups = Some(self.cleanup_backups(base).await?);
        }

        info!(
            subsystem = "engine",
            component = "migrator",
            op = "migrate",
            processed = report.processed,
            duplicates = report.duplicates,
            symlinks = report.symlinks_created,
            errors = report.errors(),
            duration_ms = start.elapsed().as_millis() as u64,
            "Legacy migration finished"
        );
        Ok(report)
    }

    async fn migrate_file(
        &self,
        path: &Path,
        options: &MigrationOptions,
        planned: &mut HashSet<String>,
    ) -> Result<FileOutcome> {
        let metadata = fs::symlink_metadata(path).await?;
        if !metadata.file_type().is_file() {
            debug!(file_path = %path.display(), "No longer a regular file, skipping");
            return Ok(FileOutcome::Skipped);
        }

        let (hashes, size) = self.engine.hasher().hash_file(path).await?;
        let (dir, filename) = split_location(path);
        let hash = hashes.sha1;

        if options.dry_run {
            let record = self.records.find_by_location(&dir, &filename).await?;
            let duplicate = match self.engine.find(&hash).await? {
                Some(_) => match &record {
                    Some(record) => self.engine.links().find(&hash, &record.owner()).await?.is_none(),
                    None => true,
                },
                None => planned.contains(&hash),
            };
            planned.insert(hash);
            return Ok(FileOutcome::Planned { duplicate, size });
        }

        let mime_type = detect_content_type(None, &read_head(path).await?, Some(&filename));
        let record = self
            .records
            .upsert_observed(NewLegacyMigration {
                original_dir: dir,
                original_filename: filename.clone(),
                hash: hash.clone(),
                size: size as i64,
                mime_type: Some(mime_type),
                file_modified_at: metadata.modified().ok().map(DateTime::<Utc>::from),
            })
            .await?;
        let owner = record.owner();

        let (object, duplicate) = match self.engine.find(&hash).await? {
            Some(object) => {
                let own = self.engine.links().find(&hash, &owner).await?.is_some();
                if !own {
                    self.records.mark_duplicate(record.id).await?;
                }
                (object, !own)
            }
            None => {
                self.records
                    .set_status(record.id, MigrationStatus::Processing, None)
                    .await?;
                let source = LocalFileSource::new(path).with_name(filename.as_str());
                match self.engine.ingest(&source, options.disk.as_deref()).await {
                    Ok(object) => (object, false),
                    Err(e) => {
                        let message = e.to_string();
                        self.records
                            .set_status(record.id, MigrationStatus::Error, Some(&message))
                            .await?;
                        return Ok(FileOutcome::Failed(message));
                    }
                }
            }
        };

        self.engine
            .links()
            .create_or_update(
                &object.hash,
                &owner,
                &LinkAttributes::default().with_original_name(filename),
            )
            .await?;

        let target = self.engine.disks().get(&object.disk)?.local_path(&object.path);
        let symlinked = match target {
            Some(target) => match replace_with_symlink(path, &target).await {
                Ok(()) => true,
                Err(warning) => {
                    // Content is stored and linked but the file stays in place.
                    self.records
                        .set_status(record.id, MigrationStatus::Pending, Some(&warning))
                        .await?;
                    return Ok(FileOutcome::Unreplaced {
                        duplicate,
                        size,
                        warning,
                    })
                }
            },
            None => false,
        };

        self.records.mark_migrated(record.id, Utc::now()).await?;
        Ok(FileOutcome::Migrated {
            duplicate,
            symlinked,
            size,
        })
    }

    /// Undo a migration under `base`.
    ///
    /// Each symlink with a sibling backup is removed and the backup renamed
    /// back; its record returns to `pending`. Anything else is reported as
    /// unrestorable and left alone, so running this twice is harmless.
    pub async fn rollback(&self, base: &Path, dry_run: bool) -> Result<RollbackReport> {
        let entries = discover_entries(base).await?;
        let symlinks: HashSet<&Path> = entries
            .iter()
            .filter(|e| e.kind == EntryKind::Symlink)
            .map(|e| e.path.as_path())
            .collect();
        let mut report = RollbackReport {
            dry_run,
            ..Default::default()
        };

        for entry in &entries {
            let path = entry.path.as_path();
            let reason = match entry.kind {
                EntryKind::Symlink => {
                    let backup = backup_path_for(path);
                    let has_backup = fs::symlink_metadata(&backup)
                        .await
                        .map(|m| m.is_file())
                        .unwrap_or(false);
                    if !has_backup {
                        Some(UnrestorableReason::SymlinkWithoutBackup)
                    } else if dry_run {
                        report.restored += 1;
                        None
                    } else {
                        match self.restore(path, &backup).await {
                            Ok(()) => report.restored += 1,
                            Err(e) => report.failures.push(FileFailure {
                                path: path.to_path_buf(),
                                message: e.to_string(),
                            }),
                        }
                        None
                    }
                }
                EntryKind::File if is_backup(path) => match original_for_backup(path) {
                    Some(original) if symlinks.contains(original.as_path()) => None,
                    _ => Some(UnrestorableReason::BackupWithoutSymlink),
                },
                EntryKind::File => Some(UnrestorableReason::NotMigrated),
            };
            if let Some(reason) = reason {
                debug!(file_path = %path.display(), reason = %reason, "Not restorable");
                report.unrestorable.push(UnrestorableFile {
                    path: path.to_path_buf(),
                    reason,
                });
            }
        }

        info!(
            subsystem = "engine",
            component = "migrator",
            op = "rollback",
            base = %base.display(),
            restored = report.restored,
            unrestorable = report.unrestorable.len(),
            errors = report.failures.len(),
            dry_run,
            "Rollback finished"
        );
        Ok(report)
    }

    async fn restore(&self, link: &Path, backup: &Path) -> Result<()> {
        fs::remove_file(link).await?;
        fs::rename(backup, link).await?;

        let (dir, filename) = split_location(link);
        if let Some(record) = self.records.find_by_location(&dir, &filename).await? {
            self.records.reset(record.id).await?;
        }
        Ok(())
    }

    /// Remove every `.backup` file under `base`. Failures are collected.
    pub async fn cleanup_backups(&self, base: &Path) -> Result<BackupCleanupReport> {
        let mut report = BackupCleanupReport::default();
        for entry in discover_entries(base).await? {
            if entry.kind != EntryKind::File || !is_backup(&entry.path) {
                continue;
            }
            match fs::remove_file(&entry.path).await {
                Ok(()) => report.removed += 1,
                Err(e) => {
                    warn!(file_path = %entry.path.display(), error = %e, "Could not remove backup");
                    report.errors.push(FileFailure {
                        path: entry.path,
                        message: e.to_string(),
                    });
                }
            }
        }
        info!(
            subsystem = "engine",
            component = "migrator",
            op = "cleanup_backups",
            removed = report.removed,
            errors = report.errors.len(),
            "Backup cleanup finished"
        );
        Ok(report)
    }
}

fn record_outcome(report: &mut MigrationReport, path: &Path, outcome: FileOutcome) {
    match outcome {
        FileOutcome::Migrated {
            duplicate,
            symlinked,
            size,
        } => {
            report.processed += 1;
            if symlinked {
                report.symlinks_created += 1;
            }
            if duplicate {
                report.duplicates += 1;
                if symlinked {
                    report.reclaimable_bytes += size;
                }
            }
        }
        FileOutcome::Unreplaced {
            duplicate,
            size: _,
            warning,
        } => {
            if duplicate {
                report.duplicates += 1;
            }
            warn!(file_path = %path.display(), warning = %warning, "Could not replace file with symlink");
            report.warnings.push(FileFailure {
                path: path.to_path_buf(),
                message: warning,
            });
        }
        FileOutcome::Planned { duplicate, size } => {
            report.processed += 1;
            if duplicate {
                report.duplicates += 1;
                report.reclaimable_bytes += size;
            }
        }
        FileOutcome::Skipped => report.skipped += 1,
        FileOutcome::Failed(message) => {
            warn!(file_path = %path.display(), error = %message, "Failed to migrate file");
            report.failures.push(FileFailure {
                path: path.to_path_buf(),
                message,
            });
        }
    }
}

/// Directory and file name as stored on the migration record.
fn split_location(path: &Path) -> (String, String) {
    let dir = path
        .parent()
        .map(|p| p.to_string_lossy().into_owned())
        .unwrap_or_default();
    let filename = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    (dir, filename)
}

/// Rename `path` to its backup and put a symlink to `target` in its place.
/// The backup is renamed back if the symlink cannot be created.
#[cfg(unix)]
async fn replace_with_symlink(path: &Path, target: &Path) -> std::result::Result<(), String> {
    let backup = backup_path_for(path);
    if fs::symlink_metadata(&backup).await.is_ok() {
        return Err(format!("backup {} already exists", backup.display()));
    }
    fs::rename(path, &backup)
        .await
        .map_err(|e| format!("rename to backup failed: {}", e))?;

    if let Err(e) = fs::symlink(target, path).await {
        return Err(match fs::rename(&backup, path).await {
            Ok(()) => format!("symlink failed: {}", e),
            Err(restore) => format!("symlink failed: {}; restoring backup failed: {}", e, restore),
        });
    }
    Ok(())
}

#[cfg(not(unix))]
async fn replace_with_symlink(_path: &Path, _target: &Path) -> std::result::Result<(), String> {
    Err("symlinks are not supported on this platform".to_string())
}
