//! Orphan reconciliation.
//!
//! Two independent sweeps: links whose object is gone, and objects nothing
//! links to. Both page through the tables by key so a sweep never holds more
//! than one chunk in memory.

use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use tracing::{debug, info, warn};

use dedupstore_core::defaults::SWEEP_CHUNK_SIZE;
use dedupstore_core::{Result, StoredObject};

use crate::engine::StorageEngine;

#[derive(Debug, Clone, Copy)]
pub struct SweepOptions {
    pub chunk_size: i64,
    pub dry_run: bool,
}

impl Default for SweepOptions {
    fn default() -> Self {
        Self {
            chunk_size: SWEEP_CHUNK_SIZE,
            dry_run: false,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub dry_run: bool,
    /// Rows deleted, or that would be deleted in a dry run.
    pub affected: u64,
    pub bytes_reclaimed: u64,
    pub errors: Vec<String>,
}

pub struct Reconciler {
    engine: Arc<StorageEngine>,
}

impl Reconciler {
    pub fn new(engine: Arc<StorageEngine>) -> Self {
        Self { engine }
    }

    /// Delete links pointing at hashes with no stored object.
    pub async fn sweep_orphaned_links(&self, options: &SweepOptions) -> Result<SweepReport> {
        let start = Instant::now();
        let limit = options.chunk_size.max(1);
        let links = self.engine.links().repository();
        let mut report = SweepReport {
            dry_run: options.dry_run,
            ..Default::default()
        };

        let mut after = 0i64;
        loop {
            let ids = links.orphaned_ids_after(after, limit).await?;
            let Some(&last) = ids.last() else {
                break;
            };
            after = last;

            if options.dry_run {
                report.affected += ids.len() as u64;
            } else {
                match links.delete_by_ids(&ids).await {
                    Ok(deleted) => report.affected += deleted,
                    Err(e) => {
                        warn!(subsystem = "engine", component = "reconciler", error = %e, "Orphaned link chunk delete failed");
                        report.errors.push(format!("links after id {}: {}", ids[0], e));
                    }
                }
            }
            debug!(component = "reconciler", chunk = ids.len(), after, "Swept orphaned link chunk");

            if (ids.len() as i64) < limit {
                break;
            }
        }

        info!(
            subsystem = "engine",
            component = "reconciler",
            op = "sweep_orphaned_links",
            affected = report.affected,
            errors = report.errors.len(),
            dry_run = options.dry_run,
            duration_ms = start.elapsed().as_millis() as u64,
            "Orphaned link sweep finished"
        );
        Ok(report)
    }

    /// Delete objects with no links, blob first, then record.
    pub async fn sweep_orphaned_objects(&self, options: &SweepOptions) -> Result<SweepReport> {
        let start = Instant::now();
        let limit = options.chunk_size.max(1);
        let objects = self.engine.objects();
        let mut report = SweepReport {
            dry_run: options.dry_run,
            ..Default::default()
        };

        let mut after: Option<String> = None;
        loop {
            let page = objects.list_unreferenced_after(after.as_deref(), limit).await?;
            let Some(last) = page.last() else {
                break;
            };
            after = Some(last.hash.clone());
            let full_page = (page.len() as i64) >= limit;

            for object in &page {
                if options.dry_run {
                    report.affected += 1;
                    report.bytes_reclaimed += object.size.max(0) as u64;
                    continue;
                }
                match self.remove_object(object).await {
                    Ok(Some(bytes)) => {
                        report.affected += 1;
                        report.bytes_reclaimed += bytes;
                    }
                    Ok(None) => {}
                    Err(e) => {
                        warn!(
                            subsystem = "engine",
                            component = "reconciler",
                            hash = %object.hash,
                            error = %e,
                            "Failed to remove orphaned object"
                        );
                        report.errors.push(format!("{}: {}", object.hash, e));
                    }
                }
            }

            if !full_page {
                break;
            }
        }

        info!(
            subsystem = "engine",
            component = "reconciler",
            op = "sweep_orphaned_objects",
            affected = report.affected,
            bytes_reclaimed = report.bytes_reclaimed,
            errors = report.errors.len(),
            dry_run = options.dry_run,
            duration_ms = start.elapsed().as_millis() as u64,
            "Orphaned object sweep finished"
        );
        Ok(report)
    }

    /// Returns the bytes reclaimed, or `None` when the object gained a link
    /// since it was listed.
    async fn remove_object(&self, object: &StoredObject) -> Result<Option<u64>> {
        if self.engine.links().count_for_hash(&object.hash).await? > 0 {
            debug!(hash = %object.hash, "Object linked again, keeping");
            return Ok(None);
        }

        let backend = self.engine.disks().get(&object.disk)?;
        let mut bytes = 0;
        if backend.exists(&object.path).await? {
            bytes = backend.size(&object.path).await?;
            backend.delete(&object.path).await?;
        }

        // A link created after the recount keeps the record, without its blob.
        if self
            .engine
            .objects()
            .delete_if_unreferenced(&object.hash)
            .await?
            .is_none()
        {
            warn!(hash = %object.hash, "Object linked during sweep after blob removal");
            return Ok(None);
        }
        Ok(Some(bytes))
    }
}
