//! Stored object repository.
//!
//! `stored_objects` is keyed by the SHA1 content hash. Inserts use
//! `ON CONFLICT DO NOTHING` so two writers racing on the same content both
//! converge on one row; the loser receives the winner's row.

use async_trait::async_trait;
use sqlx::{postgres::PgRow, PgPool, Row};
use tracing::debug;

use dedupstore_core::{
    DiskUsage, Error, InsertOutcome, NewStoredObject, ObjectRepository, ProcessingStatus, Result,
    StorageStats, StoredObject, TypeUsage,
};

const OBJECT_COLUMNS: &str = "hash, md5, filename, path, mime_type, size, status, disk, \
                              original_name, created_at, updated_at";

/// PostgreSQL implementation of [`ObjectRepository`].
#[derive(Clone)]
pub struct PgObjectRepository {
    pool: PgPool,
}

impl PgObjectRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

pub(crate) fn parse_processing_status(s: &str) -> Result<ProcessingStatus> {
    s.parse().map_err(Error::Serialization)
}

fn stored_object_from_row(row: &PgRow) -> Result<StoredObject> {
    let status: String = row.get("status");
    Ok(StoredObject {
        hash: row.get("hash"),
        md5: row.get("md5"),
        filename: row.get("filename"),
        path: row.get("path"),
        mime_type: row.get("mime_type"),
        size: row.get("size"),
        status: parse_processing_status(&status)?,
        disk: row.get("disk"),
        original_name: row.get("original_name"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

#[async_trait]
impl ObjectRepository for PgObjectRepository {
    async fn find(&self, hash: &str) -> Result<Option<StoredObject>> {
        sqlx::query(&format!(
            "SELECT {} FROM stored_objects WHERE hash = $1",
            OBJECT_COLUMNS
        ))
        .bind(hash)
        .fetch_optional(&self.pool)
        .await?
        .map(|row| stored_object_from_row(&row))
        .transpose()
    }

    async fn exists(&self, hash: &str) -> Result<bool> {
        let exists: bool =
            sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM stored_objects WHERE hash = $1)")
                .bind(hash)
                .fetch_one(&self.pool)
                .await?;
        Ok(exists)
    }

    async fn insert(&self, object: NewStoredObject) -> Result<InsertOutcome> {
        let inserted = sqlx::query(&format!(
            r#"INSERT INTO stored_objects
               (hash, md5, filename, path, mime_type, size, status, disk, original_name)
               VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
               ON CONFLICT (hash) DO NOTHING
               RETURNING {}"#,
            OBJECT_COLUMNS
        ))
        .bind(&object.hash)
        .bind(&object.md5)
        .bind(&object.filename)
        .bind(&object.path)
        .bind(&object.mime_type)
        .bind(object.size)
        .bind(object.status.to_string())
        .bind(&object.disk)
        .bind(&object.original_name)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(row) = inserted {
            return Ok(InsertOutcome::Inserted(stored_object_from_row(&row)?));
        }

        debug!(
            subsystem = "db",
            component = "objects",
            op = "insert",
            hash = %object.hash,
            "Insert conflicted, returning existing object"
        );
        self.find(&object.hash)
            .await?
            .map(InsertOutcome::Existing)
            .ok_or_else(|| {
                Error::Internal(format!(
                    "stored object {} conflicted on insert but is gone",
                    object.hash
                ))
            })
    }

    async fn update_status(&self, hash: &str, status: ProcessingStatus) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE stored_objects SET status = $2, updated_at = NOW() WHERE hash = $1",
        )
        .bind(hash)
        .bind(status.to_string())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete(&self, hash: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM stored_objects WHERE hash = $1")
            .bind(hash)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete_if_unreferenced(&self, hash: &str) -> Result<Option<StoredObject>> {
        sqlx::query(&format!(
            r#"DELETE FROM stored_objects o
               WHERE o.hash = $1
                 AND NOT EXISTS (SELECT 1 FROM object_links l WHERE l.hash = o.hash)
               RETURNING {}"#,
            OBJECT_COLUMNS
        ))
        .bind(hash)
        .fetch_optional(&self.pool)
        .await?
        .map(|row| stored_object_from_row(&row))
        .transpose()
    }

    async fn list_unreferenced_after(
        &self,
        after: Option<&str>,
        limit: i64,
    ) -> Result<Vec<StoredObject>> {
        let rows = sqlx::query(&format!(
            r#"SELECT {} FROM stored_objects o
               WHERE ($1::TEXT IS NULL OR o.hash > $1)
                 AND NOT EXISTS (SELECT 1 FROM object_links l WHERE l.hash = o.hash)
               ORDER BY o.hash
               LIMIT $2"#,
            OBJECT_COLUMNS
        ))
        .bind(after)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(stored_object_from_row).collect()
    }

    async fn stats(&self) -> Result<StorageStats> {
        let totals = sqlx::query(
            r#"SELECT
                 (SELECT COUNT(*) FROM stored_objects) AS total_objects,
                 (SELECT COALESCE(SUM(size), 0)::BIGINT FROM stored_objects) AS total_bytes,
                 (SELECT COUNT(*) FROM object_links) AS total_links,
                 (SELECT COUNT(*) FROM stored_objects o
                   WHERE EXISTS (SELECT 1 FROM object_links l WHERE l.hash = o.hash))
                   AS linked_objects"#,
        )
        .fetch_one(&self.pool)
        .await?;

        let total_objects: i64 = totals.get("total_objects");
        let linked_objects: i64 = totals.get("linked_objects");

        let by_disk = sqlx::query(
            r#"SELECT disk, COUNT(*) AS objects, COALESCE(SUM(size), 0)::BIGINT AS bytes
               FROM stored_objects
               GROUP BY disk
               ORDER BY disk"#,
        )
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(|row| DiskUsage {
            disk: row.get("disk"),
            objects: row.get("objects"),
            bytes: row.get("bytes"),
        })
        .collect();

        let by_type = sqlx::query(
            r#"SELECT split_part(mime_type, '/', 1) AS mime_group,
                      COUNT(*) AS objects,
                      COALESCE(SUM(size), 0)::BIGINT AS bytes
               FROM stored_objects
               GROUP BY 1
               ORDER BY 1"#,
        )
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(|row| TypeUsage {
            mime_group: row.get("mime_group"),
            objects: row.get("objects"),
            bytes: row.get("bytes"),
        })
        .collect();

        Ok(StorageStats {
            total_objects,
            total_links: totals.get("total_links"),
            linked_objects,
            orphaned_objects: total_objects - linked_objects,
            total_bytes: totals.get("total_bytes"),
            by_disk,
            by_type,
        })
    }
}
