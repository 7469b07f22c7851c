//! Owner link repository.

use async_trait::async_trait;
use sqlx::{postgres::PgRow, PgPool, Row};

use dedupstore_core::{
    Link, LinkAttributes, LinkFilter, LinkRepository, OwnerRef, ProcessingStatus, Result,
};

use crate::objects::parse_processing_status;

const LINK_COLUMNS: &str =
    "id, hash, owner_type, owner_id, status, original_name, created_at, updated_at";

/// PostgreSQL implementation of [`LinkRepository`].
#[derive(Clone)]
pub struct PgLinkRepository {
    pool: PgPool,
}

impl PgLinkRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn link_from_row(row: &PgRow) -> Result<Link> {
    let status: String = row.get("status");
    Ok(Link {
        id: row.get("id"),
        hash: row.get("hash"),
        owner_type: row.get("owner_type"),
        owner_id: row.get("owner_id"),
        status: parse_processing_status(&status)?,
        original_name: row.get("original_name"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

#[async_trait]
impl LinkRepository for PgLinkRepository {
    async fn upsert(&self, hash: &str, owner: &OwnerRef, attrs: &LinkAttributes) -> Result<Link> {
        let row = sqlx::query(&format!(
            r#"INSERT INTO object_links (hash, owner_type, owner_id, status, original_name)
               VALUES ($1, $2, $3, COALESCE($4, 'completed'), $5)
               ON CONFLICT (hash, owner_type, owner_id) DO UPDATE
               SET status = COALESCE($4, object_links.status),
                   original_name = COALESCE($5, object_links.original_name),
                   updated_at = NOW()
               RETURNING {}"#,
            LINK_COLUMNS
        ))
        .bind(hash)
        .bind(&owner.owner_type)
        .bind(&owner.owner_id)
        .bind(attrs.status.map(|s| s.to_string()))
        .bind(&attrs.original_name)
        .fetch_one(&self.pool)
        .await?;

        link_from_row(&row)
    }

    async fn find(&self, hash: &str, owner: &OwnerRef) -> Result<Option<Link>> {
        sqlx::query(&format!(
            r#"SELECT {} FROM object_links
               WHERE hash = $1 AND owner_type = $2 AND owner_id = $3"#,
            LINK_COLUMNS
        ))
        .bind(hash)
        .bind(&owner.owner_type)
        .bind(&owner.owner_id)
        .fetch_optional(&self.pool)
        .await?
        .map(|row| link_from_row(&row))
        .transpose()
    }

    async fn update_status(
        &self,
        hash: &str,
        owner: &OwnerRef,
        status: ProcessingStatus,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"UPDATE object_links SET status = $4, updated_at = NOW()
               WHERE hash = $1 AND owner_type = $2 AND owner_id = $3"#,
        )
        .bind(hash)
        .bind(&owner.owner_type)
        .bind(&owner.owner_id)
        .bind(status.to_string())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn remove(&self, hash: &str, owner: &OwnerRef) -> Result<bool> {
        let result = sqlx::query(
            "DELETE FROM object_links WHERE hash = $1 AND owner_type = $2 AND owner_id = $3",
        )
        .bind(hash)
        .bind(&owner.owner_type)
        .bind(&owner.owner_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn remove_all_for_hash(&self, hash: &str) -> Result<u64> {
        let result = sqlx::query("DELETE FROM object_links WHERE hash = $1")
            .bind(hash)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn count_for_hash(&self, hash: &str) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM object_links WHERE hash = $1")
            .bind(hash)
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    async fn list_for_hash(&self, hash: &str, filter: &LinkFilter) -> Result<Vec<Link>> {
        let rows = sqlx::query(&format!(
            r#"SELECT {} FROM object_links
               WHERE hash = $1
                 AND ($2::TEXT IS NULL OR owner_type = $2)
                 AND ($3::TEXT IS NULL OR status = $3)
               ORDER BY id"#,
            LINK_COLUMNS
        ))
        .bind(hash)
        .bind(&filter.owner_type)
        .bind(filter.status.map(|s| s.to_string()))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(link_from_row).collect()
    }

    async fn recent_for_hash(&self, hash: &str, limit: i64) -> Result<Vec<Link>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM object_links WHERE hash = $1 ORDER BY created_at DESC, id DESC LIMIT $2",
            LINK_COLUMNS
        ))
        .bind(hash)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(link_from_row).collect()
    }

    async fn count_by_owner_type(&self, hash: &str) -> Result<Vec<(String, i64)>> {
        let rows = sqlx::query(
            r#"SELECT owner_type, COUNT(*) AS count
               FROM object_links
               WHERE hash = $1
               GROUP BY owner_type
               ORDER BY owner_type"#,
        )
        .bind(hash)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| (row.get("owner_type"), row.get("count")))
            .collect())
    }

    async fn list_for_owner(&self, owner: &OwnerRef, filter: &LinkFilter) -> Result<Vec<Link>> {
        let rows = sqlx::query(&format!(
            r#"SELECT {} FROM object_links
               WHERE owner_type = $1 AND owner_id = $2
                 AND ($3::TEXT IS NULL OR status = $3)
               ORDER BY id"#,
            LINK_COLUMNS
        ))
        .bind(&owner.owner_type)
        .bind(&owner.owner_id)
        .bind(filter.status.map(|s| s.to_string()))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(link_from_row).collect()
    }

    async fn orphaned_ids_after(&self, after: i64, limit: i64) -> Result<Vec<i64>> {
        let ids: Vec<i64> = sqlx::query_scalar(
            r#"SELECT l.id
               FROM object_links l
               LEFT JOIN stored_objects o ON o.hash = l.hash
               WHERE o.hash IS NULL AND l.id > $1
               ORDER BY l.id
               LIMIT $2"#,
        )
        .bind(after)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(ids)
    }

    async fn delete_by_ids(&self, ids: &[i64]) -> Result<u64> {
        if ids.is_empty() {
            return Ok(0);
        }
        let result = sqlx::query("DELETE FROM object_links WHERE id = ANY($1)")
            .bind(ids)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}
