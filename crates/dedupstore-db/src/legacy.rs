//! Legacy file migration records.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{postgres::PgRow, PgPool, Row};

use dedupstore_core::{
    Error, LegacyMigrationRecord, LegacyMigrationRepository, MigrationStatus, NewLegacyMigration,
    Result,
};

const LEGACY_COLUMNS: &str = "id, original_dir, original_filename, hash, size, mime_type, status, \
                              has_duplicates, strategy, migrated_at, error_message, \
                              file_modified_at, created_at, updated_at";

/// PostgreSQL implementation of [`LegacyMigrationRepository`].
#[derive(Clone)]
pub struct PgLegacyMigrationRepository {
    pool: PgPool,
}

impl PgLegacyMigrationRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn touch(&self, sql: &str, id: i64) -> Result<()> {
        let result = sqlx::query(sql).bind(id).execute(&self.pool).await?;
        if result.rows_affected() == 0 {
            return Err(Error::NotFound(format!("legacy migration record {}", id)));
        }
        Ok(())
    }
}

fn legacy_record_from_row(row: &PgRow) -> Result<LegacyMigrationRecord> {
    let status: String = row.get("status");
    let strategy: String = row.get("strategy");
    Ok(LegacyMigrationRecord {
        id: row.get("id"),
        original_dir: row.get("original_dir"),
        original_filename: row.get("original_filename"),
        hash: row.get("hash"),
        size: row.get("size"),
        mime_type: row.get("mime_type"),
        status: status.parse().map_err(Error::Serialization)?,
        has_duplicates: row.get("has_duplicates"),
        strategy: strategy.parse().map_err(Error::Serialization)?,
        migrated_at: row.get("migrated_at"),
        error_message: row.get("error_message"),
        file_modified_at: row.get("file_modified_at"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

#[async_trait]
impl LegacyMigrationRepository for PgLegacyMigrationRepository {
    async fn find_by_location(
        &self,
        original_dir: &str,
        original_filename: &str,
    ) -> Result<Option<LegacyMigrationRecord>> {
        sqlx::query(&format!(
            r#"SELECT {} FROM legacy_file_migrations
               WHERE original_dir = $1 AND original_filename = $2"#,
            LEGACY_COLUMNS
        ))
        .bind(original_dir)
        .bind(original_filename)
        .fetch_optional(&self.pool)
        .await?
        .map(|row| legacy_record_from_row(&row))
        .transpose()
    }

    async fn upsert_observed(&self, observed: NewLegacyMigration) -> Result<LegacyMigrationRecord> {
        let row = sqlx::query(&format!(
            r#"INSERT INTO legacy_file_migrations
               (original_dir, original_filename, hash, size, mime_type, file_modified_at)
               VALUES ($1, $2, $3, $4, $5, $6)
               ON CONFLICT (original_dir, original_filename) DO UPDATE
               SET hash = EXCLUDED.hash,
                   size = EXCLUDED.size,
                   mime_type = EXCLUDED.mime_type,
                   file_modified_at = EXCLUDED.file_modified_at,
                   updated_at = NOW()
               RETURNING {}"#,
            LEGACY_COLUMNS
        ))
        .bind(&observed.original_dir)
        .bind(&observed.original_filename)
        .bind(&observed.hash)
        .bind(observed.size)
        .bind(&observed.mime_type)
        .bind(observed.file_modified_at)
        .fetch_one(&self.pool)
        .await?;

        legacy_record_from_row(&row)
    }

    async fn set_status(
        &self,
        id: i64,
        status: MigrationStatus,
        error_message: Option<&str>,
    ) -> Result<()> {
        let result = sqlx::query(
            r#"UPDATE legacy_file_migrations
               SET status = $2, error_message = $3, updated_at = NOW()
               WHERE id = $1"#,
        )
        .bind(id)
        .bind(status.to_string())
        .bind(error_message)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(Error::NotFound(format!("legacy migration record {}", id)));
        }
        Ok(())
    }

    async fn mark_duplicate(&self, id: i64) -> Result<()> {
        self.touch(
            "UPDATE legacy_file_migrations SET has_duplicates = TRUE, updated_at = NOW() WHERE id = $1",
            id,
        )
        .await
    }

    async fn mark_migrated(&self, id: i64, at: DateTime<Utc>) -> Result<()> {
        let result = sqlx::query(
            r#"UPDATE legacy_file_migrations
               SET status = 'migrated', migrated_at = $2, error_message = NULL, updated_at = NOW()
               WHERE id = $1"#,
        )
        .bind(id)
        .bind(at)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(Error::NotFound(format!("legacy migration record {}", id)));
        }
        Ok(())
    }

    async fn reset(&self, id: i64) -> Result<()> {
        self.touch(
            r#"UPDATE legacy_file_migrations
               SET status = 'pending', migrated_at = NULL, updated_at = NOW()
               WHERE id = $1"#,
            id,
        )
        .await
    }

    async fn count_by_status(&self) -> Result<Vec<(MigrationStatus, i64)>> {
        let rows = sqlx::query(
            r#"SELECT status, COUNT(*) AS count
               FROM legacy_file_migrations
               GROUP BY status
               ORDER BY status"#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                let status: String = row.get("status");
                Ok((
                    status.parse().map_err(Error::Serialization)?,
                    row.get("count"),
                ))
            })
            .collect()
    }
}
