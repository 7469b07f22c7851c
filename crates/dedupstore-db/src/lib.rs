//! # dedupstore-db
//!
//! PostgreSQL persistence layer for dedupstore.
//!
//! This crate provides:
//! - Connection pool management
//! - Repository implementations for stored objects, owner links, and legacy
//!   migration records
//! - Schema migrations (feature `migrations`)
//!
//! ## Example
//!
//! ```rust,ignore
//! use dedupstore_db::Database;
//!
//! let db = Database::connect("postgres://localhost/dedupstore").await?;
//! let exists = db.objects.exists("a9993e364706816aba3e25717850c26c9cd0d89d").await?;
//! ```

pub mod legacy;
pub mod links;
pub mod objects;
pub mod pool;

// Test fixtures for integration tests
// Note: Always compiled so integration tests (in tests/) can use DEFAULT_TEST_DATABASE_URL
pub mod test_fixtures;

use std::sync::Arc;

use sqlx::PgPool;
use tracing::warn;

// Re-export core types
pub use dedupstore_core::*;

pub use legacy::PgLegacyMigrationRepository;
pub use links::PgLinkRepository;
pub use objects::PgObjectRepository;
pub use pool::{create_pool, create_pool_with_config, redact_url, PoolConfig};

/// Tables owned by dedupstore, in dependency order.
pub const TABLES: [&str; 3] = ["stored_objects", "object_links", "legacy_file_migrations"];

/// Database handle holding the pool and all repositories.
#[derive(Clone)]
pub struct Database {
    pub pool: PgPool,
    /// Stored object repository.
    pub objects: PgObjectRepository,
    /// Owner link repository.
    pub links: PgLinkRepository,
    /// Legacy migration record repository.
    pub legacy: PgLegacyMigrationRepository,
}

/// Result of probing one table.
#[derive(Debug, Clone)]
pub struct TableCheck {
    pub table: &'static str,
    pub error: Option<String>,
}

impl TableCheck {
    pub fn is_ready(&self) -> bool {
        self.error.is_none()
    }
}

impl Database {
    /// Create a new Database instance from a connection pool.
    pub fn new(pool: PgPool) -> Self {
        Self {
            objects: PgObjectRepository::new(pool.clone()),
            links: PgLinkRepository::new(pool.clone()),
            legacy: PgLegacyMigrationRepository::new(pool.clone()),
            pool,
        }
    }

    /// Create a new Database instance by connecting to the given URL.
    pub async fn connect(url: &str) -> Result<Self> {
        let pool = create_pool(url).await?;
        Ok(Self::new(pool))
    }

    /// Create with custom pool configuration.
    pub async fn connect_with_config(url: &str, config: PoolConfig) -> Result<Self> {
        let pool = create_pool_with_config(url, config).await?;
        Ok(Self::new(pool))
    }

    /// Shared handle to the object repository.
    pub fn object_repository(&self) -> Arc<dyn ObjectRepository> {
        Arc::new(self.objects.clone())
    }

    /// Shared handle to the link repository.
    pub fn link_repository(&self) -> Arc<dyn LinkRepository> {
        Arc::new(self.links.clone())
    }

    /// Shared handle to the legacy migration repository.
    pub fn legacy_repository(&self) -> Arc<dyn LegacyMigrationRepository> {
        Arc::new(self.legacy.clone())
    }

    /// Round-trip a trivial query.
    pub async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    /// Probe every dedupstore table with a cheap read.
    pub async fn check_tables(&self) -> Vec<TableCheck> {
        let mut checks = Vec::with_capacity(TABLES.len());
        for table in TABLES {
            let error = sqlx::query(&format!("SELECT 1 FROM {} LIMIT 1", table))
                .fetch_optional(&self.pool)
                .await
                .err()
                .map(|e| e.to_string());
            if let Some(ref e) = error {
                warn!(subsystem = "db", db_table = table, error = %e, "Table check failed");
            }
            checks.push(TableCheck { table, error });
        }
        checks
    }

    /// Run pending migrations.
    #[cfg(feature = "migrations")]
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("../../migrations")
            .run(&self.pool)
            .await
            .map_err(|e| Error::Database(sqlx::Error::Migrate(Box::new(e))))?;
        Ok(())
    }
}
