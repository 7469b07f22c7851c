//! Repository traits implemented by the persistence layer.
//!
//! The engine only talks to storage through these traits, so the same engine
//! runs against PostgreSQL in production and the in-memory store in tests.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::{
    InsertOutcome, LegacyMigrationRecord, Link, LinkAttributes, LinkFilter, MigrationStatus,
    NewLegacyMigration, NewStoredObject, OwnerRef, ProcessingStatus, Result, StorageStats,
    StoredObject,
};

/// Repository for stored object records.
#[async_trait]
pub trait ObjectRepository: Send + Sync {
    /// Fetch an object by primary hash.
    async fn find(&self, hash: &str) -> Result<Option<StoredObject>>;

    /// Check whether an object with this hash exists.
    async fn exists(&self, hash: &str) -> Result<bool>;

    /// Insert a new object.
    ///
    /// A concurrent insert of the same hash is not an error: the existing row
    /// is returned as [`InsertOutcome::Existing`].
    async fn insert(&self, object: NewStoredObject) -> Result<InsertOutcome>;

    /// Update the lifecycle status. Returns false when no such object exists.
    async fn update_status(&self, hash: &str, status: ProcessingStatus) -> Result<bool>;

    /// Delete the record unconditionally. Returns false when absent.
    async fn delete(&self, hash: &str) -> Result<bool>;

    /// Delete the record only if no link references it, as one atomic step.
    ///
    /// Returns the deleted object, or `None` when it was absent or still linked.
    async fn delete_if_unreferenced(&self, hash: &str) -> Result<Option<StoredObject>>;

    /// Keyset page of objects with zero links, ordered by hash, strictly after `after`.
    async fn list_unreferenced_after(
        &self,
        after: Option<&str>,
        limit: i64,
    ) -> Result<Vec<StoredObject>>;

    /// Aggregate statistics across objects and links.
    async fn stats(&self) -> Result<StorageStats>;
}

/// Repository for owner links.
#[async_trait]
pub trait LinkRepository: Send + Sync {
    /// Create the link, or merge `attrs` onto the existing one.
    ///
    /// New links default to `completed` status when `attrs.status` is `None`.
    async fn upsert(&self, hash: &str, owner: &OwnerRef, attrs: &LinkAttributes) -> Result<Link>;

    /// Fetch the link between `hash` and `owner`.
    async fn find(&self, hash: &str, owner: &OwnerRef) -> Result<Option<Link>>;

    /// Set the link status. Returns false when no such link exists.
    async fn update_status(
        &self,
        hash: &str,
        owner: &OwnerRef,
        status: ProcessingStatus,
    ) -> Result<bool>;

    /// Remove one link. Returns false when no such link exists.
    async fn remove(&self, hash: &str, owner: &OwnerRef) -> Result<bool>;

    /// Remove every link to `hash`, returning how many were removed.
    async fn remove_all_for_hash(&self, hash: &str) -> Result<u64>;

    /// Number of links referencing `hash`.
    async fn count_for_hash(&self, hash: &str) -> Result<i64>;

    /// Links referencing `hash`, oldest first.
    async fn list_for_hash(&self, hash: &str, filter: &LinkFilter) -> Result<Vec<Link>>;

    /// Most recent links referencing `hash`, newest first.
    async fn recent_for_hash(&self, hash: &str, limit: i64) -> Result<Vec<Link>>;

    /// Link counts per owner type for `hash`, ordered by owner type.
    async fn count_by_owner_type(&self, hash: &str) -> Result<Vec<(String, i64)>>;

    /// Links held by `owner`, oldest first.
    async fn list_for_owner(&self, owner: &OwnerRef, filter: &LinkFilter) -> Result<Vec<Link>>;

    /// Keyset page of link ids whose hash has no stored object, ordered by id.
    async fn orphaned_ids_after(&self, after: i64, limit: i64) -> Result<Vec<i64>>;

    /// Delete links by id, returning how many were removed.
    async fn delete_by_ids(&self, ids: &[i64]) -> Result<u64>;
}

/// Repository for legacy migration bookkeeping.
#[async_trait]
pub trait LegacyMigrationRepository: Send + Sync {
    /// Fetch the record for a file location.
    async fn find_by_location(
        &self,
        original_dir: &str,
        original_filename: &str,
    ) -> Result<Option<LegacyMigrationRecord>>;

    /// Find-or-create the record for a file location.
    ///
    /// An existing record has its hash, size, mime type and modification time
    /// refreshed from the observation; status and history are kept.
    async fn upsert_observed(&self, observed: NewLegacyMigration) -> Result<LegacyMigrationRecord>;

    /// Set the status, replacing the error message.
    async fn set_status(
        &self,
        id: i64,
        status: MigrationStatus,
        error_message: Option<&str>,
    ) -> Result<()>;

    /// Flag the record's content as already present in the store.
    async fn mark_duplicate(&self, id: i64) -> Result<()>;

    /// Mark the record migrated at `at`, clearing any error message.
    async fn mark_migrated(&self, id: i64, at: DateTime<Utc>) -> Result<()>;

    /// Return the record to `pending` with `migrated_at` cleared.
    async fn reset(&self, id: i64) -> Result<()>;

    /// Record counts per migration status.
    async fn count_by_status(&self) -> Result<Vec<(MigrationStatus, i64)>>;
}
