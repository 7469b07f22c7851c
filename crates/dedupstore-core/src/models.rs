//! Data models for stored objects, owner links, and legacy migration records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// =============================================================================
// STATUS TYPES
// =============================================================================

/// Lifecycle status shared by stored objects and links.
///
/// The status of a link is independent of the status of the object it points
/// to: an owner may mark its association `failed` while the content itself is
/// `completed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingStatus {
    #[default]
    Pending,
    Processing,
    Completed,
    Failed,
}

impl ProcessingStatus {
    /// Human-readable label for display surfaces.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Pending => "Pending",
            Self::Processing => "Processing",
            Self::Completed => "Completed",
            Self::Failed => "Failed",
        }
    }

    pub fn all() -> [ProcessingStatus; 4] {
        [
            Self::Pending,
            Self::Processing,
            Self::Completed,
            Self::Failed,
        ]
    }
}

impl std::fmt::Display for ProcessingStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Processing => write!(f, "processing"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

impl std::str::FromStr for ProcessingStatus {
    type Err = String;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(Self::Pending),
            "processing" => Ok(Self::Processing),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            _ => Err(format!("Invalid processing status: {}", s)),
        }
    }
}

/// Migration status of a legacy file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum MigrationStatus {
    #[default]
    Pending,
    Processing,
    Migrated,
    Error,
}

impl std::fmt::Display for MigrationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Processing => write!(f, "processing"),
            Self::Migrated => write!(f, "migrated"),
            Self::Error => write!(f, "error"),
        }
    }
}

impl std::str::FromStr for MigrationStatus {
    type Err = String;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(Self::Pending),
            "processing" => Ok(Self::Processing),
            "migrated" => Ok(Self::Migrated),
            "error" => Ok(Self::Error),
            _ => Err(format!("Invalid migration status: {}", s)),
        }
    }
}

/// How a legacy file is brought into the store.
///
/// Only `Link` (ingest, then replace the original with a symlink) is executed
/// by the migrator; the other values are accepted when reading records written
/// by other tooling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum MigrationStrategy {
    Copy,
    Move,
    #[default]
    Link,
}

impl std::fmt::Display for MigrationStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Copy => write!(f, "copy"),
            Self::Move => write!(f, "move"),
            Self::Link => write!(f, "link"),
        }
    }
}

impl std::str::FromStr for MigrationStrategy {
    type Err = String;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "copy" => Ok(Self::Copy),
            "move" => Ok(Self::Move),
            "link" => Ok(Self::Link),
            _ => Err(format!("Invalid migration strategy: {}", s)),
        }
    }
}

// =============================================================================
// STORED OBJECTS
// =============================================================================

/// One unique content blob, keyed by its SHA1 hash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredObject {
    /// Lowercase hex SHA1 of the content.
    pub hash: String,
    /// Lowercase hex MD5 of the content.
    pub md5: Option<String>,
    /// Logical filename, `{hash}.{ext}` or `{hash}` when no extension is known.
    pub filename: String,
    /// Storage-relative path on `disk`.
    pub path: String,
    pub mime_type: String,
    pub size: i64,
    pub status: ProcessingStatus,
    pub disk: String,
    /// Name the content was first uploaded under.
    pub original_name: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Fields required to insert a new stored object.
#[derive(Debug, Clone)]
pub struct NewStoredObject {
    pub hash: String,
    pub md5: Option<String>,
    pub filename: String,
    pub path: String,
    pub mime_type: String,
    pub size: i64,
    pub status: ProcessingStatus,
    pub disk: String,
    pub original_name: Option<String>,
}

/// Result of an insert that may race with a concurrent insert of the same hash.
#[derive(Debug, Clone)]
pub enum InsertOutcome {
    /// This call created the row.
    Inserted(StoredObject),
    /// A row with the same hash already existed; it is returned unchanged.
    Existing(StoredObject),
}

impl InsertOutcome {
    pub fn into_object(self) -> StoredObject {
        match self {
            Self::Inserted(o) | Self::Existing(o) => o,
        }
    }

    pub fn was_inserted(&self) -> bool {
        matches!(self, Self::Inserted(_))
    }
}

// =============================================================================
// LINKS
// =============================================================================

/// Polymorphic reference to an owning entity: a type tag plus an opaque id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OwnerRef {
    pub owner_type: String,
    pub owner_id: String,
}

impl OwnerRef {
    pub fn new(owner_type: impl Into<String>, owner_id: impl Into<String>) -> Self {
        Self {
            owner_type: owner_type.into(),
            owner_id: owner_id.into(),
        }
    }
}

impl std::fmt::Display for OwnerRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.owner_type, self.owner_id)
    }
}

/// Association between one owner and one stored object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Link {
    pub id: i64,
    pub hash: String,
    pub owner_type: String,
    pub owner_id: String,
    pub status: ProcessingStatus,
    /// Name of the file as this owner knows it.
    pub original_name: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Link {
    pub fn owner(&self) -> OwnerRef {
        OwnerRef::new(&self.owner_type, &self.owner_id)
    }
}

/// Mutable link fields supplied by a caller.
///
/// `None` means "keep the existing value" on update and "use the default" on
/// create.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkAttributes {
    pub status: Option<ProcessingStatus>,
    pub original_name: Option<String>,
}

impl LinkAttributes {
    pub fn with_status(mut self, status: ProcessingStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_original_name(mut self, name: impl Into<String>) -> Self {
        self.original_name = Some(name.into());
        self
    }
}

/// Read filter for link listings.
#[derive(Debug, Clone, Default)]
pub struct LinkFilter {
    pub owner_type: Option<String>,
    pub status: Option<ProcessingStatus>,
}

impl LinkFilter {
    pub fn matches(&self, link: &Link) -> bool {
        self.owner_type
            .as_deref()
            .map_or(true, |t| link.owner_type == t)
            && self.status.map_or(true, |s| link.status == s)
    }
}

/// Per-call options for storing content.
#[derive(Debug, Clone, Default)]
pub struct StoreOptions {
    /// Disk override; the configured default disk when `None`.
    pub disk: Option<String>,
    /// Link metadata merged over the defaults.
    pub link: LinkAttributes,
}

// =============================================================================
// LEGACY MIGRATION
// =============================================================================

/// Bookkeeping for one file found in a legacy directory tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LegacyMigrationRecord {
    pub id: i64,
    pub original_dir: String,
    pub original_filename: String,
    pub hash: String,
    pub size: i64,
    pub mime_type: Option<String>,
    pub status: MigrationStatus,
    pub has_duplicates: bool,
    pub strategy: MigrationStrategy,
    pub migrated_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    pub file_modified_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl LegacyMigrationRecord {
    /// Owner reference used when linking this record to its stored object.
    pub fn owner(&self) -> OwnerRef {
        OwnerRef::new(crate::defaults::LEGACY_OWNER_TYPE, self.id.to_string())
    }
}

/// Observation of a legacy file, used to find-or-create its record.
#[derive(Debug, Clone)]
pub struct NewLegacyMigration {
    pub original_dir: String,
    pub original_filename: String,
    pub hash: String,
    pub size: i64,
    pub mime_type: Option<String>,
    pub file_modified_at: Option<DateTime<Utc>>,
}

// =============================================================================
// STATISTICS
// =============================================================================

/// Aggregate storage statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageStats {
    pub total_objects: i64,
    pub total_links: i64,
    pub linked_objects: i64,
    pub orphaned_objects: i64,
    pub total_bytes: i64,
    pub by_disk: Vec<DiskUsage>,
    pub by_type: Vec<TypeUsage>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiskUsage {
    pub disk: String,
    pub objects: i64,
    pub bytes: i64,
}

/// Object count per top-level MIME type (`image`, `text`, ...).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeUsage {
    pub mime_group: String,
    pub objects: i64,
    pub bytes: i64,
}
