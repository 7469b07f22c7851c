//! Structured logging schema and field name constants for dedupstore.
//!
//! All crates use these constants for consistent structured logging fields,
//! so log aggregation can query every subsystem by the same field names.
//!
//! ## Log Level Contract
//!
//! | Level | Usage |
//! |-------|-------|
//! | ERROR | Degraded service, requires operator attention |
//! | WARN  | Recoverable issue, automatic fallback applied |
//! | INFO  | Lifecycle events, operation completions, sweep summaries |
//! | DEBUG | Decision points (dedup hit, hashing mode, disk choice) |
//! | TRACE | Per-file iteration during migration and analysis |

// ─── Identity fields ───────────────────────────────────────────────────────

/// Correlation ID for one HTTP request.
/// Format: UUIDv7 (time-ordered).
pub const REQUEST_ID: &str = "request_id";

/// Subsystem originating the log event.
/// Values: "api", "cli", "db", "engine", "migrator", "reconciler"
pub const SUBSYSTEM: &str = "subsystem";

/// Component within a subsystem.
/// Examples: "pool", "filesystem", "links", "objects"
pub const COMPONENT: &str = "component";

/// Logical operation name.
/// Examples: "store", "attach", "detach", "sweep_links"
pub const OPERATION: &str = "op";

// ─── Entity fields ─────────────────────────────────────────────────────────

/// Primary content hash (SHA1 hex).
pub const HASH: &str = "hash";

/// Named storage disk.
pub const DISK: &str = "disk";

/// Storage-relative blob path.
pub const STORAGE_PATH: &str = "storage_path";

/// Owner type tag of a link.
pub const OWNER_TYPE: &str = "owner_type";

/// Owner id of a link.
pub const OWNER_ID: &str = "owner_id";

/// Filesystem path of a legacy file.
pub const FILE_PATH: &str = "file_path";

// ─── Measurement fields ────────────────────────────────────────────────────

/// Wall-clock duration in milliseconds.
pub const DURATION_MS: &str = "duration_ms";

/// Byte size of a blob or file.
pub const SIZE_BYTES: &str = "size_bytes";

/// Number of items affected by a sweep or batch.
pub const AFFECTED: &str = "affected";

/// Bytes reclaimed by a sweep.
pub const BYTES_RECLAIMED: &str = "bytes_reclaimed";

// ─── Database fields ───────────────────────────────────────────────────────

/// Number of active connections in the pool.
pub const POOL_SIZE: &str = "pool_size";

/// Number of idle connections in the pool.
pub const POOL_IDLE: &str = "pool_idle";

/// Database table or entity affected.
pub const DB_TABLE: &str = "db_table";

// ─── Outcome fields ────────────────────────────────────────────────────────

/// Boolean success/failure indicator.
pub const SUCCESS: &str = "success";

/// Whether content was already present (no blob write).
pub const DEDUPLICATED: &str = "deduplicated";

/// Error message when an operation fails.
pub const ERROR_MSG: &str = "error";

/// Whether the operation ran without mutations.
pub const DRY_RUN: &str = "dry_run";
