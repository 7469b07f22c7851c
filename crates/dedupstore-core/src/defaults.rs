//! Centralized default constants for dedupstore.
//!
//! All crates reference these constants instead of defining their own magic
//! numbers. Organized by domain area.

// =============================================================================
// HASHING
// =============================================================================

/// Sources at or below this size are hashed from a single in-memory buffer.
/// Larger (or unknown-size) sources are hashed in streaming mode.
pub const STREAM_THRESHOLD_BYTES: u64 = 1024 * 1024;

/// Chunk size for streaming hash computation and blob copies.
pub const HASH_CHUNK_SIZE: usize = 1024 * 1024;

/// Bytes read from the head of a file for magic-byte MIME detection.
pub const MIME_SNIFF_BYTES: usize = 8192;

// =============================================================================
// STORAGE
// =============================================================================

/// Name of the disk used when a caller does not select one.
pub const DEFAULT_DISK: &str = "public";

/// Root directory for the default local disk.
pub const STORAGE_ROOT: &str = "./storage/dedupstore";

/// Fallback MIME type when neither content nor extension identify a file.
pub const FALLBACK_MIME_TYPE: &str = "application/octet-stream";

/// Health-check probe location inside each local disk.
pub const HEALTH_CHECK_PATH: &str = ".health-check/probe.bin";

// =============================================================================
// LINKS
// =============================================================================

/// Owner type tag used for legacy migration records.
pub const LEGACY_OWNER_TYPE: &str = "legacy_file_migration";

/// Owner type tag used for uploads that arrive without an owner.
pub const TEMPORARY_OWNER_TYPE: &str = "upload";

/// Prefix for generated temporary owner ids.
pub const TEMPORARY_OWNER_PREFIX: &str = "temp_";

/// Number of most recent links shown with a stored object's details.
pub const RECENT_LINKS_LIMIT: i64 = 10;

// =============================================================================
// LEGACY MIGRATION
// =============================================================================

/// Suffix appended to a legacy file while its symlink is installed.
pub const BACKUP_SUFFIX: &str = ".backup";

/// Files processed per progress chunk during legacy migration.
pub const MIGRATION_CHUNK_SIZE: usize = 100;

// =============================================================================
// RECONCILIATION
// =============================================================================

/// Rows fetched per keyset page during orphan sweeps.
pub const SWEEP_CHUNK_SIZE: i64 = 1000;

// =============================================================================
// HTTP API
// =============================================================================

/// Default bind address for the HTTP API.
pub const API_BIND_ADDR: &str = "0.0.0.0:3000";

/// Maximum accepted upload size (100 MiB).
pub const MAX_UPLOAD_BYTES: usize = 100 * 1024 * 1024;

/// Cache-Control header sent with inline streams.
pub const DOWNLOAD_CACHE_CONTROL: &str = "public, max-age=31536000";

/// Default expiry for temporary URLs, in seconds.
pub const TEMPORARY_URL_TTL_SECS: u64 = 3600;

// =============================================================================
// DATABASE
// =============================================================================

/// Default database URL when neither config file nor environment provide one.
pub const DATABASE_URL: &str = "postgres://localhost/dedupstore";

/// Default maximum number of pooled connections.
pub const DB_MAX_CONNECTIONS: u32 = 10;
