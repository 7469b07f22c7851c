//! # dedupstore-engine
//!
//! Content-addressed storage on top of the dedupstore repositories.
//!
//! This crate provides:
//! - Storage backends and the named disk registry
//! - [`StorageEngine`]: hash, deduplicate, write, link, and reference-counted delete
//! - [`LinkRegistry`]: owner links
//! - [`LegacyMigrator`]: moves an existing file tree into the store behind symlinks
//! - [`Reconciler`]: orphaned link and object sweeps
//! - Duplicate analysis of plain directories
//!
//! ## Example
//!
//! ```ignore
//! use dedupstore_db::Database;
//! use dedupstore_engine::{DiskRegistry, EngineOptions, StorageEngine};
//!
//! let db = Database::connect(&config.database.url).await?;
//! let engine = StorageEngine::new(
//!     db.object_repository(),
//!     db.link_repository(),
//!     DiskRegistry::from_config(&config)?,
//!     EngineOptions::from_config(&config),
//! );
//! ```

pub mod analysis;
pub mod backend;
pub mod engine;
pub mod migrator;
pub mod owner;
pub mod reconciler;
pub mod registry;
pub mod scan;

pub use analysis::{analyse_directory, DuplicateAnalysis, DuplicateGroup};
pub use backend::{DiskRegistry, FilesystemBackend, StorageBackend};
pub use engine::{Download, EngineOptions, StorageEngine};
pub use migrator::{
    BackupCleanupReport, FileFailure, LegacyMigrator, MigrationOptions, MigrationReport,
    RollbackReport, UnrestorableFile, UnrestorableReason,
};
pub use owner::{FileOwner, OwnerFiles};
pub use reconciler::{Reconciler, SweepOptions, SweepReport};
pub use registry::LinkRegistry;
