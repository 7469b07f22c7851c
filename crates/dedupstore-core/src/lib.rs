//! # dedupstore-core
//!
//! Core types, traits, and primitives for the dedupstore content-addressed
//! file store.
//!
//! This crate provides the data model (stored objects, owner links, legacy
//! migration records), the repository traits the persistence layer
//! implements, content hashing, file source adapters, storage path policies,
//! and configuration loading.

pub mod config;
pub mod defaults;
pub mod error;
pub mod format;
pub mod hashing;
pub mod logging;
#[cfg(feature = "memory")]
pub mod memory;
pub mod mime;
pub mod models;
pub mod paths;
pub mod source;
pub mod traits;

// Re-export commonly used types at crate root
pub use config::{ConfigError, DiskConfig, DiskKind, StoreConfig};
pub use error::{Error, Result};
pub use format::format_bytes;
pub use hashing::{ContentHasher, ContentHashes};
pub use mime::detect_content_type;
pub use models::*;
pub use paths::PathPolicy;
pub use source::{ContentSource, FileSource, LocalFileSource, StreamSource, UploadedFileSource};
pub use traits::*;
