//! Storage path generation for stored objects.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Policy mapping a content hash to a storage-relative path.
///
/// - `HashBased`: `{h[0..2]}/{h[2..4]}/{hash}.{ext}`, a pure function of hash
///   and extension
/// - `DateBased`: `{YYYY}/{MM}/{DD}/{hash}.{ext}` using the ingest date
///
/// Objects record the path they were written to, so switching policy never
/// strands existing blobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PathPolicy {
    #[default]
    HashBased,
    DateBased,
}

impl PathPolicy {
    /// Build the storage path for `hash` with an optional extension.
    pub fn generate(&self, hash: &str, extension: Option<&str>, date: NaiveDate) -> String {
        let filename = filename_for(hash, extension);
        match self {
            Self::HashBased if hash.len() >= 4 => {
                format!("{}/{}/{}", &hash[0..2], &hash[2..4], filename)
            }
            Self::HashBased => filename,
            Self::DateBased => format!("{}/{}", date.format("%Y/%m/%d"), filename),
        }
    }
}

impl std::fmt::Display for PathPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::HashBased => write!(f, "hash_based"),
            Self::DateBased => write!(f, "date_based"),
        }
    }
}

impl std::str::FromStr for PathPolicy {
    type Err = String;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "hash_based" | "hash" => Ok(Self::HashBased),
            "date_based" | "date" => Ok(Self::DateBased),
            _ => Err(format!("Invalid path policy: {}", s)),
        }
    }
}

/// Logical filename for a stored object: `{hash}.{ext}`, or `{hash}` without one.
pub fn filename_for(hash: &str, extension: Option<&str>) -> String {
    match extension.filter(|e| !e.is_empty()) {
        Some(ext) => format!("{}.{}", hash, ext),
        None => hash.to_string(),
    }
}
