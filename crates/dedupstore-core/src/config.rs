//! Configuration for dedupstore.
//!
//! Loaded from `$DEDUPSTORE_CONFIG`, else `~/.config/dedupstore/config.toml`,
//! else environment variables. TOML values may reference environment
//! variables as `${NAME}`.
//!
//! ```toml
//! [database]
//! url = "${DATABASE_URL}"
//!
//! [storage]
//! default_disk = "public"
//! path_policy = "hash_based"
//!
//! [storage.disks.public]
//! kind = "local"
//! root = "/var/lib/dedupstore/public"
//! url = "https://files.example.com/storage"
//!
//! [hashing]
//! stream_threshold = 1048576
//! chunk_size = 1048576
//! ```

use std::collections::BTreeMap;
use std::env;
use std::path::PathBuf;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::defaults;
use crate::paths::PathPolicy;

/// Configuration loading errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),
}

pub type ConfigResult<T> = Result<T, ConfigError>;

/// Kind of storage behind a named disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DiskKind {
    /// Directory on the local filesystem.
    #[default]
    Local,
}

impl std::fmt::Display for DiskKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Local => write!(f, "local"),
        }
    }
}

/// One named storage disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiskConfig {
    #[serde(default)]
    pub kind: DiskKind,
    /// Root directory for local disks.
    pub root: PathBuf,
    /// Public base URL; disks without one cannot produce URLs.
    #[serde(default)]
    pub url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_disk_name")]
    pub default_disk: String,
    #[serde(default)]
    pub path_policy: PathPolicy,
    #[serde(default)]
    pub disks: BTreeMap<String, DiskConfig>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HashingConfig {
    /// Sources larger than this are hashed and written in streaming mode.
    #[serde(default = "default_stream_threshold")]
    pub stream_threshold: u64,
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
}

impl Default for HashingConfig {
    fn default() -> Self {
        Self {
            stream_threshold: defaults::STREAM_THRESHOLD_BYTES,
            chunk_size: defaults::HASH_CHUNK_SIZE,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default = "default_max_upload")]
    pub max_upload_bytes: usize,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            bind: defaults::API_BIND_ADDR.to_string(),
            max_upload_bytes: defaults::MAX_UPLOAD_BYTES,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadConfig {
    #[serde(default = "default_cache_control")]
    pub cache_control: String,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            cache_control: defaults::DOWNLOAD_CACHE_CONTROL.to_string(),
        }
    }
}

/// Complete dedupstore configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreConfig {
    pub database: DatabaseConfig,
    pub storage: StorageConfig,
    #[serde(default)]
    pub hashing: HashingConfig,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub download: DownloadConfig,
}

fn default_max_connections() -> u32 {
    defaults::DB_MAX_CONNECTIONS
}

fn default_disk_name() -> String {
    defaults::DEFAULT_DISK.to_string()
}

fn default_stream_threshold() -> u64 {
    defaults::STREAM_THRESHOLD_BYTES
}

fn default_chunk_size() -> usize {
    defaults::HASH_CHUNK_SIZE
}

fn default_bind() -> String {
    defaults::API_BIND_ADDR.to_string()
}

fn default_max_upload() -> usize {
    defaults::MAX_UPLOAD_BYTES
}

fn default_cache_control() -> String {
    defaults::DOWNLOAD_CACHE_CONTROL.to_string()
}

static ENV_VAR_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)\}").expect("valid env var pattern"));

impl StoreConfig {
    /// Default config file location: `~/.config/dedupstore/config.toml`.
    pub fn default_config_path() -> PathBuf {
        let mut path = dirs::config_dir().unwrap_or_else(|| PathBuf::from(".config"));
        path.push("dedupstore");
        path.push("config.toml");
        path
    }

    /// Load configuration from the config file, falling back to environment variables.
    pub fn load() -> ConfigResult<Self> {
        let path = env::var("DEDUPSTORE_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| Self::default_config_path());

        let config = if path.exists() {
            info!(path = %path.display(), "Loading dedupstore config");
            Self::from_file(&path)?
        } else {
            debug!(
                path = %path.display(),
                "Config file not found, using environment variables"
            );
            Self::from_env()
        };

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file.
    pub fn from_file(path: &std::path::Path) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Parse configuration from TOML text after `${VAR}` substitution.
    pub fn from_toml_str(content: &str) -> ConfigResult<Self> {
        let content = Self::substitute_env_vars(content);
        Ok(toml::from_str(&content)?)
    }

    /// Build configuration from environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let default_disk = lookup("DEDUPSTORE_DISK").unwrap_or_else(default_disk_name);
        let root = lookup("DEDUPSTORE_STORAGE_ROOT")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(defaults::STORAGE_ROOT));

        let mut disks = BTreeMap::new();
        disks.insert(
            default_disk.clone(),
            DiskConfig {
                kind: DiskKind::Local,
                root,
                url: lookup("DEDUPSTORE_PUBLIC_URL"),
            },
        );

        Self {
            database: DatabaseConfig {
                url: lookup("DATABASE_URL").unwrap_or_else(|| defaults::DATABASE_URL.to_string()),
                max_connections: lookup("DEDUPSTORE_DB_MAX_CONNECTIONS")
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(defaults::DB_MAX_CONNECTIONS),
            },
            storage: StorageConfig {
                default_disk,
                path_policy: lookup("DEDUPSTORE_PATH_POLICY")
                    .and_then(|s| s.parse().ok())
                    .unwrap_or_default(),
                disks,
            },
            hashing: HashingConfig {
                stream_threshold: lookup("DEDUPSTORE_STREAM_THRESHOLD")
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(defaults::STREAM_THRESHOLD_BYTES),
                chunk_size: lookup("DEDUPSTORE_CHUNK_SIZE")
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(defaults::HASH_CHUNK_SIZE),
            },
            api: ApiConfig {
                bind: lookup("DEDUPSTORE_BIND").unwrap_or_else(default_bind),
                max_upload_bytes: lookup("DEDUPSTORE_MAX_UPLOAD_BYTES")
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(defaults::MAX_UPLOAD_BYTES),
            },
            download: DownloadConfig {
                cache_control: lookup("DEDUPSTORE_CACHE_CONTROL")
                    .unwrap_or_else(default_cache_control),
            },
        }
    }

    /// Check internal consistency.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.database.url.trim().is_empty() {
            return Err(ConfigError::Validation("database.url is empty".into()));
        }
        if self.storage.disks.is_empty() {
            return Err(ConfigError::Validation("no storage disks configured".into()));
        }
        if !self.storage.disks.contains_key(&self.storage.default_disk) {
            return Err(ConfigError::Validation(format!(
                "default disk '{}' is not configured",
                self.storage.default_disk
            )));
        }
        for (name, disk) in &self.storage.disks {
            if disk.root.as_os_str().is_empty() {
                return Err(ConfigError::Validation(format!(
                    "disk '{}' has an empty root",
                    name
                )));
            }
        }
        if self.hashing.chunk_size == 0 {
            return Err(ConfigError::Validation(
                "hashing.chunk_size must be positive".into(),
            ));
        }
        Ok(())
    }

    fn substitute_env_vars(content: &str) -> String {
        ENV_VAR_PATTERN
            .replace_all(content, |caps: &regex::Captures| {
                let var_name = &caps[1];
                env::var(var_name).unwrap_or_else(|_| format!("${{{}}}", var_name))
            })
            .to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    const SAMPLE: &str = r#"
[database]
url = "postgres://db/dedup"

[storage]
default_disk = "public"
path_policy = "date_based"

[storage.disks.public]
kind = "local"
root = "/srv/public"
url = "https://cdn.example.com/files"

[storage.disks.private]
root = "/srv/private"
"#;

    #[test]
    fn test_parse_toml() {
        let config = StoreConfig::from_toml_str(SAMPLE).unwrap();
        assert_eq!(config.database.url, "postgres://db/dedup");
        assert_eq!(config.database.max_connections, defaults::DB_MAX_CONNECTIONS);
        assert_eq!(config.storage.path_policy, PathPolicy::DateBased);
        assert_eq!(config.storage.disks.len(), 2);
        assert_eq!(config.storage.disks["private"].kind, DiskKind::Local);
        assert_eq!(config.storage.disks["private"].url, None);
        assert_eq!(config.hashing, HashingConfig::default());
        assert_eq!(config.download.cache_control, "public, max-age=31536000");
        config.validate().unwrap();
    }

    #[test]
    fn test_env_var_substitution_with_value() {
        let content = "url = \"${DEDUPSTORE_TEST_SUBSTITUTION_VAR}\"";

        env::set_var("DEDUPSTORE_TEST_SUBSTITUTION_VAR", "postgres://x");
        let result = StoreConfig::substitute_env_vars(content);
        env::remove_var("DEDUPSTORE_TEST_SUBSTITUTION_VAR");

        assert_eq!(result, "url = \"postgres://x\"");
    }

    #[test]
    fn test_env_var_substitution_missing_keeps_placeholder() {
        let content = "url = \"${DEDUPSTORE_TEST_DEFINITELY_UNSET}\"";
        assert_eq!(StoreConfig::substitute_env_vars(content), content);
    }

    #[test]
    fn test_from_lookup_defaults() {
        let config = StoreConfig::from_lookup(|_| None);
        assert_eq!(config.storage.default_disk, "public");
        assert_eq!(
            config.storage.disks["public"].root,
            PathBuf::from(defaults::STORAGE_ROOT)
        );
        assert_eq!(config.hashing.stream_threshold, 1024 * 1024);
        config.validate().unwrap();
    }

    #[test]
    fn test_from_lookup_overrides() {
        let vars: HashMap<&str, &str> = [
            ("DATABASE_URL", "postgres://env/db"),
            ("DEDUPSTORE_DISK", "media"),
            ("DEDUPSTORE_STORAGE_ROOT", "/data/media"),
            ("DEDUPSTORE_PUBLIC_URL", "https://media.example.com"),
            ("DEDUPSTORE_STREAM_THRESHOLD", "4096"),
            ("DEDUPSTORE_PATH_POLICY", "date_based"),
            ("DEDUPSTORE_CHUNK_SIZE", "not-a-number"),
        ]
        .into_iter()
        .collect();

        let config = StoreConfig::from_lookup(|k| vars.get(k).map(|v| v.to_string()));
        assert_eq!(config.database.url, "postgres://env/db");
        assert_eq!(config.storage.default_disk, "media");
        assert_eq!(config.storage.disks["media"].root, PathBuf::from("/data/media"));
        assert_eq!(
            config.storage.disks["media"].url.as_deref(),
            Some("https://media.example.com")
        );
        assert_eq!(config.hashing.stream_threshold, 4096);
        assert_eq!(config.hashing.chunk_size, defaults::HASH_CHUNK_SIZE);
        assert_eq!(config.storage.path_policy, PathPolicy::DateBased);
    }

    #[test]
    fn test_validate_unknown_default_disk() {
        let mut config = StoreConfig::from_lookup(|_| None);
        config.storage.default_disk = "missing".into();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("default disk 'missing'"));
    }

    #[test]
    fn test_validate_zero_chunk_size() {
        let mut config = StoreConfig::from_lookup(|_| None);
        config.hashing.chunk_size = 0;
        assert!(config.validate().is_err());
    }
}
