//! Configuration loading.
//!
//! # Storage layout
//!
//! ```text
//! ~/.docsync/
//!   config.yaml
//! ```
//!
//! # API pattern
//!
//! Every loader has two forms:
//! - `fn_at(home: &Path, …)`: explicit home; used in tests with `TempDir`
//! - `fn(…)`: derives home from `dirs::home_dir()`, delegates to `_at`
//!
//! Tests must NEVER call the no-arg wrappers; always use `_at`.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::types::PoolBounds;

// ---------------------------------------------------------------------------
// 1. Config structs
// ---------------------------------------------------------------------------

/// Root of `config.yaml`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppConfig {
    pub store: StoreConfig,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub archive: Option<ArchiveConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub export: Option<TunnelConfig>,
}

/// Connection settings for the document store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Connection string, e.g. `mongodb://host:27017`.
    pub uri: String,
    pub database: String,
    #[serde(default = "default_min_pool")]
    pub min_pool_size: u32,
    #[serde(default = "default_max_pool")]
    pub max_pool_size: u32,
}

fn default_min_pool() -> u32 {
    PoolBounds::DEFAULT_MIN
}

fn default_max_pool() -> u32 {
    PoolBounds::DEFAULT_MAX
}

impl StoreConfig {
    pub fn new(uri: impl Into<String>, database: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            database: database.into(),
            min_pool_size: PoolBounds::DEFAULT_MIN,
            max_pool_size: PoolBounds::DEFAULT_MAX,
        }
    }

    /// Build from an opaque key/value mapping.
    ///
    /// Keys: `DB_HOST`, `DB_NAME`, optional `DB_MIN_POOL` and `DB_MAX_POOL`.
    pub fn from_map(map: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let uri = map.get("DB_HOST").ok_or(ConfigError::Missing("DB_HOST"))?;
        let database = map.get("DB_NAME").ok_or(ConfigError::Missing("DB_NAME"))?;
        let mut config = Self::new(uri.clone(), database.clone());
        if let Some(raw) = map.get("DB_MIN_POOL") {
            config.min_pool_size = parse_u32("DB_MIN_POOL", raw)?;
        }
        if let Some(raw) = map.get("DB_MAX_POOL") {
            config.max_pool_size = parse_u32("DB_MAX_POOL", raw)?;
        }
        config.validate()?;
        Ok(config)
    }

    pub fn pool_bounds(&self) -> PoolBounds {
        PoolBounds {
            min: self.min_pool_size,
            max: self.max_pool_size,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.uri.trim().is_empty() {
            return Err(ConfigError::Invalid("store.uri must not be empty".into()));
        }
        if self.database.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "store.database must not be empty".into(),
            ));
        }
        if self.max_pool_size == 0 {
            return Err(ConfigError::Invalid(
                "store.max_pool_size must be at least 1".into(),
            ));
        }
        if self.min_pool_size > self.max_pool_size {
            return Err(ConfigError::Invalid(format!(
                "store.min_pool_size ({}) exceeds store.max_pool_size ({})",
                self.min_pool_size, self.max_pool_size
            )));
        }
        Ok(())
    }
}

/// Settings for the dump/restore transfer between two databases.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveConfig {
    /// Connection string passed to both archive tools.
    pub uri: String,
    pub primary_database: String,
    pub archive_database: String,
    #[serde(default = "default_dump_program")]
    pub dump_program: PathBuf,
    #[serde(default = "default_restore_program")]
    pub restore_program: PathBuf,
}

fn default_dump_program() -> PathBuf {
    PathBuf::from("mongodump")
}

fn default_restore_program() -> PathBuf {
    PathBuf::from("mongorestore")
}

/// SSH tunnel plus relational database credentials for the export path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TunnelConfig {
    pub ssh_host: String,
    #[serde(default = "default_ssh_port")]
    pub ssh_port: u16,
    pub ssh_user: String,
    /// Private key file handed to `ssh -i`.
    pub ssh_pkey: PathBuf,
    pub db_host: String,
    #[serde(default = "default_db_port")]
    pub db_port: u16,
    pub db_user: String,
    pub db_pass: String,
    pub db_name: String,
    /// Local forwarding port; picked automatically when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_port: Option<u16>,
}

fn default_ssh_port() -> u16 {
    22
}

fn default_db_port() -> u16 {
    3306
}

fn parse_u32(key: &'static str, raw: &str) -> Result<u32, ConfigError> {
    raw.trim()
        .parse()
        .map_err(|_| ConfigError::Invalid(format!("{key} must be a non-negative integer, got '{raw}'")))
}

// ---------------------------------------------------------------------------
// 2. Path helpers
// ---------------------------------------------------------------------------

/// `<home>/.docsync/config.yaml`: pure, no I/O.
pub fn config_path_at(home: &Path) -> PathBuf {
    home.join(".docsync").join("config.yaml")
}

// ---------------------------------------------------------------------------
// 3. Load
// ---------------------------------------------------------------------------

/// Load and validate a config file at an explicit path.
///
/// Returns `ConfigError::NotFound` if absent,
/// `ConfigError::Parse` (with path + line context) if malformed YAML.
pub fn load_from(path: &Path) -> Result<AppConfig, ConfigError> {
    if !path.exists() {
        return Err(ConfigError::NotFound {
            path: path.to_path_buf(),
        });
    }
    let contents = std::fs::read_to_string(path)?;
    let config: AppConfig = serde_yaml::from_str(&contents).map_err(|e| ConfigError::Parse {
        path: path.to_path_buf(),
        source: e,
    })?;
    config.store.validate()?;
    Ok(config)
}

/// Load `<home>/.docsync/config.yaml`.
pub fn load_at(home: &Path) -> Result<AppConfig, ConfigError> {
    load_from(&config_path_at(home))
}

/// `load_at` convenience wrapper.
pub fn load() -> Result<AppConfig, ConfigError> {
    load_at(&home()?)
}

fn home() -> Result<PathBuf, ConfigError> {
    dirs::home_dir().ok_or(ConfigError::HomeNotFound)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
