//! Configuration types for SketchIO
//!
//! This module defines configuration structures used across components.
//! Every field has a default so a partial (or missing) TOML file is valid.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default per-file page cache capacity (entries)
pub const DEFAULT_FILE_CACHE_ENTRIES: usize = 100_000;

/// Default bound on simultaneously open data files
pub const DEFAULT_MAX_OPEN_FILES: usize = 1024;

/// Root configuration for SketchIO
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    /// Storage configuration
    #[serde(default)]
    pub storage: StorageConfig,
    /// Persistence scheduling configuration
    #[serde(default)]
    pub persist: PersistConfig,
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Parse a configuration from TOML text
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw).map_err(|e| Error::configuration(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load a configuration file; a missing file yields the defaults
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path)?;
        Self::from_toml_str(&raw)
    }

    /// Reject values that would disable the persistence triggers
    pub fn validate(&self) -> Result<()> {
        if self.persist.save_threshold_ops == 0 {
            return Err(Error::configuration(
                "persist.save_threshold_ops must be at least 1",
            ));
        }
        if self.persist.save_threshold_seconds == 0 {
            return Err(Error::configuration(
                "persist.save_threshold_seconds must be at least 1",
            ));
        }
        if self.storage.file_cache_entries == 0 {
            return Err(Error::configuration(
                "storage.file_cache_entries must be at least 1",
            ));
        }
        if self.storage.max_open_files == 0 {
            return Err(Error::configuration(
                "storage.max_open_files must be at least 1",
            ));
        }
        Ok(())
    }
}

/// Storage configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory holding one data file per sketch
    pub data_dir: PathBuf,
    /// Directory holding one metadata record per sketch
    pub info_dir: PathBuf,
    /// Page cache capacity of each data file, in entries
    pub file_cache_entries: usize,
    /// Maximum number of data files kept open at once
    pub max_open_files: usize,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./sketchio-data"),
            info_dir: PathBuf::from("./sketchio-info"),
            file_cache_entries: DEFAULT_FILE_CACHE_ENTRIES,
            max_open_files: DEFAULT_MAX_OPEN_FILES,
        }
    }
}

impl StorageConfig {
    /// Storage rooted at a single directory (`<root>/data`, `<root>/info`)
    pub fn rooted_at(root: impl AsRef<Path>) -> Self {
        let root = root.as_ref();
        Self {
            data_dir: root.join("data"),
            info_dir: root.join("info"),
            ..Self::default()
        }
    }
}

/// When a sketch's in-memory state is written to storage
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistConfig {
    /// Save synchronously every N mutations
    pub save_threshold_ops: u64,
    /// Save in the background every N seconds while dirty
    pub save_threshold_seconds: u64,
}

impl Default for PersistConfig {
    fn default() -> Self {
        Self {
            save_threshold_ops: 1,
            save_threshold_seconds: 1,
        }
    }
}

impl PersistConfig {
    /// Autosave interval
    #[must_use]
    pub const fn autosave_interval(&self) -> Duration {
        Duration::from_secs(self.save_threshold_seconds)
    }
}

/// Logging configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default log level filter (overridden by `RUST_LOG`)
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}
