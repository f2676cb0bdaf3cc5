//! Configuration loading
//!
//! Handles parsing of `config.toml`, looked up at `STREAKUST_CONFIG` or in the
//! platform config directory (`~/.config/streakust/config.toml` on Linux).

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Environment variable pointing at an explicit config file
pub const CONFIG_ENV: &str = "STREAKUST_CONFIG";

/// Environment variable that enables the remote mirror at the given root
pub const REMOTE_ROOT_ENV: &str = "STREAKUST_REMOTE_ROOT";

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Local store configuration
    #[serde(default)]
    pub storage: StorageConfig,

    /// Remote mirror configuration
    #[serde(default)]
    pub remote: RemoteConfig,
}

/// Local store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Override for the data directory
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<PathBuf>,

    /// Copy the records to backup files every this many saves
    #[serde(default = "default_backup_every")]
    pub backup_every: u64,
}

fn default_backup_every() -> u64 {
    10
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: None,
            backup_every: default_backup_every(),
        }
    }
}

/// How the remote document store lays out the three records
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DocumentLayout {
    /// One document holding tasks, routine and streak together
    #[default]
    Combined,
    /// One document per record
    PerRecord,
}

/// Remote mirror configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteConfig {
    /// Whether to mirror to the remote document store
    #[serde(default)]
    pub enabled: bool,

    /// Root directory of the document store
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root: Option<PathBuf>,

    /// Collection holding the documents
    #[serde(default = "default_collection")]
    pub collection: String,

    /// Document name within the collection
    #[serde(default = "default_document")]
    pub document: String,

    #[serde(default)]
    pub layout: DocumentLayout,

    /// Snapshots that may wait for the remote writer before new ones are dropped
    #[serde(default = "default_outbox_capacity")]
    pub outbox_capacity: usize,

    /// Extra attempts after a failed remote write
    #[serde(default = "default_write_retries")]
    pub write_retries: u32,

    /// Delay before the first retry; grows linearly with each attempt
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
}

fn default_collection() -> String {
    "sharedTasks".to_string()
}

fn default_document() -> String {
    "data".to_string()
}

fn default_outbox_capacity() -> usize {
    16
}

fn default_write_retries() -> u32 {
    3
}

fn default_retry_backoff_ms() -> u64 {
    250
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            root: None,
            collection: default_collection(),
            document: default_document(),
            layout: DocumentLayout::default(),
            outbox_capacity: default_outbox_capacity(),
            write_retries: default_write_retries(),
            retry_backoff_ms: default_retry_backoff_ms(),
        }
    }
}

impl Config {
    /// Load configuration from a file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let mut config: Config = toml::from_str(&content)?;
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from the default location, or return defaults
    ///
    /// A missing file is not an error; a file that exists but does not parse is.
    pub fn load_default() -> Result<Self> {
        match default_path() {
            Some(path) if path.exists() => Self::load(&path),
            _ => {
                let mut config = Self::default();
                config.apply_env();
                config.validate()?;
                Ok(config)
            }
        }
    }

    /// Save configuration to a file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        Ok(())
    }

    fn apply_env(&mut self) {
        if let Some(root) = std::env::var_os(REMOTE_ROOT_ENV).filter(|v| !v.is_empty()) {
            self.remote.enabled = true;
            self.remote.root = Some(PathBuf::from(root));
        }
    }

    fn validate(&self) -> Result<()> {
        self.storage.validate()?;
        self.remote.validate()?;
        Ok(())
    }
}

impl StorageConfig {
    fn validate(&self) -> Result<()> {
        if self.backup_every == 0 {
            return Err(Error::InvalidConfig(
                "storage.backup_every must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

impl RemoteConfig {
    fn validate(&self) -> Result<()> {
        if !self.enabled {
            return Ok(());
        }
        if self.root.is_none() {
            return Err(Error::InvalidConfig(
                "remote.root is required when the remote is enabled".to_string(),
            ));
        }
        for (name, value) in [("collection", &self.collection), ("document", &self.document)] {
            let value = value.trim();
            if value.is_empty() || value.contains(['/', '\\']) || value == "." || value == ".." {
                return Err(Error::InvalidConfig(format!(
                    "remote.{} must be a plain name, got '{}'",
                    name, value
                )));
            }
        }
        if self.outbox_capacity == 0 {
            return Err(Error::InvalidConfig(
                "remote.outbox_capacity must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Path of the config file: `STREAKUST_CONFIG`, else the platform config dir
pub fn default_path() -> Option<PathBuf> {
    if let Some(path) = std::env::var_os(CONFIG_ENV).filter(|v| !v.is_empty()) {
        return Some(PathBuf::from(path));
    }
    dirs::config_dir().map(|p| p.join("streakust").join("config.toml"))
}
