//! Configuration file handling for ~/.imgcache/config.ini.
//!
//! Loads and saves user configuration with sensible defaults. Parsing lives
//! in [`super::parser`] and serialization in [`super::writer`].

use std::path::{Path, PathBuf};
use std::time::Duration;

use ini::Ini;
use thiserror::Error;

use crate::cache::{
    default_cache_dir, CacheConfig, DEFAULT_CLEANUP_INTERVAL, DEFAULT_COMPRESSION_LEVEL,
    DEFAULT_MAX_AGE, DEFAULT_MAX_DISK_BYTES, DEFAULT_MEMORY_BUDGET_BYTES,
};
use crate::logging::{default_log_dir, default_log_file};

/// Configuration file errors.
#[derive(Debug, Error)]
pub enum ConfigFileError {
    /// Failed to read config file
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] ini::Error),

    /// Failed to write config file
    #[error("Failed to write config file: {0}")]
    WriteError(String),

    /// Invalid configuration value
    #[error("Invalid configuration: {section}.{key} = '{value}' - {reason}")]
    InvalidValue {
        section: String,
        key: String,
        value: String,
        reason: String,
    },

    /// Failed to create config directory
    #[error("Failed to create config directory: {0}")]
    DirectoryError(std::io::Error),
}

/// `[cache]` section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheSettings {
    pub directory: PathBuf,
    pub memory_budget: u64,
    pub max_size: u64,
    pub max_age_hours: u64,
    pub compression_level: u32,
    pub cleanup_interval_minutes: u64,
    pub enable_disk: bool,
    pub enable_memory: bool,
    pub warm_start: bool,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            directory: default_cache_dir(),
            memory_budget: DEFAULT_MEMORY_BUDGET_BYTES,
            max_size: DEFAULT_MAX_DISK_BYTES,
            max_age_hours: DEFAULT_MAX_AGE.as_secs() / 3600,
            compression_level: DEFAULT_COMPRESSION_LEVEL,
            cleanup_interval_minutes: DEFAULT_CLEANUP_INTERVAL.as_secs() / 60,
            enable_disk: true,
            enable_memory: true,
            warm_start: false,
        }
    }
}

/// `[logging]` section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggingSettings {
    pub directory: PathBuf,
    pub file: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            directory: default_log_dir(),
            file: default_log_file().to_string(),
        }
    }
}

/// Contents of `config.ini`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigFile {
    pub cache: CacheSettings,
    pub logging: LoggingSettings,
}

impl ConfigFile {
    /// Load configuration from the default path (~/.imgcache/config.ini).
    pub fn load() -> Result<Self, ConfigFileError> {
        Self::load_from(&config_file_path())
    }

    /// Load configuration from a specific path.
    ///
    /// If the file doesn't exist, returns defaults.
    pub fn load_from(path: &Path) -> Result<Self, ConfigFileError> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let ini = Ini::load_from_file(path)?;
        super::parser::parse_ini(&ini)
    }

    /// Save configuration to a specific path.
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigFileError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(ConfigFileError::DirectoryError)?;
        }

        let content = super::writer::to_config_string(self);
        std::fs::write(path, content).map_err(|e| ConfigFileError::WriteError(e.to_string()))
    }

    /// Create the default config file if it doesn't exist.
    ///
    /// Returns the path to the config file.
    pub fn ensure_exists() -> Result<PathBuf, ConfigFileError> {
        let path = config_file_path();
        if !path.exists() {
            Self::default().save_to(&path)?;
        }
        Ok(path)
    }

    /// Build the cache manager configuration from the `[cache]` section.
    pub fn to_cache_config(&self) -> CacheConfig {
        let cache = &self.cache;
        CacheConfig::new(&cache.directory)
            .with_memory_budget(cache.memory_budget)
            .with_max_disk_size(cache.max_size)
            .with_max_age(Duration::from_secs(cache.max_age_hours.saturating_mul(3600)))
            .with_compression_level(cache.compression_level)
            .with_cleanup_interval(Duration::from_secs(
                cache.cleanup_interval_minutes.saturating_mul(60),
            ))
            .with_disk_enabled(cache.enable_disk)
            .with_memory_enabled(cache.enable_memory)
            .with_warm_start(cache.warm_start)
    }
}

/// Get the path to the config directory (~/.imgcache).
pub fn config_directory() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".imgcache")
}

/// Get the path to the config file (~/.imgcache/config.ini).
pub fn config_file_path() -> PathBuf {
    config_directory().join("config.ini")
}
