//! CLI runner for common setup and operations.
//!
//! Encapsulates config loading, logging initialization and cache creation
//! to reduce duplication across command handlers.

use std::path::Path;
use std::sync::Arc;

use imgcache::cache::CacheManager;
use imgcache::config::ConfigFile;
use imgcache::logging::{init_logging, LoggingGuard};
use tracing::info;

use crate::error::CliError;

/// Runner that manages CLI lifecycle and common operations.
pub struct CliRunner {
    /// Logging guard - keeps logging active while runner exists
    #[allow(dead_code)]
    logging_guard: LoggingGuard,
    /// Loaded configuration file
    config: ConfigFile,
}

impl CliRunner {
    /// Load config (from `config_path` or the default location) and
    /// initialize logging.
    pub fn new(config_path: Option<&Path>, verbose: bool) -> Result<Self, CliError> {
        let config = match config_path {
            Some(path) => ConfigFile::load_from(path)?,
            None => ConfigFile::load_from(&ConfigFile::ensure_exists()?)?,
        };

        let logging_guard = init_logging(&config.logging.directory, &config.logging.file, verbose)
            .map_err(|e| CliError::LoggingInit(e.to_string()))?;

        info!(version = imgcache::VERSION, "imgcache CLI starting");

        Ok(Self {
            logging_guard,
            config,
        })
    }

    /// Open the cache described by the configuration.
    pub async fn open_cache(&self) -> Result<Arc<CacheManager>, CliError> {
        let cache_config = self.config.to_cache_config();
        info!(dir = %cache_config.cache_dir.display(), "Opening cache");
        Ok(CacheManager::open(cache_config).await?)
    }
}
