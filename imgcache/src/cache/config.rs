//! Configuration for the cache manager.

use std::path::PathBuf;
use std::time::Duration;

use crate::cache::types::CacheError;

const MB: u64 = 1024 * 1024;

/// Default memory budget (256 MB).
pub const DEFAULT_MEMORY_BUDGET_BYTES: u64 = 256 * MB;

/// Default disk size limit (2 GB).
pub const DEFAULT_MAX_DISK_BYTES: u64 = 2 * 1024 * MB;

/// Default maximum entry age (24 hours).
pub const DEFAULT_MAX_AGE: Duration = Duration::from_secs(24 * 60 * 60);

/// Default zlib level for disk payloads.
pub const DEFAULT_COMPRESSION_LEVEL: u32 = 6;

/// Highest accepted zlib level.
pub const MAX_COMPRESSION_LEVEL: u32 = 9;

/// Default interval between expiry sweeps (30 minutes).
pub const DEFAULT_CLEANUP_INTERVAL: Duration = Duration::from_secs(30 * 60);

/// Cache manager configuration.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Directory holding `<key>.cache` / `<key>.meta` pairs
    pub cache_dir: PathBuf,
    /// Disk size limit in bytes, enforced during sweeps
    pub max_disk_bytes: u64,
    /// Entries older than this are expired by the sweep
    pub max_age: Duration,
    /// zlib level for disk payloads (0 disables compression)
    pub compression_level: u32,
    /// Interval between expiry sweeps
    pub cleanup_interval: Duration,
    /// Persist entries to disk
    pub enable_disk: bool,
    /// Keep entries in memory
    pub enable_memory: bool,
    /// Memory tier byte budget
    pub memory_budget_bytes: u64,
    /// Promote recent disk entries into memory on startup
    pub warm_start: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self::new(default_cache_dir())
    }
}

impl CacheConfig {
    /// Create a configuration with defaults, storing entries in `cache_dir`.
    pub fn new(cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            cache_dir: cache_dir.into(),
            max_disk_bytes: DEFAULT_MAX_DISK_BYTES,
            max_age: DEFAULT_MAX_AGE,
            compression_level: DEFAULT_COMPRESSION_LEVEL,
            cleanup_interval: DEFAULT_CLEANUP_INTERVAL,
            enable_disk: true,
            enable_memory: true,
            memory_budget_bytes: DEFAULT_MEMORY_BUDGET_BYTES,
            warm_start: false,
        }
    }

    /// Set the memory budget in bytes.
    pub fn with_memory_budget(mut self, bytes: u64) -> Self {
        self.memory_budget_bytes = bytes;
        self
    }

    /// Set the disk size limit in bytes.
    pub fn with_max_disk_size(mut self, bytes: u64) -> Self {
        self.max_disk_bytes = bytes;
        self
    }

    /// Set the maximum entry age.
    pub fn with_max_age(mut self, max_age: Duration) -> Self {
        self.max_age = max_age;
        self
    }

    /// Set the zlib compression level (0-9).
    pub fn with_compression_level(mut self, level: u32) -> Self {
        self.compression_level = level;
        self
    }

    /// Set the interval between expiry sweeps.
    pub fn with_cleanup_interval(mut self, interval: Duration) -> Self {
        self.cleanup_interval = interval;
        self
    }

    /// Enable or disable the disk tier.
    pub fn with_disk_enabled(mut self, enabled: bool) -> Self {
        self.enable_disk = enabled;
        self
    }

    /// Enable or disable the memory tier.
    pub fn with_memory_enabled(mut self, enabled: bool) -> Self {
        self.enable_memory = enabled;
        self
    }

    /// Enable or disable warm promotion on startup.
    pub fn with_warm_start(mut self, enabled: bool) -> Self {
        self.warm_start = enabled;
        self
    }

    /// Check the configuration for mistakes the caller must fix.
    pub fn validate(&self) -> Result<(), CacheError> {
        if !self.enable_memory && !self.enable_disk {
            return Err(CacheError::InvalidConfig(
                "at least one of the memory and disk tiers must be enabled".to_string(),
            ));
        }
        if self.enable_memory && self.memory_budget_bytes == 0 {
            return Err(CacheError::InvalidConfig(
                "memory budget must be greater than zero".to_string(),
            ));
        }
        if self.enable_disk {
            if self.max_disk_bytes == 0 {
                return Err(CacheError::InvalidConfig(
                    "disk size limit must be greater than zero".to_string(),
                ));
            }
            if self.cache_dir.as_os_str().is_empty() {
                return Err(CacheError::InvalidConfig(
                    "cache directory must not be empty".to_string(),
                ));
            }
            if self.cache_dir.exists() && !self.cache_dir.is_dir() {
                return Err(CacheError::InvalidConfig(format!(
                    "cache directory '{}' is not a directory",
                    self.cache_dir.display()
                )));
            }
        }
        if self.compression_level > MAX_COMPRESSION_LEVEL {
            return Err(CacheError::InvalidConfig(format!(
                "compression level {} is out of range 0-{}",
                self.compression_level, MAX_COMPRESSION_LEVEL
            )));
        }
        if self.max_age.is_zero() || chrono::Duration::from_std(self.max_age).is_err() {
            return Err(CacheError::InvalidConfig(
                "max age must be a positive duration".to_string(),
            ));
        }
        if self.cleanup_interval.is_zero() {
            return Err(CacheError::InvalidConfig(
                "cleanup interval must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Platform cache directory for imgcache (e.g. `~/.cache/imgcache`).
pub fn default_cache_dir() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("imgcache")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_cache_config_defaults() {
        let config = CacheConfig::new("/tmp/imgcache");

        assert_eq!(config.memory_budget_bytes, 256 * 1024 * 1024);
        assert_eq!(config.max_disk_bytes, 2 * 1024 * 1024 * 1024);
        assert_eq!(config.max_age, Duration::from_secs(86_400));
        assert_eq!(config.compression_level, 6);
        assert_eq!(config.cleanup_interval, Duration::from_secs(1800));
        assert!(config.enable_disk);
        assert!(config.enable_memory);
        assert!(!config.warm_start);
    }

    #[test]
    fn test_default_cache_dir() {
        assert!(default_cache_dir().ends_with("imgcache"));
    }

    #[test]
    fn test_cache_config_builder() {
        let config = CacheConfig::new("/tmp/cache")
            .with_memory_budget(1_000_000)
            .with_max_disk_size(10_000_000)
            .with_max_age(Duration::from_secs(3600))
            .with_compression_level(9)
            .with_cleanup_interval(Duration::from_secs(60))
            .with_disk_enabled(false)
            .with_warm_start(true);

        assert_eq!(config.memory_budget_bytes, 1_000_000);
        assert_eq!(config.max_disk_bytes, 10_000_000);
        assert_eq!(config.max_age, Duration::from_secs(3600));
        assert_eq!(config.compression_level, 9);
        assert_eq!(config.cleanup_interval, Duration::from_secs(60));
        assert!(!config.enable_disk);
        assert!(config.warm_start);
    }

    #[test]
    fn test_validate_accepts_defaults() {
        let temp = TempDir::new().unwrap();
        assert!(CacheConfig::new(temp.path()).validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_budgets() {
        let temp = TempDir::new().unwrap();

        let config = CacheConfig::new(temp.path()).with_memory_budget(0);
        assert!(matches!(config.validate(), Err(CacheError::InvalidConfig(_))));

        let config = CacheConfig::new(temp.path()).with_max_disk_size(0);
        assert!(config.validate().is_err());

        // Zero memory budget is fine when the memory tier is off
        let config = CacheConfig::new(temp.path())
            .with_memory_budget(0)
            .with_memory_enabled(false);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_no_tiers() {
        let config = CacheConfig::new("/tmp/cache")
            .with_memory_enabled(false)
            .with_disk_enabled(false);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_file_as_directory() {
        let temp = TempDir::new().unwrap();
        let file = temp.path().join("not-a-dir");
        std::fs::write(&file, b"x").unwrap();

        assert!(CacheConfig::new(&file).validate().is_err());
    }

    #[test]
    fn test_validate_rejects_bad_ranges() {
        let temp = TempDir::new().unwrap();

        assert!(CacheConfig::new(temp.path())
            .with_compression_level(10)
            .validate()
            .is_err());
        assert!(CacheConfig::new(temp.path())
            .with_max_age(Duration::ZERO)
            .validate()
            .is_err());
        assert!(CacheConfig::new(temp.path())
            .with_cleanup_interval(Duration::ZERO)
            .validate()
            .is_err());
    }
}
