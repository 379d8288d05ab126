//! Two-tier cache for processed images.
//!
//! Provides a byte-budgeted memory tier with LRU eviction, a crash-safe disk
//! tier, periodic expiry sweeps and statistics tracking, orchestrated by
//! [`CacheManager`].

mod codec;
mod config;
mod disk;
mod expiry;
mod key;
mod manager;
mod memory;
mod stats;
mod types;

pub use config::{
    default_cache_dir, CacheConfig, DEFAULT_CLEANUP_INTERVAL, DEFAULT_COMPRESSION_LEVEL,
    DEFAULT_MAX_AGE, DEFAULT_MAX_DISK_BYTES, DEFAULT_MEMORY_BUDGET_BYTES, MAX_COMPRESSION_LEVEL,
};
pub use disk::{DiskCache, DiskEntryInfo, DiskLoad, RecoveryReport, META_EXTENSION, PAYLOAD_EXTENSION};
pub use expiry::{ExpiryDaemon, OptimizeReport, SweepReport, DISK_EVICTION_TARGET};
pub use key::{generate_key, generate_key_at, time_bucket, KEY_HEX_LEN};
pub use manager::CacheManager;
pub use memory::{Evicted, MemoryCache, MEMORY_WATERMARK};
pub use stats::{CacheMetrics, CacheStats, KeyAccess};
pub use types::{
    CacheEntry, CacheError, CacheKey, CacheResult, CacheSource, EntryMetadata, ImageMetadata,
    MAX_KEY_LEN,
};
