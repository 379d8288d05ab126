//! Cache statistics tracking and reporting.

use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};

use crate::cache::types::{CacheKey, CacheSource};

/// Cache statistics for monitoring and debugging.
#[derive(Debug, Clone)]
pub struct CacheStats {
    // Lookups
    pub memory_hits: u64,
    pub disk_hits: u64,
    pub misses: u64,
    pub promotions: u64,

    // Writes
    pub writes: u64,
    pub memory_write_skips: u64,
    pub disk_write_failures: u64,
    pub disk_read_failures: u64,

    // Removals
    pub memory_evictions: u64,
    pub disk_evictions: u64,
    pub expired_entries: u64,
    pub bytes_freed: u64,
    pub corrupt_entries: u64,

    // Latency (running mean over every get/set)
    pub latency_samples: u64,
    pub average_latency_ms: f64,

    // Timing
    pub created_at: Instant,
}

impl Default for CacheStats {
    fn default() -> Self {
        Self::new()
    }
}

impl CacheStats {
    /// Create a new statistics tracker.
    pub fn new() -> Self {
        Self {
            memory_hits: 0,
            disk_hits: 0,
            misses: 0,
            promotions: 0,
            writes: 0,
            memory_write_skips: 0,
            disk_write_failures: 0,
            disk_read_failures: 0,
            memory_evictions: 0,
            disk_evictions: 0,
            expired_entries: 0,
            bytes_freed: 0,
            corrupt_entries: 0,
            latency_samples: 0,
            average_latency_ms: 0.0,
            created_at: Instant::now(),
        }
    }

    /// Total hits across both tiers.
    pub fn hits(&self) -> u64 {
        self.memory_hits + self.disk_hits
    }

    /// Hit percentage over all lookups (0.0 when nothing was looked up).
    pub fn cache_efficiency(&self) -> f64 {
        let total = self.hits() + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits() as f64 / total as f64 * 100.0
        }
    }

    /// Get the uptime duration since statistics started.
    pub fn uptime(&self) -> Duration {
        self.created_at.elapsed()
    }

    /// Record the outcome of one `get`.
    pub fn record_lookup(&mut self, source: CacheSource, latency: Duration) {
        match source {
            CacheSource::Memory => self.memory_hits += 1,
            CacheSource::Disk => self.disk_hits += 1,
            CacheSource::Miss => self.misses += 1,
        }
        self.record_latency(latency);
    }

    /// Record one `set`.
    pub fn record_write(&mut self, latency: Duration) {
        self.writes += 1;
        self.record_latency(latency);
    }

    /// Fold a latency sample into the running mean.
    pub fn record_latency(&mut self, latency: Duration) {
        let sample = latency.as_secs_f64() * 1000.0;
        self.latency_samples += 1;
        self.average_latency_ms += (sample - self.average_latency_ms) / self.latency_samples as f64;
    }

    /// Record a disk entry copied into memory.
    pub fn record_promotion(&mut self) {
        self.promotions += 1;
    }

    /// Record a set that could not be kept in memory.
    pub fn record_memory_write_skip(&mut self) {
        self.memory_write_skips += 1;
    }

    /// Record a failed disk write.
    pub fn record_disk_write_failure(&mut self) {
        self.disk_write_failures += 1;
    }

    /// Record a disk read that failed with an I/O error.
    pub fn record_disk_read_failure(&mut self) {
        self.disk_read_failures += 1;
    }

    /// Record a corrupt disk entry that was removed.
    pub fn record_corrupt_entry(&mut self) {
        self.corrupt_entries += 1;
    }

    /// Record memory cache evictions.
    pub fn record_memory_eviction(&mut self, count: u64) {
        self.memory_evictions += count;
    }

    /// Record disk entries removed to respect the size limit.
    pub fn record_disk_eviction(&mut self, count: u64, bytes: u64) {
        self.disk_evictions += count;
        self.bytes_freed += bytes;
    }

    /// Record entries removed by an expiry sweep.
    pub fn record_expired(&mut self, count: u64, bytes: u64) {
        self.expired_entries += count;
        self.bytes_freed += bytes;
    }
}

/// Access statistics for one key, used for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyAccess {
    pub key: CacheKey,
    pub access_count: u64,
    pub last_accessed: DateTime<Utc>,
}

/// Snapshot of cache metrics for reporting.
#[derive(Debug, Clone)]
pub struct CacheMetrics {
    pub stats: CacheStats,

    pub hit_count: u64,
    pub miss_count: u64,
    /// Entries in the authoritative tier (disk when enabled, else memory)
    pub total_entries: u64,
    /// Bytes in the authoritative tier
    pub total_bytes: u64,
    pub average_latency_ms: f64,

    pub memory_entries: u64,
    pub memory_bytes: u64,
    pub memory_budget_bytes: u64,
    pub disk_entries: u64,
    pub disk_bytes: u64,
    pub disk_limit_bytes: u64,
}

impl CacheMetrics {
    /// Hit percentage: `hits / (hits + misses) * 100`.
    pub fn cache_efficiency(&self) -> f64 {
        self.stats.cache_efficiency()
    }

    /// Hit ratio in the range 0.0 to 1.0.
    pub fn hit_rate(&self) -> f64 {
        self.cache_efficiency() / 100.0
    }

    /// Format metrics as a human-readable string.
    pub fn format(&self) -> String {
        let stats = &self.stats;

        format!(
            r#"imgcache Statistics

MEMORY TIER
  Entries:     {}
  Size:        {:.2} MB / {:.2} MB
  Hits:        {}
  Evictions:   {}
  Skipped:     {}

DISK TIER
  Entries:     {}
  Size:        {:.2} MB / {:.2} MB
  Hits:        {}
  Promotions:  {}
  Evictions:   {}
  Failures:    {} write, {} read
  Corrupt:     {}

EXPIRY
  Expired:     {}
  Freed:       {:.2} MB

OVERALL
  Entries:     {}
  Size:        {:.2} MB
  Hits:        {}
  Misses:      {}
  Efficiency:  {:.1}%
  Latency:     {:.3} ms avg
  Uptime:      {}s
"#,
            self.memory_entries,
            mb(self.memory_bytes),
            mb(self.memory_budget_bytes),
            stats.memory_hits,
            stats.memory_evictions,
            stats.memory_write_skips,
            self.disk_entries,
            mb(self.disk_bytes),
            mb(self.disk_limit_bytes),
            stats.disk_hits,
            stats.promotions,
            stats.disk_evictions,
            stats.disk_write_failures,
            stats.disk_read_failures,
            stats.corrupt_entries,
            stats.expired_entries,
            mb(stats.bytes_freed),
            self.total_entries,
            mb(self.total_bytes),
            self.hit_count,
            self.miss_count,
            self.cache_efficiency(),
            self.average_latency_ms,
            stats.uptime().as_secs(),
        )
    }
}

fn mb(bytes: u64) -> f64 {
    bytes as f64 / (1024.0 * 1024.0)
}

/// Rank keys by access count, highest first, and keep the top `n`.
///
/// Ties go to the more recently accessed key.
pub fn most_accessed(mut keys: Vec<KeyAccess>, n: usize) -> Vec<KeyAccess> {
    keys.sort_by(|a, b| {
        b.access_count
            .cmp(&a.access_count)
            .then(b.last_accessed.cmp(&a.last_accessed))
    });
    keys.truncate(n);
    keys
}

/// Rank keys by access count, lowest first, and keep the bottom `n`.
///
/// Ties go to the less recently accessed key.
pub fn least_accessed(mut keys: Vec<KeyAccess>, n: usize) -> Vec<KeyAccess> {
    keys.sort_by(|a, b| {
        a.access_count
            .cmp(&b.access_count)
            .then(a.last_accessed.cmp(&b.last_accessed))
    });
    keys.truncate(n);
    keys
}
