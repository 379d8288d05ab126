//! Tiered cache manager.
//!
//! Lookups check the memory tier first and fall back to disk, promoting disk
//! hits into memory. Writes go to every enabled tier; a failure in one tier
//! never fails the other. Neither `get` nor `set` returns an error: failures
//! degrade to misses and best-effort writes and show up in logs and metrics.
//!
//! # Example
//!
//! ```no_run
//! use std::collections::BTreeMap;
//! use imgcache::cache::{generate_key, CacheConfig, CacheManager, ImageMetadata};
//!
//! # async fn example() -> Result<(), imgcache::cache::CacheError> {
//! let cache = CacheManager::open(CacheConfig::new("/tmp/imgcache")).await?;
//!
//! let params: BTreeMap<String, serde_json::Value> = BTreeMap::new();
//! let key = generate_key("https://example.com/cat.png", &params);
//!
//! let result = cache.get(&key).await;
//! if !result.hit {
//!     let processed = vec![0u8; 1024];
//!     cache.set(key, processed, ImageMetadata::new(512, 512, "png")).await;
//! }
//!
//! cache.shutdown().await;
//! # Ok(())
//! # }
//! ```

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::cache::codec;
use crate::cache::config::CacheConfig;
use crate::cache::disk::{DiskCache, DiskEntryInfo, DiskLoad};
use crate::cache::expiry::{ExpiryDaemon, OptimizeReport, SweepReport, DISK_EVICTION_TARGET};
use crate::cache::memory::MemoryCache;
use crate::cache::stats::{self, CacheMetrics, CacheStats, KeyAccess};
use crate::cache::types::{
    CacheEntry, CacheError, CacheKey, CacheResult, EntryMetadata, ImageMetadata,
};

/// Orchestrates the memory and disk tiers.
///
/// Construct once with [`CacheManager::open`] and share the returned `Arc`.
pub struct CacheManager {
    config: CacheConfig,
    max_age: chrono::Duration,
    memory: Option<MemoryCache>,
    disk: Option<Arc<DiskCache>>,
    stats: Mutex<CacheStats>,
    shutdown: CancellationToken,
    daemon: Mutex<Option<JoinHandle<()>>>,
}

impl CacheManager {
    /// Open the cache and start the expiry daemon.
    ///
    /// Fails fast on an invalid configuration or an unusable cache
    /// directory. Must be called from within a tokio runtime.
    pub async fn open(config: CacheConfig) -> Result<Arc<Self>, CacheError> {
        config.validate()?;
        let max_age = chrono::Duration::from_std(config.max_age)
            .map_err(|e| CacheError::InvalidConfig(format!("max age out of range: {}", e)))?;

        let mut stats = CacheStats::new();
        let mut recovered = Vec::new();

        let disk = if config.enable_disk {
            let dir = config.cache_dir.clone();
            let (disk, report) = blocking(move || DiskCache::open(dir)).await?;
            stats.corrupt_entries += report.corrupt_removed as u64;
            recovered = report.entries;
            Some(Arc::new(disk))
        } else {
            None
        };

        let memory = config
            .enable_memory
            .then(|| MemoryCache::new(config.memory_budget_bytes));

        let manager = Arc::new(Self {
            max_age,
            memory,
            disk,
            stats: Mutex::new(stats),
            shutdown: CancellationToken::new(),
            daemon: Mutex::new(None),
            config,
        });

        if manager.config.warm_start {
            let promoted = manager.warm_start(recovered).await;
            if promoted > 0 {
                info!(promoted, "Warm-started memory cache from disk");
            }
        }

        let daemon = ExpiryDaemon::new(Arc::downgrade(&manager), manager.config.cleanup_interval);
        let handle = tokio::spawn(daemon.run(manager.shutdown.clone()));
        *manager.daemon.lock() = Some(handle);

        info!(
            memory = manager.memory.is_some(),
            disk = manager.disk.is_some(),
            memory_budget_mb = manager.config.memory_budget_bytes / (1024 * 1024),
            max_disk_mb = manager.config.max_disk_bytes / (1024 * 1024),
            "Cache manager started"
        );

        Ok(manager)
    }

    /// Get the configuration the cache was opened with.
    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Get the disk tier directory.
    pub fn cache_dir(&self) -> &Path {
        &self.config.cache_dir
    }

    /// Look up an entry, memory first, then disk.
    ///
    /// A disk hit is promoted into memory when the memory tier is enabled.
    /// Disk errors and corrupt entries are reported as misses.
    pub async fn get(&self, key: &CacheKey) -> CacheResult {
        let start = Instant::now();
        let result = self.lookup(key).await;
        self.stats.lock().record_lookup(result.source, start.elapsed());

        debug!(key = %key, source = %result.source, "Cache lookup");
        result
    }

    async fn lookup(&self, key: &CacheKey) -> CacheResult {
        if let Some(entry) = self.memory.as_ref().and_then(|m| m.get(key)) {
            return CacheResult::memory(entry);
        }

        let Some(disk) = &self.disk else {
            return CacheResult::miss();
        };

        let disk = Arc::clone(disk);
        let disk_key = key.clone();
        let loaded = blocking(move || load_decoded(&disk, &disk_key)).await;

        match loaded {
            Ok(DiskLoad::Hit(entry)) => {
                let touched = self.promote(&entry);
                self.persist_touched(touched).await;
                CacheResult::disk(entry)
            }
            Ok(DiskLoad::Miss) => CacheResult::miss(),
            Ok(DiskLoad::Corrupt(_)) => {
                self.stats.lock().record_corrupt_entry();
                CacheResult::miss()
            }
            Err(e) => {
                warn!(key = %key, error = %e, "Disk cache read failed");
                self.stats.lock().record_disk_read_failure();
                CacheResult::miss()
            }
        }
    }

    /// Copy a disk hit into memory, evicting LRU entries as needed.
    ///
    /// Returns the unpersisted bookkeeping of evicted entries.
    fn promote(&self, entry: &CacheEntry) -> Vec<(CacheKey, EntryMetadata)> {
        let Some(memory) = &self.memory else {
            return Vec::new();
        };

        match memory.put(entry.clone()) {
            Ok(evicted) => {
                let mut stats = self.stats.lock();
                stats.record_promotion();
                stats.record_memory_eviction(evicted.count() as u64);
                evicted.touched
            }
            Err(e) => {
                debug!(key = %entry.key, error = %e, "Disk hit not promoted");
                Vec::new()
            }
        }
    }

    /// Write memory-tier access bookkeeping back to the disk records.
    async fn persist_touched(&self, touched: Vec<(CacheKey, EntryMetadata)>) {
        let Some(disk) = &self.disk else {
            return;
        };
        if touched.is_empty() {
            return;
        }

        let disk = Arc::clone(disk);
        let merged = blocking(move || {
            let mut merged = 0u64;
            for (key, metadata) in &touched {
                match disk.merge_access(key, metadata) {
                    Ok(true) => merged += 1,
                    Ok(false) => {}
                    Err(e) => warn!(key = %key, error = %e, "Failed to persist access bookkeeping"),
                }
            }
            Ok(merged)
        })
        .await;

        match merged {
            Ok(0) => {}
            Ok(merged) => debug!(merged, "Persisted memory access bookkeeping"),
            Err(e) => warn!(error = %e, "Failed to persist access bookkeeping"),
        }
    }

    /// Persist the bookkeeping of every memory entry read since the last
    /// flush.
    async fn flush_touched(&self) {
        if let (Some(memory), Some(_)) = (&self.memory, &self.disk) {
            self.persist_touched(memory.take_touched()).await;
        }
    }

    /// Store a processed image in every enabled tier.
    ///
    /// The disk copy is zlib-compressed when that makes it smaller. An entry
    /// larger than the whole memory budget is kept on disk only.
    pub async fn set(&self, key: CacheKey, payload: impl Into<Bytes>, image: ImageMetadata) {
        let start = Instant::now();
        let payload: Bytes = payload.into();
        let metadata = EntryMetadata::new(&image, payload.len() as u64, Utc::now());

        let mut stored = None;
        let metadata = match &self.disk {
            Some(_) => {
                let level = self.config.compression_level;
                let raw = payload.clone();
                let fallback = metadata.clone();
                match blocking(move || Ok(encode(raw, metadata, level))).await {
                    Ok((disk_payload, metadata)) => {
                        stored = Some(disk_payload);
                        metadata
                    }
                    Err(e) => {
                        warn!(key = %key, error = %e, "Payload encoding failed");
                        fallback
                    }
                }
            }
            None => metadata,
        };

        let mut touched = Vec::new();
        if let Some(memory) = &self.memory {
            let entry = CacheEntry::new(key.clone(), payload.clone(), metadata.clone());
            match memory.put(entry) {
                Ok(evicted) => {
                    self.stats
                        .lock()
                        .record_memory_eviction(evicted.count() as u64);
                    touched = evicted.touched;
                }
                Err(e) => {
                    // Drop any older copy so memory never serves a stale payload
                    memory.remove(&key);
                    self.stats.lock().record_memory_write_skip();
                    debug!(key = %key, error = %e, "Entry kept out of memory");
                }
            }
        }

        if let Some(disk) = &self.disk {
            let disk = Arc::clone(disk);
            let entry = CacheEntry::new(key.clone(), stored.unwrap_or(payload), metadata);
            if let Err(e) = blocking(move || disk.store(&entry)).await {
                warn!(key = %key, error = %e, "Disk cache write failed");
                self.stats.lock().record_disk_write_failure();
            }
        }
        self.persist_touched(touched).await;

        self.stats.lock().record_write(start.elapsed());
        debug!(key = %key, "Cache write");
    }

    /// Run an expiry sweep now.
    pub async fn cleanup(&self) -> SweepReport {
        self.cleanup_at(Utc::now()).await
    }

    /// Run an expiry sweep as if the current time were `now`.
    ///
    /// Removes entries created more than `max_age` before `now` from both
    /// tiers, then trims the disk tier if it is over its size limit.
    pub async fn cleanup_at(&self, now: DateTime<Utc>) -> SweepReport {
        let cutoff = now
            .checked_sub_signed(self.max_age)
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        let mut report = SweepReport::default();

        if let Some(memory) = &self.memory {
            let expired = memory.expire_older_than(cutoff);
            report.memory_expired = expired.count() as u64;
            report.bytes_freed += expired.bytes_freed;
        }

        // Disk trimming ranks entries by their stored recency
        self.flush_touched().await;

        if let Some(disk) = &self.disk {
            let disk = Arc::clone(disk);
            let limit = self.config.max_disk_bytes;
            match blocking(move || Ok(sweep_disk(&disk, cutoff, limit))).await {
                Ok(swept) => {
                    report.disk_expired = swept.expired;
                    report.disk_evicted = swept.evicted;
                    report.bytes_freed += swept.expired_bytes + swept.evicted_bytes;

                    let mut stats = self.stats.lock();
                    stats.record_disk_eviction(swept.evicted, swept.evicted_bytes);
                    stats.record_expired(
                        report.memory_expired + swept.expired,
                        report.bytes_freed - swept.evicted_bytes,
                    );
                }
                Err(e) => {
                    warn!(error = %e, "Disk expiry sweep failed");
                    self.stats
                        .lock()
                        .record_expired(report.memory_expired, report.bytes_freed);
                }
            }
        } else {
            self.stats
                .lock()
                .record_expired(report.memory_expired, report.bytes_freed);
        }

        if report.total_removed() > 0 {
            info!(
                memory_expired = report.memory_expired,
                disk_expired = report.disk_expired,
                disk_evicted = report.disk_evicted,
                freed_kb = report.bytes_freed / 1024,
                "Cache sweep complete"
            );
        }
        report
    }

    /// Shrink memory to its watermark and recompress cold disk entries.
    ///
    /// An entry is cold when it has not been read since it was written
    /// (`access_count <= 1`). Recompression is skipped at level 0.
    pub async fn optimize(&self) -> OptimizeReport {
        let mut report = OptimizeReport::default();

        if let Some(memory) = &self.memory {
            let evicted = memory.evict_to_watermark();
            report.memory_evicted = evicted.count() as u64;
            report.memory_bytes_freed = evicted.bytes_freed;
            self.stats.lock().record_memory_eviction(report.memory_evicted);
            self.persist_touched(evicted.touched).await;
        }
        // Coldness is judged from the stored access counts
        self.flush_touched().await;

        let level = self.config.compression_level;
        if let (Some(disk), true) = (&self.disk, level > 0) {
            let disk = Arc::clone(disk);
            match blocking(move || recompress_cold(&disk, level)).await {
                Ok((count, saved)) => {
                    report.recompressed = count;
                    report.disk_bytes_saved = saved;
                }
                Err(e) => warn!(error = %e, "Disk recompression failed"),
            }
        }

        info!(
            memory_evicted = report.memory_evicted,
            recompressed = report.recompressed,
            saved_kb = report.disk_bytes_saved / 1024,
            "Cache optimized"
        );
        report
    }

    /// Remove every entry from both tiers.
    pub async fn clear(&self) {
        let memory_cleared = self.memory.as_ref().map(|m| m.clear().count()).unwrap_or(0);

        let mut disk_cleared = 0;
        if let Some(disk) = &self.disk {
            let disk = Arc::clone(disk);
            match blocking(move || disk.clear()).await {
                Ok(n) => disk_cleared = n,
                Err(e) => warn!(error = %e, "Failed to clear disk cache"),
            }
        }

        info!(
            memory = memory_cleared,
            disk = disk_cleared,
            "Cache cleared"
        );
    }

    /// Snapshot the current metrics.
    pub fn metrics(&self) -> CacheMetrics {
        let stats = self.stats.lock().clone();

        let (memory_entries, memory_bytes, memory_budget_bytes) = match &self.memory {
            Some(m) => (m.entry_count() as u64, m.current_bytes(), m.max_size_bytes()),
            None => (0, 0, 0),
        };
        let (disk_entries, disk_bytes, disk_limit_bytes) = match &self.disk {
            Some(d) => (d.entry_count(), d.size_bytes(), self.config.max_disk_bytes),
            None => (0, 0, 0),
        };

        // Disk holds every entry when enabled; memory is a subset of it
        let (total_entries, total_bytes) = if self.disk.is_some() {
            (disk_entries, disk_bytes)
        } else {
            (memory_entries, memory_bytes)
        };

        CacheMetrics {
            hit_count: stats.hits(),
            miss_count: stats.misses,
            average_latency_ms: stats.average_latency_ms,
            stats,
            total_entries,
            total_bytes,
            memory_entries,
            memory_bytes,
            memory_budget_bytes,
            disk_entries,
            disk_bytes,
            disk_limit_bytes,
        }
    }

    /// The `n` keys with the highest access counts.
    pub async fn most_accessed(&self, n: usize) -> Vec<KeyAccess> {
        stats::most_accessed(self.key_accesses().await, n)
    }

    /// The `n` keys with the lowest access counts.
    pub async fn least_accessed(&self, n: usize) -> Vec<KeyAccess> {
        stats::least_accessed(self.key_accesses().await, n)
    }

    /// Merge access bookkeeping from both tiers, keeping the larger count.
    async fn key_accesses(&self) -> Vec<KeyAccess> {
        let mut merged: HashMap<CacheKey, KeyAccess> = HashMap::new();
        let mut merge = |key: CacheKey, meta: &EntryMetadata| {
            let access = merged.entry(key.clone()).or_insert(KeyAccess {
                key,
                access_count: 0,
                last_accessed: meta.last_accessed,
            });
            access.access_count = access.access_count.max(meta.access_count);
            access.last_accessed = access.last_accessed.max(meta.last_accessed);
        };

        if let Some(memory) = &self.memory {
            for (key, meta) in memory.snapshot_metadata() {
                merge(key, &meta);
            }
        }

        if let Some(disk) = &self.disk {
            let disk = Arc::clone(disk);
            match blocking(move || disk.entries()).await {
                Ok(entries) => {
                    for info in entries {
                        merge(info.key, &info.metadata);
                    }
                }
                Err(e) => warn!(error = %e, "Failed to read disk cache metadata"),
            }
        }

        merged.into_values().collect()
    }

    /// Stop the expiry daemon, wait for it to finish and persist the access
    /// bookkeeping of memory hits.
    ///
    /// Dropping the manager without calling this loses memory hits recorded
    /// since the last sweep.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        let handle = self.daemon.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!(error = %e, "Expiry daemon task failed");
            }
        }
        self.flush_touched().await;
        info!("Cache manager shut down");
    }

    /// Promote the most recently used disk entries that fit in memory.
    ///
    /// Only fills free space; never evicts and never touches bookkeeping.
    async fn warm_start(&self, mut entries: Vec<DiskEntryInfo>) -> usize {
        let (Some(memory), Some(disk)) = (&self.memory, &self.disk) else {
            return 0;
        };

        entries.sort_by(|a, b| b.metadata.last_accessed.cmp(&a.metadata.last_accessed));

        let mut free = memory.free_bytes();
        let mut selected = Vec::new();
        for info in entries {
            if info.metadata.original_size <= free {
                free -= info.metadata.original_size;
                selected.push(info.key);
            }
        }

        let disk = Arc::clone(disk);
        let loaded = blocking(move || {
            Ok(selected
                .into_iter()
                .filter_map(|key| match disk.load(&key) {
                    Ok(DiskLoad::Hit(entry)) => decode(entry).ok(),
                    _ => None,
                })
                .collect::<Vec<_>>())
        })
        .await
        .unwrap_or_default();

        loaded
            .into_iter()
            .filter(|entry| memory.put(entry.clone()).is_ok())
            .count()
    }
}

impl Drop for CacheManager {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// Run blocking filesystem work off the async workers.
async fn blocking<T, F>(f: F) -> Result<T, CacheError>
where
    F: FnOnce() -> Result<T, CacheError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| CacheError::TaskFailed(e.to_string()))?
}

/// Compress a payload for disk when it helps, updating the storage fields.
fn encode(payload: Bytes, mut metadata: EntryMetadata, level: u32) -> (Bytes, EntryMetadata) {
    metadata.compressed = false;
    metadata.compressed_size = payload.len() as u64;

    if level == 0 {
        return (payload, metadata);
    }

    match codec::compress(&payload, level) {
        Ok(packed) if packed.len() < payload.len() => {
            metadata.compressed = true;
            metadata.compressed_size = packed.len() as u64;
            (Bytes::from(packed), metadata)
        }
        Ok(_) => (payload, metadata),
        Err(e) => {
            warn!(error = %e, "Compression failed, storing raw payload");
            (payload, metadata)
        }
    }
}

/// Turn a stored entry into one carrying the original payload.
fn decode(entry: CacheEntry) -> Result<CacheEntry, CacheError> {
    let CacheEntry {
        key,
        payload,
        metadata,
    } = entry;

    if metadata.compressed {
        let raw = codec::decompress(&payload, metadata.original_size).map_err(|e| {
            CacheError::Corrupt {
                key: key.to_string(),
                reason: e.to_string(),
            }
        })?;
        return Ok(CacheEntry::new(key, raw, metadata));
    }

    if payload.len() as u64 != metadata.original_size {
        return Err(CacheError::Corrupt {
            key: key.to_string(),
            reason: format!(
                "payload is {} bytes, expected {}",
                payload.len(),
                metadata.original_size
            ),
        });
    }
    Ok(CacheEntry::new(key, payload, metadata))
}

/// Load an entry from disk, record the access and decode the payload.
fn load_decoded(disk: &DiskCache, key: &CacheKey) -> Result<DiskLoad, CacheError> {
    let entry = match disk.load_and_touch(key, Utc::now())? {
        DiskLoad::Hit(entry) => entry,
        other => return Ok(other),
    };

    match decode(entry) {
        Ok(entry) => Ok(DiskLoad::Hit(entry)),
        Err(e) => {
            warn!(key = %key, error = %e, "Removing undecodable disk cache entry");
            if let Err(e) = disk.remove(key) {
                warn!(key = %key, error = %e, "Failed to remove undecodable entry");
            }
            Ok(DiskLoad::Corrupt(e.to_string()))
        }
    }
}

#[derive(Debug, Default)]
struct DiskSweep {
    expired: u64,
    expired_bytes: u64,
    evicted: u64,
    evicted_bytes: u64,
}

/// Expire old disk pairs, then evict by least recent access while the tier
/// is over `limit`.
fn sweep_disk(disk: &DiskCache, cutoff: DateTime<Utc>, limit: u64) -> DiskSweep {
    let mut swept = DiskSweep::default();

    match disk.scan_for_expired(cutoff) {
        Ok(keys) => {
            for key in keys {
                match disk.remove(&key) {
                    Ok(freed) => {
                        swept.expired += 1;
                        swept.expired_bytes += freed;
                    }
                    Err(e) => warn!(key = %key, error = %e, "Failed to remove expired entry"),
                }
            }
        }
        Err(e) => warn!(error = %e, "Failed to scan disk cache for expired entries"),
    }

    if disk.size_bytes() <= limit {
        return swept;
    }

    let target = (limit as f64 * DISK_EVICTION_TARGET) as u64;
    let mut entries = match disk.entries() {
        Ok(entries) => entries,
        Err(e) => {
            warn!(error = %e, "Failed to list disk cache for eviction");
            return swept;
        }
    };
    entries.sort_by(|a, b| a.metadata.last_accessed.cmp(&b.metadata.last_accessed));

    for info in entries {
        if disk.size_bytes() <= target {
            break;
        }
        match disk.remove(&info.key) {
            Ok(freed) => {
                swept.evicted += 1;
                swept.evicted_bytes += freed;
            }
            Err(e) => warn!(key = %info.key, error = %e, "Failed to evict disk entry"),
        }
    }

    debug!(
        evicted = swept.evicted,
        size_bytes = disk.size_bytes(),
        target_bytes = target,
        "Disk cache trimmed"
    );
    swept
}

/// Rewrite cold, uncompressed disk entries compressed at `level`.
///
/// Returns the number of entries rewritten and the bytes saved.
fn recompress_cold(disk: &DiskCache, level: u32) -> Result<(u64, u64), CacheError> {
    let mut count = 0;
    let mut saved = 0;

    for info in disk.entries()? {
        if info.metadata.compressed || info.metadata.access_count > 1 {
            continue;
        }
        let DiskLoad::Hit(entry) = disk.load(&info.key)? else {
            continue;
        };

        let expected = entry.metadata.clone();
        let before = expected.compressed_size;
        let (payload, metadata) = encode(entry.payload, entry.metadata, level);
        if !metadata.compressed {
            continue;
        }

        // Skip entries written or read since they were loaded
        let saved_bytes = before.saturating_sub(metadata.compressed_size);
        if disk.replace_if_unchanged(&expected, &CacheEntry::new(info.key, payload, metadata))? {
            count += 1;
            saved += saved_bytes;
        }
    }

    Ok((count, saved))
}
