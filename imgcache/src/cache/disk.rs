//! Disk cache storing each entry as a payload/metadata file pair.
//!
//! # File Layout
//!
//! ```text
//! {cache_dir}/{key}.cache   payload bytes (raw or zlib)
//! {cache_dir}/{key}.meta    JSON metadata record
//! ```
//!
//! # Crash Safety
//!
//! Both files are written to a uniquely named `.tmp` sibling, synced and
//! renamed into place: payload first, metadata second. The metadata rename
//! is the commit point, so an interrupted write leaves either an orphaned `.tmp` file or a
//! payload without metadata, neither of which is a valid entry. When an
//! existing entry is overwritten and the process dies between the two
//! renames, the stale metadata no longer matches the new payload's length
//! and the pair is rejected as corrupt.
//!
//! Corrupt or half-present pairs are deleted when found.
//!
//! All methods block on filesystem I/O; async callers run them through
//! `tokio::task::spawn_blocking`.

use std::collections::hash_map::DefaultHasher;
use std::fs;
use std::hash::{Hash, Hasher};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, MutexGuard};
use tracing::{debug, info, warn};

use crate::cache::types::{CacheEntry, CacheError, CacheKey, EntryMetadata};

/// Extension of payload files.
pub const PAYLOAD_EXTENSION: &str = "cache";

/// Extension of metadata files.
pub const META_EXTENSION: &str = "meta";

/// Suffix of in-flight writes.
const TEMP_SUFFIX: &str = "tmp";

/// Number of stripes in the per-key lock table.
const KEY_LOCK_STRIPES: usize = 64;

/// A valid entry found on disk.
#[derive(Debug, Clone)]
pub struct DiskEntryInfo {
    pub key: CacheKey,
    pub metadata: EntryMetadata,
    /// Payload plus metadata file size
    pub stored_bytes: u64,
}

/// Outcome of reading a pair from disk.
#[derive(Debug)]
pub enum DiskLoad {
    /// Entry as stored (payload may still be compressed)
    Hit(CacheEntry),
    /// No entry for the key
    Miss,
    /// Pair was incomplete or unreadable and has been removed
    Corrupt(String),
}

/// Result of scanning the cache directory on open.
#[derive(Debug, Default)]
pub struct RecoveryReport {
    pub entries: Vec<DiskEntryInfo>,
    pub temp_files_removed: usize,
    pub corrupt_removed: usize,
}

/// Disk tier for persistent storage of processed images.
///
/// Operations on one key are serialized through a striped lock table so a
/// read-modify-write (touch, recompress, merge) never interleaves with a
/// store or removal of the same key. Directory scans take no locks.
pub struct DiskCache {
    /// Cache directory root
    cache_dir: PathBuf,
    /// Bytes on disk (payload + metadata), maintained by writes and scans
    current_size_bytes: AtomicU64,
    /// Valid pairs on disk, maintained by writes and scans
    entry_count: AtomicU64,
    /// Per-key locks, striped by key hash
    key_locks: Vec<Mutex<()>>,
}

/// State of a pair judged from file metadata, without reading the payload.
enum PairState {
    Missing,
    Valid {
        metadata: EntryMetadata,
        stored_bytes: u64,
    },
    Broken(String),
}

impl DiskCache {
    /// Open the disk cache, creating the directory if needed.
    ///
    /// Removes leftovers from interrupted writes and corrupt pairs, then
    /// returns the valid entries so the caller can warm the memory tier.
    /// Pairs are validated by file sizes only; payloads are not read.
    pub fn open(cache_dir: PathBuf) -> Result<(Self, RecoveryReport), CacheError> {
        fs::create_dir_all(&cache_dir)?;

        let cache = Self {
            cache_dir,
            current_size_bytes: AtomicU64::new(0),
            entry_count: AtomicU64::new(0),
            key_locks: (0..KEY_LOCK_STRIPES).map(|_| Mutex::new(())).collect(),
        };
        let report = cache.recover()?;

        info!(
            dir = %cache.cache_dir.display(),
            entries = report.entries.len(),
            size_bytes = cache.size_bytes(),
            temp_files_removed = report.temp_files_removed,
            corrupt_removed = report.corrupt_removed,
            "Disk cache opened"
        );

        Ok((cache, report))
    }

    /// Get the cache directory.
    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    /// Load an entry as stored on disk.
    ///
    /// Returns `Err` only for I/O failures other than a missing file; those
    /// leave the files in place since they may be transient.
    pub fn load(&self, key: &CacheKey) -> Result<DiskLoad, CacheError> {
        let _guard = self.lock_key(key);
        self.load_locked(key)
    }

    /// Load an entry and record an access in its metadata record.
    ///
    /// The returned entry carries the updated bookkeeping. A failure to
    /// persist the access is logged and does not fail the load.
    pub fn load_and_touch(
        &self,
        key: &CacheKey,
        now: DateTime<Utc>,
    ) -> Result<DiskLoad, CacheError> {
        let _guard = self.lock_key(key);
        let mut entry = match self.load_locked(key)? {
            DiskLoad::Hit(entry) => entry,
            other => return Ok(other),
        };

        entry.metadata.touch(now);
        if let Err(e) = self.write_metadata_locked(key, &entry.metadata) {
            warn!(key = %key, error = %e, "Failed to persist access bookkeeping");
        }
        Ok(DiskLoad::Hit(entry))
    }

    /// Read only the metadata record of an entry.
    ///
    /// Unparseable metadata is healed and reported as `None`.
    pub fn load_metadata(&self, key: &CacheKey) -> Result<Option<EntryMetadata>, CacheError> {
        let _guard = self.lock_key(key);
        match self.read_metadata(key) {
            Ok(found) => Ok(found.map(|(metadata, _)| metadata)),
            Err(MetaError::Io(e)) => Err(e.into()),
            Err(MetaError::Parse(reason)) => {
                self.heal_locked(key, &reason);
                Ok(None)
            }
        }
    }

    /// Persist an entry. The payload is written as-is.
    pub fn store(&self, entry: &CacheEntry) -> Result<(), CacheError> {
        let _guard = self.lock_key(&entry.key);
        self.store_locked(entry)
    }

    /// Replace an entry only if its metadata still equals `expected`.
    ///
    /// Returns `false` without writing when the entry changed or vanished
    /// since `expected` was read.
    pub fn replace_if_unchanged(
        &self,
        expected: &EntryMetadata,
        entry: &CacheEntry,
    ) -> Result<bool, CacheError> {
        let _guard = self.lock_key(&entry.key);
        match self.read_metadata(&entry.key) {
            Ok(Some((current, _))) if current == *expected => {
                self.store_locked(entry)?;
                Ok(true)
            }
            Ok(_) | Err(MetaError::Parse(_)) => Ok(false),
            Err(MetaError::Io(e)) => Err(e.into()),
        }
    }

    /// Rewrite only the metadata record of an existing entry.
    pub fn update_metadata(
        &self,
        key: &CacheKey,
        metadata: &EntryMetadata,
    ) -> Result<(), CacheError> {
        let _guard = self.lock_key(key);
        self.write_metadata_locked(key, metadata)
    }

    /// Fold access bookkeeping recorded elsewhere into the stored record.
    ///
    /// Keeps the larger `access_count` and the later `last_accessed`. Only
    /// applies while the stored record belongs to the same write (equal
    /// `created`). Returns whether the record changed.
    pub fn merge_access(
        &self,
        key: &CacheKey,
        metadata: &EntryMetadata,
    ) -> Result<bool, CacheError> {
        let _guard = self.lock_key(key);
        let mut stored = match self.read_metadata(key) {
            Ok(Some((stored, _))) => stored,
            Ok(None) | Err(MetaError::Parse(_)) => return Ok(false),
            Err(MetaError::Io(e)) => return Err(e.into()),
        };

        if stored.created != metadata.created
            || (stored.access_count >= metadata.access_count
                && stored.last_accessed >= metadata.last_accessed)
        {
            return Ok(false);
        }

        stored.access_count = stored.access_count.max(metadata.access_count);
        stored.last_accessed = stored.last_accessed.max(metadata.last_accessed);
        self.write_metadata_locked(key, &stored)?;
        Ok(true)
    }

    /// Remove an entry. Returns the bytes freed (0 if absent).
    ///
    /// Metadata goes first so the pair stops being valid before the payload
    /// disappears.
    pub fn remove(&self, key: &CacheKey) -> Result<u64, CacheError> {
        let _guard = self.lock_key(key);
        self.remove_locked(key)
    }

    /// List keys of all complete pairs.
    pub fn list_keys(&self) -> Result<Vec<CacheKey>, CacheError> {
        let mut keys = Vec::new();
        for entry in fs::read_dir(&self.cache_dir)? {
            let path = entry?.path();
            if let Some(key) = key_for(&path, META_EXTENSION) {
                if self.payload_path(&key).exists() {
                    keys.push(key);
                }
            }
        }
        Ok(keys)
    }

    /// List all valid entries with their metadata.
    ///
    /// Pairs whose metadata does not parse are healed and skipped.
    pub fn entries(&self) -> Result<Vec<DiskEntryInfo>, CacheError> {
        let mut entries = Vec::new();
        for key in self.list_keys()? {
            let Some(metadata) = self.load_metadata(&key)? else {
                continue;
            };
            if let Some(stored_bytes) = self.pair_size(&key) {
                entries.push(DiskEntryInfo {
                    key,
                    metadata,
                    stored_bytes,
                });
            }
        }
        Ok(entries)
    }

    /// Keys of entries created before `cutoff`, judged by the metadata
    /// timestamp rather than file mtime.
    pub fn scan_for_expired(&self, cutoff: DateTime<Utc>) -> Result<Vec<CacheKey>, CacheError> {
        Ok(self
            .entries()?
            .into_iter()
            .filter(|info| info.metadata.created < cutoff)
            .map(|info| info.key)
            .collect())
    }

    /// Delete every cache file in the directory. Returns the pairs removed.
    pub fn clear(&self) -> Result<usize, CacheError> {
        let mut removed = 0;
        for entry in fs::read_dir(&self.cache_dir)? {
            let path = entry?.path();
            if key_for(&path, META_EXTENSION).is_some() {
                removed += 1;
            }
            if is_cache_file(&path) {
                if let Err(e) = fs::remove_file(&path) {
                    if e.kind() != ErrorKind::NotFound {
                        return Err(e.into());
                    }
                }
            }
        }

        self.current_size_bytes.store(0, Ordering::Relaxed);
        self.entry_count.store(0, Ordering::Relaxed);
        Ok(removed)
    }

    /// Bytes on disk (payload + metadata).
    pub fn size_bytes(&self) -> u64 {
        self.current_size_bytes.load(Ordering::Relaxed)
    }

    /// Number of valid pairs.
    pub fn entry_count(&self) -> u64 {
        self.entry_count.load(Ordering::Relaxed)
    }

    fn lock_key(&self, key: &CacheKey) -> MutexGuard<'_, ()> {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        let stripe = (hasher.finish() % self.key_locks.len() as u64) as usize;
        self.key_locks[stripe].lock()
    }

    fn payload_path(&self, key: &CacheKey) -> PathBuf {
        self.cache_dir
            .join(format!("{}.{}", key.as_str(), PAYLOAD_EXTENSION))
    }

    fn meta_path(&self, key: &CacheKey) -> PathBuf {
        self.cache_dir.join(format!("{}.{}", key.as_str(), META_EXTENSION))
    }

    /// Parse the metadata record, returning it with its file length.
    fn read_metadata(&self, key: &CacheKey) -> Result<Option<(EntryMetadata, u64)>, MetaError> {
        let raw = match fs::read(self.meta_path(key)) {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(MetaError::Io(e)),
        };
        serde_json::from_slice(&raw)
            .map(|metadata| Some((metadata, raw.len() as u64)))
            .map_err(|e| MetaError::Parse(format!("unreadable metadata: {}", e)))
    }

    /// Check a pair against its metadata using file sizes only.
    fn inspect(&self, key: &CacheKey) -> Result<PairState, CacheError> {
        let (metadata, meta_len) = match self.read_metadata(key) {
            Ok(Some(found)) => found,
            Ok(None) => {
                if self.payload_path(key).exists() {
                    return Ok(PairState::Broken("payload without metadata".to_string()));
                }
                return Ok(PairState::Missing);
            }
            Err(MetaError::Io(e)) => return Err(e.into()),
            Err(MetaError::Parse(reason)) => return Ok(PairState::Broken(reason)),
        };

        let payload_len = match fs::metadata(self.payload_path(key)) {
            Ok(meta) => meta.len(),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Ok(PairState::Broken("metadata without payload".to_string()));
            }
            Err(e) => return Err(e.into()),
        };

        if payload_len != metadata.compressed_size {
            return Ok(PairState::Broken(format!(
                "payload is {} bytes, metadata says {}",
                payload_len, metadata.compressed_size
            )));
        }

        Ok(PairState::Valid {
            metadata,
            stored_bytes: meta_len + payload_len,
        })
    }

    fn load_locked(&self, key: &CacheKey) -> Result<DiskLoad, CacheError> {
        let metadata = match self.inspect(key)? {
            PairState::Missing => return Ok(DiskLoad::Miss),
            PairState::Broken(reason) => return Ok(self.heal_locked(key, &reason)),
            PairState::Valid { metadata, .. } => metadata,
        };

        let payload = match fs::read(self.payload_path(key)) {
            Ok(payload) => payload,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Ok(self.heal_locked(key, "metadata without payload"));
            }
            Err(e) => return Err(e.into()),
        };

        if payload.len() as u64 != metadata.compressed_size {
            let reason = format!(
                "payload is {} bytes, metadata says {}",
                payload.len(),
                metadata.compressed_size
            );
            return Ok(self.heal_locked(key, &reason));
        }

        Ok(DiskLoad::Hit(CacheEntry::new(key.clone(), payload, metadata)))
    }

    fn store_locked(&self, entry: &CacheEntry) -> Result<(), CacheError> {
        let meta_json = serde_json::to_vec_pretty(&entry.metadata).map_err(|e| {
            CacheError::Corrupt {
                key: entry.key.to_string(),
                reason: e.to_string(),
            }
        })?;

        let previous = self.pair_size(&entry.key);

        write_atomic(&self.payload_path(&entry.key), &entry.payload)?;
        write_atomic(&self.meta_path(&entry.key), &meta_json)?;

        let written = entry.payload.len() as u64 + meta_json.len() as u64;
        match previous {
            Some(old) => self.adjust_size(old, written),
            None => {
                self.current_size_bytes.fetch_add(written, Ordering::Relaxed);
                self.entry_count.fetch_add(1, Ordering::Relaxed);
            }
        }

        debug!(key = %entry.key, bytes = written, "Disk cache entry stored");
        Ok(())
    }

    fn write_metadata_locked(
        &self,
        key: &CacheKey,
        metadata: &EntryMetadata,
    ) -> Result<(), CacheError> {
        let meta_path = self.meta_path(key);
        let old_len = fs::metadata(&meta_path)?.len();

        let meta_json = serde_json::to_vec_pretty(metadata).map_err(|e| CacheError::Corrupt {
            key: key.to_string(),
            reason: e.to_string(),
        })?;
        write_atomic(&meta_path, &meta_json)?;

        self.adjust_size(old_len, meta_json.len() as u64);
        Ok(())
    }

    fn remove_locked(&self, key: &CacheKey) -> Result<u64, CacheError> {
        let had_meta = remove_if_exists(&self.meta_path(key))?;
        let had_payload = remove_if_exists(&self.payload_path(key))?;
        let freed = had_meta.unwrap_or(0) + had_payload.unwrap_or(0);

        if had_meta.is_some() && had_payload.is_some() {
            self.entry_count
                .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| Some(n.saturating_sub(1)))
                .ok();
        }
        self.current_size_bytes
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| {
                Some(n.saturating_sub(freed))
            })
            .ok();

        Ok(freed)
    }

    fn pair_size(&self, key: &CacheKey) -> Option<u64> {
        let meta = fs::metadata(self.meta_path(key)).ok()?;
        let payload = fs::metadata(self.payload_path(key)).ok()?;
        Some(meta.len() + payload.len())
    }

    fn adjust_size(&self, old: u64, new: u64) {
        if new >= old {
            self.current_size_bytes
                .fetch_add(new - old, Ordering::Relaxed);
        } else {
            self.current_size_bytes
                .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| {
                    Some(n.saturating_sub(old - new))
                })
                .ok();
        }
    }

    /// Delete both files of a broken pair and report it as corrupt.
    fn heal_locked(&self, key: &CacheKey, reason: &str) -> DiskLoad {
        warn!(key = %key, reason, "Removing corrupt disk cache entry");
        if let Err(e) = self.remove_locked(key) {
            warn!(key = %key, error = %e, "Failed to remove corrupt disk cache entry");
        }
        DiskLoad::Corrupt(reason.to_string())
    }

    /// Rebuild counters from the directory contents, cleaning up as we go.
    fn recover(&self) -> Result<RecoveryReport, CacheError> {
        let mut report = RecoveryReport::default();
        let mut stems = Vec::new();

        for entry in fs::read_dir(&self.cache_dir)? {
            let path = entry?.path();
            if !path.is_file() {
                continue;
            }

            if path.extension().and_then(|e| e.to_str()) == Some(TEMP_SUFFIX) {
                match fs::remove_file(&path) {
                    Ok(()) => report.temp_files_removed += 1,
                    Err(e) => debug!(path = %path.display(), error = %e, "Failed to remove temp file"),
                }
                continue;
            }

            let key = key_for(&path, META_EXTENSION).or_else(|| key_for(&path, PAYLOAD_EXTENSION));
            if let Some(key) = key {
                stems.push(key);
            }
        }

        stems.sort();
        stems.dedup();

        let mut total_bytes = 0;
        for key in stems {
            let _guard = self.lock_key(&key);
            match self.inspect(&key)? {
                PairState::Valid {
                    metadata,
                    stored_bytes,
                } => {
                    total_bytes += stored_bytes;
                    report.entries.push(DiskEntryInfo {
                        key,
                        metadata,
                        stored_bytes,
                    });
                }
                PairState::Broken(reason) => {
                    self.heal_locked(&key, &reason);
                    report.corrupt_removed += 1;
                }
                PairState::Missing => {}
            }
        }

        self.current_size_bytes.store(total_bytes, Ordering::Relaxed);
        self.entry_count
            .store(report.entries.len() as u64, Ordering::Relaxed);
        Ok(report)
    }
}

enum MetaError {
    Io(std::io::Error),
    Parse(String),
}

/// Write `data` to `path` through a uniquely named, synced temp file and an
/// atomic rename.
///
/// Concurrent writers to the same path each get their own temp file; the
/// last rename wins and readers never observe a partial file.
fn write_atomic(path: &Path, data: &[u8]) -> std::io::Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    let mut temp = tempfile::Builder::new()
        .prefix(&format!(".{}.", name))
        .suffix(&format!(".{}", TEMP_SUFFIX))
        .tempfile_in(dir)?;
    temp.write_all(data)?;
    temp.as_file().sync_all()?;
    temp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

/// Remove a file, returning its size, or `None` if it did not exist.
fn remove_if_exists(path: &Path) -> std::io::Result<Option<u64>> {
    let size = match fs::metadata(path) {
        Ok(meta) => meta.len(),
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e),
    };
    match fs::remove_file(path) {
        Ok(()) => Ok(Some(size)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e),
    }
}

/// Parse the cache key out of `<key>.<extension>`.
fn key_for(path: &Path, extension: &str) -> Option<CacheKey> {
    if path.extension()?.to_str()? != extension {
        return None;
    }
    let stem = path.file_stem()?.to_str()?;
    CacheKey::new(stem).ok()
}

fn is_cache_file(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|e| e.to_str()),
        Some(PAYLOAD_EXTENSION) | Some(META_EXTENSION) | Some(TEMP_SUFFIX)
    )
}
