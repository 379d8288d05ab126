//! Core types for the cache system.

use std::fmt;
use std::str::FromStr;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Maximum length of a cache key in characters.
pub const MAX_KEY_LEN: usize = 128;

/// Cache key uniquely identifying a cached image.
///
/// Keys double as file stems in the disk tier, so they are restricted to
/// ASCII alphanumerics plus `.`, `_` and `-`, must not start with `.`, and
/// are at most [`MAX_KEY_LEN`] characters long. Keys produced by
/// [`generate_key`](crate::cache::generate_key) always satisfy these rules.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey(String);

impl CacheKey {
    /// Create a cache key, validating that it is safe to use as a file stem.
    pub fn new(key: impl Into<String>) -> Result<Self, CacheError> {
        let key = key.into();
        let valid_chars = key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'));

        if key.is_empty() || key.len() > MAX_KEY_LEN || key.starts_with('.') || !valid_chars {
            return Err(CacheError::InvalidKey(key));
        }

        Ok(Self(key))
    }

    /// Wrap a hex digest produced by the key generator.
    pub(crate) fn from_digest(hex: String) -> Self {
        Self(hex)
    }

    /// Get the key as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for CacheKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl FromStr for CacheKey {
    type Err = CacheError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

/// Descriptive metadata supplied by the image pipeline alongside a payload.
///
/// The payload size is not part of this struct: the cache derives it from
/// the buffer itself so the two can never disagree.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ImageMetadata {
    /// Image width in pixels
    pub width: u32,
    /// Image height in pixels
    pub height: u32,
    /// Encoded image format (e.g., "png", "webp")
    pub format: String,
    /// Time spent producing the payload, in milliseconds
    pub processing_time_ms: u64,
    /// Ordered list of enhancement stages applied
    pub enhancements: Vec<String>,
}

impl ImageMetadata {
    /// Create metadata for an image of the given dimensions and format.
    pub fn new(width: u32, height: u32, format: impl Into<String>) -> Self {
        Self {
            width,
            height,
            format: format.into(),
            processing_time_ms: 0,
            enhancements: Vec::new(),
        }
    }

    /// Set the processing time in milliseconds.
    pub fn with_processing_time_ms(mut self, ms: u64) -> Self {
        self.processing_time_ms = ms;
        self
    }

    /// Append an enhancement stage name.
    pub fn with_enhancement(mut self, stage: impl Into<String>) -> Self {
        self.enhancements.push(stage.into());
        self
    }
}

/// Metadata stored alongside every cache entry.
///
/// This is the record persisted as `<key>.meta`. `original_size` is the
/// uncompressed payload length; `compressed_size` is the length of the
/// payload as persisted on disk, and `compressed` tells whether that copy is
/// zlib-encoded. Payloads handed out by the cache are always uncompressed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntryMetadata {
    pub original_size: u64,
    pub compressed_size: u64,
    pub width: u32,
    pub height: u32,
    pub format: String,
    pub created: DateTime<Utc>,
    pub last_accessed: DateTime<Utc>,
    pub access_count: u64,
    pub processing_time_ms: u64,
    pub enhancements: Vec<String>,
    #[serde(default)]
    pub compressed: bool,
}

impl EntryMetadata {
    /// Build metadata for a freshly computed payload of `payload_len` bytes.
    pub fn new(image: &ImageMetadata, payload_len: u64, now: DateTime<Utc>) -> Self {
        Self {
            original_size: payload_len,
            compressed_size: payload_len,
            width: image.width,
            height: image.height,
            format: image.format.clone(),
            created: now,
            last_accessed: now,
            access_count: 1,
            processing_time_ms: image.processing_time_ms,
            enhancements: image.enhancements.clone(),
            compressed: false,
        }
    }

    /// Record an access at `now`.
    ///
    /// `last_accessed` never moves backwards, even if the wall clock does.
    pub fn touch(&mut self, now: DateTime<Utc>) {
        if now > self.last_accessed {
            self.last_accessed = now;
        }
        self.access_count += 1;
    }
}

/// A cached artifact: key, payload and metadata.
///
/// The payload is an immutable shared buffer; clones are cheap and updates
/// replace the buffer rather than editing it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub key: CacheKey,
    pub payload: Bytes,
    pub metadata: EntryMetadata,
}

impl CacheEntry {
    /// Create a new entry.
    pub fn new(key: CacheKey, payload: impl Into<Bytes>, metadata: EntryMetadata) -> Self {
        Self {
            key,
            payload: payload.into(),
            metadata,
        }
    }

    /// Size of the payload in bytes.
    pub fn size_bytes(&self) -> u64 {
        self.payload.len() as u64
    }
}

/// Which tier answered a lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheSource {
    Memory,
    Disk,
    Miss,
}

impl CacheSource {
    /// Lowercase name used in logs and reports.
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheSource::Memory => "memory",
            CacheSource::Disk => "disk",
            CacheSource::Miss => "miss",
        }
    }
}

impl fmt::Display for CacheSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of [`CacheManager::get`](crate::cache::CacheManager::get).
#[derive(Debug, Clone)]
pub struct CacheResult {
    pub hit: bool,
    pub entry: Option<CacheEntry>,
    pub source: CacheSource,
}

impl CacheResult {
    pub fn miss() -> Self {
        Self {
            hit: false,
            entry: None,
            source: CacheSource::Miss,
        }
    }

    pub fn memory(entry: CacheEntry) -> Self {
        Self {
            hit: true,
            entry: Some(entry),
            source: CacheSource::Memory,
        }
    }

    pub fn disk(entry: CacheEntry) -> Self {
        Self {
            hit: true,
            entry: Some(entry),
            source: CacheSource::Disk,
        }
    }

    /// Borrow the payload on a hit.
    pub fn payload(&self) -> Option<&Bytes> {
        self.entry.as_ref().map(|e| &e.payload)
    }
}

/// Cache-related errors.
///
/// These stay inside the cache: the public `get`/`set` contract degrades to
/// misses and best-effort writes instead of returning them.
#[derive(Debug, Error)]
pub enum CacheError {
    /// I/O error during cache operations
    #[error("Cache I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Key is not usable as a cache key
    #[error("Invalid cache key '{0}'")]
    InvalidKey(String),

    /// Entry on disk is incomplete or unreadable
    #[error("Corrupt cache entry '{key}': {reason}")]
    Corrupt { key: String, reason: String },

    /// Single entry larger than the whole memory budget
    #[error("Entry of {size} bytes exceeds memory budget of {budget} bytes")]
    EntryTooLarge { size: u64, budget: u64 },

    /// Invalid cache configuration
    #[error("Invalid cache configuration: {0}")]
    InvalidConfig(String),

    /// Blocking task panicked or was cancelled
    #[error("Background task failed: {0}")]
    TaskFailed(String),
}
