//! In-memory cache with LRU eviction.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use crate::cache::types::{CacheEntry, CacheError, CacheKey, EntryMetadata};

/// Fraction of the budget that [`MemoryCache::evict_to_watermark`] shrinks to.
pub const MEMORY_WATERMARK: f64 = 0.8;

/// Slot in the memory table.
#[derive(Debug)]
struct Slot {
    entry: CacheEntry,
    /// Recency sequence number; breaks ties between equal `last_accessed`.
    seq: u64,
    /// Accessed since the bookkeeping was last handed out for persisting
    dirty: bool,
}

#[derive(Debug, Default)]
struct MemoryState {
    entries: HashMap<CacheKey, Slot>,
    current_size_bytes: u64,
    next_seq: u64,
}

impl MemoryState {
    fn next_seq(&mut self) -> u64 {
        self.next_seq += 1;
        self.next_seq
    }

    fn remove(&mut self, key: &CacheKey) -> Option<Slot> {
        let slot = self.entries.remove(key)?;
        self.current_size_bytes = self
            .current_size_bytes
            .saturating_sub(slot.entry.size_bytes());
        Some(slot)
    }

    /// Remove a slot and record it in `evicted`.
    fn evict(&mut self, key: &CacheKey, evicted: &mut Evicted) {
        if let Some(slot) = self.remove(key) {
            evicted.bytes_freed += slot.entry.size_bytes();
            if slot.dirty {
                evicted
                    .touched
                    .push((key.clone(), slot.entry.metadata));
            }
            evicted.keys.push(key.clone());
        }
    }

    /// Keys ordered least recently used first.
    fn lru_order(&self) -> Vec<CacheKey> {
        let mut order: Vec<_> = self
            .entries
            .iter()
            .map(|(k, s)| (k.clone(), s.entry.metadata.last_accessed, s.seq))
            .collect();
        order.sort_by_key(|(_, accessed, seq)| (*accessed, *seq));
        order.into_iter().map(|(k, _, _)| k).collect()
    }

    /// Evict LRU entries until `current_size_bytes <= target`.
    fn evict_until(&mut self, target: u64) -> Evicted {
        let mut evicted = Evicted::default();
        if self.current_size_bytes <= target {
            return evicted;
        }

        for key in self.lru_order() {
            if self.current_size_bytes <= target {
                break;
            }
            self.evict(&key, &mut evicted);
        }
        evicted
    }
}

/// Keys removed from the memory tier and the bytes they held.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Evicted {
    pub keys: Vec<CacheKey>,
    pub bytes_freed: u64,
    /// Bookkeeping of removed entries that were read since it was last
    /// persisted
    pub touched: Vec<(CacheKey, EntryMetadata)>,
}

impl Evicted {
    pub fn count(&self) -> usize {
        self.keys.len()
    }
}

/// In-memory cache for processed images.
///
/// Bounded by a byte budget. The table and the byte counter live under one
/// lock so lookup+bookkeeping and insert+eviction are each atomic.
pub struct MemoryCache {
    state: Mutex<MemoryState>,
    max_size_bytes: u64,
}

impl MemoryCache {
    /// Create a new memory cache with the given byte budget.
    pub fn new(max_size_bytes: u64) -> Self {
        Self {
            state: Mutex::new(MemoryState::default()),
            max_size_bytes,
        }
    }

    /// Get a cached entry, recording the access.
    ///
    /// Bumps `access_count` and `last_accessed` on the stored entry and
    /// returns a copy reflecting the new bookkeeping.
    pub fn get(&self, key: &CacheKey) -> Option<CacheEntry> {
        let mut state = self.state.lock();
        let seq = state.next_seq();
        let slot = state.entries.get_mut(key)?;

        slot.entry.metadata.touch(Utc::now());
        slot.seq = seq;
        slot.dirty = true;
        Some(slot.entry.clone())
    }

    /// Get a cached entry without recording an access.
    pub fn peek(&self, key: &CacheKey) -> Option<CacheEntry> {
        let state = self.state.lock();
        state.entries.get(key).map(|slot| slot.entry.clone())
    }

    /// Insert an entry, evicting least recently used entries to make room.
    ///
    /// Eviction stops as soon as the new entry fits within the budget.
    /// Fails only when the entry alone is larger than the whole budget; the
    /// table is left untouched in that case. The entry is stored clean: its
    /// bookkeeping is assumed to match the disk copy.
    pub fn put(&self, entry: CacheEntry) -> Result<Evicted, CacheError> {
        let size = entry.size_bytes();
        if size > self.max_size_bytes {
            return Err(CacheError::EntryTooLarge {
                size,
                budget: self.max_size_bytes,
            });
        }

        let mut state = self.state.lock();

        // Replacing a key swaps the buffer; account for the old one first
        state.remove(&entry.key);

        let evicted = state.evict_until(self.max_size_bytes - size);

        let seq = state.next_seq();
        state.current_size_bytes += size;
        state.entries.insert(
            entry.key.clone(),
            Slot {
                entry,
                seq,
                dirty: false,
            },
        );

        Ok(evicted)
    }

    /// Remove an entry.
    pub fn remove(&self, key: &CacheKey) -> Option<CacheEntry> {
        self.state.lock().remove(key).map(|slot| slot.entry)
    }

    /// Check if a key exists in the cache.
    pub fn contains(&self, key: &CacheKey) -> bool {
        self.state.lock().entries.contains_key(key)
    }

    /// Get the current number of entries in the cache.
    pub fn entry_count(&self) -> usize {
        self.state.lock().entries.len()
    }

    /// Get the current size of the cache in bytes.
    pub fn current_bytes(&self) -> u64 {
        self.state.lock().current_size_bytes
    }

    /// Get the byte budget.
    pub fn max_size_bytes(&self) -> u64 {
        self.max_size_bytes
    }

    /// Bytes still available before eviction kicks in.
    pub fn free_bytes(&self) -> u64 {
        self.max_size_bytes.saturating_sub(self.current_bytes())
    }

    /// Clear all entries from the cache.
    pub fn clear(&self) -> Evicted {
        let mut state = self.state.lock();
        let keys: Vec<CacheKey> = state.entries.keys().cloned().collect();

        let mut evicted = Evicted::default();
        for key in keys {
            state.evict(&key, &mut evicted);
        }
        evicted
    }

    /// Remove every entry created before `cutoff`.
    pub fn expire_older_than(&self, cutoff: DateTime<Utc>) -> Evicted {
        let mut state = self.state.lock();
        let expired: Vec<CacheKey> = state
            .entries
            .iter()
            .filter(|(_, slot)| slot.entry.metadata.created < cutoff)
            .map(|(key, _)| key.clone())
            .collect();

        let mut result = Evicted::default();
        for key in expired {
            state.evict(&key, &mut result);
        }
        result
    }

    /// Evict LRU entries until usage is at or below [`MEMORY_WATERMARK`] of
    /// the budget.
    pub fn evict_to_watermark(&self) -> Evicted {
        let target = (self.max_size_bytes as f64 * MEMORY_WATERMARK) as u64;
        self.state.lock().evict_until(target)
    }

    /// Hand out the bookkeeping of every entry read since the last call
    /// (or since it was inserted), marking those entries clean.
    pub fn take_touched(&self) -> Vec<(CacheKey, EntryMetadata)> {
        let mut state = self.state.lock();
        state
            .entries
            .iter_mut()
            .filter(|(_, slot)| slot.dirty)
            .map(|(key, slot)| {
                slot.dirty = false;
                (key.clone(), slot.entry.metadata.clone())
            })
            .collect()
    }

    /// Copy out the metadata of every entry.
    pub fn snapshot_metadata(&self) -> Vec<(CacheKey, EntryMetadata)> {
        let state = self.state.lock();
        state
            .entries
            .iter()
            .map(|(key, slot)| (key.clone(), slot.entry.metadata.clone()))
            .collect()
    }
}
