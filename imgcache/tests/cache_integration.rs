//! Integration tests for the two-tier image cache.
//!
//! These tests drive the cache through its public API only:
//! - Memory, disk and promotion across a restart
//! - Hit/miss accounting
//! - Age-based expiry
//! - LRU eviction under a small memory budget
//! - Recovery from interrupted writes and corrupt files
//! - Parallel readers and writers

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use imgcache::cache::{
    generate_key_at, CacheConfig, CacheKey, CacheManager, CacheSource, ImageMetadata, MemoryCache,
};
use serde_json::{json, Value};
use tempfile::TempDir;

// =============================================================================
// Test Helpers
// =============================================================================

fn key(s: &str) -> CacheKey {
    CacheKey::new(s).unwrap()
}

fn image() -> ImageMetadata {
    ImageMetadata::new(512, 512, "png")
        .with_processing_time_ms(40)
        .with_enhancement("upscale")
}

/// A payload that compresses well but is not trivially uniform.
fn payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

fn file_names(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}

// =============================================================================
// Tier Behavior
// =============================================================================

#[tokio::test]
async fn test_restart_serves_from_disk_then_memory() {
    let temp = TempDir::new().unwrap();
    let config = CacheConfig::new(temp.path());
    let data = payload(100 * 1024);

    let cache = CacheManager::open(config.clone()).await.unwrap();
    cache.set(key("img-abc"), data.clone(), image()).await;

    let first = cache.get(&key("img-abc")).await;
    assert!(first.hit);
    assert_eq!(first.source, CacheSource::Memory);
    assert_eq!(first.payload().unwrap().as_ref(), data.as_slice());
    cache.shutdown().await;
    drop(cache);

    let reopened = CacheManager::open(config).await.unwrap();

    let from_disk = reopened.get(&key("img-abc")).await;
    assert_eq!(from_disk.source, CacheSource::Disk);
    assert_eq!(from_disk.payload().unwrap().as_ref(), data.as_slice());
    let meta = &from_disk.entry.as_ref().unwrap().metadata;
    assert_eq!(meta.width, 512);
    assert_eq!(meta.format, "png");
    assert_eq!(meta.enhancements, vec!["upscale".to_string()]);
    assert_eq!(meta.original_size, data.len() as u64);

    let promoted = reopened.get(&key("img-abc")).await;
    assert_eq!(promoted.source, CacheSource::Memory);
    assert_eq!(promoted.payload().unwrap().as_ref(), data.as_slice());

    reopened.shutdown().await;
}

#[tokio::test]
async fn test_repeated_reads_return_identical_payloads() {
    let temp = TempDir::new().unwrap();
    let cache = CacheManager::open(CacheConfig::new(temp.path())).await.unwrap();
    let data = payload(8 * 1024);
    cache.set(key("img-idem"), data.clone(), image()).await;

    for _ in 0..5 {
        let result = cache.get(&key("img-idem")).await;
        assert!(result.hit);
        assert_eq!(result.payload().unwrap().as_ref(), data.as_slice());
    }

    cache.shutdown().await;
}

#[tokio::test]
async fn test_overwrite_replaces_payload_in_both_tiers() {
    let temp = TempDir::new().unwrap();
    let config = CacheConfig::new(temp.path());

    let cache = CacheManager::open(config.clone()).await.unwrap();
    cache.set(key("img-v"), payload(2048), image()).await;
    cache.set(key("img-v"), vec![9u8; 4096], image()).await;
    assert_eq!(
        cache.get(&key("img-v")).await.payload().unwrap().as_ref(),
        vec![9u8; 4096].as_slice()
    );
    cache.shutdown().await;
    drop(cache);

    let reopened = CacheManager::open(config).await.unwrap();
    let result = reopened.get(&key("img-v")).await;
    assert_eq!(result.source, CacheSource::Disk);
    assert_eq!(result.payload().unwrap().as_ref(), vec![9u8; 4096].as_slice());
    reopened.shutdown().await;
}

// =============================================================================
// Metrics
// =============================================================================

#[tokio::test]
async fn test_metrics_count_every_lookup() {
    let temp = TempDir::new().unwrap();
    let cache = CacheManager::open(CacheConfig::new(temp.path())).await.unwrap();

    for i in 0..3 {
        cache
            .set(key(&format!("img-{}", i)), payload(1024), image())
            .await;
    }

    // 7 hits, 3 misses
    for i in 0..7 {
        assert!(cache.get(&key(&format!("img-{}", i % 3))).await.hit);
    }
    for i in 0..3 {
        assert!(!cache.get(&key(&format!("absent-{}", i))).await.hit);
    }

    let metrics = cache.metrics();
    assert_eq!(metrics.hit_count, 7);
    assert_eq!(metrics.miss_count, 3);
    assert_eq!(metrics.stats.writes, 3);
    assert_eq!(metrics.total_entries, 3);
    assert!((metrics.cache_efficiency() - 70.0).abs() < 1e-9);
    assert!((metrics.hit_rate() - 0.7).abs() < 1e-9);
    assert!(metrics.average_latency_ms >= 0.0);
    assert!(metrics.format().contains("imgcache Statistics"));

    cache.shutdown().await;
}

#[tokio::test]
async fn test_most_accessed_survives_restart() {
    let temp = TempDir::new().unwrap();
    let config = CacheConfig::new(temp.path());

    let cache = CacheManager::open(config.clone()).await.unwrap();
    cache.set(key("img-hot"), payload(512), image()).await;
    cache.set(key("img-cold"), payload(512), image()).await;
    cache.shutdown().await;
    drop(cache);

    // One disk read and two memory hits per run; shutdown persists the hits
    for _ in 0..3 {
        let reopened = CacheManager::open(config.clone()).await.unwrap();
        assert_eq!(reopened.get(&key("img-hot")).await.source, CacheSource::Disk);
        assert_eq!(reopened.get(&key("img-hot")).await.source, CacheSource::Memory);
        assert_eq!(reopened.get(&key("img-hot")).await.source, CacheSource::Memory);
        reopened.shutdown().await;
    }

    let cache = CacheManager::open(config).await.unwrap();
    let most = cache.most_accessed(1).await;
    assert_eq!(most[0].key, key("img-hot"));
    assert_eq!(most[0].access_count, 10);

    let least = cache.least_accessed(1).await;
    assert_eq!(least[0].key, key("img-cold"));
    assert_eq!(least[0].access_count, 1);

    cache.shutdown().await;
}

// =============================================================================
// Expiry
// =============================================================================

#[tokio::test]
async fn test_entries_expire_after_max_age() {
    let temp = TempDir::new().unwrap();
    let max_age = Duration::from_secs(3600);
    let config = CacheConfig::new(temp.path()).with_max_age(max_age);
    let cache = CacheManager::open(config).await.unwrap();
    let age = chrono::Duration::from_std(max_age).unwrap();

    let before = Utc::now();
    cache.set(key("img-ttl"), payload(1024), image()).await;
    let after = Utc::now();

    let early = cache
        .cleanup_at(before + age - chrono::Duration::seconds(1))
        .await;
    assert_eq!(early.total_removed(), 0);
    assert!(cache.get(&key("img-ttl")).await.hit);

    let late = cache
        .cleanup_at(after + age + chrono::Duration::seconds(1))
        .await;
    assert_eq!(late.memory_expired, 1);
    assert_eq!(late.disk_expired, 1);
    assert!(!cache.get(&key("img-ttl")).await.hit);
    assert_eq!(cache.metrics().total_entries, 0);

    cache.shutdown().await;
}

// =============================================================================
// Eviction
// =============================================================================

#[test]
fn test_memory_lru_keeps_recently_used() {
    use imgcache::cache::{CacheEntry, EntryMetadata};

    let memory = MemoryCache::new(3 * 1000);
    let entry = |name: &str| {
        CacheEntry::new(
            key(name),
            vec![1u8; 1000],
            EntryMetadata::new(&image(), 1000, Utc::now()),
        )
    };

    memory.put(entry("a")).unwrap();
    memory.put(entry("b")).unwrap();
    memory.put(entry("c")).unwrap();
    assert!(memory.get(&key("a")).is_some());

    let evicted = memory.put(entry("d")).unwrap();
    assert_eq!(evicted.keys, vec![key("b")]);
    assert!(evicted.touched.is_empty());
    assert!(memory.contains(&key("a")));
    assert!(memory.contains(&key("c")));
    assert!(memory.contains(&key("d")));
    assert_eq!(memory.entry_count(), 3);
    assert!(memory.current_bytes() <= memory.max_size_bytes());
}

#[tokio::test]
async fn test_small_memory_budget_falls_back_to_disk() {
    let temp = TempDir::new().unwrap();
    let config = CacheConfig::new(temp.path()).with_memory_budget(3 * 1024);
    let cache = CacheManager::open(config).await.unwrap();

    for name in ["img-a", "img-b", "img-c"] {
        cache.set(key(name), payload(1024), image()).await;
    }
    assert_eq!(cache.get(&key("img-a")).await.source, CacheSource::Memory);

    cache.set(key("img-d"), payload(1024), image()).await;

    let metrics = cache.metrics();
    assert_eq!(metrics.memory_entries, 3);
    assert!(metrics.memory_bytes <= 3 * 1024);
    assert_eq!(metrics.disk_entries, 4);

    assert_eq!(cache.get(&key("img-a")).await.source, CacheSource::Memory);
    let evicted = cache.get(&key("img-b")).await;
    assert_eq!(evicted.source, CacheSource::Disk);
    assert_eq!(evicted.payload().unwrap().as_ref(), payload(1024).as_slice());

    cache.shutdown().await;
}

// =============================================================================
// Recovery
// =============================================================================

#[tokio::test]
async fn test_open_heals_crash_leftovers() {
    let temp = TempDir::new().unwrap();
    let config = CacheConfig::new(temp.path());

    let cache = CacheManager::open(config.clone()).await.unwrap();
    cache.set(key("img-good"), payload(2048), image()).await;
    cache.shutdown().await;
    drop(cache);

    fs::write(temp.path().join("img-lost.cache.tmp"), b"partial").unwrap();
    fs::write(temp.path().join("img-lonely.cache"), b"no metadata").unwrap();
    fs::write(temp.path().join("img-bad.cache"), b"payload").unwrap();
    fs::write(temp.path().join("img-bad.meta"), b"{ not json").unwrap();

    let reopened = CacheManager::open(config).await.unwrap();
    assert_eq!(
        file_names(temp.path()),
        vec!["img-good.cache".to_string(), "img-good.meta".to_string()]
    );

    let metrics = reopened.metrics();
    assert_eq!(metrics.disk_entries, 1);
    assert_eq!(metrics.stats.corrupt_entries, 2);

    assert!(!reopened.get(&key("img-bad")).await.hit);
    assert!(!reopened.get(&key("img-lonely")).await.hit);
    assert_eq!(
        reopened.get(&key("img-good")).await.payload().unwrap().as_ref(),
        payload(2048).as_slice()
    );

    reopened.shutdown().await;
}

#[tokio::test]
async fn test_truncated_payload_is_a_miss() {
    let temp = TempDir::new().unwrap();
    let config = CacheConfig::new(temp.path()).with_memory_enabled(false);

    let cache = CacheManager::open(config).await.unwrap();
    cache.set(key("img-trunc"), payload(4096), image()).await;

    fs::write(temp.path().join("img-trunc.cache"), b"short").unwrap();

    assert!(!cache.get(&key("img-trunc")).await.hit);
    assert!(!temp.path().join("img-trunc.meta").exists());
    assert_eq!(cache.metrics().stats.corrupt_entries, 1);

    cache.shutdown().await;
}

// =============================================================================
// Keys
// =============================================================================

#[tokio::test]
async fn test_generated_keys_address_entries() {
    let temp = TempDir::new().unwrap();
    let cache = CacheManager::open(CacheConfig::new(temp.path())).await.unwrap();

    let mut params: BTreeMap<String, Value> = BTreeMap::new();
    params.insert("scale".to_string(), json!(4));
    params.insert("model".to_string(), json!("esrgan"));

    let now = Utc::now();
    let k = generate_key_at("https://example.com/a.png", &params, now);
    assert_eq!(k, generate_key_at("https://example.com/a.png", &params, now));

    cache.set(k.clone(), payload(256), image()).await;
    assert!(cache.get(&k).await.hit);

    params.insert("scale".to_string(), json!(2));
    let other = generate_key_at("https://example.com/a.png", &params, now);
    assert_ne!(k, other);
    assert!(!cache.get(&other).await.hit);

    cache.shutdown().await;
}

// =============================================================================
// Concurrency
// =============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_parallel_writers_and_readers_across_restart() {
    let temp = TempDir::new().unwrap();
    let config = CacheConfig::new(temp.path()).with_memory_budget(8 * 1024);
    let cache = CacheManager::open(config.clone()).await.unwrap();

    let mut tasks = Vec::new();
    for t in 0..8 {
        let cache = Arc::clone(&cache);
        tasks.push(tokio::spawn(async move {
            for round in 0..10 {
                let name = format!("img-{}", (t + round) % 12);
                cache.set(key(&name), payload(2048), image()).await;
                let result = cache.get(&key(&name)).await;
                assert!(result.hit);
                assert_eq!(result.payload().unwrap().as_ref(), payload(2048).as_slice());
            }
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }
    assert_eq!(cache.metrics().stats.corrupt_entries, 0);
    cache.shutdown().await;
    drop(cache);

    let leftovers = fs::read_dir(temp.path())
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
        .count();
    assert_eq!(leftovers, 0);

    // Every key is readable from disk after a restart, in parallel
    let cache = CacheManager::open(config).await.unwrap();
    assert_eq!(cache.metrics().disk_entries, 12);
    let mut tasks = Vec::new();
    for t in 0..4 {
        let cache = Arc::clone(&cache);
        tasks.push(tokio::spawn(async move {
            for n in 0..12 {
                let result = cache.get(&key(&format!("img-{}", (t + n) % 12))).await;
                assert!(result.hit);
                assert_eq!(result.payload().unwrap().len(), 2048);
            }
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    let metrics = cache.metrics();
    assert_eq!(metrics.hit_count, 48);
    assert_eq!(metrics.stats.corrupt_entries, 0);
    cache.shutdown().await;
}
