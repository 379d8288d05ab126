//! imgcache - Tiered cache for processed images
//!
//! Memoizes the output of expensive image-processing passes (upscaling,
//! background removal, color grading) keyed by source and parameters,
//! serving repeats from memory or disk.
//!
//! # High-Level API
//!
//! ```ignore
//! use imgcache::cache::{generate_key, CacheConfig, CacheManager, ImageMetadata};
//!
//! let cache = CacheManager::open(CacheConfig::default()).await?;
//! let key = generate_key(source_url, &params);
//!
//! let result = cache.get(&key).await;
//! if !result.hit {
//!     let processed = pipeline.run(source_url, &params).await?;
//!     cache.set(key, processed, ImageMetadata::new(1024, 1024, "png")).await;
//! }
//! ```

pub mod cache;
pub mod config;
pub mod logging;

/// Version of the imgcache library and CLI.
///
/// This is synchronized across all components in the workspace.
/// The version is defined in `Cargo.toml` and injected at compile time.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
