//! Cache operation CLI commands.

use std::io::Write;
use std::path::PathBuf;

use clap::Args;
use imgcache::cache::{CacheKey, CacheManager, ImageMetadata};
use imgcache::config::format_size;

use crate::error::CliError;

/// Number of keys listed in each ranking of `imgcache stats`.
const TOP_KEYS: usize = 5;

/// Arguments for `imgcache put`.
#[derive(Debug, Args)]
pub struct PutArgs {
    /// Cache key (see `imgcache key`)
    pub key: String,

    /// File holding the processed image
    pub file: PathBuf,

    /// Image width in pixels
    #[arg(long)]
    pub width: u32,

    /// Image height in pixels
    #[arg(long)]
    pub height: u32,

    /// Encoded image format (png, webp, ...)
    #[arg(long)]
    pub format: String,

    /// Enhancement stage applied, in order. May be repeated.
    #[arg(long = "enhancement")]
    pub enhancements: Vec<String>,

    /// Time the pipeline spent producing the image
    #[arg(long, default_value = "0")]
    pub processing_time_ms: u64,
}

/// Arguments for `imgcache get`.
#[derive(Debug, Args)]
pub struct GetArgs {
    /// Cache key
    pub key: String,

    /// Write the payload to this file instead of stdout
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

/// Store a file under a key.
pub async fn put(cache: &CacheManager, args: PutArgs) -> Result<(), CliError> {
    let key = CacheKey::new(args.key)?;
    let payload = tokio::fs::read(&args.file)
        .await
        .map_err(|error| CliError::FileRead {
            path: args.file.display().to_string(),
            error,
        })?;
    let size = payload.len() as u64;

    let image = args.enhancements.into_iter().fold(
        ImageMetadata::new(args.width, args.height, args.format)
            .with_processing_time_ms(args.processing_time_ms),
        |image, stage| image.with_enhancement(stage),
    );

    cache.set(key.clone(), payload, image).await;
    eprintln!("Stored {} ({})", key, format_size(size));
    Ok(())
}

/// Fetch a payload by key.
pub async fn get(cache: &CacheManager, args: GetArgs) -> Result<(), CliError> {
    let key = CacheKey::new(args.key)?;
    let result = cache.get(&key).await;
    let entry = result
        .entry
        .ok_or_else(|| CliError::NotFound(key.to_string()))?;

    match args.output {
        Some(path) => {
            tokio::fs::write(&path, &entry.payload)
                .await
                .map_err(|error| CliError::FileWrite {
                    path: path.display().to_string(),
                    error,
                })?;
            eprintln!(
                "{} from {}: {}x{} {}, {} -> {}",
                key,
                result.source,
                entry.metadata.width,
                entry.metadata.height,
                entry.metadata.format,
                format_size(entry.metadata.original_size),
                path.display()
            );
        }
        None => {
            let mut stdout = std::io::stdout().lock();
            stdout
                .write_all(&entry.payload)
                .and_then(|_| stdout.flush())
                .map_err(|error| CliError::FileWrite {
                    path: "stdout".to_string(),
                    error,
                })?;
        }
    }
    Ok(())
}

/// Print metrics and access rankings.
pub async fn stats(cache: &CacheManager) -> Result<(), CliError> {
    println!("Cache directory: {}", cache.cache_dir().display());
    println!();
    print!("{}", cache.metrics().format());

    let most = cache.most_accessed(TOP_KEYS).await;
    if !most.is_empty() {
        println!();
        println!("MOST ACCESSED");
        for access in &most {
            println!("  {:>6}  {}", access.access_count, access.key);
        }

        println!();
        println!("LEAST ACCESSED");
        for access in cache.least_accessed(TOP_KEYS).await {
            println!("  {:>6}  {}", access.access_count, access.key);
        }
    }
    Ok(())
}

/// Run an expiry sweep.
pub async fn cleanup(cache: &CacheManager) -> Result<(), CliError> {
    let report = cache.cleanup().await;
    println!(
        "Expired {} memory and {} disk entries, evicted {} over the size limit, freed {}",
        report.memory_expired,
        report.disk_expired,
        report.disk_evicted,
        format_size(report.bytes_freed)
    );
    Ok(())
}

/// Evict memory to its watermark and recompress cold disk entries.
pub async fn optimize(cache: &CacheManager) -> Result<(), CliError> {
    let report = cache.optimize().await;
    println!(
        "Evicted {} memory entries, recompressed {} disk entries, saved {}",
        report.memory_evicted,
        report.recompressed,
        format_size(report.disk_bytes_saved)
    );
    Ok(())
}

/// Remove every entry.
pub async fn clear(cache: &CacheManager) -> Result<(), CliError> {
    let before = cache.metrics();
    cache.clear().await;
    println!(
        "Cleared {} entries ({}) from {}",
        before.total_entries,
        format_size(before.total_bytes),
        cache.cache_dir().display()
    );
    Ok(())
}
