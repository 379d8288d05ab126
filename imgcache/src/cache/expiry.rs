//! Periodic expiry sweep.
//!
//! The daemon wakes every `cleanup_interval`, runs
//! [`CacheManager::cleanup`] and goes back to sleep until the shutdown token
//! is cancelled. It only holds a weak reference to the manager, so dropping
//! the last strong reference also ends the loop.
//!
//! # Example
//!
//! ```ignore
//! let daemon = ExpiryDaemon::new(Arc::downgrade(&manager), Duration::from_secs(1800));
//! let handle = tokio::spawn(daemon.run(shutdown_token));
//! ```

use std::sync::Weak;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::cache::manager::CacheManager;

/// Fraction of the disk size limit a sweep shrinks an oversized disk tier to.
pub const DISK_EVICTION_TARGET: f64 = 0.9;

/// What one sweep removed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Memory entries past the maximum age
    pub memory_expired: u64,
    /// Disk pairs past the maximum age
    pub disk_expired: u64,
    /// Disk pairs removed to get under the size limit
    pub disk_evicted: u64,
    /// Bytes released across both tiers
    pub bytes_freed: u64,
}

impl SweepReport {
    /// Total entries removed from either tier.
    pub fn total_removed(&self) -> u64 {
        self.memory_expired + self.disk_expired + self.disk_evicted
    }
}

/// What one optimization pass did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OptimizeReport {
    /// Memory entries evicted to reach the watermark
    pub memory_evicted: u64,
    /// Memory bytes released
    pub memory_bytes_freed: u64,
    /// Cold disk entries rewritten compressed
    pub recompressed: u64,
    /// Disk bytes saved by recompression
    pub disk_bytes_saved: u64,
}

/// Background task running expiry sweeps on a fixed interval.
pub struct ExpiryDaemon {
    manager: Weak<CacheManager>,
    interval: Duration,
}

impl ExpiryDaemon {
    /// Create a daemon sweeping `manager` every `interval`.
    pub fn new(manager: Weak<CacheManager>, interval: Duration) -> Self {
        Self { manager, interval }
    }

    /// Runs sweeps until shutdown is signalled or the manager is dropped.
    pub async fn run(self, shutdown: CancellationToken) {
        info!(
            interval_secs = self.interval.as_secs(),
            "Cache expiry daemon starting"
        );

        let mut interval = tokio::time::interval(self.interval);
        // Skip the first immediate tick
        interval.tick().await;

        loop {
            tokio::select! {
                biased;

                _ = shutdown.cancelled() => {
                    info!("Cache expiry daemon shutting down");
                    break;
                }

                _ = interval.tick() => {
                    let Some(manager) = self.manager.upgrade() else {
                        debug!("Cache manager dropped, stopping expiry daemon");
                        break;
                    };
                    let report = manager.cleanup().await;
                    debug!(removed = report.total_removed(), "Expiry sweep finished");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::config::CacheConfig;
    use crate::cache::types::{CacheKey, ImageMetadata};
    use std::sync::Arc;
    use tempfile::TempDir;

    #[test]
    fn test_sweep_report_total() {
        let report = SweepReport {
            memory_expired: 2,
            disk_expired: 3,
            disk_evicted: 1,
            bytes_freed: 100,
        };
        assert_eq!(report.total_removed(), 6);
        assert_eq!(SweepReport::default().total_removed(), 0);
    }

    #[tokio::test]
    async fn test_daemon_stops_on_cancel() {
        let temp = TempDir::new().unwrap();
        let manager = CacheManager::open(CacheConfig::new(temp.path())).await.unwrap();

        let token = CancellationToken::new();
        let daemon = ExpiryDaemon::new(Arc::downgrade(&manager), Duration::from_millis(10));
        let handle = tokio::spawn(daemon.run(token.clone()));

        token.cancel();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("daemon should stop after cancel")
            .unwrap();
    }

    #[tokio::test]
    async fn test_daemon_stops_when_manager_dropped() {
        let temp = TempDir::new().unwrap();
        let manager = CacheManager::open(CacheConfig::new(temp.path())).await.unwrap();
        let weak = Arc::downgrade(&manager);
        drop(manager);

        let daemon = ExpiryDaemon::new(weak, Duration::from_millis(10));
        let handle = tokio::spawn(daemon.run(CancellationToken::new()));

        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("daemon should stop once the manager is gone")
            .unwrap();
    }

    #[tokio::test]
    async fn test_daemon_sweeps_expired_entries() {
        let temp = TempDir::new().unwrap();
        let config = CacheConfig::new(temp.path())
            .with_max_age(Duration::from_millis(50))
            .with_cleanup_interval(Duration::from_millis(20));
        let manager = CacheManager::open(config).await.unwrap();

        let key = CacheKey::new("img-short-lived").unwrap();
        manager
            .set(key.clone(), vec![1u8; 64], ImageMetadata::new(8, 8, "png"))
            .await;

        tokio::time::sleep(Duration::from_millis(300)).await;

        let metrics = manager.metrics();
        assert_eq!(metrics.memory_entries, 0);
        assert_eq!(metrics.disk_entries, 0);
        assert!(metrics.stats.expired_entries >= 2);

        manager.shutdown().await;
    }
}
