use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

use super::handlers::Daemon;
use crate::db::PoolStats;

/// Point-in-time daemon status, logged on every health tick.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthSnapshot {
    pub pool: PoolStats,
    pub cache_entries: usize,
    pub queue_depth: usize,
    pub evicted: usize,
    pub pruned: usize,
    pub uptime_secs: u64,
}

impl Daemon {
    /// One round of housekeeping: evict expired cache entries, prune dead idle
    /// connections, and report status. Failures are logged, never returned.
    pub async fn maintenance(&self) -> HealthSnapshot {
        let evicted = self.cache.evict_expired();
        let pruned = match self.pool.prune_idle().await {
            Ok(pruned) => pruned,
            Err(e) => {
                tracing::warn!(error = %e, "pool maintenance failed");
                0
            }
        };

        let snapshot = HealthSnapshot {
            pool: self.pool.stats(),
            cache_entries: self.cache.len(),
            queue_depth: self.queue.depth(),
            evicted,
            pruned,
            uptime_secs: self.uptime().as_secs(),
        };
        tracing::info!(
            pool_idle = snapshot.pool.idle,
            pool_in_use = snapshot.pool.in_use,
            pool_open = snapshot.pool.open,
            cache_entries = snapshot.cache_entries,
            queue_depth = snapshot.queue_depth,
            evicted,
            pruned,
            "health check"
        );
        snapshot
    }
}

/// Run [`Daemon::maintenance`] every `interval` until shutdown is signalled.
pub async fn run_health_loop(
    daemon: Arc<Daemon>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately; startup already warmed the pool.
    ticker.tick().await;

    loop {
        tokio::select! {
            biased;
            _ = shutdown.changed() => break,
            _ = ticker.tick() => {
                daemon.maintenance().await;
            }
        }
    }
    tracing::debug!("health loop stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DaemonConfig;
    use crate::db::ConnectionPool;
    use crate::error::Result;
    use crate::extraction::{ExtractionJob, ExtractionQueue};
    use crate::repo::{RepoCache, RepoIdentity, RepoResolver};
    use async_trait::async_trait;
    use std::path::Path;

    struct Fixed;

    #[async_trait]
    impl RepoResolver for Fixed {
        async fn resolve(&self, _cwd: &Path) -> Result<RepoIdentity> {
            Ok(RepoIdentity::new("acme/api"))
        }
    }

    #[tokio::test]
    async fn maintenance_reports_and_refills_the_pool() {
        let tmp = tempfile::TempDir::new().unwrap();
        let config = DaemonConfig::default();
        let pool = ConnectionPool::new(tmp.path().join("memory.db"), config.pool.clone());
        let cache = Arc::new(RepoCache::new(Arc::new(Fixed), Duration::from_millis(10)));
        let (queue, _jobs) = ExtractionQueue::new(4);
        let daemon = Daemon::new(pool, Arc::clone(&cache), queue.clone(), Arc::new(config));

        cache.get_or_resolve("/work/api").await.unwrap();
        queue.enqueue(ExtractionJob::new(serde_json::json!({}), "/work/api")).unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        let snapshot = daemon.maintenance().await;
        assert_eq!(snapshot.evicted, 1);
        assert_eq!(snapshot.cache_entries, 0);
        assert_eq!(snapshot.queue_depth, 1);
        assert_eq!(snapshot.pruned, 0);
        assert_eq!(snapshot.pool.open, 1, "pool refilled to min_size");
    }

    #[tokio::test]
    async fn health_loop_stops_on_shutdown() {
        let tmp = tempfile::TempDir::new().unwrap();
        let config = DaemonConfig::default();
        let pool = ConnectionPool::new(tmp.path().join("memory.db"), config.pool.clone());
        let cache = Arc::new(RepoCache::new(Arc::new(Fixed), config.cache.ttl()));
        let (queue, _jobs) = ExtractionQueue::new(4);
        let daemon = Arc::new(Daemon::new(pool, cache, queue, Arc::new(config)));

        let (tx, rx) = watch::channel(false);
        let task = tokio::spawn(run_health_loop(daemon, Duration::from_secs(60), rx));
        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .expect("loop should stop")
            .unwrap();
    }
}
