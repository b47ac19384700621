//! Invalidation and maintenance methods on PixCache.

use serde::Serialize;
use tracing::info;

use crate::cache::ResourceKey;
use crate::coordinator::CoordinatorStats;
use crate::error::Result;
use crate::PixCache;

/// Snapshot of the in-memory sharing state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PixCacheStats {
    pub illust_live: usize,
    pub illust_replay: u64,
    pub user_live: usize,
    pub user_replay: u64,
}

impl PixCacheStats {
    fn from_parts(illusts: CoordinatorStats, users: CoordinatorStats) -> Self {
        Self {
            illust_live: illusts.live_shares,
            illust_replay: illusts.replay_entries,
            user_live: users.live_shares,
            user_replay: users.replay_entries,
        }
    }
}

impl PixCache {
    // ========================================
    // Invalidation & Maintenance
    // ========================================

    /// Drop the local record and any shared result for `key`.
    ///
    /// Returns whether the store held a record. Fetches already running keep
    /// streaming to their consumers but are never replayed.
    pub async fn invalidate(&self, key: &ResourceKey) -> Result<bool> {
        self.illusts.invalidate(key);
        self.users.invalidate(key);
        let removed = self.engine.store.invalidate(key).await?;
        info!("Invalidated {} (stored record: {})", key, removed);
        Ok(removed)
    }

    /// Drop every local record and every shared result.
    pub async fn invalidate_all(&self) -> Result<()> {
        self.illusts.invalidate_all();
        self.users.invalidate_all();
        self.engine.store.invalidate_all().await?;
        info!("Invalidated all cached resources");
        Ok(())
    }

    /// Delete stored records older than the configured retention.
    pub async fn purge_expired(&self) -> Result<usize> {
        let retention = self.engine.config.retention();
        let purged = self.engine.store.purge_older_than(retention).await?;
        info!("Purged {} records older than {:?}", purged, retention);
        Ok(purged)
    }

    pub fn stats(&self) -> PixCacheStats {
        PixCacheStats::from_parts(self.illusts.stats(), self.users.stats())
    }
}
