//! Hybrid record store: authoritative record store plus a lease cache.
//!
//! Every lock decision is made by the primary store. The cache is mirrored
//! after the primary succeeds, and cache failures are logged and counted but
//! never change an operation's result.
//!
//! A save evicts the cached blob before writing the primary, and evicts again
//! if the new blob cannot be cached, so a load never serves a blob older than
//! the last successful save made through this store. Cached blobs are only
//! trustworthy when every process sharing the table writes through a
//! `HybridStore`; staleness is otherwise bounded by the data ttl.

use crate::cache::{CacheStats, CacheStatsSnapshot, LeaseCache};
use crate::RecordStore;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use syncbridge_core::{EntityId, EpochMillis, OwnerId, Record, StateBlob, SyncResult};

/// Dispatcher that pairs a [`RecordStore`] with a [`LeaseCache`].
pub struct HybridStore {
    primary: Arc<dyn RecordStore>,
    cache: Arc<dyn LeaseCache>,
    lease_ttl: Duration,
    data_ttl: Duration,
    stats: CacheStats,
}

impl HybridStore {
    pub fn new(
        primary: Arc<dyn RecordStore>,
        cache: Arc<dyn LeaseCache>,
        lease_ttl: Duration,
        data_ttl: Duration,
    ) -> Self {
        Self {
            primary,
            cache,
            lease_ttl,
            data_ttl,
            stats: CacheStats::default(),
        }
    }

    pub fn stats(&self) -> CacheStatsSnapshot {
        self.stats.snapshot()
    }

    fn mirror_failed(&self, operation: &'static str, id: EntityId, err: &dyn std::fmt::Display) {
        self.stats.record_error();
        tracing::debug!(operation, entity_id = %id, error = %err, "Lease cache mirror failed");
    }
}

#[async_trait]
impl RecordStore for HybridStore {
    async fn init_schema(&self) -> SyncResult<()> {
        self.primary.init_schema().await
    }

    async fn acquire(
        &self,
        id: EntityId,
        owner: &OwnerId,
        now: EpochMillis,
        stale_before: EpochMillis,
    ) -> SyncResult<bool> {
        let acquired = self.primary.acquire(id, owner, now, stale_before).await?;
        if acquired {
            if let Err(e) = self.cache.claim(id, owner, self.lease_ttl).await {
                self.mirror_failed("acquire", id, &e);
            }
        }
        Ok(acquired)
    }

    async fn is_owner(&self, id: EntityId, owner: &OwnerId) -> SyncResult<bool> {
        self.primary.is_owner(id, owner).await
    }

    async fn renew(&self, id: EntityId, owner: &OwnerId, now: EpochMillis) -> SyncResult<bool> {
        let renewed = self.primary.renew(id, owner, now).await?;
        if renewed {
            if let Err(e) = self.cache.claim(id, owner, self.lease_ttl).await {
                self.mirror_failed("renew", id, &e);
            }
        }
        Ok(renewed)
    }

    async fn release(&self, id: EntityId, owner: &OwnerId) -> SyncResult<bool> {
        let released = self.primary.release(id, owner).await?;
        if let Err(e) = self.cache.release(id, owner).await {
            self.mirror_failed("release", id, &e);
        }
        Ok(released)
    }

    async fn force_release(&self, id: EntityId) -> SyncResult<bool> {
        let released = self.primary.force_release(id).await?;
        if let Err(e) = self.cache.evict_lock(id).await {
            self.mirror_failed("force_release", id, &e);
        }
        Ok(released)
    }

    async fn save_and_release(
        &self,
        id: EntityId,
        owner: &OwnerId,
        blob: &str,
    ) -> SyncResult<bool> {
        if let Err(e) = self.cache.evict_data(id).await {
            self.mirror_failed("evict_data", id, &e);
        }
        let saved = self.primary.save_and_release(id, owner, blob).await?;
        if saved {
            if let Err(e) = self.cache.store(id, blob, self.data_ttl).await {
                self.mirror_failed("store", id, &e);
                if let Err(e) = self.cache.evict_data(id).await {
                    self.mirror_failed("evict_data", id, &e);
                }
            }
            if let Err(e) = self.cache.release(id, owner).await {
                self.mirror_failed("release", id, &e);
            }
        }
        Ok(saved)
    }

    async fn sweep_orphans(&self, owner: &OwnerId) -> SyncResult<u64> {
        self.primary.sweep_orphans(owner).await
    }

    async fn load(&self, id: EntityId) -> SyncResult<Option<StateBlob>> {
        match self.cache.fetch(id).await {
            Ok(Some(blob)) => {
                self.stats.record_hit();
                return Ok(Some(blob));
            }
            Ok(None) => self.stats.record_miss(),
            Err(e) => self.mirror_failed("fetch", id, &e),
        }

        self.stats.record_fallback();
        let blob = self.primary.load(id).await?;
        if let Some(blob) = &blob {
            if let Err(e) = self.cache.store(id, blob, self.data_ttl).await {
                self.mirror_failed("store", id, &e);
            }
        }
        Ok(blob)
    }

    async fn record(&self, id: EntityId) -> SyncResult<Option<Record>> {
        self.primary.record(id).await
    }
}
