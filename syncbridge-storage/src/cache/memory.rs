//! In-process lease cache backed by DashMap.

use super::LeaseCache;
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use syncbridge_core::{EntityId, OwnerId, StateBlob, SyncResult};
use tokio::time::Instant;

/// Writes between full sweeps of expired entries.
const PURGE_EVERY: u64 = 256;

#[derive(Debug, Clone)]
struct Expiring<T> {
    value: T,
    expires_at: Instant,
}

impl<T> Expiring<T> {
    fn new(value: T, ttl: Duration) -> Self {
        Self {
            value,
            expires_at: Instant::now() + ttl,
        }
    }

    fn is_live(&self) -> bool {
        Instant::now() < self.expires_at
    }
}

/// Read a live value, dropping the entry if it has expired.
fn read_live<T: Clone>(map: &DashMap<EntityId, Expiring<T>>, id: EntityId) -> Option<T> {
    let live = map.get(&id).filter(|e| e.is_live()).map(|e| e.value.clone());
    if live.is_none() {
        map.remove_if(&id, |_, e| !e.is_live());
    }
    live
}

/// Lease cache for single-process deployments and tests.
#[derive(Debug, Default)]
pub struct InMemoryLeaseCache {
    locks: DashMap<EntityId, Expiring<OwnerId>>,
    data: DashMap<EntityId, Expiring<StateBlob>>,
    writes: AtomicU64,
}

impl InMemoryLeaseCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop every expired lock and data entry. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let before = self.locks.len() + self.data.len();
        self.locks.retain(|_, e| e.is_live());
        self.data.retain(|_, e| e.is_live());
        before.saturating_sub(self.locks.len() + self.data.len())
    }

    fn after_write(&self) {
        if self.writes.fetch_add(1, Ordering::Relaxed) % PURGE_EVERY == PURGE_EVERY - 1 {
            let purged = self.purge_expired();
            if purged > 0 {
                tracing::trace!(purged, "Purged expired lease cache entries");
            }
        }
    }
}

#[async_trait]
impl LeaseCache for InMemoryLeaseCache {
    async fn claim(&self, id: EntityId, owner: &OwnerId, ttl: Duration) -> SyncResult<()> {
        self.locks.insert(id, Expiring::new(owner.clone(), ttl));
        self.after_write();
        Ok(())
    }

    async fn release(&self, id: EntityId, owner: &OwnerId) -> SyncResult<bool> {
        Ok(self
            .locks
            .remove_if(&id, |_, e| e.is_live() && &e.value == owner)
            .is_some())
    }

    async fn evict_lock(&self, id: EntityId) -> SyncResult<()> {
        self.locks.remove(&id);
        Ok(())
    }

    async fn holder(&self, id: EntityId) -> SyncResult<Option<OwnerId>> {
        Ok(read_live(&self.locks, id))
    }

    async fn fetch(&self, id: EntityId) -> SyncResult<Option<StateBlob>> {
        Ok(read_live(&self.data, id))
    }

    async fn store(&self, id: EntityId, blob: &str, ttl: Duration) -> SyncResult<()> {
        self.data.insert(id, Expiring::new(blob.to_string(), ttl));
        self.after_write();
        Ok(())
    }

    async fn evict_data(&self, id: EntityId) -> SyncResult<()> {
        self.data.remove(&id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TTL: Duration = Duration::from_secs(60);

    #[tokio::test]
    async fn test_claim_overwrites_holder() {
        let cache = InMemoryLeaseCache::new();
        let id = EntityId::now_v7();
        cache.claim(id, &OwnerId::from("a"), TTL).await.unwrap();
        cache.claim(id, &OwnerId::from("b"), TTL).await.unwrap();
        assert_eq!(cache.holder(id).await.unwrap(), Some(OwnerId::from("b")));
    }

    #[tokio::test]
    async fn test_release_only_by_holder() {
        let cache = InMemoryLeaseCache::new();
        let id = EntityId::now_v7();
        cache.claim(id, &OwnerId::from("a"), TTL).await.unwrap();
        assert!(!cache.release(id, &OwnerId::from("b")).await.unwrap());
        assert!(cache.release(id, &OwnerId::from("a")).await.unwrap());
        assert_eq!(cache.holder(id).await.unwrap(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_lock_is_dropped_on_read() {
        let cache = InMemoryLeaseCache::new();
        let id = EntityId::now_v7();
        cache
            .claim(id, &OwnerId::from("a"), Duration::from_secs(1))
            .await
            .unwrap();
        tokio::time::advance(Duration::from_millis(1_001)).await;
        assert_eq!(cache.holder(id).await.unwrap(), None);
        assert!(cache.locks.is_empty());
        assert!(!cache.release(id, &OwnerId::from("a")).await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_data_expires_and_is_removed() {
        let cache = InMemoryLeaseCache::new();
        let id = EntityId::now_v7();
        cache.store(id, "{\"health\":1.0}", Duration::from_secs(5)).await.unwrap();
        assert!(cache.fetch(id).await.unwrap().is_some());
        tokio::time::advance(Duration::from_secs(6)).await;
        assert!(cache.fetch(id).await.unwrap().is_none());
        assert!(cache.data.is_empty());
    }

    #[tokio::test]
    async fn test_evict_data() {
        let cache = InMemoryLeaseCache::new();
        let id = EntityId::now_v7();
        cache.store(id, "{}", TTL).await.unwrap();
        cache.evict_data(id).await.unwrap();
        assert!(cache.fetch(id).await.unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_writes_purge_unread_expired_entries() {
        let cache = InMemoryLeaseCache::new();
        for _ in 0..10 {
            cache
                .store(EntityId::now_v7(), "{}", Duration::from_secs(1))
                .await
                .unwrap();
        }
        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(cache.data.len(), 10);

        let keep = EntityId::now_v7();
        for _ in 0..PURGE_EVERY {
            cache.store(keep, "{}", TTL).await.unwrap();
        }
        assert_eq!(cache.data.len(), 1);
        assert_eq!(cache.purge_expired(), 0);
    }
}
