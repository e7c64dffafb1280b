//! Redis lease cache.
//!
//! Lock keys are written with `SET PX` once the record store has granted the
//! lease, and released with a compare-and-delete script, so a process can
//! never delete a lock key it does not hold.

use super::{CacheSettings, LeaseCache};
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use std::time::Duration;
use syncbridge_core::{EntityId, OwnerId, StateBlob, StorageError, SyncError, SyncResult};

const RELEASE_SCRIPT: &str = r#"
if redis.call("GET", KEYS[1]) == ARGV[1] then
    return redis.call("DEL", KEYS[1])
else
    return 0
end
"#;

/// Lease cache backed by a Redis-compatible server.
#[derive(Clone)]
pub struct RedisLeaseCache {
    conn: ConnectionManager,
    settings: CacheSettings,
    release_script: redis::Script,
}

impl RedisLeaseCache {
    /// Connect using `settings.url`.
    pub async fn connect(settings: CacheSettings) -> SyncResult<Self> {
        let client = redis::Client::open(settings.url.as_str()).map_err(cache_err)?;
        let conn = tokio::time::timeout(settings.timeout, ConnectionManager::new(client))
            .await
            .map_err(|_| StorageError::unavailable("timed out connecting to cache"))?
            .map_err(cache_err)?;
        tracing::info!(url = %settings.url, prefix = %settings.key_prefix, "Lease cache connected");
        Ok(Self {
            conn,
            settings,
            release_script: redis::Script::new(RELEASE_SCRIPT),
        })
    }

    async fn run<T, F>(&self, fut: F) -> SyncResult<T>
    where
        F: std::future::Future<Output = redis::RedisResult<T>>,
    {
        tokio::time::timeout(self.settings.timeout, fut)
            .await
            .map_err(|_| StorageError::unavailable("cache command timed out"))?
            .map_err(cache_err)
    }
}

fn cache_err(e: redis::RedisError) -> SyncError {
    StorageError::unavailable(format!("cache: {}", e)).into()
}

fn ttl_ms(ttl: Duration) -> u64 {
    u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1)
}

#[async_trait]
impl LeaseCache for RedisLeaseCache {
    async fn claim(&self, id: EntityId, owner: &OwnerId, ttl: Duration) -> SyncResult<()> {
        let mut conn = self.conn.clone();
        let key = self.settings.lock_key(id);
        let _: () = self
            .run(
                redis::cmd("SET")
                    .arg(&key)
                    .arg(owner.as_str())
                    .arg("PX")
                    .arg(ttl_ms(ttl))
                    .query_async(&mut conn),
            )
            .await?;
        Ok(())
    }

    async fn release(&self, id: EntityId, owner: &OwnerId) -> SyncResult<bool> {
        let mut conn = self.conn.clone();
        let key = self.settings.lock_key(id);
        let deleted: i64 = self
            .run(
                self.release_script
                    .key(&key)
                    .arg(owner.as_str())
                    .invoke_async(&mut conn),
            )
            .await?;
        Ok(deleted > 0)
    }

    async fn evict_lock(&self, id: EntityId) -> SyncResult<()> {
        let mut conn = self.conn.clone();
        let key = self.settings.lock_key(id);
        let _: i64 = self
            .run(redis::cmd("DEL").arg(&key).query_async(&mut conn))
            .await?;
        Ok(())
    }

    async fn holder(&self, id: EntityId) -> SyncResult<Option<OwnerId>> {
        let mut conn = self.conn.clone();
        let key = self.settings.lock_key(id);
        let owner: Option<String> = self
            .run(redis::cmd("GET").arg(&key).query_async(&mut conn))
            .await?;
        Ok(owner.map(OwnerId::from))
    }

    async fn fetch(&self, id: EntityId) -> SyncResult<Option<StateBlob>> {
        let mut conn = self.conn.clone();
        let key = self.settings.data_key(id);
        self.run(redis::cmd("GET").arg(&key).query_async(&mut conn))
            .await
    }

    async fn store(&self, id: EntityId, blob: &str, ttl: Duration) -> SyncResult<()> {
        let mut conn = self.conn.clone();
        let key = self.settings.data_key(id);
        let _: () = self
            .run(
                redis::cmd("SET")
                    .arg(&key)
                    .arg(blob)
                    .arg("PX")
                    .arg(ttl_ms(ttl))
                    .query_async(&mut conn),
            )
            .await?;
        Ok(())
    }

    async fn evict_data(&self, id: EntityId) -> SyncResult<()> {
        let mut conn = self.conn.clone();
        let key = self.settings.data_key(id);
        let _: i64 = self
            .run(redis::cmd("DEL").arg(&key).query_async(&mut conn))
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn redis_test_cache() -> Option<RedisLeaseCache> {
        if std::env::var("REDIS_TESTS").ok().as_deref() != Some("1") {
            return None;
        }
        let url = std::env::var("SYNCBRIDGE_CACHE_URL")
            .unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string());
        let settings = CacheSettings::default()
            .with_url(url)
            .with_key_prefix(format!("sbtest{}", std::process::id()));
        RedisLeaseCache::connect(settings).await.ok()
    }

    #[test]
    fn test_ttl_ms_never_zero() {
        assert_eq!(ttl_ms(Duration::ZERO), 1);
        assert_eq!(ttl_ms(Duration::from_secs(2)), 2_000);
    }

    #[tokio::test]
    async fn test_redis_lock_compare_and_delete() {
        let Some(cache) = redis_test_cache().await else {
            return;
        };
        let id = EntityId::now_v7();
        let a = OwnerId::from("a");
        let b = OwnerId::from("b");
        let ttl = Duration::from_secs(30);

        cache.claim(id, &a, ttl).await.unwrap();
        assert!(!cache.release(id, &b).await.unwrap());
        assert_eq!(cache.holder(id).await.unwrap(), Some(a.clone()));
        assert!(cache.release(id, &a).await.unwrap());
        assert_eq!(cache.holder(id).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_redis_data_round_trip() {
        let Some(cache) = redis_test_cache().await else {
            return;
        };
        let id = EntityId::now_v7();
        cache
            .store(id, r#"{"health":9.0}"#, Duration::from_secs(30))
            .await
            .unwrap();
        assert_eq!(
            cache.fetch(id).await.unwrap().as_deref(),
            Some(r#"{"health":9.0}"#)
        );
        cache.evict_data(id).await.unwrap();
        assert!(cache.fetch(id).await.unwrap().is_none());
    }
}
