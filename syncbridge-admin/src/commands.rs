//! Operator commands against the shared record store.

use crate::{AdminError, AdminResult};
use serde::Serialize;
use std::sync::Arc;
use syncbridge_core::{EntityId, FieldGroup, OwnerId, Record, StateCodec, SyncConfig};
use syncbridge_storage::{
    CacheSettings, DbConfig, HybridStore, LeaseCache, PgRecordStore, RecordStore,
    RedisLeaseCache,
};
use syncbridge_sync::LockManager;

// ============================================================================
// ENVIRONMENT
// ============================================================================

/// Everything the admin binary reads from the environment.
#[derive(Debug, Clone)]
pub struct Environment {
    pub sync: SyncConfig,
    pub db: DbConfig,
    pub cache: CacheSettings,
}

impl Environment {
    pub fn from_env() -> AdminResult<Self> {
        let sync = SyncConfig::from_env();
        sync.validate()?;
        Ok(Self {
            sync,
            db: DbConfig::from_env(),
            cache: CacheSettings::from_env(),
        })
    }

    /// Connect to the lease cache when it is enabled.
    pub async fn open_cache(&self) -> AdminResult<Option<Arc<dyn LeaseCache>>> {
        if !self.cache.enabled {
            return Ok(None);
        }
        let cache = RedisLeaseCache::connect(self.cache.clone()).await?;
        tracing::info!(url = %self.cache.url, "Lease cache enabled");
        Ok(Some(Arc::new(cache)))
    }

    /// Open the configured record store, fronted by `cache` when present.
    pub fn open_store_with(
        &self,
        cache: Option<Arc<dyn LeaseCache>>,
    ) -> AdminResult<Arc<dyn RecordStore>> {
        let primary: Arc<dyn RecordStore> =
            Arc::new(PgRecordStore::from_config(&self.db, self.sync.table_name())?);
        Ok(match cache {
            Some(cache) => Arc::new(HybridStore::new(
                primary,
                cache,
                self.sync.lease_ttl,
                self.cache.data_ttl,
            )),
            None => primary,
        })
    }

    pub async fn open_store(&self) -> AdminResult<Arc<dyn RecordStore>> {
        let cache = self.open_cache().await?;
        self.open_store_with(cache)
    }

    pub fn lock_manager(&self, store: Arc<dyn RecordStore>, owner: Option<&str>) -> LockManager {
        let owner = owner
            .map(OwnerId::from)
            .unwrap_or_else(|| self.sync.owner_id.clone());
        LockManager::new(store, owner, self.sync.lease_ttl)
    }
}

pub fn parse_entity_id(value: &str) -> AdminResult<EntityId> {
    value
        .parse::<EntityId>()
        .map_err(|e| AdminError::InvalidEntityId {
            value: value.to_string(),
            reason: e.to_string(),
        })
}

// ============================================================================
// COMMANDS
// ============================================================================

/// Create or upgrade the record table.
pub async fn init_schema(store: &dyn RecordStore) -> AdminResult<()> {
    store.init_schema().await?;
    tracing::info!("Record table ready");
    Ok(())
}

/// Release every lease still held by `locks`' owner.
pub async fn sweep(locks: &LockManager) -> AdminResult<u64> {
    Ok(locks.sweep_orphans().await?)
}

/// Clear the lease on `id` regardless of holder.
pub async fn unlock(locks: &LockManager, id: EntityId) -> AdminResult<bool> {
    Ok(locks.force_release(id).await?)
}

/// What `inspect` prints for one record.
#[derive(Debug, Clone, Serialize)]
pub struct RecordReport {
    pub record: Record,
    pub blob_bytes: usize,
    pub format_version: Option<u32>,
    pub groups: Vec<FieldGroup>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decode_error: Option<String>,
    /// Lock key holder in the lease cache, when a cache is configured.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_holder: Option<OwnerId>,
}

/// Describe the stored row for `id`, including which field groups its blob
/// carries and who the lease cache thinks holds it.
pub async fn inspect(
    store: &dyn RecordStore,
    cache: Option<&dyn LeaseCache>,
    id: EntityId,
) -> AdminResult<Option<RecordReport>> {
    let Some(record) = store.record(id).await? else {
        return Ok(None);
    };

    let cache_holder = match cache {
        Some(cache) => match cache.holder(id).await {
            Ok(holder) => holder,
            Err(e) => {
                tracing::warn!(entity_id = %id, error = %e, "Lease cache lookup failed");
                None
            }
        },
        None => None,
    };

    let codec = StateCodec::default();
    let blob = record.data.as_deref().unwrap_or_default();
    let (format_version, groups, decode_error) = match codec.decode(blob) {
        Ok(Some(snap)) => (Some(snap.format_version()), snap.groups(), None),
        Ok(None) => (None, Vec::new(), None),
        Err(e) => (None, Vec::new(), Some(e.to_string())),
    };

    Ok(Some(RecordReport {
        blob_bytes: blob.len(),
        record,
        format_version,
        groups,
        decode_error,
        cache_holder,
    }))
}
