//! In-memory record store.
//!
//! Mirrors the conditional-update semantics of the SQL store under a single
//! write lock, so each operation is atomic against every other. Used by tests
//! and single-process deployments.

use crate::RecordStore;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use syncbridge_core::{
    EntityId, EpochMillis, OwnerId, Record, StateBlob, StorageError, SyncResult,
};

/// Record store backed by a process-local map.
#[derive(Debug, Clone, Default)]
pub struct MemoryRecordStore {
    records: Arc<RwLock<HashMap<EntityId, Record>>>,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> SyncResult<RwLockReadGuard<'_, HashMap<EntityId, Record>>> {
        self.records
            .read()
            .map_err(|_| StorageError::LockPoisoned.into())
    }

    fn write(&self) -> SyncResult<RwLockWriteGuard<'_, HashMap<EntityId, Record>>> {
        self.records
            .write()
            .map_err(|_| StorageError::LockPoisoned.into())
    }

    /// Insert or replace a row directly, bypassing lock checks.
    pub fn put_record(&self, record: Record) -> SyncResult<()> {
        self.write()?.insert(record.id, record);
        Ok(())
    }

    pub fn record_count(&self) -> usize {
        self.records.read().map(|r| r.len()).unwrap_or(0)
    }
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn init_schema(&self) -> SyncResult<()> {
        Ok(())
    }

    async fn acquire(
        &self,
        id: EntityId,
        owner: &OwnerId,
        now: EpochMillis,
        stale_before: EpochMillis,
    ) -> SyncResult<bool> {
        let mut records = self.write()?;
        match records.get_mut(&id) {
            Some(record) if record.is_claimable(stale_before) => {
                record.lock(owner.clone(), now);
                Ok(true)
            }
            Some(_) => Ok(false),
            None => {
                records.insert(id, Record::placeholder(id, owner.clone(), now));
                Ok(true)
            }
        }
    }

    async fn is_owner(&self, id: EntityId, owner: &OwnerId) -> SyncResult<bool> {
        Ok(self
            .read()?
            .get(&id)
            .is_some_and(|r| r.is_locked && r.is_held_by(owner)))
    }

    async fn renew(&self, id: EntityId, owner: &OwnerId, now: EpochMillis) -> SyncResult<bool> {
        let mut records = self.write()?;
        match records.get_mut(&id) {
            Some(record) if record.is_locked && record.is_held_by(owner) => {
                record.lease_timestamp = Some(now);
                record.touch();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn release(&self, id: EntityId, owner: &OwnerId) -> SyncResult<bool> {
        let mut records = self.write()?;
        match records.get_mut(&id) {
            Some(record) if record.is_held_by(owner) => {
                record.clear_lock();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn force_release(&self, id: EntityId) -> SyncResult<bool> {
        let mut records = self.write()?;
        match records.get_mut(&id) {
            Some(record) => {
                record.clear_lock();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn save_and_release(
        &self,
        id: EntityId,
        owner: &OwnerId,
        blob: &str,
    ) -> SyncResult<bool> {
        let mut records = self.write()?;
        match records.get_mut(&id) {
            Some(record) if record.is_locked && record.is_held_by(owner) => {
                record.data = Some(blob.to_string());
                record.clear_lock();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn sweep_orphans(&self, owner: &OwnerId) -> SyncResult<u64> {
        let mut records = self.write()?;
        let mut released = 0;
        for record in records.values_mut().filter(|r| r.is_held_by(owner)) {
            record.clear_lock();
            released += 1;
        }
        Ok(released)
    }

    async fn load(&self, id: EntityId) -> SyncResult<Option<StateBlob>> {
        Ok(self.read()?.get(&id).and_then(|r| r.data.clone()))
    }

    async fn record(&self, id: EntityId) -> SyncResult<Option<Record>> {
        Ok(self.read()?.get(&id).cloned())
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn owner(name: &str) -> OwnerId {
        OwnerId::from(name)
    }

    #[tokio::test]
    async fn test_first_acquire_creates_locked_placeholder() {
        let store = MemoryRecordStore::new();
        let id = EntityId::now_v7();
        assert!(store.acquire(id, &owner("a"), 100, 0).await.unwrap());

        let rec = store.record(id).await.unwrap().unwrap();
        assert!(rec.is_locked);
        assert!(rec.data.is_none());
        assert_eq!(rec.locking_owner, Some(owner("a")));
        assert_eq!(rec.lease_timestamp, Some(100));
        assert_eq!(store.record_count(), 1);
    }

    #[tokio::test]
    async fn test_live_lease_blocks_other_owner() {
        let store = MemoryRecordStore::new();
        let id = EntityId::now_v7();
        assert!(store.acquire(id, &owner("a"), 100, 0).await.unwrap());
        assert!(!store.acquire(id, &owner("b"), 200, 50).await.unwrap());
        assert!(store.is_owner(id, &owner("a")).await.unwrap());
        assert!(!store.is_owner(id, &owner("b")).await.unwrap());
    }

    #[tokio::test]
    async fn test_stale_lease_can_be_stolen() {
        let store = MemoryRecordStore::new();
        let id = EntityId::now_v7();
        store.acquire(id, &owner("a"), 100, 0).await.unwrap();
        assert!(store.acquire(id, &owner("b"), 70_000, 101).await.unwrap());
        assert!(store.is_owner(id, &owner("b")).await.unwrap());
    }

    #[tokio::test]
    async fn test_renew_only_by_owner() {
        let store = MemoryRecordStore::new();
        let id = EntityId::now_v7();
        store.acquire(id, &owner("a"), 100, 0).await.unwrap();
        assert!(!store.renew(id, &owner("b"), 500).await.unwrap());
        assert!(store.renew(id, &owner("a"), 500).await.unwrap());
        let rec = store.record(id).await.unwrap().unwrap();
        assert_eq!(rec.lease_timestamp, Some(500));
    }

    #[tokio::test]
    async fn test_renew_does_not_revive_released_lock() {
        let store = MemoryRecordStore::new();
        let id = EntityId::now_v7();
        store.acquire(id, &owner("a"), 100, 0).await.unwrap();
        store.release(id, &owner("a")).await.unwrap();
        assert!(!store.renew(id, &owner("a"), 500).await.unwrap());
        assert!(!store.record(id).await.unwrap().unwrap().is_locked);
    }

    #[tokio::test]
    async fn test_release_is_compare_and_clear() {
        let store = MemoryRecordStore::new();
        let id = EntityId::now_v7();
        store.acquire(id, &owner("a"), 100, 0).await.unwrap();
        store.acquire(id, &owner("b"), 70_000, 101).await.unwrap();

        assert!(!store.release(id, &owner("a")).await.unwrap());
        let rec = store.record(id).await.unwrap().unwrap();
        assert_eq!(rec.locking_owner, Some(owner("b")));
        assert_eq!(rec.lease_timestamp, Some(70_000));
    }

    #[tokio::test]
    async fn test_save_and_release_requires_ownership() {
        let store = MemoryRecordStore::new();
        let id = EntityId::now_v7();
        store.acquire(id, &owner("a"), 100, 0).await.unwrap();
        assert!(!store.save_and_release(id, &owner("b"), "{}").await.unwrap());
        assert!(store
            .save_and_release(id, &owner("a"), r#"{"health":3.0}"#)
            .await
            .unwrap());
        let rec = store.record(id).await.unwrap().unwrap();
        assert!(rec.lock_fields_consistent());
        assert!(!rec.is_locked);
        assert_eq!(rec.data.as_deref(), Some(r#"{"health":3.0}"#));
    }

    #[tokio::test]
    async fn test_force_release_ignores_owner() {
        let store = MemoryRecordStore::new();
        let id = EntityId::now_v7();
        store.acquire(id, &owner("a"), 100, 0).await.unwrap();
        assert!(store.force_release(id).await.unwrap());
        assert!(store.acquire(id, &owner("b"), 101, 0).await.unwrap());
        assert!(!store.force_release(EntityId::now_v7()).await.unwrap());
        assert_eq!(store.record_count(), 1);
    }

    #[tokio::test]
    async fn test_sweep_orphans_scoped_to_owner() {
        let store = MemoryRecordStore::new();
        let mine = [EntityId::now_v7(), EntityId::now_v7()];
        let theirs = EntityId::now_v7();
        for id in mine {
            store.acquire(id, &owner("a"), 100, 0).await.unwrap();
        }
        store.acquire(theirs, &owner("b"), 100, 0).await.unwrap();

        assert_eq!(store.sweep_orphans(&owner("a")).await.unwrap(), 2);
        assert!(store.is_owner(theirs, &owner("b")).await.unwrap());
        for id in mine {
            assert!(!store.record(id).await.unwrap().unwrap().is_locked);
        }
    }
}
