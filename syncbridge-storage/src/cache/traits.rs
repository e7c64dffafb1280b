//! Lease cache capability trait.

use async_trait::async_trait;
use std::time::Duration;
use syncbridge_core::{EntityId, OwnerId, StateBlob, SyncResult};

/// TTL-bounded mirror of lease and data operations.
///
/// Implementations must be safe for concurrent use. Nothing in this trait is
/// authoritative: callers always have a record store path to fall back on.
#[async_trait]
pub trait LeaseCache: Send + Sync {
    /// Set the lock key unconditionally, refreshing its ttl.
    ///
    /// Only called after the record store granted or renewed the lease.
    async fn claim(&self, id: EntityId, owner: &OwnerId, ttl: Duration) -> SyncResult<()>;

    /// Delete the lock key only if it names `owner`.
    async fn release(&self, id: EntityId, owner: &OwnerId) -> SyncResult<bool>;

    /// Delete the lock key regardless of owner.
    async fn evict_lock(&self, id: EntityId) -> SyncResult<()>;

    /// Current lock holder, if any.
    async fn holder(&self, id: EntityId) -> SyncResult<Option<OwnerId>>;

    async fn fetch(&self, id: EntityId) -> SyncResult<Option<StateBlob>>;

    async fn store(&self, id: EntityId, blob: &str, ttl: Duration) -> SyncResult<()>;

    /// Delete the cached blob so the next load reads the record store.
    async fn evict_data(&self, id: EntityId) -> SyncResult<()>;
}
