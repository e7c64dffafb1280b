//! syncbridge Storage - Record Store Trait and Implementations
//!
//! The record store is the only source of mutual exclusion between server
//! processes. Every lock operation is one conditional statement against one
//! row, so `save_and_release` can never interleave with `acquire` or `renew`.

pub mod cache;
pub mod hybrid;
pub mod memory;
pub mod postgres;

pub use cache::{
    CacheSettings, CacheStats, CacheStatsSnapshot, InMemoryLeaseCache, LeaseCache,
    RedisLeaseCache,
};
pub use hybrid::HybridStore;
pub use memory::MemoryRecordStore;
pub use postgres::{DbConfig, PgRecordStore};

use async_trait::async_trait;
use syncbridge_core::{EntityId, EpochMillis, OwnerId, Record, StateBlob, SyncResult};

// ============================================================================
// RECORD STORE TRAIT
// ============================================================================

/// Lock and data operations against the shared record table.
///
/// Methods take explicit timestamps so lease policy (ttl, clock) stays with
/// the caller. `stale_before` is the oldest lease timestamp still considered
/// live; anything older may be stolen.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Create or upgrade the record table. Idempotent.
    async fn init_schema(&self) -> SyncResult<()>;

    /// Claim `id` for `owner` if unlocked or stale, creating a locked
    /// placeholder row when the id has never been seen.
    ///
    /// Returns `false` when a live lease is held elsewhere or another process
    /// inserted the row first.
    async fn acquire(
        &self,
        id: EntityId,
        owner: &OwnerId,
        now: EpochMillis,
        stale_before: EpochMillis,
    ) -> SyncResult<bool>;

    async fn is_owner(&self, id: EntityId, owner: &OwnerId) -> SyncResult<bool>;

    /// Refresh the lease timestamp if `owner` still holds it.
    async fn renew(&self, id: EntityId, owner: &OwnerId, now: EpochMillis) -> SyncResult<bool>;

    /// Compare-and-clear the lock fields.
    async fn release(&self, id: EntityId, owner: &OwnerId) -> SyncResult<bool>;

    /// Clear the lock fields regardless of owner.
    async fn force_release(&self, id: EntityId) -> SyncResult<bool>;

    /// Write `blob` and clear the lock in one statement, gated on ownership.
    async fn save_and_release(
        &self,
        id: EntityId,
        owner: &OwnerId,
        blob: &str,
    ) -> SyncResult<bool>;

    /// Clear every lock held by `owner`. Returns the number of rows released.
    async fn sweep_orphans(&self, owner: &OwnerId) -> SyncResult<u64>;

    /// Stored blob for `id`, if the row exists and has data.
    async fn load(&self, id: EntityId) -> SyncResult<Option<StateBlob>>;

    /// Full row for inspection.
    async fn record(&self, id: EntityId) -> SyncResult<Option<Record>>;
}
