//! Lease policy over a [`RecordStore`].
//!
//! The lock manager owns the ttl and the clock. Stores only ever see concrete
//! timestamps. Renew and release failures are expected under crash or
//! timeout and are logged at debug; they never surface as errors to callers.

use std::sync::Arc;
use std::time::Duration;
use syncbridge_core::{
    Clock, EntityId, LeaseError, OwnerId, StateBlob, SyncResult, SystemClock,
};
use syncbridge_storage::RecordStore;

/// Acquire, renew and release leases on behalf of one owner.
pub struct LockManager {
    store: Arc<dyn RecordStore>,
    owner: OwnerId,
    lease_ttl: Duration,
    clock: Arc<dyn Clock>,
}

impl LockManager {
    pub fn new(store: Arc<dyn RecordStore>, owner: OwnerId, lease_ttl: Duration) -> Self {
        Self {
            store,
            owner,
            lease_ttl,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn owner(&self) -> &OwnerId {
        &self.owner
    }

    pub fn lease_ttl(&self) -> Duration {
        self.lease_ttl
    }

    pub fn store(&self) -> &Arc<dyn RecordStore> {
        &self.store
    }

    /// Try once to take the lease.
    ///
    /// `Ok(false)` is contention. `Err` means the store could not be reached.
    pub async fn acquire(&self, id: EntityId) -> SyncResult<bool> {
        let now = self.clock.now_millis();
        let stale_before = syncbridge_core::Lease::stale_before(now, self.lease_ttl);
        let acquired = self
            .store
            .acquire(id, &self.owner, now, stale_before)
            .await?;
        if !acquired {
            tracing::debug!(entity_id = %id, owner = %self.owner, "Lease held elsewhere");
        }
        Ok(acquired)
    }

    /// Like [`acquire`](Self::acquire), but contention is an error.
    pub async fn try_claim(&self, id: EntityId) -> SyncResult<()> {
        if self.acquire(id).await? {
            Ok(())
        } else {
            Err(LeaseError::Contended { id }.into())
        }
    }

    pub async fn is_owner(&self, id: EntityId) -> SyncResult<bool> {
        self.store.is_owner(id, &self.owner).await
    }

    /// Refresh the lease. `Ok(false)` means ownership was lost.
    pub async fn renew(&self, id: EntityId) -> SyncResult<bool> {
        let renewed = self
            .store
            .renew(id, &self.owner, self.clock.now_millis())
            .await?;
        if !renewed {
            tracing::debug!(entity_id = %id, owner = %self.owner, "Renew skipped, lease no longer held");
        }
        Ok(renewed)
    }

    /// Compare-and-clear. Never fails; returns whether the clear took effect.
    pub async fn release(&self, id: EntityId) -> bool {
        match self.store.release(id, &self.owner).await {
            Ok(true) => true,
            Ok(false) => {
                tracing::debug!(entity_id = %id, owner = %self.owner, "Release skipped, lease no longer held");
                false
            }
            Err(e) => {
                tracing::error!(entity_id = %id, owner = %self.owner, error = %e, "Failed to release lease");
                false
            }
        }
    }

    /// Operator override. Clears the lock whoever holds it.
    pub async fn force_release(&self, id: EntityId) -> SyncResult<bool> {
        let released = self.store.force_release(id).await?;
        tracing::info!(entity_id = %id, released, "Force released lease");
        Ok(released)
    }

    /// Write `blob` and release in one step. `Ok(false)` means the lease was lost first.
    pub async fn save_and_release(&self, id: EntityId, blob: &str) -> SyncResult<bool> {
        self.store.save_and_release(id, &self.owner, blob).await
    }

    /// Release every lease left behind by a previous run of this owner.
    pub async fn sweep_orphans(&self) -> SyncResult<u64> {
        let released = self.store.sweep_orphans(&self.owner).await?;
        tracing::info!(owner = %self.owner, released, "Released orphaned leases");
        Ok(released)
    }

    pub async fn load(&self, id: EntityId) -> SyncResult<Option<StateBlob>> {
        self.store.load(id).await
    }
}
