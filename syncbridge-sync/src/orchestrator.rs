//! Per-entity synchronization lifecycle.
//!
//! # State Transition Diagram
//!
//! ```text
//! Unclaimed ── prepare_activation() ──→ Acquiring ── complete_activation() ──→ Active
//!                                           │                                    │
//!                                         denied                           deactivate()
//!                                           ↓                                    ↓
//!                                       Released ←──────── save task ─────── Saving
//! ```
//!
//! Activation is split in two. [`SyncOrchestrator::prepare_activation`] polls
//! for the lease and decodes stored state off the foreground path.
//! [`SyncOrchestrator::complete_activation`] runs on the context that owns the
//! live entity, applies the decoded state and starts the heartbeat.
//!
//! Deactivation snapshots live state synchronously, then encodes and saves
//! on a spawned task. Any encode or store failure falls back to a plain
//! release so a lease is never left dangling.

use crate::guard::{SaveGuard, SyncGuards};
use crate::heartbeat::HeartbeatRegistry;
use crate::lock_manager::LockManager;
use crate::metrics::{SyncMetrics, SyncMetricsSnapshot};
use dashmap::{DashMap, DashSet};
use std::fmt;
use std::sync::Arc;
use syncbridge_core::{
    ApplyReport, DenialReason, EntityId, ErrorCategory, HandoffAction, HandoffMessage,
    LeaseError, LiveEntity, RestoredState, Snapshot, StateCodec, SyncConfig, SyncError,
    SyncResult,
};
use syncbridge_storage::RecordStore;
use tokio::task::JoinHandle;

// ============================================================================
// PHASES AND OUTCOMES
// ============================================================================

/// Lifecycle phase of one entity on this process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SyncPhase {
    Unclaimed,
    Acquiring,
    Active,
    Saving,
    Released,
}

impl fmt::Display for SyncPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SyncPhase::Unclaimed => "unclaimed",
            SyncPhase::Acquiring => "acquiring",
            SyncPhase::Active => "active",
            SyncPhase::Saving => "saving",
            SyncPhase::Released => "released",
        };
        f.write_str(s)
    }
}

/// Result of the lock-and-load half of activation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Prepared {
    /// Lease held, stored state decoded and parked.
    Ready,
    /// This server is blacklisted. No lease, no sync.
    Bypassed,
}

/// Result of the apply half of activation.
#[derive(Debug, Clone, PartialEq)]
pub enum Activated {
    Synced(ApplyReport),
    /// Entity runs on local state only.
    LocalOnly,
}

/// Activation refused.
#[derive(Debug, Clone, PartialEq)]
pub struct ActivationDenied {
    pub reason: DenialReason,
    pub cause: SyncError,
}

impl fmt::Display for ActivationDenied {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.reason, self.cause)
    }
}

impl std::error::Error for ActivationDenied {}

/// What caused a deactivation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeactivationTrigger {
    /// Routing tier asked for save-and-release ahead of a transfer.
    Handoff,
    /// Normal disconnect or kick.
    Disconnect,
    /// Local process shutting down.
    Shutdown,
}

/// How a deactivation request was handled.
#[derive(Debug)]
pub enum Deactivation {
    /// Save running on a spawned task.
    Saving(JoinHandle<SaveOutcome>),
    /// Another save for the same entity is already running.
    AlreadySaving,
    /// A handoff already saved this entity.
    HandledByHandoff,
    /// Entity was never synced here.
    LocalOnly,
    /// Entity holds no active sync session. Any parked lease is released.
    NotSynced,
}

impl Deactivation {
    /// Wait for the save, if one was started.
    pub async fn finish(self) -> Option<SaveOutcome> {
        match self {
            Deactivation::Saving(handle) => handle.await.ok(),
            _ => None,
        }
    }
}

/// Final result of a save task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveOutcome {
    Saved,
    /// The lease moved before the save landed. Nothing written.
    LeaseLost,
    /// Save failed; the lease was released without writing data.
    ReleasedWithoutSave(ErrorCategory),
}

struct Pending {
    state: Option<RestoredState>,
}

// ============================================================================
// ORCHESTRATOR
// ============================================================================

/// Drives activation, heartbeat and deactivation for every entity on one process.
pub struct SyncOrchestrator {
    config: Arc<SyncConfig>,
    locks: Arc<LockManager>,
    codec: StateCodec,
    heartbeats: HeartbeatRegistry,
    guards: SyncGuards,
    metrics: Arc<SyncMetrics>,
    phases: Arc<DashMap<EntityId, SyncPhase>>,
    pending: DashMap<EntityId, Pending>,
    live: DashMap<EntityId, Arc<dyn LiveEntity>>,
    local_only: DashSet<EntityId>,
}

impl SyncOrchestrator {
    pub fn new(config: Arc<SyncConfig>, store: Arc<dyn RecordStore>) -> Self {
        let locks = LockManager::new(store, config.owner_id.clone(), config.lease_ttl);
        Self::with_lock_manager(config, Arc::new(locks))
    }

    pub fn with_lock_manager(config: Arc<SyncConfig>, locks: Arc<LockManager>) -> Self {
        Self {
            codec: StateCodec::new(config.toggles.clone()),
            config,
            locks,
            heartbeats: HeartbeatRegistry::new(),
            guards: SyncGuards::new(),
            metrics: Arc::new(SyncMetrics::new()),
            phases: Arc::new(DashMap::new()),
            pending: DashMap::new(),
            live: DashMap::new(),
            local_only: DashSet::new(),
        }
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn lock_manager(&self) -> &Arc<LockManager> {
        &self.locks
    }

    pub fn codec(&self) -> &StateCodec {
        &self.codec
    }

    pub fn metrics(&self) -> SyncMetricsSnapshot {
        self.metrics.snapshot()
    }

    pub fn phase(&self, id: EntityId) -> SyncPhase {
        self.phases
            .get(&id)
            .map(|p| *p)
            .unwrap_or(SyncPhase::Unclaimed)
    }

    pub fn heartbeat_running(&self, id: EntityId) -> bool {
        self.heartbeats.is_running(id)
    }

    pub fn is_local_only(&self, id: EntityId) -> bool {
        self.local_only.contains(&id)
    }

    fn set_phase(&self, id: EntityId, phase: SyncPhase) {
        self.phases.insert(id, phase);
    }

    fn server_blacklisted(&self) -> bool {
        self.config
            .blacklist
            .is_server_blacklisted(self.config.owner_id.as_str())
    }

    // ------------------------------------------------------------------------
    // STARTUP
    // ------------------------------------------------------------------------

    /// Release leases left by an unclean shutdown of this owner.
    pub async fn startup(&self) -> SyncResult<u64> {
        self.config.validate()?;
        if self.config.uses_default_owner() {
            tracing::warn!(
                owner = %self.config.owner_id,
                "Running with the default server id; every server sharing the record store must use a unique id"
            );
        }
        self.locks.sweep_orphans().await
    }

    // ------------------------------------------------------------------------
    // ACTIVATION
    // ------------------------------------------------------------------------

    /// Acquire the lease and decode stored state. Blocks for up to the
    /// configured poll ceiling; never call it from a latency-sensitive context.
    pub async fn prepare_activation(&self, id: EntityId) -> Result<Prepared, ActivationDenied> {
        if self.server_blacklisted() {
            self.local_only.insert(id);
            SyncMetrics::incr(&self.metrics.bypassed);
            tracing::debug!(entity_id = %id, "Server blacklisted, skipping sync");
            return Ok(Prepared::Bypassed);
        }

        self.local_only.remove(&id);
        self.guards.take_handoff(id);
        self.pending.remove(&id);
        self.set_phase(id, SyncPhase::Acquiring);

        if let Err(cause) = self.poll_lease(id).await {
            return Err(self.deny(id, cause));
        }

        let blob = match self.locks.load(id).await {
            Ok(blob) => blob,
            Err(cause) => {
                tracing::error!(entity_id = %id, error = %cause, "Failed to load stored state");
                self.locks.release(id).await;
                return Err(self.deny(id, cause));
            }
        };

        match self.codec.load(blob.as_deref()) {
            Ok(state) => {
                self.pending.insert(id, Pending { state });
                Ok(Prepared::Ready)
            }
            Err(e) => {
                let cause = SyncError::from(e);
                tracing::error!(entity_id = %id, error = %cause, "Stored state could not be decoded");
                self.locks.release(id).await;
                Err(self.deny(id, cause))
            }
        }
    }

    async fn poll_lease(&self, id: EntityId) -> SyncResult<()> {
        let attempts = self.config.acquire_attempts.max(1);
        let mut saw_contention = false;
        let mut last_error = None;

        for attempt in 1..=attempts {
            if self.guards.is_saving(id) {
                saw_contention = true;
                tracing::debug!(entity_id = %id, attempt, "Previous save still in flight, waiting");
                if attempt < attempts {
                    tokio::time::sleep(self.config.acquire_backoff).await;
                }
                continue;
            }
            match self.locks.acquire(id).await {
                Ok(true) => return Ok(()),
                Ok(false) => saw_contention = true,
                Err(e) => {
                    tracing::warn!(entity_id = %id, attempt, error = %e, "Lease acquire failed");
                    last_error = Some(e);
                }
            }
            if attempt < attempts {
                tokio::time::sleep(self.config.acquire_backoff).await;
            }
        }

        if self.guards.is_saving(id) {
            return Err(LeaseError::Contended { id }.into());
        }
        match self.locks.is_owner(id).await {
            Ok(true) => Ok(()),
            Ok(false) => match last_error {
                Some(e) if !saw_contention => Err(e),
                _ => Err(LeaseError::Contended { id }.into()),
            },
            Err(e) => Err(e),
        }
    }

    fn deny(&self, id: EntityId, cause: SyncError) -> ActivationDenied {
        let reason = DenialReason::for_error(&cause);
        self.deny_with(id, reason, cause)
    }

    fn deny_with(&self, id: EntityId, reason: DenialReason, cause: SyncError) -> ActivationDenied {
        self.set_phase(id, SyncPhase::Released);
        SyncMetrics::incr(&self.metrics.denials);
        if cause.category().is_expected() {
            tracing::debug!(entity_id = %id, reason = ?reason, "Activation denied");
        } else {
            tracing::error!(entity_id = %id, reason = ?reason, error = %cause, "Activation denied");
        }
        ActivationDenied { reason, cause }
    }

    /// Apply parked state to the live entity and start its heartbeat.
    /// Must run on the context that owns the entity.
    pub async fn complete_activation(
        &self,
        entity: Arc<dyn LiveEntity>,
    ) -> Result<Activated, ActivationDenied> {
        let id = entity.id();
        self.guards.take_handoff(id);

        if self.local_only.contains(&id) {
            return Ok(Activated::LocalOnly);
        }

        if let Some(region) = entity.region() {
            if self.config.blacklist.is_region_blacklisted(&region) {
                self.pending.remove(&id);
                self.locks.release(id).await;
                self.local_only.insert(id);
                self.set_phase(id, SyncPhase::Released);
                SyncMetrics::incr(&self.metrics.bypassed);
                tracing::debug!(entity_id = %id, region = %region, "Region blacklisted, running local only");
                return Ok(Activated::LocalOnly);
            }
        }

        let Some((_, pending)) = self.pending.remove(&id) else {
            let cause = SyncError::from(LeaseError::LeaseLost {
                id,
                owner: self.locks.owner().to_string(),
            });
            let denied = self.deny_with(id, DenialReason::ApplyFailed, cause);
            entity.deny(denied.reason);
            return Err(denied);
        };

        let report = match &pending.state {
            Some(state) => match self.codec.apply(state, entity.as_ref()) {
                Ok(report) => report,
                Err(e) => {
                    let cause = SyncError::from(e);
                    tracing::error!(entity_id = %id, error = %cause, "Failed to apply stored state");
                    self.locks.release(id).await;
                    let denied = self.deny_with(id, DenialReason::ApplyFailed, cause);
                    entity.deny(denied.reason);
                    return Err(denied);
                }
            },
            None => ApplyReport::default(),
        };

        if let Some(location) = pending.state.as_ref().and_then(|s| s.location.as_ref()) {
            tracing::debug!(entity_id = %id, world = %location.world, "Last known location");
        }

        self.live.insert(id, Arc::clone(&entity));
        self.heartbeats.start(
            entity,
            Arc::clone(&self.locks),
            self.config.heartbeat_interval,
            Arc::clone(&self.metrics),
        );
        self.set_phase(id, SyncPhase::Active);
        SyncMetrics::incr(&self.metrics.activations);
        tracing::debug!(entity_id = %id, groups = ?report.applied, "Entity activated");
        Ok(Activated::Synced(report))
    }

    // ------------------------------------------------------------------------
    // DEACTIVATION
    // ------------------------------------------------------------------------

    /// Save the entity's state and release its lease.
    ///
    /// The snapshot is taken before this returns; encoding and the store
    /// write run on a spawned task.
    pub fn deactivate(&self, entity: &dyn LiveEntity, trigger: DeactivationTrigger) -> Deactivation {
        let id = entity.id();

        if trigger != DeactivationTrigger::Handoff && self.guards.take_handoff(id) {
            self.live.remove(&id);
            SyncMetrics::incr(&self.metrics.deduplicated);
            tracing::debug!(entity_id = %id, "Already saved by handoff, skipping");
            return Deactivation::HandledByHandoff;
        }

        if self.local_only.remove(&id).is_some() {
            self.heartbeats.cancel(id);
            self.live.remove(&id);
            return Deactivation::LocalOnly;
        }

        self.heartbeats.cancel(id);

        match self.phase(id) {
            SyncPhase::Active | SyncPhase::Saving => {}
            SyncPhase::Acquiring => {
                self.pending.remove(&id);
                self.set_phase(id, SyncPhase::Released);
                let locks = Arc::clone(&self.locks);
                tokio::spawn(async move {
                    locks.release(id).await;
                });
                tracing::debug!(entity_id = %id, "Deactivated before activation completed, releasing lease");
                return Deactivation::NotSynced;
            }
            SyncPhase::Unclaimed | SyncPhase::Released => {
                self.live.remove(&id);
                if self.pending.remove(&id).is_some() {
                    let locks = Arc::clone(&self.locks);
                    tokio::spawn(async move {
                        locks.release(id).await;
                    });
                    tracing::debug!(entity_id = %id, "Releasing lease parked by an unfinished activation");
                }
                return Deactivation::NotSynced;
            }
        }

        let Some(guard) = self.guards.begin_save(id) else {
            SyncMetrics::incr(&self.metrics.deduplicated);
            tracing::debug!(entity_id = %id, ?trigger, "Save already in progress, dropping duplicate");
            return Deactivation::AlreadySaving;
        };

        self.live.remove(&id);
        self.pending.remove(&id);
        self.set_phase(id, SyncPhase::Saving);

        let snapshot = self.codec.capture(entity).map_err(SyncError::from);
        if let Err(e) = &snapshot {
            tracing::error!(entity_id = %id, error = %e, "Failed to snapshot entity, releasing without save");
        }

        let task = SaveTask {
            id,
            codec: self.codec.clone(),
            locks: Arc::clone(&self.locks),
            metrics: Arc::clone(&self.metrics),
            phases: Arc::clone(&self.phases),
            guard,
        };
        Deactivation::Saving(tokio::spawn(task.run(snapshot)))
    }

    /// Act on a message from the routing tier.
    pub fn handle_handoff(&self, message: HandoffMessage) -> Option<Deactivation> {
        match message.action {
            HandoffAction::DeactivateAndRelease => {
                let id = message.entity_id;
                let entity = self.live.get(&id).map(|e| Arc::clone(e.value()));
                let Some(entity) = entity else {
                    tracing::debug!(entity_id = %id, "Handoff for entity not active here, ignoring");
                    return None;
                };
                self.guards.mark_handoff(id);
                SyncMetrics::incr(&self.metrics.handoffs);
                Some(self.deactivate(entity.as_ref(), DeactivationTrigger::Handoff))
            }
        }
    }

    /// Decode a raw handoff payload and act on it. Malformed payloads are logged and dropped.
    pub fn handle_handoff_payload(&self, payload: &[u8]) -> Option<Deactivation> {
        match HandoffMessage::decode(payload) {
            Ok(message) => self.handle_handoff(message),
            Err(e) => {
                tracing::warn!(error = %e, len = payload.len(), "Dropping malformed handoff message");
                None
            }
        }
    }

    /// Save and release every active entity, waiting for all saves.
    pub async fn shutdown(&self) -> Vec<SaveOutcome> {
        let entities: Vec<Arc<dyn LiveEntity>> =
            self.live.iter().map(|e| Arc::clone(e.value())).collect();
        let mut outcomes = Vec::with_capacity(entities.len());
        for entity in entities {
            if let Some(outcome) = self
                .deactivate(entity.as_ref(), DeactivationTrigger::Shutdown)
                .finish()
                .await
            {
                outcomes.push(outcome);
            }
        }
        self.heartbeats.cancel_all();
        outcomes
    }

    /// Operator unlock.
    pub async fn force_release(&self, id: EntityId) -> SyncResult<bool> {
        self.locks.force_release(id).await
    }
}

// ============================================================================
// SAVE TASK
// ============================================================================

struct SaveTask {
    id: EntityId,
    codec: StateCodec,
    locks: Arc<LockManager>,
    metrics: Arc<SyncMetrics>,
    phases: Arc<DashMap<EntityId, SyncPhase>>,
    guard: SaveGuard,
}

impl SaveTask {
    async fn run(self, snapshot: SyncResult<Snapshot>) -> SaveOutcome {
        let id = self.id;
        let outcome = match snapshot.and_then(|s| self.codec.encode(&s).map_err(SyncError::from)) {
            Ok(blob) => match self.locks.save_and_release(id, &blob).await {
                Ok(true) => {
                    SyncMetrics::incr(&self.metrics.saves);
                    tracing::debug!(entity_id = %id, bytes = blob.len(), "Saved and released");
                    SaveOutcome::Saved
                }
                Ok(false) => {
                    SyncMetrics::incr(&self.metrics.lease_lost);
                    tracing::debug!(entity_id = %id, "Lease lost before save, nothing written");
                    SaveOutcome::LeaseLost
                }
                Err(e) => self.fall_back(e).await,
            },
            Err(e) => self.fall_back(e).await,
        };

        if let Some(mut phase) = self.phases.get_mut(&id) {
            if *phase == SyncPhase::Saving {
                *phase = SyncPhase::Released;
            }
        }
        drop(self.guard);
        outcome
    }

    async fn fall_back(&self, cause: SyncError) -> SaveOutcome {
        SyncMetrics::incr(&self.metrics.save_failures);
        tracing::error!(
            entity_id = %self.id,
            error = %cause,
            "Save failed, releasing lease without writing data"
        );
        if self.locks.release(self.id).await {
            SyncMetrics::incr(&self.metrics.fallback_releases);
        }
        SaveOutcome::ReleasedWithoutSave(cause.category())
    }
}
