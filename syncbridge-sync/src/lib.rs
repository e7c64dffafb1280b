//! syncbridge Sync - Lease Manager and Orchestrator
//!
//! Wraps a [`RecordStore`](syncbridge_storage::RecordStore) with lease policy
//! and drives the per-entity lifecycle:
//! - Lease acquire, renew and release with a fixed owner id and ttl
//! - Periodic heartbeats that stop on their own once an entity leaves
//! - Two-phase activation (lock and decode, then apply)
//! - Deduplicated save-and-release on deactivation
//! - Handoff messages from the routing tier

pub mod guard;
pub mod heartbeat;
pub mod lock_manager;
pub mod metrics;
pub mod orchestrator;

pub use guard::{SaveGuard, SyncGuards};
pub use heartbeat::HeartbeatRegistry;
pub use lock_manager::LockManager;
pub use metrics::{SyncMetrics, SyncMetricsSnapshot};
pub use orchestrator::{
    Activated, ActivationDenied, Deactivation, DeactivationTrigger, Prepared, SaveOutcome,
    SyncOrchestrator, SyncPhase,
};
