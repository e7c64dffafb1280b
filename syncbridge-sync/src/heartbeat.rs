//! Per-entity lease heartbeats.
//!
//! One periodic task per active entity renews its lease. Each task checks the
//! entity's liveness before every renewal and exits on its own once the
//! entity is gone or the lease is lost, so a missed cancel cannot keep a
//! lease open. Explicit cancellation is idempotent.

use crate::lock_manager::LockManager;
use crate::metrics::SyncMetrics;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use syncbridge_core::{EntityId, LiveEntity};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

/// Shortest renewal period; `interval_at` rejects a zero period.
const MIN_PERIOD: Duration = Duration::from_millis(1);

#[derive(Debug)]
struct HeartbeatTask {
    generation: u64,
    handle: JoinHandle<()>,
}

/// Registry of running heartbeat tasks keyed by entity id.
#[derive(Debug, Default)]
pub struct HeartbeatRegistry {
    tasks: Arc<DashMap<EntityId, HeartbeatTask>>,
    generation: AtomicU64,
}

impl HeartbeatRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start renewing `entity`'s lease every `period`, replacing any existing heartbeat.
    pub fn start(
        &self,
        entity: Arc<dyn LiveEntity>,
        locks: Arc<LockManager>,
        period: Duration,
        metrics: Arc<SyncMetrics>,
    ) {
        let id = entity.id();
        if period < MIN_PERIOD {
            tracing::warn!(entity_id = %id, ?period, "Heartbeat period too short, clamping");
        }
        let period = period.max(MIN_PERIOD);
        let generation = self.generation.fetch_add(1, Ordering::Relaxed);
        let tasks = Arc::clone(&self.tasks);

        let handle = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                ticker.tick().await;

                if !entity.is_active() {
                    tracing::debug!(entity_id = %id, "Entity no longer active, stopping heartbeat");
                    break;
                }

                match locks.renew(id).await {
                    Ok(true) => SyncMetrics::incr(&metrics.renewals),
                    Ok(false) => break,
                    Err(e) => {
                        SyncMetrics::incr(&metrics.renewal_errors);
                        tracing::warn!(entity_id = %id, error = %e, "Heartbeat renewal failed");
                    }
                }
            }

            tasks.remove_if(&id, |_, task| task.generation == generation);
        });

        if let Some(previous) = self.tasks.insert(id, HeartbeatTask { generation, handle }) {
            previous.handle.abort();
        }
    }

    /// Stop the heartbeat for `id`. Returns false if none was running.
    pub fn cancel(&self, id: EntityId) -> bool {
        match self.tasks.remove(&id) {
            Some((_, task)) => {
                task.handle.abort();
                true
            }
            None => false,
        }
    }

    pub fn is_running(&self, id: EntityId) -> bool {
        self.tasks.contains_key(&id)
    }

    pub fn active_count(&self) -> usize {
        self.tasks.len()
    }

    /// Abort every heartbeat.
    pub fn cancel_all(&self) {
        self.tasks.retain(|_, task| {
            task.handle.abort();
            false
        });
    }
}

impl Drop for HeartbeatRegistry {
    fn drop(&mut self) {
        self.cancel_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use syncbridge_core::OwnerId;
    use syncbridge_storage::MemoryRecordStore;
    use syncbridge_test_utils::{new_entity_id, TestEntity};

    fn lock_manager() -> Arc<LockManager> {
        Arc::new(LockManager::new(
            Arc::new(MemoryRecordStore::new()),
            OwnerId::from("server-a"),
            Duration::from_secs(30),
        ))
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_period_is_clamped() {
        let registry = HeartbeatRegistry::new();
        let locks = lock_manager();
        let metrics = Arc::new(SyncMetrics::new());
        let entity = TestEntity::shared(new_entity_id());
        assert!(locks.acquire(entity.id()).await.unwrap());

        registry.start(entity.clone(), locks, Duration::ZERO, Arc::clone(&metrics));
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(metrics.snapshot().renewals > 0);
        assert_eq!(registry.active_count(), 1);

        entity.leave();
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert_eq!(registry.active_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_replaces_previous_task() {
        let registry = HeartbeatRegistry::new();
        let locks = lock_manager();
        let metrics = Arc::new(SyncMetrics::new());
        let entity = TestEntity::shared(new_entity_id());
        let period = Duration::from_millis(100);

        registry.start(entity.clone(), Arc::clone(&locks), period, Arc::clone(&metrics));
        registry.start(entity.clone(), locks, period, Arc::clone(&metrics));
        assert_eq!(registry.active_count(), 1);

        assert!(registry.cancel(entity.id()));
        assert!(!registry.cancel(entity.id()));
        assert_eq!(registry.active_count(), 0);
    }
}
