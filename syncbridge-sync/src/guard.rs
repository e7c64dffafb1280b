//! Process-local per-entity markers.
//!
//! The saving marker is held through an RAII [`SaveGuard`], so it is cleared
//! on every exit path including panics and task aborts. The handoff marker
//! is set when the routing tier triggers a save and consumed by the
//! disconnect that follows.

use dashmap::DashSet;
use std::sync::Arc;
use syncbridge_core::EntityId;

#[derive(Debug, Default)]
pub struct SyncGuards {
    saving: Arc<DashSet<EntityId>>,
    handed_off: DashSet<EntityId>,
}

impl SyncGuards {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enter the single-flight section for `id`. `None` if a save is already running.
    pub fn begin_save(&self, id: EntityId) -> Option<SaveGuard> {
        if self.saving.insert(id) {
            Some(SaveGuard {
                id,
                saving: Arc::clone(&self.saving),
            })
        } else {
            None
        }
    }

    pub fn is_saving(&self, id: EntityId) -> bool {
        self.saving.contains(&id)
    }

    /// Record that the routing tier already triggered deactivation.
    pub fn mark_handoff(&self, id: EntityId) -> bool {
        self.handed_off.insert(id)
    }

    /// Consume the handoff marker. True if it was set.
    pub fn take_handoff(&self, id: EntityId) -> bool {
        self.handed_off.remove(&id).is_some()
    }

    pub fn is_handed_off(&self, id: EntityId) -> bool {
        self.handed_off.contains(&id)
    }
}

/// Holds the saving marker for one entity until dropped.
#[derive(Debug)]
pub struct SaveGuard {
    id: EntityId,
    saving: Arc<DashSet<EntityId>>,
}

impl SaveGuard {
    pub fn id(&self) -> EntityId {
        self.id
    }
}

impl Drop for SaveGuard {
    fn drop(&mut self) {
        self.saving.remove(&self.id);
    }
}
