//! syncbridge Test Utilities
//!
//! Shared test infrastructure for the syncbridge workspace:
//! - [`TestEntity`], an in-memory live entity
//! - [`RecordingStore`], a record store wrapper that counts calls and injects failures
//! - Proptest generators for items, effects and whole entity states

pub use syncbridge_core::{
    AdvancementState, DenialReason, EffectKind, EntityId, ExperienceState, FeatureToggles,
    FieldGroup, FoodState, ItemStack, Location, OwnerId, StatusEffect, SyncConfig,
};
pub use syncbridge_storage::MemoryRecordStore;

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use syncbridge_core::{
    CodecError, EntityResult, EpochMillis, LiveEntity, Record, StateBlob, StorageError,
    SyncResult,
};
use syncbridge_storage::RecordStore;
use tokio::time::Instant;

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// ============================================================================
// TEST ENTITY
// ============================================================================

pub const BASE_MAX_HEALTH: f64 = 20.0;
pub const INVENTORY_SIZE: usize = 41;
pub const ARMOR_SIZE: usize = 4;
pub const ENDER_CHEST_SIZE: usize = 27;

/// Full synchronized state of a [`TestEntity`].
#[derive(Debug, Clone, PartialEq)]
pub struct EntityState {
    pub health: f64,
    pub food: FoodState,
    pub experience: ExperienceState,
    pub inventory: Vec<Option<ItemStack>>,
    pub armor: Vec<Option<ItemStack>>,
    pub ender_chest: Vec<Option<ItemStack>>,
    pub effects: Vec<StatusEffect>,
    pub advancements: AdvancementState,
    pub location: Location,
}

impl Default for EntityState {
    fn default() -> Self {
        Self {
            health: BASE_MAX_HEALTH,
            food: FoodState {
                food_level: 20,
                saturation: 5.0,
                exhaustion: 0.0,
            },
            experience: ExperienceState::default(),
            inventory: vec![None; INVENTORY_SIZE],
            armor: vec![None; ARMOR_SIZE],
            ender_chest: vec![None; ENDER_CHEST_SIZE],
            effects: Vec::new(),
            advancements: AdvancementState::default(),
            location: Location {
                world: "world".to_string(),
                ..Default::default()
            },
        }
    }
}

impl EntityState {
    /// Max health as the platform computes it. Health boost adds four per level.
    pub fn max_health(&self) -> f64 {
        let boost: i32 = self
            .effects
            .iter()
            .filter(|e| e.kind.raises_max_health())
            .map(|e| 4 * (e.amplifier + 1))
            .sum();
        BASE_MAX_HEALTH + f64::from(boost)
    }
}

/// In-memory [`LiveEntity`].
///
/// Setters replace state wholesale except advancements, which merge like the
/// real platform's award call.
#[derive(Debug)]
pub struct TestEntity {
    id: EntityId,
    state: Mutex<EntityState>,
    region: Mutex<Option<String>>,
    active: AtomicBool,
    unavailable: AtomicBool,
    denials: Mutex<Vec<DenialReason>>,
}

impl TestEntity {
    pub fn new(id: EntityId) -> Self {
        Self::with_state(id, EntityState::default())
    }

    pub fn with_state(id: EntityId, state: EntityState) -> Self {
        let region = Some(state.location.world.clone());
        Self {
            id,
            state: Mutex::new(state),
            region: Mutex::new(region),
            active: AtomicBool::new(true),
            unavailable: AtomicBool::new(false),
            denials: Mutex::new(Vec::new()),
        }
    }

    pub fn shared(id: EntityId) -> Arc<Self> {
        Arc::new(Self::new(id))
    }

    pub fn state(&self) -> EntityState {
        lock(&self.state).clone()
    }

    pub fn update(&self, f: impl FnOnce(&mut EntityState)) {
        f(&mut lock(&self.state));
    }

    pub fn set_region(&self, region: Option<&str>) {
        *lock(&self.region) = region.map(str::to_string);
    }

    /// Mark the entity as gone from this process.
    pub fn leave(&self) {
        self.active.store(false, Ordering::SeqCst);
    }

    /// Make every state read fail, as if the entity were torn down mid-capture.
    pub fn make_unavailable(&self) {
        self.unavailable.store(true, Ordering::SeqCst);
    }

    pub fn denials(&self) -> Vec<DenialReason> {
        lock(&self.denials).clone()
    }

    fn read<T>(&self, f: impl FnOnce(&EntityState) -> T) -> EntityResult<T> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(CodecError::EntityUnavailable {
                reason: format!("entity {} torn down", self.id),
            });
        }
        Ok(f(&lock(&self.state)))
    }

    fn write(&self, f: impl FnOnce(&mut EntityState)) -> EntityResult<()> {
        f(&mut lock(&self.state));
        Ok(())
    }
}

impl LiveEntity for TestEntity {
    fn id(&self) -> EntityId {
        self.id
    }

    fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    fn region(&self) -> Option<String> {
        lock(&self.region).clone()
    }

    fn health(&self) -> EntityResult<f64> {
        self.read(|s| s.health)
    }

    fn max_health(&self) -> EntityResult<f64> {
        self.read(EntityState::max_health)
    }

    fn set_health(&self, health: f64) -> EntityResult<()> {
        self.write(|s| s.health = health)
    }

    fn food(&self) -> EntityResult<FoodState> {
        self.read(|s| s.food)
    }

    fn set_food(&self, food: FoodState) -> EntityResult<()> {
        self.write(|s| s.food = food)
    }

    fn experience(&self) -> EntityResult<ExperienceState> {
        self.read(|s| s.experience)
    }

    fn set_experience(&self, experience: ExperienceState) -> EntityResult<()> {
        self.write(|s| s.experience = experience)
    }

    fn inventory(&self) -> EntityResult<Vec<Option<ItemStack>>> {
        self.read(|s| s.inventory.clone())
    }

    fn set_inventory(&self, items: Vec<Option<ItemStack>>) -> EntityResult<()> {
        self.write(|s| s.inventory = items)
    }

    fn armor(&self) -> EntityResult<Vec<Option<ItemStack>>> {
        self.read(|s| s.armor.clone())
    }

    fn set_armor(&self, items: Vec<Option<ItemStack>>) -> EntityResult<()> {
        self.write(|s| s.armor = items)
    }

    fn ender_chest(&self) -> EntityResult<Vec<Option<ItemStack>>> {
        self.read(|s| s.ender_chest.clone())
    }

    fn set_ender_chest(&self, items: Vec<Option<ItemStack>>) -> EntityResult<()> {
        self.write(|s| s.ender_chest = items)
    }

    fn effects(&self) -> EntityResult<Vec<StatusEffect>> {
        self.read(|s| s.effects.clone())
    }

    fn clear_effects(&self) -> EntityResult<()> {
        self.write(|s| s.effects.clear())
    }

    fn add_effect(&self, effect: &StatusEffect) -> EntityResult<()> {
        self.write(|s| {
            s.effects.retain(|e| e.kind != effect.kind);
            s.effects.push(effect.clone());
        })
    }

    fn advancements(&self) -> EntityResult<AdvancementState> {
        self.read(|s| s.advancements.clone())
    }

    fn grant_advancements(&self, granted: &AdvancementState) -> EntityResult<()> {
        self.write(|s| {
            for recipe in &granted.discovered_recipes {
                if !s.advancements.discovered_recipes.contains(recipe) {
                    s.advancements.discovered_recipes.push(recipe.clone());
                }
            }
            for (key, criteria) in &granted.advancements {
                let held = s.advancements.advancements.entry(key.clone()).or_default();
                for c in criteria {
                    if !held.contains(c) {
                        held.push(c.clone());
                    }
                }
            }
        })
    }

    fn location(&self) -> EntityResult<Location> {
        self.read(|s| s.location.clone())
    }

    fn deny(&self, reason: DenialReason) {
        lock(&self.denials).push(reason);
        self.active.store(false, Ordering::SeqCst);
    }
}

// ============================================================================
// RECORDING STORE
// ============================================================================

/// Record store operations, for call counting and failure injection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreOp {
    InitSchema,
    Acquire,
    IsOwner,
    Renew,
    Release,
    ForceRelease,
    SaveAndRelease,
    SweepOrphans,
    Load,
    Record,
}

/// Wraps a [`RecordStore`], counting calls and optionally failing chosen operations.
pub struct RecordingStore {
    inner: Arc<dyn RecordStore>,
    calls: Mutex<HashMap<StoreOp, usize>>,
    renewals: Mutex<Vec<Instant>>,
    failing: Mutex<HashSet<StoreOp>>,
    save_delay: Mutex<Option<Duration>>,
}

impl RecordingStore {
    pub fn new(inner: Arc<dyn RecordStore>) -> Self {
        Self {
            inner,
            calls: Mutex::new(HashMap::new()),
            renewals: Mutex::new(Vec::new()),
            failing: Mutex::new(HashSet::new()),
            save_delay: Mutex::new(None),
        }
    }

    /// Recording wrapper over a fresh in-memory store.
    pub fn in_memory() -> Arc<Self> {
        Arc::new(Self::new(Arc::new(MemoryRecordStore::new())))
    }

    pub fn inner(&self) -> &Arc<dyn RecordStore> {
        &self.inner
    }

    pub fn calls(&self, op: StoreOp) -> usize {
        lock(&self.calls).get(&op).copied().unwrap_or(0)
    }

    /// When each `renew` call arrived.
    pub fn renewal_times(&self) -> Vec<Instant> {
        lock(&self.renewals).clone()
    }

    pub fn fail(&self, op: StoreOp) {
        lock(&self.failing).insert(op);
    }

    pub fn recover(&self, op: StoreOp) {
        lock(&self.failing).remove(&op);
    }

    /// Delay every `save_and_release` before it reaches the inner store.
    pub fn delay_saves(&self, delay: Duration) {
        *lock(&self.save_delay) = Some(delay);
    }

    fn enter(&self, op: StoreOp) -> SyncResult<()> {
        *lock(&self.calls).entry(op).or_insert(0) += 1;
        if op == StoreOp::Renew {
            lock(&self.renewals).push(Instant::now());
        }
        if lock(&self.failing).contains(&op) {
            return Err(StorageError::unavailable(format!("injected failure on {:?}", op)).into());
        }
        Ok(())
    }
}

#[async_trait]
impl RecordStore for RecordingStore {
    async fn init_schema(&self) -> SyncResult<()> {
        self.enter(StoreOp::InitSchema)?;
        self.inner.init_schema().await
    }

    async fn acquire(
        &self,
        id: EntityId,
        owner: &OwnerId,
        now: EpochMillis,
        stale_before: EpochMillis,
    ) -> SyncResult<bool> {
        self.enter(StoreOp::Acquire)?;
        self.inner.acquire(id, owner, now, stale_before).await
    }

    async fn is_owner(&self, id: EntityId, owner: &OwnerId) -> SyncResult<bool> {
        self.enter(StoreOp::IsOwner)?;
        self.inner.is_owner(id, owner).await
    }

    async fn renew(&self, id: EntityId, owner: &OwnerId, now: EpochMillis) -> SyncResult<bool> {
        self.enter(StoreOp::Renew)?;
        self.inner.renew(id, owner, now).await
    }

    async fn release(&self, id: EntityId, owner: &OwnerId) -> SyncResult<bool> {
        self.enter(StoreOp::Release)?;
        self.inner.release(id, owner).await
    }

    async fn force_release(&self, id: EntityId) -> SyncResult<bool> {
        self.enter(StoreOp::ForceRelease)?;
        self.inner.force_release(id).await
    }

    async fn save_and_release(&self, id: EntityId, owner: &OwnerId, blob: &str) -> SyncResult<bool> {
        self.enter(StoreOp::SaveAndRelease)?;
        let delay = *lock(&self.save_delay);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.inner.save_and_release(id, owner, blob).await
    }

    async fn sweep_orphans(&self, owner: &OwnerId) -> SyncResult<u64> {
        self.enter(StoreOp::SweepOrphans)?;
        self.inner.sweep_orphans(owner).await
    }

    async fn load(&self, id: EntityId) -> SyncResult<Option<StateBlob>> {
        self.enter(StoreOp::Load)?;
        self.inner.load(id).await
    }

    async fn record(&self, id: EntityId) -> SyncResult<Option<Record>> {
        self.enter(StoreOp::Record)?;
        self.inner.record(id).await
    }
}

// ============================================================================
// FIXTURES
// ============================================================================

/// Config tuned for tests: short ttl, fast polling.
pub fn test_config(owner: &str) -> SyncConfig {
    SyncConfig::default()
        .with_owner(owner)
        .with_lease_ttl(Duration::from_millis(1_000))
        .with_heartbeat_interval(Duration::from_millis(200))
        .with_acquire_policy(5, Duration::from_millis(20))
}

pub fn new_entity_id() -> EntityId {
    EntityId::now_v7()
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    use super::*;
    use proptest::collection::{btree_map, vec};
    use proptest::prelude::*;
    use uuid::Uuid;

    pub fn arb_entity_id() -> impl Strategy<Value = EntityId> {
        any::<u128>().prop_map(|n| EntityId::new(Uuid::from_u128(n)))
    }

    pub fn arb_material() -> impl Strategy<Value = String> {
        prop_oneof![
            Just("STONE".to_string()),
            Just("DIAMOND_SWORD".to_string()),
            Just("OAK_LOG".to_string()),
            "[A-Z][A-Z_]{2,20}",
        ]
    }

    pub fn arb_item_stack() -> impl Strategy<Value = ItemStack> {
        (
            arb_material(),
            1u32..=64,
            btree_map("[a-z_]{1,12}", "[ -~]{0,24}", 0..4),
        )
            .prop_map(|(material, amount, meta)| ItemStack {
                material,
                amount,
                meta,
            })
    }

    /// Slot array of fixed length, roughly half empty.
    pub fn arb_slots(len: usize) -> impl Strategy<Value = Vec<Option<ItemStack>>> {
        vec(proptest::option::of(arb_item_stack()), len)
    }

    pub fn arb_status_effect() -> impl Strategy<Value = StatusEffect> {
        (
            proptest::sample::select(EffectKind::ALL.to_vec()),
            1i32..72_000,
            0i32..5,
            any::<bool>(),
            any::<bool>(),
            any::<bool>(),
        )
            .prop_map(|(kind, duration, amplifier, ambient, particles, icon)| StatusEffect {
                kind,
                duration,
                amplifier,
                ambient,
                particles,
                icon,
            })
    }

    /// Distinct effect kinds, as a live entity holds at most one of each.
    pub fn arb_effects() -> impl Strategy<Value = Vec<StatusEffect>> {
        vec(arb_status_effect(), 0..6).prop_map(|effects| {
            let mut seen = HashSet::new();
            effects
                .into_iter()
                .filter(|e| seen.insert(e.kind))
                .collect()
        })
    }

    pub fn arb_advancements() -> impl Strategy<Value = AdvancementState> {
        (
            vec("minecraft:[a-z_]{1,16}", 0..5),
            btree_map("story/[a-z_]{1,12}", vec("[a-z_]{1,10}", 1..3), 0..4),
        )
            .prop_map(|(mut discovered_recipes, advancements)| {
                discovered_recipes.sort();
                discovered_recipes.dedup();
                AdvancementState {
                    discovered_recipes,
                    advancements,
                }
            })
    }

    /// Coordinates on an eighth-block grid, so values print and parse exactly.
    pub fn arb_location() -> impl Strategy<Value = Location> {
        (
            "[a-z_]{1,12}",
            -8_000_000i32..8_000_000,
            -512i32..2_560,
            -8_000_000i32..8_000_000,
            -720i16..720,
            -360i16..360,
        )
            .prop_map(|(world, x, y, z, yaw, pitch)| Location {
                world,
                x: f64::from(x) / 8.0,
                y: f64::from(y) / 8.0,
                z: f64::from(z) / 8.0,
                yaw: f32::from(yaw) / 4.0,
                pitch: f32::from(pitch) / 4.0,
            })
    }

    /// State whose health is within its own max, so a restore never clamps it.
    /// Fractional fields sit on small power-of-two grids.
    pub fn arb_entity_state() -> impl Strategy<Value = EntityState> {
        (
            (1u8..=40, 0i32..=20, 0u8..=80, 0u8..=16),
            (0i32..100_000, 0u8..128, 0i32..1_000),
            arb_slots(INVENTORY_SIZE),
            arb_slots(ARMOR_SIZE),
            arb_slots(ENDER_CHEST_SIZE),
            arb_effects(),
            arb_advancements(),
            arb_location(),
        )
            .prop_map(
                |(
                    (half_hearts, food_level, saturation, exhaustion),
                    (total_experience, exp, level),
                    inventory,
                    armor,
                    ender_chest,
                    effects,
                    advancements,
                    location,
                )| EntityState {
                    health: f64::from(half_hearts) / 2.0,
                    food: FoodState {
                        food_level,
                        saturation: f32::from(saturation) / 4.0,
                        exhaustion: f32::from(exhaustion) / 4.0,
                    },
                    experience: ExperienceState {
                        total_experience,
                        exp: f32::from(exp) / 128.0,
                        level,
                    },
                    inventory,
                    armor,
                    ender_chest,
                    effects,
                    advancements,
                    location,
                },
            )
    }

    /// Any combination of enabled field groups.
    pub fn arb_toggles() -> impl Strategy<Value = FeatureToggles> {
        vec(any::<bool>(), FieldGroup::ALL.len()).prop_map(|flags| {
            FieldGroup::ALL
                .iter()
                .zip(flags)
                .fold(FeatureToggles::default(), |t, (group, on)| t.with(*group, on))
        })
    }
}
