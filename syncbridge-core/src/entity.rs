//! Live entity seam.
//!
//! The sync engine never owns live state. It reads and writes it through
//! [`LiveEntity`], implemented by the hosting platform. Getters are fallible
//! because live state can be torn down underneath a reader.

use crate::{CodecError, DenialReason, EntityId, ItemStack, StatusEffect};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub type EntityResult<T> = Result<T, CodecError>;

/// Hunger bar state.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct FoodState {
    pub food_level: i32,
    pub saturation: f32,
    pub exhaustion: f32,
}

/// Experience state.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ExperienceState {
    pub total_experience: i32,
    /// Progress within the current level, 0.0..1.0.
    pub exp: f32,
    pub level: i32,
}

/// Recipes and advancement criteria already earned.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AdvancementState {
    pub discovered_recipes: Vec<String>,
    /// Advancement key to awarded criteria. Only advancements with progress appear.
    pub advancements: BTreeMap<String, Vec<String>>,
}

/// Position in a named region.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Location {
    pub world: String,
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub yaw: f32,
    pub pitch: f32,
}

/// A locally active entity whose state is synchronized.
pub trait LiveEntity: Send + Sync {
    fn id(&self) -> EntityId;

    /// Whether the entity is still active on this process.
    fn is_active(&self) -> bool;

    /// Current region (world) name, if the entity is placed in one.
    fn region(&self) -> Option<String>;

    fn health(&self) -> EntityResult<f64>;
    fn max_health(&self) -> EntityResult<f64>;
    fn set_health(&self, health: f64) -> EntityResult<()>;

    fn food(&self) -> EntityResult<FoodState>;
    fn set_food(&self, food: FoodState) -> EntityResult<()>;

    fn experience(&self) -> EntityResult<ExperienceState>;
    fn set_experience(&self, experience: ExperienceState) -> EntityResult<()>;

    fn inventory(&self) -> EntityResult<Vec<Option<ItemStack>>>;
    fn set_inventory(&self, items: Vec<Option<ItemStack>>) -> EntityResult<()>;

    fn armor(&self) -> EntityResult<Vec<Option<ItemStack>>>;
    fn set_armor(&self, items: Vec<Option<ItemStack>>) -> EntityResult<()>;

    fn ender_chest(&self) -> EntityResult<Vec<Option<ItemStack>>>;
    fn set_ender_chest(&self, items: Vec<Option<ItemStack>>) -> EntityResult<()>;

    fn effects(&self) -> EntityResult<Vec<StatusEffect>>;
    fn clear_effects(&self) -> EntityResult<()>;
    fn add_effect(&self, effect: &StatusEffect) -> EntityResult<()>;

    fn advancements(&self) -> EntityResult<AdvancementState>;
    /// Additively award recipes and criteria. Unknown keys are ignored.
    fn grant_advancements(&self, state: &AdvancementState) -> EntityResult<()>;

    fn location(&self) -> EntityResult<Location>;

    /// Refuse or end the entity's session with a user-visible reason.
    fn deny(&self, reason: DenialReason);
}
