//! Snapshot capture, serialization and apply.
//!
//! A [`Snapshot`] is the stored JSON shape of one entity's synchronized state.
//! Groups disabled in [`FeatureToggles`] are absent, not zero-filled. A
//! [`RestoredState`] is the decoded, typed form ready to apply.
//!
//! Apply order is fixed:
//!
//! ```text
//! food -> experience -> inventory -> armor -> ender chest
//!      -> effects (clear, then add) -> health (clamped to max) -> advancements
//! ```
//!
//! Effects go before health because some effects raise the maximum.

use crate::item::{decode_slots, encode_slots, EncodedSlot};
use crate::{
    AdvancementState, CodecError, ExperienceState, FeatureToggles, FieldGroup, FoodState,
    ItemStack, LiveEntity, Location, StoredEffect,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Written into every new snapshot. Rows without it are format 0.
pub const SNAPSHOT_FORMAT_VERSION: u32 = 2;

// ============================================================================
// STORED SHAPE
// ============================================================================

/// Serialized entity state.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    #[serde(default)]
    format_version: u32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    health: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    food_level: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    saturation: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    exhaustion: Option<f32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    total_experience: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    exp: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    level: Option<i32>,

    #[serde(
        rename = "inventoryContentsNBT",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    inventory: Option<Vec<EncodedSlot>>,
    #[serde(
        rename = "armorContentsNBT",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    armor: Option<Vec<EncodedSlot>>,
    #[serde(
        rename = "enderChestContentsNBT",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    ender_chest: Option<Vec<EncodedSlot>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    potion_effects: Option<Vec<StoredEffect>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    discovered_recipes: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    advancements: Option<BTreeMap<String, Vec<String>>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    world: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    x: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    y: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    z: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    yaw: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pitch: Option<f32>,
}

impl Snapshot {
    pub fn format_version(&self) -> u32 {
        self.format_version
    }

    /// Whether the group was captured into this snapshot.
    pub fn contains(&self, group: FieldGroup) -> bool {
        match group {
            FieldGroup::Health => self.health.is_some(),
            FieldGroup::FoodLevel => self.food_level.is_some(),
            FieldGroup::Experience => self.total_experience.is_some(),
            FieldGroup::Inventory => self.inventory.is_some(),
            FieldGroup::Armor => self.armor.is_some(),
            FieldGroup::PotionEffects => self.potion_effects.is_some(),
            FieldGroup::EnderChest => self.ender_chest.is_some(),
            FieldGroup::Advancements => {
                self.discovered_recipes.is_some() || self.advancements.is_some()
            }
            FieldGroup::Location => self.world.is_some(),
        }
    }

    pub fn groups(&self) -> Vec<FieldGroup> {
        FieldGroup::ALL
            .into_iter()
            .filter(|g| self.contains(*g))
            .collect()
    }

    pub fn inventory_slots(&self) -> Option<&[EncodedSlot]> {
        self.inventory.as_deref()
    }

    pub fn armor_slots(&self) -> Option<&[EncodedSlot]> {
        self.armor.as_deref()
    }

    pub fn ender_chest_slots(&self) -> Option<&[EncodedSlot]> {
        self.ender_chest.as_deref()
    }

    pub fn health(&self) -> Option<f64> {
        self.health
    }

    pub fn location(&self) -> Option<Location> {
        Some(Location {
            world: self.world.clone()?,
            x: self.x.unwrap_or_default(),
            y: self.y.unwrap_or_default(),
            z: self.z.unwrap_or_default(),
            yaw: self.yaw.unwrap_or_default(),
            pitch: self.pitch.unwrap_or_default(),
        })
    }
}

// ============================================================================
// RESTORED SHAPE
// ============================================================================

/// Decoded state ready to apply to a live entity.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RestoredState {
    pub health: Option<f64>,
    pub food: Option<FoodState>,
    pub experience: Option<ExperienceState>,
    pub inventory: Option<Vec<Option<ItemStack>>>,
    pub armor: Option<Vec<Option<ItemStack>>>,
    pub ender_chest: Option<Vec<Option<ItemStack>>>,
    /// Stored effects, resolved lazily so unknown names can be skipped at apply.
    pub effects: Option<Vec<StoredEffect>>,
    pub advancements: Option<AdvancementState>,
    /// Informational only. Never applied.
    pub location: Option<Location>,
}

/// What an apply pass touched.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ApplyReport {
    pub applied: Vec<FieldGroup>,
    pub skipped_effects: Vec<String>,
}

// ============================================================================
// CODEC
// ============================================================================

/// Converts between live entities, snapshots and stored blobs.
#[derive(Debug, Clone, Default)]
pub struct StateCodec {
    toggles: FeatureToggles,
}

impl StateCodec {
    pub fn new(toggles: FeatureToggles) -> Self {
        Self { toggles }
    }

    pub fn toggles(&self) -> &FeatureToggles {
        &self.toggles
    }

    fn enabled(&self, group: FieldGroup) -> bool {
        self.toggles.is_enabled(group)
    }

    /// Read enabled groups from a live entity. Must run on the context that owns it.
    pub fn capture(&self, entity: &dyn LiveEntity) -> Result<Snapshot, CodecError> {
        let mut snap = Snapshot {
            format_version: SNAPSHOT_FORMAT_VERSION,
            ..Default::default()
        };

        if self.enabled(FieldGroup::Health) {
            snap.health = Some(entity.health()?);
        }
        if self.enabled(FieldGroup::FoodLevel) {
            let food = entity.food()?;
            snap.food_level = Some(food.food_level);
            snap.saturation = Some(food.saturation);
            snap.exhaustion = Some(food.exhaustion);
        }
        if self.enabled(FieldGroup::Experience) {
            let xp = entity.experience()?;
            snap.total_experience = Some(xp.total_experience);
            snap.exp = Some(xp.exp);
            snap.level = Some(xp.level);
        }
        if self.enabled(FieldGroup::Inventory) {
            snap.inventory = Some(encode_slots(FieldGroup::Inventory, &entity.inventory()?)?);
        }
        if self.enabled(FieldGroup::Armor) {
            snap.armor = Some(encode_slots(FieldGroup::Armor, &entity.armor()?)?);
        }
        if self.enabled(FieldGroup::PotionEffects) {
            snap.potion_effects = Some(entity.effects()?.iter().map(StoredEffect::from).collect());
        }
        if self.enabled(FieldGroup::EnderChest) {
            snap.ender_chest = Some(encode_slots(
                FieldGroup::EnderChest,
                &entity.ender_chest()?,
            )?);
        }
        if self.enabled(FieldGroup::Advancements) {
            let adv = entity.advancements()?;
            snap.discovered_recipes = Some(adv.discovered_recipes);
            snap.advancements = Some(
                adv.advancements
                    .into_iter()
                    .filter(|(_, criteria)| !criteria.is_empty())
                    .collect(),
            );
        }
        if self.enabled(FieldGroup::Location) {
            let loc = entity.location()?;
            snap.world = Some(loc.world);
            snap.x = Some(loc.x);
            snap.y = Some(loc.y);
            snap.z = Some(loc.z);
            snap.yaw = Some(loc.yaw);
            snap.pitch = Some(loc.pitch);
        }

        Ok(snap)
    }

    /// Serialize a snapshot into its stored blob.
    pub fn encode(&self, snapshot: &Snapshot) -> Result<String, CodecError> {
        serde_json::to_string(snapshot).map_err(|e| CodecError::Encode {
            group: "snapshot".to_string(),
            reason: e.to_string(),
        })
    }

    /// Parse a stored blob. Empty blobs mean "nothing saved yet".
    pub fn decode(&self, blob: &str) -> Result<Option<Snapshot>, CodecError> {
        if crate::is_empty_blob(blob) {
            return Ok(None);
        }
        serde_json::from_str(blob)
            .map(Some)
            .map_err(|e| CodecError::MalformedSnapshot {
                reason: e.to_string(),
            })
    }

    /// Decode item and effect groups that this process syncs.
    pub fn restore(&self, snap: &Snapshot) -> Result<RestoredState, CodecError> {
        let mut state = RestoredState::default();

        if self.enabled(FieldGroup::Health) {
            state.health = snap.health;
        }
        if self.enabled(FieldGroup::FoodLevel) {
            state.food = snap.food_level.map(|food_level| FoodState {
                food_level,
                saturation: snap.saturation.unwrap_or_default(),
                exhaustion: snap.exhaustion.unwrap_or_default(),
            });
        }
        if self.enabled(FieldGroup::Experience) {
            state.experience = snap.total_experience.map(|total_experience| ExperienceState {
                total_experience,
                exp: snap.exp.unwrap_or_default(),
                level: snap.level.unwrap_or_default(),
            });
        }
        if self.enabled(FieldGroup::Inventory) {
            if let Some(slots) = &snap.inventory {
                state.inventory = Some(decode_slots(FieldGroup::Inventory, slots)?);
            }
        }
        if self.enabled(FieldGroup::Armor) {
            if let Some(slots) = &snap.armor {
                state.armor = Some(decode_slots(FieldGroup::Armor, slots)?);
            }
        }
        if self.enabled(FieldGroup::EnderChest) {
            if let Some(slots) = &snap.ender_chest {
                state.ender_chest = Some(decode_slots(FieldGroup::EnderChest, slots)?);
            }
        }
        if self.enabled(FieldGroup::PotionEffects) {
            state.effects = snap.potion_effects.clone();
        }
        if self.enabled(FieldGroup::Advancements) && snap.contains(FieldGroup::Advancements) {
            state.advancements = Some(AdvancementState {
                discovered_recipes: snap.discovered_recipes.clone().unwrap_or_default(),
                advancements: snap.advancements.clone().unwrap_or_default(),
            });
        }
        state.location = snap.location();

        Ok(state)
    }

    /// Parse and decode in one step.
    pub fn load(&self, blob: Option<&str>) -> Result<Option<RestoredState>, CodecError> {
        match blob {
            None => Ok(None),
            Some(blob) => match self.decode(blob)? {
                None => Ok(None),
                Some(snap) => self.restore(&snap).map(Some),
            },
        }
    }

    /// Write restored state into a live entity.
    pub fn apply(
        &self,
        state: &RestoredState,
        entity: &dyn LiveEntity,
    ) -> Result<ApplyReport, CodecError> {
        let mut report = ApplyReport::default();

        if let Some(food) = state.food.filter(|_| self.enabled(FieldGroup::FoodLevel)) {
            entity.set_food(food)?;
            report.applied.push(FieldGroup::FoodLevel);
        }
        if let Some(xp) = state.experience.filter(|_| self.enabled(FieldGroup::Experience)) {
            entity.set_experience(xp)?;
            report.applied.push(FieldGroup::Experience);
        }
        if let Some(items) = state.inventory.as_ref().filter(|_| self.enabled(FieldGroup::Inventory)) {
            entity.set_inventory(items.clone())?;
            report.applied.push(FieldGroup::Inventory);
        }
        if let Some(items) = state.armor.as_ref().filter(|_| self.enabled(FieldGroup::Armor)) {
            entity.set_armor(items.clone())?;
            report.applied.push(FieldGroup::Armor);
        }
        if let Some(items) = state
            .ender_chest
            .as_ref()
            .filter(|items| self.enabled(FieldGroup::EnderChest) && !items.is_empty())
        {
            entity.set_ender_chest(items.clone())?;
            report.applied.push(FieldGroup::EnderChest);
        }
        if let Some(stored) = state
            .effects
            .as_ref()
            .filter(|_| self.enabled(FieldGroup::PotionEffects))
        {
            entity.clear_effects()?;
            for effect in stored {
                match effect.to_effect() {
                    Some(effect) => entity.add_effect(&effect)?,
                    None => {
                        tracing::warn!(effect = %effect.type_name, "Skipping unknown status effect");
                        report.skipped_effects.push(effect.type_name.clone());
                    }
                }
            }
            report.applied.push(FieldGroup::PotionEffects);
        }
        if let Some(health) = state.health.filter(|_| self.enabled(FieldGroup::Health)) {
            let max = entity.max_health()?;
            entity.set_health(health.min(max))?;
            report.applied.push(FieldGroup::Health);
        }
        if let Some(adv) = state
            .advancements
            .as_ref()
            .filter(|_| self.enabled(FieldGroup::Advancements))
        {
            entity.grant_advancements(adv)?;
            report.applied.push(FieldGroup::Advancements);
        }

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_empty_blob_is_fresh_profile() {
        let codec = StateCodec::default();
        assert_eq!(codec.decode("").unwrap(), None);
        assert_eq!(codec.decode("{}").unwrap(), None);
        assert!(codec.load(None).unwrap().is_none());
    }

    #[test]
    fn test_decode_malformed_blob() {
        let codec = StateCodec::default();
        assert!(matches!(
            codec.decode("[1,2"),
            Err(CodecError::MalformedSnapshot { .. })
        ));
    }

    #[test]
    fn test_decode_historical_row_without_version() {
        let blob = r#"{
            "health": 14.5,
            "foodLevel": 17, "saturation": 2.0, "exhaustion": 0.5,
            "totalExperience": 120, "exp": 0.25, "level": 7,
            "inventoryContentsNBT": [null, "{\"material\":\"STONE\",\"amount\":12}", "{}"],
            "potionEffects": [{"type":"SPEED","duration":200,"amplifier":1,"ambient":false,"particles":true,"icon":true}]
        }"#;
        let codec = StateCodec::default();
        let snap = codec.decode(blob).unwrap().unwrap();
        assert_eq!(snap.format_version(), 0);
        assert!(snap.contains(FieldGroup::Inventory));
        assert!(!snap.contains(FieldGroup::Armor));

        let state = codec.restore(&snap).unwrap();
        let inv = state.inventory.unwrap();
        assert_eq!(inv.len(), 3);
        assert!(inv[0].is_none());
        assert_eq!(inv[1].as_ref().unwrap().amount, 12);
        assert!(inv[2].is_none());
        assert_eq!(state.food.unwrap().food_level, 17);
        assert_eq!(state.experience.unwrap().level, 7);
    }

    #[test]
    fn test_restore_skips_disabled_corrupt_group() {
        let blob = r#"{"inventoryContentsNBT": ["{\"itemAsBase64\":\"%%%\"}"]}"#;
        let strict = StateCodec::default();
        assert!(matches!(
            strict.load(Some(blob)),
            Err(CodecError::CorruptItem { .. })
        ));

        let lenient = StateCodec::new(FeatureToggles::default().with(FieldGroup::Inventory, false));
        let state = lenient.load(Some(blob)).unwrap().unwrap();
        assert!(state.inventory.is_none());
    }

    #[test]
    fn test_new_snapshot_carries_version() {
        let codec = StateCodec::default();
        let snap = Snapshot {
            format_version: SNAPSHOT_FORMAT_VERSION,
            health: Some(20.0),
            ..Default::default()
        };
        let blob = codec.encode(&snap).unwrap();
        assert!(blob.contains("\"formatVersion\":2"));
        assert!(!blob.contains("inventoryContentsNBT"));
        assert_eq!(codec.decode(&blob).unwrap().unwrap(), snap);
    }

    #[test]
    fn test_location_is_informational() {
        let blob = r#"{"world":"world_nether","x":1.5,"y":64.0,"z":-3.0,"yaw":90.0,"pitch":0.0}"#;
        let codec = StateCodec::new(FeatureToggles::default().with(FieldGroup::Location, true));
        let state = codec.load(Some(blob)).unwrap().unwrap();
        assert_eq!(state.location.unwrap().world, "world_nether");
    }
}
