//! Property-Based Tests for the State Codec
//!
//! **Property: Slot Idempotence**
//!
//! For any live entity and toggle map, decoding a captured snapshot and
//! re-encoding its item groups SHALL yield byte-identical slots at every position.
//!
//! **Property: Restore Fidelity**
//!
//! Applying a stored snapshot to a fresh entity SHALL reproduce every enabled
//! group and leave every disabled group untouched.

use proptest::prelude::*;
use syncbridge_core::item::encode_slots;
use syncbridge_core::{
    EffectKind, EncodedSlot, FeatureToggles, FieldGroup, ItemStack, LiveEntity, StateCodec,
    StatusEffect,
};
use syncbridge_test_utils::generators::{arb_entity_state, arb_toggles};
use syncbridge_test_utils::{new_entity_id, EntityState, TestEntity};

fn reencode(group: FieldGroup, slots: &Option<Vec<Option<ItemStack>>>) -> Option<Vec<EncodedSlot>> {
    slots.as_ref().map(|s| encode_slots(group, s).unwrap())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    #[test]
    fn prop_item_slots_reencode_identically(
        state in arb_entity_state(),
        toggles in arb_toggles(),
    ) {
        let codec = StateCodec::new(toggles);
        let entity = TestEntity::with_state(new_entity_id(), state);

        let snap = codec.capture(&entity).unwrap();
        let blob = codec.encode(&snap).unwrap();
        let decoded = codec.decode(&blob).unwrap().unwrap();
        let restored = codec.restore(&decoded).unwrap();

        prop_assert_eq!(
            reencode(FieldGroup::Inventory, &restored.inventory),
            snap.inventory_slots().map(<[_]>::to_vec)
        );
        prop_assert_eq!(
            reencode(FieldGroup::Armor, &restored.armor),
            snap.armor_slots().map(<[_]>::to_vec)
        );
        prop_assert_eq!(
            reencode(FieldGroup::EnderChest, &restored.ender_chest),
            snap.ender_chest_slots().map(<[_]>::to_vec)
        );
    }

    #[test]
    fn prop_restore_reproduces_enabled_groups(
        source in arb_entity_state(),
        target in arb_entity_state(),
        toggles in arb_toggles(),
    ) {
        let codec = StateCodec::new(toggles.clone());
        let from = TestEntity::with_state(new_entity_id(), source.clone());
        let to = TestEntity::with_state(new_entity_id(), target.clone());

        let blob = codec.encode(&codec.capture(&from).unwrap()).unwrap();
        let restored = codec.load(Some(&blob)).unwrap().unwrap();
        codec.apply(&restored, &to).unwrap();
        let after = to.state();

        let pick = |group: FieldGroup| if toggles.is_enabled(group) { &source } else { &target };

        prop_assert_eq!(after.food, pick(FieldGroup::FoodLevel).food);
        prop_assert_eq!(after.experience, pick(FieldGroup::Experience).experience);
        prop_assert_eq!(&after.inventory, &pick(FieldGroup::Inventory).inventory);
        prop_assert_eq!(&after.armor, &pick(FieldGroup::Armor).armor);
        prop_assert_eq!(&after.ender_chest, &pick(FieldGroup::EnderChest).ender_chest);
        prop_assert_eq!(&after.effects, &pick(FieldGroup::PotionEffects).effects);
        prop_assert_eq!(&after.location, &target.location);

        if toggles.is_enabled(FieldGroup::Health) {
            prop_assert_eq!(after.health, source.health.min(after.max_health()));
        } else {
            prop_assert_eq!(after.health, target.health);
        }
    }
}

#[test]
fn test_disabled_inventory_is_absent_and_untouched() {
    let toggles = FeatureToggles::default().with(FieldGroup::Inventory, false);
    let codec = StateCodec::new(toggles);

    let source = TestEntity::new(new_entity_id());
    source.update(|s| s.inventory[0] = Some(ItemStack::new("DIAMOND", 3)));
    let snap = codec.capture(&source).unwrap();
    assert!(!snap.contains(FieldGroup::Inventory));

    let blob = codec.encode(&snap).unwrap();
    assert!(!blob.contains("inventoryContentsNBT"));

    let target = TestEntity::new(new_entity_id());
    target.update(|s| s.inventory[5] = Some(ItemStack::new("STONE", 64)));
    let before: EntityState = target.state();

    let restored = codec.load(Some(&blob)).unwrap().unwrap();
    let report = codec.apply(&restored, &target).unwrap();
    assert!(!report.applied.contains(&FieldGroup::Inventory));
    assert_eq!(target.state().inventory, before.inventory);
    assert!(target.is_active());
}

#[test]
fn test_health_clamped_to_max_on_apply() {
    let codec = StateCodec::new(FeatureToggles::all_enabled());
    let boosted = TestEntity::new(new_entity_id());
    boosted.update(|s| {
        s.effects
            .push(StatusEffect::new(EffectKind::HealthBoost, 1_200, 0));
        s.health = 24.0;
    });
    let blob = codec.encode(&codec.capture(&boosted).unwrap()).unwrap();

    let plain = TestEntity::new(new_entity_id());
    let mut restored = codec.load(Some(&blob)).unwrap().unwrap();
    restored.effects = None;
    codec.apply(&restored, &plain).unwrap();
    assert_eq!(plain.state().health, 20.0);
}
