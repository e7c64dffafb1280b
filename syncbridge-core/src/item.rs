//! Item stacks and their slot encodings.
//!
//! Each slot is stored as a JSON string (or null for an empty slot). Two
//! historical shapes coexist and are told apart by which fields are present:
//!
//! ```text
//! {"itemAsBase64": "<base64 of MessagePack ItemStack>"}      modern
//! {"material": "DIAMOND_SWORD", "amount": 1, "nbt": "{..}"}  legacy
//! ```
//!
//! A corrupt modern slot is a hard error. A legacy slot that fails to parse
//! degrades to an empty slot with a warning.

use crate::{CodecError, FieldGroup};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Meta key holding verbatim legacy tag text.
pub const LEGACY_NBT_KEY: &str = "legacy-nbt";

/// Largest stack size accepted from legacy rows.
pub const MAX_LEGACY_AMOUNT: i64 = 127;

/// Material name for "nothing in this slot".
pub const AIR: &str = "AIR";

/// Encoded form of one slot. `None` is an empty slot.
pub type EncodedSlot = Option<String>;

/// A platform item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemStack {
    pub material: String,
    pub amount: u32,
    #[serde(default)]
    pub meta: BTreeMap<String, String>,
}

impl ItemStack {
    pub fn new(material: impl Into<String>, amount: u32) -> Self {
        Self {
            material: material.into(),
            amount,
            meta: BTreeMap::new(),
        }
    }

    pub fn with_meta(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.meta.insert(key.into(), value.into());
        self
    }

    pub fn is_air(&self) -> bool {
        self.amount == 0 || self.material.eq_ignore_ascii_case(AIR)
    }
}

// ============================================================================
// ENVELOPE
// ============================================================================

#[derive(Debug, Serialize)]
struct ItemEnvelope {
    #[serde(rename = "itemAsBase64")]
    item_as_base64: String,
}

const MODERN_KEY: &str = "itemAsBase64";
const MATERIAL_KEY: &str = "material";

/// Slot encoding detected from the fields present.
///
/// Legacy fields stay as raw JSON so a type mismatch is judged by the legacy
/// policy instead of failing the parse.
#[derive(Debug, Clone, PartialEq)]
pub enum SlotFormat {
    Empty,
    Modern { item_as_base64: String },
    Legacy {
        material: Value,
        amount: Option<Value>,
        nbt: Option<Value>,
    },
}

/// Classify an encoded slot without decoding its payload.
pub fn detect_format(encoded: &str) -> Result<SlotFormat, String> {
    let trimmed = encoded.trim();
    if trimmed.is_empty() || trimmed == "{}" {
        return Ok(SlotFormat::Empty);
    }
    let value: Value = serde_json::from_str(trimmed).map_err(|e| e.to_string())?;
    let Value::Object(mut fields) = value else {
        return Err("slot is not a JSON object".to_string());
    };
    if let Some(b64) = fields.remove(MODERN_KEY) {
        return match b64 {
            Value::String(item_as_base64) => Ok(SlotFormat::Modern { item_as_base64 }),
            other => Err(format!("{} is not a string: {}", MODERN_KEY, other)),
        };
    }
    match fields.remove(MATERIAL_KEY) {
        Some(material) => Ok(SlotFormat::Legacy {
            material,
            amount: fields.remove("amount"),
            nbt: fields.remove("nbt"),
        }),
        None => Ok(SlotFormat::Empty),
    }
}

// ============================================================================
// SINGLE SLOT
// ============================================================================

/// Encode one slot in the modern form.
pub fn encode_item(item: Option<&ItemStack>) -> Result<EncodedSlot, String> {
    let item = match item {
        Some(item) if !item.is_air() => item,
        _ => return Ok(None),
    };
    let bytes = rmp_serde::to_vec_named(item).map_err(|e| e.to_string())?;
    let envelope = ItemEnvelope {
        item_as_base64: BASE64.encode(bytes),
    };
    serde_json::to_string(&envelope)
        .map(Some)
        .map_err(|e| e.to_string())
}

/// Decode one slot. `Ok(None)` is an empty slot.
pub fn decode_item(encoded: Option<&str>) -> Result<Option<ItemStack>, String> {
    let Some(encoded) = encoded else {
        return Ok(None);
    };
    match detect_format(encoded)? {
        SlotFormat::Empty => Ok(None),
        SlotFormat::Modern { item_as_base64 } => decode_modern(&item_as_base64).map(Some),
        SlotFormat::Legacy {
            material,
            amount,
            nbt,
        } => Ok(decode_legacy(material, amount, nbt)),
    }
}

fn decode_modern(item_as_base64: &str) -> Result<ItemStack, String> {
    let bytes = BASE64
        .decode(item_as_base64.trim())
        .map_err(|e| format!("invalid base64: {}", e))?;
    let item: ItemStack =
        rmp_serde::from_slice(&bytes).map_err(|e| format!("invalid item bytes: {}", e))?;
    if item.material.trim().is_empty() {
        return Err("item has no material".to_string());
    }
    Ok(item)
}

fn decode_legacy(material: Value, amount: Option<Value>, nbt: Option<Value>) -> Option<ItemStack> {
    match parse_legacy(&material, amount, nbt) {
        Ok(item) => item,
        Err(reason) => {
            tracing::warn!(material = %material, reason = %reason, "Dropping unreadable legacy item");
            None
        }
    }
}

fn parse_legacy(
    material: &Value,
    amount: Option<Value>,
    nbt: Option<Value>,
) -> Result<Option<ItemStack>, String> {
    let material = material
        .as_str()
        .ok_or_else(|| "material is not a string".to_string())?
        .trim();
    if material.is_empty()
        || !material
            .chars()
            .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '_')
    {
        return Err("unknown material".to_string());
    }
    if material == AIR {
        return Ok(None);
    }
    let amount = match amount {
        None | Some(Value::Null) => 1,
        Some(value) => value
            .as_i64()
            .ok_or_else(|| format!("amount {} is not an integer", value))?,
    };
    if !(1..=MAX_LEGACY_AMOUNT).contains(&amount) {
        return Err(format!("amount {} out of range", amount));
    }
    let nbt = match nbt {
        None | Some(Value::Null) => None,
        Some(Value::String(text)) => Some(text),
        Some(other) => return Err(format!("tag text is not a string: {}", other)),
    };
    let mut item = ItemStack::new(material, amount as u32);
    if let Some(nbt) = nbt.filter(|n| !n.trim().is_empty()) {
        if !nbt.trim_start().starts_with('{') {
            return Err("tag text is not a compound".to_string());
        }
        item.meta.insert(LEGACY_NBT_KEY.to_string(), nbt);
    }
    Ok(Some(item))
}

// ============================================================================
// SLOT SEQUENCES
// ============================================================================

/// Encode an ordered slot sequence, keeping empty slots in place.
pub fn encode_slots(
    group: FieldGroup,
    items: &[Option<ItemStack>],
) -> Result<Vec<EncodedSlot>, CodecError> {
    items
        .iter()
        .map(|item| {
            encode_item(item.as_ref()).map_err(|reason| CodecError::Encode {
                group: group.key().to_string(),
                reason,
            })
        })
        .collect()
}

/// Decode an ordered slot sequence. The first corrupt slot aborts the whole sequence.
pub fn decode_slots(
    group: FieldGroup,
    slots: &[EncodedSlot],
) -> Result<Vec<Option<ItemStack>>, CodecError> {
    slots
        .iter()
        .enumerate()
        .map(|(slot, encoded)| {
            decode_item(encoded.as_deref()).map_err(|reason| CodecError::CorruptItem {
                group: group.key().to_string(),
                slot,
                reason,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sword() -> ItemStack {
        ItemStack::new("DIAMOND_SWORD", 1)
            .with_meta("display-name", "Excalibur")
            .with_meta("enchant:sharpness", "5")
    }

    #[test]
    fn test_modern_encode_decode() {
        let encoded = encode_item(Some(&sword())).unwrap().unwrap();
        assert!(encoded.contains("itemAsBase64"));
        assert!(matches!(detect_format(&encoded), Ok(SlotFormat::Modern { .. })));
        assert_eq!(decode_item(Some(&encoded)).unwrap(), Some(sword()));
    }

    #[test]
    fn test_air_and_none_encode_as_empty() {
        assert_eq!(encode_item(None).unwrap(), None);
        assert_eq!(encode_item(Some(&ItemStack::new("AIR", 1))).unwrap(), None);
        assert_eq!(encode_item(Some(&ItemStack::new("STONE", 0))).unwrap(), None);
    }

    #[test]
    fn test_empty_forms_decode_as_empty() {
        assert_eq!(decode_item(None).unwrap(), None);
        assert_eq!(decode_item(Some("")).unwrap(), None);
        assert_eq!(decode_item(Some("{}")).unwrap(), None);
        assert_eq!(decode_item(Some(r#"{"amount":0}"#)).unwrap(), None);
    }

    #[test]
    fn test_legacy_triple_decodes() {
        let item = decode_item(Some(
            r#"{"material":"IRON_INGOT","amount":32,"nbt":"{display:{Name:\"x\"}}"}"#,
        ))
        .unwrap()
        .unwrap();
        assert_eq!(item.material, "IRON_INGOT");
        assert_eq!(item.amount, 32);
        assert!(item.meta.contains_key(LEGACY_NBT_KEY));
    }

    #[test]
    fn test_legacy_failures_degrade_to_empty() {
        for raw in [
            r#"{"material":"not a material","amount":1}"#,
            r#"{"material":"STONE","amount":-4}"#,
            r#"{"material":"STONE","amount":9000}"#,
            r#"{"material":"STONE","amount":1,"nbt":"garbage"}"#,
            r#"{"material":"AIR","amount":1}"#,
            r#"{"material":"STONE","amount":1.5}"#,
            r#"{"material":"STONE","amount":"12"}"#,
            r#"{"material":"STONE","amount":1,"nbt":42}"#,
            r#"{"material":7,"amount":1}"#,
            r#"{"material":null}"#,
        ] {
            assert_eq!(decode_item(Some(raw)).unwrap(), None, "{}", raw);
        }
    }

    #[test]
    fn test_corrupt_modern_is_error() {
        assert!(decode_item(Some(r#"{"itemAsBase64":"!!!not base64"}"#)).is_err());
        let junk = BASE64.encode([0xc1u8, 0x00, 0x13]);
        let raw = format!(r#"{{"itemAsBase64":"{}"}}"#, junk);
        assert!(decode_item(Some(&raw)).is_err());
    }

    #[test]
    fn test_unparseable_json_is_error() {
        assert!(decode_item(Some("{not json")).is_err());
        assert!(decode_item(Some("[1,2]")).is_err());
        assert!(decode_item(Some(r#"{"itemAsBase64":12}"#)).is_err());
    }

    #[test]
    fn test_mistyped_legacy_slot_does_not_abort_array() {
        let slots = vec![
            encode_item(Some(&sword())).unwrap(),
            Some(r#"{"material":"STONE","amount":1.5}"#.to_string()),
        ];
        let decoded = decode_slots(FieldGroup::Inventory, &slots).unwrap();
        assert_eq!(decoded, vec![Some(sword()), None]);
    }

    #[test]
    fn test_decode_slots_reports_slot_index() {
        let good = encode_item(Some(&sword())).unwrap();
        let slots = vec![
            good,
            None,
            Some(r#"{"itemAsBase64":"%%%"}"#.to_string()),
        ];
        let err = decode_slots(FieldGroup::Inventory, &slots).unwrap_err();
        match err {
            CodecError::CorruptItem { group, slot, .. } => {
                assert_eq!(group, "inventory");
                assert_eq!(slot, 2);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_encode_slots_preserves_positions() {
        let items = vec![None, Some(sword()), None, Some(ItemStack::new("DIRT", 64))];
        let slots = encode_slots(FieldGroup::Inventory, &items).unwrap();
        assert_eq!(slots.len(), 4);
        assert!(slots[0].is_none());
        assert!(slots[2].is_none());
        let decoded = decode_slots(FieldGroup::Inventory, &slots).unwrap();
        assert_eq!(decoded, items);
    }
}

#[cfg(test)]
mod prop_tests {
    use super::*;
    use proptest::prelude::*;

    fn arb_item() -> impl Strategy<Value = ItemStack> {
        (
            "[A-Z][A-Z_]{2,20}",
            1u32..=64,
            prop::collection::btree_map("[a-z:_-]{1,12}", ".{0,24}", 0..4),
        )
            .prop_filter("not air", |(m, _, _)| m != AIR)
            .prop_map(|(material, amount, meta)| ItemStack {
                material,
                amount,
                meta,
            })
    }

    fn arb_json() -> impl Strategy<Value = Value> {
        prop_oneof![
            Just(Value::Null),
            any::<bool>().prop_map(Value::from),
            any::<i64>().prop_map(Value::from),
            any::<f64>().prop_map(Value::from),
            ".{0,32}".prop_map(Value::from),
            prop::collection::vec(any::<i32>(), 0..3).prop_map(Value::from),
        ]
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn prop_modern_slot_reencodes_identically(
            items in prop::collection::vec(prop::option::of(arb_item()), 0..41)
        ) {
            let slots = encode_slots(FieldGroup::Inventory, &items)?;
            let decoded = decode_slots(FieldGroup::Inventory, &slots)?;
            let again = encode_slots(FieldGroup::Inventory, &decoded)?;
            prop_assert_eq!(slots, again);
        }

        #[test]
        fn prop_legacy_decode_never_fails(
            material in ".{0,16}",
            amount in arb_json(),
            nbt in arb_json(),
        ) {
            let raw = serde_json::json!({
                "material": material,
                "amount": amount,
                "nbt": nbt,
            })
            .to_string();
            prop_assert!(decode_item(Some(&raw)).is_ok());
        }
    }
}
