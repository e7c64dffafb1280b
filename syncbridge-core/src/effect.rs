//! Status effects keyed by stable uppercase type name.
//!
//! Stored rows carry names such as `SPEED` or `HEALTH_BOOST`. Names are kept
//! verbatim across versions; a name this build does not know is skipped on
//! apply instead of failing the whole snapshot.

use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! effect_kinds {
    ($($variant:ident => $name:literal),+ $(,)?) => {
        /// Known status effect types.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub enum EffectKind {
            $($variant),+
        }

        impl EffectKind {
            pub const ALL: &'static [EffectKind] = &[$(EffectKind::$variant),+];

            /// Stable stored name.
            pub fn name(&self) -> &'static str {
                match self {
                    $(EffectKind::$variant => $name),+
                }
            }

            pub fn from_name(name: &str) -> Option<Self> {
                match name.trim().to_ascii_uppercase().as_str() {
                    $($name => Some(EffectKind::$variant),)+
                    _ => None,
                }
            }
        }
    };
}

effect_kinds! {
    Speed => "SPEED",
    Slowness => "SLOW",
    Haste => "FAST_DIGGING",
    MiningFatigue => "SLOW_DIGGING",
    Strength => "INCREASE_DAMAGE",
    InstantHealth => "HEAL",
    InstantDamage => "HARM",
    JumpBoost => "JUMP",
    Nausea => "CONFUSION",
    Regeneration => "REGENERATION",
    Resistance => "DAMAGE_RESISTANCE",
    FireResistance => "FIRE_RESISTANCE",
    WaterBreathing => "WATER_BREATHING",
    Invisibility => "INVISIBILITY",
    Blindness => "BLINDNESS",
    NightVision => "NIGHT_VISION",
    Hunger => "HUNGER",
    Weakness => "WEAKNESS",
    Poison => "POISON",
    Wither => "WITHER",
    HealthBoost => "HEALTH_BOOST",
    Absorption => "ABSORPTION",
    Saturation => "SATURATION",
    Glowing => "GLOWING",
    Levitation => "LEVITATION",
    Luck => "LUCK",
    BadLuck => "UNLUCK",
    SlowFalling => "SLOW_FALLING",
    ConduitPower => "CONDUIT_POWER",
    DolphinsGrace => "DOLPHINS_GRACE",
    BadOmen => "BAD_OMEN",
    HeroOfTheVillage => "HERO_OF_THE_VILLAGE",
    Darkness => "DARKNESS",
}

impl EffectKind {
    /// Effects that raise the entity's maximum health while active.
    pub fn raises_max_health(&self) -> bool {
        matches!(self, EffectKind::HealthBoost)
    }
}

impl fmt::Display for EffectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// An active status effect on a live entity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusEffect {
    pub kind: EffectKind,
    /// Remaining duration in ticks.
    pub duration: i32,
    pub amplifier: i32,
    pub ambient: bool,
    pub particles: bool,
    pub icon: bool,
}

impl StatusEffect {
    pub fn new(kind: EffectKind, duration: i32, amplifier: i32) -> Self {
        Self {
            kind,
            duration,
            amplifier,
            ambient: false,
            particles: true,
            icon: true,
        }
    }
}

/// Stored shape of a status effect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredEffect {
    #[serde(rename = "type")]
    pub type_name: String,
    pub duration: i32,
    pub amplifier: i32,
    #[serde(default)]
    pub ambient: bool,
    #[serde(default = "default_true")]
    pub particles: bool,
    #[serde(default = "default_true")]
    pub icon: bool,
}

fn default_true() -> bool {
    true
}

impl From<&StatusEffect> for StoredEffect {
    fn from(effect: &StatusEffect) -> Self {
        Self {
            type_name: effect.kind.name().to_string(),
            duration: effect.duration,
            amplifier: effect.amplifier,
            ambient: effect.ambient,
            particles: effect.particles,
            icon: effect.icon,
        }
    }
}

impl StoredEffect {
    /// Resolve the stored name; `None` when the name is unknown.
    pub fn to_effect(&self) -> Option<StatusEffect> {
        let kind = EffectKind::from_name(&self.type_name)?;
        Some(StatusEffect {
            kind,
            duration: self.duration,
            amplifier: self.amplifier,
            ambient: self.ambient,
            particles: self.particles,
            icon: self.icon,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_names_are_unique_and_resolvable() {
        for kind in EffectKind::ALL {
            assert_eq!(EffectKind::from_name(kind.name()), Some(*kind));
        }
        let mut names: Vec<_> = EffectKind::ALL.iter().map(|k| k.name()).collect();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), EffectKind::ALL.len());
    }

    #[test]
    fn test_stored_effect_uses_type_key() {
        let stored = StoredEffect::from(&StatusEffect::new(EffectKind::HealthBoost, 600, 1));
        let json = serde_json::to_string(&stored).unwrap();
        assert!(json.contains(r#""type":"HEALTH_BOOST""#));
    }

    #[test]
    fn test_unknown_name_resolves_to_none() {
        let stored = StoredEffect {
            type_name: "MOON_GRAVITY".to_string(),
            duration: 20,
            amplifier: 0,
            ambient: false,
            particles: true,
            icon: true,
        };
        assert!(stored.to_effect().is_none());
    }

    #[test]
    fn test_lowercase_legacy_name_accepted() {
        assert_eq!(EffectKind::from_name("speed"), Some(EffectKind::Speed));
    }
}
