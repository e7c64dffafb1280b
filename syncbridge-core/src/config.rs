//! Configuration types
//!
//! [`SyncConfig`] is an immutable snapshot handed to the lock manager, codec
//! and orchestrator at construction. Nothing reads configuration from a
//! global at call time.

use crate::{ConfigError, OwnerId, SyncError, SyncResult};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

// ============================================================================
// DEFAULTS
// ============================================================================

/// Owner identity used when none is configured. Unsafe with more than one server.
pub const DEFAULT_OWNER_ID: &str = "default-server";

/// Lease ttl in milliseconds.
pub const DEFAULT_LEASE_TTL_MS: u64 = 60_000;

/// Heartbeat renewal interval in seconds.
pub const DEFAULT_HEARTBEAT_SECS: u64 = 30;

/// Number of acquire attempts before giving up on activation.
pub const DEFAULT_ACQUIRE_ATTEMPTS: u32 = 20;

/// Delay between acquire attempts in milliseconds.
pub const DEFAULT_ACQUIRE_BACKOFF_MS: u64 = 500;

/// Default table name prefix (empty).
pub const DEFAULT_TABLE_PREFIX: &str = "";

/// Base name of the record table.
pub const RECORD_TABLE_BASE: &str = "player_data";

// ============================================================================
// FIELD GROUPS
// ============================================================================

/// Independently toggleable group of synchronized entity fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FieldGroup {
    Health,
    FoodLevel,
    Experience,
    Inventory,
    Armor,
    PotionEffects,
    EnderChest,
    Advancements,
    Location,
}

impl FieldGroup {
    pub const ALL: [FieldGroup; 9] = [
        FieldGroup::Health,
        FieldGroup::FoodLevel,
        FieldGroup::Experience,
        FieldGroup::Inventory,
        FieldGroup::Armor,
        FieldGroup::PotionEffects,
        FieldGroup::EnderChest,
        FieldGroup::Advancements,
        FieldGroup::Location,
    ];

    pub fn key(&self) -> &'static str {
        match self {
            FieldGroup::Health => "health",
            FieldGroup::FoodLevel => "food-level",
            FieldGroup::Experience => "experience",
            FieldGroup::Inventory => "inventory",
            FieldGroup::Armor => "armor",
            FieldGroup::PotionEffects => "potion-effects",
            FieldGroup::EnderChest => "ender-chest",
            FieldGroup::Advancements => "advancements",
            FieldGroup::Location => "location",
        }
    }

    /// Legacy groups sync by default; newer groups are opt-in.
    pub fn is_legacy(&self) -> bool {
        !matches!(
            self,
            FieldGroup::EnderChest | FieldGroup::Advancements | FieldGroup::Location
        )
    }

    pub fn default_enabled(&self) -> bool {
        self.is_legacy()
    }

    fn env_suffix(&self) -> String {
        self.key().replace('-', "_").to_uppercase()
    }
}

impl fmt::Display for FieldGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

impl FromStr for FieldGroup {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_lowercase().replace('_', "-");
        FieldGroup::ALL
            .into_iter()
            .find(|g| g.key() == normalized)
            .ok_or_else(|| ConfigError::InvalidValue {
                field: "field_group".to_string(),
                value: s.to_string(),
                reason: "unknown field group".to_string(),
            })
    }
}

// ============================================================================
// FEATURE TOGGLES
// ============================================================================

/// Per-group sync switches. Groups without an explicit entry use their default.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FeatureToggles {
    overrides: BTreeMap<FieldGroup, bool>,
}

impl FeatureToggles {
    pub fn is_enabled(&self, group: FieldGroup) -> bool {
        self.overrides
            .get(&group)
            .copied()
            .unwrap_or_else(|| group.default_enabled())
    }

    pub fn with(mut self, group: FieldGroup, enabled: bool) -> Self {
        self.overrides.insert(group, enabled);
        self
    }

    /// Every group switched on.
    pub fn all_enabled() -> Self {
        FieldGroup::ALL
            .into_iter()
            .fold(Self::default(), |t, g| t.with(g, true))
    }

    pub fn enabled_groups(&self) -> Vec<FieldGroup> {
        FieldGroup::ALL
            .into_iter()
            .filter(|g| self.is_enabled(*g))
            .collect()
    }

    /// Read `SYNCBRIDGE_SYNC_<GROUP>` overrides, e.g. `SYNCBRIDGE_SYNC_ENDER_CHEST=true`.
    pub fn from_env() -> Self {
        FieldGroup::ALL.into_iter().fold(Self::default(), |t, g| {
            match std::env::var(format!("SYNCBRIDGE_SYNC_{}", g.env_suffix()))
                .ok()
                .and_then(|v| parse_bool(&v))
            {
                Some(enabled) => t.with(g, enabled),
                None => t,
            }
        })
    }
}

// ============================================================================
// BLACKLIST
// ============================================================================

/// Partitions that never lock or sync.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncBlacklist {
    #[serde(default)]
    pub servers: BTreeSet<String>,
    /// Sub-partitions (worlds) inside a server.
    #[serde(default)]
    pub regions: BTreeSet<String>,
}

impl SyncBlacklist {
    pub fn is_server_blacklisted(&self, server: &str) -> bool {
        self.servers.contains(server)
    }

    pub fn is_region_blacklisted(&self, region: &str) -> bool {
        self.regions.contains(region)
    }

    pub fn from_env() -> Self {
        Self {
            servers: parse_list(std::env::var("SYNCBRIDGE_BLACKLIST_SERVERS").ok()),
            regions: parse_list(std::env::var("SYNCBRIDGE_BLACKLIST_REGIONS").ok()),
        }
    }
}

// ============================================================================
// SYNC CONFIG
// ============================================================================

/// Configuration consumed by the sync engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Stable identity of this server process.
    pub owner_id: OwnerId,
    #[serde(with = "duration_millis")]
    pub lease_ttl: Duration,
    #[serde(with = "duration_millis")]
    pub heartbeat_interval: Duration,
    pub acquire_attempts: u32,
    #[serde(with = "duration_millis")]
    pub acquire_backoff: Duration,
    #[serde(default)]
    pub toggles: FeatureToggles,
    #[serde(default)]
    pub blacklist: SyncBlacklist,
    #[serde(default)]
    pub table_prefix: String,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            owner_id: OwnerId::from(DEFAULT_OWNER_ID),
            lease_ttl: Duration::from_millis(DEFAULT_LEASE_TTL_MS),
            heartbeat_interval: Duration::from_secs(DEFAULT_HEARTBEAT_SECS),
            acquire_attempts: DEFAULT_ACQUIRE_ATTEMPTS,
            acquire_backoff: Duration::from_millis(DEFAULT_ACQUIRE_BACKOFF_MS),
            toggles: FeatureToggles::default(),
            blacklist: SyncBlacklist::default(),
            table_prefix: DEFAULT_TABLE_PREFIX.to_string(),
        }
    }
}

impl SyncConfig {
    /// Create a configuration from environment variables.
    ///
    /// # Environment Variables
    /// - `SYNCBRIDGE_SERVER_ID`: owner identity (default: `default-server`)
    /// - `SYNCBRIDGE_LOCK_TIMEOUT_MS`: lease ttl (default: 60000)
    /// - `SYNCBRIDGE_HEARTBEAT_SECS`: heartbeat interval (default: 30)
    /// - `SYNCBRIDGE_ACQUIRE_ATTEMPTS`: acquire attempts (default: 20)
    /// - `SYNCBRIDGE_ACQUIRE_BACKOFF_MS`: delay between attempts (default: 500)
    /// - `SYNCBRIDGE_TABLE_PREFIX`: table name prefix (default: empty)
    /// - `SYNCBRIDGE_SYNC_<GROUP>`: per-group toggles
    /// - `SYNCBRIDGE_BLACKLIST_SERVERS` / `SYNCBRIDGE_BLACKLIST_REGIONS`: comma separated
    pub fn from_env() -> Self {
        let owner_id = std::env::var("SYNCBRIDGE_SERVER_ID")
            .ok()
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_OWNER_ID.to_string());

        Self {
            owner_id: OwnerId::from(owner_id.trim()),
            lease_ttl: Duration::from_millis(
                std::env::var("SYNCBRIDGE_LOCK_TIMEOUT_MS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(DEFAULT_LEASE_TTL_MS),
            ),
            heartbeat_interval: Duration::from_secs(
                std::env::var("SYNCBRIDGE_HEARTBEAT_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(DEFAULT_HEARTBEAT_SECS),
            ),
            acquire_attempts: std::env::var("SYNCBRIDGE_ACQUIRE_ATTEMPTS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_ACQUIRE_ATTEMPTS),
            acquire_backoff: Duration::from_millis(
                std::env::var("SYNCBRIDGE_ACQUIRE_BACKOFF_MS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(DEFAULT_ACQUIRE_BACKOFF_MS),
            ),
            toggles: FeatureToggles::from_env(),
            blacklist: SyncBlacklist::from_env(),
            table_prefix: std::env::var("SYNCBRIDGE_TABLE_PREFIX")
                .unwrap_or_else(|_| DEFAULT_TABLE_PREFIX.to_string()),
        }
    }

    pub fn with_owner(mut self, owner: impl Into<OwnerId>) -> Self {
        self.owner_id = owner.into();
        self
    }

    pub fn with_lease_ttl(mut self, ttl: Duration) -> Self {
        self.lease_ttl = ttl;
        self
    }

    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    pub fn with_acquire_policy(mut self, attempts: u32, backoff: Duration) -> Self {
        self.acquire_attempts = attempts;
        self.acquire_backoff = backoff;
        self
    }

    pub fn with_toggles(mut self, toggles: FeatureToggles) -> Self {
        self.toggles = toggles;
        self
    }

    pub fn with_blacklist(mut self, blacklist: SyncBlacklist) -> Self {
        self.blacklist = blacklist;
        self
    }

    pub fn with_table_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.table_prefix = prefix.into();
        self
    }

    /// Fully qualified record table name.
    pub fn table_name(&self) -> String {
        format!("{}{}", self.table_prefix, RECORD_TABLE_BASE)
    }

    /// Whether this process runs with the shared fallback identity.
    pub fn uses_default_owner(&self) -> bool {
        self.owner_id.as_str() == DEFAULT_OWNER_ID
    }

    /// Validate the configuration.
    pub fn validate(&self) -> SyncResult<()> {
        if self.owner_id.as_str().trim().is_empty() {
            return Err(SyncError::Config(ConfigError::MissingRequired {
                field: "owner_id".to_string(),
            }));
        }

        if self.lease_ttl.is_zero() {
            return Err(SyncError::Config(ConfigError::InvalidValue {
                field: "lease_ttl".to_string(),
                value: format!("{:?}", self.lease_ttl),
                reason: "lease_ttl must be greater than 0".to_string(),
            }));
        }

        if self.heartbeat_interval.is_zero() || self.heartbeat_interval >= self.lease_ttl {
            return Err(SyncError::Config(ConfigError::InvalidValue {
                field: "heartbeat_interval".to_string(),
                value: format!("{:?}", self.heartbeat_interval),
                reason: "heartbeat_interval must be positive and shorter than lease_ttl"
                    .to_string(),
            }));
        }

        if self.acquire_attempts == 0 {
            return Err(SyncError::Config(ConfigError::InvalidValue {
                field: "acquire_attempts".to_string(),
                value: self.acquire_attempts.to_string(),
                reason: "acquire_attempts must be at least 1".to_string(),
            }));
        }

        if !self
            .table_prefix
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
        {
            return Err(SyncError::Config(ConfigError::InvalidValue {
                field: "table_prefix".to_string(),
                value: self.table_prefix.clone(),
                reason: "table_prefix may only contain ASCII letters, digits and '_'".to_string(),
            }));
        }

        Ok(())
    }
}

// ============================================================================
// HELPERS
// ============================================================================

pub fn parse_bool(s: &str) -> Option<bool> {
    match s.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn parse_list(raw: Option<String>) -> BTreeSet<String> {
    raw.map(|s| {
        s.split(',')
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string)
            .collect()
    })
    .unwrap_or_default()
}

mod duration_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}
