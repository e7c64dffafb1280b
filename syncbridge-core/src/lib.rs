//! syncbridge Core - Data Types
//!
//! Identities, records and leases, the error taxonomy, configuration, and the
//! state codec that turns a live entity into a stored blob and back.
//! No I/O lives here; storage and orchestration depend on this crate.

pub mod clock;
pub mod config;
pub mod effect;
pub mod entity;
pub mod error;
pub mod handoff;
pub mod identity;
pub mod item;
pub mod record;
pub mod snapshot;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{
    FeatureToggles, FieldGroup, SyncBlacklist, SyncConfig, DEFAULT_ACQUIRE_ATTEMPTS,
    DEFAULT_ACQUIRE_BACKOFF_MS, DEFAULT_HEARTBEAT_SECS, DEFAULT_LEASE_TTL_MS, DEFAULT_OWNER_ID,
};
pub use effect::{EffectKind, StatusEffect, StoredEffect};
pub use entity::{
    AdvancementState, EntityResult, ExperienceState, FoodState, LiveEntity, Location,
};
pub use error::{
    CodecError, ConfigError, DenialReason, ErrorCategory, HandoffError, LeaseError, StorageError,
    SyncError, SyncResult,
};
pub use handoff::{HandoffAction, HandoffMessage, HANDOFF_CHANNEL};
pub use identity::{EntityId, EpochMillis, OwnerId, Timestamp};
pub use item::{EncodedSlot, ItemStack, SlotFormat};
pub use record::{is_empty_blob, ttl_millis, Lease, Record, StateBlob};
pub use snapshot::{ApplyReport, RestoredState, Snapshot, StateCodec, SNAPSHOT_FORMAT_VERSION};
