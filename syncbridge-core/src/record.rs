//! Stored record and lease types.
//!
//! A [`Record`] is one row of the record store. Its lock columns form a
//! [`Lease`]: owner plus acquisition time. The ttl is a process-wide setting
//! and is never stored per row.

use crate::{EntityId, EpochMillis, OwnerId, Timestamp};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Serialized state blob as stored in the `data` column.
pub type StateBlob = String;

// ============================================================================
// LEASE
// ============================================================================

/// Time-bounded claim of exclusive ownership over a record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lease {
    pub owner: OwnerId,
    pub acquired_at: EpochMillis,
}

impl Lease {
    pub fn is_held_by(&self, owner: &OwnerId) -> bool {
        &self.owner == owner
    }

    /// Oldest lease timestamp that is still live at `now`.
    pub fn stale_before(now: EpochMillis, ttl: Duration) -> EpochMillis {
        now - ttl_millis(ttl)
    }
}

pub fn ttl_millis(ttl: Duration) -> i64 {
    i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX)
}

// ============================================================================
// RECORD
// ============================================================================

/// One entity's row in the record store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub id: EntityId,
    pub data: Option<StateBlob>,
    pub is_locked: bool,
    pub locking_owner: Option<OwnerId>,
    pub lease_timestamp: Option<EpochMillis>,
    pub last_updated: Timestamp,
}

impl Record {
    /// Empty locked row created by the first acquire of an unseen id.
    pub fn placeholder(id: EntityId, owner: OwnerId, now: EpochMillis) -> Self {
        Self {
            id,
            data: None,
            is_locked: true,
            locking_owner: Some(owner),
            lease_timestamp: Some(now),
            last_updated: chrono::Utc::now(),
        }
    }

    pub fn lease(&self) -> Option<Lease> {
        if !self.is_locked {
            return None;
        }
        Some(Lease {
            owner: self.locking_owner.clone()?,
            acquired_at: self.lease_timestamp.unwrap_or(0),
        })
    }

    /// Whether a new owner may take this record, given the oldest lease
    /// timestamp still considered live.
    ///
    /// Rows with a NULL lease timestamp (legacy rows) are claimable.
    pub fn is_claimable(&self, stale_before: EpochMillis) -> bool {
        if !self.is_locked {
            return true;
        }
        match self.lease_timestamp {
            Some(ts) => ts < stale_before,
            None => true,
        }
    }

    pub fn is_held_by(&self, owner: &OwnerId) -> bool {
        self.locking_owner.as_ref() == Some(owner)
    }

    pub fn lock(&mut self, owner: OwnerId, now: EpochMillis) {
        self.is_locked = true;
        self.locking_owner = Some(owner);
        self.lease_timestamp = Some(now);
        self.touch();
    }

    pub fn clear_lock(&mut self) {
        self.is_locked = false;
        self.locking_owner = None;
        self.lease_timestamp = None;
        self.touch();
    }

    pub fn touch(&mut self) {
        self.last_updated = chrono::Utc::now();
    }

    /// Locked rows carry an owner; unlocked rows carry neither owner nor timestamp.
    pub fn lock_fields_consistent(&self) -> bool {
        if self.is_locked {
            self.locking_owner.is_some()
        } else {
            self.locking_owner.is_none() && self.lease_timestamp.is_none()
        }
    }
}

/// Whether a stored blob represents "nothing saved yet".
pub fn is_empty_blob(blob: &str) -> bool {
    let trimmed = blob.trim();
    trimmed.is_empty() || trimmed == "{}"
}
