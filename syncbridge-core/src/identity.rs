//! Identity and time types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Timestamp type using UTC timezone.
pub type Timestamp = DateTime<Utc>;

/// Milliseconds since the Unix epoch, as stored in `lease_timestamp`.
pub type EpochMillis = i64;

/// Stable identity of a synchronized entity.
///
/// Rendered as the hyphenated 36-character UUID string in the record store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(Uuid);

impl EntityId {
    pub fn new(id: Uuid) -> Self {
        Self(id)
    }

    /// Generate a new timestamp-sortable id.
    pub fn now_v7() -> Self {
        Self(Uuid::now_v7())
    }

    pub fn nil() -> Self {
        Self(Uuid::nil())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }

    /// Database string representation.
    pub fn as_db_string(&self) -> String {
        self.0.hyphenated().to_string()
    }
}

impl From<Uuid> for EntityId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.hyphenated())
    }
}

impl FromStr for EntityId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s.trim()).map(Self)
    }
}

/// Identity of a server process that can hold leases.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OwnerId(String);

impl OwnerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OwnerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for OwnerId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for OwnerId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl AsRef<str> for OwnerId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entity_id_db_string_is_fixed_length() {
        let id = EntityId::now_v7();
        let s = id.as_db_string();
        assert_eq!(s.len(), 36);
        assert_eq!(s.parse::<EntityId>().unwrap(), id);
    }

    #[test]
    fn test_entity_id_parse_rejects_garbage() {
        assert!("not-a-uuid".parse::<EntityId>().is_err());
    }

    #[test]
    fn test_owner_id_display() {
        let owner = OwnerId::from("survival-2");
        assert_eq!(owner.to_string(), "survival-2");
        assert_eq!(owner.as_str(), "survival-2");
    }
}
