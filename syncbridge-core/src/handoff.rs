//! Handoff message between the routing tier and servers.
//!
//! The payload is two length-prefixed UTF-8 strings, `action` then
//! `entity_id`. Each string is a big-endian `u16` byte length followed by
//! the bytes.

use crate::{EntityId, HandoffError};
use std::fmt;

/// Messaging channel the handoff travels on.
pub const HANDOFF_CHANNEL: &str = "syncbridge:main";

/// Wire tag for [`HandoffAction::DeactivateAndRelease`].
pub const SAVE_AND_RELEASE_TAG: &str = "SaveAndRelease";

/// Action requested by the routing tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HandoffAction {
    /// Save the entity's state and release its lease now.
    DeactivateAndRelease,
}

impl HandoffAction {
    pub fn wire_tag(&self) -> &'static str {
        match self {
            HandoffAction::DeactivateAndRelease => SAVE_AND_RELEASE_TAG,
        }
    }

    pub fn from_wire_tag(tag: &str) -> Result<Self, HandoffError> {
        match tag {
            SAVE_AND_RELEASE_TAG => Ok(HandoffAction::DeactivateAndRelease),
            other => Err(HandoffError::UnknownAction {
                action: other.to_string(),
            }),
        }
    }
}

impl fmt::Display for HandoffAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HandoffAction::DeactivateAndRelease => f.write_str("deactivate-and-release"),
        }
    }
}

/// A decoded handoff message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandoffMessage {
    pub action: HandoffAction,
    pub entity_id: EntityId,
}

impl HandoffMessage {
    pub fn deactivate_and_release(entity_id: EntityId) -> Self {
        Self {
            action: HandoffAction::DeactivateAndRelease,
            entity_id,
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, HandoffError> {
        let mut buf = Vec::with_capacity(48);
        write_utf(&mut buf, self.action.wire_tag())?;
        write_utf(&mut buf, &self.entity_id.to_string())?;
        Ok(buf)
    }

    pub fn decode(payload: &[u8]) -> Result<Self, HandoffError> {
        let mut cursor = payload;
        let action = HandoffAction::from_wire_tag(&read_utf(&mut cursor)?)?;
        let raw_id = read_utf(&mut cursor)?;
        let entity_id = raw_id
            .parse::<EntityId>()
            .map_err(|_| HandoffError::InvalidEntityId { value: raw_id })?;
        Ok(Self { action, entity_id })
    }
}

fn write_utf(buf: &mut Vec<u8>, value: &str) -> Result<(), HandoffError> {
    let bytes = value.as_bytes();
    let len = u16::try_from(bytes.len())
        .map_err(|_| HandoffError::FieldTooLong { len: bytes.len() })?;
    buf.extend_from_slice(&len.to_be_bytes());
    buf.extend_from_slice(bytes);
    Ok(())
}

fn read_utf(cursor: &mut &[u8]) -> Result<String, HandoffError> {
    let (len_bytes, rest) = cursor.split_first_chunk::<2>().ok_or(HandoffError::Truncated)?;
    let len = u16::from_be_bytes(*len_bytes) as usize;
    if rest.len() < len {
        return Err(HandoffError::Truncated);
    }
    let (field, rest) = rest.split_at(len);
    *cursor = rest;
    String::from_utf8(field.to_vec()).map_err(|_| HandoffError::InvalidUtf8)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_layout() {
        let id = EntityId::now_v7();
        let bytes = HandoffMessage::deactivate_and_release(id).encode().unwrap();
        assert_eq!(&bytes[0..2], &[0, 14]);
        assert_eq!(&bytes[2..16], b"SaveAndRelease");
        assert_eq!(&bytes[16..18], &[0, 36]);
        assert_eq!(bytes.len(), 18 + 36);
        assert_eq!(HandoffMessage::decode(&bytes).unwrap().entity_id, id);
    }

    #[test]
    fn test_decode_truncated() {
        let id = EntityId::now_v7();
        let bytes = HandoffMessage::deactivate_and_release(id).encode().unwrap();
        assert_eq!(
            HandoffMessage::decode(&bytes[..bytes.len() - 1]),
            Err(HandoffError::Truncated)
        );
        assert_eq!(HandoffMessage::decode(&[0]), Err(HandoffError::Truncated));
    }

    #[test]
    fn test_decode_unknown_action() {
        let mut buf = Vec::new();
        write_utf(&mut buf, "Teleport").unwrap();
        write_utf(&mut buf, &EntityId::nil().to_string()).unwrap();
        assert!(matches!(
            HandoffMessage::decode(&buf),
            Err(HandoffError::UnknownAction { .. })
        ));
    }

    #[test]
    fn test_decode_bad_entity_id() {
        let mut buf = Vec::new();
        write_utf(&mut buf, SAVE_AND_RELEASE_TAG).unwrap();
        write_utf(&mut buf, "p1").unwrap();
        assert!(matches!(
            HandoffMessage::decode(&buf),
            Err(HandoffError::InvalidEntityId { .. })
        ));
    }

    #[test]
    fn test_decode_invalid_utf8() {
        let buf = [0u8, 2, 0xff, 0xfe];
        assert_eq!(HandoffMessage::decode(&buf), Err(HandoffError::InvalidUtf8));
    }

    #[test]
    fn test_action_display_is_logical_name() {
        assert_eq!(
            HandoffAction::DeactivateAndRelease.to_string(),
            "deactivate-and-release"
        );
    }
}
