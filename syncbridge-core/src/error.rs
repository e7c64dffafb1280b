//! Error types for syncbridge operations

use crate::EntityId;
use thiserror::Error;

/// Storage layer errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StorageError {
    #[error("Record store unavailable: {reason}")]
    Unavailable { reason: String },

    #[error("Query failed during {operation}: {reason}")]
    QueryFailed { operation: String, reason: String },

    #[error("Schema setup failed: {reason}")]
    SchemaSetup { reason: String },

    #[error("Storage lock poisoned")]
    LockPoisoned,
}

impl StorageError {
    pub fn query(operation: impl Into<String>, reason: impl ToString) -> Self {
        StorageError::QueryFailed {
            operation: operation.into(),
            reason: reason.to_string(),
        }
    }

    pub fn unavailable(reason: impl ToString) -> Self {
        StorageError::Unavailable {
            reason: reason.to_string(),
        }
    }
}

/// State codec errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CodecError {
    #[error("Corrupt item in {group} slot {slot}: {reason}")]
    CorruptItem {
        group: String,
        slot: usize,
        reason: String,
    },

    #[error("Failed to encode {group}: {reason}")]
    Encode { group: String, reason: String },

    #[error("Malformed snapshot: {reason}")]
    MalformedSnapshot { reason: String },

    #[error("Live entity unavailable: {reason}")]
    EntityUnavailable { reason: String },
}

/// Lease ownership errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LeaseError {
    #[error("Lease for {id} is held by another owner")]
    Contended { id: EntityId },

    #[error("Lease for {id} is no longer held by {owner}")]
    LeaseLost { id: EntityId, owner: String },
}

/// Handoff message decoding errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum HandoffError {
    #[error("Handoff payload truncated")]
    Truncated,

    #[error("Handoff payload field is not valid UTF-8")]
    InvalidUtf8,

    #[error("Unknown handoff action: {action}")]
    UnknownAction { action: String },

    #[error("Invalid entity id in handoff: {value}")]
    InvalidEntityId { value: String },

    #[error("Handoff field too long: {len} bytes")]
    FieldTooLong { len: usize },
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required configuration field: {field}")]
    MissingRequired { field: String },

    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },
}

/// Master error type for all syncbridge errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SyncError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("Lease error: {0}")]
    Lease(#[from] LeaseError),

    #[error("Handoff error: {0}")]
    Handoff(#[from] HandoffError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}

/// Result type alias for syncbridge operations.
pub type SyncResult<T> = Result<T, SyncError>;

// ============================================================================
// ERROR TAXONOMY
// ============================================================================

/// Coarse classification used for log levels and user-facing decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Lock held elsewhere. Expected, retried.
    Contention,
    /// Lock reassigned while we thought we held it.
    LeaseLost,
    /// Corrupt modern-form item data.
    DecodeFailure,
    /// Connectivity or query failure against the record store.
    StoreUnavailable,
    /// Snapshot could not be built or serialized.
    EncodeFailure,
    Configuration,
    Protocol,
}

impl ErrorCategory {
    /// Whether this category is part of normal operation and should stay out
    /// of error-level logs.
    pub fn is_expected(&self) -> bool {
        matches!(self, ErrorCategory::Contention | ErrorCategory::LeaseLost)
    }
}

impl SyncError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            SyncError::Storage(_) => ErrorCategory::StoreUnavailable,
            SyncError::Codec(CodecError::CorruptItem { .. })
            | SyncError::Codec(CodecError::MalformedSnapshot { .. }) => {
                ErrorCategory::DecodeFailure
            }
            SyncError::Codec(_) => ErrorCategory::EncodeFailure,
            SyncError::Lease(LeaseError::Contended { .. }) => ErrorCategory::Contention,
            SyncError::Lease(LeaseError::LeaseLost { .. }) => ErrorCategory::LeaseLost,
            SyncError::Handoff(_) => ErrorCategory::Protocol,
            SyncError::Config(_) => ErrorCategory::Configuration,
        }
    }
}

// ============================================================================
// DENIALS
// ============================================================================

/// Reason an activation was refused, shown to the end user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DenialReason {
    /// Another server still holds the lease after the full poll window.
    Contended,
    /// Stored item data could not be decoded.
    CorruptData,
    /// The record store could not be reached.
    StoreUnavailable,
    /// Restored state could not be applied to the live entity.
    ApplyFailed,
}

impl DenialReason {
    pub fn message(&self) -> &'static str {
        match self {
            DenialReason::Contended => {
                "Your data is still being saved by another server. Please try again."
            }
            DenialReason::CorruptData => {
                "A critical error occurred while loading your inventory. Please contact an administrator."
            }
            DenialReason::StoreUnavailable => {
                "Player data storage is temporarily unavailable. Please try again shortly."
            }
            DenialReason::ApplyFailed => "Could not process your player data. Please relog.",
        }
    }

    /// Map an activation error onto the denial shown to the user.
    pub fn for_error(err: &SyncError) -> Self {
        match err.category() {
            ErrorCategory::Contention | ErrorCategory::LeaseLost => DenialReason::Contended,
            ErrorCategory::DecodeFailure => DenialReason::CorruptData,
            ErrorCategory::StoreUnavailable => DenialReason::StoreUnavailable,
            _ => DenialReason::ApplyFailed,
        }
    }
}

impl std::fmt::Display for DenialReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.message())
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_error_display_query_failed() {
        let err = StorageError::query("acquire", "connection reset");
        let msg = format!("{}", err);
        assert!(msg.contains("acquire"));
        assert!(msg.contains("connection reset"));
    }

    #[test]
    fn test_codec_error_display_corrupt_item() {
        let err = CodecError::CorruptItem {
            group: "inventory".to_string(),
            slot: 7,
            reason: "bad base64".to_string(),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("inventory"));
        assert!(msg.contains("slot 7"));
    }

    #[test]
    fn test_sync_error_from_storage_error() {
        let err: SyncError = StorageError::LockPoisoned.into();
        assert!(matches!(err, SyncError::Storage(_)));
        assert_eq!(err.category(), ErrorCategory::StoreUnavailable);
    }

    #[test]
    fn test_category_classification() {
        let id = EntityId::nil();
        let contended: SyncError = LeaseError::Contended { id }.into();
        assert_eq!(contended.category(), ErrorCategory::Contention);
        assert!(contended.category().is_expected());

        let lost: SyncError = LeaseError::LeaseLost {
            id,
            owner: "lobby-1".to_string(),
        }
        .into();
        assert_eq!(lost.category(), ErrorCategory::LeaseLost);
        assert!(lost.category().is_expected());

        let corrupt: SyncError = CodecError::CorruptItem {
            group: "armor".to_string(),
            slot: 0,
            reason: "x".to_string(),
        }
        .into();
        assert_eq!(corrupt.category(), ErrorCategory::DecodeFailure);
        assert!(!corrupt.category().is_expected());

        let encode: SyncError = CodecError::EntityUnavailable {
            reason: "gone".to_string(),
        }
        .into();
        assert_eq!(encode.category(), ErrorCategory::EncodeFailure);
    }

    #[test]
    fn test_denial_for_error() {
        let corrupt: SyncError = CodecError::CorruptItem {
            group: "inventory".to_string(),
            slot: 3,
            reason: "x".to_string(),
        }
        .into();
        assert_eq!(DenialReason::for_error(&corrupt), DenialReason::CorruptData);

        let down: SyncError = StorageError::unavailable("timeout").into();
        assert_eq!(DenialReason::for_error(&down), DenialReason::StoreUnavailable);
        assert!(DenialReason::Contended.message().contains("try again"));
    }
}
