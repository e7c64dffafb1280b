//! syncbridge Admin - Operator Tooling
//!
//! Backs the `syncbridge-admin` binary: logging setup, store construction
//! from the environment, and the operator commands themselves.

pub mod commands;
pub mod telemetry;

use syncbridge_core::SyncError;
use thiserror::Error;

/// Errors surfaced by the admin binary.
#[derive(Debug, Error)]
pub enum AdminError {
    #[error(transparent)]
    Sync(#[from] SyncError),

    #[error("Failed to initialize logging: {0}")]
    Logging(String),

    #[error("Invalid entity id '{value}': {reason}")]
    InvalidEntityId { value: String, reason: String },

    #[error("Failed to render output: {0}")]
    Output(#[from] serde_json::Error),
}

pub type AdminResult<T> = Result<T, AdminError>;
