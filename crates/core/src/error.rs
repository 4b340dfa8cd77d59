//! Domain error model.

use thiserror::Error;

/// Result type used across the domain layer.
pub type DomainResult<T> = Result<T, DomainError>;

/// Domain-level error.
///
/// Keep this focused on deterministic failures (malformed identifiers,
/// timestamps, status values). Collaborator failures belong to the
/// infrastructure layer.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// A value failed validation (e.g. malformed input).
    #[error("validation failed: {0}")]
    Validation(String),

    /// An identifier was invalid (e.g. empty bucket name).
    #[error("invalid identifier: {0}")]
    InvalidId(String),

    /// A timestamp could not be parsed as RFC 3339 / ISO-8601.
    #[error("invalid timestamp: {0}")]
    InvalidTimestamp(String),

    /// A status string is not one of the known API statuses.
    #[error("unknown status: {0}")]
    UnknownStatus(String),
}

impl DomainError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn invalid_id(msg: impl Into<String>) -> Self {
        Self::InvalidId(msg.into())
    }

    pub fn invalid_timestamp(msg: impl Into<String>) -> Self {
        Self::InvalidTimestamp(msg.into())
    }

    pub fn unknown_status(msg: impl Into<String>) -> Self {
        Self::UnknownStatus(msg.into())
    }
}
