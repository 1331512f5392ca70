//! Error types for the SCD engine.

use crate::{EntityId, EntityType, Version};
use thiserror::Error;

/// All possible errors from the SCD engine.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    // Payload errors
    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    #[error("payload has no identity: 'id' must be a non-empty string")]
    MissingIdentity,

    #[error("unknown entity type: {0}")]
    UnknownEntityType(EntityType),

    #[error("cannot decode {kind} payload: {message}")]
    Decode { kind: EntityType, message: String },

    #[error("invalid identifier: {0}")]
    InvalidIdentifier(String),

    // Fencing errors
    #[error("version mismatch on {id}: expected {expected}, current is {actual}")]
    VersionMismatch {
        id: EntityId,
        expected: Version,
        actual: Version,
    },

    #[error("uid mismatch on {id} at version {version}")]
    UidMismatch { id: EntityId, version: Version },

    #[error("entity already exists: {0}")]
    AlreadyExists(EntityId),

    #[error("entity not found: {0}")]
    EntityNotFound(EntityId),

    // State errors
    #[error("broken version family: {0}")]
    BrokenFamily(String),

    #[error("invalid transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },
}

impl Error {
    /// True when the error means another writer advanced the family first.
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            Error::VersionMismatch { .. } | Error::UidMismatch { .. } | Error::AlreadyExists(_)
        )
    }
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = Error::EntityNotFound("job_1".into());
        assert_eq!(err.to_string(), "entity not found: job_1");

        let err = Error::VersionMismatch {
            id: "job_1".into(),
            expected: 2,
            actual: 3,
        };
        assert_eq!(
            err.to_string(),
            "version mismatch on job_1: expected 2, current is 3"
        );

        let err = Error::InvalidTransition {
            from: "completed".into(),
            to: "active".into(),
        };
        assert_eq!(err.to_string(), "invalid transition from completed to active");
    }

    #[test]
    fn conflict_classification() {
        assert!(Error::AlreadyExists("a".into()).is_conflict());
        assert!(Error::UidMismatch {
            id: "a".into(),
            version: 1
        }
        .is_conflict());
        assert!(!Error::EntityNotFound("a".into()).is_conflict());
        assert!(!Error::MissingIdentity.is_conflict());
    }
}
