//! Unified error handling for the client.

use crate::cache::CacheError;
use crate::config::ConfigError;
use crate::gateway::GatewayError;
use scd_engine::{EntityId, EntityType, FailureReason};

/// Client error type.
///
/// Callers only ever see success or a failure that could not be recovered;
/// [`ClientError::exhaustion`] says which recovery ran out.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    #[error("Not found: {entity_type}/{id}")]
    NotFound {
        entity_type: EntityType,
        id: EntityId,
    },

    #[error("Conflict on {entity_type}/{id} persisted after {attempts} attempts")]
    ConflictExhausted {
        entity_type: EntityType,
        id: EntityId,
        attempts: u32,
    },

    #[error("{entity_type}/{id} kept disappearing after {attempts} create attempts")]
    NotFoundUnrecoverable {
        entity_type: EntityType,
        id: EntityId,
        attempts: u32,
    },

    #[error("Transport failure after {attempts} attempts: {source}")]
    TransportFailure {
        attempts: u32,
        #[source]
        source: GatewayError,
    },

    #[error("Deadline exceeded during {operation}")]
    DeadlineExceeded { operation: &'static str },

    #[error("Gateway error: {0}")]
    Gateway(GatewayError),

    #[error("Engine error: {0}")]
    Engine(#[from] scd_engine::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),
}

/// Which recovery a failed call ran out of.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Exhaustion {
    Conflict,
    NotFound,
    Transport,
    Deadline,
}

impl ClientError {
    /// The exhausted recovery, or `None` for failures that are never retried.
    pub fn exhaustion(&self) -> Option<Exhaustion> {
        match self {
            ClientError::ConflictExhausted { .. } => Some(Exhaustion::Conflict),
            ClientError::NotFoundUnrecoverable { .. } => Some(Exhaustion::NotFound),
            ClientError::TransportFailure { .. } => Some(Exhaustion::Transport),
            ClientError::DeadlineExceeded { .. } => Some(Exhaustion::Deadline),
            _ => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            ClientError::NotFound { .. } | ClientError::Gateway(GatewayError::NotFound { .. })
        )
    }
}

impl From<GatewayError> for ClientError {
    fn from(err: GatewayError) -> Self {
        match err {
            GatewayError::NotFound { entity_type, id } => ClientError::NotFound { entity_type, id },
            GatewayError::Invalid(message) => ClientError::InvalidPayload(message),
            other => ClientError::Gateway(other),
        }
    }
}

impl From<&ClientError> for FailureReason {
    fn from(err: &ClientError) -> Self {
        match err {
            ClientError::InvalidPayload(detail) => FailureReason::InvalidPayload(detail.clone()),
            ClientError::NotFound { .. } | ClientError::NotFoundUnrecoverable { .. } => {
                FailureReason::NotFound
            }
            ClientError::ConflictExhausted { .. } => FailureReason::Conflict,
            ClientError::TransportFailure { source, .. } => {
                FailureReason::Transport(source.to_string())
            }
            ClientError::DeadlineExceeded { .. } => FailureReason::DeadlineExceeded,
            ClientError::Gateway(err) => FailureReason::from(err),
            ClientError::Engine(err) => FailureReason::from(err),
            other => FailureReason::Rejected(other.to_string()),
        }
    }
}

/// Result type alias for client operations.
pub type Result<T> = std::result::Result<T, ClientError>;
