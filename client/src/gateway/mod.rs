//! Remote entity gateway.
//!
//! The gateway exposes the store's primitive operations. The store itself
//! owns version assignment and the fencing check; the client only decides
//! what to submit and how to react.

mod http;
mod memory;
mod wire;

pub use http::HttpGateway;
pub use memory::MemoryGateway;
pub use wire::{
    BatchGetRequest, BatchUpdateRequest, BatchUpdateResponse, ErrorBody, UpdateRequest,
};

use async_trait::async_trait;
use scd_engine::{
    Entity, EntityId, EntityQuery, EntityType, FailureReason, Submission, Version,
};
use std::collections::BTreeMap;

/// Gateway error type.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum GatewayError {
    #[error("{entity_type}/{id} not found")]
    NotFound {
        entity_type: EntityType,
        id: EntityId,
    },

    #[error("Conflict on {entity_type}/{id}: {detail}")]
    Conflict {
        entity_type: EntityType,
        id: EntityId,
        detail: String,
    },

    #[error("Invalid request: {0}")]
    Invalid(String),

    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Rejected: {0}")]
    Rejected(String),
}

impl GatewayError {
    /// Worth retrying as is: the store may answer next time.
    pub fn is_transient(&self) -> bool {
        matches!(self, GatewayError::Unavailable(_) | GatewayError::Timeout(_))
    }

    /// Map an engine error raised while applying a submission to
    /// `entity_type`/`id`.
    pub fn from_engine(entity_type: &str, id: &str, err: scd_engine::Error) -> Self {
        match err {
            e if e.is_conflict() => GatewayError::Conflict {
                entity_type: entity_type.to_string(),
                id: id.to_string(),
                detail: e.to_string(),
            },
            scd_engine::Error::EntityNotFound(_) => GatewayError::NotFound {
                entity_type: entity_type.to_string(),
                id: id.to_string(),
            },
            scd_engine::Error::BrokenFamily(detail) => GatewayError::Rejected(detail),
            other => GatewayError::Invalid(other.to_string()),
        }
    }
}

impl From<&GatewayError> for FailureReason {
    fn from(err: &GatewayError) -> Self {
        match err {
            GatewayError::Conflict { .. } => FailureReason::Conflict,
            GatewayError::NotFound { .. } => FailureReason::NotFound,
            GatewayError::Invalid(detail) => FailureReason::InvalidPayload(detail.clone()),
            GatewayError::Unavailable(_) | GatewayError::Timeout(_) => {
                FailureReason::Transport(err.to_string())
            }
            GatewayError::InvalidResponse(detail) | GatewayError::Rejected(detail) => {
                FailureReason::Rejected(detail.clone())
            }
        }
    }
}

/// Result of a batch write: accepted entities and per-id rejections.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct BatchUpdateResult {
    pub updated: BTreeMap<EntityId, Entity>,
    pub rejected: BTreeMap<EntityId, FailureReason>,
}

/// Primitive operations of a remote versioned entity store.
#[async_trait]
pub trait EntityGateway: Send + Sync {
    /// Current version of one identity.
    async fn get_latest_version(&self, entity_type: &str, id: &str) -> Result<Entity, GatewayError>;

    /// One specific version.
    async fn get_version(
        &self,
        entity_type: &str,
        id: &str,
        version: Version,
    ) -> Result<Entity, GatewayError>;

    /// Every version, ascending. An absent identity is `NotFound`.
    async fn get_version_history(
        &self,
        entity_type: &str,
        id: &str,
    ) -> Result<Vec<Entity>, GatewayError>;

    async fn query(&self, entity_type: &str, query: &EntityQuery) -> Result<Vec<Entity>, GatewayError>;

    /// Append the next version if the submission's expectation holds.
    async fn update(&self, submission: &Submission) -> Result<Entity, GatewayError>;

    /// Current versions by id; missing ids are absent from the map.
    async fn batch_get(
        &self,
        entity_type: &str,
        ids: &[EntityId],
    ) -> Result<BTreeMap<EntityId, Entity>, GatewayError>;

    /// Apply each submission independently. Not atomic.
    async fn batch_update(
        &self,
        entity_type: &str,
        submissions: &[Submission],
    ) -> Result<BatchUpdateResult, GatewayError>;
}
