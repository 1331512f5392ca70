//! In-process reference gateway.
//!
//! Holds every version family in memory and applies submissions with the
//! semantics a real store provides: the fencing check and the append happen
//! atomically under the family's map entry lock.

use super::{BatchUpdateResult, EntityGateway, GatewayError};
use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use scd_engine::{
    generate_uid, Entity, EntityId, EntityKey, EntityQuery, FailureReason, Submission, Version,
    VersionFamily,
};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Version families keyed by `(entity_type, id)`.
#[derive(Debug, Default)]
pub struct MemoryGateway {
    families: DashMap<EntityKey, VersionFamily>,
}

impl MemoryGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a new gateway wrapped in Arc for sharing.
    pub fn new_shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Number of identities across all entity types.
    pub fn len(&self) -> usize {
        self.families.len()
    }

    pub fn is_empty(&self) -> bool {
        self.families.is_empty()
    }

    /// Seed a family, replacing any existing one with the same key.
    pub fn insert_family(&self, family: VersionFamily) {
        self.families.insert(family.key(), family);
    }

    /// Apply one submission atomically.
    pub fn apply(&self, submission: &Submission) -> Result<Entity, GatewayError> {
        if submission.entity_type.is_empty() || submission.id.is_empty() {
            return Err(GatewayError::Invalid(
                "entity type and id are required".into(),
            ));
        }

        let key = EntityKey::new(submission.entity_type.clone(), submission.id.clone());
        let uid = generate_uid(&submission.entity_type);
        let now = chrono::Utc::now().timestamp_millis();
        let to_gateway =
            |err| GatewayError::from_engine(&submission.entity_type, &submission.id, err);

        match self.families.entry(key) {
            Entry::Occupied(mut family) => family
                .get_mut()
                .append(submission, uid, now)
                .cloned()
                .map_err(to_gateway),
            Entry::Vacant(slot) => {
                let family = VersionFamily::create(submission, uid, now).map_err(to_gateway)?;
                let created = family.current().clone();
                slot.insert(family);
                tracing::debug!(key = %created.envelope.key(), "Version family created");
                Ok(created)
            }
        }
    }

    fn not_found(entity_type: &str, id: &str) -> GatewayError {
        GatewayError::NotFound {
            entity_type: entity_type.to_string(),
            id: id.to_string(),
        }
    }
}

#[async_trait]
impl EntityGateway for MemoryGateway {
    async fn get_latest_version(&self, entity_type: &str, id: &str) -> Result<Entity, GatewayError> {
        self.families
            .get(&EntityKey::new(entity_type, id))
            .map(|family| family.current().clone())
            .ok_or_else(|| Self::not_found(entity_type, id))
    }

    async fn get_version(
        &self,
        entity_type: &str,
        id: &str,
        version: Version,
    ) -> Result<Entity, GatewayError> {
        self.families
            .get(&EntityKey::new(entity_type, id))
            .and_then(|family| family.get(version).cloned())
            .ok_or_else(|| Self::not_found(entity_type, id))
    }

    async fn get_version_history(
        &self,
        entity_type: &str,
        id: &str,
    ) -> Result<Vec<Entity>, GatewayError> {
        self.families
            .get(&EntityKey::new(entity_type, id))
            .map(|family| family.history().to_vec())
            .ok_or_else(|| Self::not_found(entity_type, id))
    }

    async fn query(&self, entity_type: &str, query: &EntityQuery) -> Result<Vec<Entity>, GatewayError> {
        let rows: Vec<Entity> = self
            .families
            .iter()
            .filter(|family| family.key().entity_type == entity_type)
            .flat_map(|family| family.history().to_vec())
            .collect();
        Ok(query.evaluate(rows))
    }

    async fn update(&self, submission: &Submission) -> Result<Entity, GatewayError> {
        self.apply(submission)
    }

    async fn batch_get(
        &self,
        entity_type: &str,
        ids: &[EntityId],
    ) -> Result<BTreeMap<EntityId, Entity>, GatewayError> {
        Ok(ids
            .iter()
            .filter_map(|id| {
                self.families
                    .get(&EntityKey::new(entity_type, id.as_str()))
                    .map(|family| (id.clone(), family.current().clone()))
            })
            .collect())
    }

    async fn batch_update(
        &self,
        entity_type: &str,
        submissions: &[Submission],
    ) -> Result<BatchUpdateResult, GatewayError> {
        let mut result = BatchUpdateResult::default();
        for submission in submissions {
            if submission.entity_type != entity_type {
                result.rejected.insert(
                    submission.id.clone(),
                    FailureReason::InvalidPayload(format!(
                        "{} entry in a {entity_type} batch",
                        submission.entity_type
                    )),
                );
                continue;
            }
            match self.apply(submission) {
                Ok(entity) => {
                    result.updated.insert(submission.id.clone(), entity);
                }
                Err(err) => {
                    result
                        .rejected
                        .insert(submission.id.clone(), FailureReason::from(&err));
                }
            }
        }
        Ok(result)
    }
}
