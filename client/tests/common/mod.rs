//! Shared fixtures for client integration tests.
#![allow(dead_code)]

use async_trait::async_trait;
use scd_client::{
    Backoff, BatchUpdateResult, ClientConfig, EntityGateway, GatewayError, MemoryGateway,
    ScdClient,
};
use scd_engine::{Entity, EntityId, EntityQuery, MutationRequest, Payload, Submission, Version};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub fn payload(value: Value) -> Payload {
    value.as_object().cloned().unwrap()
}

/// Config with short transport retries and a generous conflict budget.
pub fn config(conflict_retries: u32) -> ClientConfig {
    ClientConfig {
        max_retries: 2,
        retry_delay: Duration::from_millis(10),
        conflict_retries,
        ..ClientConfig::default()
    }
}

pub fn client(gateway: Arc<dyn EntityGateway>, conflict_retries: u32) -> ScdClient {
    ScdClient::new(gateway, config(conflict_retries))
        .with_conflict_backoff(Backoff::Fixed(Duration::ZERO))
}

/// What a [`FaultyGateway`] does wrong.
#[derive(Debug, Clone, Copy)]
pub enum Fault {
    /// The first `n` calls of any kind fail as unavailable
    Unavailable(u32),
    /// Every update is rejected as stale
    AlwaysConflict,
    /// Every update reports the entity missing
    AlwaysNotFound,
    /// Every call takes this long
    Delay(Duration),
    /// Another writer appends a version right before each of the first `n`
    /// updates
    CompetingWrites(u32),
}

/// A [`MemoryGateway`] with an injected fault.
pub struct FaultyGateway {
    pub inner: Arc<MemoryGateway>,
    fault: Fault,
    remaining: AtomicU32,
    updates: AtomicU32,
    competitor: Option<Payload>,
}

impl FaultyGateway {
    pub fn new(inner: Arc<MemoryGateway>, fault: Fault) -> Arc<Self> {
        Arc::new(Self::build(inner, fault, None))
    }

    /// Another writer merges `fields` right before each of the first `n`
    /// updates.
    pub fn competing(inner: Arc<MemoryGateway>, n: u32, fields: Value) -> Arc<Self> {
        Arc::new(Self::build(inner, Fault::CompetingWrites(n), Some(payload(fields))))
    }

    fn build(inner: Arc<MemoryGateway>, fault: Fault, competitor: Option<Payload>) -> Self {
        let remaining = match fault {
            Fault::Unavailable(n) | Fault::CompetingWrites(n) => n,
            _ => 0,
        };
        Self {
            inner,
            fault,
            remaining: AtomicU32::new(remaining),
            updates: AtomicU32::new(0),
            competitor,
        }
    }

    /// Update calls that reached this gateway.
    pub fn updates(&self) -> u32 {
        self.updates.load(Ordering::SeqCst)
    }

    fn take_one(&self) -> bool {
        self.remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    async fn before_call(&self) -> Result<(), GatewayError> {
        match self.fault {
            Fault::Unavailable(_) if self.take_one() => {
                Err(GatewayError::Unavailable("connection refused".into()))
            }
            Fault::Delay(delay) => {
                tokio::time::sleep(delay).await;
                Ok(())
            }
            _ => Ok(()),
        }
    }

    async fn before_update(&self, submission: &Submission) -> Result<(), GatewayError> {
        let attempt = self.updates.fetch_add(1, Ordering::SeqCst) + 1;
        match self.fault {
            Fault::AlwaysConflict => Err(GatewayError::Conflict {
                entity_type: submission.entity_type.clone(),
                id: submission.id.clone(),
                detail: "stale token".into(),
            }),
            Fault::AlwaysNotFound => Err(GatewayError::NotFound {
                entity_type: submission.entity_type.clone(),
                id: submission.id.clone(),
            }),
            Fault::CompetingWrites(_) if self.take_one() => {
                let current = self
                    .inner
                    .get_latest_version(&submission.entity_type, &submission.id)
                    .await
                    .ok();
                let fields = self
                    .competitor
                    .clone()
                    .unwrap_or_else(|| payload(json!({ "competitor": attempt })));
                let competitor = MutationRequest::new(
                    submission.entity_type.clone(),
                    submission.id.clone(),
                    fields,
                );
                self.inner.apply(&competitor.submission_over(current.as_ref()))?;
                Ok(())
            }
            _ => Ok(()),
        }
    }
}

#[async_trait]
impl EntityGateway for FaultyGateway {
    async fn get_latest_version(&self, entity_type: &str, id: &str) -> Result<Entity, GatewayError> {
        self.before_call().await?;
        self.inner.get_latest_version(entity_type, id).await
    }

    async fn get_version(
        &self,
        entity_type: &str,
        id: &str,
        version: Version,
    ) -> Result<Entity, GatewayError> {
        self.before_call().await?;
        self.inner.get_version(entity_type, id, version).await
    }

    async fn get_version_history(
        &self,
        entity_type: &str,
        id: &str,
    ) -> Result<Vec<Entity>, GatewayError> {
        self.before_call().await?;
        self.inner.get_version_history(entity_type, id).await
    }

    async fn query(&self, entity_type: &str, query: &EntityQuery) -> Result<Vec<Entity>, GatewayError> {
        self.before_call().await?;
        self.inner.query(entity_type, query).await
    }

    async fn update(&self, submission: &Submission) -> Result<Entity, GatewayError> {
        self.before_call().await?;
        self.before_update(submission).await?;
        self.inner.update(submission).await
    }

    async fn batch_get(
        &self,
        entity_type: &str,
        ids: &[EntityId],
    ) -> Result<BTreeMap<EntityId, Entity>, GatewayError> {
        self.before_call().await?;
        self.inner.batch_get(entity_type, ids).await
    }

    async fn batch_update(
        &self,
        entity_type: &str,
        submissions: &[Submission],
    ) -> Result<BatchUpdateResult, GatewayError> {
        self.before_call().await?;
        self.inner.batch_update(entity_type, submissions).await
    }
}
