//! Client facade over a gateway, the mutation engine and the cache mirror.

use crate::batch::BatchCoordinator;
use crate::cache::{CacheMirror, SqliteMirror};
use crate::config::ClientConfig;
use crate::error::Result;
use crate::gateway::{EntityGateway, HttpGateway};
use crate::mutation::MutationEngine;
use crate::retry::{with_retry, Backoff, Deadline, RetryPolicy};
use scd_engine::{
    mark_latest, order_history, BatchOutcome, Entity, EntityId, EntityQuery, MutationRequest,
    Payload, Resolved, SortDirection, Version,
};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::warn;

/// Entry point for reading and writing versioned entities.
#[derive(Clone)]
pub struct ScdClient {
    gateway: Arc<dyn EntityGateway>,
    config: ClientConfig,
    policy: RetryPolicy,
    engine: MutationEngine,
    batch: BatchCoordinator,
    mirror: Option<Arc<dyn CacheMirror>>,
}

impl ScdClient {
    pub fn new(gateway: Arc<dyn EntityGateway>, config: ClientConfig) -> Self {
        let policy = RetryPolicy::from_config(&config);
        let engine = MutationEngine::new(gateway.clone(), policy.clone(), config.conflict_retries);
        Self::assemble(gateway, config, policy, engine)
    }

    /// Connect to the store named by `config`, and to its cache mirror when
    /// one is configured.
    pub async fn connect(config: ClientConfig) -> Result<Self> {
        let gateway = Arc::new(HttpGateway::new(&config)?);
        let mirror = match &config.cache_url {
            Some(url) => Some(SqliteMirror::connect(url).await?),
            None => None,
        };

        tracing::info!(store = %config.target(), cache = mirror.is_some(), "Client connected");
        let client = Self::new(gateway, config);
        Ok(match mirror {
            Some(mirror) => client.with_mirror(Arc::new(mirror)),
            None => client,
        })
    }

    pub fn with_mirror(mut self, mirror: Arc<dyn CacheMirror>) -> Self {
        self.mirror = Some(mirror);
        self
    }

    pub fn with_retry_policy(self, policy: RetryPolicy) -> Self {
        let engine = MutationEngine::new(
            self.gateway.clone(),
            policy.clone(),
            self.config.conflict_retries,
        );
        let mirror = self.mirror;
        let mut client = Self::assemble(self.gateway, self.config, policy, engine);
        client.mirror = mirror;
        client
    }

    pub fn with_conflict_backoff(self, backoff: Backoff) -> Self {
        let engine = self.engine.with_conflict_backoff(backoff);
        let mirror = self.mirror;
        let mut client = Self::assemble(self.gateway, self.config, self.policy, engine);
        client.mirror = mirror;
        client
    }

    fn assemble(
        gateway: Arc<dyn EntityGateway>,
        config: ClientConfig,
        policy: RetryPolicy,
        engine: MutationEngine,
    ) -> Self {
        let batch = BatchCoordinator::new(
            gateway.clone(),
            engine.clone(),
            policy.clone(),
            config.batch_concurrency,
        );
        Self {
            gateway,
            config,
            policy,
            engine,
            batch,
            mirror: None,
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn gateway(&self) -> &Arc<dyn EntityGateway> {
        &self.gateway
    }

    /// Current version of one identity.
    pub async fn get_latest(&self, entity_type: &str, id: &str) -> Result<Entity> {
        self.get_latest_with_deadline(entity_type, id, Deadline::none())
            .await
    }

    pub async fn get_latest_with_deadline(
        &self,
        entity_type: &str,
        id: &str,
        deadline: Deadline,
    ) -> Result<Entity> {
        let gateway = &self.gateway;
        let entity = with_retry(&self.policy, deadline, "get_latest_version", || {
            gateway.get_latest_version(entity_type, id)
        })
        .await?;
        self.mirror(std::slice::from_ref(&entity)).await;
        Ok(entity)
    }

    pub async fn get_version(&self, entity_type: &str, id: &str, version: Version) -> Result<Entity> {
        self.get_version_with_deadline(entity_type, id, version, Deadline::none())
            .await
    }

    pub async fn get_version_with_deadline(
        &self,
        entity_type: &str,
        id: &str,
        version: Version,
        deadline: Deadline,
    ) -> Result<Entity> {
        let gateway = &self.gateway;
        let entity = with_retry(&self.policy, deadline, "get_version", || {
            gateway.get_version(entity_type, id, version)
        })
        .await?;
        self.mirror(std::slice::from_ref(&entity)).await;
        Ok(entity)
    }

    /// Every version of one identity, ascending, each flagged with whether
    /// it is the current one.
    pub async fn get_history(&self, entity_type: &str, id: &str) -> Result<Vec<Resolved<Entity>>> {
        self.get_history_with_deadline(entity_type, id, Deadline::none())
            .await
    }

    pub async fn get_history_with_deadline(
        &self,
        entity_type: &str,
        id: &str,
        deadline: Deadline,
    ) -> Result<Vec<Resolved<Entity>>> {
        let gateway = &self.gateway;
        let rows = with_retry(&self.policy, deadline, "get_version_history", || {
            gateway.get_version_history(entity_type, id)
        })
        .await?;
        self.mirror(&rows).await;
        Ok(mark_latest(order_history(rows, SortDirection::Asc)))
    }

    pub async fn query(&self, entity_type: &str, query: &EntityQuery) -> Result<Vec<Entity>> {
        self.query_with_deadline(entity_type, query, Deadline::none())
            .await
    }

    pub async fn query_with_deadline(
        &self,
        entity_type: &str,
        query: &EntityQuery,
        deadline: Deadline,
    ) -> Result<Vec<Entity>> {
        let gateway = &self.gateway;
        let rows = with_retry(&self.policy, deadline, "query", || {
            gateway.query(entity_type, query)
        })
        .await?;
        self.mirror(&rows).await;
        Ok(rows)
    }

    pub async fn batch_get(&self, entity_type: &str, ids: &[EntityId]) -> Result<BTreeMap<EntityId, Entity>> {
        self.batch_get_with_deadline(entity_type, ids, Deadline::none())
            .await
    }

    pub async fn batch_get_with_deadline(
        &self,
        entity_type: &str,
        ids: &[EntityId],
        deadline: Deadline,
    ) -> Result<BTreeMap<EntityId, Entity>> {
        let found = self.batch.batch_fetch(entity_type, ids, deadline).await?;
        let rows: Vec<Entity> = found.values().cloned().collect();
        self.mirror(&rows).await;
        Ok(found)
    }

    /// Write `payload` as the next version of the entity it identifies.
    ///
    /// The payload must carry `id`. With a `version` (and optionally `uid`)
    /// it is submitted against that version first; otherwise against the
    /// store's current version. Conflicts are recovered by refetching and
    /// merging the payload's fields over the newer version.
    pub async fn mutate(&self, entity_type: &str, payload: Payload) -> Result<Entity> {
        self.mutate_with_deadline(entity_type, payload, Deadline::none())
            .await
    }

    pub async fn mutate_with_deadline(
        &self,
        entity_type: &str,
        payload: Payload,
        deadline: Deadline,
    ) -> Result<Entity> {
        let entity = self
            .engine
            .mutate_with_deadline(entity_type, payload, deadline)
            .await?;
        self.mirror(std::slice::from_ref(&entity)).await;
        Ok(entity)
    }

    /// Run an already parsed request through the mutation engine.
    pub async fn submit(&self, request: MutationRequest) -> Result<Entity> {
        self.submit_with_deadline(request, Deadline::none()).await
    }

    pub async fn submit_with_deadline(&self, request: MutationRequest, deadline: Deadline) -> Result<Entity> {
        let entity = self.engine.submit(request, deadline).await?;
        self.mirror(std::slice::from_ref(&entity)).await;
        Ok(entity)
    }

    /// One-shot batch through the store's batch endpoint.
    pub async fn batch_mutate(&self, entity_type: &str, payloads: Vec<Payload>) -> BatchOutcome {
        self.batch_mutate_with_deadline(entity_type, payloads, Deadline::none())
            .await
    }

    pub async fn batch_mutate_with_deadline(
        &self,
        entity_type: &str,
        payloads: Vec<Payload>,
        deadline: Deadline,
    ) -> BatchOutcome {
        let outcome = self
            .batch
            .batch_mutate(entity_type, payloads, deadline)
            .await;
        self.mirror_outcome(&outcome).await;
        outcome
    }

    /// Batch where every entry gets full conflict recovery.
    pub async fn batch_mutate_resolved(&self, entity_type: &str, payloads: Vec<Payload>) -> BatchOutcome {
        self.batch_mutate_resolved_with_deadline(entity_type, payloads, Deadline::none())
            .await
    }

    pub async fn batch_mutate_resolved_with_deadline(
        &self,
        entity_type: &str,
        payloads: Vec<Payload>,
        deadline: Deadline,
    ) -> BatchOutcome {
        let outcome = self
            .batch
            .batch_mutate_resolved(entity_type, payloads, deadline)
            .await;
        self.mirror_outcome(&outcome).await;
        outcome
    }

    /// Resolved batch over already built requests.
    pub async fn batch_submit_resolved(
        &self,
        entity_type: &str,
        entries: Vec<scd_engine::error::Result<MutationRequest>>,
        deadline: Deadline,
    ) -> BatchOutcome {
        let outcome = self
            .batch
            .batch_submit_resolved(entity_type, entries, deadline)
            .await;
        self.mirror_outcome(&outcome).await;
        outcome
    }

    async fn mirror_outcome(&self, outcome: &BatchOutcome) {
        if self.mirror.is_some() && !outcome.accepted.is_empty() {
            let rows: Vec<Entity> = outcome.accepted.values().cloned().collect();
            self.mirror(&rows).await;
        }
    }

    /// Best-effort copy into the cache mirror.
    async fn mirror(&self, entities: &[Entity]) {
        let Some(mirror) = &self.mirror else {
            return;
        };
        if entities.is_empty() {
            return;
        }
        if let Err(err) = mirror.persist(entities).await {
            warn!(error = %err, count = entities.len(), "Cache write failed");
        }
    }
}
