//! Batch coordination.
//!
//! Two modes are offered. [`BatchCoordinator::batch_mutate`] pins every entry
//! and hands the whole set to the store's batch endpoint in one call, so a
//! stale entry comes back as a per-entity conflict. [`BatchCoordinator::batch_mutate_resolved`]
//! runs the full mutation engine per entry with bounded concurrency, so
//! conflicts are recovered one entity at a time.

use crate::error::Result;
use crate::gateway::{EntityGateway, GatewayError};
use crate::mutation::MutationEngine;
use crate::retry::{with_retry, Deadline, RetryPolicy};
use futures::stream::{self, StreamExt};
use scd_engine::{
    partition_batch, partition_requests, BatchFailure, BatchOutcome, Entity, EntityId,
    FailureReason, MutationRequest, Payload, Submission,
};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Batch reads and writes over a gateway.
#[derive(Clone)]
pub struct BatchCoordinator {
    gateway: Arc<dyn EntityGateway>,
    engine: MutationEngine,
    policy: RetryPolicy,
    concurrency: usize,
}

impl BatchCoordinator {
    pub fn new(
        gateway: Arc<dyn EntityGateway>,
        engine: MutationEngine,
        policy: RetryPolicy,
        concurrency: usize,
    ) -> Self {
        Self {
            gateway,
            engine,
            policy,
            concurrency: concurrency.max(1),
        }
    }

    /// Current versions of `ids`. Missing ids are left out of the map.
    pub async fn batch_fetch(
        &self,
        entity_type: &str,
        ids: &[EntityId],
        deadline: Deadline,
    ) -> Result<BTreeMap<EntityId, Entity>> {
        let unique: Vec<EntityId> = ids
            .iter()
            .cloned()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        if unique.is_empty() {
            return Ok(BTreeMap::new());
        }

        let gateway = &self.gateway;
        let ids = &unique;
        with_retry(&self.policy, deadline, "batch_get", || {
            gateway.batch_get(entity_type, ids)
        })
        .await
    }

    /// Submit every entry through the store's batch endpoint in one call.
    ///
    /// Entries that carry a version are submitted against it as is; the rest
    /// are pinned to the version returned by one batch read, or submitted as
    /// creations when the read finds nothing. No entry is retried.
    pub async fn batch_mutate(
        &self,
        entity_type: &str,
        payloads: Vec<Payload>,
        deadline: Deadline,
    ) -> BatchOutcome {
        let total = payloads.len();
        let (requests, failures) = partition_batch(entity_type, payloads);
        let mut outcome = BatchOutcome::new();
        for failure in failures {
            outcome.fail(failure.index, failure.id, failure.reason);
        }
        if requests.is_empty() {
            return outcome.finish();
        }

        let unpinned: Vec<EntityId> = requests
            .iter()
            .filter(|(_, request)| request.pin.is_none())
            .map(|(_, request)| request.id.clone())
            .collect();

        let baselines = match self.batch_fetch(entity_type, &unpinned, deadline).await {
            Ok(found) => found,
            Err(err) => {
                warn!(entity_type, error = %err, "Batch read failed, failing every entry");
                let reason = FailureReason::from(&err);
                fail_all(&mut outcome, requests, &reason);
                return outcome.finish();
            }
        };

        let submissions: Vec<Submission> = requests
            .iter()
            .map(|(_, request)| submission_for(request, &baselines))
            .collect();

        let gateway = &self.gateway;
        let batch = &submissions;
        let result = with_retry(&self.policy, deadline, "batch_update", || {
            gateway.batch_update(entity_type, batch)
        })
        .await;

        let mut result = match result {
            Ok(result) => result,
            Err(err) => {
                warn!(entity_type, error = %err, "Batch update failed, failing every entry");
                let reason = FailureReason::from(&err);
                fail_all(&mut outcome, requests, &reason);
                return outcome.finish();
            }
        };

        for (index, request) in requests {
            if let Some(entity) = result.updated.remove(&request.id) {
                outcome.accept(entity);
            } else {
                let reason = result.rejected.remove(&request.id).unwrap_or_else(|| {
                    FailureReason::from(&GatewayError::InvalidResponse(format!(
                        "{} missing from batch response",
                        request.id
                    )))
                });
                outcome.fail(index, Some(request.id), reason);
            }
        }

        info!(
            entity_type,
            total,
            accepted = outcome.accepted.len(),
            failed = outcome.failed.len(),
            "Batch update finished"
        );
        outcome.finish()
    }

    /// Run the mutation engine for every entry, at most `concurrency` at once.
    ///
    /// Entries are independent: one entry exhausting its retries never stops
    /// the others.
    pub async fn batch_mutate_resolved(
        &self,
        entity_type: &str,
        payloads: Vec<Payload>,
        deadline: Deadline,
    ) -> BatchOutcome {
        let total = payloads.len();
        let (requests, failures) = partition_batch(entity_type, payloads);
        self.resolve_each(entity_type, total, requests, failures, deadline)
            .await
    }

    /// [`BatchCoordinator::batch_mutate_resolved`] over requests that were
    /// already built, keeping their pins and guards.
    pub async fn batch_submit_resolved(
        &self,
        entity_type: &str,
        entries: Vec<scd_engine::error::Result<MutationRequest>>,
        deadline: Deadline,
    ) -> BatchOutcome {
        let total = entries.len();
        let (requests, failures) = partition_requests(entries);
        self.resolve_each(entity_type, total, requests, failures, deadline)
            .await
    }

    async fn resolve_each(
        &self,
        entity_type: &str,
        total: usize,
        requests: Vec<(usize, MutationRequest)>,
        failures: Vec<BatchFailure>,
        deadline: Deadline,
    ) -> BatchOutcome {
        let mut outcome = BatchOutcome::new();
        for failure in failures {
            outcome.fail(failure.index, failure.id, failure.reason);
        }

        let engine = &self.engine;
        let results: Vec<_> = stream::iter(requests)
            .map(|(index, request)| async move {
                let id = request.id.clone();
                (index, id, engine.submit(request, deadline).await)
            })
            .buffer_unordered(self.concurrency)
            .collect()
            .await;

        for (index, id, result) in results {
            match result {
                Ok(entity) => outcome.accept(entity),
                Err(err) => {
                    debug!(entity_type, %id, error = %err, "Batch entry failed");
                    outcome.fail(index, Some(id), FailureReason::from(&err));
                }
            }
        }

        info!(
            entity_type,
            total,
            accepted = outcome.accepted.len(),
            failed = outcome.failed.len(),
            "Resolved batch finished"
        );
        outcome.finish()
    }
}

fn submission_for(request: &MutationRequest, baselines: &BTreeMap<EntityId, Entity>) -> Submission {
    request
        .pinned_submission()
        .unwrap_or_else(|| request.submission_over(baselines.get(&request.id)))
}

fn fail_all(
    outcome: &mut BatchOutcome,
    requests: Vec<(usize, MutationRequest)>,
    reason: &FailureReason,
) {
    for (index, request) in requests {
        outcome.fail(index, Some(request.id), reason.clone());
    }
}
