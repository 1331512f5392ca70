//! Conflict-aware mutation engine.
//!
//! One mutation is a strictly sequential loop: read the current version,
//! merge the caller's fields over it, submit against that version's fencing
//! token, and on a conflict start over from a fresh read. A write to an
//! identity that turns out not to exist becomes a creation.
//!
//! A request carrying a [`scd_engine::FieldGuard`] is never submitted
//! against its pin: every attempt merges over a fresh read, and the guard is
//! checked against that read before anything is written.

use crate::error::{ClientError, Result};
use crate::gateway::{EntityGateway, GatewayError};
use crate::retry::{with_retry, Backoff, Deadline, RetryPolicy};
use scd_engine::{
    Entity, MutationRequest, Payload, RetryBudget, RetryStep, Submission,
    DEFAULT_NOT_FOUND_RETRIES,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Delay schedule between conflict attempts.
pub fn default_conflict_backoff() -> Backoff {
    Backoff::Exponential {
        base: Duration::from_millis(50),
        max: Duration::from_secs(2),
        jitter: true,
    }
}

/// Runs mutations against a gateway.
#[derive(Clone)]
pub struct MutationEngine {
    gateway: Arc<dyn EntityGateway>,
    policy: RetryPolicy,
    conflict_retries: u32,
    conflict_backoff: Backoff,
}

impl MutationEngine {
    pub fn new(gateway: Arc<dyn EntityGateway>, policy: RetryPolicy, conflict_retries: u32) -> Self {
        Self {
            gateway,
            policy,
            conflict_retries,
            conflict_backoff: default_conflict_backoff(),
        }
    }

    pub fn with_conflict_backoff(mut self, backoff: Backoff) -> Self {
        self.conflict_backoff = backoff;
        self
    }

    /// Mutate one entity from a flat caller payload.
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
        let request = MutationRequest::from_payload(entity_type, payload)
            .map_err(|e| ClientError::InvalidPayload(e.to_string()))?;
        self.submit(request, deadline).await
    }

    /// Drive a parsed request until it is accepted or a recovery runs out.
    ///
    /// A guard that rejects the current version ends the loop with
    /// [`scd_engine::Error::InvalidTransition`].
    #[tracing::instrument(
        name = "mutate",
        skip_all,
        fields(entity_type = %request.entity_type, id = %request.id)
    )]
    pub async fn submit(&self, request: MutationRequest, deadline: Deadline) -> Result<Entity> {
        let mut budget = RetryBudget::new(self.conflict_retries, DEFAULT_NOT_FOUND_RETRIES);
        let mut submission = match request.pinned_submission() {
            Some(pinned) if request.guard.is_none() => pinned,
            _ => self.against_latest(&request, deadline).await?,
        };

        loop {
            debug!(
                expect = ?submission.expect,
                conflicts = budget.conflicts(),
                "Submitting version {}",
                submission.next_version()
            );

            let gateway = &self.gateway;
            let current = &submission;
            let outcome = with_retry(&self.policy, deadline, "update", || gateway.update(current)).await;

            match outcome {
                Ok(entity) => {
                    info!(
                        version = entity.envelope.version,
                        uid = %entity.envelope.uid,
                        conflicts = budget.conflicts(),
                        "Mutation accepted"
                    );
                    return Ok(entity);
                }
                Err(ClientError::Gateway(GatewayError::Conflict { detail, .. })) => {
                    match budget.record_conflict() {
                        RetryStep::Retry { attempt } => {
                            warn!(attempt, %detail, "Conflict, refetching latest version");
                            let delay = self.conflict_backoff.delay(attempt);
                            if !deadline.sleep(delay).await {
                                return Err(ClientError::DeadlineExceeded {
                                    operation: "mutate",
                                });
                            }
                            submission = self.against_latest(&request, deadline).await?;
                        }
                        RetryStep::GiveUp { attempts } => {
                            return Err(ClientError::ConflictExhausted {
                                entity_type: request.entity_type,
                                id: request.id,
                                attempts,
                            })
                        }
                    }
                }
                Err(err @ ClientError::NotFound { .. }) if request.check_baseline(None).is_err() => {
                    return Err(err)
                }
                Err(ClientError::NotFound { .. }) => match budget.record_not_found() {
                    RetryStep::Retry { attempt } => {
                        debug!(attempt, "Entity not found, retrying as creation");
                        submission = request.creation();
                    }
                    RetryStep::GiveUp { attempts } => {
                        return Err(ClientError::NotFoundUnrecoverable {
                            entity_type: request.entity_type,
                            id: request.id,
                            attempts,
                        })
                    }
                },
                Err(other) => return Err(other),
            }
        }
    }

    /// Submission over the store's current version, or a creation when the
    /// identity does not exist yet. The request's guard sees the same read.
    async fn against_latest(&self, request: &MutationRequest, deadline: Deadline) -> Result<Submission> {
        let gateway = &self.gateway;
        let latest = with_retry(&self.policy, deadline, "get_latest_version", || {
            gateway.get_latest_version(&request.entity_type, &request.id)
        })
        .await;

        match latest {
            Ok(current) => {
                request.check_baseline(Some(&current))?;
                Ok(request.submission_over(Some(&current)))
            }
            Err(err @ ClientError::NotFound { .. }) => {
                if request.check_baseline(None).is_err() {
                    return Err(err);
                }
                Ok(request.creation())
            }
            Err(err) => Err(err),
        }
    }
}
