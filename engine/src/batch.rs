//! Batch outcomes: partial success with per-entity failures.

use crate::mutation::MutationRequest;
use crate::{error::Result, Entity, EntityId, Error, Payload};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fmt;

/// Why one entry of a batch was not accepted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "camelCase")]
pub enum FailureReason {
    /// The entity's fencing token was stale
    Conflict,
    /// The entity was expected to exist but does not
    NotFound,
    /// The entry could not be turned into a mutation
    InvalidPayload(String),
    /// The store refused the entry for another reason
    Rejected(String),
    /// The store could not be reached for this entry
    Transport(String),
    DeadlineExceeded,
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::Conflict => write!(f, "conflict"),
            FailureReason::NotFound => write!(f, "not found"),
            FailureReason::InvalidPayload(detail) => write!(f, "invalid payload: {detail}"),
            FailureReason::Rejected(detail) => write!(f, "rejected: {detail}"),
            FailureReason::Transport(detail) => write!(f, "transport failure: {detail}"),
            FailureReason::DeadlineExceeded => write!(f, "deadline exceeded"),
        }
    }
}

impl From<&Error> for FailureReason {
    fn from(err: &Error) -> Self {
        match err {
            e if e.is_conflict() => FailureReason::Conflict,
            Error::EntityNotFound(_) => FailureReason::NotFound,
            Error::InvalidPayload(_)
            | Error::MissingIdentity
            | Error::Decode { .. }
            | Error::InvalidIdentifier(_)
            | Error::UnknownEntityType(_)
            | Error::InvalidTransition { .. } => FailureReason::InvalidPayload(err.to_string()),
            other => FailureReason::Rejected(other.to_string()),
        }
    }
}

/// One failed batch entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchFailure {
    /// Position of the entry in the submitted batch
    pub index: usize,
    /// Identity of the entry, when it had one
    pub id: Option<EntityId>,
    pub reason: FailureReason,
}

/// Result of a batch: accepted entities by id, plus failures.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchOutcome {
    pub accepted: BTreeMap<EntityId, Entity>,
    pub failed: Vec<BatchFailure>,
}

impl BatchOutcome {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn accept(&mut self, entity: Entity) {
        self.accepted.insert(entity.envelope.id.clone(), entity);
    }

    pub fn fail(&mut self, index: usize, id: Option<EntityId>, reason: FailureReason) {
        self.failed.push(BatchFailure { index, id, reason });
    }

    /// True when every entry was accepted.
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }

    pub fn failure_for(&self, id: &str) -> Option<&FailureReason> {
        self.failed
            .iter()
            .find(|f| f.id.as_deref() == Some(id))
            .map(|f| &f.reason)
    }

    /// Sort failures by their position in the batch.
    pub fn finish(mut self) -> Self {
        self.failed.sort_by_key(|f| f.index);
        self
    }
}

/// Parse every batch entry, reporting unusable ones as failures.
///
/// An entry without identity, or whose id already appeared earlier in the
/// same batch, fails on its own without affecting the rest.
pub fn partition_batch(
    entity_type: &str,
    payloads: Vec<Payload>,
) -> (Vec<(usize, MutationRequest)>, Vec<BatchFailure>) {
    partition_requests(
        payloads
            .into_iter()
            .map(|payload| MutationRequest::from_payload(entity_type, payload)),
    )
}

/// [`partition_batch`] over requests that were already built.
pub fn partition_requests(
    entries: impl IntoIterator<Item = Result<MutationRequest>>,
) -> (Vec<(usize, MutationRequest)>, Vec<BatchFailure>) {
    let mut requests = Vec::new();
    let mut failures = Vec::new();
    let mut seen = HashSet::new();

    for (index, entry) in entries.into_iter().enumerate() {
        match entry {
            Ok(request) if !seen.insert(request.id.clone()) => failures.push(BatchFailure {
                index,
                reason: FailureReason::InvalidPayload(format!(
                    "duplicate id {} in batch",
                    request.id
                )),
                id: Some(request.id),
            }),
            Ok(request) => requests.push((index, request)),
            Err(err) => failures.push(BatchFailure {
                index,
                id: None,
                reason: FailureReason::from(&err),
            }),
        }
    }

    (requests, failures)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn payload(value: serde_json::Value) -> Payload {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn partition_isolates_bad_entries() {
        let (requests, failures) = partition_batch(
            "job",
            vec![
                payload(json!({"id": "a", "rate": 1})),
                payload(json!({"rate": 2})),
                payload(json!({"id": "b", "version": 2, "uid": "u"})),
                payload(json!({"id": "a", "rate": 3})),
            ],
        );

        let indices: Vec<_> = requests.iter().map(|(i, r)| (*i, r.id.as_str())).collect();
        assert_eq!(indices, vec![(0, "a"), (2, "b")]);

        assert_eq!(failures.len(), 2);
        assert_eq!(failures[0].index, 1);
        assert_eq!(failures[0].id, None);
        assert!(matches!(failures[0].reason, FailureReason::InvalidPayload(_)));
        assert_eq!(failures[1].index, 3);
        assert_eq!(failures[1].id.as_deref(), Some("a"));
    }

    #[test]
    fn reason_from_engine_error() {
        let conflict = Error::VersionMismatch {
            id: "a".into(),
            expected: 1,
            actual: 2,
        };
        assert_eq!(FailureReason::from(&conflict), FailureReason::Conflict);
        assert_eq!(
            FailureReason::from(&Error::EntityNotFound("a".into())),
            FailureReason::NotFound
        );
        assert!(matches!(
            FailureReason::from(&Error::BrokenFamily("x".into())),
            FailureReason::Rejected(_)
        ));
    }

    #[test]
    fn outcome_lookup_and_order() {
        let mut outcome = BatchOutcome::new();
        outcome.fail(3, Some("c".into()), FailureReason::Conflict);
        outcome.fail(1, Some("a".into()), FailureReason::NotFound);
        let outcome = outcome.finish();

        assert!(!outcome.is_complete());
        assert_eq!(outcome.failed[0].index, 1);
        assert_eq!(outcome.failure_for("c"), Some(&FailureReason::Conflict));
        assert_eq!(outcome.failure_for("z"), None);
    }

    #[test]
    fn reason_wire_format() {
        let json = serde_json::to_value(FailureReason::Rejected("quota".into())).unwrap();
        assert_eq!(json, json!({"kind": "rejected", "detail": "quota"}));

        let json = serde_json::to_value(FailureReason::Conflict).unwrap();
        assert_eq!(json, json!({"kind": "conflict"}));
    }
}
