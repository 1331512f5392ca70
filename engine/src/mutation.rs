//! Mutation planning.
//!
//! A caller payload becomes a [`MutationRequest`]: identity, an optional
//! fencing pin, and the fields to write. Each attempt of the mutation loop
//! turns the request into a [`Submission`] that states what the writer
//! expects the current version to be.

use crate::entity::{merge_fields, strip_reserved};
use crate::{error::Result, Entity, EntityId, EntityType, Error, Payload, Uid, Version};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Attempts allowed to recover from "not found" by creating the entity.
pub const DEFAULT_NOT_FOUND_RETRIES: u32 = 2;

/// What a writer believes the current version is.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum Expectation {
    /// The family does not exist yet; the write creates version 1
    Create,
    /// The family's current version is `version` (and `uid`, when given)
    Current { version: Version, uid: Option<Uid> },
}

/// One attempt at writing the next version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Submission {
    pub entity_type: EntityType,
    pub id: EntityId,
    pub expect: Expectation,
    pub fields: Payload,
}

impl Submission {
    /// The version this submission produces if accepted.
    pub fn next_version(&self) -> Version {
        match &self.expect {
            Expectation::Create => 1,
            Expectation::Current { version, .. } => version + 1,
        }
    }

    pub fn is_creation(&self) -> bool {
        self.expect == Expectation::Create
    }
}

/// Values one field may hold on the version a write is merged over.
///
/// `Value::Null` in `allowed_from` admits a baseline that lacks the field,
/// and an identity that does not exist yet.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldGuard {
    pub field: String,
    /// Value the write moves the field to
    pub target: Value,
    pub allowed_from: Vec<Value>,
}

impl FieldGuard {
    pub fn new(field: impl Into<String>, target: Value, allowed_from: Vec<Value>) -> Self {
        Self {
            field: field.into(),
            target,
            allowed_from,
        }
    }

    /// Check the baseline payload, or a missing identity when `None`.
    pub fn check(&self, baseline: Option<&Payload>) -> Result<()> {
        let current = baseline
            .and_then(|payload| payload.get(&self.field))
            .unwrap_or(&Value::Null);
        if self.allowed_from.contains(current) {
            Ok(())
        } else {
            Err(Error::InvalidTransition {
                from: display(current),
                to: display(&self.target),
            })
        }
    }
}

fn display(value: &Value) -> String {
    match value {
        Value::Null => "none".to_string(),
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

/// A caller's intent to mutate one entity.
#[derive(Debug, Clone, PartialEq)]
pub struct MutationRequest {
    pub entity_type: EntityType,
    pub id: EntityId,
    /// Version (and optionally uid) the caller read before writing
    pub pin: Option<(Version, Option<Uid>)>,
    /// Fields to merge over the current state
    pub fields: Payload,
    /// Checked against every baseline the request is merged over
    pub guard: Option<FieldGuard>,
}

impl MutationRequest {
    pub fn new(entity_type: impl Into<EntityType>, id: impl Into<EntityId>, fields: Payload) -> Self {
        Self {
            entity_type: entity_type.into(),
            id: id.into(),
            pin: None,
            fields: strip_reserved(fields),
            guard: None,
        }
    }

    /// Pin the write to a version the caller already observed.
    pub fn pinned(mut self, version: Version, uid: Option<Uid>) -> Self {
        self.pin = Some((version, uid));
        self
    }

    pub fn guarded(mut self, guard: FieldGuard) -> Self {
        self.guard = Some(guard);
        self
    }

    /// Run the guard, if any, against a freshly read baseline.
    pub fn check_baseline(&self, baseline: Option<&Entity>) -> Result<()> {
        match &self.guard {
            Some(guard) => guard.check(baseline.map(|current| &current.payload)),
            None => Ok(()),
        }
    }

    /// Parse a flat caller payload.
    ///
    /// `id` is required. `version` and `uid` are optional pins; the other
    /// envelope keys are engine-controlled and dropped.
    pub fn from_payload(entity_type: &str, mut payload: Payload) -> Result<Self> {
        if entity_type.is_empty() {
            return Err(Error::InvalidPayload("entity type is empty".into()));
        }

        let id = match payload.remove("id") {
            Some(Value::String(id)) if !id.is_empty() => id,
            Some(Value::Number(n)) => n.to_string(),
            _ => return Err(Error::MissingIdentity),
        };

        let version = match payload.remove("version") {
            None | Some(Value::Null) => None,
            Some(Value::Number(n)) => match n.as_u64() {
                Some(v) if v > 0 => Some(v),
                _ => {
                    return Err(Error::InvalidPayload(format!(
                        "version must be a positive integer, got {n}"
                    )))
                }
            },
            Some(other) => {
                return Err(Error::InvalidPayload(format!(
                    "version must be a positive integer, got {other}"
                )))
            }
        };

        let uid = match payload.remove("uid") {
            None | Some(Value::Null) => None,
            Some(Value::String(uid)) if uid.is_empty() => None,
            Some(Value::String(uid)) => Some(uid),
            Some(other) => {
                return Err(Error::InvalidPayload(format!("uid must be a string, got {other}")))
            }
        };

        let pin = match (version, uid) {
            (Some(version), uid) => Some((version, uid)),
            (None, Some(_)) => {
                return Err(Error::InvalidPayload("uid pin requires a version".into()))
            }
            (None, None) => None,
        };

        Ok(Self {
            entity_type: entity_type.to_string(),
            id,
            pin,
            fields: strip_reserved(payload),
            guard: None,
        })
    }

    pub fn from_value(entity_type: &str, value: Value) -> Result<Self> {
        match value {
            Value::Object(payload) => Self::from_payload(entity_type, payload),
            other => Err(Error::InvalidPayload(format!(
                "expected a JSON object, got {other}"
            ))),
        }
    }

    /// Submission against the caller's pin, if one was given.
    pub fn pinned_submission(&self) -> Option<Submission> {
        self.pin.as_ref().map(|(version, uid)| Submission {
            entity_type: self.entity_type.clone(),
            id: self.id.clone(),
            expect: Expectation::Current {
                version: *version,
                uid: uid.clone(),
            },
            fields: self.fields.clone(),
        })
    }

    /// Submission against a freshly fetched baseline, or a creation when
    /// nothing exists yet. The caller's fields win over the baseline.
    pub fn submission_over(&self, baseline: Option<&Entity>) -> Submission {
        match baseline {
            Some(current) => Submission {
                entity_type: self.entity_type.clone(),
                id: self.id.clone(),
                expect: Expectation::Current {
                    version: current.envelope.version,
                    uid: Some(current.envelope.uid.clone()),
                },
                fields: merge_fields(&current.payload, &self.fields),
            },
            None => self.creation(),
        }
    }

    pub fn creation(&self) -> Submission {
        Submission {
            entity_type: self.entity_type.clone(),
            id: self.id.clone(),
            expect: Expectation::Create,
            fields: self.fields.clone(),
        }
    }
}

/// Outcome of recording a failed attempt against a [`RetryBudget`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryStep {
    /// Try again; `attempt` counts retries of this kind so far
    Retry { attempt: u32 },
    /// Budget spent; `attempts` is the number of submissions that failed
    GiveUp { attempts: u32 },
}

/// Bounds the recoverable failures of one mutation sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryBudget {
    conflict_limit: u32,
    not_found_limit: u32,
    conflicts: u32,
    not_found: u32,
}

impl RetryBudget {
    pub fn new(conflict_limit: u32, not_found_limit: u32) -> Self {
        Self {
            conflict_limit,
            not_found_limit,
            conflicts: 0,
            not_found: 0,
        }
    }

    /// Budget derived from the transport retry count: conflicts get twice
    /// as many attempts.
    pub fn for_max_retries(max_retries: u32) -> Self {
        Self::new(max_retries.saturating_mul(2), DEFAULT_NOT_FOUND_RETRIES)
    }

    pub fn record_conflict(&mut self) -> RetryStep {
        if self.conflicts < self.conflict_limit {
            self.conflicts += 1;
            RetryStep::Retry {
                attempt: self.conflicts,
            }
        } else {
            RetryStep::GiveUp {
                attempts: self.conflicts + 1,
            }
        }
    }

    pub fn record_not_found(&mut self) -> RetryStep {
        if self.not_found < self.not_found_limit {
            self.not_found += 1;
            RetryStep::Retry {
                attempt: self.not_found,
            }
        } else {
            RetryStep::GiveUp {
                attempts: self.not_found + 1,
            }
        }
    }

    pub fn conflicts(&self) -> u32 {
        self.conflicts
    }

    pub fn not_found(&self) -> u32 {
        self.not_found
    }
}
