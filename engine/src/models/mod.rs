//! Typed entity models.
//!
//! A [`Model`] pairs the shared [`VersionEnvelope`] with the typed fields of
//! one entity kind. Decoding a remote [`Entity`] runs the kind's serde schema
//! over the payload; a payload that does not fit is a [`Error::Decode`], not a
//! model with placeholder values.

mod job;
mod payment;
mod timelog;

pub use job::{Job, JobFields, JobStatus};
pub use payment::{PaymentLineItem, PaymentLineItemFields, PaymentLineItemStatus};
pub use timelog::{Timelog, TimelogFields, TimelogType};

use crate::envelope::{VersionEnvelope, Versioned};
use crate::mutation::{FieldGuard, MutationRequest};
use crate::uid::generate_entity_id;
use crate::{error::Result, Entity, EntityId, EntityKind, Error, Payload};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Field schema of one entity kind.
pub trait ModelFields: Serialize + DeserializeOwned + Clone + PartialEq + fmt::Debug + Send + Sync {
    const KIND: EntityKind;

    /// Guard a full save of these fields places on the stored version.
    fn guard(&self) -> Result<Option<FieldGuard>> {
        Ok(None)
    }
}

/// A typed entity: envelope plus the kind's fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Model<F> {
    #[serde(flatten)]
    pub envelope: VersionEnvelope,
    #[serde(flatten)]
    pub fields: F,
}

impl<F: ModelFields> Model<F> {
    /// A model that has not been persisted yet.
    pub fn new(id: impl Into<EntityId>, fields: F) -> Self {
        Self {
            envelope: VersionEnvelope::unsaved(F::KIND.as_str(), id),
            fields,
        }
    }

    /// A new model with a generated id.
    pub fn create(fields: F) -> Self {
        Self::new(generate_entity_id(F::KIND.as_str()), fields)
    }

    pub fn from_entity(entity: Entity) -> Result<Self> {
        let kind = F::KIND.as_str();
        if entity.envelope.entity_type != kind {
            return Err(Error::Decode {
                kind: kind.to_string(),
                message: format!("entity is a {}", entity.envelope.entity_type),
            });
        }

        let fields = serde_json::from_value(Value::Object(entity.payload)).map_err(|e| Error::Decode {
            kind: kind.to_string(),
            message: e.to_string(),
        })?;

        Ok(Self {
            envelope: entity.envelope,
            fields,
        })
    }

    pub fn to_payload(&self) -> Result<Payload> {
        match serde_json::to_value(&self.fields) {
            Ok(Value::Object(payload)) => Ok(payload),
            Ok(other) => Err(Error::InvalidPayload(format!(
                "{} fields encode to {other}",
                F::KIND
            ))),
            Err(e) => Err(Error::InvalidPayload(e.to_string())),
        }
    }

    pub fn into_entity(self) -> Result<Entity> {
        let payload = self.to_payload()?;
        Ok(Entity::new(self.envelope, payload))
    }

    /// A mutation writing every field, pinned to this model's version when
    /// it has been persisted. Persisted models also carry the kind's guard.
    pub fn to_request(&self) -> Result<MutationRequest> {
        let request = MutationRequest::new(F::KIND.as_str(), self.envelope.id.clone(), self.to_payload()?);
        let Some(token) = self.envelope.token() else {
            return Ok(request);
        };
        let request = request.pinned(token.version, Some(token.uid));
        Ok(match self.fields.guard()? {
            Some(guard) => request.guarded(guard),
            None => request,
        })
    }
}

impl<F> Versioned for Model<F> {
    fn envelope(&self) -> &VersionEnvelope {
        &self.envelope
    }
}

/// Status enums with an explicit transition table.
pub trait Transition: Copy + PartialEq + fmt::Display + 'static {
    /// Every state.
    const ALL: &'static [Self];

    /// States reachable from `self` in one step.
    fn allowed(&self) -> &'static [Self];

    fn can_transition_to(&self, next: Self) -> bool {
        self.allowed().contains(&next)
    }

    fn validate_transition(&self, next: Self) -> Result<()> {
        if self.can_transition_to(next) {
            Ok(())
        } else {
            Err(Error::InvalidTransition {
                from: self.to_string(),
                to: next.to_string(),
            })
        }
    }

    /// No further transitions possible.
    fn is_terminal(&self) -> bool {
        self.allowed().is_empty()
    }
}

/// Guard admitting only states that move to `to` in one step.
pub fn transition_guard<S: Transition + Serialize>(field: &str, to: S) -> Result<FieldGuard> {
    let from = S::ALL.iter().copied().filter(|from| from.can_transition_to(to));
    guard_from(field, to, from)
}

/// Guard for writing `to` over a state that already is `to` or moves to it
/// in one step. An identity that does not exist yet is admitted.
pub fn status_guard<S: Transition + Serialize>(field: &str, to: S) -> Result<FieldGuard> {
    let from = S::ALL
        .iter()
        .copied()
        .filter(|from| *from == to || from.can_transition_to(to));
    let mut guard = guard_from(field, to, from)?;
    guard.allowed_from.push(Value::Null);
    Ok(guard)
}

fn guard_from<S: Serialize>(field: &str, to: S, from: impl Iterator<Item = S>) -> Result<FieldGuard> {
    fn encode<S: Serialize>(state: &S) -> Result<Value> {
        serde_json::to_value(state).map_err(|e| Error::InvalidPayload(e.to_string()))
    }

    let allowed_from = from.map(|state| encode(&state)).collect::<Result<Vec<_>>>()?;
    Ok(FieldGuard::new(field, encode(&to)?, allowed_from))
}
