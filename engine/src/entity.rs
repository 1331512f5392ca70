//! The entity as exchanged with the remote store: envelope plus payload.

use crate::envelope::{VersionEnvelope, Versioned, RESERVED_FIELDS};
use crate::query::{Conditions, Ranges};
use crate::{error::Result, Error};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Entity-type-specific attributes. The core passes them through untouched.
pub type Payload = serde_json::Map<String, Value>;

/// One persisted version of an entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Entity {
    #[serde(flatten)]
    pub envelope: VersionEnvelope,
    #[serde(default)]
    pub payload: Payload,
}

impl Entity {
    /// Build an entity, dropping payload keys that collide with the envelope.
    pub fn new(envelope: VersionEnvelope, payload: Payload) -> Self {
        Self {
            envelope,
            payload: strip_reserved(payload),
        }
    }

    /// Caller-visible flat view. Envelope fields win over payload keys.
    pub fn to_flat(&self) -> Payload {
        let mut flat = self.payload.clone();
        let env = &self.envelope;
        flat.insert("id".into(), Value::from(env.id.clone()));
        flat.insert("entityType".into(), Value::from(env.entity_type.clone()));
        flat.insert("version".into(), Value::from(env.version));
        flat.insert("uid".into(), Value::from(env.uid.clone()));
        flat.insert("createdAt".into(), Value::from(env.created_at));
        flat.insert("updatedAt".into(), Value::from(env.updated_at));
        flat
    }

    /// Parse a flat view back into envelope and payload.
    pub fn from_flat(flat: Payload) -> Result<Self> {
        let (envelope, payload): (Payload, Payload) = flat
            .into_iter()
            .partition(|(key, _)| RESERVED_FIELDS.contains(&key.as_str()));

        let envelope: VersionEnvelope = serde_json::from_value(Value::Object(envelope))
            .map_err(|e| Error::InvalidPayload(format!("bad envelope: {e}")))?;

        Ok(Self { envelope, payload })
    }

    /// Look up a field by its caller-visible name, envelope first.
    pub fn field(&self, name: &str) -> Option<Value> {
        let env = &self.envelope;
        match name {
            "id" => Some(Value::from(env.id.clone())),
            "entityType" => Some(Value::from(env.entity_type.clone())),
            "version" => Some(Value::from(env.version)),
            "uid" => Some(Value::from(env.uid.clone())),
            "createdAt" => Some(Value::from(env.created_at)),
            "updatedAt" => Some(Value::from(env.updated_at)),
            _ => self.payload.get(name).cloned(),
        }
    }

    /// Equality match on every condition.
    pub fn matches(&self, conditions: &Conditions) -> bool {
        conditions.iter().all(|(field, expected)| match self.field(field) {
            Some(actual) => values_equal(&actual, expected),
            None => expected.is_null(),
        })
    }

    /// Every ranged field lies inside its bounds.
    pub fn within(&self, ranges: &Ranges) -> bool {
        ranges
            .iter()
            .all(|(field, range)| range.contains(self.field(field).as_ref()))
    }
}

impl Versioned for Entity {
    fn envelope(&self) -> &VersionEnvelope {
        &self.envelope
    }
}

/// Merge `overlay` over `base`. Overlay keys win; reserved keys are ignored.
pub fn merge_fields(base: &Payload, overlay: &Payload) -> Payload {
    let mut merged = strip_reserved(base.clone());
    for (key, value) in overlay {
        if !RESERVED_FIELDS.contains(&key.as_str()) {
            merged.insert(key.clone(), value.clone());
        }
    }
    merged
}

pub(crate) fn strip_reserved(mut payload: Payload) -> Payload {
    for key in RESERVED_FIELDS {
        payload.remove(key);
    }
    payload
}

/// Numbers compare by value, so `80` matches `80.0`.
pub(crate) fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => match (x.as_i64(), y.as_i64()) {
            (Some(x), Some(y)) => x == y,
            _ => x.as_f64() == y.as_f64(),
        },
        _ => a == b,
    }
}
