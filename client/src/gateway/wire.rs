//! JSON bodies exchanged with the store's HTTP API.
//!
//! Entities travel flat: envelope keys next to payload keys, envelope wins.

use super::GatewayError;
use scd_engine::{Entity, EntityId, Expectation, FailureReason, Payload, Submission};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Body of `PUT /v1/{type}/{id}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateRequest {
    pub expect: Expectation,
    #[serde(default)]
    pub fields: Payload,
}

/// Body of `POST /v1/{type}/batch-get`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchGetRequest {
    pub ids: Vec<EntityId>,
}

/// Body of `POST /v1/{type}/batch-update`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchUpdateRequest {
    pub entities: Vec<Submission>,
}

/// Response of `POST /v1/{type}/batch-update`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchUpdateResponse {
    #[serde(default)]
    pub updated: BTreeMap<EntityId, Payload>,
    #[serde(default)]
    pub rejected: BTreeMap<EntityId, FailureReason>,
}

/// Error response body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl ErrorBody {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            details: None,
        }
    }

    /// Best-effort message from a raw response body.
    pub fn message_from(raw: &str) -> String {
        match serde_json::from_str::<ErrorBody>(raw) {
            Ok(ErrorBody {
                error,
                details: Some(details),
            }) => format!("{error}: {details}"),
            Ok(body) => body.error,
            Err(_) if raw.trim().is_empty() => "no response body".to_string(),
            Err(_) => raw.trim().to_string(),
        }
    }
}

pub fn encode_entity(entity: &Entity) -> Payload {
    entity.to_flat()
}

pub fn decode_entity(flat: Payload) -> Result<Entity, GatewayError> {
    Entity::from_flat(flat).map_err(|e| GatewayError::InvalidResponse(e.to_string()))
}

pub fn decode_entities(rows: Vec<Payload>) -> Result<Vec<Entity>, GatewayError> {
    rows.into_iter().map(decode_entity).collect()
}

pub fn decode_entity_map(
    rows: BTreeMap<EntityId, Payload>,
) -> Result<BTreeMap<EntityId, Entity>, GatewayError> {
    rows.into_iter()
        .map(|(id, flat)| decode_entity(flat).map(|entity| (id, entity)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn entity_travels_flat() {
        let flat = json!({
            "id": "job_1",
            "entityType": "job",
            "version": 2,
            "uid": "job_uid_2",
            "createdAt": 1,
            "updatedAt": 2,
            "status": "active"
        })
        .as_object()
        .cloned()
        .unwrap();

        let entity = decode_entity(flat.clone()).unwrap();
        assert_eq!(entity.envelope.version, 2);
        assert_eq!(entity.payload["status"], "active");
        assert_eq!(encode_entity(&entity), flat);
    }

    #[test]
    fn malformed_entity_is_invalid_response() {
        let flat = json!({"id": "job_1"}).as_object().cloned().unwrap();
        assert!(matches!(
            decode_entity(flat),
            Err(GatewayError::InvalidResponse(_))
        ));
    }

    #[test]
    fn error_messages() {
        assert_eq!(
            ErrorBody::message_from(r#"{"error":"stale","details":"version 2"}"#),
            "stale: version 2"
        );
        assert_eq!(ErrorBody::message_from(r#"{"error":"gone"}"#), "gone");
        assert_eq!(ErrorBody::message_from("bad gateway"), "bad gateway");
        assert_eq!(ErrorBody::message_from(""), "no response body");
    }

    #[test]
    fn update_request_format() {
        let body = UpdateRequest {
            expect: Expectation::Create,
            fields: Payload::new(),
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["expect"]["kind"], "create");
    }
}
