//! HTTP JSON gateway.

use super::wire::{
    decode_entities, decode_entity, decode_entity_map, BatchGetRequest, BatchUpdateRequest,
    BatchUpdateResponse, ErrorBody, UpdateRequest,
};
use super::{BatchUpdateResult, EntityGateway, GatewayError};
use crate::config::ClientConfig;
use async_trait::async_trait;
use reqwest::{RequestBuilder, Response, StatusCode, Url};
use scd_engine::{Entity, EntityId, EntityQuery, Payload, Submission, Version};
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;
use std::time::Duration;

/// Gateway speaking JSON over HTTP to `{base}/v1/...`.
#[derive(Debug, Clone)]
pub struct HttpGateway {
    client: reqwest::Client,
    base: Url,
}

impl HttpGateway {
    /// Gateway for the store named by the configuration.
    pub fn new(config: &ClientConfig) -> Result<Self, GatewayError> {
        Self::with_base_url(&config.target(), config.timeout)
    }

    pub fn with_base_url(base: &str, timeout: Duration) -> Result<Self, GatewayError> {
        let base = Url::parse(base)
            .map_err(|e| GatewayError::Invalid(format!("invalid store url {base}: {e}")))?;
        if base.cannot_be_a_base() {
            return Err(GatewayError::Invalid(format!("invalid store url {base}")));
        }

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| GatewayError::Invalid(format!("cannot build http client: {e}")))?;

        Ok(Self { client, base })
    }

    pub fn base_url(&self) -> &Url {
        &self.base
    }

    /// `{base}/v1/{segments...}`, each segment percent-encoded.
    fn url(&self, segments: &[&str]) -> Result<Url, GatewayError> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| GatewayError::Invalid(format!("invalid store url {}", self.base)))?
            .pop_if_empty()
            .push("v1")
            .extend(segments);
        Ok(url)
    }

    async fn send(
        &self,
        request: RequestBuilder,
        entity_type: &str,
        id: Option<&str>,
    ) -> Result<Response, GatewayError> {
        let response = request.send().await.map_err(transport_error)?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let raw = response.text().await.unwrap_or_default();
        Err(status_error(status, entity_type, id, &ErrorBody::message_from(&raw)))
    }

    async fn json<T: DeserializeOwned>(response: Response) -> Result<T, GatewayError> {
        response
            .json::<T>()
            .await
            .map_err(|e| GatewayError::InvalidResponse(e.to_string()))
    }
}

fn transport_error(err: reqwest::Error) -> GatewayError {
    if err.is_timeout() {
        GatewayError::Timeout(err.to_string())
    } else if err.is_decode() {
        GatewayError::InvalidResponse(err.to_string())
    } else if err.is_builder() {
        GatewayError::Invalid(err.to_string())
    } else {
        GatewayError::Unavailable(err.to_string())
    }
}

/// Map a non-success status to a gateway error.
fn status_error(status: StatusCode, entity_type: &str, id: Option<&str>, message: &str) -> GatewayError {
    match (status, id) {
        (StatusCode::NOT_FOUND, Some(id)) => GatewayError::NotFound {
            entity_type: entity_type.to_string(),
            id: id.to_string(),
        },
        (StatusCode::CONFLICT, id) => GatewayError::Conflict {
            entity_type: entity_type.to_string(),
            id: id.unwrap_or_default().to_string(),
            detail: message.to_string(),
        },
        (StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY, _) => {
            GatewayError::Invalid(message.to_string())
        }
        (StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT, _) => {
            GatewayError::Timeout(format!("{status}: {message}"))
        }
        (StatusCode::BAD_GATEWAY | StatusCode::SERVICE_UNAVAILABLE, _) => {
            GatewayError::Unavailable(format!("{status}: {message}"))
        }
        _ => GatewayError::Rejected(format!("{status}: {message}")),
    }
}

#[async_trait]
impl EntityGateway for HttpGateway {
    async fn get_latest_version(&self, entity_type: &str, id: &str) -> Result<Entity, GatewayError> {
        let url = self.url(&[entity_type, id])?;
        let response = self.send(self.client.get(url), entity_type, Some(id)).await?;
        decode_entity(Self::json::<Payload>(response).await?)
    }

    async fn get_version(
        &self,
        entity_type: &str,
        id: &str,
        version: Version,
    ) -> Result<Entity, GatewayError> {
        let version = version.to_string();
        let url = self.url(&[entity_type, id, "versions", &version])?;
        let response = self.send(self.client.get(url), entity_type, Some(id)).await?;
        decode_entity(Self::json::<Payload>(response).await?)
    }

    async fn get_version_history(
        &self,
        entity_type: &str,
        id: &str,
    ) -> Result<Vec<Entity>, GatewayError> {
        let url = self.url(&[entity_type, id, "history"])?;
        let response = self.send(self.client.get(url), entity_type, Some(id)).await?;
        let mut history = decode_entities(Self::json::<Vec<Payload>>(response).await?)?;
        if history.is_empty() {
            return Err(GatewayError::NotFound {
                entity_type: entity_type.to_string(),
                id: id.to_string(),
            });
        }
        history.sort_by_key(|e| e.envelope.version);
        Ok(history)
    }

    async fn query(&self, entity_type: &str, query: &EntityQuery) -> Result<Vec<Entity>, GatewayError> {
        let url = self.url(&[entity_type, "query"])?;
        let response = self
            .send(self.client.post(url).json(query), entity_type, None)
            .await?;
        decode_entities(Self::json::<Vec<Payload>>(response).await?)
    }

    async fn update(&self, submission: &Submission) -> Result<Entity, GatewayError> {
        let url = self.url(&[&submission.entity_type, &submission.id])?;
        let body = UpdateRequest {
            expect: submission.expect.clone(),
            fields: submission.fields.clone(),
        };
        let response = self
            .send(
                self.client.put(url).json(&body),
                &submission.entity_type,
                Some(&submission.id),
            )
            .await?;
        decode_entity(Self::json::<Payload>(response).await?)
    }

    async fn batch_get(
        &self,
        entity_type: &str,
        ids: &[EntityId],
    ) -> Result<BTreeMap<EntityId, Entity>, GatewayError> {
        let url = self.url(&[entity_type, "batch-get"])?;
        let body = BatchGetRequest { ids: ids.to_vec() };
        let response = self
            .send(self.client.post(url).json(&body), entity_type, None)
            .await?;
        decode_entity_map(Self::json::<BTreeMap<EntityId, Payload>>(response).await?)
    }

    async fn batch_update(
        &self,
        entity_type: &str,
        submissions: &[Submission],
    ) -> Result<BatchUpdateResult, GatewayError> {
        let url = self.url(&[entity_type, "batch-update"])?;
        let body = BatchUpdateRequest {
            entities: submissions.to_vec(),
        };
        let response = self
            .send(self.client.post(url).json(&body), entity_type, None)
            .await?;
        let BatchUpdateResponse { updated, rejected } = Self::json(response).await?;
        Ok(BatchUpdateResult {
            updated: decode_entity_map(updated)?,
            rejected,
        })
    }
}
