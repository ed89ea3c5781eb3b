// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Authorization service (OpenFGA) integration.
//!
//! Records the store credentials as a fragment and talks to the service API
//! for model creation and relationship tuples.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use temporal_operator_state::{Authorization, LeaderToken, StateError, StateStore, update_state};
use thiserror::Error;
use tracing::{info, warn};

use super::AdapterOutcome;

/// Errors from authorization model provisioning.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum AuthorizationError {
    /// No model was given.
    #[error("authorization model not specified")]
    ModelNotSpecified,

    /// The model is not valid JSON.
    #[error("failed to parse model json")]
    InvalidModel(#[source] serde_json::Error),

    /// No authorization store is recorded.
    #[error("openfga relation not ready")]
    NotReady,

    /// The action parameters match none of the accepted combinations.
    #[error("parameter combination not supported. parameters for this operation must either be:\n{0}")]
    UnsupportedParameters(String),

    /// The role is not one of the namespace roles.
    #[error("provided role '{0}' not in allowed roles: admin, writer, reader")]
    RoleNotAllowed(String),

    /// HTTP transport failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The service answered with an error.
    #[error("authorization service returned {status}: {body}")]
    Api {
        /// HTTP status.
        status: u16,
        /// Response body.
        body: String,
    },

    /// Reading or writing the shared state failed.
    #[error(transparent)]
    State(#[from] StateError),
}

/// Store credentials as delivered by the authorization integration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorizationStore {
    /// Store identifier; absent until the store exists.
    #[serde(default)]
    pub store_id: Option<String>,
    /// API bearer token.
    #[serde(default)]
    pub token: Option<String>,
    /// API host.
    #[serde(default)]
    pub address: Option<String>,
    /// API port.
    #[serde(default)]
    pub port: Option<String>,
    /// `http` or `https`.
    #[serde(default)]
    pub scheme: Option<String>,
}

/// Record the authorization store. A previously created model is kept while
/// the store identity (id, address, port, scheme) is unchanged.
pub async fn apply_store<S: StateStore + ?Sized>(
    store: &S,
    token: &LeaderToken,
    event: &AuthorizationStore,
) -> temporal_operator_state::Result<AdapterOutcome> {
    let field = |value: &Option<String>, name: &str| {
        value
            .as_deref()
            .filter(|v| !v.is_empty())
            .map(String::from)
            .ok_or_else(|| AdapterOutcome::Incomplete(format!("openfga: missing {name}")))
    };
    let authorization = (|| {
        Ok::<_, AdapterOutcome>(Authorization {
            store_id: field(&event.store_id, "store_id")?,
            token: field(&event.token, "token")?,
            address: field(&event.address, "address")?,
            port: field(&event.port, "port")?,
            scheme: field(&event.scheme, "scheme")?,
            auth_model_id: None,
        })
    })();

    let authorization = match authorization {
        Ok(authorization) => authorization,
        Err(outcome) => {
            info!(?outcome, "Authorization store not usable yet");
            return Ok(outcome);
        }
    };

    let store_id = authorization.store_id.clone();
    update_state(store, token, |state| {
        let mut authorization = authorization;
        if let Some(recorded) = state.authorization.as_ref()
            && same_store(recorded, &authorization)
        {
            authorization.auth_model_id = recorded.auth_model_id.clone();
        }
        state.authorization = Some(authorization)
    })
    .await?;
    info!(store_id = %store_id, "Authorization store recorded");
    Ok(AdapterOutcome::Applied)
}

fn same_store(a: &Authorization, b: &Authorization) -> bool {
    a.store_id == b.store_id && a.address == b.address && a.port == b.port && a.scheme == b.scheme
}

/// Clear the authorization fragment.
pub async fn remove<S: StateStore + ?Sized>(
    store: &S,
    token: &LeaderToken,
) -> temporal_operator_state::Result<AdapterOutcome> {
    update_state(store, token, |state| state.authorization = None).await?;
    info!("Authorization store removed");
    Ok(AdapterOutcome::Applied)
}

/// A relationship tuple: `user` has `relation` on `object`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TupleKey {
    /// Subject, e.g. `user:alice` or `group:ops#member`.
    pub user: String,
    /// Relation name.
    pub relation: String,
    /// Object, e.g. `namespace:default`.
    pub object: String,
}

/// Client for the authorization service API.
#[async_trait]
pub trait AuthorizationClient: Send + Sync {
    /// Post `model` to the store in `authorization`, returning the model id.
    async fn create_model(
        &self,
        authorization: &Authorization,
        model: &serde_json::Value,
    ) -> Result<String, AuthorizationError>;

    /// Write and delete relationship tuples.
    async fn write_tuples(
        &self,
        authorization: &Authorization,
        writes: &[TupleKey],
        deletes: &[TupleKey],
    ) -> Result<(), AuthorizationError>;

    /// Whether the relationship in `tuple` holds.
    async fn check(
        &self,
        authorization: &Authorization,
        tuple: &TupleKey,
    ) -> Result<bool, AuthorizationError>;

    /// Objects of `object_type` on which `user` has `relation`.
    async fn list_objects(
        &self,
        authorization: &Authorization,
        user: &str,
        relation: &str,
        object_type: &str,
    ) -> Result<Vec<String>, AuthorizationError>;

    /// Every stored tuple on `object`.
    async fn read_tuples(
        &self,
        authorization: &Authorization,
        object: &str,
    ) -> Result<Vec<TupleKey>, AuthorizationError>;
}

/// OpenFGA HTTP client.
#[derive(Debug, Clone)]
pub struct OpenFgaClient {
    http: reqwest::Client,
}

#[derive(Deserialize)]
struct CreateModelResponse {
    authorization_model_id: String,
}

#[derive(Deserialize)]
struct CheckResponse {
    #[serde(default)]
    allowed: bool,
}

#[derive(Deserialize)]
struct ListObjectsResponse {
    #[serde(default)]
    objects: Vec<String>,
}

#[derive(Deserialize)]
struct ReadResponse {
    #[serde(default)]
    tuples: Vec<StoredTuple>,
    #[serde(default)]
    continuation_token: String,
}

#[derive(Deserialize)]
struct StoredTuple {
    key: TupleKey,
}

impl OpenFgaClient {
    /// Create a client with a request timeout.
    pub fn new(timeout: Duration) -> Result<Self, AuthorizationError> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { http })
    }

    async fn post<T: serde::de::DeserializeOwned>(
        &self,
        authorization: &Authorization,
        endpoint: &str,
        body: &serde_json::Value,
    ) -> Result<T, AuthorizationError> {
        let url = format!(
            "{}/stores/{}/{endpoint}",
            authorization.api_url(),
            authorization.store_id
        );

        let response = self
            .http
            .post(&url)
            .bearer_auth(&authorization.token)
            .json(body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AuthorizationError::Api {
                status: status.as_u16(),
                body,
            });
        }

        Ok(response.json().await?)
    }
}

/// Request body with the recorded model id, when there is one.
fn with_model_id(authorization: &Authorization, mut body: serde_json::Value) -> serde_json::Value {
    if let (Some(id), Some(map)) = (&authorization.auth_model_id, body.as_object_mut()) {
        map.insert("authorization_model_id".to_string(), json!(id));
    }
    body
}

#[async_trait]
impl AuthorizationClient for OpenFgaClient {
    async fn create_model(
        &self,
        authorization: &Authorization,
        model: &serde_json::Value,
    ) -> Result<String, AuthorizationError> {
        let created: CreateModelResponse = self
            .post(authorization, "authorization-models", model)
            .await?;
        Ok(created.authorization_model_id)
    }

    async fn write_tuples(
        &self,
        authorization: &Authorization,
        writes: &[TupleKey],
        deletes: &[TupleKey],
    ) -> Result<(), AuthorizationError> {
        let mut body = serde_json::Map::new();
        if !writes.is_empty() {
            body.insert("writes".to_string(), json!({ "tuple_keys": writes }));
        }
        if !deletes.is_empty() {
            body.insert("deletes".to_string(), json!({ "tuple_keys": deletes }));
        }
        let body = with_model_id(authorization, serde_json::Value::Object(body));

        let _: serde_json::Value = self.post(authorization, "write", &body).await?;
        Ok(())
    }

    async fn check(
        &self,
        authorization: &Authorization,
        tuple: &TupleKey,
    ) -> Result<bool, AuthorizationError> {
        let body = with_model_id(authorization, json!({ "tuple_key": tuple }));
        let response: CheckResponse = self.post(authorization, "check", &body).await?;
        Ok(response.allowed)
    }

    async fn list_objects(
        &self,
        authorization: &Authorization,
        user: &str,
        relation: &str,
        object_type: &str,
    ) -> Result<Vec<String>, AuthorizationError> {
        let body = with_model_id(
            authorization,
            json!({ "user": user, "relation": relation, "type": object_type }),
        );
        let response: ListObjectsResponse =
            self.post(authorization, "list-objects", &body).await?;
        Ok(response.objects)
    }

    async fn read_tuples(
        &self,
        authorization: &Authorization,
        object: &str,
    ) -> Result<Vec<TupleKey>, AuthorizationError> {
        let mut tuples = Vec::new();
        let mut continuation_token = String::new();
        loop {
            let mut body = json!({ "tuple_key": { "object": object } });
            if !continuation_token.is_empty() {
                body["continuation_token"] = json!(continuation_token);
            }
            let page: ReadResponse = self.post(authorization, "read", &body).await?;
            tuples.extend(page.tuples.into_iter().map(|t| t.key));
            if page.continuation_token.is_empty() {
                return Ok(tuples);
            }
            continuation_token = page.continuation_token;
        }
    }
}

/// The recorded authorization store.
pub async fn recorded_authorization<S: StateStore + ?Sized>(
    store: &S,
) -> Result<Authorization, AuthorizationError> {
    store
        .load()
        .await?
        .and_then(|versioned| versioned.state.authorization)
        .ok_or(AuthorizationError::NotReady)
}

/// Create an authorization model and record its id.
pub async fn create_authorization_model<S, C>(
    store: &S,
    token: &LeaderToken,
    client: &C,
    model: Option<&str>,
) -> Result<String, AuthorizationError>
where
    S: StateStore + ?Sized,
    C: AuthorizationClient + ?Sized,
{
    let model = model
        .map(str::trim)
        .filter(|m| !m.is_empty())
        .ok_or(AuthorizationError::ModelNotSpecified)?;
    let model: serde_json::Value =
        serde_json::from_str(model).map_err(AuthorizationError::InvalidModel)?;

    let authorization = recorded_authorization(store).await?;

    let model_id = match client.create_model(&authorization, &model).await {
        Ok(id) => id,
        Err(e) => {
            warn!(store_id = %authorization.store_id, error = %e, "Failed to create authorization model");
            return Err(e);
        }
    };

    update_state(store, token, |state| {
        if let Some(auth) = state.authorization.as_mut() {
            auth.auth_model_id = Some(model_id.clone());
        }
    })
    .await?;

    info!(model_id = %model_id, "Authorization model created");
    Ok(model_id)
}
