//! Admin endpoint handlers.
//!
//! Every mutation runs under the config-document lock, so runtime state and
//! the persisted file change in the same order.

use axum::{
    extract::{rejection::JsonRejection, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::admin::AdminState;
use crate::config::{save_config, validate_backend_url, BalancerConfig, ClientQuotaConfig, ConfigError};
use crate::health::probe_backend;
use crate::http::response::error_response;
use crate::load_balancer::backend::Backend;
use crate::load_balancer::RegistryError;
use crate::security::{Quota, RateLimiter};

#[derive(Debug, Error)]
pub enum AdminError {
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Conflict(String),
    #[error("failed to persist configuration: {0}")]
    Persist(#[from] ConfigError),
}

impl From<JsonRejection> for AdminError {
    fn from(rejection: JsonRejection) -> Self {
        AdminError::BadRequest(rejection.body_text())
    }
}

impl From<RegistryError> for AdminError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::AlreadyExists(_) => AdminError::Conflict(err.to_string()),
            RegistryError::NotFound(_) => AdminError::NotFound(err.to_string()),
        }
    }
}

impl IntoResponse for AdminError {
    fn into_response(self) -> Response {
        let status = match &self {
            AdminError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AdminError::NotFound(_) => StatusCode::NOT_FOUND,
            AdminError::Conflict(_) => StatusCode::CONFLICT,
            AdminError::Persist(e) => {
                tracing::error!(error = %e, "Admin change applied but not persisted");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        error_response(status, self.to_string())
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SystemStatus {
    pub version: String,
    pub backends: usize,
    pub healthy_backends: usize,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct BackendView {
    pub url: String,
    pub healthy: bool,
    pub last_checked_ms: Option<u64>,
}

impl From<&Backend> for BackendView {
    fn from(backend: &Backend) -> Self {
        let status = backend.status();
        Self {
            url: backend.url().to_string(),
            healthy: status.healthy,
            last_checked_ms: status.last_checked_ms(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct AddBackendRequest {
    pub url: String,
}

#[derive(Debug, Deserialize)]
pub struct BackendQuery {
    pub url: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ClientQuery {
    pub client_id: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RateLimitRequest {
    pub capacity: f64,
    pub rate: f64,
}

fn persist(state: &AdminState, config: &BalancerConfig) -> Result<(), AdminError> {
    if let Some(path) = &state.config_path {
        save_config(path, config)?;
        tracing::debug!(path = %path.display(), "Configuration saved");
    }
    Ok(())
}

fn required(value: Option<String>, name: &str) -> Result<String, AdminError> {
    value
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| AdminError::BadRequest(format!("missing query parameter {:?}", name)))
}

pub async fn get_status(State(state): State<AdminState>) -> Json<SystemStatus> {
    let backends = state.registry.list();
    Json(SystemStatus {
        version: env!("CARGO_PKG_VERSION").to_string(),
        backends: backends.len(),
        healthy_backends: backends.iter().filter(|b| b.is_healthy()).count(),
    })
}

pub async fn list_backends(State(state): State<AdminState>) -> Json<Vec<BackendView>> {
    let views = state
        .registry
        .list()
        .iter()
        .map(|b| BackendView::from(b.as_ref()))
        .collect();
    Json(views)
}

/// Register a backend and probe it once so it can take traffic before the
/// next monitor round.
pub async fn add_backend(
    State(state): State<AdminState>,
    body: Result<Json<AddBackendRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<BackendView>), AdminError> {
    let Json(request) = body?;
    let url = request.url.trim().to_string();
    validate_backend_url(&url).map_err(AdminError::BadRequest)?;

    let mut config = state.config.lock().await;
    let backend = state.registry.add(url.clone())?;

    probe_backend(&state.probe, &backend).await;

    config.backends.push(url);
    persist(&state, &config)?;
    Ok((StatusCode::CREATED, Json(BackendView::from(backend.as_ref()))))
}

pub async fn remove_backend(
    State(state): State<AdminState>,
    Query(query): Query<BackendQuery>,
) -> Result<StatusCode, AdminError> {
    let url = required(query.url, "url")?;

    let mut config = state.config.lock().await;
    state.registry.remove(&url)?;

    config.backends.retain(|b| b != &url);
    persist(&state, &config)?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn update_rate_limit(
    State(state): State<AdminState>,
    body: Result<Json<RateLimitRequest>, JsonRejection>,
) -> Result<StatusCode, AdminError> {
    let Json(request) = body?;
    let quota = Quota::new(request.capacity, request.rate)
        .map_err(|e| AdminError::BadRequest(e.to_string()))?;

    let mut config = state.config.lock().await;
    state.limiter.update(quota);

    config.rate_limit.capacity = quota.capacity;
    config.rate_limit.rate = quota.rate;
    persist(&state, &config)?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn list_clients(State(state): State<AdminState>) -> Json<Vec<ClientQuotaConfig>> {
    Json(state.config.lock().await.clients.clone())
}

pub async fn add_client(
    State(state): State<AdminState>,
    body: Result<Json<ClientQuotaConfig>, JsonRejection>,
) -> Result<(StatusCode, Json<ClientQuotaConfig>), AdminError> {
    let Json(mut client) = body?;
    client.client_id = client.client_id.trim().to_string();
    if client.client_id.is_empty() {
        return Err(AdminError::BadRequest("client_id must not be empty".to_string()));
    }
    let quota = client
        .quota()
        .map_err(|e| AdminError::BadRequest(e.to_string()))?;

    let mut config = state.config.lock().await;
    if config.clients.iter().any(|c| c.client_id == client.client_id) {
        return Err(AdminError::Conflict(format!(
            "client {} already has an override",
            client.client_id
        )));
    }
    state.limiter.update_client(&client.client_id, quota);

    config.clients.push(client.clone());
    persist(&state, &config)?;
    Ok((StatusCode::CREATED, Json(client)))
}

/// Drop a client's override; its bucket falls back to the current defaults.
pub async fn remove_client(
    State(state): State<AdminState>,
    Query(query): Query<ClientQuery>,
) -> Result<StatusCode, AdminError> {
    let client_id = required(query.client_id, "client_id")?;

    let mut config = state.config.lock().await;
    let before = config.clients.len();
    config.clients.retain(|c| c.client_id != client_id);
    let removed = state.limiter.remove_client(&client_id);
    if !removed && config.clients.len() == before {
        return Err(AdminError::NotFound(format!("client {} has no override", client_id)));
    }

    persist(&state, &config)?;
    Ok(StatusCode::NO_CONTENT)
}
