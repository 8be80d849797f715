//! Operator-facing admin API.
//!
//! # Responsibilities
//! - Expose the backend registry and rate-limit quotas over JSON
//! - Authenticate every call with a bearer token
//! - Write accepted changes back to the config file the process started from
//!
//! # Design Decisions
//! - Served on its own listener so it can stay on a private interface
//! - One async mutex over the config document serialises all mutations

pub mod auth;
pub mod handlers;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    middleware,
    routing::{get, patch},
    Router,
};
use tokio::net::TcpListener;
use tokio::sync::{broadcast, Mutex};
use tower_http::trace::TraceLayer;

use crate::config::BalancerConfig;
use crate::health::HealthProbe;
use crate::load_balancer::BackendRegistry;
use crate::security::TokenBucketLimiter;

use self::auth::admin_auth_middleware;
use self::handlers::*;

#[derive(Clone)]
pub struct AdminState {
    pub registry: Arc<BackendRegistry>,
    pub limiter: Arc<TokenBucketLimiter>,
    pub probe: Arc<HealthProbe>,
    pub config: Arc<Mutex<BalancerConfig>>,
    /// Where accepted changes are saved. `None` keeps them in memory only.
    pub config_path: Option<PathBuf>,
    pub api_key: Arc<str>,
}

pub fn setup_admin_router(state: AdminState) -> Router {
    Router::new()
        .route("/admin/status", get(get_status))
        .route(
            "/admin/backends",
            get(list_backends).post(add_backend).delete(remove_backend),
        )
        .route("/admin/ratelimit", patch(update_rate_limit))
        .route(
            "/admin/clients",
            get(list_clients).post(add_client).delete(remove_client),
        )
        .layer(middleware::from_fn_with_state(
            state.clone(),
            admin_auth_middleware,
        ))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve the admin router on `listener` until `shutdown` fires.
pub async fn run_admin_server(
    listener: TcpListener,
    state: AdminState,
    mut shutdown: broadcast::Receiver<()>,
) -> Result<(), std::io::Error> {
    let addr: SocketAddr = listener.local_addr()?;
    tracing::info!(address = %addr, "Admin API starting");

    axum::serve(listener, setup_admin_router(state))
        .with_graceful_shutdown(async move {
            let _ = shutdown.recv().await;
        })
        .await?;

    tracing::info!("Admin API stopped");
    Ok(())
}
