//! HTTP server setup and request orchestration.
//!
//! # Responsibilities
//! - Create the Axum router with a catch-all proxy handler
//! - Wire up middleware (request ID, tracing)
//! - Run each request through admission, selection and forwarding
//! - Serve until the shutdown broadcast fires, then drain gracefully
//!
//! # Data Flow
//! ```text
//! client ─▶ RateLimiter::allow(ip) ──false──▶ 429
//!                 │ true
//!                 ▼
//!          LoadBalancer::next_backend ──None──▶ 503
//!                 │ Some(backend)
//!                 ▼
//!          Forwarder::forward ──Err──▶ 502
//!                 │ Ok(response)
//!                 ▼
//!          backend status relayed verbatim
//! ```

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Instant;

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::Request,
    response::{IntoResponse, Response},
    routing::any,
    Router,
};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower_http::trace::TraceLayer;

use crate::http::forward::Forwarder;
use crate::http::request::{propagate_request_id_layer, request_id, set_request_id_layer};
use crate::http::response::ProxyError;
use crate::load_balancer::{backend::Backend, LoadBalancer};
use crate::observability::metrics;
use crate::security::RateLimiter;

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub limiter: Arc<dyn RateLimiter>,
    pub balancer: Arc<dyn LoadBalancer>,
    pub forwarder: Arc<Forwarder>,
}

impl AppState {
    pub fn new(limiter: Arc<dyn RateLimiter>, balancer: Arc<dyn LoadBalancer>) -> Self {
        Self {
            limiter,
            balancer,
            forwarder: Arc::new(Forwarder::new()),
        }
    }
}

/// HTTP server for the load balancer's public listener.
pub struct HttpServer {
    router: Router,
}

impl HttpServer {
    pub fn new(state: AppState) -> Self {
        Self {
            router: Self::build_router(state),
        }
    }

    fn build_router(state: AppState) -> Router {
        Router::new()
            .route("/{*path}", any(proxy_handler))
            .route("/", any(proxy_handler))
            .with_state(state)
            .layer(propagate_request_id_layer())
            .layer(TraceLayer::new_for_http())
            .layer(set_request_id_layer())
    }

    /// Accept connections on `listener` until `shutdown` fires.
    pub async fn run(
        self,
        listener: TcpListener,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, "HTTP server starting");

        let app = self.router.into_make_service_with_connect_info::<SocketAddr>();
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
            })
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}

async fn proxy_handler(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    request: Request<Body>,
) -> Response {
    let start = Instant::now();
    let request_id = request_id(&request);
    let method = request.method().to_string();
    let path = request.uri().path().to_string();

    tracing::debug!(
        request_id = %request_id,
        method = %method,
        path = %path,
        client = %peer.ip(),
        "Proxying request"
    );

    match dispatch(&state, request, peer.ip()).await {
        Ok((backend, response)) => {
            metrics::record_request(&method, response.status().as_u16(), backend.url(), start);
            response
        }
        Err(err) => {
            let backend = match &err {
                ProxyError::RateLimitExceeded => {
                    tracing::debug!(request_id = %request_id, client = %peer.ip(), "Rate limit exceeded");
                    metrics::record_rate_limited();
                    "none".to_string()
                }
                ProxyError::NoAvailableBackends => {
                    tracing::warn!(request_id = %request_id, "No healthy backends");
                    "none".to_string()
                }
                ProxyError::Forward(e) => {
                    tracing::error!(
                        request_id = %request_id,
                        backend = %e.backend(),
                        error = %e,
                        "Upstream error"
                    );
                    e.backend().to_string()
                }
            };
            metrics::record_request(&method, err.status().as_u16(), &backend, start);
            err.into_response()
        }
    }
}

/// One pass through the pipeline for a caller identified by `client_ip`.
///
/// On success returns the chosen backend and its relayed response.
pub async fn dispatch(
    state: &AppState,
    request: Request<Body>,
    client_ip: IpAddr,
) -> Result<(Arc<Backend>, Response), ProxyError> {
    if !state.limiter.allow(&client_ip.to_string()).await {
        return Err(ProxyError::RateLimitExceeded);
    }

    let backend = state
        .balancer
        .next_backend()
        .ok_or(ProxyError::NoAvailableBackends)?;

    let response = state
        .forwarder
        .forward(request, backend.url(), Some(client_ip))
        .await?;
    Ok((backend, response))
}
