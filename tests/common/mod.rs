//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU16, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::State,
    http::{HeaderMap, Method, StatusCode, Uri},
    response::IntoResponse,
    routing::get,
    Router,
};
use tokio::net::TcpListener;

#[derive(Clone)]
struct MockState {
    name: &'static str,
    status: Arc<AtomicU16>,
    health: Arc<AtomicU16>,
    hits: Arc<AtomicUsize>,
}

/// A programmable backend on an ephemeral port.
///
/// `/health` answers with the health status (200 by default); every other
/// path answers with the traffic status and a body of `"<name> <path?query>"`.
pub struct MockBackend {
    pub addr: SocketAddr,
    state: MockState,
}

impl MockBackend {
    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn set_status(&self, status: u16) {
        self.state.status.store(status, Ordering::SeqCst);
    }

    pub fn set_health(&self, status: u16) {
        self.state.health.store(status, Ordering::SeqCst);
    }

    /// Non-health requests served so far.
    pub fn hits(&self) -> usize {
        self.state.hits.load(Ordering::SeqCst)
    }
}

async fn health(State(state): State<MockState>) -> StatusCode {
    StatusCode::from_u16(state.health.load(Ordering::SeqCst)).unwrap_or(StatusCode::OK)
}

async fn traffic(State(state): State<MockState>, headers: HeaderMap, uri: Uri) -> impl IntoResponse {
    state.hits.fetch_add(1, Ordering::SeqCst);
    let status = StatusCode::from_u16(state.status.load(Ordering::SeqCst)).unwrap_or(StatusCode::OK);
    let forwarded_for = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_string();
    let saw_hop_header = headers.contains_key("x-hop-only").to_string();
    (
        status,
        [
            ("x-backend", state.name.to_string()),
            ("x-echo-forwarded-for", forwarded_for),
            ("x-echo-hop-header", saw_hop_header),
        ],
        format!("{} {}", state.name, uri.path_and_query().map(|p| p.as_str()).unwrap_or("/")),
    )
}

pub async fn start_mock_backend(name: &'static str) -> MockBackend {
    let state = MockState {
        name,
        status: Arc::new(AtomicU16::new(200)),
        health: Arc::new(AtomicU16::new(200)),
        hits: Arc::new(AtomicUsize::new(0)),
    };
    let app = Router::new()
        .route("/health", get(health))
        .fallback(traffic)
        .with_state(state.clone());

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });

    MockBackend { addr, state }
}

async fn serve(app: Router) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    addr
}

async fn echo(method: Method, headers: HeaderMap, body: String) -> String {
    let custom = headers
        .get("x-custom")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("-");
    format!("{} {} {}", method, body, custom)
}

/// A backend answering every non-health request with
/// `"<method> <body> <x-custom header>"`.
pub async fn start_echo_backend() -> String {
    let app = Router::new()
        .route("/health", get(|| async { StatusCode::OK }))
        .fallback(echo);
    format!("http://{}", serve(app).await)
}

/// Sets its flag when dropped.
struct DropFlag(Arc<AtomicBool>);

impl Drop for DropFlag {
    fn drop(&mut self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

/// A backend whose traffic handler never answers in time. The returned flag
/// turns true once a handler future is dropped before completing.
pub async fn start_stalled_backend() -> (String, Arc<AtomicBool>) {
    let dropped = Arc::new(AtomicBool::new(false));
    let flag = dropped.clone();
    let app = Router::new()
        .route("/health", get(|| async { StatusCode::OK }))
        .fallback(move || {
            let guard = DropFlag(flag.clone());
            async move {
                tokio::time::sleep(Duration::from_secs(30)).await;
                std::mem::forget(guard);
                StatusCode::OK
            }
        });
    (format!("http://{}", serve(app).await), dropped)
}

/// An address nothing listens on.
pub async fn unused_addr() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap()
}

pub fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .no_proxy()
        .timeout(Duration::from_secs(5))
        .build()
        .unwrap()
}

/// Poll `check` every 20ms until it holds or `within` elapses.
pub async fn eventually<F: Fn() -> bool>(within: Duration, check: F) -> bool {
    let deadline = tokio::time::Instant::now() + within;
    while tokio::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    check()
}
