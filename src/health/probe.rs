//! Single-backend health probe.
//!
//! Wire contract: `GET <backend_url><path>`; only `200 OK` is healthy.

use std::fmt;
use std::time::Duration;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use hyper_util::{
    client::legacy::{connect::HttpConnector, Client},
    rt::TokioExecutor,
};
use tokio::time;

/// Why a probe did not classify a backend as healthy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeFailure {
    /// The probe request could not be constructed (malformed URL).
    InvalidRequest(String),
    /// Connect or transport error.
    Transport(String),
    /// The backend answered with something other than 200.
    Status(StatusCode),
    Timeout,
}

impl fmt::Display for ProbeFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProbeFailure::InvalidRequest(e) => write!(f, "invalid probe request: {}", e),
            ProbeFailure::Transport(e) => write!(f, "connection error: {}", e),
            ProbeFailure::Status(s) => write!(f, "unexpected status {}", s),
            ProbeFailure::Timeout => write!(f, "timed out"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeOutcome {
    Healthy,
    Unhealthy(ProbeFailure),
}

impl ProbeOutcome {
    pub fn is_healthy(&self) -> bool {
        matches!(self, ProbeOutcome::Healthy)
    }
}

/// Issues bounded-timeout health checks.
#[derive(Debug, Clone)]
pub struct HealthProbe {
    client: Client<HttpConnector, Body>,
    path: String,
    timeout: Duration,
}

impl HealthProbe {
    pub fn new(path: impl Into<String>, timeout: Duration) -> Self {
        let client = Client::builder(TokioExecutor::new()).build(HttpConnector::new());
        Self {
            client,
            path: path.into(),
            timeout,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Probe one backend. Never fails; every error degrades to `Unhealthy`.
    pub async fn check(&self, backend_url: &str) -> ProbeOutcome {
        let uri = format!("{}{}", backend_url.trim_end_matches('/'), self.path);

        let request = match Request::builder()
            .method("GET")
            .uri(uri)
            .header(header::USER_AGENT, "traffic-lb-health-check")
            .body(Body::empty())
        {
            Ok(req) => req,
            Err(e) => return ProbeOutcome::Unhealthy(ProbeFailure::InvalidRequest(e.to_string())),
        };

        match time::timeout(self.timeout, self.client.request(request)).await {
            Ok(Ok(response)) if response.status() == StatusCode::OK => ProbeOutcome::Healthy,
            Ok(Ok(response)) => ProbeOutcome::Unhealthy(ProbeFailure::Status(response.status())),
            Ok(Err(e)) => ProbeOutcome::Unhealthy(ProbeFailure::Transport(e.to_string())),
            Err(_) => ProbeOutcome::Unhealthy(ProbeFailure::Timeout),
        }
    }
}
