//! Caller-visible outcomes of the proxy pipeline.
//!
//! Internal errors collapse into a small set of statuses:
//! - 429 rate limit exceeded
//! - 503 no healthy backends
//! - 502 forwarding failed
//!
//! Bodies are JSON: `{"code": 503, "message": "..."}`.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::http::forward::ForwardError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: u16,
    pub message: String,
}

pub fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    let body = ErrorBody {
        code: status.as_u16(),
        message: message.into(),
    };
    (status, Json(body)).into_response()
}

#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("rate limit exceeded")]
    RateLimitExceeded,
    #[error("no healthy backends available")]
    NoAvailableBackends,
    #[error(transparent)]
    Forward(#[from] ForwardError),
}

impl ProxyError {
    pub fn status(&self) -> StatusCode {
        match self {
            ProxyError::RateLimitExceeded => StatusCode::TOO_MANY_REQUESTS,
            ProxyError::NoAvailableBackends => StatusCode::SERVICE_UNAVAILABLE,
            ProxyError::Forward(_) => StatusCode::BAD_GATEWAY,
        }
    }
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        match self {
            ProxyError::RateLimitExceeded => error_response(self.status(), "Rate limit exceeded"),
            ProxyError::NoAvailableBackends => {
                error_response(self.status(), "No healthy backends available")
            }
            ProxyError::Forward(e) => e.into_response(),
        }
    }
}
