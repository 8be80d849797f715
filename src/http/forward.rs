//! Reverse-proxy forwarding to a single backend.
//!
//! # Responsibilities
//! - Resolve the upstream URI from the backend URL and the inbound request
//! - Replay method, headers and body; relay status, headers and body back
//! - Report transport failures while still yielding a 502 for the caller
//!
//! # Design Decisions
//! - A backend's own error status is a successful proxy, relayed verbatim
//! - Single attempt, no retries; retry policy belongs to the caller
//! - No timeout of our own; dropping the returned future (caller gone)
//!   drops the upstream exchange

use std::net::IpAddr;

use axum::body::Body;
use axum::http::{uri::InvalidUri, Request, Response, Uri, Version};
use axum::response::IntoResponse;
use hyper::StatusCode;
use hyper_util::{
    client::legacy::{connect::HttpConnector, Client},
    rt::TokioExecutor,
};
use thiserror::Error;
use url::{Position, Url};

use crate::http::response::error_response;
use crate::security::headers;

#[derive(Debug, Error)]
pub enum ForwardError {
    #[error("invalid backend url {url}: {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },
    #[error("unsupported scheme {scheme:?} in backend url {url}")]
    UnsupportedScheme { url: String, scheme: String },
    #[error("cannot build upstream uri for {url}: {source}")]
    InvalidUri {
        url: String,
        #[source]
        source: InvalidUri,
    },
    #[error("upstream request to {url} failed: {source}")]
    Upstream {
        url: String,
        #[source]
        source: hyper_util::client::legacy::Error,
    },
}

impl ForwardError {
    /// The backend the failed attempt targeted.
    pub fn backend(&self) -> &str {
        match self {
            ForwardError::InvalidUrl { url, .. }
            | ForwardError::UnsupportedScheme { url, .. }
            | ForwardError::InvalidUri { url, .. }
            | ForwardError::Upstream { url, .. } => url,
        }
    }

    /// True when no network attempt was made.
    pub fn is_config_error(&self) -> bool {
        !matches!(self, ForwardError::Upstream { .. })
    }
}

impl IntoResponse for ForwardError {
    fn into_response(self) -> axum::response::Response {
        error_response(
            StatusCode::BAD_GATEWAY,
            format!("Failed to forward request to {}", self.backend()),
        )
    }
}

/// Pooled HTTP/1.1 client shared by all requests.
#[derive(Debug, Clone)]
pub struct Forwarder {
    client: Client<HttpConnector, Body>,
}

impl Default for Forwarder {
    fn default() -> Self {
        Self::new()
    }
}

impl Forwarder {
    pub fn new() -> Self {
        let client = Client::builder(TokioExecutor::new()).build(HttpConnector::new());
        Self { client }
    }

    /// Proxy `request` to `backend_url`.
    ///
    /// `Ok` carries whatever the backend answered, error statuses included.
    /// `Err` means the exchange itself failed; it renders as a 502.
    pub async fn forward(
        &self,
        mut request: Request<Body>,
        backend_url: &str,
        client_ip: Option<IpAddr>,
    ) -> Result<Response<Body>, ForwardError> {
        let target = Url::parse(backend_url).map_err(|source| ForwardError::InvalidUrl {
            url: backend_url.to_string(),
            source,
        })?;
        if target.scheme() != "http" {
            return Err(ForwardError::UnsupportedScheme {
                url: backend_url.to_string(),
                scheme: target.scheme().to_string(),
            });
        }

        let uri = upstream_uri(&target, request.uri()).map_err(|source| ForwardError::InvalidUri {
            url: backend_url.to_string(),
            source,
        })?;
        *request.uri_mut() = uri;
        // Upstream connections speak HTTP/1.1 regardless of the inbound version.
        *request.version_mut() = Version::HTTP_11;

        let request_headers = request.headers_mut();
        headers::strip_hop_by_hop(request_headers);
        if let Some(ip) = client_ip {
            headers::append_forwarded_for(request_headers, ip);
        }

        let response = self
            .client
            .request(request)
            .await
            .map_err(|source| ForwardError::Upstream {
                url: backend_url.to_string(),
                source,
            })?;

        let (mut parts, body) = response.into_parts();
        headers::strip_hop_by_hop(&mut parts.headers);
        Ok(Response::from_parts(parts, Body::new(body)))
    }
}

/// Scheme and authority from the backend, backend path joined with the
/// request path, queries concatenated.
pub fn upstream_uri(target: &Url, original: &Uri) -> Result<Uri, InvalidUri> {
    let authority = &target[Position::BeforeHost..Position::AfterPort];
    let path = join_paths(target.path(), original.path());
    let query = match (target.query(), original.query()) {
        (Some(a), Some(b)) if !a.is_empty() && !b.is_empty() => format!("?{}&{}", a, b),
        (Some(q), _) | (_, Some(q)) if !q.is_empty() => format!("?{}", q),
        _ => String::new(),
    };
    format!("{}://{}{}{}", target.scheme(), authority, path, query).parse()
}

fn join_paths(base: &str, path: &str) -> String {
    match (base.ends_with('/'), path.starts_with('/')) {
        (true, true) => format!("{}{}", base, &path[1..]),
        (false, false) => format!("{}/{}", base, path),
        _ => format!("{}{}", base, path),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rewrite(backend: &str, original: &str) -> String {
        let target = Url::parse(backend).unwrap();
        upstream_uri(&target, &original.parse().unwrap()).unwrap().to_string()
    }

    #[test]
    fn uri_takes_backend_authority() {
        assert_eq!(rewrite("http://10.0.0.5:9000", "/items?id=3"), "http://10.0.0.5:9000/items?id=3");
        assert_eq!(rewrite("http://10.0.0.5:9000/", "/"), "http://10.0.0.5:9000/");
    }

    #[test]
    fn uri_joins_backend_path_prefix() {
        assert_eq!(rewrite("http://svc:8080/api", "/users"), "http://svc:8080/api/users");
        assert_eq!(rewrite("http://svc/api/", "/users"), "http://svc/api/users");
    }

    #[test]
    fn uri_merges_queries() {
        assert_eq!(rewrite("http://svc/?v=1", "/x?y=2"), "http://svc/x?v=1&y=2");
        assert_eq!(rewrite("http://svc/?v=1", "/x"), "http://svc/x?v=1");
    }

    #[test]
    fn ipv6_authority_keeps_brackets() {
        assert_eq!(rewrite("http://[::1]:8080", "/a"), "http://[::1]:8080/a");
    }

    #[tokio::test]
    async fn malformed_backend_url_fails_without_network() {
        let forwarder = Forwarder::new();
        let request = Request::builder().uri("/").body(Body::empty()).unwrap();
        let err = forwarder.forward(request, "not a url", None).await.unwrap_err();
        assert!(matches!(err, ForwardError::InvalidUrl { .. }));
        assert!(err.is_config_error());
        assert_eq!(err.into_response().status(), StatusCode::BAD_GATEWAY);
    }

    #[tokio::test]
    async fn https_backend_is_rejected() {
        let forwarder = Forwarder::new();
        let request = Request::builder().uri("/").body(Body::empty()).unwrap();
        let err = forwarder
            .forward(request, "https://example.com", None)
            .await
            .unwrap_err();
        assert!(matches!(err, ForwardError::UnsupportedScheme { .. }));
        assert_eq!(err.backend(), "https://example.com");
    }
}
