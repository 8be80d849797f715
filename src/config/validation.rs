//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (intervals > 0, quotas positive and finite)
//! - Detect duplicate backends and duplicate client overrides
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: BalancerConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::collections::HashSet;
use std::net::SocketAddr;

use thiserror::Error;
use url::Url;

use crate::config::schema::BalancerConfig;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{field}: {message}")]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Check that `raw` is an absolute `http://` URL with a host.
pub fn validate_backend_url(raw: &str) -> Result<Url, String> {
    let url = Url::parse(raw).map_err(|e| format!("invalid url {:?}: {}", raw, e))?;
    if url.scheme() != "http" {
        return Err(format!("unsupported scheme {:?} in {}", url.scheme(), raw));
    }
    if url.host_str().map_or(true, str::is_empty) {
        return Err(format!("missing host in {}", raw));
    }
    Ok(url)
}

fn positive(value: f64) -> bool {
    value.is_finite() && value > 0.0
}

pub fn validate_config(config: &BalancerConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new(
            "listener.bind_address",
            format!("not a socket address: {:?}", config.listener.bind_address),
        ));
    }

    if config.backends.is_empty() {
        errors.push(ValidationError::new("backends", "at least one backend is required"));
    }
    let mut seen = HashSet::new();
    for (i, backend) in config.backends.iter().enumerate() {
        if let Err(message) = validate_backend_url(backend) {
            errors.push(ValidationError::new(format!("backends[{}]", i), message));
        }
        if !seen.insert(backend.as_str()) {
            errors.push(ValidationError::new(
                format!("backends[{}]", i),
                format!("duplicate backend {}", backend),
            ));
        }
    }

    let health = &config.health_check;
    if !health.path.starts_with('/') {
        errors.push(ValidationError::new("health_check.path", "must start with '/'"));
    }
    if health.interval_ms == 0 {
        errors.push(ValidationError::new("health_check.interval_ms", "must be greater than 0"));
    }
    if health.timeout_ms == 0 {
        errors.push(ValidationError::new("health_check.timeout_ms", "must be greater than 0"));
    }

    let limits = &config.rate_limit;
    if !positive(limits.capacity) {
        errors.push(ValidationError::new("rate_limit.capacity", "must be a positive number"));
    }
    if !positive(limits.rate) {
        errors.push(ValidationError::new("rate_limit.rate", "must be a positive number"));
    }
    if limits.store.queue_capacity == 0 {
        errors.push(ValidationError::new(
            "rate_limit.store.queue_capacity",
            "must be greater than 0",
        ));
    }

    let mut client_ids = HashSet::new();
    for (i, client) in config.clients.iter().enumerate() {
        let field = |name: &str| format!("clients[{}].{}", i, name);
        if client.client_id.trim().is_empty() {
            errors.push(ValidationError::new(field("client_id"), "must not be empty"));
        } else if !client_ids.insert(client.client_id.as_str()) {
            errors.push(ValidationError::new(
                field("client_id"),
                format!("duplicate client {}", client.client_id),
            ));
        }
        if !positive(client.capacity) {
            errors.push(ValidationError::new(field("capacity"), "must be a positive number"));
        }
        if !positive(client.rate) {
            errors.push(ValidationError::new(field("rate"), "must be a positive number"));
        }
    }

    if config.admin.enabled {
        if config.admin.api_key.is_empty() {
            errors.push(ValidationError::new(
                "admin.api_key",
                "required when the admin API is enabled",
            ));
        }
        if config.admin.bind_address.parse::<SocketAddr>().is_err() {
            errors.push(ValidationError::new(
                "admin.bind_address",
                format!("not a socket address: {:?}", config.admin.bind_address),
            ));
        }
    }

    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::new(
            "observability.metrics_address",
            format!("not a socket address: {:?}", config.observability.metrics_address),
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::ClientQuotaConfig;

    fn valid() -> BalancerConfig {
        BalancerConfig {
            backends: vec!["http://127.0.0.1:9001".into(), "http://127.0.0.1:9002".into()],
            ..Default::default()
        }
    }

    fn fields(config: &BalancerConfig) -> Vec<String> {
        validate_config(config)
            .unwrap_err()
            .into_iter()
            .map(|e| e.field)
            .collect()
    }

    #[test]
    fn defaults_with_backends_are_valid() {
        assert_eq!(validate_config(&valid()), Ok(()));
    }

    #[test]
    fn collects_every_error() {
        let mut config = valid();
        config.health_check.interval_ms = 0;
        config.rate_limit.capacity = 0.0;
        config.rate_limit.rate = f64::NAN;
        config.listener.bind_address = "nowhere".into();

        let fields = fields(&config);
        assert_eq!(fields.len(), 4);
        assert!(fields.contains(&"health_check.interval_ms".to_string()));
        assert!(fields.contains(&"rate_limit.rate".to_string()));
    }

    #[test]
    fn rejects_bad_and_duplicate_backends() {
        let mut config = valid();
        config.backends = vec![
            "http://a:1".into(),
            "https://b:2".into(),
            "http://a:1".into(),
            "not a url".into(),
        ];
        assert_eq!(fields(&config), vec!["backends[1]", "backends[2]", "backends[3]"]);

        config.backends.clear();
        assert_eq!(fields(&config), vec!["backends"]);
    }

    #[test]
    fn rejects_bad_client_overrides() {
        let mut config = valid();
        config.clients = vec![
            ClientQuotaConfig { client_id: "10.0.0.7".into(), capacity: 5.0, rate: 1.0 },
            ClientQuotaConfig { client_id: "10.0.0.7".into(), capacity: 5.0, rate: 1.0 },
            ClientQuotaConfig { client_id: " ".into(), capacity: -1.0, rate: 1.0 },
        ];
        assert_eq!(
            fields(&config),
            vec!["clients[1].client_id", "clients[2].client_id", "clients[2].capacity"]
        );
    }

    #[test]
    fn admin_requires_api_key_only_when_enabled() {
        let mut config = valid();
        assert!(validate_config(&config).is_ok());

        config.admin.enabled = true;
        assert_eq!(fields(&config), vec!["admin.api_key"]);
    }

    #[test]
    fn backend_url_checks() {
        assert!(validate_backend_url("http://10.0.0.1:8080").is_ok());
        assert!(validate_backend_url("ftp://host").is_err());
        assert!(validate_backend_url("/relative").is_err());
    }
}
