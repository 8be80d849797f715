//! Configuration schema definitions.
//!
//! All types derive Serde traits so the same document can be loaded from and
//! written back to TOML. Plain values precede tables in `BalancerConfig` so
//! the serializer can emit them.

use serde::{Deserialize, Serialize};

use crate::observability::LogFormat;
use crate::security::Quota;

/// Root configuration for the load balancer.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct BalancerConfig {
    /// Upstream URLs in round-robin order.
    pub backends: Vec<String>,

    pub listener: ListenerConfig,

    pub health_check: HealthCheckConfig,

    pub rate_limit: RateLimitConfig,

    pub admin: AdminConfig,

    pub observability: ObservabilityConfig,

    /// Per-client quota overrides.
    pub clients: Vec<ClientQuotaConfig>,
}

impl BalancerConfig {
    /// Overrides as (client id, quota) pairs, skipping invalid entries.
    pub fn client_quotas(&self) -> Vec<(String, Quota)> {
        self.clients
            .iter()
            .filter_map(|c| Some((c.client_id.clone(), c.quota().ok()?)))
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8087").
    pub bind_address: String,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8087".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct HealthCheckConfig {
    /// Path appended to each backend URL when probing.
    pub path: String,

    /// Time between probe rounds in milliseconds.
    pub interval_ms: u64,

    /// Per-probe timeout in milliseconds, clamped to the interval.
    pub timeout_ms: u64,
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            path: "/health".to_string(),
            interval_ms: 5_000,
            timeout_ms: 5_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Default bucket size.
    pub capacity: f64,

    /// Default refill in tokens per second.
    pub rate: f64,

    /// Full buckets idle this long are pruned. 0 disables pruning.
    pub idle_eviction_secs: u64,

    pub store: StoreConfig,
}

impl RateLimitConfig {
    pub fn quota(&self) -> Result<Quota, crate::security::QuotaError> {
        Quota::new(self.capacity, self.rate)
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            capacity: 10.0,
            rate: 1.0,
            idle_eviction_secs: 0,
            store: StoreConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreKind {
    #[default]
    None,
    Memory,
    Redis,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PersistMode {
    /// Bounded background queue, oldest snapshots dropped on overflow.
    #[default]
    Async,
    /// Write inside the admission call.
    Sync,
}

/// External persistence for bucket snapshots.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct StoreConfig {
    pub kind: StoreKind,
    pub url: String,
    pub mode: PersistMode,
    pub queue_capacity: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            kind: StoreKind::None,
            url: "redis://127.0.0.1:6379".to_string(),
            mode: PersistMode::Async,
            queue_capacity: 1024,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ClientQuotaConfig {
    pub client_id: String,
    pub capacity: f64,
    pub rate: f64,
}

impl ClientQuotaConfig {
    pub fn quota(&self) -> Result<Quota, crate::security::QuotaError> {
        Quota::new(self.capacity, self.rate)
    }
}

/// Admin API configuration.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct AdminConfig {
    pub enabled: bool,

    pub bind_address: String,

    /// Bearer token required on every admin request.
    pub api_key: String,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            bind_address: "127.0.0.1:8088".to_string(),
            api_key: String::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    pub log_format: LogFormat,

    pub metrics_enabled: bool,

    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}
