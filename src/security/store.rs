//! External rate-limit state sink.
//!
//! The in-process bucket is always authoritative; a store only exports
//! post-admission snapshots so other instances can observe them.

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Snapshot of one client's bucket after an admission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BucketRecord {
    pub client_id: String,
    pub tokens: f64,
    pub last_refill_nanos: i64,
    pub capacity: f64,
    pub rate: f64,
}

impl BucketRecord {
    /// Key under which the record is stored.
    pub fn key(&self) -> String {
        format!("ratelimit:{}", self.client_id)
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store connection failed: {0}")]
    Connection(String),
    #[error("store write failed: {0}")]
    Write(String),
}

#[cfg(feature = "redis-store")]
impl From<redis::RedisError> for StoreError {
    fn from(e: redis::RedisError) -> Self {
        if e.is_connection_refusal() || e.is_connection_dropped() || e.is_io_error() {
            StoreError::Connection(e.to_string())
        } else {
            StoreError::Write(e.to_string())
        }
    }
}

/// Key-value sink for bucket snapshots, keyed by client ID.
#[async_trait]
pub trait RateLimitStore: Send + Sync {
    async fn save(&self, record: &BucketRecord) -> Result<(), StoreError>;
}

/// Process-local store, mostly useful for tests and single-node setups
/// that want bucket state visible through the admin layer.
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: DashMap<String, BucketRecord>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, client_id: &str) -> Option<BucketRecord> {
        self.records.get(client_id).map(|r| r.value().clone())
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[async_trait]
impl RateLimitStore for MemoryStore {
    async fn save(&self, record: &BucketRecord) -> Result<(), StoreError> {
        self.records.insert(record.client_id.clone(), record.clone());
        Ok(())
    }
}

/// Redis hash per client: `HSET ratelimit:<id> tokens .. last_refill .. capacity .. rate ..`.
#[cfg(feature = "redis-store")]
pub struct RedisStore {
    conn: redis::aio::MultiplexedConnection,
}

#[cfg(feature = "redis-store")]
impl RedisStore {
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let client = redis::Client::open(url).map_err(|e| StoreError::Connection(e.to_string()))?;
        let conn = client.get_multiplexed_async_connection().await?;
        tracing::info!(url = %url, "Connected to redis rate-limit store");
        Ok(Self { conn })
    }
}

#[cfg(feature = "redis-store")]
#[async_trait]
impl RateLimitStore for RedisStore {
    async fn save(&self, record: &BucketRecord) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let _: () = redis::cmd("HSET")
            .arg(record.key())
            .arg("tokens")
            .arg(record.tokens)
            .arg("last_refill")
            .arg(record.last_refill_nanos)
            .arg("capacity")
            .arg(record.capacity)
            .arg("rate")
            .arg(record.rate)
            .query_async(&mut conn)
            .await?;
        Ok(())
    }
}
