//! Per-client token-bucket admission control.
//!
//! # Locking
//! - Coarse `RwLock` over the client → bucket map, the defaults and the
//!   override table. Admission for a known client only takes it shared.
//! - Fine `Mutex` per bucket. Lock order is always map, then bucket.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::time::Instant;

use crate::security::persist::Persistence;
use crate::security::store::BucketRecord;

#[derive(Debug, Error, PartialEq)]
pub enum QuotaError {
    #[error("capacity must be positive, got {0}")]
    NonPositiveCapacity(f64),
    #[error("rate must be positive, got {0}")]
    NonPositiveRate(f64),
}

/// Bucket size and refill speed (tokens per second).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Quota {
    pub capacity: f64,
    pub rate: f64,
}

impl Quota {
    pub fn new(capacity: f64, rate: f64) -> Result<Self, QuotaError> {
        if !(capacity.is_finite() && capacity > 0.0) {
            return Err(QuotaError::NonPositiveCapacity(capacity));
        }
        if !(rate.is_finite() && rate > 0.0) {
            return Err(QuotaError::NonPositiveRate(rate));
        }
        Ok(Self { capacity, rate })
    }
}

/// Point-in-time view of a bucket, refilled to "now".
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BucketSnapshot {
    pub tokens: f64,
    pub capacity: f64,
    pub rate: f64,
}

/// Continuous token bucket. Refill is computed lazily from elapsed time.
#[derive(Debug)]
pub struct TokenBucket {
    tokens: f64,
    capacity: f64,
    rate: f64,
    last_refill: Instant,
    last_refill_wall: SystemTime,
}

impl TokenBucket {
    /// A full bucket.
    pub fn new(quota: Quota, now: Instant) -> Self {
        Self {
            tokens: quota.capacity,
            capacity: quota.capacity,
            rate: quota.rate,
            last_refill: now,
            last_refill_wall: SystemTime::now(),
        }
    }

    fn projected(&self, now: Instant) -> f64 {
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        (self.tokens + elapsed * self.rate).min(self.capacity)
    }

    pub fn refill(&mut self, now: Instant) {
        self.tokens = self.projected(now);
        self.last_refill = now;
        self.last_refill_wall = SystemTime::now();
    }

    /// Refill, then take one token if at least one is available.
    pub fn try_acquire(&mut self, now: Instant) -> bool {
        self.refill(now);
        if self.tokens < 1.0 {
            return false;
        }
        self.tokens -= 1.0;
        true
    }

    /// Apply a new quota. Time elapsed so far is credited at the old rate,
    /// then tokens are clamped to the new capacity.
    pub fn reconfigure(&mut self, quota: Quota, now: Instant) {
        self.refill(now);
        self.capacity = quota.capacity;
        self.rate = quota.rate;
        self.tokens = self.tokens.min(self.capacity);
    }

    pub fn snapshot(&self, now: Instant) -> BucketSnapshot {
        BucketSnapshot {
            tokens: self.projected(now),
            capacity: self.capacity,
            rate: self.rate,
        }
    }

    pub fn record(&self, client_id: &str) -> BucketRecord {
        let last_refill_nanos = self
            .last_refill_wall
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as i64)
            .unwrap_or_default();
        BucketRecord {
            client_id: client_id.to_string(),
            tokens: self.tokens,
            last_refill_nanos,
            capacity: self.capacity,
            rate: self.rate,
        }
    }

    /// Full and untouched for at least `idle`.
    fn is_idle(&self, now: Instant, idle: Duration) -> bool {
        now.saturating_duration_since(self.last_refill) >= idle
            && self.projected(now) >= self.capacity
    }
}

/// Admission capability.
#[async_trait]
pub trait RateLimiter: Send + Sync {
    /// Admit (and charge one token) or reject.
    async fn allow(&self, client_id: &str) -> bool;

    /// Change the default quota for clients first seen from now on.
    fn update(&self, quota: Quota);

    /// Set a client's override and reconfigure its live bucket, if any.
    fn update_client(&self, client_id: &str, quota: Quota);
}

struct LimiterState {
    defaults: Quota,
    overrides: HashMap<String, Quota>,
    buckets: HashMap<String, Arc<Mutex<TokenBucket>>>,
}

impl LimiterState {
    fn quota_for(&self, client_id: &str) -> Quota {
        self.overrides.get(client_id).copied().unwrap_or(self.defaults)
    }
}

pub struct TokenBucketLimiter {
    state: RwLock<LimiterState>,
    persistence: Option<Persistence>,
}

impl TokenBucketLimiter {
    pub fn new<I>(defaults: Quota, overrides: I) -> Self
    where
        I: IntoIterator<Item = (String, Quota)>,
    {
        let overrides: HashMap<_, _> = overrides.into_iter().collect();
        tracing::info!(
            capacity = defaults.capacity,
            rate = defaults.rate,
            overrides = overrides.len(),
            "Rate limiter initialized"
        );
        Self {
            state: RwLock::new(LimiterState {
                defaults,
                overrides,
                buckets: HashMap::new(),
            }),
            persistence: None,
        }
    }

    pub fn with_persistence(mut self, persistence: Persistence) -> Self {
        self.persistence = Some(persistence);
        self
    }

    pub fn defaults(&self) -> Quota {
        self.read().defaults
    }

    /// The override configured for `client_id`, if any.
    pub fn client_quota(&self, client_id: &str) -> Option<Quota> {
        self.read().overrides.get(client_id).copied()
    }

    pub fn snapshot(&self, client_id: &str) -> Option<BucketSnapshot> {
        let bucket = self.read().buckets.get(client_id).cloned()?;
        let snapshot = lock(&bucket).snapshot(Instant::now());
        Some(snapshot)
    }

    pub fn bucket_count(&self) -> usize {
        self.read().buckets.len()
    }

    /// Drop buckets that are full and idle for at least `idle`.
    ///
    /// A bucket currently held by an in-flight admission is kept.
    pub fn prune_idle(&self, idle: Duration) -> usize {
        let now = Instant::now();
        let mut state = self.write();
        let before = state.buckets.len();
        state
            .buckets
            .retain(|_, bucket| Arc::strong_count(bucket) > 1 || !lock(bucket).is_idle(now, idle));
        let pruned = before - state.buckets.len();
        if pruned > 0 {
            tracing::debug!(pruned, remaining = state.buckets.len(), "Pruned idle buckets");
        }
        pruned
    }

    fn bucket(&self, client_id: &str) -> Arc<Mutex<TokenBucket>> {
        if let Some(bucket) = self.read().buckets.get(client_id) {
            return bucket.clone();
        }

        let mut state = self.write();
        let quota = state.quota_for(client_id);
        state
            .buckets
            .entry(client_id.to_string())
            .or_insert_with(|| {
                tracing::debug!(
                    client = %client_id,
                    capacity = quota.capacity,
                    rate = quota.rate,
                    "Creating bucket"
                );
                Arc::new(Mutex::new(TokenBucket::new(quota, Instant::now())))
            })
            .clone()
    }

    /// Drop a client's override; its live bucket takes the current defaults.
    /// Returns false when there was no override.
    pub fn remove_client(&self, client_id: &str) -> bool {
        let mut state = self.write();
        if state.overrides.remove(client_id).is_none() {
            return false;
        }
        let defaults = state.defaults;
        if let Some(bucket) = state.buckets.get(client_id) {
            lock(bucket).reconfigure(defaults, Instant::now());
        }
        tracing::info!(client = %client_id, "Removed client rate limit");
        true
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, LimiterState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, LimiterState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }
}

fn lock(bucket: &Mutex<TokenBucket>) -> MutexGuard<'_, TokenBucket> {
    bucket.lock().unwrap_or_else(PoisonError::into_inner)
}

#[async_trait]
impl RateLimiter for TokenBucketLimiter {
    async fn allow(&self, client_id: &str) -> bool {
        let bucket = self.bucket(client_id);

        let record = {
            let mut bucket = lock(&bucket);
            if !bucket.try_acquire(Instant::now()) {
                tracing::debug!(client = %client_id, "Rate limit exceeded");
                return false;
            }
            self.persistence.as_ref().map(|_| bucket.record(client_id))
        };

        if let (Some(persistence), Some(record)) = (&self.persistence, record) {
            persistence.persist(record).await;
        }
        true
    }

    fn update(&self, quota: Quota) {
        self.write().defaults = quota;
        tracing::info!(capacity = quota.capacity, rate = quota.rate, "Updated default rate limit");
    }

    fn update_client(&self, client_id: &str, quota: Quota) {
        let mut state = self.write();
        state.overrides.insert(client_id.to_string(), quota);
        if let Some(bucket) = state.buckets.get(client_id) {
            lock(bucket).reconfigure(quota, Instant::now());
        }
        tracing::info!(
            client = %client_id,
            capacity = quota.capacity,
            rate = quota.rate,
            "Updated client rate limit"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::security::store::MemoryStore;

    fn quota(capacity: f64, rate: f64) -> Quota {
        Quota::new(capacity, rate).unwrap()
    }

    fn limiter(capacity: f64, rate: f64) -> TokenBucketLimiter {
        TokenBucketLimiter::new(quota(capacity, rate), [])
    }

    async fn admitted(limiter: &TokenBucketLimiter, client: &str, attempts: usize) -> usize {
        let mut n = 0;
        for _ in 0..attempts {
            if limiter.allow(client).await {
                n += 1;
            }
        }
        n
    }

    #[test]
    fn quota_rejects_non_positive_values() {
        assert_eq!(Quota::new(0.0, 1.0), Err(QuotaError::NonPositiveCapacity(0.0)));
        assert_eq!(Quota::new(1.0, -1.0), Err(QuotaError::NonPositiveRate(-1.0)));
        assert!(Quota::new(f64::NAN, 1.0).is_err());
        assert!(Quota::new(f64::INFINITY, 1.0).is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn admits_floor_capacity_without_elapsed_time() {
        let rl = limiter(3.5, 1.0);
        assert_eq!(admitted(&rl, "10.0.0.1", 10).await, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn rejection_does_not_consume() {
        let rl = limiter(2.0, 1.0);
        assert_eq!(admitted(&rl, "c", 2).await, 2);
        assert!(!rl.allow("c").await);
        assert!(!rl.allow("c").await);

        tokio::time::advance(Duration::from_millis(1000)).await;
        assert!(rl.allow("c").await);
        assert!(!rl.allow("c").await);
    }

    #[tokio::test(start_paused = true)]
    async fn refill_is_proportional_to_elapsed_time() {
        let rl = limiter(5.0, 2.0);
        assert_eq!(admitted(&rl, "c", 4).await, 4);
        assert_eq!(rl.snapshot("c").unwrap().tokens, 1.0);

        tokio::time::advance(Duration::from_millis(750)).await;
        let tokens = rl.snapshot("c").unwrap().tokens;
        assert!((tokens - 2.5).abs() < 1e-9, "tokens = {tokens}");

        tokio::time::advance(Duration::from_secs(60)).await;
        assert_eq!(rl.snapshot("c").unwrap().tokens, 5.0);
    }

    #[tokio::test(start_paused = true)]
    async fn override_wins_over_default() {
        let rl = TokenBucketLimiter::new(quota(2.0, 1.0), [("vip".to_string(), quota(5.0, 1.0))]);
        rl.update(quota(10.0, 1.0));

        assert_eq!(admitted(&rl, "vip", 20).await, 5);
        assert_eq!(admitted(&rl, "other", 20).await, 10);
    }

    #[tokio::test(start_paused = true)]
    async fn update_leaves_existing_buckets_alone() {
        let rl = limiter(2.0, 1.0);
        assert!(rl.allow("c").await);
        rl.update(quota(50.0, 1.0));

        let snapshot = rl.snapshot("c").unwrap();
        assert_eq!(snapshot.capacity, 2.0);
        assert_eq!(snapshot.tokens, 1.0);
    }

    #[tokio::test(start_paused = true)]
    async fn update_client_clamps_tokens() {
        let rl = limiter(10.0, 1.0);
        assert!(rl.allow("c").await);
        rl.update_client("c", quota(3.0, 0.5));

        let snapshot = rl.snapshot("c").unwrap();
        assert_eq!(snapshot.tokens, 3.0);
        assert_eq!(snapshot.capacity, 3.0);
        assert_eq!(snapshot.rate, 0.5);
    }

    #[tokio::test(start_paused = true)]
    async fn raising_capacity_grants_nothing_extra() {
        let rl = limiter(2.0, 1.0);
        assert_eq!(admitted(&rl, "c", 2).await, 2);
        rl.update_client("c", quota(10.0, 1.0));
        assert!(!rl.allow("c").await);
        assert_eq!(rl.snapshot("c").unwrap().capacity, 10.0);
    }

    #[tokio::test(start_paused = true)]
    async fn update_client_applies_to_future_bucket() {
        let rl = limiter(2.0, 1.0);
        rl.update_client("new", quota(4.0, 1.0));
        assert_eq!(rl.client_quota("new"), Some(quota(4.0, 1.0)));
        assert_eq!(admitted(&rl, "new", 10).await, 4);
    }

    #[tokio::test(start_paused = true)]
    async fn remove_client_falls_back_to_defaults() {
        let rl = TokenBucketLimiter::new(quota(2.0, 1.0), [("vip".to_string(), quota(5.0, 1.0))]);
        assert_eq!(admitted(&rl, "vip", 3).await, 3);

        assert!(rl.remove_client("vip"));
        assert!(!rl.remove_client("vip"));
        assert_eq!(rl.client_quota("vip"), None);

        let snapshot = rl.snapshot("vip").unwrap();
        assert_eq!(snapshot.capacity, 2.0);
        assert_eq!(snapshot.tokens, 2.0);

        rl.update(quota(8.0, 1.0));
        assert!(rl.prune_idle(Duration::ZERO) >= 1);
        assert_eq!(admitted(&rl, "vip", 10).await, 8);
    }

    #[tokio::test(start_paused = true)]
    async fn prune_removes_only_full_idle_buckets() {
        let rl = limiter(2.0, 1.0);
        assert!(rl.allow("idle").await);
        tokio::time::advance(Duration::from_secs(30)).await;
        assert_eq!(admitted(&rl, "busy", 2).await, 2);

        assert_eq!(rl.prune_idle(Duration::from_secs(10)), 1);
        assert!(rl.snapshot("idle").is_none());
        assert!(rl.snapshot("busy").is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn direct_persistence_exports_post_decrement_state() {
        let store = Arc::new(MemoryStore::new());
        let rl = limiter(2.0, 1.0).with_persistence(Persistence::Direct(store.clone()));

        assert!(rl.allow("10.0.0.9").await);
        let record = store.get("10.0.0.9").unwrap();
        assert_eq!(record.tokens, 1.0);
        assert_eq!(record.capacity, 2.0);
        assert_eq!(record.rate, 1.0);
        assert!(record.last_refill_nanos > 0);

        assert!(rl.allow("10.0.0.9").await);
        assert!(!rl.allow("10.0.0.9").await);
        assert_eq!(store.get("10.0.0.9").unwrap().tokens, 0.0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_admission_never_exceeds_budget() {
        let rl = Arc::new(limiter(100.0, 0.001));
        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let rl = rl.clone();
                tokio::spawn(async move { admitted(&rl, "shared", 50).await })
            })
            .collect();

        let mut total = 0;
        for task in tasks {
            total += task.await.unwrap();
        }
        assert_eq!(total, 100);
    }
}
