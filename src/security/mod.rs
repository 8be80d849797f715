//! Security subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming request:
//!     → rate_limit.rs (per-client token bucket: admit or 429)
//!         → persist.rs (best-effort snapshot export)
//!             → store.rs (memory / redis sink)
//!     → headers.rs (strip hop-by-hop, add X-Forwarded-For)
//!     → Pass to forwarding
//! ```
//!
//! # Design Decisions
//! - Refill is computed at check time; no background refill task
//! - Admission never waits on the external store's health
//! - Clients are keyed by caller IP

pub mod headers;
pub mod persist;
pub mod rate_limit;
pub mod store;

pub use rate_limit::{BucketSnapshot, Quota, QuotaError, RateLimiter, TokenBucketLimiter};
