//! Load balancing subsystem.
//!
//! # Data Flow
//! ```text
//! Admin add/remove ──write──▶ registry.rs (RwLock<Vec<Arc<Backend>>>)
//! Health monitor  ──read───▶ registry.rs ──▶ backend.rs (record_probe)
//! Request         ──read───▶ round_robin.rs (cursor + health read)
//!     → Some(Arc<Backend>) or None (no available backends)
//! ```
//!
//! # Design Decisions
//! - The registry is the single owner; everyone else holds `Arc<Backend>`
//! - Selection is behind the `LoadBalancer` trait so other strategies can be
//!   substituted without touching the request path
//! - Health read at selection time is eventually consistent with the monitor

pub mod backend;
pub mod registry;
pub mod round_robin;

use std::sync::Arc;

use crate::load_balancer::backend::Backend;

pub use registry::{BackendRegistry, RegistryError};
pub use round_robin::RoundRobin;

/// Backend selection capability.
pub trait LoadBalancer: Send + Sync {
    /// Next healthy backend, or `None` when nothing is available.
    fn next_backend(&self) -> Option<Arc<Backend>>;
}
