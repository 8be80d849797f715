//! Backend registry.
//!
//! # Responsibilities
//! - Own the ordered set of known backends
//! - Serialize add/remove against concurrent readers (RwLock)
//! - Hand out `Arc<Backend>` references, never private copies

use std::sync::{Arc, PoisonError, RwLock};

use thiserror::Error;

use crate::load_balancer::backend::Backend;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("backend {0} already exists")]
    AlreadyExists(String),
    #[error("backend {0} not found")]
    NotFound(String),
}

/// Ordered, URL-unique list of backends. Insertion order defines the
/// round-robin traversal order.
#[derive(Debug, Default)]
pub struct BackendRegistry {
    backends: RwLock<Vec<Arc<Backend>>>,
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a registry from configured URLs. Duplicates are skipped.
    pub fn from_urls<I, S>(urls: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let registry = Self::new();
        for url in urls {
            if let Err(e) = registry.add(url) {
                tracing::warn!(error = %e, "Skipping duplicate backend");
            }
        }
        registry
    }

    /// Snapshot of the current list.
    pub fn list(&self) -> Vec<Arc<Backend>> {
        self.read(|backends| backends.to_vec())
    }

    pub fn get(&self, url: &str) -> Option<Arc<Backend>> {
        self.read(|backends| backends.iter().find(|b| b.url() == url).cloned())
    }

    pub fn len(&self) -> usize {
        self.read(|backends| backends.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Append a backend. Its health is unknown until probed.
    pub fn add(&self, url: impl Into<String>) -> Result<Arc<Backend>, RegistryError> {
        let url = url.into();
        let mut backends = self.backends.write().unwrap_or_else(PoisonError::into_inner);
        if backends.iter().any(|b| b.url() == url) {
            return Err(RegistryError::AlreadyExists(url));
        }
        let backend = Arc::new(Backend::new(url));
        backends.push(backend.clone());
        tracing::info!(backend = %backend.url(), total = backends.len(), "Backend added");
        Ok(backend)
    }

    /// Remove a backend. Requests already dispatched to it keep their `Arc`.
    pub fn remove(&self, url: &str) -> Result<Arc<Backend>, RegistryError> {
        let mut backends = self.backends.write().unwrap_or_else(PoisonError::into_inner);
        let index = backends
            .iter()
            .position(|b| b.url() == url)
            .ok_or_else(|| RegistryError::NotFound(url.to_string()))?;
        let removed = backends.remove(index);
        tracing::info!(backend = %url, total = backends.len(), "Backend removed");
        Ok(removed)
    }

    /// Run `f` against the list under the read lock.
    pub(crate) fn read<R>(&self, f: impl FnOnce(&[Arc<Backend>]) -> R) -> R {
        let backends = self.backends.read().unwrap_or_else(PoisonError::into_inner);
        f(&backends)
    }
}
