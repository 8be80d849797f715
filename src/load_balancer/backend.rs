//! Backend abstraction.
//!
//! # Responsibilities
//! - Represent a single upstream, identified by its URL
//! - Track health state written by the health monitor
//! - Edge-trigger health transition notifications

use std::sync::{Mutex, PoisonError};
use std::time::{SystemTime, UNIX_EPOCH};

/// Mutable per-backend state. Always read and written as one unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BackendStatus {
    /// Eligible for selection.
    pub healthy: bool,
    /// Time of the most recent probe, `None` until the first one.
    pub last_checked: Option<SystemTime>,
    /// Whether the healthy state has already been reported.
    pub logged_healthy: bool,
}

impl BackendStatus {
    /// Milliseconds since the Unix epoch of the last probe.
    pub fn last_checked_ms(&self) -> Option<u64> {
        self.last_checked
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_millis() as u64)
    }
}

/// A health edge worth reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthTransition {
    /// Backend became (or was first seen) healthy.
    Up,
    /// Backend became (or was first seen) unhealthy.
    Down,
}

/// A single upstream server.
#[derive(Debug)]
pub struct Backend {
    url: String,
    status: Mutex<BackendStatus>,
}

impl Backend {
    /// Create a backend whose health is unknown (not selectable) until probed.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            status: Mutex::new(BackendStatus::default()),
        }
    }

    /// The endpoint URL, which is also the backend's identity.
    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn is_healthy(&self) -> bool {
        self.lock().healthy
    }

    /// Consistent copy of the mutable fields.
    pub fn status(&self) -> BackendStatus {
        *self.lock()
    }

    /// Apply a probe result.
    ///
    /// Returns a transition only on an edge, so a backend that stays down
    /// is reported once rather than on every round.
    pub fn record_probe(&self, healthy: bool) -> Option<HealthTransition> {
        let mut status = self.lock();
        let first_probe = status.last_checked.is_none();
        status.healthy = healthy;
        status.last_checked = Some(SystemTime::now());

        if healthy {
            if status.logged_healthy {
                return None;
            }
            status.logged_healthy = true;
            Some(HealthTransition::Up)
        } else if status.logged_healthy || first_probe {
            status.logged_healthy = false;
            Some(HealthTransition::Down)
        } else {
            None
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BackendStatus> {
        self.status.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
