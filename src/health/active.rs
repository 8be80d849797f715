//! Active health checking.
//!
//! # Responsibilities
//! - Periodically probe every backend in the registry
//! - Update backend health state in place
//! - Signal completion of the first probe round

use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use thiserror::Error;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};

use crate::health::probe::{HealthProbe, ProbeOutcome};
use crate::load_balancer::backend::{Backend, HealthTransition};
use crate::load_balancer::BackendRegistry;
use crate::observability::metrics;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum HealthError {
    #[error("health check interval must be positive")]
    InvalidInterval,
}

/// Resolves once the monitor has completed its first probe round.
#[derive(Debug, Clone)]
pub struct FirstRound {
    rx: watch::Receiver<bool>,
}

impl FirstRound {
    /// Wait for the first round. Returns early if the monitor is gone.
    pub async fn wait(mut self) {
        let _ = self.rx.wait_for(|done| *done).await;
    }

    pub fn is_done(&self) -> bool {
        *self.rx.borrow()
    }
}

pub struct HealthMonitor {
    registry: Arc<BackendRegistry>,
    probe: Arc<HealthProbe>,
    interval: Duration,
    first_round: watch::Sender<bool>,
}

impl HealthMonitor {
    pub fn new(
        registry: Arc<BackendRegistry>,
        probe: Arc<HealthProbe>,
        interval: Duration,
    ) -> Result<Self, HealthError> {
        if interval.is_zero() {
            return Err(HealthError::InvalidInterval);
        }
        let (first_round, _) = watch::channel(false);
        Ok(Self {
            registry,
            probe,
            interval,
            first_round,
        })
    }

    pub fn first_round(&self) -> FirstRound {
        FirstRound {
            rx: self.first_round.subscribe(),
        }
    }

    /// Run on a background task until `shutdown` fires.
    pub fn spawn(self, shutdown: broadcast::Receiver<()>) -> JoinHandle<()> {
        tokio::spawn(self.run(shutdown))
    }

    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        tracing::info!(
            interval_ms = self.interval.as_millis() as u64,
            timeout_ms = self.probe.timeout().as_millis() as u64,
            "Health monitor starting"
        );

        // The first tick fires immediately.
        let mut ticker = time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = shutdown.recv() => break,
                _ = ticker.tick() => {
                    tokio::select! {
                        biased;
                        _ = shutdown.recv() => {
                            tracing::debug!("Probe round aborted by shutdown");
                            break;
                        }
                        _ = self.check_all() => {
                            self.first_round.send_replace(true);
                        }
                    }
                }
            }
        }

        tracing::info!("Health monitor stopped");
    }

    /// Probe every backend in the current snapshot concurrently.
    ///
    /// Each backend is updated as soon as its own probe resolves, so an
    /// aborted round leaves some backends updated and the rest untouched.
    pub async fn check_all(&self) {
        let backends = self.registry.list();
        tracing::debug!(count = backends.len(), "Probe round starting");
        join_all(backends.iter().map(|b| self.check_one(b))).await;
    }

    async fn check_one(&self, backend: &Arc<Backend>) {
        probe_backend(&self.probe, backend).await;
    }
}

/// Probe one backend, record the result and log any transition.
///
/// Also used outside the periodic loop, e.g. right after a backend is added.
pub async fn probe_backend(probe: &HealthProbe, backend: &Backend) -> bool {
    let outcome = probe.check(backend.url()).await;
    let healthy = outcome.is_healthy();

    match (backend.record_probe(healthy), &outcome) {
        (Some(HealthTransition::Up), _) => {
            tracing::info!(backend = %backend.url(), "Backend is healthy");
        }
        (Some(HealthTransition::Down), ProbeOutcome::Unhealthy(reason)) => {
            tracing::warn!(backend = %backend.url(), reason = %reason, "Backend is unhealthy");
        }
        (_, ProbeOutcome::Unhealthy(reason)) => {
            tracing::debug!(backend = %backend.url(), reason = %reason, "Backend still unhealthy");
        }
        _ => {}
    }

    metrics::record_backend_health(backend.url(), healthy);
    healthy
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_interval_is_rejected() {
        let registry = Arc::new(BackendRegistry::new());
        let probe = Arc::new(HealthProbe::new("/health", Duration::from_secs(1)));
        let result = HealthMonitor::new(registry, probe, Duration::ZERO);
        assert_eq!(result.err(), Some(HealthError::InvalidInterval));
    }

    #[tokio::test]
    async fn first_round_completes_on_empty_registry() {
        let registry = Arc::new(BackendRegistry::new());
        let probe = Arc::new(HealthProbe::new("/health", Duration::from_secs(1)));
        let monitor = HealthMonitor::new(registry, probe, Duration::from_millis(50)).unwrap();
        let first_round = monitor.first_round();
        assert!(!first_round.is_done());

        let (tx, rx) = broadcast::channel(1);
        let handle = monitor.spawn(rx);
        first_round.clone().wait().await;
        assert!(first_round.is_done());

        tx.send(()).unwrap();
        handle.await.unwrap();
    }
}
