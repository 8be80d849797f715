//! Best-effort export of bucket snapshots to a `RateLimitStore`.
//!
//! # Modes
//! - Queued: records go into a bounded broadcast ring consumed by one
//!   worker task. When the ring is full the oldest record is overwritten
//!   and the worker counts the loss.
//! - Direct: the admitting request awaits the store itself. Used where
//!   deterministic ordering matters (tests, low-volume deployments).
//!
//! Failures are logged and never reach the admission decision.

use std::sync::Arc;

use tokio::sync::broadcast::{self, error::RecvError, error::TryRecvError};
use tokio::task::JoinHandle;

use crate::observability::metrics;
use crate::security::store::{BucketRecord, RateLimitStore};

/// How the limiter hands snapshots to the store.
#[derive(Clone)]
pub enum Persistence {
    Queued(PersistQueue),
    Direct(Arc<dyn RateLimitStore>),
}

impl Persistence {
    pub async fn persist(&self, record: BucketRecord) {
        match self {
            Persistence::Queued(queue) => queue.push(record),
            Persistence::Direct(store) => save(store.as_ref(), &record).await,
        }
    }
}

/// Producer side of the persistence ring.
#[derive(Clone)]
pub struct PersistQueue {
    tx: broadcast::Sender<BucketRecord>,
}

impl PersistQueue {
    pub fn push(&self, record: BucketRecord) {
        // Err only means the worker is gone (shutdown); nothing to do.
        let _ = self.tx.send(record);
    }
}

/// Consumer side; owns the store.
pub struct PersistWorker {
    store: Arc<dyn RateLimitStore>,
    rx: broadcast::Receiver<BucketRecord>,
}

/// Create a queue holding at most `capacity` pending records.
pub fn queue(store: Arc<dyn RateLimitStore>, capacity: usize) -> (PersistQueue, PersistWorker) {
    let (tx, rx) = broadcast::channel(capacity.max(1));
    (PersistQueue { tx }, PersistWorker { store, rx })
}

impl PersistWorker {
    pub fn spawn(self, shutdown: broadcast::Receiver<()>) -> JoinHandle<()> {
        tokio::spawn(self.run(shutdown))
    }

    /// Drain the queue until every producer is dropped or `shutdown` fires.
    /// On shutdown, records already queued are still written.
    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) {
        tracing::debug!("Rate-limit persistence worker starting");
        loop {
            tokio::select! {
                received = self.rx.recv() => match received {
                    Ok(record) => save(self.store.as_ref(), &record).await,
                    Err(RecvError::Lagged(dropped)) => lagged(dropped),
                    Err(RecvError::Closed) => break,
                },
                _ = shutdown.recv() => {
                    self.drain().await;
                    break;
                }
            }
        }
        tracing::debug!("Rate-limit persistence worker stopped");
    }

    async fn drain(&mut self) {
        loop {
            match self.rx.try_recv() {
                Ok(record) => save(self.store.as_ref(), &record).await,
                Err(TryRecvError::Lagged(dropped)) => lagged(dropped),
                Err(_) => return,
            }
        }
    }
}

async fn save(store: &dyn RateLimitStore, record: &BucketRecord) {
    match store.save(record).await {
        Ok(()) => {
            tracing::trace!(client = %record.client_id, tokens = record.tokens, "Bucket persisted");
        }
        Err(e) => {
            tracing::warn!(client = %record.client_id, error = %e, "Failed to persist bucket");
        }
    }
}

fn lagged(dropped: u64) {
    tracing::warn!(dropped, "Persistence queue overflowed, oldest records dropped");
    metrics::record_persist_dropped(dropped);
}
