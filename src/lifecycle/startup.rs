//! Startup orchestration.
//!
//! # Responsibilities
//! - Initialize all subsystems in dependency order
//! - Start background tasks (health checks, persistence, bucket pruning)
//! - Bind listeners and begin accepting traffic
//!
//! # Design Decisions
//! - Fail fast: any startup error is fatal
//! - The first probe round finishes before the proxy listener accepts, so
//!   healthy backends are already marked when traffic arrives
//! - Listeners start last (traffic only when ready)

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::admin::{run_admin_server, AdminState};
use crate::config::{BalancerConfig, PersistMode, StoreConfig, StoreKind};
use crate::health::{HealthError, HealthMonitor, HealthProbe};
use crate::http::{AppState, HttpServer};
use crate::lifecycle::shutdown::{drain, Shutdown};
use crate::lifecycle::signals::wait_for_signal;
use crate::load_balancer::{BackendRegistry, RoundRobin};
use crate::security::persist::{self, Persistence};
use crate::security::store::{MemoryStore, RateLimitStore, StoreError};
use crate::security::{QuotaError, TokenBucketLimiter};

const SHUTDOWN_DEADLINE: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum StartupError {
    #[error("invalid rate limit: {0}")]
    Quota(#[from] QuotaError),
    #[error(transparent)]
    Health(#[from] HealthError),
    #[error("rate-limit store: {0}")]
    Store(#[from] StoreError),
    #[error("redis store requested but this build lacks the redis-store feature")]
    RedisUnavailable,
    #[error("cannot bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// A started load balancer.
pub struct Balancer {
    pub registry: Arc<BackendRegistry>,
    pub limiter: Arc<TokenBucketLimiter>,
    pub proxy_addr: SocketAddr,
    pub admin_addr: Option<SocketAddr>,
    tasks: Vec<JoinHandle<()>>,
}

impl Balancer {
    /// Wait for every task to stop after shutdown has been triggered.
    pub async fn join(self) -> bool {
        drain(self.tasks, SHUTDOWN_DEADLINE).await
    }
}

async fn connect_store(config: &StoreConfig) -> Result<Option<Arc<dyn RateLimitStore>>, StartupError> {
    match config.kind {
        StoreKind::None => Ok(None),
        StoreKind::Memory => Ok(Some(Arc::new(MemoryStore::new()))),
        #[cfg(feature = "redis-store")]
        StoreKind::Redis => {
            let store = crate::security::store::RedisStore::connect(&config.url).await?;
            Ok(Some(Arc::new(store)))
        }
        #[cfg(not(feature = "redis-store"))]
        StoreKind::Redis => Err(StartupError::RedisUnavailable),
    }
}

async fn bind(addr: &str) -> Result<TcpListener, StartupError> {
    TcpListener::bind(addr).await.map_err(|source| StartupError::Bind {
        addr: addr.to_string(),
        source,
    })
}

/// Build every component from `config`, spawn background tasks and bind
/// the listeners. Tasks stop when `shutdown` fires.
///
/// `config` is expected to be validated already.
pub async fn start(
    config: BalancerConfig,
    config_path: Option<PathBuf>,
    shutdown: &Shutdown,
) -> Result<Balancer, StartupError> {
    let mut tasks = Vec::new();

    let registry = Arc::new(BackendRegistry::from_urls(config.backends.iter().cloned()));

    let interval = Duration::from_millis(config.health_check.interval_ms);
    let timeout = Duration::from_millis(config.health_check.timeout_ms).min(interval);
    let probe = Arc::new(HealthProbe::new(config.health_check.path.clone(), timeout));
    let monitor = HealthMonitor::new(registry.clone(), probe.clone(), interval)?;

    let mut limiter = TokenBucketLimiter::new(config.rate_limit.quota()?, config.client_quotas());
    let store_config = &config.rate_limit.store;
    if let Some(store) = connect_store(store_config).await? {
        let persistence = match store_config.mode {
            PersistMode::Sync => Persistence::Direct(store),
            PersistMode::Async => {
                let (queue, worker) = persist::queue(store, store_config.queue_capacity);
                tasks.push(worker.spawn(shutdown.subscribe()));
                Persistence::Queued(queue)
            }
        };
        tracing::info!(kind = ?store_config.kind, mode = ?store_config.mode, "Rate-limit persistence enabled");
        limiter = limiter.with_persistence(persistence);
    }
    let limiter = Arc::new(limiter);

    let first_round = monitor.first_round();
    tasks.push(monitor.spawn(shutdown.subscribe()));
    first_round.wait().await;
    tracing::info!(
        backends = registry.len(),
        healthy = registry.list().iter().filter(|b| b.is_healthy()).count(),
        "Initial health check complete"
    );

    if config.rate_limit.idle_eviction_secs > 0 {
        let idle = Duration::from_secs(config.rate_limit.idle_eviction_secs);
        tasks.push(spawn_janitor(limiter.clone(), idle, shutdown.subscribe()));
    }

    let admin_addr = if config.admin.enabled {
        let listener = bind(&config.admin.bind_address).await?;
        let addr = listener.local_addr()?;
        let state = AdminState {
            registry: registry.clone(),
            limiter: limiter.clone(),
            probe: probe.clone(),
            api_key: Arc::from(config.admin.api_key.as_str()),
            config: Arc::new(Mutex::new(config.clone())),
            config_path,
        };
        let rx = shutdown.subscribe();
        tasks.push(tokio::spawn(async move {
            if let Err(e) = run_admin_server(listener, state, rx).await {
                tracing::error!(error = %e, "Admin server failed");
            }
        }));
        Some(addr)
    } else {
        None
    };

    let listener = bind(&config.listener.bind_address).await?;
    let proxy_addr = listener.local_addr()?;
    let server = HttpServer::new(AppState::new(
        limiter.clone(),
        Arc::new(RoundRobin::new(registry.clone())),
    ));
    let rx = shutdown.subscribe();
    tasks.push(tokio::spawn(async move {
        if let Err(e) = server.run(listener, rx).await {
            tracing::error!(error = %e, "Proxy server failed");
        }
    }));

    Ok(Balancer {
        registry,
        limiter,
        proxy_addr,
        admin_addr,
        tasks,
    })
}

/// Periodically drop full idle buckets so the client map stays bounded.
fn spawn_janitor(
    limiter: Arc<TokenBucketLimiter>,
    idle: Duration,
    mut shutdown: tokio::sync::broadcast::Receiver<()>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(idle);
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = shutdown.recv() => break,
                _ = ticker.tick() => {
                    limiter.prune_idle(idle);
                }
            }
        }
    })
}

/// Start, serve until SIGINT/SIGTERM, then shut down gracefully.
pub async fn run(config: BalancerConfig, config_path: Option<PathBuf>) -> Result<(), StartupError> {
    let shutdown = Shutdown::new();
    let balancer = start(config, config_path, &shutdown).await?;
    tracing::info!(address = %balancer.proxy_addr, "Load balancer ready");

    wait_for_signal().await;
    tracing::info!("Shutting down");
    shutdown.trigger();

    if balancer.join().await {
        tracing::info!("Shutdown complete");
    }
    Ok(())
}
