//! traffic-lb: round-robin HTTP load balancer.
//!
//! # Architecture Overview
//!
//! ```text
//!                      ┌──────────────────────────────────────────────┐
//!                      │                 LOAD BALANCER                │
//!   Client Request     │  ┌──────────┐   ┌────────────┐   ┌─────────┐ │
//!   ───────────────────┼─▶│   rate   │──▶│round-robin │──▶│ forward │─┼──▶ Backend
//!                      │  │ limiter  │   │  selection │   │         │ │
//!   ◀──────────────────┼──└──────────┘   └─────▲──────┘   └─────────┘ │
//!   Client Response    │                       │ reads                │
//!                      │                 ┌─────┴──────┐               │
//!                      │                 │  backend   │◀── health     │
//!                      │                 │  registry  │    monitor    │
//!                      │                 └─────▲──────┘               │
//!                      │                       │                      │
//!                      │                   admin API                  │
//!                      └──────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;

use clap::Parser;
use traffic_lb::config::{read_config, resolve_config};
use traffic_lb::lifecycle;
use traffic_lb::observability::{init_tracing, metrics};

#[derive(Parser)]
#[command(name = "traffic-lb", version, about = "Round-robin HTTP load balancer")]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(short, long, default_value = "config/balancer.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let config = match read_config(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("traffic-lb: {}", e);
            std::process::exit(1);
        }
    };

    // Environment overrides log, so the subscriber goes up first.
    init_tracing(&config.observability.log_level, config.observability.log_format)?;
    let config = match resolve_config(config, |key| std::env::var(key).ok()) {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(error = %e, "Invalid configuration");
            std::process::exit(1);
        }
    };
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %cli.config.display(),
        bind_address = %config.listener.bind_address,
        backends = config.backends.len(),
        "traffic-lb starting"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr)?,
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    lifecycle::run(config, Some(cli.config)).await?;
    Ok(())
}
