//! Round-robin HTTP load balancer library.

// Core subsystems
pub mod config;
pub mod http;

// Traffic management
pub mod health;
pub mod load_balancer;

// Cross-cutting concerns
pub mod admin;
pub mod lifecycle;
pub mod observability;
pub mod security;

pub use config::BalancerConfig;
pub use http::HttpServer;
pub use lifecycle::Shutdown;
