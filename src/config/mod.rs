//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse, deserialize, environment overrides)
//!     → validation.rs (semantic checks)
//!     → BalancerConfig (validated)
//!     → startup builds components from it
//!
//! On admin mutation:
//!     admin handler edits its copy of the document
//!     → loader.rs save_config writes it back
//! ```
//!
//! # Design Decisions
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks
//! - Runtime state lives in the components, not the document

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{
    apply_env_overrides, load_config, parse_config, read_config, resolve_config, save_config,
    ConfigError,
};
pub use schema::{
    AdminConfig, BalancerConfig, ClientQuotaConfig, HealthCheckConfig, ListenerConfig,
    ObservabilityConfig, PersistMode, RateLimitConfig, StoreConfig, StoreKind,
};
pub use validation::{validate_backend_url, validate_config, ValidationError};
