//! Configuration loading from disk and the environment.

use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::config::schema::BalancerConfig;
use crate::config::validation::{validate_config, ValidationError};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot access {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("parse error: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),
    #[error("validation failed: {}", join(.0))]
    Validation(Vec<ValidationError>),
}

fn join(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Parse a TOML document without validating it.
pub fn parse_config(content: &str) -> Result<BalancerConfig, ConfigError> {
    Ok(toml::from_str(content)?)
}

/// Read and parse a TOML file. Emits no events, so it can run before the
/// subscriber is installed.
pub fn read_config(path: &Path) -> Result<BalancerConfig, ConfigError> {
    let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    parse_config(&content)
}

/// Apply environment overrides from `lookup`, then validate.
pub fn resolve_config<F>(mut config: BalancerConfig, lookup: F) -> Result<BalancerConfig, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    apply_env_overrides(&mut config, lookup);
    validate_config(&config).map_err(ConfigError::Validation)?;
    Ok(config)
}

/// Load a TOML file, apply process environment overrides, and validate.
pub fn load_config(path: &Path) -> Result<BalancerConfig, ConfigError> {
    resolve_config(read_config(path)?, |key| std::env::var(key).ok())
}

/// Write `config` back to `path` as pretty TOML.
pub fn save_config(path: &Path, config: &BalancerConfig) -> Result<(), ConfigError> {
    let content = toml::to_string_pretty(config)?;
    fs::write(path, content).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })
}

/// Apply `BACKENDS`, `PORT`, `RATE_LIMIT_CAPACITY` and `RATE_LIMIT_RATE`.
///
/// Unparseable or non-positive numeric values are ignored with a warning.
pub fn apply_env_overrides<F>(config: &mut BalancerConfig, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(raw) = lookup("BACKENDS") {
        let backends: Vec<String> = raw
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect();
        if !backends.is_empty() {
            tracing::info!(count = backends.len(), "Backends overridden from environment");
            config.backends = backends;
        }
    }

    if let Some(raw) = lookup("PORT") {
        match raw.trim().parse::<u16>() {
            Ok(port) => {
                let host = config
                    .listener
                    .bind_address
                    .rsplit_once(':')
                    .map(|(host, _)| host)
                    .unwrap_or("0.0.0.0");
                config.listener.bind_address = format!("{}:{}", host, port);
            }
            Err(_) => tracing::warn!(value = %raw, "Ignoring invalid PORT"),
        }
    }

    if let Some(capacity) = positive_env(&lookup, "RATE_LIMIT_CAPACITY") {
        config.rate_limit.capacity = capacity;
    }
    if let Some(rate) = positive_env(&lookup, "RATE_LIMIT_RATE") {
        config.rate_limit.rate = rate;
    }
}

fn positive_env<F>(lookup: &F, key: &str) -> Option<f64>
where
    F: Fn(&str) -> Option<String>,
{
    let raw = lookup(key)?;
    match raw.trim().parse::<f64>() {
        Ok(v) if v.is_finite() && v > 0.0 => Some(v),
        _ => {
            tracing::warn!(key, value = %raw, "Ignoring invalid environment override");
            None
        }
    }
}
