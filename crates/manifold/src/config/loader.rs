use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::config::schema::OperatorConfig;
use crate::error::ConfigError;

pub const ENV_NAMESPACE: &str = "MANIFOLD_NAMESPACE";
pub const ENV_WORKERS: &str = "MANIFOLD_WORKERS";
pub const ENV_RECONCILE_TIMEOUT: &str = "MANIFOLD_RECONCILE_TIMEOUT";
pub const ENV_SECRET_STORE_DIR: &str = "MANIFOLD_SECRET_STORE_DIR";

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<OperatorConfig, ConfigError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.to_path_buf(),
        source: e,
    })?;

    load_config_from_str(&content)
}

/// Parses YAML, applies environment overrides and validates the result.
/// Empty input yields the defaults.
pub fn load_config_from_str(content: &str) -> Result<OperatorConfig, ConfigError> {
    let mut config: OperatorConfig = if content.trim().is_empty() {
        OperatorConfig::default()
    } else {
        serde_yaml::from_str(content)?
    };

    apply_env_overrides(&mut config)?;
    validate_config(&config)?;

    Ok(config)
}

fn apply_env_overrides(config: &mut OperatorConfig) -> Result<(), ConfigError> {
    if let Some(namespace) = env_value(ENV_NAMESPACE) {
        config.namespace = namespace;
    }
    if let Some(workers) = env_parsed(ENV_WORKERS)? {
        config.worker_count = workers;
    }
    if let Some(timeout) = env_parsed(ENV_RECONCILE_TIMEOUT)? {
        config.reconcile_timeout_secs = timeout;
    }
    if let Some(dir) = env_value(ENV_SECRET_STORE_DIR) {
        config.secret_store_dir = Some(PathBuf::from(dir));
    }
    Ok(())
}

fn env_value(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn env_parsed<T>(name: &str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    env_value(name)
        .map(|raw| {
            raw.parse::<T>().map_err(|e| ConfigError::Validation {
                message: format!("Invalid value '{}' for {}: {}", raw, name, e),
            })
        })
        .transpose()
}

fn validate_config(config: &OperatorConfig) -> Result<(), ConfigError> {
    if config.namespace.is_empty() {
        return Err(ConfigError::Validation {
            message: "namespace must not be empty".to_string(),
        });
    }

    if config.worker_count == 0 {
        return Err(ConfigError::Validation {
            message: "worker_count must be greater than 0".to_string(),
        });
    }

    for (field, value) in [
        ("reconcile_timeout_secs", config.reconcile_timeout_secs),
        ("http_timeout_secs", config.http_timeout_secs),
        ("retry_base_delay_ms", config.retry_base_delay_ms),
    ] {
        if value == 0 {
            return Err(ConfigError::Validation {
                message: format!("{} must be greater than 0", field),
            });
        }
    }

    if config.event_buffer == 0 {
        return Err(ConfigError::Validation {
            message: "event_buffer must be greater than 0".to_string(),
        });
    }

    Ok(())
}
