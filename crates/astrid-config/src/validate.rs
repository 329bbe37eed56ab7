//! Post-load configuration validation.
//!
//! Validates that a deserialized [`AppConfig`] is within acceptable ranges
//! and that cross-field invariants hold.

use crate::error::{ConfigError, ConfigResult};
use crate::types::AppConfig;

/// Validate a fully-loaded configuration.
///
/// # Errors
/// Returns the first validation error found.
pub fn validate(config: &AppConfig) -> ConfigResult<()> {
    validate_required(config)?;
    validate_cors(config)?;
    validate_pool_sizes(config)?;
    validate_timeouts(config)?;
    Ok(())
}

fn validate_required(config: &AppConfig) -> ConfigResult<()> {
    if config.database_url.is_empty() {
        return Err(ConfigError::MissingRequired {
            field: "database_url".to_owned(),
        });
    }
    if config.cache_url.is_empty() {
        return Err(ConfigError::MissingRequired {
            field: "cache_url".to_owned(),
        });
    }
    if config.api_key.is_empty() {
        return Err(ConfigError::MissingRequired {
            field: "api_key".to_owned(),
        });
    }
    Ok(())
}

fn validate_cors(config: &AppConfig) -> ConfigResult<()> {
    let has_wildcard = config.cors_origins.iter().any(|o| o == "*");
    if has_wildcard && !config.debug {
        return Err(ConfigError::ValidationError {
            field: "cors_origins".to_owned(),
            message: "wildcard CORS origin is only permitted with debug = true".to_owned(),
        });
    }
    Ok(())
}

fn validate_pool_sizes(config: &AppConfig) -> ConfigResult<()> {
    if config.db_pool_size == 0 {
        return Err(ConfigError::ValidationError {
            field: "db_pool_size".to_owned(),
            message: "must be at least 1".to_owned(),
        });
    }
    if config.cache_max_connections == 0 {
        return Err(ConfigError::ValidationError {
            field: "cache_max_connections".to_owned(),
            message: "must be at least 1".to_owned(),
        });
    }
    Ok(())
}

fn validate_timeouts(config: &AppConfig) -> ConfigResult<()> {
    if config.cache_socket_timeout_secs == 0 {
        return Err(ConfigError::ValidationError {
            field: "cache_socket_timeout_secs".to_owned(),
            message: "must be at least 1 second".to_owned(),
        });
    }
    if config.stream_heartbeat_secs == 0 {
        return Err(ConfigError::ValidationError {
            field: "stream_heartbeat_secs".to_owned(),
            message: "must be at least 1 second".to_owned(),
        });
    }
    Ok(())
}
