//! Config file discovery and environment-var overlay.
//!
//! Precedence, highest to lowest:
//! 1. Environment variables (`ASTRID_<SCREAMING_SNAKE_FIELD>`)
//! 2. Optional TOML file (`ASTRID_CONFIG_FILE`, default `./astrid.toml`)
//! 3. [`AppConfig::default`]

use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::error::{ConfigError, ConfigResult};
use crate::types::AppConfig;
use crate::validate;

const MAX_CONFIG_FILE_SIZE: u64 = 1_048_576;

/// Load configuration from the optional file at `config_path` (if it
/// exists), overlaid with environment variable overrides, then validated.
///
/// # Errors
/// Returns a [`ConfigError`] if the file exists but is malformed, or if
/// the final configuration fails validation.
pub fn load(config_path: Option<&Path>) -> ConfigResult<AppConfig> {
    let mut merged = toml::Value::try_from(AppConfig::default())
        .expect("AppConfig::default() always serializes");

    if let Some(path) = config_path {
        if let Some(overlay) = try_load_file(path)? {
            deep_merge(&mut merged, &overlay);
            info!(path = %path.display(), "loaded config file");
        }
    }

    apply_env_overrides(&mut merged);

    let config: AppConfig = merged
        .try_into()
        .map_err(|e: toml::de::Error| ConfigError::ParseError {
            path: "<merged config>".to_owned(),
            source: e,
        })?;

    validate::validate(&config)?;
    Ok(config)
}

/// Resolve the config file path: `ASTRID_CONFIG_FILE` if set, else
/// `./astrid.toml` if it exists, else `None` (env-only configuration).
#[must_use]
pub fn default_config_path() -> Option<PathBuf> {
    if let Ok(path) = std::env::var("ASTRID_CONFIG_FILE") {
        return Some(PathBuf::from(path));
    }
    let default = PathBuf::from("astrid.toml");
    default.exists().then_some(default)
}

fn try_load_file(path: &Path) -> ConfigResult<Option<toml::Value>> {
    let content = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!(path = %path.display(), "config file not found, using defaults + env");
            return Ok(None);
        }
        Err(e) => {
            return Err(ConfigError::ReadError {
                path: path.display().to_string(),
                source: e,
            });
        }
    };

    if content.len() as u64 > MAX_CONFIG_FILE_SIZE {
        return Err(ConfigError::ValidationError {
            field: path.display().to_string(),
            message: format!(
                "config file is {} bytes, exceeding the {MAX_CONFIG_FILE_SIZE} byte limit",
                content.len()
            ),
        });
    }

    let value: toml::Value = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
        path: path.display().to_string(),
        source: e,
    })?;
    Ok(Some(value))
}

fn deep_merge(base: &mut toml::Value, overlay: &toml::Value) {
    if let (toml::Value::Table(base_table), toml::Value::Table(overlay_table)) = (base, overlay) {
        for (key, value) in overlay_table {
            match base_table.get_mut(key) {
                Some(existing) => deep_merge(existing, value),
                None => {
                    base_table.insert(key.clone(), value.clone());
                }
            }
        }
    }
}

/// Field-by-field environment variable overrides. Each field maps to
/// `ASTRID_<SCREAMING_SNAKE_NAME>`.
fn apply_env_overrides(merged: &mut toml::Value) {
    let toml::Value::Table(table) = merged else {
        return;
    };

    set_string_from_env(table, "database_url", "ASTRID_DATABASE_URL");
    set_string_from_env(table, "cache_url", "ASTRID_CACHE_URL");
    set_string_from_env(table, "api_key", "ASTRID_API_KEY");
    set_bool_from_env(table, "trust_proxy_headers", "ASTRID_TRUST_PROXY_HEADERS");
    set_list_from_env(table, "cors_origins", "ASTRID_CORS_ORIGINS");
    set_int_from_env(table, "db_pool_size", "ASTRID_DB_POOL_SIZE");
    set_int_from_env(table, "db_max_overflow", "ASTRID_DB_MAX_OVERFLOW");
    set_int_from_env(table, "cache_max_connections", "ASTRID_CACHE_MAX_CONNECTIONS");
    set_int_from_env(
        table,
        "cache_socket_timeout_secs",
        "ASTRID_CACHE_SOCKET_TIMEOUT_SECS",
    );
    set_int_from_env(table, "session_cache_ttl_secs", "ASTRID_SESSION_CACHE_TTL_SECS");
    set_string_from_env(table, "mcp_config_file", "ASTRID_MCP_CONFIG_FILE");
    set_int_from_env(table, "stream_heartbeat_secs", "ASTRID_STREAM_HEARTBEAT_SECS");
    set_bool_from_env(table, "debug", "ASTRID_DEBUG");
}

fn set_string_from_env(table: &mut toml::map::Map<String, toml::Value>, field: &str, var: &str) {
    if let Ok(value) = std::env::var(var) {
        table.insert(field.to_owned(), toml::Value::String(value));
    }
}

fn set_bool_from_env(table: &mut toml::map::Map<String, toml::Value>, field: &str, var: &str) {
    if let Ok(value) = std::env::var(var) {
        if let Ok(parsed) = value.parse::<bool>() {
            table.insert(field.to_owned(), toml::Value::Boolean(parsed));
        }
    }
}

fn set_int_from_env(table: &mut toml::map::Map<String, toml::Value>, field: &str, var: &str) {
    if let Ok(value) = std::env::var(var) {
        if let Ok(parsed) = value.parse::<i64>() {
            table.insert(field.to_owned(), toml::Value::Integer(parsed));
        }
    }
}

fn set_list_from_env(table: &mut toml::map::Map<String, toml::Value>, field: &str, var: &str) {
    if let Ok(value) = std::env::var(var) {
        let items = value
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| toml::Value::String(s.to_owned()))
            .collect();
        table.insert(field.to_owned(), toml::Value::Array(items));
    }
}

#[cfg(test)]
#[allow(unsafe_code)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    // Environment variable tests share process-global state; serialize them.
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    #[test]
    fn loads_from_env_without_a_file() {
        let _guard = ENV_LOCK.lock().unwrap();
        unsafe {
            std::env::set_var("ASTRID_DATABASE_URL", "postgres://localhost/astrid");
            std::env::set_var("ASTRID_CACHE_URL", "redis://localhost");
            std::env::set_var("ASTRID_API_KEY", "test-key");
        }
        let config = load(None).unwrap();
        assert_eq!(config.database_url, "postgres://localhost/astrid");
        assert_eq!(config.db_pool_size, 10);
        unsafe {
            std::env::remove_var("ASTRID_DATABASE_URL");
            std::env::remove_var("ASTRID_CACHE_URL");
            std::env::remove_var("ASTRID_API_KEY");
        }
    }

    #[test]
    fn env_overrides_file() {
        let _guard = ENV_LOCK.lock().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("astrid.toml");
        std::fs::write(
            &path,
            r#"
            database_url = "postgres://file/astrid"
            cache_url = "redis://file"
            api_key = "file-key"
            db_pool_size = 3
            "#,
        )
        .unwrap();

        unsafe {
            std::env::set_var("ASTRID_API_KEY", "env-key");
        }
        let config = load(Some(&path)).unwrap();
        assert_eq!(config.api_key, "env-key");
        assert_eq!(config.db_pool_size, 3);
        unsafe {
            std::env::remove_var("ASTRID_API_KEY");
        }
    }

    #[test]
    fn missing_required_field_fails_validation() {
        let _guard = ENV_LOCK.lock().unwrap();
        let result = load(None);
        assert!(result.is_err());
    }
}
