//! Configuration struct definitions for the streaming session engine.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Application configuration: the façade's entire externally-tunable
/// surface. Every field maps to an environment variable
/// (`ASTRID_<SCREAMING_SNAKE_FIELD>`) or a matching key in the optional
/// TOML config file; the environment always wins when both are set.
#[derive(Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Postgres connection string for the durable session store.
    pub database_url: String,
    /// Redis connection string for the hot cache.
    pub cache_url: String,
    /// API key callers must present; compared in constant time against a
    /// SHA-256 hash, never logged.
    #[serde(skip_serializing)]
    pub api_key: String,
    /// Whether to trust `X-Forwarded-For`/`X-Forwarded-Proto` from the
    /// immediate peer (only safe behind a known reverse proxy).
    #[serde(default)]
    pub trust_proxy_headers: bool,
    /// Explicit CORS origin allow-list. A literal `*` is rejected unless
    /// `debug` is set.
    #[serde(default)]
    pub cors_origins: Vec<String>,
    /// Postgres pool size.
    #[serde(default = "default_db_pool_size")]
    pub db_pool_size: u32,
    /// Postgres pool max overflow beyond `db_pool_size`.
    #[serde(default = "default_db_max_overflow")]
    pub db_max_overflow: u32,
    /// Maximum concurrent cache connections.
    #[serde(default = "default_cache_max_connections")]
    pub cache_max_connections: u32,
    /// Cache socket timeout, in seconds.
    #[serde(default = "default_cache_socket_timeout_secs")]
    pub cache_socket_timeout_secs: u64,
    /// TTL applied to cache-aside session reads, in seconds.
    #[serde(default = "default_session_cache_ttl_secs")]
    pub session_cache_ttl_secs: u64,
    /// Path to the application-tier MCP server config file.
    #[serde(default = "default_mcp_config_file")]
    pub mcp_config_file: PathBuf,
    /// Heartbeat cadence for idle SSE/WebSocket streams, in seconds.
    #[serde(default = "default_stream_heartbeat_secs")]
    pub stream_heartbeat_secs: u64,
    /// Enables verbose diagnostics and relaxes a small number of
    /// production-only restrictions (e.g. wildcard CORS).
    #[serde(default)]
    pub debug: bool,
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("database_url", &"***REDACTED***")
            .field("cache_url", &"***REDACTED***")
            .field("api_key", &"***REDACTED***")
            .field("trust_proxy_headers", &self.trust_proxy_headers)
            .field("cors_origins", &self.cors_origins)
            .field("db_pool_size", &self.db_pool_size)
            .field("db_max_overflow", &self.db_max_overflow)
            .field("cache_max_connections", &self.cache_max_connections)
            .field("cache_socket_timeout_secs", &self.cache_socket_timeout_secs)
            .field("session_cache_ttl_secs", &self.session_cache_ttl_secs)
            .field("mcp_config_file", &self.mcp_config_file)
            .field("stream_heartbeat_secs", &self.stream_heartbeat_secs)
            .field("debug", &self.debug)
            .finish()
    }
}

fn default_db_pool_size() -> u32 {
    10
}

fn default_db_max_overflow() -> u32 {
    5
}

fn default_cache_max_connections() -> u32 {
    20
}

fn default_cache_socket_timeout_secs() -> u64 {
    5
}

fn default_session_cache_ttl_secs() -> u64 {
    3600
}

fn default_mcp_config_file() -> PathBuf {
    PathBuf::from(".mcp-server-config.json")
}

fn default_stream_heartbeat_secs() -> u64 {
    15
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database_url: String::new(),
            cache_url: String::new(),
            api_key: String::new(),
            trust_proxy_headers: false,
            cors_origins: Vec::new(),
            db_pool_size: default_db_pool_size(),
            db_max_overflow: default_db_max_overflow(),
            cache_max_connections: default_cache_max_connections(),
            cache_socket_timeout_secs: default_cache_socket_timeout_secs(),
            session_cache_ttl_secs: default_session_cache_ttl_secs(),
            mcp_config_file: default_mcp_config_file(),
            stream_heartbeat_secs: default_stream_heartbeat_secs(),
            debug: false,
        }
    }
}
