//! Error type for MCP server configuration and resolution.

use thiserror::Error;

/// Errors raised while loading, merging, or validating MCP server
/// configuration.
#[derive(Debug, Error)]
pub enum McpError {
    /// The on-disk application-tier config file is malformed.
    #[error("invalid MCP config: {0}")]
    ConfigError(String),

    /// Serialization of a `ServersConfig` back to TOML/JSON failed.
    #[error("failed to serialize MCP config: {0}")]
    SerializationError(String),

    /// A stdio server's declared `binary_hash` didn't match the binary on
    /// disk.
    #[error("binary hash mismatch for server {name}: expected {expected}, got {actual}")]
    BinaryHashMismatch {
        /// Server name.
        name: String,
        /// Hash declared in configuration.
        expected: String,
        /// Hash actually computed from the binary.
        actual: String,
    },

    /// A server definition failed security validation (shell
    /// metacharacters, SSRF target, null byte, or denied env key).
    #[error("rejected MCP server {name}: {reason}")]
    SecurityRejected {
        /// Server name.
        name: String,
        /// Human-readable rejection reason.
        reason: String,
    },

    /// Underlying I/O failure (reading the config file or a binary).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience alias for results returned by this crate.
pub type McpResult<T> = Result<T, McpError>;
