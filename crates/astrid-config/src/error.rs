//! Configuration error types.

use thiserror::Error;

/// Errors raised while loading or validating application configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A config file could not be read.
    #[error("failed to read config file {path}: {source}")]
    ReadError {
        /// Path that failed to read.
        path: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// A config file's contents couldn't be parsed.
    #[error("failed to parse config file {path}: {source}")]
    ParseError {
        /// Path that failed to parse.
        path: String,
        /// Underlying parse error.
        #[source]
        source: toml::de::Error,
    },

    /// A required field was neither set in the file nor the environment.
    #[error("missing required configuration: {field}")]
    MissingRequired {
        /// Field name.
        field: String,
    },

    /// A field's value failed validation.
    #[error("invalid configuration for {field}: {message}")]
    ValidationError {
        /// Field name.
        field: String,
        /// Human-readable validation message.
        message: String,
    },
}

/// Convenience alias for results returned by this crate.
pub type ConfigResult<T> = Result<T, ConfigError>;
