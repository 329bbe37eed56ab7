#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
//! Unified configuration for the Astrid streaming session engine.
//!
//! # Usage
//!
//! ```rust,no_run
//! use astrid_config::AppConfig;
//!
//! // Optional file overlaid by environment variables; see `loader::load`
//! // for precedence.
//! let config = AppConfig::load(None).unwrap();
//! println!("pool size: {}", config.db_pool_size);
//! ```
//!
//! # Configuration Precedence
//!
//! 1. Environment variables (`ASTRID_<SCREAMING_SNAKE_FIELD>`)
//! 2. Optional TOML file
//! 3. Built-in defaults
//!
//! # Design
//!
//! This crate has no dependency on other internal astrid crates. It only
//! depends on `serde`, `toml`, `thiserror`, and `tracing`.

/// Configuration error types.
pub mod error;
/// Configuration file discovery and environment overlay.
pub mod loader;
/// Configuration struct definitions.
pub mod types;
/// Configuration validation rules.
pub mod validate;

pub mod prelude;

pub use error::{ConfigError, ConfigResult};
pub use types::AppConfig;

impl AppConfig {
    /// Load configuration: optional file at `config_path`, overlaid by
    /// environment variables, validated.
    ///
    /// # Errors
    /// Returns a [`ConfigError`] if the file is malformed or the final
    /// configuration fails validation.
    pub fn load(config_path: Option<&std::path::Path>) -> ConfigResult<Self> {
        loader::load(config_path)
    }
}
