//! Prelude module — commonly used types for convenient import.

pub use crate::{AppConfig, ConfigError, ConfigResult};
