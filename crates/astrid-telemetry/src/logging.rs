//! Logging subscriber setup.

use crate::{TelemetryError, TelemetryResult};
use std::path::PathBuf;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Output format for log lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable, multi-line, ANSI-colored when the target is a tty.
    Pretty,
    /// Single-line, machine-parseable JSON objects.
    Json,
    /// Single-line, human-readable (no ANSI).
    Compact,
}

/// Where log lines are written.
#[derive(Debug, Clone)]
pub enum LogTarget {
    /// Standard output.
    Stdout,
    /// Standard error.
    Stderr,
    /// A rolling daily file under the given directory, via `tracing-appender`.
    File {
        /// Directory the rolling file lives in.
        directory: PathBuf,
        /// File name prefix.
        prefix: String,
    },
}

/// Logging configuration: base level, format, target, and per-module
/// directive overrides.
#[derive(Debug, Clone)]
pub struct LogConfig {
    level: String,
    format: LogFormat,
    target: LogTarget,
    directives: Vec<String>,
}

impl LogConfig {
    /// Start a config at the given base level (`"trace"`, `"debug"`,
    /// `"info"`, `"warn"`, `"error"`, or any `tracing_subscriber::EnvFilter`
    /// directive string).
    #[must_use]
    pub fn new(level: impl Into<String>) -> Self {
        Self {
            level: level.into(),
            format: LogFormat::Pretty,
            target: LogTarget::Stdout,
            directives: Vec::new(),
        }
    }

    /// Set the output format.
    #[must_use]
    pub fn with_format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    /// Set the output target.
    #[must_use]
    pub fn with_target(mut self, target: LogTarget) -> Self {
        self.target = target;
        self
    }

    /// Add a per-module directive (e.g. `"astrid_mcp=trace"`), appended to
    /// the base level when building the `EnvFilter`.
    #[must_use]
    pub fn with_directive(mut self, directive: impl Into<String>) -> Self {
        self.directives.push(directive.into());
        self
    }

    fn filter(&self) -> TelemetryResult<EnvFilter> {
        let mut spec = self.level.clone();
        for directive in &self.directives {
            spec.push(',');
            spec.push_str(directive);
        }
        EnvFilter::try_new(spec).map_err(|e| TelemetryError::ConfigError(e.to_string()))
    }
}

/// Initialize the global `tracing` subscriber from `config`.
///
/// # Errors
/// Returns [`TelemetryError::ConfigError`] if the filter spec is malformed,
/// or [`TelemetryError::InitError`] if a subscriber is already installed.
pub fn setup_logging(config: &LogConfig) -> TelemetryResult<()> {
    let filter = config.filter()?;
    let registry = tracing_subscriber::registry().with(filter);
    let init_err = |e: Box<dyn std::error::Error>| TelemetryError::InitError(e.to_string());

    match &config.target {
        LogTarget::Stdout => match config.format {
            LogFormat::Pretty => registry
                .with(fmt::layer().pretty())
                .try_init()
                .map_err(|e| init_err(e.into())),
            LogFormat::Json => registry
                .with(fmt::layer().json())
                .try_init()
                .map_err(|e| init_err(e.into())),
            LogFormat::Compact => registry
                .with(fmt::layer().compact())
                .try_init()
                .map_err(|e| init_err(e.into())),
        },
        LogTarget::Stderr => match config.format {
            LogFormat::Pretty => registry
                .with(fmt::layer().pretty().with_writer(std::io::stderr))
                .try_init()
                .map_err(|e| init_err(e.into())),
            LogFormat::Json => registry
                .with(fmt::layer().json().with_writer(std::io::stderr))
                .try_init()
                .map_err(|e| init_err(e.into())),
            LogFormat::Compact => registry
                .with(fmt::layer().compact().with_writer(std::io::stderr))
                .try_init()
                .map_err(|e| init_err(e.into())),
        },
        LogTarget::File { directory, prefix } => {
            std::fs::create_dir_all(directory)?;
            let appender = tracing_appender::rolling::daily(directory, prefix);
            // Leaked intentionally: the writer guard must outlive the
            // process, and this function only runs once at startup.
            let (writer, guard) = tracing_appender::non_blocking(appender);
            std::mem::forget(guard);
            match config.format {
                LogFormat::Pretty => registry
                    .with(fmt::layer().pretty().with_writer(writer))
                    .try_init()
                    .map_err(|e| init_err(e.into())),
                LogFormat::Json => registry
                    .with(fmt::layer().json().with_writer(writer))
                    .try_init()
                    .map_err(|e| init_err(e.into())),
                LogFormat::Compact => registry
                    .with(fmt::layer().compact().with_writer(writer))
                    .try_init()
                    .map_err(|e| init_err(e.into())),
            }
        }
    }
}

/// Initialize logging with sane defaults: info level, pretty format, stdout,
/// respecting `RUST_LOG` if set.
///
/// # Errors
/// Returns [`TelemetryError::InitError`] if a subscriber is already
/// installed.
pub fn setup_default_logging() -> TelemetryResult<()> {
    let level = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
    setup_logging(&LogConfig::new(level))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_accumulates_directives() {
        let config = LogConfig::new("info")
            .with_format(LogFormat::Json)
            .with_directive("astrid_mcp=trace")
            .with_directive("astrid_streaming=debug");
        let filter = config.filter().unwrap().to_string();
        assert!(filter.contains("astrid_mcp=trace"));
        assert!(filter.contains("astrid_streaming=debug"));
    }

    #[test]
    fn rejects_malformed_filter_spec() {
        let config = LogConfig::new("not a valid directive===");
        assert!(config.filter().is_err());
    }
}
