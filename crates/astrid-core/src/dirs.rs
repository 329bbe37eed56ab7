//! Directory scaffolding for Astrid home state.
//!
//! [`AstridHome`] resolves the global state directory (`~/.astrid/` or
//! `$ASTRID_HOME`) used to locate the default MCP server configuration file.

use std::io;
use std::path::{Path, PathBuf};

/// Global Astrid home directory (`~/.astrid/` or `$ASTRID_HOME`).
#[derive(Debug, Clone)]
pub struct AstridHome {
    root: PathBuf,
}

impl AstridHome {
    /// Resolve the home directory.
    ///
    /// Checks `$ASTRID_HOME` first, then falls back to `$HOME/.astrid/`.
    ///
    /// # Errors
    ///
    /// Returns an error if neither `$ASTRID_HOME` nor `$HOME` is set, or if
    /// `$ASTRID_HOME` is set to a relative path.
    pub fn resolve() -> io::Result<Self> {
        let root = if let Ok(custom) = std::env::var("ASTRID_HOME") {
            let p = PathBuf::from(&custom);
            if !p.is_absolute() {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    "ASTRID_HOME must be an absolute path",
                ));
            }
            p
        } else {
            let home = std::env::var("HOME").map_err(|_| {
                io::Error::new(
                    io::ErrorKind::NotFound,
                    "neither ASTRID_HOME nor HOME environment variable is set",
                )
            })?;
            PathBuf::from(home).join(".astrid")
        };

        Ok(Self { root })
    }

    /// Create from an explicit path (useful for testing).
    #[must_use]
    pub fn from_path(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Root directory path.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path to the MCP servers configuration file (`~/.astrid/servers.toml`).
    #[must_use]
    pub fn servers_config_path(&self) -> PathBuf {
        self.root.join("servers.toml")
    }
}
