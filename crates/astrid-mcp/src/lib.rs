//! Astrid MCP — MCP server configuration, security validation, and the
//! three-tier config resolver used by the streaming session engine.
//!
//! This crate does not run an MCP client itself — connecting to and
//! calling MCP servers is the agent runtime's job, which this façade
//! treats as opaque. What lives here is the part the façade owns: where
//! server definitions come from, how they're merged per request, and
//! what gets rejected before ever reaching the agent.
//!
//! # Example
//!
//! ```rust,no_run
//! use astrid_mcp::{McpConfigResolver, ServerConfig};
//! use std::collections::HashMap;
//!
//! # fn example() -> Result<(), astrid_mcp::McpError> {
//! let resolver = McpConfigResolver::load(".mcp-server-config.json")?;
//! let tenant_servers: HashMap<String, ServerConfig> = HashMap::new();
//! let resolved = resolver.resolve(&tenant_servers, None)?;
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]

pub mod prelude;

mod config;
mod error;
mod resolver;
mod security;

pub use config::{RestartPolicy, ServerConfig, ServersConfig, Transport};
pub use error::{McpError, McpResult};
pub use resolver::McpConfigResolver;
pub use security::{redact_server, validate_server};
