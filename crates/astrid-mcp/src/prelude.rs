//! Prelude module — commonly used types for convenient import.
//!
//! Use `use astrid_mcp::prelude::*;` to import all essential types.

pub use crate::{McpConfigResolver, McpError, McpResult};
pub use crate::{RestartPolicy, ServerConfig, ServersConfig, Transport};
