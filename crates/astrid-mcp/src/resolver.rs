//! Three-tier MCP server configuration resolver.
//!
//! Follows the same protected-field / sanitize-on-merge pattern
//! `astrid-config` uses for its workspace-vs-baseline merge, adapted here
//! from a two-tier workspace/baseline merge to the three-tier
//! request/tenant/application merge this façade needs.

use crate::config::ServerConfig;
use crate::error::McpError;
use crate::security;
use serde_json::Value;
use std::collections::HashMap;
use tracing::warn;

/// Resolves the effective set of MCP servers for a single request by
/// merging the application-wide file, the tenant's stored records, and
/// any servers supplied inline on the request.
pub struct McpConfigResolver {
    application: HashMap<String, ServerConfig>,
}

impl McpConfigResolver {
    /// Load and validate the application tier from a JSON file at
    /// startup. Entries that fail security validation are skipped with a
    /// warning rather than failing startup.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or isn't valid JSON.
    pub fn load(path: impl AsRef<std::path::Path>) -> Result<Self, McpError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let raw: HashMap<String, ServerConfig> = serde_json::from_str(&content)
            .map_err(|e| McpError::ConfigError(format!("invalid application MCP config: {e}")))?;

        let mut application = HashMap::new();
        for (name, mut config) in raw {
            config.name.clone_from(&name);
            if let Err(err) = security::validate_server(
                &name,
                config.command.as_deref(),
                &config.args,
                config.url.as_deref(),
                &config.env,
            ) {
                warn!(server = %name, error = %err, "skipping invalid application-tier MCP server");
                continue;
            }
            application.insert(name, config);
        }
        Ok(Self { application })
    }

    /// Construct a resolver with no application tier (used in tests, or
    /// when no application-tier file is configured).
    #[must_use]
    pub fn empty() -> Self {
        Self {
            application: HashMap::new(),
        }
    }

    /// Resolve the effective server set for one request.
    ///
    /// `tenant` is the tenant's stored records (already validated at
    /// write time by the MCP admin surface). `request` is the raw
    /// `mcp_servers` field from the inbound request body, if any:
    /// `None` merges the server-side tiers only; `Some(Value::Object)`
    /// that is empty is an explicit opt-out (returns no servers at all);
    /// otherwise its entries are parsed as `ServerConfig` and take
    /// precedence over both server-side tiers, entry by entry.
    ///
    /// # Errors
    /// Returns an error if a request-supplied entry fails to parse or
    /// fails security validation — the whole request is rejected, unlike
    /// the load-time warn-and-skip behavior for the application tier.
    pub fn resolve(
        &self,
        tenant: &HashMap<String, ServerConfig>,
        request: Option<&Value>,
    ) -> Result<HashMap<String, ServerConfig>, McpError> {
        if let Some(Value::Object(map)) = request {
            if map.is_empty() {
                return Ok(HashMap::new());
            }
        }

        let mut merged = self.application.clone();
        for (name, config) in tenant {
            merged.insert(name.clone(), config.clone());
        }

        if let Some(value) = request {
            if !value.is_null() {
                let requested: HashMap<String, ServerConfig> = serde_json::from_value(
                    value.clone(),
                )
                .map_err(|e| McpError::ConfigError(format!("invalid request MCP servers: {e}")))?;
                for (name, mut config) in requested {
                    config.name.clone_from(&name);
                    merged.insert(name, config);
                }
            }
        }

        for (name, config) in &merged {
            security::validate_server(
                name,
                config.command.as_deref(),
                &config.args,
                config.url.as_deref(),
                &config.env,
            )?;
        }

        for config in merged.values_mut() {
            resolve_env_placeholders(config);
        }

        Ok(merged.into_iter().filter(|(_, c)| c.enabled).collect())
    }
}

/// Resolve `${VAR}` placeholders in `config.env` values from the process
/// environment. A missing variable leaves the literal placeholder in
/// place and logs a warning; client-supplied values are never consulted.
fn resolve_env_placeholders(config: &mut ServerConfig) {
    for value in config.env.values_mut() {
        *value = resolve_placeholders_in(value, &config.name);
    }
}

fn resolve_placeholders_in(value: &str, server_name: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut rest = value;
    while let Some(start) = rest.find("${") {
        let Some(end) = rest[start..].find('}') else {
            out.push_str(rest);
            return out;
        };
        out.push_str(&rest[..start]);
        let var_name = &rest[start + 2..start + end];
        match std::env::var(var_name) {
            Ok(resolved) => out.push_str(&resolved),
            Err(_) => {
                warn!(server = %server_name, var = %var_name, "MCP env placeholder not set");
                out.push_str(&rest[start..start + end + 1]);
            }
        }
        rest = &rest[start + end + 1..];
    }
    out.push_str(rest);
    out
}

#[cfg(test)]
#[allow(unsafe_code)]
mod tests {
    use super::*;

    #[test]
    fn request_none_merges_application_and_tenant() {
        let mut resolver = McpConfigResolver::empty();
        resolver
            .application
            .insert("fs".to_string(), ServerConfig::stdio("fs", "npx"));
        let mut tenant = HashMap::new();
        tenant.insert("search".to_string(), ServerConfig::sse("search", "https://example.com"));

        let resolved = resolver.resolve(&tenant, None).unwrap();
        assert_eq!(resolved.len(), 2);
    }

    #[test]
    fn empty_object_request_is_opt_out() {
        let mut resolver = McpConfigResolver::empty();
        resolver
            .application
            .insert("fs".to_string(), ServerConfig::stdio("fs", "npx"));
        let tenant = HashMap::new();

        let resolved = resolver
            .resolve(&tenant, Some(&serde_json::json!({})))
            .unwrap();
        assert!(resolved.is_empty());
    }

    #[test]
    fn request_entry_replaces_same_name_entirely() {
        let resolver = McpConfigResolver::empty();
        let mut tenant = HashMap::new();
        tenant.insert(
            "fs".to_string(),
            ServerConfig::stdio("fs", "npx").with_args(["-y", "tenant-server"]),
        );

        let request = serde_json::json!({
            "fs": { "transport": "stdio", "command": "custom-fs" }
        });
        let resolved = resolver.resolve(&tenant, Some(&request)).unwrap();
        assert_eq!(resolved["fs"].command.as_deref(), Some("custom-fs"));
        assert!(resolved["fs"].args.is_empty());
    }

    #[test]
    fn rejects_request_entry_with_shell_metacharacters() {
        let resolver = McpConfigResolver::empty();
        let tenant = HashMap::new();
        let request = serde_json::json!({
            "evil": { "transport": "stdio", "command": "echo; rm -rf /" }
        });
        assert!(resolver.resolve(&tenant, Some(&request)).is_err());
    }

    #[test]
    fn disabled_servers_are_filtered_out() {
        let mut resolver = McpConfigResolver::empty();
        let mut disabled = ServerConfig::stdio("fs", "npx");
        disabled.enabled = false;
        resolver.application.insert("fs".to_string(), disabled);

        let resolved = resolver.resolve(&HashMap::new(), None).unwrap();
        assert!(resolved.is_empty());
    }

    #[test]
    fn resolves_env_placeholder_from_process_env() {
        unsafe {
            std::env::set_var("ASTRID_TEST_MCP_TOKEN", "secret-value");
        }
        let mut resolver = McpConfigResolver::empty();
        resolver.application.insert(
            "fs".to_string(),
            ServerConfig::stdio("fs", "npx").with_env("TOKEN", "${ASTRID_TEST_MCP_TOKEN}"),
        );
        let resolved = resolver.resolve(&HashMap::new(), None).unwrap();
        assert_eq!(resolved["fs"].env["TOKEN"], "secret-value");
        unsafe {
            std::env::remove_var("ASTRID_TEST_MCP_TOKEN");
        }
    }

    #[test]
    fn leaves_placeholder_literal_when_var_missing() {
        let mut resolver = McpConfigResolver::empty();
        resolver.application.insert(
            "fs".to_string(),
            ServerConfig::stdio("fs", "npx").with_env("TOKEN", "${ASTRID_TEST_MCP_MISSING}"),
        );
        let resolved = resolver.resolve(&HashMap::new(), None).unwrap();
        assert_eq!(resolved["fs"].env["TOKEN"], "${ASTRID_TEST_MCP_MISSING}");
    }
}
