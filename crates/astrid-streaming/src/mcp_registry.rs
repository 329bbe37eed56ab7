//! Tenant-scoped MCP server record storage — the cache-only tier
//! `McpConfigResolver::resolve` merges against for a given tenant (§3's
//! "MCP server record", scoping `mcp_server:{tenant_hash}:{name}` /
//! `mcp_servers:index:{tenant_hash}`).
//!
//! There is no HTTP endpoint for writing these records (§6's surface has
//! none); they are populated by an out-of-scope admin path and only read
//! here. `put`/`remove` exist anyway since the cache-key scoping is part of
//! the data model this crate owns, not just a read path.

use std::collections::HashMap;
use std::sync::Arc;

use crate::cache::Cache;
use crate::domain::McpServerRecord;
use crate::error::ApiResult;

fn record_key(tenant_hash: &str, name: &str) -> String {
    format!("mcp_server:{tenant_hash}:{name}")
}

fn index_key(tenant_hash: &str) -> String {
    format!("mcp_servers:index:{tenant_hash}")
}

pub struct TenantMcpRegistry {
    cache: Arc<dyn Cache>,
}

impl TenantMcpRegistry {
    #[must_use]
    pub fn new(cache: Arc<dyn Cache>) -> Self {
        Self { cache }
    }

    /// All enabled and disabled records registered for `tenant_hash`,
    /// projected to the shape `McpConfigResolver` merges against. A record
    /// present in the index but missing (expired/evicted) is skipped with
    /// a warning rather than failing the whole read.
    pub async fn resolved_tier(&self, tenant_hash: &str) -> ApiResult<HashMap<String, astrid_mcp::ServerConfig>> {
        let names = self.cache.set_members(&index_key(tenant_hash)).await?;
        let keys: Vec<String> = names.iter().map(|name| record_key(tenant_hash, name)).collect();
        let values = self.cache.get_many_json(&keys).await?;

        let mut out = HashMap::new();
        for (name, value) in names.into_iter().zip(values) {
            match value {
                Some(value) => match serde_json::from_value::<McpServerRecord>(value) {
                    Ok(record) => {
                        out.insert(record.name.clone(), record.to_server_config());
                    }
                    Err(err) => {
                        tracing::warn!(tenant = %tenant_hash, server = %name, error = %err, "malformed MCP server record, skipping");
                    }
                },
                None => {
                    tracing::warn!(tenant = %tenant_hash, server = %name, "MCP server record indexed but missing");
                }
            }
        }
        Ok(out)
    }

    pub async fn put(&self, tenant_hash: &str, record: &McpServerRecord) -> ApiResult<()> {
        let value = serde_json::to_value(record).expect("McpServerRecord always serializes");
        self.cache.set_json(&record_key(tenant_hash, &record.name), &value, RECORD_TTL).await?;
        self.cache.set_add(&index_key(tenant_hash), &record.name).await?;
        Ok(())
    }

    pub async fn remove(&self, tenant_hash: &str, name: &str) -> ApiResult<()> {
        self.cache.delete(&record_key(tenant_hash, name)).await?;
        self.cache.set_remove(&index_key(tenant_hash), name).await?;
        Ok(())
    }
}

/// Tenant MCP records have no natural expiry in the data model (they're
/// configuration, not a marker); a long TTL still bounds unbounded cache
/// growth from tenants who register a server and never remove it.
const RECORD_TTL: std::time::Duration = std::time::Duration::from_secs(30 * 24 * 60 * 60);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::InMemoryCache;
    use crate::domain::{McpServerStatus, McpTransport};

    fn record(name: &str) -> McpServerRecord {
        McpServerRecord {
            name: name.to_string(),
            transport: McpTransport::Stdio,
            command: Some("npx".to_string()),
            args: Vec::new(),
            url: None,
            headers: HashMap::new(),
            env: HashMap::new(),
            enabled: true,
            status: McpServerStatus::Connected,
        }
    }

    #[tokio::test]
    async fn put_then_resolved_tier_returns_the_record() {
        let registry = TenantMcpRegistry::new(Arc::new(InMemoryCache::new()));
        registry.put("tenant-a", &record("fs")).await.unwrap();
        let tier = registry.resolved_tier("tenant-a").await.unwrap();
        assert!(tier.contains_key("fs"));
    }

    #[tokio::test]
    async fn remove_drops_it_from_the_resolved_tier() {
        let registry = TenantMcpRegistry::new(Arc::new(InMemoryCache::new()));
        registry.put("tenant-a", &record("fs")).await.unwrap();
        registry.remove("tenant-a", "fs").await.unwrap();
        let tier = registry.resolved_tier("tenant-a").await.unwrap();
        assert!(!tier.contains_key("fs"));
    }

    #[tokio::test]
    async fn tenants_are_isolated_by_construction() {
        let registry = TenantMcpRegistry::new(Arc::new(InMemoryCache::new()));
        registry.put("tenant-a", &record("fs")).await.unwrap();
        let tier = registry.resolved_tier("tenant-b").await.unwrap();
        assert!(tier.is_empty());
    }
}
