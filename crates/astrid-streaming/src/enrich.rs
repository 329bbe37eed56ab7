//! `RequestEnricher`: turns an inbound, untrusted request body plus
//! server-side tenant state into a validated [`AgentOptions`].
//!
//! Runs once per `AgentRunner` invocation (§4.6 step 3), after the active
//! marker is registered and before the agent options object is built.

use std::collections::HashMap;
use std::sync::Arc;

use astrid_core::HookEvent;
use astrid_mcp::McpConfigResolver;
use astrid_hooks::WebhookRegistration;
use serde::Deserialize;
use serde_json::Value;

use crate::backend::{AgentOptions, PermissionMode};
use crate::error::{ApiError, ApiResult};

/// The caller-supplied portion of a query/resume/fork request body
/// relevant to enrichment. Transport-specific fields (session id to
/// resume, etc.) are handled by the API layer; this is just the payload
/// shape `RequestEnricher` consumes.
#[derive(Debug, Deserialize)]
pub struct InboundRequest {
    pub prompt: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub cwd: Option<String>,
    #[serde(default)]
    pub system_prompt: Option<String>,
    #[serde(default)]
    pub allowed_tools: Vec<String>,
    #[serde(default)]
    pub denied_tools: Vec<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    #[serde(default)]
    pub mcp_servers: Option<Value>,
    #[serde(default)]
    pub permission_mode: Option<String>,
    #[serde(default)]
    pub checkpointing_enabled: bool,
    #[serde(default)]
    pub output_schema: Option<Value>,
    #[serde(default)]
    pub hooks: HashMap<String, WebhookRegistration>,
}

pub(crate) const DEFAULT_MODEL: &str = "claude-3-5-sonnet-latest";
pub(crate) const DEFAULT_CWD: &str = "/workspace";

pub struct RequestEnricher {
    mcp_resolver: Arc<McpConfigResolver>,
}

impl RequestEnricher {
    #[must_use]
    pub fn new(mcp_resolver: Arc<McpConfigResolver>) -> Self {
        Self { mcp_resolver }
    }

    /// Build a validated [`AgentOptions`] from `request`, the tenant's
    /// stored MCP records, and binding context (owner hash, resume/parent
    /// ids are threaded in by the caller, not parsed here).
    ///
    /// # Errors
    /// `ApiError::Validation` on a malformed `permission_mode` string or a
    /// request-supplied MCP entry that fails parsing; MCP security
    /// rejections surface as `ApiError::ForbiddenUrl`/`ForbiddenCommand`
    /// depending on which check failed.
    pub fn enrich(
        &self,
        request: InboundRequest,
        tenant_mcp_servers: &HashMap<String, astrid_mcp::ServerConfig>,
        resume_session_id: Option<uuid::Uuid>,
        parent_session_id: Option<uuid::Uuid>,
    ) -> ApiResult<AgentOptions> {
        let permission_mode = match request.permission_mode.as_deref() {
            None => PermissionMode::Default,
            Some("default") => PermissionMode::Default,
            Some("acceptEdits") => PermissionMode::AcceptEdits,
            Some("bypassPermissions") => PermissionMode::BypassPermissions,
            Some("plan") => PermissionMode::Plan,
            Some(other) => {
                return Err(ApiError::Validation(format!("unknown permission_mode {other:?}")));
            }
        };

        let mcp_servers = self
            .mcp_resolver
            .resolve(tenant_mcp_servers, request.mcp_servers.as_ref())
            .map_err(mcp_error_to_api_error)?;

        let mut hooks = HashMap::new();
        for (event_name, registration) in request.hooks {
            let event = parse_hook_event(&event_name)?;
            hooks.insert(event, registration);
        }

        Ok(AgentOptions {
            model: request.model.unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            cwd: request.cwd.unwrap_or_else(|| DEFAULT_CWD.to_string()),
            prompt: request.prompt,
            system_prompt: request.system_prompt,
            allowed_tools: request.allowed_tools,
            denied_tools: request.denied_tools,
            env: request.env,
            mcp_servers,
            permission_mode,
            checkpointing_enabled: request.checkpointing_enabled,
            output_schema: request.output_schema,
            resume_session_id,
            parent_session_id,
            hooks,
        })
    }
}

fn parse_hook_event(name: &str) -> ApiResult<HookEvent> {
    match name {
        "PreToolUse" => Ok(HookEvent::PreToolUse),
        "PostToolUse" => Ok(HookEvent::PostToolUse),
        "UserPromptSubmit" => Ok(HookEvent::UserPromptSubmit),
        "Stop" => Ok(HookEvent::Stop),
        "SubagentStop" => Ok(HookEvent::SubagentStop),
        "PreCompact" => Ok(HookEvent::PreCompact),
        "Notification" => Ok(HookEvent::Notification),
        other => Err(ApiError::Validation(format!("unknown hook event {other:?}"))),
    }
}

fn mcp_error_to_api_error(err: astrid_mcp::McpError) -> ApiError {
    match &err {
        astrid_mcp::McpError::SecurityRejected { reason, .. } if reason.contains("URL") => {
            ApiError::ForbiddenUrl(err.to_string())
        }
        astrid_mcp::McpError::SecurityRejected { .. } => ApiError::ForbiddenCommand(err.to_string()),
        _ => ApiError::Validation(err.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_request() -> InboundRequest {
        InboundRequest {
            prompt: "hello".into(),
            model: None,
            cwd: None,
            system_prompt: None,
            allowed_tools: Vec::new(),
            denied_tools: Vec::new(),
            env: HashMap::new(),
            mcp_servers: None,
            permission_mode: None,
            checkpointing_enabled: false,
            output_schema: None,
            hooks: HashMap::new(),
        }
    }

    #[test]
    fn defaults_model_and_cwd_when_absent() {
        let enricher = RequestEnricher::new(Arc::new(McpConfigResolver::empty()));
        let options = enricher.enrich(minimal_request(), &HashMap::new(), None, None).unwrap();
        assert_eq!(options.model, DEFAULT_MODEL);
        assert_eq!(options.cwd, DEFAULT_CWD);
    }

    #[test]
    fn unknown_permission_mode_is_rejected() {
        let enricher = RequestEnricher::new(Arc::new(McpConfigResolver::empty()));
        let mut request = minimal_request();
        request.permission_mode = Some("godmode".into());
        let err = enricher.enrich(request, &HashMap::new(), None, None).unwrap_err();
        assert!(matches!(err, ApiError::Validation(_)));
    }

    #[test]
    fn empty_object_mcp_servers_is_opt_out() {
        let enricher = RequestEnricher::new(Arc::new(McpConfigResolver::empty()));
        let mut tenant = HashMap::new();
        tenant.insert("fs".to_string(), astrid_mcp::ServerConfig::stdio("fs", "npx"));
        let mut request = minimal_request();
        request.mcp_servers = Some(serde_json::json!({}));
        let options = enricher.enrich(request, &tenant, None, None).unwrap();
        assert!(options.mcp_servers.is_empty());
    }

    #[test]
    fn unknown_hook_event_name_is_rejected() {
        let enricher = RequestEnricher::new(Arc::new(McpConfigResolver::empty()));
        let mut request = minimal_request();
        request.hooks.insert(
            "NotARealEvent".to_string(),
            WebhookRegistration::new(HookEvent::Stop, "https://example.com"),
        );
        let err = enricher.enrich(request, &HashMap::new(), None, None).unwrap_err();
        assert!(matches!(err, ApiError::Validation(_)));
    }
}
