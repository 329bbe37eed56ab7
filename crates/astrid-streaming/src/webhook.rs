//! Thin wrapper around `astrid_hooks::WebhookClient` for this crate's own
//! call sites: [`crate::agent_runner::AgentRunner`] dispatching
//! `PreToolUse`/`PostToolUse` around tool calls, plus `UserPromptSubmit`/
//! `Stop`/`SubagentStop`/`PreCompact`/`Notification` at their respective
//! points in the event loop.
//!
//! Registrations themselves are not stored server-side; they travel with
//! the request as part of [`crate::backend::AgentOptions::hooks`], matching
//! how MCP servers are merged per request rather than kept in a durable
//! registry (§4.5's precedence model has no webhook counterpart to merge
//! against — a session either carries a hook registration for an event or
//! it doesn't).

use std::collections::HashMap;

use astrid_core::{HookEvent, SessionId};
use astrid_hooks::{WebhookClient, WebhookDecision, WebhookPayload, WebhookRegistration};
use serde_json::Value;

/// Dispatches hook events against the registrations carried by a single
/// agent invocation.
pub struct HookDispatcher {
    client: WebhookClient,
}

impl Default for HookDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl HookDispatcher {
    #[must_use]
    pub fn new() -> Self {
        Self { client: WebhookClient::new() }
    }

    /// Fire `event` if `hooks` carries a registration for it. Returns
    /// `None` when there's no registration, or the registration's matcher
    /// rejects `tool_name` — in both cases the caller proceeds as if the
    /// event were never gated.
    pub async fn dispatch(
        &self,
        hooks: &HashMap<HookEvent, WebhookRegistration>,
        event: HookEvent,
        session_id: SessionId,
        correlation_id: &str,
        tool_name: Option<&str>,
        tool_input: Option<Value>,
        data: Option<Value>,
    ) -> Option<WebhookDecision> {
        let registration = hooks.get(&event)?;
        let payload = WebhookPayload {
            event,
            session_id,
            correlation_id: correlation_id.to_owned(),
            tool_name: tool_name.map(str::to_owned),
            tool_input,
            data,
        };
        self.client.invoke(registration, &payload).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn no_registration_means_no_call_and_no_decision() {
        let dispatcher = HookDispatcher::new();
        let hooks = HashMap::new();
        let decision = dispatcher
            .dispatch(&hooks, HookEvent::PreToolUse, SessionId::new(), "req-1", Some("Write"), None, None)
            .await;
        assert!(decision.is_none());
    }

    #[tokio::test]
    async fn unreachable_pre_tool_use_registration_fails_closed() {
        let dispatcher = HookDispatcher::new();
        let mut hooks = HashMap::new();
        hooks.insert(
            HookEvent::PreToolUse,
            WebhookRegistration::new(HookEvent::PreToolUse, "http://127.0.0.1:0/hook").with_timeout_secs(1),
        );
        let decision = dispatcher
            .dispatch(&hooks, HookEvent::PreToolUse, SessionId::new(), "req-1", Some("Write"), None, None)
            .await
            .expect("fail-closed always yields a decision");
        assert_eq!(decision.decision, astrid_hooks::Decision::Deny);
    }
}
