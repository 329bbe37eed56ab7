//! The webhook response contract: `{decision, reason?, modified_input?}`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A webhook's decision on whether a gated action may proceed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookDecision {
    /// `allow`, `deny`, or `ask`.
    pub decision: Decision,
    /// Human-readable reason, surfaced to the client on `deny`/`ask`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Replacement tool input, applied when `decision` is `allow` and the
    /// webhook wants to rewrite the call before it executes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modified_input: Option<Value>,
}

/// The three decisions a webhook may return.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Decision {
    /// Proceed (optionally with `modified_input`).
    Allow,
    /// Block the action.
    Deny,
    /// Surface a question to the client instead of proceeding.
    Ask,
}

impl WebhookDecision {
    /// `{decision: "allow"}` with no reason or input rewrite.
    #[must_use]
    pub const fn allow() -> Self {
        Self {
            decision: Decision::Allow,
            reason: None,
            modified_input: None,
        }
    }

    /// `{decision: "deny", reason}` — used for fail-closed synthetic
    /// decisions when a `PreToolUse` webhook call errors.
    #[must_use]
    pub fn deny(reason: impl Into<String>) -> Self {
        Self {
            decision: Decision::Deny,
            reason: Some(reason.into()),
            modified_input: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_format_matches_contract() {
        let d = WebhookDecision::deny("webhook unreachable");
        let json = serde_json::to_value(&d).unwrap();
        assert_eq!(json["decision"], "deny");
        assert_eq!(json["reason"], "webhook unreachable");
        assert!(json.get("modified_input").is_none());
    }

    #[test]
    fn parses_minimal_allow_response() {
        let d: WebhookDecision = serde_json::from_str(r#"{"decision":"allow"}"#).unwrap();
        assert_eq!(d.decision, Decision::Allow);
        assert!(d.reason.is_none());
    }

    #[test]
    fn parses_ask_with_reason() {
        let d: WebhookDecision =
            serde_json::from_str(r#"{"decision":"ask","reason":"needs confirmation"}"#).unwrap();
        assert_eq!(d.decision, Decision::Ask);
    }
}
