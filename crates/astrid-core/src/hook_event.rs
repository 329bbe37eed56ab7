//! Hook event vocabulary.
//!
//! These are the lifecycle events a webhook registration can subscribe to.
//! `HookEvent` lives in `astrid-core` so that `astrid-hooks` and
//! `astrid-streaming` can both reference it without a circular dependency.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A lifecycle event that can trigger an outbound webhook call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HookEvent {
    /// Fired immediately before a tool invocation; the only event whose
    /// webhook failures fail closed (deny).
    PreToolUse,
    /// Fired after a tool invocation completes.
    PostToolUse,
    /// Fired when the user submits a new prompt into an active session.
    UserPromptSubmit,
    /// Fired when the agent run reaches a terminal state.
    Stop,
    /// Fired when a subagent run reaches a terminal state.
    SubagentStop,
    /// Fired before the agent compacts its context window.
    PreCompact,
    /// Fired for out-of-band informational events.
    Notification,
}

impl HookEvent {
    /// Whether webhook errors for this event fail closed (deny) rather
    /// than fail open (allow). Only `PreToolUse` is security-critical in
    /// this sense — see the webhook dispatch contract.
    #[must_use]
    pub const fn fails_closed(self) -> bool {
        matches!(self, Self::PreToolUse)
    }

    /// Wire name, matching the JSON/webhook-payload spelling.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::PreToolUse => "PreToolUse",
            Self::PostToolUse => "PostToolUse",
            Self::UserPromptSubmit => "UserPromptSubmit",
            Self::Stop => "Stop",
            Self::SubagentStop => "SubagentStop",
            Self::PreCompact => "PreCompact",
            Self::Notification => "Notification",
        }
    }
}

impl fmt::Display for HookEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl Serialize for HookEvent {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for HookEvent {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        match s.as_str() {
            "PreToolUse" => Ok(Self::PreToolUse),
            "PostToolUse" => Ok(Self::PostToolUse),
            "UserPromptSubmit" => Ok(Self::UserPromptSubmit),
            "Stop" => Ok(Self::Stop),
            "SubagentStop" => Ok(Self::SubagentStop),
            "PreCompact" => Ok(Self::PreCompact),
            "Notification" => Ok(Self::Notification),
            other => Err(serde::de::Error::custom(format!(
                "unknown hook event: {other}"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_pre_tool_use_fails_closed() {
        assert!(HookEvent::PreToolUse.fails_closed());
        assert!(!HookEvent::PostToolUse.fails_closed());
        assert!(!HookEvent::UserPromptSubmit.fails_closed());
        assert!(!HookEvent::Stop.fails_closed());
        assert!(!HookEvent::SubagentStop.fails_closed());
        assert!(!HookEvent::PreCompact.fails_closed());
        assert!(!HookEvent::Notification.fails_closed());
    }

    #[test]
    fn serde_uses_wire_name() {
        let json = serde_json::to_string(&HookEvent::UserPromptSubmit).unwrap();
        assert_eq!(json, "\"UserPromptSubmit\"");
        let back: HookEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(back, HookEvent::UserPromptSubmit);
    }

    #[test]
    fn unknown_event_name_rejected() {
        let err = serde_json::from_str::<HookEvent>("\"NotARealEvent\"");
        assert!(err.is_err());
    }
}
