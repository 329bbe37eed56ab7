//! Durable domain types: sessions, messages, checkpoints, MCP server records.
//!
//! Mirrors the relational layout owned by [`crate::repository::SessionRepository`]
//! and the cache-side mirrors owned by [`crate::cache::Cache`].

use astrid_core::types::{SessionId, Timestamp};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Lifecycle status of a [`Session`]. Transitions only `Active -> Completed`
/// or `Active -> Error`, never the reverse; an interrupted stream still
/// lands on one of these two terminal values (interruption is a stream-level
/// `done` reason, not a persisted status).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Active,
    Completed,
    Error,
}

impl SessionStatus {
    #[must_use]
    pub const fn is_active(self) -> bool {
        matches!(self, Self::Active)
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Completed => "completed",
            Self::Error => "error",
        }
    }
}

impl std::str::FromStr for SessionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(Self::Active),
            "completed" => Ok(Self::Completed),
            "error" => Ok(Self::Error),
            other => Err(format!("unknown session status {other:?}")),
        }
    }
}

/// Durable record of one conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: SessionId,
    pub status: SessionStatus,
    pub model: String,
    pub cwd: String,
    pub total_turns: i64,
    pub total_cost_usd: f64,
    pub parent_session_id: Option<SessionId>,
    /// Hex-encoded SHA-256 of the creating API key. Immutable after creation.
    pub owner_api_key_hash: String,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
    pub metadata: Value,
}

impl Session {
    /// Build a freshly-created session. `created_at`/`updated_at` are set to
    /// the same instant; callers pass a server-side timestamp, never a
    /// client-supplied one.
    #[must_use]
    pub fn new(
        id: SessionId,
        model: impl Into<String>,
        cwd: impl Into<String>,
        parent_session_id: Option<SessionId>,
        owner_api_key_hash: String,
        now: Timestamp,
        metadata: Value,
    ) -> Self {
        Self {
            id,
            status: SessionStatus::Active,
            model: model.into(),
            cwd: cwd.into(),
            total_turns: 0,
            total_cost_usd: 0.0,
            parent_session_id,
            owner_api_key_hash,
            created_at: now,
            updated_at: now,
            metadata,
        }
    }

    /// Constant-time comparison of `presented_hash` against the stored
    /// owner hash. Both sides are hex strings of equal expected length;
    /// mismatched lengths compare unequal without leaking which differed.
    #[must_use]
    pub fn owned_by(&self, presented_hash: &str) -> bool {
        use subtle::ConstantTimeEq;
        self.owner_api_key_hash.as_bytes().ct_eq(presented_hash.as_bytes()).into()
    }
}

/// Append-only audit record of one message/event in a session's transcript.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionMessage {
    pub id: Uuid,
    pub session_id: SessionId,
    pub kind: String,
    pub content: Value,
    pub created_at: Timestamp,
}

/// File-state snapshot anchor emitted by the agent, used for rewind.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    pub id: Uuid,
    pub session_id: SessionId,
    pub user_message_uuid: String,
    pub files_modified: Vec<String>,
    pub created_at: Timestamp,
}

/// A page of sessions plus the total count matching the owner filter.
#[derive(Debug, Clone)]
pub struct SessionPage {
    pub sessions: Vec<Session>,
    pub total: i64,
}

/// Declared MCP tool provider, scoped to a single tenant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpServerRecord {
    pub name: String,
    pub transport: McpTransport,
    pub command: Option<String>,
    pub args: Vec<String>,
    pub url: Option<String>,
    pub headers: std::collections::HashMap<String, String>,
    pub env: std::collections::HashMap<String, String>,
    pub enabled: bool,
    pub status: McpServerStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum McpTransport {
    Stdio,
    Sse,
    Http,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum McpServerStatus {
    Connected,
    Failed,
    Pending,
}

impl McpServerRecord {
    /// Project this stored tenant record down to the shape
    /// `McpConfigResolver` merges against. Connection `status` has no
    /// counterpart in `ServerConfig` — it's runtime state, not config.
    #[must_use]
    pub fn to_server_config(&self) -> astrid_mcp::ServerConfig {
        astrid_mcp::ServerConfig {
            name: self.name.clone(),
            transport: match self.transport {
                McpTransport::Stdio => astrid_mcp::Transport::Stdio,
                McpTransport::Sse => astrid_mcp::Transport::Sse,
                McpTransport::Http => astrid_mcp::Transport::Http,
            },
            command: self.command.clone(),
            args: self.args.clone(),
            url: self.url.clone(),
            headers: self.headers.clone(),
            binary_hash: None,
            env: self.env.clone(),
            cwd: None,
            auto_start: false,
            description: None,
            trusted: false,
            restart_policy: astrid_mcp::RestartPolicy::Never,
            enabled: self.enabled,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn owned_by_matches_equal_hash() {
        let session = Session::new(
            SessionId::new(),
            "claude-3",
            "/work",
            None,
            "a".repeat(64),
            Timestamp::MIN_UTC,
            Value::Null,
        );
        assert!(session.owned_by(&"a".repeat(64)));
        assert!(!session.owned_by(&"b".repeat(64)));
    }

    #[test]
    fn status_round_trips_through_str() {
        for status in [SessionStatus::Active, SessionStatus::Completed, SessionStatus::Error] {
            let parsed: SessionStatus = status.as_str().parse().unwrap();
            assert_eq!(parsed, status);
        }
    }

    #[test]
    fn rejects_unknown_status_string() {
        assert!("interrupted".parse::<SessionStatus>().is_err());
    }
}
