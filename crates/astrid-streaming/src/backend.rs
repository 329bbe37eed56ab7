//! The seam between this facade and the out-of-scope agent runtime.
//!
//! `AgentBackend`/`AgentHandle` are exactly the trait boundary given in the
//! design notes: a cancellable iterator of tagged-union events behind an
//! `async_trait`. A `PreToolUse` event carries its own one-shot reply
//! channel so [`crate::agent_runner::AgentRunner`] can propagate a webhook
//! decision back into the runtime without widening the trait beyond the
//! three specified methods.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use tokio::sync::oneshot;
use uuid::Uuid;

use crate::stream_publisher::McpServerStatusEntry;

/// Everything needed to start one agent invocation, built by
/// [`crate::enrich::RequestEnricher`] from the inbound request plus
/// server-side tiers.
#[derive(Debug, Clone)]
pub struct AgentOptions {
    pub model: String,
    pub cwd: String,
    pub prompt: String,
    pub system_prompt: Option<String>,
    pub allowed_tools: Vec<String>,
    pub denied_tools: Vec<String>,
    pub env: HashMap<String, String>,
    pub mcp_servers: HashMap<String, astrid_mcp::ServerConfig>,
    pub permission_mode: PermissionMode,
    pub checkpointing_enabled: bool,
    pub output_schema: Option<Value>,
    /// Per-event webhook registrations carried from the request, keyed by
    /// the event they fire on.
    pub hooks: HashMap<astrid_core::HookEvent, astrid_hooks::WebhookRegistration>,
    /// Set when resuming or forking an existing session.
    pub resume_session_id: Option<Uuid>,
    pub parent_session_id: Option<Uuid>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermissionMode {
    Default,
    AcceptEdits,
    BypassPermissions,
    Plan,
}

/// Caller-visible content block discriminator (§3 `ContentBlock`).
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text { text: String },
    Thinking { thinking: String },
    ToolUse { id: String, name: String, input: Value },
    ToolResult { tool_use_id: String, content: Value, is_error: bool },
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    User,
    Assistant,
    System,
}

#[derive(Debug, Clone)]
pub struct MessageInfo {
    pub role: MessageRole,
    pub content: Vec<ContentBlock>,
    pub model: Option<String>,
    pub uuid: Option<String>,
    pub usage: Option<Value>,
    pub parent_tool_use_id: Option<String>,
}

#[derive(Debug, Clone)]
pub struct InitInfo {
    pub model: String,
    pub tools: Vec<String>,
    /// Per-server connection outcome, as observed by the runtime itself.
    /// Left empty by backends with nothing more specific to report; the
    /// runner then falls back to the resolved `AgentOptions::mcp_servers`
    /// set it already has, each defaulted to `"pending"`.
    pub mcp_servers: Vec<McpServerStatusEntry>,
    pub plugins: Vec<String>,
    pub commands: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct QuestionInfo {
    pub question_id: String,
    pub text: String,
    pub options: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct ResultInfo {
    pub is_error: bool,
    pub duration_ms: u64,
    pub num_turns: u32,
    pub total_cost_usd: Option<f64>,
    pub usage: Option<Value>,
    pub model_usage: Option<Value>,
    pub result: Option<String>,
    pub structured_output: Option<Value>,
    pub stop_reason: Option<String>,
}

/// The decision [`crate::agent_runner::AgentRunner`] feeds back through a
/// `PreToolUse` event's reply channel, after consulting `WebhookClient`.
#[derive(Debug, Clone)]
pub enum ToolDecision {
    Allow { modified_input: Option<Value> },
    Deny { reason: String },
}

/// One event from the agent runtime's own stream, tagged by kind.
pub enum UpstreamEvent {
    Init(InitInfo),
    Message(MessageInfo),
    Partial { delta: String },
    /// Yielded before the runtime executes a tool; the runner must send
    /// exactly one [`ToolDecision`] on `respond` before the runtime
    /// proceeds.
    PreToolUse {
        tool_name: String,
        input: Value,
        respond: oneshot::Sender<ToolDecision>,
    },
    Question(QuestionInfo),
    /// Emitted when the runtime records a file-state snapshot anchor.
    Checkpoint { user_message_uuid: String, files_modified: Vec<String> },
    Result(ResultInfo),
    Error { code: String, message: String },
}

impl std::fmt::Debug for UpstreamEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Init(i) => f.debug_tuple("Init").field(i).finish(),
            Self::Message(m) => f.debug_tuple("Message").field(m).finish(),
            Self::Partial { delta } => f.debug_struct("Partial").field("delta", delta).finish(),
            Self::PreToolUse { tool_name, input, .. } => f
                .debug_struct("PreToolUse")
                .field("tool_name", tool_name)
                .field("input", input)
                .finish(),
            Self::Question(q) => f.debug_tuple("Question").field(q).finish(),
            Self::Checkpoint { user_message_uuid, files_modified } => f
                .debug_struct("Checkpoint")
                .field("user_message_uuid", user_message_uuid)
                .field("files_modified", files_modified)
                .finish(),
            Self::Result(r) => f.debug_tuple("Result").field(r).finish(),
            Self::Error { code, message } => {
                f.debug_struct("Error").field("code", code).field("message", message).finish()
            }
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("agent runtime unavailable: {0}")]
    Unavailable(String),
    #[error("rewind target not recognised by the runtime")]
    UnknownCheckpoint,
}

#[async_trait]
pub trait AgentBackend: Send + Sync {
    async fn start(&self, options: AgentOptions) -> Result<Box<dyn AgentHandle>, BackendError>;
}

#[async_trait]
pub trait AgentHandle: Send {
    async fn next_event(&mut self) -> Option<UpstreamEvent>;
    async fn interrupt(&mut self);
    async fn rewind(&mut self, target_checkpoint: Uuid) -> Result<(), BackendError>;
}

/// Test/reference backend: replays a scripted sequence of events, ignoring
/// `AgentOptions` beyond recording it. Every `PreToolUse` reply is drained
/// and discarded without blocking the script.
pub struct NullAgentBackend {
    script: Vec<ScriptedEvent>,
}

/// A scripted event plus the tool decision (if any) the test expects to
/// receive back, for assertions.
pub enum ScriptedEvent {
    Event(UpstreamEventTemplate),
}

/// `UpstreamEvent` isn't `Clone` (it carries a one-shot sender), so the
/// script is expressed as a template and materialised lazily in
/// `next_event`.
pub enum UpstreamEventTemplate {
    Init(InitInfo),
    Message(MessageInfo),
    Partial(String),
    PreToolUse { tool_name: String, input: Value },
    Question(QuestionInfo),
    Checkpoint { user_message_uuid: String, files_modified: Vec<String> },
    Result(ResultInfo),
    Error { code: String, message: String },
}

impl NullAgentBackend {
    #[must_use]
    pub fn new(script: Vec<UpstreamEventTemplate>) -> Self {
        Self { script: script.into_iter().map(ScriptedEvent::Event).collect() }
    }
}

#[async_trait]
impl AgentBackend for NullAgentBackend {
    async fn start(&self, _options: AgentOptions) -> Result<Box<dyn AgentHandle>, BackendError> {
        let events = self
            .script
            .iter()
            .map(|ScriptedEvent::Event(e)| clone_template(e))
            .collect::<Vec<_>>();
        Ok(Box::new(NullAgentHandle { events: events.into_iter(), pending_replies: Vec::new() }))
    }
}

fn clone_template(t: &UpstreamEventTemplate) -> UpstreamEventTemplate {
    match t {
        UpstreamEventTemplate::Init(i) => UpstreamEventTemplate::Init(i.clone()),
        UpstreamEventTemplate::Message(m) => UpstreamEventTemplate::Message(m.clone()),
        UpstreamEventTemplate::Partial(s) => UpstreamEventTemplate::Partial(s.clone()),
        UpstreamEventTemplate::PreToolUse { tool_name, input } => {
            UpstreamEventTemplate::PreToolUse { tool_name: tool_name.clone(), input: input.clone() }
        }
        UpstreamEventTemplate::Question(q) => UpstreamEventTemplate::Question(q.clone()),
        UpstreamEventTemplate::Checkpoint { user_message_uuid, files_modified } => {
            UpstreamEventTemplate::Checkpoint {
                user_message_uuid: user_message_uuid.clone(),
                files_modified: files_modified.clone(),
            }
        }
        UpstreamEventTemplate::Result(r) => UpstreamEventTemplate::Result(r.clone()),
        UpstreamEventTemplate::Error { code, message } => {
            UpstreamEventTemplate::Error { code: code.clone(), message: message.clone() }
        }
    }
}

struct NullAgentHandle {
    events: std::vec::IntoIter<UpstreamEventTemplate>,
    pending_replies: Vec<oneshot::Receiver<ToolDecision>>,
}

#[async_trait]
impl AgentHandle for NullAgentHandle {
    async fn next_event(&mut self) -> Option<UpstreamEvent> {
        match self.events.next()? {
            UpstreamEventTemplate::Init(i) => Some(UpstreamEvent::Init(i)),
            UpstreamEventTemplate::Message(m) => Some(UpstreamEvent::Message(m)),
            UpstreamEventTemplate::Partial(delta) => Some(UpstreamEvent::Partial { delta }),
            UpstreamEventTemplate::PreToolUse { tool_name, input } => {
                let (tx, rx) = oneshot::channel();
                self.pending_replies.push(rx);
                Some(UpstreamEvent::PreToolUse { tool_name, input, respond: tx })
            }
            UpstreamEventTemplate::Question(q) => Some(UpstreamEvent::Question(q)),
            UpstreamEventTemplate::Checkpoint { user_message_uuid, files_modified } => {
                Some(UpstreamEvent::Checkpoint { user_message_uuid, files_modified })
            }
            UpstreamEventTemplate::Result(r) => Some(UpstreamEvent::Result(r)),
            UpstreamEventTemplate::Error { code, message } => Some(UpstreamEvent::Error { code, message }),
        }
    }

    async fn interrupt(&mut self) {
        self.events = Vec::new().into_iter();
    }

    async fn rewind(&mut self, _target_checkpoint: Uuid) -> Result<(), BackendError> {
        Ok(())
    }
}
