//! Per-request orchestrator: owns the full lifetime of one agent
//! invocation, from session resolution through the terminal `done` event.
//!
//! State machine: `Starting -> Streaming -> {Completed | Errored |
//! Interrupted | ClientGone}`. `Starting`/`Streaming` are implicit in the
//! control flow below rather than an explicit enum field — there is no
//! externally observable state to query mid-run, so there is nothing a
//! separate state value would buy over following the function.

use std::sync::Arc;

use astrid_core::HookEvent;
use astrid_core::types::SessionId;
use astrid_hooks::Decision;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::backend::{
    AgentBackend, AgentOptions, BackendError, MessageInfo, QuestionInfo, ResultInfo, ToolDecision, UpstreamEvent,
};
use crate::checkpoint_service::CheckpointService;
use crate::domain::SessionStatus;
use crate::error::ApiError;
use crate::interrupt_bus::InterruptBus;
use crate::session_service::SessionService;
use crate::stream_publisher::{
    DonePayload, DownstreamEvent, ErrorPayload, InitPayload, McpServerStatusEntry, MessagePayload, QuestionPayload,
    ResultPayload,
};
use crate::webhook::HookDispatcher;

/// Depth of the `AgentRunner` -> `StreamPublisher` queue. Producers block on
/// full rather than drop, trading a slow-client's own latency for the
/// ordering/completeness guarantee in §8 (a dropped `result` is unrecoverable;
/// a delayed one isn't). See DESIGN.md's Open Question 1 note.
pub const QUEUE_DEPTH: usize = 100;

/// How the run ended, decided by whichever exit path was taken. Drives both
/// the persisted `SessionStatus` and the stream's `done.reason`.
enum RunOutcome {
    Completed { result: Option<ResultInfo> },
    Interrupted { result: Option<ResultInfo> },
    ClientGone,
    Errored { error: ApiError, result: Option<ResultInfo> },
}

pub struct AgentRunner {
    session_service: Arc<SessionService>,
    checkpoint_service: Arc<CheckpointService>,
    interrupt_bus: Arc<InterruptBus>,
    hooks: Arc<HookDispatcher>,
    backend: Arc<dyn AgentBackend>,
}

impl AgentRunner {
    #[must_use]
    pub fn new(
        session_service: Arc<SessionService>,
        checkpoint_service: Arc<CheckpointService>,
        interrupt_bus: Arc<InterruptBus>,
        hooks: Arc<HookDispatcher>,
        backend: Arc<dyn AgentBackend>,
    ) -> Self {
        Self { session_service, checkpoint_service, interrupt_bus, hooks, backend }
    }

    /// Drive one invocation to completion, writing canonical downstream
    /// events onto `tx`. Returns once a terminal state is reached; never
    /// propagates an error to the caller — every failure mode ends in an
    /// `error` + `done` event pair on the channel instead, per §4.6 step 6
    /// ("never surfaces an HTTP status change mid-stream").
    ///
    /// `cancel` is observed cooperatively: the `StreamPublisher` triggers it
    /// on client disconnect, and this method checks it at every loop
    /// iteration and select point.
    pub async fn run(
        &self,
        session_id: SessionId,
        owner_hash: String,
        options: AgentOptions,
        tx: mpsc::Sender<DownstreamEvent>,
        cancel: CancellationToken,
    ) {
        let correlation_id = Uuid::new_v4().to_string();

        if let Err(err) = self.session_service.mark_active(session_id).await {
            let _ = tx.send(DownstreamEvent::Error(error_payload(&err))).await;
            let _ = tx.send(DownstreamEvent::Done(DonePayload { reason: "error" })).await;
            return;
        }

        let outcome = self.stream(session_id, &owner_hash, options, &correlation_id, &tx, &cancel).await;

        let (status, result) = match &outcome {
            RunOutcome::Completed { result } => (SessionStatus::Completed, result),
            RunOutcome::Interrupted { result } => (SessionStatus::Completed, result),
            RunOutcome::ClientGone => (SessionStatus::Completed, &None),
            RunOutcome::Errored { result, .. } => (SessionStatus::Error, result),
        };
        let turns_delta = result.as_ref().map(|r| i64::from(r.num_turns)).unwrap_or(0);
        let cost_delta = result.as_ref().and_then(|r| r.total_cost_usd).unwrap_or(0.0);

        if let Err(err) = self
            .session_service
            .with_session_lock(session_id, move |mut s| {
                s.status = status;
                s.total_turns += turns_delta;
                s.total_cost_usd += cost_delta;
                s
            })
            .await
        {
            tracing::warn!(error = %err, session_id = %session_id, "failed to persist terminal session status");
        }

        self.session_service.clear_active(session_id).await;
        self.interrupt_bus.clear(session_id).await;

        if let RunOutcome::Errored { error, .. } = &outcome {
            let _ = tx.send(DownstreamEvent::Error(error_payload(error))).await;
        }
        let reason = match outcome {
            RunOutcome::Completed { .. } => "completed",
            RunOutcome::Interrupted { .. } => "interrupted",
            RunOutcome::ClientGone => "client_gone",
            RunOutcome::Errored { .. } => "error",
        };
        let _ = tx.send(DownstreamEvent::Done(DonePayload { reason })).await;
    }

    async fn stream(
        &self,
        session_id: SessionId,
        owner_hash: &str,
        options: AgentOptions,
        correlation_id: &str,
        tx: &mpsc::Sender<DownstreamEvent>,
        cancel: &CancellationToken,
    ) -> RunOutcome {
        let checkpointing_enabled = options.checkpointing_enabled;
        let hooks = options.hooks.clone();
        let resolved_mcp_servers: Vec<String> = options.mcp_servers.keys().cloned().collect();

        let mut handle = match self.backend.start(options).await {
            Ok(handle) => handle,
            Err(err) => return RunOutcome::Errored { error: map_backend_error(err), result: None },
        };

        let mut tick = tokio::time::interval(InterruptBus::TICK);
        tick.tick().await; // first tick fires immediately; consumed so the loop's tick is periodic

        let mut last_result: Option<ResultInfo> = None;

        loop {
            if cancel.is_cancelled() {
                handle.interrupt().await;
                return RunOutcome::ClientGone;
            }
            if self.interrupt_bus.observe(session_id).await {
                handle.interrupt().await;
                return RunOutcome::Interrupted { result: last_result };
            }

            let event = tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    handle.interrupt().await;
                    return RunOutcome::ClientGone;
                }
                event = handle.next_event() => event,
                _ = tick.tick() => continue,
            };

            let Some(event) = event else {
                return RunOutcome::Completed { result: last_result };
            };

            match event {
                UpstreamEvent::Init(info) => {
                    let mcp_servers = if info.mcp_servers.is_empty() {
                        resolved_mcp_servers
                            .iter()
                            .map(|name| McpServerStatusEntry { name: name.clone(), status: "pending".to_string(), error: None })
                            .collect()
                    } else {
                        info.mcp_servers
                    };
                    let payload = InitPayload {
                        session_id,
                        model: info.model,
                        tools: info.tools,
                        mcp_servers,
                        plugins: info.plugins,
                        commands: info.commands,
                    };
                    if send(tx, DownstreamEvent::Init(payload)).await.is_err() {
                        handle.interrupt().await;
                        return RunOutcome::ClientGone;
                    }
                }
                UpstreamEvent::Message(info) => {
                    if let Err(err) = self.persist_message(session_id, &info).await {
                        tracing::warn!(error = %err, session_id = %session_id, "failed to persist message");
                    }
                    let payload = message_payload(info);
                    if send(tx, DownstreamEvent::Message(payload)).await.is_err() {
                        handle.interrupt().await;
                        return RunOutcome::ClientGone;
                    }
                }
                UpstreamEvent::Partial { delta } => {
                    if send(tx, DownstreamEvent::Partial { delta }).await.is_err() {
                        handle.interrupt().await;
                        return RunOutcome::ClientGone;
                    }
                }
                UpstreamEvent::PreToolUse { tool_name, input, respond } => {
                    let decision = self
                        .hooks
                        .dispatch(
                            &hooks,
                            HookEvent::PreToolUse,
                            session_id,
                            correlation_id,
                            Some(&tool_name),
                            Some(input.clone()),
                            None,
                        )
                        .await;

                    match decision {
                        None => {
                            let _ = respond.send(ToolDecision::Allow { modified_input: None });
                        }
                        Some(webhook_decision) => match webhook_decision.decision {
                            Decision::Allow => {
                                let _ = respond.send(ToolDecision::Allow {
                                    modified_input: webhook_decision.modified_input,
                                });
                            }
                            Decision::Deny => {
                                let reason =
                                    webhook_decision.reason.unwrap_or_else(|| "denied by webhook".to_string());
                                let _ = respond.send(ToolDecision::Deny { reason: reason.clone() });
                            }
                            Decision::Ask => {
                                // `ToolDecision` has no wait-for-answer variant; a
                                // permission question surfaced mid-tool-call is
                                // conservatively treated as a denial, with a
                                // `question` event carrying the reason so the
                                // client can re-issue the call once confirmed.
                                let reason = webhook_decision
                                    .reason
                                    .clone()
                                    .unwrap_or_else(|| "confirmation required".to_string());
                                let question = QuestionPayload {
                                    question_id: Uuid::new_v4().to_string(),
                                    text: format!("confirm tool call: {tool_name} ({reason})"),
                                    options: vec!["allow".to_string(), "deny".to_string()],
                                };
                                if send(tx, DownstreamEvent::Question(question)).await.is_err() {
                                    let _ = respond.send(ToolDecision::Deny { reason: reason.clone() });
                                    handle.interrupt().await;
                                    return RunOutcome::ClientGone;
                                }
                                let _ = respond.send(ToolDecision::Deny { reason });
                            }
                        },
                    }
                }
                UpstreamEvent::Question(info) => {
                    let payload = QuestionPayload { question_id: info.question_id, text: info.text, options: info.options };
                    if send(tx, DownstreamEvent::Question(payload)).await.is_err() {
                        handle.interrupt().await;
                        return RunOutcome::ClientGone;
                    }
                }
                UpstreamEvent::Checkpoint { user_message_uuid, files_modified } => {
                    if checkpointing_enabled {
                        if let Err(err) = self.checkpoint_service.record(session_id, &user_message_uuid, &files_modified).await {
                            tracing::warn!(error = %err, session_id = %session_id, "failed to record checkpoint");
                        }
                    }
                }
                UpstreamEvent::Result(info) => {
                    if let Err(err) = self.persist_result(session_id, &info).await {
                        tracing::warn!(error = %err, session_id = %session_id, "failed to persist result message");
                    }
                    let is_error = info.is_error;
                    last_result = Some(info.clone());
                    let payload = result_payload(session_id, info);
                    if send(tx, DownstreamEvent::Result(payload)).await.is_err() {
                        handle.interrupt().await;
                        return RunOutcome::ClientGone;
                    }
                    if is_error {
                        return RunOutcome::Errored {
                            error: ApiError::UpstreamUnavailable("agent reported a terminal error result".to_string()),
                            result: last_result,
                        };
                    }
                }
                UpstreamEvent::Error { code, message } => {
                    tracing::warn!(session_id = %session_id, code = %code, message = %message, "upstream agent error event");
                    return RunOutcome::Errored {
                        error: ApiError::UpstreamUnavailable(message),
                        result: last_result,
                    };
                }
            }
        }
    }

    async fn persist_message(&self, session_id: SessionId, info: &MessageInfo) -> Result<(), ApiError> {
        let kind = match info.role {
            crate::backend::MessageRole::User => "user",
            crate::backend::MessageRole::Assistant => "assistant",
            crate::backend::MessageRole::System => "system",
        };
        let content = serde_json::to_value(&info.content).unwrap_or(Value::Null);
        self.session_service.record_message(session_id, kind, content).await?;
        Ok(())
    }

    async fn persist_result(&self, session_id: SessionId, info: &ResultInfo) -> Result<(), ApiError> {
        let content = serde_json::json!({
            "is_error": info.is_error,
            "duration_ms": info.duration_ms,
            "num_turns": info.num_turns,
            "total_cost_usd": info.total_cost_usd,
            "result": info.result,
            "stop_reason": info.stop_reason,
        });
        self.session_service.record_message(session_id, "result", content).await?;
        Ok(())
    }
}

async fn send(tx: &mpsc::Sender<DownstreamEvent>, event: DownstreamEvent) -> Result<(), ()> {
    tx.send(event).await.map_err(|_| ())
}

fn message_payload(info: MessageInfo) -> MessagePayload {
    let kind = match info.role {
        crate::backend::MessageRole::User => "user",
        crate::backend::MessageRole::Assistant => "assistant",
        crate::backend::MessageRole::System => "system",
    };
    MessagePayload {
        kind: kind.to_string(),
        content: info.content,
        model: info.model,
        uuid: info.uuid,
        usage: info.usage,
        parent_tool_use_id: info.parent_tool_use_id,
    }
}

fn result_payload(session_id: SessionId, info: ResultInfo) -> ResultPayload {
    ResultPayload {
        session_id,
        is_error: info.is_error,
        duration_ms: info.duration_ms,
        num_turns: info.num_turns,
        total_cost_usd: info.total_cost_usd,
        usage: info.usage,
        model_usage: info.model_usage,
        result: info.result,
        structured_output: info.structured_output,
        stop_reason: info.stop_reason,
    }
}

fn map_backend_error(err: BackendError) -> ApiError {
    match err {
        BackendError::Unavailable(msg) => ApiError::UpstreamUnavailable(msg),
        BackendError::UnknownCheckpoint => ApiError::Validation("unknown checkpoint".to_string()),
    }
}

fn error_payload(err: &ApiError) -> ErrorPayload {
    ErrorPayload { code: err.code(), message: err.public_message(), details: None }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{InitInfo, NullAgentBackend, UpstreamEventTemplate};
    use crate::cache::InMemoryCache;
    use crate::domain::{Session, SessionMessage, SessionPage};
    use crate::repository::{RepoResult, SessionRepository};
    use async_trait::async_trait;
    use std::collections::HashMap;
    use tokio::sync::Mutex;

    #[derive(Default)]
    struct FakeRepo {
        sessions: Mutex<HashMap<SessionId, Session>>,
        messages: Mutex<Vec<SessionMessage>>,
    }

    #[async_trait]
    impl SessionRepository for FakeRepo {
        async fn create(&self, session: &Session) -> RepoResult<()> {
            self.sessions.lock().await.insert(session.id, session.clone());
            Ok(())
        }
        async fn get(&self, id: SessionId) -> RepoResult<Option<Session>> {
            Ok(self.sessions.lock().await.get(&id).cloned())
        }
        async fn update_status(
            &self,
            _id: SessionId,
            _new_status: SessionStatus,
            _updated_at: astrid_core::types::Timestamp,
        ) -> RepoResult<Option<Session>> {
            Ok(None)
        }
        async fn save(&self, session: &Session) -> RepoResult<()> {
            self.sessions.lock().await.insert(session.id, session.clone());
            Ok(())
        }
        async fn list_by_owner(&self, _owner_hash: &str, _offset: i64, _limit: i64) -> RepoResult<SessionPage> {
            Ok(SessionPage { sessions: Vec::new(), total: 0 })
        }
        async fn add_message(&self, session_id: SessionId, kind: &str, content: Value) -> RepoResult<SessionMessage> {
            let message = SessionMessage {
                id: Uuid::new_v4(),
                session_id,
                kind: kind.to_string(),
                content,
                created_at: astrid_core::types::Timestamp::from(std::time::SystemTime::now()),
            };
            self.messages.lock().await.push(message.clone());
            Ok(message)
        }
        async fn add_checkpoint(
            &self,
            session_id: SessionId,
            user_message_uuid: &str,
            files_modified: &[String],
        ) -> RepoResult<crate::domain::Checkpoint> {
            Ok(crate::domain::Checkpoint {
                id: Uuid::new_v4(),
                session_id,
                user_message_uuid: user_message_uuid.to_string(),
                files_modified: files_modified.to_vec(),
                created_at: astrid_core::types::Timestamp::from(std::time::SystemTime::now()),
            })
        }
        async fn list_checkpoints(&self, _session_id: SessionId) -> RepoResult<Vec<crate::domain::Checkpoint>> {
            Ok(Vec::new())
        }
        async fn get_checkpoint(&self, _id: Uuid) -> RepoResult<Option<crate::domain::Checkpoint>> {
            Ok(None)
        }
    }

    fn options(hooks: HashMap<HookEvent, astrid_hooks::WebhookRegistration>) -> AgentOptions {
        AgentOptions {
            model: "claude-3".into(),
            cwd: "/work".into(),
            prompt: "hi".into(),
            system_prompt: None,
            allowed_tools: Vec::new(),
            denied_tools: Vec::new(),
            env: HashMap::new(),
            mcp_servers: HashMap::new(),
            permission_mode: crate::backend::PermissionMode::Default,
            checkpointing_enabled: false,
            output_schema: None,
            hooks,
            resume_session_id: None,
            parent_session_id: None,
        }
    }

    fn runner(backend: Arc<dyn AgentBackend>, repo: Arc<FakeRepo>) -> (AgentRunner, Arc<SessionService>) {
        let cache = Arc::new(InMemoryCache::new());
        let session_service = Arc::new(SessionService::new(repo, cache.clone()));
        let checkpoint_service = Arc::new(CheckpointService::new(Arc::new(NeverUsedRepo)));
        let interrupt_bus = Arc::new(InterruptBus::new(cache));
        let hooks = Arc::new(HookDispatcher::new());
        (
            AgentRunner::new(session_service.clone(), checkpoint_service, interrupt_bus, hooks, backend),
            session_service,
        )
    }

    struct NeverUsedRepo;
    #[async_trait]
    impl SessionRepository for NeverUsedRepo {
        async fn create(&self, _session: &Session) -> RepoResult<()> {
            unreachable!()
        }
        async fn get(&self, _id: SessionId) -> RepoResult<Option<Session>> {
            unreachable!()
        }
        async fn update_status(
            &self,
            _id: SessionId,
            _new_status: SessionStatus,
            _updated_at: astrid_core::types::Timestamp,
        ) -> RepoResult<Option<Session>> {
            unreachable!()
        }
        async fn save(&self, _session: &Session) -> RepoResult<()> {
            unreachable!()
        }
        async fn list_by_owner(&self, _owner_hash: &str, _offset: i64, _limit: i64) -> RepoResult<SessionPage> {
            unreachable!()
        }
        async fn add_message(&self, _session_id: SessionId, _kind: &str, _content: Value) -> RepoResult<SessionMessage> {
            unreachable!()
        }
        async fn add_checkpoint(
            &self,
            _session_id: SessionId,
            _user_message_uuid: &str,
            _files_modified: &[String],
        ) -> RepoResult<crate::domain::Checkpoint> {
            unreachable!()
        }
        async fn list_checkpoints(&self, _session_id: SessionId) -> RepoResult<Vec<crate::domain::Checkpoint>> {
            unreachable!()
        }
        async fn get_checkpoint(&self, _id: Uuid) -> RepoResult<Option<crate::domain::Checkpoint>> {
            unreachable!()
        }
    }

    #[tokio::test]
    async fn happy_path_ends_in_completed_with_persisted_status() {
        let repo = Arc::new(FakeRepo::default());
        let backend = Arc::new(NullAgentBackend::new(vec![
            UpstreamEventTemplate::Init(InitInfo {
                model: "claude-3".into(),
                tools: vec!["Read".into()],
                mcp_servers: Vec::new(),
                plugins: Vec::new(),
                commands: Vec::new(),
            }),
            UpstreamEventTemplate::Result(crate::backend::ResultInfo {
                is_error: false,
                duration_ms: 5,
                num_turns: 2,
                total_cost_usd: Some(0.02),
                usage: None,
                model_usage: None,
                result: Some("done".into()),
                structured_output: None,
                stop_reason: Some("completed".into()),
            }),
        ]));
        let (runner, session_service) = runner(backend, repo);

        let session = session_service.create("claude-3", "/work", None, "owner".repeat(16), Value::Null).await.unwrap();
        let (tx, mut rx) = mpsc::channel(QUEUE_DEPTH);
        runner.run(session.id, "owner".repeat(16), options(HashMap::new()), tx, CancellationToken::new()).await;

        let mut names = Vec::new();
        while let Some(event) = rx.recv().await {
            names.push(event.name().to_string());
        }
        assert_eq!(names, vec!["init", "result", "done"]);

        let updated = session_service.get(session.id, &"owner".repeat(16)).await.unwrap();
        assert_eq!(updated.status, SessionStatus::Completed);
        assert_eq!(updated.total_turns, 2);
    }

    #[tokio::test]
    async fn init_event_reports_every_resolved_mcp_server() {
        let repo = Arc::new(FakeRepo::default());
        let backend = Arc::new(NullAgentBackend::new(vec![UpstreamEventTemplate::Init(InitInfo {
            model: "claude-3".into(),
            tools: Vec::new(),
            mcp_servers: Vec::new(),
            plugins: Vec::new(),
            commands: Vec::new(),
        })]));
        let (runner, session_service) = runner(backend, repo);
        let session = session_service.create("claude-3", "/work", None, "owner".repeat(16), Value::Null).await.unwrap();

        let mut servers = HashMap::new();
        servers.insert("fs".to_string(), astrid_mcp::ServerConfig::stdio("fs", "npx"));
        let mut run_options = options(HashMap::new());
        run_options.mcp_servers = servers;

        let (tx, mut rx) = mpsc::channel(QUEUE_DEPTH);
        runner.run(session.id, "owner".repeat(16), run_options, tx, CancellationToken::new()).await;

        let init = rx.recv().await.unwrap();
        assert_eq!(init.name(), "init");
        assert_eq!(init.data()["mcp_servers"][0]["name"], "fs");
        assert_eq!(init.data()["mcp_servers"][0]["status"], "pending");
    }

    #[tokio::test]
    async fn pending_interrupt_marker_short_circuits_the_run() {
        let repo = Arc::new(FakeRepo::default());
        let backend = Arc::new(NullAgentBackend::new(vec![
            UpstreamEventTemplate::Partial("a".into()),
            UpstreamEventTemplate::Partial("b".into()),
        ]));
        let (runner, session_service) = runner(backend, repo);
        let session = session_service.create("claude-3", "/work", None, "owner".repeat(16), Value::Null).await.unwrap();

        runner.interrupt_bus.signal(session.id).await.unwrap();

        let (tx, mut rx) = mpsc::channel(QUEUE_DEPTH);
        runner.run(session.id, "owner".repeat(16), options(HashMap::new()), tx, CancellationToken::new()).await;

        let event = rx.recv().await.unwrap();
        assert_eq!(event.name(), "done");
        assert_eq!(event.data()["reason"], "interrupted");
    }

    #[tokio::test]
    async fn cancellation_token_stops_the_run_as_client_gone() {
        let repo = Arc::new(FakeRepo::default());
        let backend = Arc::new(NullAgentBackend::new(vec![UpstreamEventTemplate::Partial("a".into())]));
        let (runner, session_service) = runner(backend, repo);
        let session = session_service.create("claude-3", "/work", None, "owner".repeat(16), Value::Null).await.unwrap();

        let cancel = CancellationToken::new();
        cancel.cancel();

        let (tx, mut rx) = mpsc::channel(QUEUE_DEPTH);
        runner.run(session.id, "owner".repeat(16), options(HashMap::new()), tx, cancel).await;

        let event = rx.recv().await.unwrap();
        assert_eq!(event.name(), "done");
        assert_eq!(event.data()["reason"], "client_gone");
    }
}
