//! Session inspection and control: list, fetch, interrupt, answer,
//! checkpoints, rewind.

use axum::extract::{Path, Query};
use axum::{Extension, Json};
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::auth::TenantHash;
use crate::domain::{Checkpoint, Session};
use crate::enrich::InboundRequest;
use crate::error::{ApiError, ApiResult};
use crate::AppState;

/// Query parameters for `GET /api/v1/sessions`.
#[derive(Debug, Deserialize)]
pub struct ListParams {
    #[serde(default)]
    offset: i64,
    #[serde(default = "default_limit")]
    limit: i64,
}

const fn default_limit() -> i64 {
    20
}

/// GET `/api/v1/sessions`
pub async fn list(
    Extension(app): Extension<AppState>,
    Extension(tenant): Extension<TenantHash>,
    Query(params): Query<ListParams>,
) -> ApiResult<Json<Value>> {
    let page = app.session_service.list(&tenant.0, params.offset, params.limit).await?;
    Ok(Json(json!({ "sessions": page.sessions, "total": page.total })))
}

/// GET `/api/v1/sessions/{id}`
pub async fn get_one(
    Extension(app): Extension<AppState>,
    Extension(tenant): Extension<TenantHash>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Session>> {
    Ok(Json(app.session_service.get(id.into(), &tenant.0).await?))
}

/// POST `/api/v1/sessions/{id}/interrupt`: signals and returns immediately,
/// per §6 — the actual stop happens asynchronously at the running
/// instance's next tool boundary or tick.
pub async fn interrupt(
    Extension(app): Extension<AppState>,
    Extension(tenant): Extension<TenantHash>,
    Path(id): Path<Uuid>,
) -> ApiResult<axum::http::StatusCode> {
    let session = app.session_service.get(id.into(), &tenant.0).await?;
    app.interrupt_bus.signal(session.id).await?;
    Ok(axum::http::StatusCode::ACCEPTED)
}

/// Body of `POST /api/v1/sessions/{id}/answer`.
#[derive(Debug, Deserialize)]
pub struct AnswerRequest {
    /// Echoed back by callers for their own correlation; unused here since
    /// there's no pending question to match it against.
    #[allow(dead_code)]
    pub question_id: String,
    /// Fed back in as the next prompt against the same session.
    pub answer: String,
}

/// POST `/api/v1/sessions/{id}/answer`. `UpstreamEvent::Question` carries no
/// reply channel of its own (unlike `PreToolUse`), so there is no live pipe
/// back into an in-flight run to feed an answer through. This is handled the
/// same way a human clarification is handled in practice: the answer text
/// becomes the next turn's prompt against the same session, functionally
/// identical to `/resume`.
pub async fn answer(
    Extension(app): Extension<AppState>,
    Extension(tenant): Extension<TenantHash>,
    Path(id): Path<Uuid>,
    Json(body): Json<AnswerRequest>,
) -> ApiResult<axum::response::Response> {
    let session = app.session_service.get(id.into(), &tenant.0).await?;
    let request = InboundRequest {
        prompt: body.answer,
        model: None,
        cwd: None,
        system_prompt: None,
        allowed_tools: Vec::new(),
        denied_tools: Vec::new(),
        env: std::collections::HashMap::new(),
        mcp_servers: None,
        permission_mode: None,
        checkpointing_enabled: false,
        output_schema: None,
        hooks: std::collections::HashMap::new(),
    };
    let tenant_mcp = app.mcp_registry.resolved_tier(&tenant.0).await?;
    let options = app.enricher.enrich(request, &tenant_mcp, Some(id), None)?;

    let (tx, rx) = tokio::sync::mpsc::channel(crate::agent_runner::QUEUE_DEPTH);
    let cancel = tokio_util::sync::CancellationToken::new();
    let runner = app.runner.clone();
    let owner_hash = tenant.0.clone();
    tokio::spawn(async move {
        runner.run(session.id, owner_hash, options, tx, cancel).await;
    });

    Ok(axum::response::IntoResponse::into_response(crate::stream_publisher::sse_response(rx, app.heartbeat)))
}

/// GET `/api/v1/sessions/{id}/checkpoints`
pub async fn list_checkpoints(
    Extension(app): Extension<AppState>,
    Extension(tenant): Extension<TenantHash>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Vec<Checkpoint>>> {
    let session = app.session_service.get(id.into(), &tenant.0).await?;
    Ok(Json(app.checkpoint_service.list(session.id).await?))
}

/// Body of `POST /api/v1/sessions/{id}/rewind`.
#[derive(Debug, Deserialize)]
pub struct RewindRequest {
    /// The checkpoint to rewind to; must belong to the same session.
    pub target_checkpoint: Uuid,
}

/// POST `/api/v1/sessions/{id}/rewind`. There's no live `AgentHandle` lying
/// around between requests (`AgentRunner` owns one only for the lifetime of
/// a single `run`), so this opens a short-lived one against the agent
/// runtime purely to issue the rewind RPC and closes it again — no events
/// from it are streamed back, since a rewind isn't itself a conversation
/// turn.
pub async fn rewind(
    Extension(app): Extension<AppState>,
    Extension(tenant): Extension<TenantHash>,
    Path(id): Path<Uuid>,
    Json(body): Json<RewindRequest>,
) -> ApiResult<Json<Checkpoint>> {
    let session = app.session_service.get(id.into(), &tenant.0).await?;

    let options = crate::backend::AgentOptions {
        model: session.model.clone(),
        cwd: session.cwd.clone(),
        prompt: String::new(),
        system_prompt: None,
        allowed_tools: Vec::new(),
        denied_tools: Vec::new(),
        env: std::collections::HashMap::new(),
        mcp_servers: std::collections::HashMap::new(),
        permission_mode: crate::backend::PermissionMode::Default,
        checkpointing_enabled: false,
        output_schema: None,
        hooks: std::collections::HashMap::new(),
        resume_session_id: Some(session.id.as_uuid()),
        parent_session_id: None,
    };

    let mut handle = app
        .agent_backend
        .start(options)
        .await
        .map_err(|err| ApiError::UpstreamUnavailable(err.to_string()))?;

    let rewound = app.checkpoint_service.apply_rewind(session.id, body.target_checkpoint, handle.as_mut()).await?;
    Ok(Json(rewound))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::NullAgentBackend;
    use crate::cache::InMemoryCache;
    use crate::domain::{SessionMessage, SessionPage, SessionStatus};
    use crate::repository::{RepoResult, SessionRepository};
    use astrid_core::types::{SessionId, Timestamp};
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::time::Duration;
    use tokio::sync::Mutex;

    #[derive(Default)]
    struct FakeRepo {
        sessions: Mutex<HashMap<SessionId, Session>>,
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
        async fn update_status(&self, id: SessionId, new_status: SessionStatus, updated_at: Timestamp) -> RepoResult<Option<Session>> {
            let mut sessions = self.sessions.lock().await;
            if let Some(s) = sessions.get_mut(&id) {
                s.status = new_status;
                s.updated_at = updated_at;
                return Ok(Some(s.clone()));
            }
            Ok(None)
        }
        async fn save(&self, session: &Session) -> RepoResult<()> {
            self.sessions.lock().await.insert(session.id, session.clone());
            Ok(())
        }
        async fn list_by_owner(&self, owner_hash: &str, _offset: i64, _limit: i64) -> RepoResult<SessionPage> {
            let sessions: Vec<_> =
                self.sessions.lock().await.values().filter(|s| s.owner_api_key_hash == owner_hash).cloned().collect();
            let total = sessions.len() as i64;
            Ok(SessionPage { sessions, total })
        }
        async fn add_message(&self, session_id: SessionId, kind: &str, content: Value) -> RepoResult<SessionMessage> {
            Ok(SessionMessage { id: Uuid::new_v4(), session_id, kind: kind.to_string(), content, created_at: Timestamp::from(std::time::SystemTime::now()) })
        }
        async fn add_checkpoint(&self, session_id: SessionId, user_message_uuid: &str, files_modified: &[String]) -> RepoResult<Checkpoint> {
            Ok(Checkpoint {
                id: Uuid::new_v4(),
                session_id,
                user_message_uuid: user_message_uuid.to_string(),
                files_modified: files_modified.to_vec(),
                created_at: Timestamp::from(std::time::SystemTime::now()),
            })
        }
        async fn list_checkpoints(&self, _session_id: SessionId) -> RepoResult<Vec<Checkpoint>> {
            Ok(Vec::new())
        }
        async fn get_checkpoint(&self, _id: Uuid) -> RepoResult<Option<Checkpoint>> {
            Ok(None)
        }
    }

    fn test_state() -> AppState {
        let repo: std::sync::Arc<dyn SessionRepository> = std::sync::Arc::new(FakeRepo::default());
        let cache: std::sync::Arc<dyn crate::cache::Cache> = std::sync::Arc::new(InMemoryCache::new());
        let mcp_resolver = std::sync::Arc::new(astrid_mcp::McpConfigResolver::empty());
        let agent_backend = std::sync::Arc::new(NullAgentBackend::new(Vec::new()));
        AppState::new(repo, cache, mcp_resolver, agent_backend, Duration::from_secs(15))
    }

    #[tokio::test]
    async fn get_one_for_wrong_owner_is_not_found() {
        let app = test_state();
        let session = app.session_service.create("claude-3", "/work", None, "owner-a".repeat(16), Value::Null).await.unwrap();

        let err = get_one(Extension(app), Extension(TenantHash("owner-b".repeat(16))), Path(session.id.as_uuid()))
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::SessionNotFound));
    }

    #[tokio::test]
    async fn list_only_returns_the_callers_sessions() {
        let app = test_state();
        app.session_service.create("claude-3", "/work", None, "owner-a".repeat(16), Value::Null).await.unwrap();
        app.session_service.create("claude-3", "/work", None, "owner-b".repeat(16), Value::Null).await.unwrap();

        let Json(body) = list(Extension(app), Extension(TenantHash("owner-a".repeat(16))), Query(ListParams { offset: 0, limit: 20 }))
            .await
            .unwrap();
        assert_eq!(body["total"], 1);
    }

    #[tokio::test]
    async fn interrupt_on_unknown_session_is_not_found() {
        let app = test_state();
        let err = interrupt(Extension(app), Extension(TenantHash("owner-a".repeat(16))), Path(Uuid::new_v4())).await.unwrap_err();
        assert!(matches!(err, ApiError::SessionNotFound));
    }

    #[tokio::test]
    async fn checkpoints_round_trip_through_the_service() {
        let app = test_state();
        let session = app.session_service.create("claude-3", "/work", None, "owner-a".repeat(16), Value::Null).await.unwrap();
        app.checkpoint_service.record(session.id, "msg-1", &["a.rs".to_string()]).await.unwrap();

        let Json(checkpoints) =
            list_checkpoints(Extension(app), Extension(TenantHash("owner-a".repeat(16))), Path(session.id.as_uuid())).await.unwrap();
        assert_eq!(checkpoints.len(), 1);
    }
}
