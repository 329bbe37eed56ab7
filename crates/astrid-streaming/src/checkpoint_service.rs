//! Checkpoint recording and rewind validation.
//!
//! A checkpoint anchors a file-state snapshot to the user-message UUID
//! that produced it. Recording is idempotent by that UUID —
//! [`crate::repository::PgSessionRepository::add_checkpoint`] already
//! enforces the unique constraint; this service just forwards the call
//! and adds the cross-session rewind-target check §4.7 requires.

use std::sync::Arc;

use astrid_core::types::SessionId;
use uuid::Uuid;

use crate::backend::{AgentHandle, BackendError};
use crate::domain::Checkpoint;
use crate::error::{ApiError, ApiResult};
use crate::repository::SessionRepository;

pub struct CheckpointService {
    repo: Arc<dyn SessionRepository>,
}

impl CheckpointService {
    #[must_use]
    pub fn new(repo: Arc<dyn SessionRepository>) -> Self {
        Self { repo }
    }

    pub async fn record(
        &self,
        session_id: SessionId,
        user_message_uuid: &str,
        files_modified: &[String],
    ) -> ApiResult<Checkpoint> {
        Ok(self.repo.add_checkpoint(session_id, user_message_uuid, files_modified).await?)
    }

    pub async fn list(&self, session_id: SessionId) -> ApiResult<Vec<Checkpoint>> {
        Ok(self.repo.list_checkpoints(session_id).await?)
    }

    /// Reject a rewind target that exists but belongs to a different
    /// session — this is the only way a cross-tenant/cross-session rewind
    /// could otherwise slip through, since checkpoint ids are opaque
    /// UUIDs with no session prefix.
    pub async fn validate_rewind_target(&self, session_id: SessionId, target: Uuid) -> ApiResult<Checkpoint> {
        let checkpoint = self.repo.get_checkpoint(target).await?.ok_or(ApiError::Validation(
            "rewind target checkpoint does not exist".to_string(),
        ))?;
        if checkpoint.session_id != session_id {
            return Err(ApiError::Validation(
                "rewind target checkpoint belongs to a different session".to_string(),
            ));
        }
        Ok(checkpoint)
    }

    /// Validate, then delegate to the agent runtime's own rewind RPC.
    pub async fn apply_rewind(
        &self,
        session_id: SessionId,
        target: Uuid,
        handle: &mut dyn AgentHandle,
    ) -> ApiResult<Checkpoint> {
        let checkpoint = self.validate_rewind_target(session_id, target).await?;
        handle.rewind(target).await.map_err(|err| match err {
            BackendError::UnknownCheckpoint => {
                ApiError::Validation("agent runtime does not recognise this checkpoint".to_string())
            }
            BackendError::Unavailable(msg) => ApiError::UpstreamUnavailable(msg),
        })?;
        Ok(checkpoint)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{AgentOptions, NullAgentBackend, UpstreamEventTemplate};
    use crate::domain::{Session, SessionMessage, SessionPage, SessionStatus};
    use async_trait::async_trait;
    use serde_json::Value;
    use std::collections::HashMap;
    use tokio::sync::Mutex;

    #[derive(Default)]
    struct FakeRepo {
        checkpoints: Mutex<HashMap<Uuid, Checkpoint>>,
    }

    #[async_trait]
    impl SessionRepository for FakeRepo {
        async fn create(&self, _session: &Session) -> crate::repository::RepoResult<()> {
            Ok(())
        }
        async fn get(&self, _id: SessionId) -> crate::repository::RepoResult<Option<Session>> {
            Ok(None)
        }
        async fn update_status(
            &self,
            _id: SessionId,
            _new_status: SessionStatus,
            _updated_at: astrid_core::types::Timestamp,
        ) -> crate::repository::RepoResult<Option<Session>> {
            Ok(None)
        }
        async fn save(&self, _session: &Session) -> crate::repository::RepoResult<()> {
            Ok(())
        }
        async fn list_by_owner(&self, _owner_hash: &str, _offset: i64, _limit: i64) -> crate::repository::RepoResult<SessionPage> {
            Ok(SessionPage { sessions: Vec::new(), total: 0 })
        }
        async fn add_message(&self, session_id: SessionId, kind: &str, content: Value) -> crate::repository::RepoResult<SessionMessage> {
            Ok(SessionMessage {
                id: Uuid::new_v4(),
                session_id,
                kind: kind.to_string(),
                content,
                created_at: astrid_core::types::Timestamp::from(std::time::SystemTime::now()),
            })
        }
        async fn add_checkpoint(
            &self,
            session_id: SessionId,
            user_message_uuid: &str,
            files_modified: &[String],
        ) -> crate::repository::RepoResult<Checkpoint> {
            let checkpoint = Checkpoint {
                id: Uuid::new_v4(),
                session_id,
                user_message_uuid: user_message_uuid.to_string(),
                files_modified: files_modified.to_vec(),
                created_at: astrid_core::types::Timestamp::from(std::time::SystemTime::now()),
            };
            self.checkpoints.lock().await.insert(checkpoint.id, checkpoint.clone());
            Ok(checkpoint)
        }
        async fn list_checkpoints(&self, session_id: SessionId) -> crate::repository::RepoResult<Vec<Checkpoint>> {
            Ok(self.checkpoints.lock().await.values().filter(|c| c.session_id == session_id).cloned().collect())
        }
        async fn get_checkpoint(&self, id: Uuid) -> crate::repository::RepoResult<Option<Checkpoint>> {
            Ok(self.checkpoints.lock().await.get(&id).cloned())
        }
    }

    #[tokio::test]
    async fn rewind_target_from_another_session_is_rejected() {
        let repo = Arc::new(FakeRepo::default());
        let svc = CheckpointService::new(repo.clone());
        let owner_session = SessionId::new();
        let other_session = SessionId::new();
        let checkpoint = svc.record(owner_session, "msg-1", &[]).await.unwrap();

        let err = svc.validate_rewind_target(other_session, checkpoint.id).await.unwrap_err();
        assert!(matches!(err, ApiError::Validation(_)));
    }

    #[tokio::test]
    async fn apply_rewind_delegates_to_backend_handle() {
        use crate::backend::AgentBackend;
        let repo = Arc::new(FakeRepo::default());
        let svc = CheckpointService::new(repo.clone());
        let session_id = SessionId::new();
        let checkpoint = svc.record(session_id, "msg-1", &["a.rs".to_string()]).await.unwrap();

        let backend = NullAgentBackend::new(vec![UpstreamEventTemplate::Result(
            crate::backend::ResultInfo {
                is_error: false,
                duration_ms: 0,
                num_turns: 0,
                total_cost_usd: None,
                usage: None,
                model_usage: None,
                result: None,
                structured_output: None,
                stop_reason: None,
            },
        )]);
        let mut handle = backend.start(options_for(session_id)).await.unwrap();
        let result = svc.apply_rewind(session_id, checkpoint.id, handle.as_mut()).await.unwrap();
        assert_eq!(result.id, checkpoint.id);
    }

    fn options_for(session_id: SessionId) -> AgentOptions {
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
            checkpointing_enabled: true,
            output_schema: None,
            resume_session_id: Some(session_id.as_uuid()),
            parent_session_id: None,
            hooks: HashMap::new(),
        }
    }
}
