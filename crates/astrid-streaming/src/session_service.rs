//! Session CRUD, ownership enforcement, and the cache+repository dual
//! write/read path.
//!
//! The repository is authoritative; the cache is a best-effort read
//! accelerator and cross-instance marker board. Every write goes to the
//! repository first — a cache write failure after a successful repository
//! write is logged and swallowed, never surfaced to the caller (§7:
//! "cache read/write failures fall back to repo / continue").

use std::sync::Arc;
use std::time::Duration;

use astrid_core::retry::{retry, RetryConfig, RetryOutcome};
use astrid_core::types::{SessionId, Timestamp};
use serde_json::Value;
use tracing::warn;

use crate::cache::Cache;
use crate::domain::{Session, SessionMessage, SessionPage, SessionStatus};
use crate::error::{ApiError, ApiResult};
use crate::repository::SessionRepository;

/// How long a cached session entry lives before a repository re-read is
/// forced.
pub const SESSION_CACHE_TTL: Duration = Duration::from_secs(2 * 60 * 60);
/// TTL on the `active_session:{id}` marker — refreshed by the runner while
/// streaming continues, so this is a dead-man's switch, not a hard cap.
const ACTIVE_MARKER_TTL: Duration = Duration::from_secs(5 * 60);
const LOCK_TTL: Duration = Duration::from_secs(10);

fn session_key(id: SessionId) -> String {
    format!("session:{id}")
}

fn owner_index_key(owner_hash: &str) -> String {
    format!("session:owner:{owner_hash}")
}

fn active_marker_key(id: SessionId) -> String {
    format!("active_session:{id}")
}

fn lock_key(id: SessionId) -> String {
    format!("session_lock:{id}")
}

pub struct SessionService {
    repo: Arc<dyn SessionRepository>,
    cache: Arc<dyn Cache>,
}

impl SessionService {
    #[must_use]
    pub fn new(repo: Arc<dyn SessionRepository>, cache: Arc<dyn Cache>) -> Self {
        Self { repo, cache }
    }

    /// Create and persist a new session, owned by `owner_hash`.
    pub async fn create(
        &self,
        model: impl Into<String>,
        cwd: impl Into<String>,
        parent_session_id: Option<SessionId>,
        owner_hash: String,
        metadata: Value,
    ) -> ApiResult<Session> {
        let session = Session::new(
            SessionId::new(),
            model,
            cwd,
            parent_session_id,
            owner_hash.clone(),
            Timestamp::from(std::time::SystemTime::now()),
            metadata,
        );
        self.repo.create(&session).await?;
        self.warm_cache(&session).await;
        if let Err(err) = self.cache.set_add(&owner_index_key(&owner_hash), &session.id.to_string()).await {
            warn!(error = %err, session_id = %session.id, "failed to add session to owner index");
        }
        Ok(session)
    }

    /// Cache-aside read, enforcing ownership. A session that exists but
    /// isn't owned by `owner_hash` is reported identically to a missing
    /// one, never as a distinct "forbidden" — this is the anti-enumeration
    /// guarantee.
    pub async fn get(&self, id: SessionId, owner_hash: &str) -> ApiResult<Session> {
        if let Some(value) = self.cache.get_json(&session_key(id)).await.unwrap_or(None) {
            if let Ok(session) = serde_json::from_value::<Session>(value) {
                return ownership_checked(session, owner_hash);
            }
        }
        let session = self.repo.get(id).await?.ok_or(ApiError::SessionNotFound)?;
        self.warm_cache(&session).await;
        ownership_checked(session, owner_hash)
    }

    /// Cache-aside bulk read: the owner-index set gives us every session id
    /// for `owner_hash` without a repository round trip, then
    /// `get_many_json` fetches them in one shot. Falls back to
    /// `repo.list_by_owner` whenever the index is empty — either the owner
    /// truly has no sessions, or the index was never warmed (e.g. a
    /// session created before this cache existed), and there's no way to
    /// tell those apart from an empty set alone.
    pub async fn list(&self, owner_hash: &str, offset: i64, limit: i64) -> ApiResult<SessionPage> {
        let limit = limit.clamp(1, 100);
        let ids = self.cache.set_members(&owner_index_key(owner_hash)).await?;
        if ids.is_empty() {
            return Ok(self.repo.list_by_owner(owner_hash, offset, limit).await?);
        }

        let keys: Vec<String> = ids.iter().map(|id| format!("session:{id}")).collect();
        let values = self.cache.get_many_json(&keys).await?;

        let mut sessions = Vec::new();
        for (id, value) in ids.iter().zip(values) {
            match value {
                Some(value) => match serde_json::from_value::<Session>(value) {
                    Ok(session) => sessions.push(session),
                    Err(err) => {
                        warn!(error = %err, session_id = %id, "malformed session cache entry, skipping");
                    }
                },
                None => {
                    warn!(session_id = %id, "session indexed for owner but missing from cache");
                }
            }
        }

        let total = sessions.len() as i64;
        sessions.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        let page = sessions.into_iter().skip(offset.max(0) as usize).take(limit as usize).collect();
        Ok(SessionPage { sessions: page, total })
    }

    pub async fn record_message(&self, session_id: SessionId, kind: &str, content: Value) -> ApiResult<SessionMessage> {
        Ok(self.repo.add_message(session_id, kind, content).await?)
    }

    /// Register the cross-instance "this session is being actively
    /// streamed" marker. Step 2 of `AgentRunner`'s responsibilities: a
    /// cache failure here must fail the whole request rather than fall
    /// back to in-process state, since that would allow two instances to
    /// run the same session concurrently (split brain).
    pub async fn mark_active(&self, id: SessionId) -> ApiResult<()> {
        self.cache
            .set_json(&active_marker_key(id), &Value::Bool(true), ACTIVE_MARKER_TTL)
            .await?;
        Ok(())
    }

    pub async fn clear_active(&self, id: SessionId) {
        if let Err(err) = self.cache.delete(&active_marker_key(id)).await {
            warn!(error = %err, session_id = %id, "failed to clear active-session marker");
        }
    }

    /// Apply `mutate` to the session under the distributed session lock,
    /// persist the result, and refresh the cache. Used for every status
    /// transition and turn/cost accumulation so concurrent requests for
    /// the same session (e.g. a resume racing an interrupt) serialize.
    ///
    /// # Errors
    /// `ApiError::SessionLocked` if the lock can't be acquired within the
    /// 5s deadline; propagates repository errors from the read or write.
    pub async fn with_session_lock<F>(&self, id: SessionId, mutate: F) -> ApiResult<Session>
    where
        F: FnOnce(Session) -> Session,
    {
        let key = lock_key(id);
        let token = match retry(RetryConfig::session_lock(), || {
            let cache = Arc::clone(&self.cache);
            let key = key.clone();
            async move { cache.acquire_lock(&key, LOCK_TTL).await.map_err(ApiError::from) }
        })
        .await
        {
            RetryOutcome::Succeeded(token) => token,
            RetryOutcome::Failed(err) => return Err(err),
            RetryOutcome::DeadlineExceeded => return Err(ApiError::SessionLocked),
        };

        let result = async {
            let session = self.repo.get(id).await?.ok_or(ApiError::SessionNotFound)?;
            let mut mutated = mutate(session);
            mutated.updated_at = Timestamp::from(std::time::SystemTime::now());
            self.repo.save(&mutated).await?;
            self.warm_cache(&mutated).await;
            Ok(mutated)
        }
        .await;

        if let Err(err) = self.cache.release_lock(&key, &token).await {
            warn!(error = %err, session_id = %id, "failed to release session lock");
        }
        result
    }

    async fn warm_cache(&self, session: &Session) {
        let value = serde_json::to_value(session).expect("Session always serializes");
        if let Err(err) = self.cache.set_json(&session_key(session.id), &value, SESSION_CACHE_TTL).await {
            warn!(error = %err, session_id = %session.id, "failed to warm session cache entry");
        }
    }
}

fn ownership_checked(session: Session, owner_hash: &str) -> ApiResult<Session> {
    if session.owned_by(owner_hash) {
        Ok(session)
    } else {
        Err(ApiError::SessionNotFound)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::InMemoryCache;
    use crate::repository::{RepoResult, SessionRepository};
    use async_trait::async_trait;
    use std::collections::HashMap;
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
        async fn update_status(
            &self,
            id: SessionId,
            new_status: SessionStatus,
            updated_at: Timestamp,
        ) -> RepoResult<Option<Session>> {
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
            let sessions: Vec<_> = self
                .sessions
                .lock()
                .await
                .values()
                .filter(|s| s.owner_api_key_hash == owner_hash)
                .cloned()
                .collect();
            let total = sessions.len() as i64;
            Ok(SessionPage { sessions, total })
        }
        async fn add_message(&self, session_id: SessionId, kind: &str, content: Value) -> RepoResult<SessionMessage> {
            Ok(SessionMessage {
                id: uuid::Uuid::new_v4(),
                session_id,
                kind: kind.to_string(),
                content,
                created_at: Timestamp::from(std::time::SystemTime::now()),
            })
        }
        async fn add_checkpoint(
            &self,
            session_id: SessionId,
            user_message_uuid: &str,
            files_modified: &[String],
        ) -> RepoResult<crate::domain::Checkpoint> {
            Ok(crate::domain::Checkpoint {
                id: uuid::Uuid::new_v4(),
                session_id,
                user_message_uuid: user_message_uuid.to_string(),
                files_modified: files_modified.to_vec(),
                created_at: Timestamp::from(std::time::SystemTime::now()),
            })
        }
        async fn list_checkpoints(&self, _session_id: SessionId) -> RepoResult<Vec<crate::domain::Checkpoint>> {
            Ok(Vec::new())
        }
        async fn get_checkpoint(&self, _id: uuid::Uuid) -> RepoResult<Option<crate::domain::Checkpoint>> {
            Ok(None)
        }
    }

    fn service() -> SessionService {
        SessionService::new(Arc::new(FakeRepo::default()), Arc::new(InMemoryCache::new()))
    }

    #[tokio::test]
    async fn created_session_is_readable_by_its_owner() {
        let svc = service();
        let session = svc.create("claude-3", "/work", None, "owner-a".repeat(16), Value::Null).await.unwrap();
        let fetched = svc.get(session.id, &"owner-a".repeat(16)).await.unwrap();
        assert_eq!(fetched.id, session.id);
    }

    #[tokio::test]
    async fn mismatched_owner_sees_not_found_not_forbidden() {
        let svc = service();
        let session = svc.create("claude-3", "/work", None, "owner-a".repeat(16), Value::Null).await.unwrap();
        let err = svc.get(session.id, &"owner-b".repeat(16)).await.unwrap_err();
        assert!(matches!(err, ApiError::SessionNotFound));
    }

    #[tokio::test]
    async fn list_reads_through_the_owner_index() {
        let svc = service();
        svc.create("claude-3", "/work", None, "owner-a".repeat(16), Value::Null).await.unwrap();
        svc.create("claude-3", "/work", None, "owner-b".repeat(16), Value::Null).await.unwrap();

        let page = svc.list(&"owner-a".repeat(16), 0, 20).await.unwrap();
        assert_eq!(page.total, 1);
    }

    #[tokio::test]
    async fn list_falls_back_to_the_repository_when_the_index_is_empty() {
        let repo = Arc::new(FakeRepo::default());
        let session = Session::new(
            SessionId::new(),
            "claude-3",
            "/work",
            None,
            "owner-a".repeat(16),
            Timestamp::from(std::time::SystemTime::now()),
            Value::Null,
        );
        repo.create(&session).await.unwrap();
        let svc = SessionService::new(repo, Arc::new(InMemoryCache::new()));

        let page = svc.list(&"owner-a".repeat(16), 0, 20).await.unwrap();
        assert_eq!(page.total, 1);
    }

    #[tokio::test]
    async fn with_session_lock_persists_mutation() {
        let svc = service();
        let session = svc.create("claude-3", "/work", None, "owner-a".repeat(16), Value::Null).await.unwrap();
        let updated = svc
            .with_session_lock(session.id, |mut s| {
                s.status = SessionStatus::Completed;
                s.total_turns = 3;
                s
            })
            .await
            .unwrap();
        assert_eq!(updated.status, SessionStatus::Completed);
        assert_eq!(updated.total_turns, 3);
    }
}
