//! Durable persistence: sessions, messages, checkpoints.
//!
//! Grounded on the embedded-migration-constant + `sqlx` pattern (adapted
//! from SQLite to Postgres types: `uuid`, `jsonb`, `timestamptz`, `numeric`,
//! partial index on active sessions).

use async_trait::async_trait;
use astrid_core::types::{SessionId, Timestamp};
use serde_json::Value;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::domain::{Checkpoint, Session, SessionMessage, SessionPage, SessionStatus};

#[derive(Debug, thiserror::Error)]
pub enum RepoError {
    #[error("repository I/O error: {0}")]
    Db(#[from] sqlx::Error),
    #[error("session {0} not found")]
    SessionNotFound(SessionId),
    #[error("owner-scoped listing requires a non-empty owner hash")]
    UnscopedListing,
}

pub type RepoResult<T> = Result<T, RepoError>;

const MIGRATE: &str = r"
CREATE TABLE IF NOT EXISTS sessions (
    id                 uuid PRIMARY KEY,
    status             text NOT NULL,
    model              text NOT NULL,
    cwd                text NOT NULL,
    total_turns        integer NOT NULL DEFAULT 0,
    total_cost_usd     double precision NOT NULL DEFAULT 0,
    parent_session_id  uuid REFERENCES sessions(id),
    owner_api_key_hash char(64) NOT NULL,
    created_at         timestamptz NOT NULL,
    updated_at         timestamptz NOT NULL,
    metadata           jsonb NOT NULL DEFAULT '{}'::jsonb
);
CREATE INDEX IF NOT EXISTS sessions_owner_idx ON sessions (owner_api_key_hash);
CREATE INDEX IF NOT EXISTS sessions_active_idx ON sessions (status) WHERE status = 'active';
CREATE INDEX IF NOT EXISTS sessions_created_at_idx ON sessions (created_at DESC);

CREATE TABLE IF NOT EXISTS session_messages (
    id         uuid PRIMARY KEY,
    session_id uuid NOT NULL REFERENCES sessions(id),
    kind       text NOT NULL,
    content    jsonb NOT NULL,
    created_at timestamptz NOT NULL
);
CREATE INDEX IF NOT EXISTS session_messages_session_idx ON session_messages (session_id, created_at);

CREATE TABLE IF NOT EXISTS checkpoints (
    id                 uuid PRIMARY KEY,
    session_id         uuid NOT NULL REFERENCES sessions(id),
    user_message_uuid  text NOT NULL UNIQUE,
    files_modified     text[] NOT NULL DEFAULT '{}',
    created_at         timestamptz NOT NULL
);
";

#[async_trait]
pub trait SessionRepository: Send + Sync {
    async fn create(&self, session: &Session) -> RepoResult<()>;
    async fn get(&self, id: SessionId) -> RepoResult<Option<Session>>;

    /// Atomic status transition via `UPDATE ... RETURNING`, avoiding a
    /// read-modify-write race outside the service's distributed lock.
    async fn update_status(
        &self,
        id: SessionId,
        new_status: SessionStatus,
        updated_at: Timestamp,
    ) -> RepoResult<Option<Session>>;

    /// Full-row save after a `SessionService` mutator runs; still guarded by
    /// the caller's session lock, not itself atomic across fields.
    async fn save(&self, session: &Session) -> RepoResult<()>;

    /// Owner filter is mandatory; an empty hash is rejected rather than
    /// silently degrading to a full-table scan.
    async fn list_by_owner(&self, owner_hash: &str, offset: i64, limit: i64) -> RepoResult<SessionPage>;

    async fn add_message(&self, session_id: SessionId, kind: &str, content: Value) -> RepoResult<SessionMessage>;

    /// Idempotent by `user_message_uuid`: a repeated call with the same
    /// UUID returns the originally-stored row rather than erroring.
    async fn add_checkpoint(
        &self,
        session_id: SessionId,
        user_message_uuid: &str,
        files_modified: &[String],
    ) -> RepoResult<Checkpoint>;

    async fn list_checkpoints(&self, session_id: SessionId) -> RepoResult<Vec<Checkpoint>>;
    async fn get_checkpoint(&self, id: Uuid) -> RepoResult<Option<Checkpoint>>;
}

pub struct PgSessionRepository {
    pool: PgPool,
}

impl PgSessionRepository {
    /// Connect and run the embedded migration.
    ///
    /// # Errors
    /// Returns [`RepoError::Db`] if the connection or migration fails.
    pub async fn connect(database_url: &str) -> RepoResult<Self> {
        let pool = PgPool::connect(database_url).await?;
        sqlx::raw_sql(MIGRATE).execute(&pool).await?;
        Ok(Self { pool })
    }

    #[must_use]
    pub const fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_session(row: &sqlx::postgres::PgRow) -> RepoResult<Session> {
        let status_raw: String = row.try_get("status")?;
        let status = status_raw
            .parse::<SessionStatus>()
            .map_err(|e| RepoError::Db(sqlx::Error::Decode(e.into())))?;
        Ok(Session {
            id: SessionId::from(row.try_get::<Uuid, _>("id")?),
            status,
            model: row.try_get("model")?,
            cwd: row.try_get("cwd")?,
            total_turns: row.try_get::<i32, _>("total_turns")?.into(),
            total_cost_usd: row.try_get("total_cost_usd")?,
            parent_session_id: row
                .try_get::<Option<Uuid>, _>("parent_session_id")?
                .map(SessionId::from),
            owner_api_key_hash: row.try_get("owner_api_key_hash")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
            metadata: row.try_get("metadata")?,
        })
    }
}

#[async_trait]
impl SessionRepository for PgSessionRepository {
    async fn create(&self, session: &Session) -> RepoResult<()> {
        sqlx::query(
            "INSERT INTO sessions \
             (id, status, model, cwd, total_turns, total_cost_usd, parent_session_id, \
              owner_api_key_hash, created_at, updated_at, metadata) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)",
        )
        .bind(session.id.as_uuid())
        .bind(session.status.as_str())
        .bind(&session.model)
        .bind(&session.cwd)
        .bind(i32::try_from(session.total_turns).unwrap_or(i32::MAX))
        .bind(session.total_cost_usd)
        .bind(session.parent_session_id.map(|p| p.as_uuid()))
        .bind(&session.owner_api_key_hash)
        .bind(session.created_at)
        .bind(session.updated_at)
        .bind(&session.metadata)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get(&self, id: SessionId) -> RepoResult<Option<Session>> {
        let row = sqlx::query("SELECT * FROM sessions WHERE id = $1")
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Self::row_to_session).transpose()
    }

    async fn update_status(
        &self,
        id: SessionId,
        new_status: SessionStatus,
        updated_at: Timestamp,
    ) -> RepoResult<Option<Session>> {
        let row = sqlx::query(
            "UPDATE sessions SET status = $1, updated_at = $2 WHERE id = $3 RETURNING *",
        )
        .bind(new_status.as_str())
        .bind(updated_at)
        .bind(id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(Self::row_to_session).transpose()
    }

    async fn save(&self, session: &Session) -> RepoResult<()> {
        let result = sqlx::query(
            "UPDATE sessions SET status = $1, model = $2, cwd = $3, total_turns = $4, \
             total_cost_usd = $5, metadata = $6, updated_at = $7 WHERE id = $8",
        )
        .bind(session.status.as_str())
        .bind(&session.model)
        .bind(&session.cwd)
        .bind(i32::try_from(session.total_turns).unwrap_or(i32::MAX))
        .bind(session.total_cost_usd)
        .bind(&session.metadata)
        .bind(session.updated_at)
        .bind(session.id.as_uuid())
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(RepoError::SessionNotFound(session.id));
        }
        Ok(())
    }

    async fn list_by_owner(&self, owner_hash: &str, offset: i64, limit: i64) -> RepoResult<SessionPage> {
        if owner_hash.is_empty() {
            return Err(RepoError::UnscopedListing);
        }
        let rows = sqlx::query(
            "SELECT * FROM sessions WHERE owner_api_key_hash = $1 \
             ORDER BY updated_at DESC OFFSET $2 LIMIT $3",
        )
        .bind(owner_hash)
        .bind(offset)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM sessions WHERE owner_api_key_hash = $1")
            .bind(owner_hash)
            .fetch_one(&self.pool)
            .await?;
        let sessions = rows.iter().map(Self::row_to_session).collect::<RepoResult<Vec<_>>>()?;
        Ok(SessionPage { sessions, total })
    }

    async fn add_message(&self, session_id: SessionId, kind: &str, content: Value) -> RepoResult<SessionMessage> {
        if self.get(session_id).await?.is_none() {
            return Err(RepoError::SessionNotFound(session_id));
        }
        let id = Uuid::new_v4();
        let created_at = chrono::Utc::now();
        sqlx::query(
            "INSERT INTO session_messages (id, session_id, kind, content, created_at) \
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(id)
        .bind(session_id.as_uuid())
        .bind(kind)
        .bind(&content)
        .bind(created_at)
        .execute(&self.pool)
        .await?;
        Ok(SessionMessage {
            id,
            session_id,
            kind: kind.to_string(),
            content,
            created_at,
        })
    }

    async fn add_checkpoint(
        &self,
        session_id: SessionId,
        user_message_uuid: &str,
        files_modified: &[String],
    ) -> RepoResult<Checkpoint> {
        let id = Uuid::new_v4();
        let created_at = chrono::Utc::now();
        // ON CONFLICT ... DO UPDATE with a self-referential no-op set makes
        // this idempotent by user_message_uuid while still returning the
        // (possibly pre-existing) row.
        let row = sqlx::query(
            "INSERT INTO checkpoints (id, session_id, user_message_uuid, files_modified, created_at) \
             VALUES ($1, $2, $3, $4, $5) \
             ON CONFLICT (user_message_uuid) \
             DO UPDATE SET user_message_uuid = EXCLUDED.user_message_uuid \
             RETURNING *",
        )
        .bind(id)
        .bind(session_id.as_uuid())
        .bind(user_message_uuid)
        .bind(files_modified)
        .bind(created_at)
        .fetch_one(&self.pool)
        .await?;
        Ok(Checkpoint {
            id: row.try_get("id")?,
            session_id: SessionId::from(row.try_get::<Uuid, _>("session_id")?),
            user_message_uuid: row.try_get("user_message_uuid")?,
            files_modified: row.try_get("files_modified")?,
            created_at: row.try_get("created_at")?,
        })
    }

    async fn list_checkpoints(&self, session_id: SessionId) -> RepoResult<Vec<Checkpoint>> {
        let rows = sqlx::query("SELECT * FROM checkpoints WHERE session_id = $1 ORDER BY created_at ASC")
            .bind(session_id.as_uuid())
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter()
            .map(|row| {
                Ok(Checkpoint {
                    id: row.try_get("id")?,
                    session_id: SessionId::from(row.try_get::<Uuid, _>("session_id")?),
                    user_message_uuid: row.try_get("user_message_uuid")?,
                    files_modified: row.try_get("files_modified")?,
                    created_at: row.try_get("created_at")?,
                })
            })
            .collect()
    }

    async fn get_checkpoint(&self, id: Uuid) -> RepoResult<Option<Checkpoint>> {
        let row = sqlx::query("SELECT * FROM checkpoints WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|row| {
            Ok(Checkpoint {
                id: row.try_get("id")?,
                session_id: SessionId::from(row.try_get::<Uuid, _>("session_id")?),
                user_message_uuid: row.try_get("user_message_uuid")?,
                files_modified: row.try_get("files_modified")?,
                created_at: row.try_get("created_at")?,
            })
        })
        .transpose()
    }
}
