//! Key/value cache abstraction: JSON get/set with TTL, atomic locks, set
//! membership, bulk reads, and bounded scans.
//!
//! Grounded on the raw `redis::cmd(...).arg(...).query_async` style used
//! throughout Redis-backed caches in this ecosystem; lock acquire/release
//! add a Lua script for the compare-and-delete half, since plain `DEL`
//! would let a holder delete someone else's (already re-acquired) lock.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::time::Duration;
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("cache I/O error: {0}")]
    Redis(#[from] redis::RedisError),
    #[error("scan pattern {0:?} is unbounded (must not start with a wildcard)")]
    UnboundedScan(String),
    #[error("max_keys {0} exceeds the hard cap of {1}")]
    ScanTooLarge(usize, usize),
}

pub type CacheResult<T> = Result<T, CacheError>;

/// Hard ceiling on any single `scan_keys` call, regardless of caller-supplied
/// `max_keys`.
pub const SCAN_HARD_CAP: usize = 10_000;

#[async_trait]
pub trait Cache: Send + Sync {
    /// Fetch and parse a JSON value. Returns `Ok(None)` on a missing key,
    /// an empty value, or malformed JSON — a corrupt cell is logged and
    /// treated as a cache miss, never surfaced as an error.
    async fn get_json(&self, key: &str) -> CacheResult<Option<Value>>;

    /// Overwrite `key` with `value`, serialized to JSON, expiring after `ttl`.
    async fn set_json(&self, key: &str, value: &Value, ttl: Duration) -> CacheResult<()>;

    /// Single-round-trip bulk read; each slot is `None` if missing or
    /// malformed.
    async fn get_many_json(&self, keys: &[String]) -> CacheResult<Vec<Option<Value>>>;

    /// Members of the set stored at `key` (used for owner/tenant indexes).
    async fn set_members(&self, key: &str) -> CacheResult<Vec<String>>;

    /// Add `member` to the set at `key`.
    async fn set_add(&self, key: &str, member: &str) -> CacheResult<()>;

    /// Remove `member` from the set at `key`.
    async fn set_remove(&self, key: &str, member: &str) -> CacheResult<()>;

    /// Delete a single key outright (used for marker cleanup).
    async fn delete(&self, key: &str) -> CacheResult<()>;

    /// Atomic SET-if-not-exists with TTL. Returns a freshly generated token
    /// on success, `None` on contention.
    async fn acquire_lock(&self, key: &str, ttl: Duration) -> CacheResult<Option<String>>;

    /// Compare-and-delete: only removes `key` if its value still equals
    /// `token`. Safe to call on an already-expired lock.
    async fn release_lock(&self, key: &str, token: &str) -> CacheResult<()>;

    /// Bounded pattern scan. `max_keys` is clamped to [`SCAN_HARD_CAP`].
    /// Never used by `SessionService` for owner-scoped listing — that goes
    /// through the `session:owner:{tenant_hash}` index set instead.
    async fn scan_keys(&self, pattern: &str, max_keys: usize) -> CacheResult<Vec<String>>;
}

fn check_scan_bounds(pattern: &str, max_keys: usize) -> CacheResult<usize> {
    if pattern.starts_with('*') {
        return Err(CacheError::UnboundedScan(pattern.to_string()));
    }
    if max_keys > SCAN_HARD_CAP {
        return Err(CacheError::ScanTooLarge(max_keys, SCAN_HARD_CAP));
    }
    Ok(max_keys)
}

/// Redis-backed [`Cache`] over a shared, clonable `ConnectionManager`.
pub struct RedisCache {
    conn: redis::aio::ConnectionManager,
}

impl RedisCache {
    #[must_use]
    pub const fn new(conn: redis::aio::ConnectionManager) -> Self {
        Self { conn }
    }

    async fn connect(url: &str) -> CacheResult<Self> {
        let client = redis::Client::open(url)?;
        let conn = client.get_connection_manager().await?;
        Ok(Self::new(conn))
    }

    /// Open a connection-managed client from a `redis://` URL.
    ///
    /// # Errors
    /// Returns [`CacheError::Redis`] if the URL is malformed or the initial
    /// connection fails.
    pub async fn from_url(url: &str) -> CacheResult<Self> {
        Self::connect(url).await
    }
}

const RELEASE_LOCK_SCRIPT: &str = r"
if redis.call('GET', KEYS[1]) == ARGV[1] then
    return redis.call('DEL', KEYS[1])
else
    return 0
end
";

#[async_trait]
impl Cache for RedisCache {
    async fn get_json(&self, key: &str) -> CacheResult<Option<Value>> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = redis::cmd("GET").arg(key).query_async(&mut conn).await?;
        Ok(parse_cell(key, raw))
    }

    async fn set_json(&self, key: &str, value: &Value, ttl: Duration) -> CacheResult<()> {
        let mut conn = self.conn.clone();
        let body = value.to_string();
        redis::cmd("SET")
            .arg(key)
            .arg(body)
            .arg("EX")
            .arg(ttl.as_secs().max(1))
            .query_async::<()>(&mut conn)
            .await?;
        Ok(())
    }

    async fn get_many_json(&self, keys: &[String]) -> CacheResult<Vec<Option<Value>>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let mut conn = self.conn.clone();
        let mut cmd = redis::cmd("MGET");
        for key in keys {
            cmd.arg(key);
        }
        let raw: Vec<Option<String>> = cmd.query_async(&mut conn).await?;
        Ok(raw
            .into_iter()
            .zip(keys)
            .map(|(v, k)| parse_cell(k, v))
            .collect())
    }

    async fn set_members(&self, key: &str) -> CacheResult<Vec<String>> {
        let mut conn = self.conn.clone();
        let members: Vec<String> = redis::cmd("SMEMBERS").arg(key).query_async(&mut conn).await?;
        Ok(members)
    }

    async fn set_add(&self, key: &str, member: &str) -> CacheResult<()> {
        let mut conn = self.conn.clone();
        redis::cmd("SADD")
            .arg(key)
            .arg(member)
            .query_async::<()>(&mut conn)
            .await?;
        Ok(())
    }

    async fn set_remove(&self, key: &str, member: &str) -> CacheResult<()> {
        let mut conn = self.conn.clone();
        redis::cmd("SREM")
            .arg(key)
            .arg(member)
            .query_async::<()>(&mut conn)
            .await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> CacheResult<()> {
        let mut conn = self.conn.clone();
        redis::cmd("DEL").arg(key).query_async::<()>(&mut conn).await?;
        Ok(())
    }

    async fn acquire_lock(&self, key: &str, ttl: Duration) -> CacheResult<Option<String>> {
        let mut conn = self.conn.clone();
        let token = Uuid::new_v4().to_string();
        let ok: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(&token)
            .arg("NX")
            .arg("PX")
            .arg(u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1))
            .query_async(&mut conn)
            .await?;
        Ok(ok.map(|_| token))
    }

    async fn release_lock(&self, key: &str, token: &str) -> CacheResult<()> {
        let mut conn = self.conn.clone();
        redis::Script::new(RELEASE_LOCK_SCRIPT)
            .key(key)
            .arg(token)
            .invoke_async::<i64>(&mut conn)
            .await?;
        Ok(())
    }

    async fn scan_keys(&self, pattern: &str, max_keys: usize) -> CacheResult<Vec<String>> {
        let max_keys = check_scan_bounds(pattern, max_keys)?;
        let mut conn = self.conn.clone();
        let mut cursor: u64 = 0;
        let mut found = Vec::new();
        loop {
            let (next_cursor, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(pattern)
                .arg("COUNT")
                .arg(200)
                .query_async(&mut conn)
                .await?;
            found.extend(batch);
            if found.len() >= max_keys || next_cursor == 0 {
                found.truncate(max_keys);
                break;
            }
            cursor = next_cursor;
        }
        Ok(found)
    }
}

fn parse_cell(key: &str, raw: Option<String>) -> Option<Value> {
    let raw = raw?;
    if raw.is_empty() {
        return None;
    }
    match serde_json::from_str(&raw) {
        Ok(value) => Some(value),
        Err(err) => {
            tracing::warn!(cache.key = key, error = %err, "malformed JSON in cache cell, treating as miss");
            None
        }
    }
}

/// In-memory [`Cache`] for tests: no real TTL sweeper, expiry is checked
/// lazily on read.
#[derive(Default)]
pub struct InMemoryCache {
    entries: tokio::sync::Mutex<HashMap<String, Entry>>,
    sets: tokio::sync::Mutex<HashMap<String, HashSet<String>>>,
    locks: tokio::sync::Mutex<HashMap<String, (String, std::time::Instant)>>,
}

struct Entry {
    value: Value,
    expires_at: std::time::Instant,
}

impl InMemoryCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Cache for InMemoryCache {
    async fn get_json(&self, key: &str) -> CacheResult<Option<Value>> {
        let mut entries = self.entries.lock().await;
        match entries.get(key) {
            Some(entry) if entry.expires_at > std::time::Instant::now() => {
                Ok(Some(entry.value.clone()))
            }
            Some(_) => {
                entries.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn set_json(&self, key: &str, value: &Value, ttl: Duration) -> CacheResult<()> {
        self.entries.lock().await.insert(
            key.to_string(),
            Entry {
                value: value.clone(),
                expires_at: std::time::Instant::now() + ttl,
            },
        );
        Ok(())
    }

    async fn get_many_json(&self, keys: &[String]) -> CacheResult<Vec<Option<Value>>> {
        let mut out = Vec::with_capacity(keys.len());
        for key in keys {
            out.push(self.get_json(key).await?);
        }
        Ok(out)
    }

    async fn set_members(&self, key: &str) -> CacheResult<Vec<String>> {
        Ok(self
            .sets
            .lock()
            .await
            .get(key)
            .map(|s| s.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn set_add(&self, key: &str, member: &str) -> CacheResult<()> {
        self.sets
            .lock()
            .await
            .entry(key.to_string())
            .or_default()
            .insert(member.to_string());
        Ok(())
    }

    async fn set_remove(&self, key: &str, member: &str) -> CacheResult<()> {
        if let Some(set) = self.sets.lock().await.get_mut(key) {
            set.remove(member);
        }
        Ok(())
    }

    async fn delete(&self, key: &str) -> CacheResult<()> {
        self.entries.lock().await.remove(key);
        Ok(())
    }

    async fn acquire_lock(&self, key: &str, ttl: Duration) -> CacheResult<Option<String>> {
        let mut locks = self.locks.lock().await;
        let now = std::time::Instant::now();
        if let Some((_, expires_at)) = locks.get(key) {
            if *expires_at > now {
                return Ok(None);
            }
        }
        let token = Uuid::new_v4().to_string();
        locks.insert(key.to_string(), (token.clone(), now + ttl));
        Ok(Some(token))
    }

    async fn release_lock(&self, key: &str, token: &str) -> CacheResult<()> {
        let mut locks = self.locks.lock().await;
        if locks.get(key).is_some_and(|(held, _)| held == token) {
            locks.remove(key);
        }
        Ok(())
    }

    async fn scan_keys(&self, pattern: &str, max_keys: usize) -> CacheResult<Vec<String>> {
        let max_keys = check_scan_bounds(pattern, max_keys)?;
        let prefix = pattern.trim_end_matches('*');
        let entries = self.entries.lock().await;
        Ok(entries
            .keys()
            .filter(|k| k.starts_with(prefix))
            .take(max_keys)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn set_then_get_round_trips() {
        let cache = InMemoryCache::new();
        let value = serde_json::json!({"a": 1});
        cache.set_json("k", &value, Duration::from_secs(60)).await.unwrap();
        assert_eq!(cache.get_json("k").await.unwrap(), Some(value));
    }

    #[tokio::test]
    async fn expired_entry_reads_as_miss() {
        let cache = InMemoryCache::new();
        cache
            .set_json("k", &serde_json::json!(1), Duration::from_millis(1))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(cache.get_json("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn lock_acquire_blocks_second_caller_until_released() {
        let cache = InMemoryCache::new();
        let token = cache.acquire_lock("lock", Duration::from_secs(5)).await.unwrap();
        assert!(token.is_some());
        assert!(cache.acquire_lock("lock", Duration::from_secs(5)).await.unwrap().is_none());
        cache.release_lock("lock", &token.unwrap()).await.unwrap();
        assert!(cache.acquire_lock("lock", Duration::from_secs(5)).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn release_with_wrong_token_is_a_noop() {
        let cache = InMemoryCache::new();
        let token = cache.acquire_lock("lock", Duration::from_secs(5)).await.unwrap().unwrap();
        cache.release_lock("lock", "not-the-token").await.unwrap();
        assert!(cache.acquire_lock("lock", Duration::from_secs(5)).await.unwrap().is_none());
        cache.release_lock("lock", &token).await.unwrap();
    }

    #[tokio::test]
    async fn scan_rejects_leading_wildcard() {
        let cache = InMemoryCache::new();
        let err = cache.scan_keys("*", 10).await.unwrap_err();
        assert!(matches!(err, CacheError::UnboundedScan(_)));
    }

    #[tokio::test]
    async fn scan_rejects_max_keys_above_hard_cap() {
        let cache = InMemoryCache::new();
        let err = cache.scan_keys("session:", SCAN_HARD_CAP + 1).await.unwrap_err();
        assert!(matches!(err, CacheError::ScanTooLarge(_, _)));
    }

    #[tokio::test]
    async fn set_members_reflects_add_and_remove() {
        let cache = InMemoryCache::new();
        cache.set_add("idx", "a").await.unwrap();
        cache.set_add("idx", "b").await.unwrap();
        let mut members = cache.set_members("idx").await.unwrap();
        members.sort();
        assert_eq!(members, vec!["a".to_string(), "b".to_string()]);
        cache.set_remove("idx", "a").await.unwrap();
        assert_eq!(cache.set_members("idx").await.unwrap(), vec!["b".to_string()]);
    }
}
