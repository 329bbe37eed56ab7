//! Cross-instance interrupt signalling.
//!
//! Any instance may call [`InterruptBus::signal`]; only the instance
//! actually running the session's `AgentRunner` observes it, by polling
//! the cache marker at each tool boundary and on a periodic tick. A
//! same-process `broadcast` channel gives the common single-instance case
//! (the signalling request and the running request land on the same
//! process) near-instant delivery without waiting for the next poll.

use std::sync::Arc;
use std::time::Duration;

use astrid_core::types::SessionId;
use serde_json::Value;
use tokio::sync::broadcast;

use crate::cache::Cache;

/// Short TTL on the `interrupted:{id}` marker: long enough that the
/// runner's next poll (at most [`InterruptBus::TICK`] away) will see it,
/// short enough that a stale marker from a completed session doesn't
/// linger.
const MARKER_TTL: Duration = Duration::from_secs(30);

pub struct InterruptBus {
    cache: Arc<dyn Cache>,
    fast_path: broadcast::Sender<SessionId>,
}

impl InterruptBus {
    /// Worst-case polling interval an `AgentRunner` should use between
    /// tool boundaries, bounding signal-to-observation latency under 1s
    /// even for a session idling between tool calls.
    pub const TICK: Duration = Duration::from_millis(500);

    #[must_use]
    pub fn new(cache: Arc<dyn Cache>) -> Self {
        let (fast_path, _) = broadcast::channel(64);
        Self { cache, fast_path }
    }

    /// Subscribe to the same-process fast path. Every `AgentRunner`
    /// subscribes once at startup; a lagged receiver (more than 64
    /// unconsumed signals) still catches the marker on its next cache
    /// poll, so a dropped broadcast message is never a correctness issue.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<SessionId> {
        self.fast_path.subscribe()
    }

    pub async fn signal(&self, session_id: SessionId) -> Result<(), crate::cache::CacheError> {
        self.cache
            .set_json(&marker_key(session_id), &Value::Bool(true), MARKER_TTL)
            .await?;
        let _ = self.fast_path.send(session_id);
        Ok(())
    }

    pub async fn observe(&self, session_id: SessionId) -> bool {
        match self.cache.get_json(&marker_key(session_id)).await {
            Ok(value) => value.is_some(),
            Err(err) => {
                tracing::warn!(error = %err, session_id = %session_id, "interrupt marker read failed, treating as not interrupted");
                false
            }
        }
    }

    pub async fn clear(&self, session_id: SessionId) {
        if let Err(err) = self.cache.delete(&marker_key(session_id)).await {
            tracing::warn!(error = %err, session_id = %session_id, "failed to clear interrupt marker");
        }
    }
}

fn marker_key(session_id: SessionId) -> String {
    format!("interrupted:{session_id}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::InMemoryCache;

    #[tokio::test]
    async fn observe_is_false_before_any_signal() {
        let bus = InterruptBus::new(Arc::new(InMemoryCache::new()));
        assert!(!bus.observe(SessionId::new()).await);
    }

    #[tokio::test]
    async fn signal_then_observe_sees_it() {
        let bus = InterruptBus::new(Arc::new(InMemoryCache::new()));
        let id = SessionId::new();
        bus.signal(id).await.unwrap();
        assert!(bus.observe(id).await);
    }

    #[tokio::test]
    async fn clear_removes_the_marker() {
        let bus = InterruptBus::new(Arc::new(InMemoryCache::new()));
        let id = SessionId::new();
        bus.signal(id).await.unwrap();
        bus.clear(id).await;
        assert!(!bus.observe(id).await);
    }

    #[tokio::test]
    async fn fast_path_delivers_same_process_signal() {
        let bus = InterruptBus::new(Arc::new(InMemoryCache::new()));
        let mut rx = bus.subscribe();
        let id = SessionId::new();
        bus.signal(id).await.unwrap();
        assert_eq!(rx.recv().await.unwrap(), id);
    }
}
