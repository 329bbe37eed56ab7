//! Exponential backoff retry helper.
//!
//! Used by `SessionService::update_session`'s distributed-lock acquisition
//! loop (backoff from ~10ms to ~500ms, bounded by a 5s deadline) and by the
//! cache/repository clients for transient I/O errors.

use std::time::Duration;
use tokio::time::Instant;

/// Configuration for an exponential backoff retry loop.
#[derive(Debug, Clone, Copy)]
pub struct RetryConfig {
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Maximum delay between retries.
    pub max_delay: Duration,
    /// Multiplier applied to the delay after each attempt.
    pub multiplier: f64,
    /// Total wall-clock budget across all attempts.
    pub deadline: Duration,
}

impl RetryConfig {
    /// The backoff profile used for session-lock acquisition: 10ms → 500ms,
    /// bounded by a 5s deadline.
    #[must_use]
    pub const fn session_lock() -> Self {
        Self {
            initial_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(500),
            multiplier: 2.0,
            deadline: Duration::from_secs(5),
        }
    }
}

/// Outcome of a retry loop.
#[derive(Debug)]
pub enum RetryOutcome<T, E> {
    /// The operation succeeded, with the given value.
    Succeeded(T),
    /// `op` returned a terminal error; it was not retried.
    Failed(E),
    /// The deadline elapsed while `op` kept reporting "not yet" (`Ok(None)`).
    DeadlineExceeded,
}

/// Retry `op` with exponential backoff until it returns `Ok(Some(value))`,
/// `Err(e)` (terminal, returned immediately without retrying), or the
/// configured deadline elapses.
///
/// `op` returning `Ok(None)` means "no result yet, keep retrying" (e.g. lock
/// contention).
pub async fn retry<T, E, F, Fut>(config: RetryConfig, mut op: F) -> RetryOutcome<T, E>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<Option<T>, E>>,
{
    let start = Instant::now();
    let mut delay = config.initial_delay;

    loop {
        match op().await {
            Ok(Some(value)) => return RetryOutcome::Succeeded(value),
            Ok(None) => {}
            Err(e) => return RetryOutcome::Failed(e),
        }

        if start.elapsed() >= config.deadline {
            return RetryOutcome::DeadlineExceeded;
        }

        let remaining = config.deadline.saturating_sub(start.elapsed());
        tokio::time::sleep(delay.min(remaining)).await;
        delay = Duration::from_secs_f64(
            (delay.as_secs_f64() * config.multiplier).min(config.max_delay.as_secs_f64()),
        );

        if start.elapsed() >= config.deadline {
            return RetryOutcome::DeadlineExceeded;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn succeeds_on_first_try() {
        let outcome: RetryOutcome<i32, ()> =
            retry(RetryConfig::session_lock(), || async { Ok(Some(42)) }).await;
        assert!(matches!(outcome, RetryOutcome::Succeeded(42)));
    }

    #[tokio::test]
    async fn retries_until_success() {
        let attempts = AtomicU32::new(0);
        let config = RetryConfig {
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            multiplier: 2.0,
            deadline: Duration::from_millis(200),
        };
        let outcome: RetryOutcome<i32, ()> = retry(config, || {
            let n = attempts.fetch_add(1, Ordering::SeqCst);
            async move { if n < 3 { Ok(None) } else { Ok(Some(7)) } }
        })
        .await;
        assert!(matches!(outcome, RetryOutcome::Succeeded(7)));
        assert!(attempts.load(Ordering::SeqCst) >= 4);
    }

    #[tokio::test]
    async fn deadline_exceeded_when_never_succeeds() {
        let config = RetryConfig {
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
            multiplier: 2.0,
            deadline: Duration::from_millis(20),
        };
        let outcome: RetryOutcome<i32, ()> = retry(config, || async { Ok(None) }).await;
        assert!(matches!(outcome, RetryOutcome::DeadlineExceeded));
    }
}
