//! Startup helpers: bounded retry with backoff and Redis connection setup.
//!
//! The core modules assume already-established connections; everything that has to
//! wait for the broker/cache to come up lives here.

use anyhow::Result;
use redis::aio::MultiplexedConnection;
use std::future::Future;
use std::time::Duration;

/// Bounded retry schedule: exponential backoff from `base_delay`, capped at
/// `max_delay`, with up to 50ms of random jitter per sleep.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub attempts: usize,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    /// Fixed-interval schedule (`base_delay == max_delay`).
    pub fn fixed(attempts: usize, delay: Duration) -> Self {
        Self {
            attempts,
            base_delay: delay,
            max_delay: delay,
        }
    }

    /// Short schedule for in-request retries (e.g. publishing a work item).
    pub fn quick() -> Self {
        Self {
            attempts: 3,
            base_delay: Duration::from_millis(150),
            max_delay: Duration::from_millis(1200),
        }
    }
}

/// Runs `op` until it succeeds or the policy's attempts are exhausted, returning
/// the last error in the latter case.
pub async fn retry<T, E, F, Fut>(label: &str, policy: RetryPolicy, mut op: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let attempts = policy.attempts.max(1);
    let mut delay = policy.base_delay;
    let mut attempt = 0;

    loop {
        attempt += 1;
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if attempt >= attempts => {
                tracing::error!("{}: giving up after {} attempts: {}", label, attempts, e);
                return Err(e);
            }
            Err(e) => {
                tracing::warn!(
                    "{}: attempt {}/{} failed: {}, retrying in {:?}",
                    label,
                    attempt,
                    attempts,
                    e,
                    delay
                );
                // Simple jitter to prevent thundering herd
                let jitter = Duration::from_millis(rand::random::<u64>() % 50);
                tokio::time::sleep(delay + jitter).await;
                delay = (delay * 2).min(policy.max_delay);
            }
        }
    }
}

/// Opens a multiplexed Redis connection, retrying per `policy`. Fatal after the
/// last attempt.
pub async fn connect_redis(url: &str, policy: RetryPolicy) -> Result<MultiplexedConnection> {
    let client = redis::Client::open(url)?;

    let conn = retry("redis connect", policy, || {
        let client = client.clone();
        async move {
            let mut conn = client.get_multiplexed_async_connection().await?;
            let _: String = redis::cmd("PING").query_async(&mut conn).await?;
            Ok::<_, redis::RedisError>(conn)
        }
    })
    .await?;

    tracing::info!("Connected to Redis at {}", url);
    Ok(conn)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_retry_returns_first_success() {
        let calls = AtomicUsize::new(0);

        let result: Result<usize, String> =
            retry("flaky", RetryPolicy::fixed(5, Duration::from_millis(1)), || {
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                async move {
                    if n < 3 {
                        Err(format!("attempt {} failed", n))
                    } else {
                        Ok(n)
                    }
                }
            })
            .await;

        assert_eq!(result, Ok(3));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_gives_up_with_last_error() {
        let calls = AtomicUsize::new(0);

        let result: Result<(), String> =
            retry("down", RetryPolicy::fixed(3, Duration::from_millis(1)), || {
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                async move { Err(format!("attempt {}", n)) }
            })
            .await;

        assert_eq!(result, Err("attempt 3".to_string()));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_zero_attempts_still_runs_once() {
        let calls = AtomicUsize::new(0);

        let _: Result<(), &str> = retry("once", RetryPolicy::fixed(0, Duration::ZERO), || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err("nope") }
        })
        .await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
