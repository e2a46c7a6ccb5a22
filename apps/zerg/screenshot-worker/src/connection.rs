//! Redis connection with startup retries.

use redis::Client;
use redis::aio::ConnectionManager;
use std::future::Future;
use std::time::Duration;
use tracing::{info, warn};

/// Backoff for the initial connection attempt.
#[derive(Debug, Clone)]
pub struct ConnectRetry {
    pub max_retries: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for ConnectRetry {
    fn default() -> Self {
        Self {
            max_retries: 5,
            initial_delay_ms: 200,
            max_delay_ms: 5_000,
        }
    }
}

/// Connect to Redis and verify the connection with PING.
pub async fn connect(url: &str) -> redis::RedisResult<ConnectionManager> {
    let client = Client::open(url)?;
    let manager = ConnectionManager::new(client).await?;

    let mut conn = manager.clone();
    let _: String = redis::cmd("PING").query_async(&mut conn).await?;

    Ok(manager)
}

/// Connect with exponential backoff.
pub async fn connect_with_retry(
    url: &str,
    retry: ConnectRetry,
) -> redis::RedisResult<ConnectionManager> {
    retry_with_backoff(|| connect(url), retry).await
}

async fn retry_with_backoff<F, Fut, T, E>(mut operation: F, retry: ConnectRetry) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut attempt = 0;
    let mut delay = retry.initial_delay_ms;

    loop {
        match operation().await {
            Ok(value) => {
                if attempt > 0 {
                    info!(attempts = attempt + 1, "Connected after retrying");
                }
                return Ok(value);
            }
            Err(e) if attempt < retry.max_retries => {
                attempt += 1;
                warn!(
                    attempt = attempt,
                    max_retries = retry.max_retries,
                    delay_ms = delay,
                    error = %e,
                    "Connection failed, retrying"
                );
                tokio::time::sleep(Duration::from_millis(delay)).await;
                delay = (delay * 2).min(retry.max_delay_ms);
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test(start_paused = true)]
    async fn test_retry_succeeds_after_failures() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let result = retry_with_backoff(
            || {
                let counter = counter.clone();
                async move {
                    if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err("refused")
                    } else {
                        Ok("connected")
                    }
                }
            },
            ConnectRetry::default(),
        )
        .await;

        assert_eq!(result, Ok("connected"));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_gives_up_after_max_retries() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let retry = ConnectRetry {
            max_retries: 2,
            ..Default::default()
        };

        let result: Result<(), _> = retry_with_backoff(
            || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err("refused")
                }
            },
            retry,
        )
        .await;

        assert_eq!(result, Err("refused"));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_connect_rejects_invalid_url() {
        assert!(connect("not-a-redis-url").await.is_err());
    }
}
