//! Caller-side retry with exponential backoff for memory operations.
//!
//! Retries only errors the memory subsystem marks as retryable (store
//! outage, embedding timeout or failure). Invalid input and invariant
//! violations fail immediately.

use kindred_core::MemoryError;
use rand::Rng;
use std::future::Future;
use std::time::Duration;

/// Configuration for retry behavior.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts (including the first).
    pub max_attempts: u32,
    /// Initial delay before the first retry.
    pub initial_delay: Duration,
    /// Maximum delay between retries.
    pub max_delay: Duration,
    /// Multiplier for each subsequent delay.
    pub backoff_factor: f64,
    /// Upper bound of the random jitter added to every delay.
    pub max_jitter: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(5),
            backoff_factor: 2.0,
            max_jitter: Duration::from_millis(100),
        }
    }
}

impl RetryConfig {
    /// No waiting between attempts.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            backoff_factor: 1.0,
            max_jitter: Duration::ZERO,
        }
    }
}

/// Run `operation` until it succeeds, fails with a non-retryable error, or
/// `max_attempts` is exhausted. Returns the last error in the latter case.
pub async fn with_retry<T, F, Fut>(
    config: &RetryConfig,
    operation_name: &str,
    mut operation: F,
) -> Result<T, MemoryError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, MemoryError>>,
{
    let attempts = config.max_attempts.max(1);
    let mut delay = config.initial_delay;
    let mut attempt = 1;

    loop {
        match operation().await {
            Ok(value) => {
                if attempt > 1 {
                    tracing::info!("{} succeeded on attempt {}", operation_name, attempt);
                }
                return Ok(value);
            }
            Err(e) if !e.is_retryable() || attempt >= attempts => return Err(e),
            Err(e) => {
                let sleep_time = delay + jitter(config.max_jitter);
                tracing::warn!(
                    "{} failed on attempt {}/{}: {}; retrying in {:.1}s",
                    operation_name,
                    attempt,
                    attempts,
                    e,
                    sleep_time.as_secs_f64()
                );
                tokio::time::sleep(sleep_time).await;

                delay = Duration::from_secs_f64(
                    (delay.as_secs_f64() * config.backoff_factor)
                        .min(config.max_delay.as_secs_f64()),
                );
                attempt += 1;
            }
        }
    }
}

fn jitter(max: Duration) -> Duration {
    let max_ms = max.as_millis() as u64;
    if max_ms == 0 {
        return Duration::ZERO;
    }
    Duration::from_millis(rand::thread_rng().gen_range(0..=max_ms))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn test_retries_until_success() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let result = with_retry(&RetryConfig::immediate(3), "remember", move || async move {
            if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(MemoryError::Storage("database is locked".into()))
            } else {
                Ok(7)
            }
        })
        .await;
        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_non_retryable_fails_immediately() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let result: Result<(), _> = with_retry(&RetryConfig::immediate(5), "remember", move || async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Err(MemoryError::InvalidInput("content is empty".into()))
        })
        .await;
        assert!(matches!(result, Err(MemoryError::InvalidInput(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_attempts() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let result: Result<(), _> = with_retry(&RetryConfig::immediate(4), "remember", move || async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Err(MemoryError::EmbeddingTimeout(Duration::from_millis(50)))
        })
        .await;
        assert!(matches!(result, Err(MemoryError::EmbeddingTimeout(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_grows_and_is_capped() {
        let config = RetryConfig {
            max_attempts: 4,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(3),
            backoff_factor: 2.0,
            max_jitter: Duration::ZERO,
        };
        let started = tokio::time::Instant::now();
        let result: Result<(), _> = with_retry(&config, "remember", || async {
            Err(MemoryError::Storage("down".into()))
        })
        .await;
        assert!(result.is_err());
        // 1s + 2s + 3s (capped)
        assert_eq!(started.elapsed(), Duration::from_secs(6));
    }

    #[test]
    fn test_jitter_is_bounded() {
        for _ in 0..100 {
            assert!(jitter(Duration::from_millis(20)) <= Duration::from_millis(20));
        }
        assert_eq!(jitter(Duration::ZERO), Duration::ZERO);
    }
}
