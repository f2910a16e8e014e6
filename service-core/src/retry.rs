//! Retry utilities for calls to hosted collaborators.
//!
//! Provides configurable retry logic with exponential backoff for fallible
//! async operations that report failure as [`AppError`].

use crate::error::AppError;
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{info, warn};

/// Backoff schedule for a retried call.
#[derive(Clone, Debug)]
pub struct RetryConfig {
    /// Retries after the first attempt.
    pub max_retries: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub backoff_multiplier: f64,
    /// Add up to 25% random jitter to each delay.
    pub add_jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(10),
            backoff_multiplier: 2.0,
            add_jitter: true,
        }
    }
}

impl RetryConfig {
    /// Single attempt; failures surface immediately.
    pub fn no_retry() -> Self {
        Self {
            max_retries: 0,
            ..Default::default()
        }
    }

    /// Two retries with short delays.
    pub fn quick() -> Self {
        Self {
            max_retries: 2,
            initial_backoff: Duration::from_millis(50),
            max_backoff: Duration::from_millis(500),
            ..Default::default()
        }
    }

    /// Delay before retry number `attempt + 1`.
    pub fn backoff_duration(&self, attempt: u32) -> Duration {
        let base_ms = (self.initial_backoff.as_millis() as f64
            * self.backoff_multiplier.powi(attempt as i32))
        .min(self.max_backoff.as_millis() as f64) as u64;

        let jitter_ms = if self.add_jitter {
            let factor: f64 = rand::thread_rng().gen_range(0.0..1.0);
            (base_ms as f64 * 0.25 * factor) as u64
        } else {
            0
        };
        Duration::from_millis(base_ms + jitter_ms)
    }

    /// How long to wait after `error` on `attempt`, or `None` to give up.
    fn delay_after(&self, attempt: u32, error: &AppError) -> Option<Duration> {
        if !error.is_retryable() || attempt >= self.max_retries {
            return None;
        }
        let backoff = self.backoff_duration(attempt);
        Some(match error.retry_after() {
            Some(secs) => backoff.max(Duration::from_secs(secs)),
            None => backoff,
        })
    }
}

/// Run `f` until it succeeds, fails permanently, or runs out of retries.
///
/// Permanent failures (see [`AppError::is_retryable`]) are returned at once.
/// A `Retry-After` hint longer than the computed backoff wins.
pub async fn retry_call<F, Fut, T>(
    config: &RetryConfig,
    operation_name: &str,
    f: F,
) -> Result<T, AppError>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, AppError>>,
{
    let mut attempt = 0;

    loop {
        let error = match f().await {
            Ok(result) => {
                if attempt > 0 {
                    info!(operation = operation_name, attempts = attempt + 1, "Call recovered");
                }
                return Ok(result);
            }
            Err(error) => error,
        };

        let Some(backoff) = config.delay_after(attempt, &error) else {
            warn!(
                operation = operation_name,
                attempts = attempt + 1,
                retryable = error.is_retryable(),
                error = %error,
                "Giving up on call"
            );
            return Err(error);
        };

        warn!(
            operation = operation_name,
            attempt = attempt + 1,
            error = %error,
            backoff_ms = backoff.as_millis() as u64,
            "Call failed, backing off"
        );
        sleep(backoff).await;
        attempt += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_retry_after_hint_extends_backoff() {
        let config = RetryConfig {
            add_jitter: false,
            ..Default::default()
        };
        let throttled = AppError::TooManyRequests("slow down".to_string(), Some(2));
        assert_eq!(config.delay_after(0, &throttled), Some(Duration::from_secs(2)));
        assert_eq!(config.delay_after(3, &throttled), None);
        assert_eq!(
            config.delay_after(0, &AppError::Forbidden(anyhow::anyhow!("rls"))),
            None
        );
    }

    #[test]
    fn test_retry_config_default() {
        let config = RetryConfig::default();
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.initial_backoff, Duration::from_millis(100));
    }

    #[test]
    fn test_backoff_duration() {
        let config = RetryConfig {
            add_jitter: false,
            ..Default::default()
        };

        assert_eq!(config.backoff_duration(0), Duration::from_millis(100));
        assert_eq!(config.backoff_duration(1), Duration::from_millis(200));
        assert_eq!(config.backoff_duration(2), Duration::from_millis(400));
    }

    #[test]
    fn test_backoff_is_capped() {
        let config = RetryConfig {
            add_jitter: false,
            max_backoff: Duration::from_millis(300),
            ..Default::default()
        };

        assert_eq!(config.backoff_duration(5), Duration::from_millis(300));
    }

    #[test]
    fn test_jitter_stays_within_quarter() {
        let config = RetryConfig::default();
        for _ in 0..20 {
            let d = config.backoff_duration(1);
            assert!(d >= Duration::from_millis(200));
            assert!(d <= Duration::from_millis(250));
        }
    }

    #[tokio::test]
    async fn test_retry_success_first_attempt() {
        let config = RetryConfig::default();
        let result = retry_call(&config, "test_op", || async { Ok::<_, AppError>(42) }).await;
        assert_eq!(result.unwrap(), 42);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_recovers_from_transient_failure() {
        let calls = AtomicU32::new(0);
        let config = RetryConfig::quick();

        let result = retry_call(&config, "test_op", || async {
            if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(AppError::ServiceUnavailable)
            } else {
                Ok("saved")
            }
        })
        .await;

        assert_eq!(result.unwrap(), "saved");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_gives_up_after_max_retries() {
        let calls = AtomicU32::new(0);
        let config = RetryConfig::quick();

        let result = retry_call(&config, "test_op", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err::<(), _>(AppError::BadGateway("reset".to_string()))
        })
        .await;

        assert!(matches!(result, Err(AppError::BadGateway(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_permanent_failure() {
        let calls = AtomicU32::new(0);
        let config = RetryConfig::quick();
        let result = retry_call(&config, "test_op", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err::<i32, _>(AppError::NotFound(anyhow::anyhow!("not found")))
        })
        .await;
        assert!(matches!(result, Err(AppError::NotFound(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
