//! Backoff schedule for transient upstream failures.
//!
//! Attempt `n` waits `base * 2^n`, capped at `max_delay`. With jitter the
//! wait is scaled by a random factor in `[0.5, 1.5)` and capped again. A
//! `Retry-After` hint from the upstream is a floor for the wait.

use crate::error::PixError;
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Total attempts, the first one included. Never below 1.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            jitter: true,
        }
    }
}

impl RetryConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// One attempt and no backoff.
    pub fn none() -> Self {
        Self::default().with_max_attempts(1)
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Wait after failed attempt `attempt` (0 for the first).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let doubled = 2u32
            .checked_pow(attempt)
            .and_then(|factor| self.base_delay.checked_mul(factor))
            .unwrap_or(self.max_delay)
            .min(self.max_delay);

        if !self.jitter {
            return doubled;
        }
        let factor: f64 = rand::rng().random_range(0.5..1.5);
        doubled.mul_f64(factor).min(self.max_delay)
    }

    /// [`RetryConfig::backoff`], raised to the upstream's `Retry-After`.
    pub fn delay_for(&self, attempt: u32, error: &PixError) -> Duration {
        let wait = self.backoff(attempt);
        let hint = match error {
            PixError::RateLimited {
                retry_after_secs: Some(secs),
                ..
            } => Duration::from_secs(*secs).min(self.max_delay),
            _ => Duration::ZERO,
        };
        wait.max(hint)
    }
}

/// What a [`retry_async`] run did.
#[derive(Debug, Clone, Default)]
pub struct RetryStats {
    pub attempts: u32,
    /// Time spent sleeping between attempts.
    pub total_delay: Duration,
    pub success: bool,
    pub last_error: Option<String>,
}

/// Run `operation` until it succeeds, fails permanently, or runs out of
/// attempts. Only [`PixError::is_retryable`] failures are retried.
pub async fn retry_async<F, Fut, T>(
    config: &RetryConfig,
    label: &str,
    mut operation: F,
) -> (Result<T, PixError>, RetryStats)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, PixError>>,
{
    let mut stats = RetryStats::default();

    for attempt in 0..config.max_attempts {
        stats.attempts = attempt + 1;
        let error = match operation().await {
            Ok(value) => {
                if attempt > 0 {
                    debug!("{}: recovered on attempt {}", label, attempt + 1);
                }
                stats.success = true;
                return (Ok(value), stats);
            }
            Err(error) => error,
        };
        stats.last_error = Some(error.to_string());

        let last = attempt + 1 == config.max_attempts;
        if !error.is_retryable() || last {
            if last && error.is_retryable() {
                warn!("{}: giving up after {} attempts: {}", label, stats.attempts, error);
            } else {
                debug!("{}: permanent failure: {}", label, error);
            }
            return (Err(error), stats);
        }

        let wait = config.delay_for(attempt, &error);
        stats.total_delay += wait;
        warn!(
            "{}: attempt {} of {} failed ({}), next try in {:?}",
            label,
            attempt + 1,
            config.max_attempts,
            error,
            wait
        );
        tokio::time::sleep(wait).await;
    }

    // max_attempts is at least 1 through the builder; a literal 0 lands here.
    (
        Err(PixError::Other(format!("{}: no attempts configured", label))),
        stats,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn reset() -> PixError {
        PixError::Network {
            message: "connection reset".into(),
            cause: None,
        }
    }

    fn fixed(base_ms: u64) -> RetryConfig {
        RetryConfig::new()
            .with_base_delay(Duration::from_millis(base_ms))
            .with_jitter(false)
    }

    #[test]
    fn test_backoff_doubles_until_cap() {
        let config = fixed(500).with_max_delay(Duration::from_secs(3));
        let waits: Vec<_> = (0..5).map(|n| config.backoff(n)).collect();
        assert_eq!(
            waits,
            vec![
                Duration::from_millis(500),
                Duration::from_secs(1),
                Duration::from_secs(2),
                Duration::from_secs(3),
                Duration::from_secs(3),
            ]
        );
        assert_eq!(config.backoff(40), Duration::from_secs(3));
    }

    #[test]
    fn test_jittered_backoff_band() {
        let config = RetryConfig::new().with_base_delay(Duration::from_secs(4));
        for _ in 0..32 {
            let wait = config.backoff(0);
            assert!(wait >= Duration::from_secs(2));
            assert!(wait < Duration::from_secs(6));
        }
    }

    #[test]
    fn test_rate_limit_hint_is_a_floor() {
        let config = fixed(1000);
        let limited = PixError::RateLimited {
            service: "app-api".into(),
            retry_after_secs: Some(20),
        };
        assert_eq!(config.delay_for(0, &limited), Duration::from_secs(20));
        assert_eq!(config.delay_for(0, &reset()), Duration::from_secs(1));

        let capped = fixed(1000).with_max_delay(Duration::from_secs(5));
        assert_eq!(capped.delay_for(0, &limited), Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failures_then_success() {
        let config = fixed(10).with_max_attempts(4);
        let calls = Arc::new(AtomicU32::new(0));

        let (result, stats) = retry_async(&config, "illust", || {
            let calls = calls.clone();
            async move {
                match calls.fetch_add(1, Ordering::SeqCst) {
                    0 | 1 => Err(reset()),
                    _ => Ok("ok"),
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), "ok");
        assert_eq!(stats.attempts, 3);
        assert_eq!(stats.total_delay, Duration::from_millis(30));
        assert!(stats.success);
    }

    #[tokio::test(start_paused = true)]
    async fn test_attempts_run_out() {
        let config = fixed(10).with_max_attempts(2);
        let (result, stats) =
            retry_async(&config, "search", || async { Err::<(), _>(reset()) }).await;

        assert!(matches!(result, Err(PixError::Network { .. })));
        assert_eq!(stats.attempts, 2);
        assert!(!stats.success);
        assert_eq!(stats.last_error.as_deref(), Some("Network error: connection reset"));
    }

    #[tokio::test]
    async fn test_client_errors_fail_fast() {
        let config = RetryConfig::new().with_max_attempts(5);
        let (result, stats) = retry_async(&config, "illust", || async {
            Err::<(), _>(PixError::Upstream {
                status: 404,
                message: "gone".into(),
            })
        })
        .await;

        assert!(matches!(result, Err(PixError::Upstream { status: 404, .. })));
        assert_eq!(stats.attempts, 1);
        assert_eq!(stats.total_delay, Duration::ZERO);
    }
}
