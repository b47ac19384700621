//! Global request throttle shared by every upstream call.
//!
//! Caps in-flight requests with a semaphore, spaces them with a `governor`
//! quota and wraps each call in [`retry_async`]. The permit is taken per
//! attempt, so a call sleeping in backoff does not hold a slot.

use super::retry::{retry_async, RetryConfig};
use crate::error::{PixError, Result};
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use std::future::Future;
use std::num::NonZeroU32;
use tokio::sync::Semaphore;
use tracing::debug;

pub struct RequestThrottle {
    slots: Semaphore,
    max_in_flight: usize,
    quota: Option<DefaultDirectRateLimiter>,
    retry: RetryConfig,
}

impl RequestThrottle {
    /// `requests_per_second == 0` disables the rate quota.
    pub fn new(max_in_flight: usize, requests_per_second: u32, retry: RetryConfig) -> Self {
        let max_in_flight = max_in_flight.max(1);
        Self {
            slots: Semaphore::new(max_in_flight),
            max_in_flight,
            quota: NonZeroU32::new(requests_per_second)
                .map(|rps| RateLimiter::direct(Quota::per_second(rps))),
            retry,
        }
    }

    /// No quota, no retries, effectively unbounded concurrency.
    pub fn unlimited() -> Self {
        Self::new(Semaphore::MAX_PERMITS, 0, RetryConfig::none())
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight
    }

    pub fn retry_config(&self) -> &RetryConfig {
        &self.retry
    }

    /// Number of calls that could start right now.
    pub fn available_slots(&self) -> usize {
        self.slots.available_permits()
    }

    /// Run `op` under the concurrency cap and quota, retrying transient failures.
    pub async fn call<F, Fut, T>(&self, label: &str, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let (result, stats) = retry_async(&self.retry, label, || {
            let attempt = op();
            async move {
                let _permit = self.slots.acquire().await.map_err(|_| PixError::Other(
                    "request throttle closed".to_string(),
                ))?;
                if let Some(quota) = &self.quota {
                    quota.until_ready().await;
                }
                attempt.await
            }
        })
        .await;

        if stats.attempts > 1 {
            debug!(
                "{}: {} attempts, {:?} spent in backoff",
                label, stats.attempts, stats.total_delay
            );
        }
        result
    }
}

impl std::fmt::Debug for RequestThrottle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestThrottle")
            .field("max_in_flight", &self.max_in_flight)
            .field("rate_limited", &self.quota.is_some())
            .field("retry", &self.retry)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn test_concurrency_cap_is_respected() {
        let throttle = Arc::new(RequestThrottle::new(2, 0, RetryConfig::none()));
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..6 {
            let throttle = throttle.clone();
            let running = running.clone();
            let peak = peak.clone();
            handles.push(tokio::spawn(async move {
                throttle
                    .call("probe", || {
                        let running = running.clone();
                        let peak = peak.clone();
                        async move {
                            let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                            peak.fetch_max(now, Ordering::SeqCst);
                            tokio::time::sleep(Duration::from_millis(20)).await;
                            running.fetch_sub(1, Ordering::SeqCst);
                            Ok(())
                        }
                    })
                    .await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert!(peak.load(Ordering::SeqCst) <= 2);
        assert_eq!(throttle.available_slots(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_transient_failures() {
        let retry = RetryConfig::new()
            .with_max_attempts(3)
            .with_base_delay(Duration::from_millis(5))
            .with_jitter(false);
        let throttle = RequestThrottle::new(1, 0, retry);
        let calls = AtomicUsize::new(0);

        let value = throttle
            .call("flaky", || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n == 0 {
                        Err(PixError::Upstream {
                            status: 503,
                            message: "busy".into(),
                        })
                    } else {
                        Ok(n)
                    }
                }
            })
            .await
            .unwrap();

        assert_eq!(value, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
