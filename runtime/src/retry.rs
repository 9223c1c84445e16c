//! Exponential backoff for bus publishes.
//!
//! [`EventPublisher`](crate::publisher::EventPublisher) runs every publish
//! through [`RetryPolicy::retry`]. Only failures the caller classifies as
//! retryable are tried again; anything else is returned at once.
//!
//! ```rust
//! use age_saga_runtime::retry::RetryPolicy;
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), String> {
//! let policy = RetryPolicy::builder()
//!     .max_retries(5)
//!     .initial_delay(Duration::from_millis(100))
//!     .max_delay(Duration::from_secs(10))
//!     .build();
//!
//! let offset = policy
//!     .retry(|| async { Ok::<_, String>(42) }, |err: &String| err.contains("timeout"))
//!     .await?;
//! assert_eq!(offset, 42);
//! # Ok(())
//! # }
//! ```

use rand::Rng;
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

/// Backoff settings.
///
/// Defaults: 3 retries, 100 ms initial delay doubling up to 30 s, 10% jitter.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Retries after the first try
    pub max_retries: u32,
    /// Delay before the first retry
    pub initial_delay: Duration,
    /// Upper bound of any delay
    pub max_delay: Duration,
    /// Growth factor between consecutive delays
    pub multiplier: f64,
    /// Random spread as a fraction of the delay, clamped to `0.0..=1.0`
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl RetryPolicy {
    /// Builder starting from the defaults.
    #[must_use]
    pub const fn builder() -> RetryPolicyBuilder {
        RetryPolicyBuilder {
            policy: Self {
                max_retries: 3,
                initial_delay: Duration::from_millis(100),
                max_delay: Duration::from_secs(30),
                multiplier: 2.0,
                jitter: 0.1,
            },
        }
    }

    /// Try exactly once.
    #[must_use]
    pub const fn no_retry() -> Self {
        Self {
            max_retries: 0,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            multiplier: 1.0,
            jitter: 0.0,
        }
    }

    /// Delay before retry `retry` (0-based), without jitter.
    #[must_use]
    pub fn backoff(&self, retry: u32) -> Duration {
        let exponent = i32::try_from(retry).unwrap_or(i32::MAX);
        let secs = self.initial_delay.as_secs_f64() * self.multiplier.powi(exponent);

        if !secs.is_finite() || secs >= self.max_delay.as_secs_f64() {
            self.max_delay
        } else if secs <= 0.0 {
            Duration::ZERO
        } else {
            Duration::from_secs_f64(secs)
        }
    }

    /// [`backoff`](Self::backoff) shifted randomly by up to `jitter` of itself.
    #[must_use]
    pub fn backoff_with_jitter(&self, retry: u32) -> Duration {
        let delay = self.backoff(retry);
        let jitter = self.jitter.clamp(0.0, 1.0);
        if jitter.is_nan() || jitter <= 0.0 || delay.is_zero() {
            return delay;
        }

        let spread = delay.as_secs_f64() * jitter;
        let shift = rand::thread_rng().gen_range(-spread..=spread);
        Duration::from_secs_f64((delay.as_secs_f64() + shift).max(0.0))
    }

    /// Run `operation`, retrying while `retryable` accepts the error and
    /// retries remain.
    ///
    /// # Errors
    ///
    /// The first error `retryable` rejects, or the last one once the retries
    /// are spent.
    pub async fn retry<F, Fut, T, E, P>(&self, mut operation: F, retryable: P) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
        P: Fn(&E) -> bool,
    {
        let mut retries = 0;
        loop {
            let err = match operation().await {
                Ok(value) => {
                    if retries > 0 {
                        tracing::info!(retries, "Succeeded after retrying");
                    }
                    return Ok(value);
                }
                Err(err) => err,
            };

            if !retryable(&err) {
                tracing::warn!(error = %err, "Permanent failure, not retrying");
                return Err(err);
            }
            if retries >= self.max_retries {
                tracing::error!(retries, error = %err, "Giving up after retries");
                return Err(err);
            }

            let delay = self.backoff_with_jitter(retries);
            tracing::warn!(
                retry = retries + 1,
                delay_ms = delay.as_millis(),
                error = %err,
                "Transient failure, retrying"
            );
            tokio::time::sleep(delay).await;
            retries += 1;
        }
    }
}

/// Builder for [`RetryPolicy`].
#[derive(Debug, Clone)]
pub struct RetryPolicyBuilder {
    policy: RetryPolicy,
}

impl RetryPolicyBuilder {
    /// Retries after the first try.
    #[must_use]
    pub const fn max_retries(mut self, max_retries: u32) -> Self {
        self.policy.max_retries = max_retries;
        self
    }

    /// Delay before the first retry.
    #[must_use]
    pub const fn initial_delay(mut self, delay: Duration) -> Self {
        self.policy.initial_delay = delay;
        self
    }

    /// Upper bound of any delay.
    #[must_use]
    pub const fn max_delay(mut self, delay: Duration) -> Self {
        self.policy.max_delay = delay;
        self
    }

    /// Growth factor between consecutive delays.
    #[must_use]
    pub const fn multiplier(mut self, multiplier: f64) -> Self {
        self.policy.multiplier = multiplier;
        self
    }

    /// Random spread; `0.0` disables it.
    #[must_use]
    pub const fn jitter(mut self, jitter: f64) -> Self {
        self.policy.jitter = jitter;
        self
    }

    /// Finish the policy.
    #[must_use]
    pub const fn build(self) -> RetryPolicy {
        self.policy
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Debug, Clone, PartialEq)]
    enum BrokerError {
        Timeout,
        TopicMissing,
    }

    impl Display for BrokerError {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "{self:?}")
        }
    }

    fn transient(err: &BrokerError) -> bool {
        *err == BrokerError::Timeout
    }

    fn quick(max_retries: u32) -> RetryPolicy {
        RetryPolicy::builder()
            .max_retries(max_retries)
            .initial_delay(Duration::from_millis(2))
            .jitter(0.0)
            .build()
    }

    /// Fail with `errors` in order, then succeed.
    async fn flaky(
        policy: &RetryPolicy,
        errors: Vec<BrokerError>,
    ) -> (Result<u32, BrokerError>, u32) {
        let calls = AtomicU32::new(0);
        let errors = std::sync::Mutex::new(errors.into_iter());
        let result = policy
            .retry(
                || {
                    calls.fetch_add(1, Ordering::SeqCst);
                    let next = errors.lock().map(|mut e| e.next()).unwrap_or(None);
                    async move { next.map_or(Ok(7), Err) }
                },
                transient,
            )
            .await;
        (result, calls.load(Ordering::SeqCst))
    }

    #[test]
    fn backoff_doubles_then_caps() {
        let policy = RetryPolicy::builder()
            .initial_delay(Duration::from_millis(100))
            .max_delay(Duration::from_millis(500))
            .build();

        let delays: Vec<u128> = (0..5).map(|n| policy.backoff(n).as_millis()).collect();
        assert_eq!(delays, vec![100, 200, 400, 500, 500]);
        assert_eq!(policy.backoff(u32::MAX), Duration::from_millis(500));
    }

    proptest! {
        #[test]
        fn jitter_stays_within_spread(retry in 0u32..8, jitter in 0.0f64..1.0) {
            let policy = RetryPolicy::builder().jitter(jitter).build();
            let base = policy.backoff(retry).as_secs_f64();
            let delay = policy.backoff_with_jitter(retry).as_secs_f64();
            prop_assert!(delay >= base * (1.0 - jitter) - 1e-9);
            prop_assert!(delay <= base * (1.0 + jitter) + 1e-9);
        }
    }

    #[tokio::test]
    async fn transient_errors_are_retried() {
        let (result, calls) =
            flaky(&quick(3), vec![BrokerError::Timeout, BrokerError::Timeout]).await;

        assert_eq!(result, Ok(7));
        assert_eq!(calls, 3);
    }

    #[tokio::test]
    async fn retries_are_bounded() {
        let (result, calls) = flaky(&quick(1), vec![BrokerError::Timeout; 3]).await;

        assert_eq!(result, Err(BrokerError::Timeout));
        assert_eq!(calls, 2);
    }

    #[tokio::test]
    async fn permanent_errors_fail_fast() {
        let (result, calls) = flaky(&quick(3), vec![BrokerError::TopicMissing]).await;

        assert_eq!(result, Err(BrokerError::TopicMissing));
        assert_eq!(calls, 1);
    }

    #[tokio::test]
    async fn no_retry_tries_once() {
        let (result, calls) = flaky(&RetryPolicy::no_retry(), vec![BrokerError::Timeout]).await;

        assert_eq!(result, Err(BrokerError::Timeout));
        assert_eq!(calls, 1);
    }
}
