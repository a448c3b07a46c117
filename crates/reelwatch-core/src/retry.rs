//! Exponential backoff around outbound calls.
//!
//! ```text
//! attempt 1 --[transient]--> sleep(base) --> attempt 2 --[transient]--> sleep(base * m) --> ...
//!     |                                          |
//!     +--[permanent]--> Err(inner)               +--[budget spent]--> Err(RetryExhausted)
//! ```
//!
//! Transient vs permanent is decided by [`AppError::is_retryable`]. The
//! client holds only read-only configuration, so one instance can serve
//! concurrent independent calls.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;

use crate::error::AppError;

/// Backoff parameters for one kind of outbound call.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts including the first one. At least 1.
    pub max_attempts: u32,
    /// Delay after the first failed attempt.
    pub base_delay: Duration,
    /// Growth factor per attempt. Values below 1.0 are treated as 1.0.
    pub multiplier: f64,
    /// Upper bound for a single delay before jitter.
    pub max_delay: Duration,
    /// Give up early if the next sleep would end past this budget.
    pub max_elapsed: Option<Duration>,
    /// Maximum random jitter added to each delay (uniform [0, jitter)).
    pub jitter: Duration,
}

impl Default for RetryPolicy {
    /// 3 attempts, 5s doubling delay capped at 5 minutes, no jitter.
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(5),
            multiplier: 2.0,
            max_delay: Duration::from_secs(300),
            max_elapsed: None,
            jitter: Duration::ZERO,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
            ..Default::default()
        }
    }

    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier;
        self
    }

    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    pub fn with_max_elapsed(mut self, max_elapsed: Duration) -> Self {
        self.max_elapsed = Some(max_elapsed);
        self
    }

    pub fn with_jitter(mut self, jitter: Duration) -> Self {
        self.jitter = jitter;
        self
    }

    /// Delay to wait after failed attempt number `attempt` (1-indexed),
    /// without jitter: `base_delay * multiplier^(attempt-1)`, capped.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let factor = self.multiplier.max(1.0).powi(exponent);
        let secs = self.base_delay.as_secs_f64() * factor;
        let cap = self.max_delay.as_secs_f64();
        if secs.is_finite() && secs < cap {
            Duration::from_secs_f64(secs)
        } else {
            self.max_delay
        }
    }

    fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }

    fn jittered(&self, delay: Duration) -> Duration {
        if self.jitter.is_zero() {
            return delay;
        }
        delay + Duration::from_millis(rand_jitter_ms(self.jitter.as_millis() as u64))
    }
}

/// Runs an operation under a [`RetryPolicy`].
#[derive(Debug, Clone)]
pub struct RetryingClient {
    name: String,
    policy: RetryPolicy,
}

impl RetryingClient {
    pub fn new(name: impl Into<String>, policy: RetryPolicy) -> Self {
        Self {
            name: name.into(),
            policy,
        }
    }

    /// Execute `operation` until it succeeds, fails permanently, or the
    /// attempt/elapsed budget is spent.
    ///
    /// - Success: returns the value.
    /// - Permanent failure: returns that error after a single attempt.
    /// - Budget spent: returns [`AppError::RetryExhausted`] with the last error.
    ///
    /// Delays between attempts never decrease, even with jitter.
    pub async fn execute<F, Fut, T>(&self, mut operation: F) -> Result<T, AppError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, AppError>>,
    {
        let started = Instant::now();
        let max_attempts = self.policy.attempts();
        let mut previous_delay = Duration::ZERO;
        let mut attempt = 0;

        loop {
            attempt += 1;
            let error = match operation().await {
                Ok(value) => {
                    if attempt > 1 {
                        tracing::info!(call = %self.name, attempt, "Succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(e) => e,
            };

            if !error.is_retryable() {
                tracing::warn!(call = %self.name, attempt, %error, "Permanent failure, not retrying");
                return Err(error);
            }

            if attempt >= max_attempts {
                tracing::error!(call = %self.name, attempts = attempt, %error, "Max attempts reached");
                return Err(AppError::RetryExhausted {
                    attempts: attempt,
                    last: Box::new(error),
                });
            }

            let delay = self
                .policy
                .jittered(self.policy.delay_for_attempt(attempt))
                .max(previous_delay);

            if let Some(budget) = self.policy.max_elapsed
                && started.elapsed() + delay > budget
            {
                tracing::error!(
                    call = %self.name,
                    attempts = attempt,
                    budget_secs = budget.as_secs(),
                    %error,
                    "Retry time budget exhausted"
                );
                return Err(AppError::RetryExhausted {
                    attempts: attempt,
                    last: Box::new(error),
                });
            }

            tracing::warn!(
                call = %self.name,
                attempt,
                delay_ms = delay.as_millis() as u64,
                %error,
                "Attempt failed, retrying"
            );
            tokio::time::sleep(delay).await;
            previous_delay = delay;
        }
    }
}

// ---------------------------------------------------------------------------
// Jitter from a time-seeded xorshift; not suitable for anything but spreading
// retries.
// ---------------------------------------------------------------------------

fn rand_jitter_ms(max_ms: u64) -> u64 {
    if max_ms == 0 {
        return 0;
    }
    let mut x = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos() as u64;
    // xorshift64
    x ^= x << 13;
    x ^= x >> 7;
    x ^= x << 17;
    x % max_ms
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy::new(max_attempts, Duration::from_millis(100))
            .with_multiplier(2.0)
            .with_max_delay(Duration::from_secs(10))
    }

    /// Runs `execute` with an operation that fails transiently `failures`
    /// times, recording the (virtual) instant of every attempt.
    async fn run_flaky(
        client: &RetryingClient,
        failures: u32,
        error: fn() -> AppError,
    ) -> (Result<u32, AppError>, Vec<Instant>) {
        let attempts = Arc::new(Mutex::new(Vec::new()));
        let result = client
            .execute(|| {
                let attempts = attempts.clone();
                async move {
                    let mut log = attempts.lock().unwrap();
                    log.push(Instant::now());
                    let n = log.len() as u32;
                    if n <= failures { Err(error()) } else { Ok(n) }
                }
            })
            .await;
        let log = attempts.lock().unwrap().clone();
        (result, log)
    }

    fn gaps(instants: &[Instant]) -> Vec<Duration> {
        instants.windows(2).map(|w| w[1] - w[0]).collect()
    }

    #[test]
    fn delay_schedule_is_exponential_and_capped() {
        let policy = RetryPolicy::new(10, Duration::from_secs(5))
            .with_multiplier(2.0)
            .with_max_delay(Duration::from_secs(30));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_secs(5));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_secs(10));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_secs(20));
        assert_eq!(policy.delay_for_attempt(4), Duration::from_secs(30));
        assert_eq!(policy.delay_for_attempt(200), Duration::from_secs(30));
    }

    #[test]
    fn multiplier_below_one_does_not_shrink_delays() {
        let policy = RetryPolicy::new(5, Duration::from_secs(4)).with_multiplier(0.5);
        assert_eq!(policy.delay_for_attempt(3), Duration::from_secs(4));
    }

    #[tokio::test(start_paused = true)]
    async fn succeeds_after_k_transient_failures() {
        let client = RetryingClient::new("test", fast_policy(5));
        let (result, attempts) =
            run_flaky(&client, 2, || AppError::NetworkError("reset".into())).await;

        assert_eq!(result.unwrap(), 3);
        assert_eq!(attempts.len(), 3);
        assert_eq!(
            gaps(&attempts),
            vec![Duration::from_millis(100), Duration::from_millis(200)]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn always_transient_exhausts_after_max_attempts() {
        let client = RetryingClient::new("test", fast_policy(4));
        let (result, attempts) = run_flaky(&client, u32::MAX, || AppError::Timeout(10)).await;

        assert_eq!(attempts.len(), 4);
        match result.unwrap_err() {
            AppError::RetryExhausted { attempts, last } => {
                assert_eq!(attempts, 4);
                assert!(matches!(*last, AppError::Timeout(10)));
            }
            other => panic!("expected RetryExhausted, got {other:?}"),
        }
        let delays = gaps(&attempts);
        assert!(delays.windows(2).all(|w| w[0] <= w[1]));
    }

    #[tokio::test(start_paused = true)]
    async fn permanent_failure_is_not_retried() {
        let client = RetryingClient::new("test", fast_policy(5));
        let (result, attempts) = run_flaky(&client, u32::MAX, || AppError::http(401, "nope")).await;

        assert_eq!(attempts.len(), 1);
        assert!(matches!(
            result.unwrap_err(),
            AppError::HttpError {
                status_code: 401,
                ..
            }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn single_attempt_policy_never_sleeps() {
        let client = RetryingClient::new("test", fast_policy(1));
        let start = Instant::now();
        let (result, attempts) = run_flaky(&client, 1, || AppError::RateLimitExceeded).await;

        assert_eq!(attempts.len(), 1);
        assert!(matches!(
            result.unwrap_err(),
            AppError::RetryExhausted { attempts: 1, .. }
        ));
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn elapsed_budget_stops_before_attempt_limit() {
        // Delays 100, 200, 400ms; a 250ms budget only allows the first sleep.
        let policy = fast_policy(10).with_max_elapsed(Duration::from_millis(250));
        let client = RetryingClient::new("test", policy);
        let (result, attempts) =
            run_flaky(&client, u32::MAX, || AppError::NetworkError("down".into())).await;

        assert_eq!(attempts.len(), 2);
        assert!(matches!(
            result.unwrap_err(),
            AppError::RetryExhausted { attempts: 2, .. }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn jittered_delays_stay_bounded_and_non_decreasing() {
        let policy = fast_policy(6)
            .with_multiplier(1.0)
            .with_jitter(Duration::from_millis(50));
        let client = RetryingClient::new("test", policy);
        let (_, attempts) =
            run_flaky(&client, u32::MAX, || AppError::NetworkError("down".into())).await;

        let delays = gaps(&attempts);
        assert_eq!(delays.len(), 5);
        assert!(delays.windows(2).all(|w| w[0] <= w[1]));
        for d in delays {
            assert!(d >= Duration::from_millis(100));
            assert!(d < Duration::from_millis(150));
        }
    }

    #[test]
    fn jitter_is_bounded() {
        for _ in 0..100 {
            assert!(rand_jitter_ms(50) < 50);
        }
        assert_eq!(rand_jitter_ms(0), 0);
    }
}
