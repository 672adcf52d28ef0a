//! Exponential-backoff retry policy (SPEC_FULL.md §5 "Cancellation & timeout
//! semantics"): initial 1s, multiplier 2.0, cap 30s, additive jitter ≤ 100ms,
//! default max 3 attempts for external APIs.

use feedback_errors::ActivityError;
use rand::Rng;
use std::future::Future;
use std::time::Duration;

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub initial: Duration,
    pub multiplier: f64,
    pub cap: Duration,
    pub jitter_max: Duration,
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial: Duration::from_secs(1),
            multiplier: 2.0,
            cap: Duration::from_secs(30),
            jitter_max: Duration::from_millis(100),
            max_attempts: 3,
        }
    }
}

impl RetryPolicy {
    /// The base delay before the `attempt`-th retry (0-indexed: `attempt = 0`
    /// is the delay before the first retry), before jitter.
    pub fn base_delay_for_attempt(&self, attempt: u32) -> Duration {
        let scaled = self.initial.as_secs_f64() * self.multiplier.powi(attempt as i32);
        Duration::from_secs_f64(scaled.min(self.cap.as_secs_f64()))
    }

    fn delay_with_jitter(&self, attempt: u32) -> Duration {
        let base = self.base_delay_for_attempt(attempt);
        let jitter_ms = rand::thread_rng().gen_range(0..=self.jitter_max.as_millis() as u64);
        base + Duration::from_millis(jitter_ms)
    }
}

/// Runs `f` until it succeeds, a non-retriable error is returned, or
/// `policy.max_attempts` total attempts have been made. Sleeps between
/// attempts using exponential backoff with jitter.
pub async fn retry<F, Fut, T>(policy: &RetryPolicy, mut f: F) -> Result<T, ActivityError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ActivityError>>,
{
    let mut attempt = 0;
    loop {
        match f().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_retriable() && attempt + 1 < policy.max_attempts => {
                let delay = policy.delay_with_jitter(attempt);
                tracing::warn!(
                    attempt,
                    max_attempts = policy.max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "activity call failed, retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}
