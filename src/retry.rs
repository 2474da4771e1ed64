//! Bounded exponential backoff with jitter.
//!
//! `retry` drives an async operation through a [`RetryPolicy`]: transient
//! failures (as judged by the caller's predicate) sleep and retry, anything
//! else returns immediately. The jitter spreads simultaneous retries so a
//! shared dependency is not hammered in lockstep.

use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, the first one included.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
    /// Jitter fraction in `[0, 1]`: each delay is scaled by `1 ± jitter`.
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(10),
            multiplier: 2.0,
            jitter: 0.2,
        }
    }
}

impl RetryPolicy {
    /// Backoff delay before retry attempt `attempt` (1-based), jitter applied.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = self.base_delay.as_secs_f64() * self.multiplier.powi(attempt as i32 - 1);
        let capped = exp.min(self.max_delay.as_secs_f64());
        let factor = 1.0 + self.jitter * (fastrand::f64() * 2.0 - 1.0);
        Duration::from_secs_f64((capped * factor).max(0.0))
    }
}

/// Run `op`, retrying transient failures up to the policy's attempt budget.
///
/// `is_transient` decides whether an error is retryable; a `false` verdict
/// returns the error immediately. The final transient error is returned when
/// the budget runs out.
pub async fn retry<T, E, F, Fut>(
    policy: &RetryPolicy,
    is_transient: impl Fn(&E) -> bool,
    mut op: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                if attempt >= policy.max_attempts || !is_transient(&err) {
                    return Err(err);
                }
                let delay = policy.delay_for(attempt);
                debug!(attempt, delay_ms = delay.as_millis() as u64, error = %err, "retrying after transient failure");
                sleep(delay).await;
                attempt += 1;
            }
        }
    }
}
