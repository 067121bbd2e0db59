//! Bounded retry with exponential backoff.
//!
//! The policy is a plain value handed to whoever performs I/O; the business
//! logic only decides whether a failed attempt is worth repeating.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use tracing::warn;

/// Outcome of one failed attempt.
#[derive(Debug)]
pub enum Attempt<E> {
    /// Transient failure, try again if the budget allows
    Retry(E),
    /// Permanent failure, stop immediately
    Abort(E),
}

/// Final failure after [`RetryPolicy::run`] gave up.
#[derive(Debug)]
pub struct Exhausted<E> {
    pub attempts: u32,
    pub last: E,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one. At least 1.
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub multiplier: f64,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(2000),
            multiplier: 2.0,
            max_backoff: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// A policy that retries `max_attempts` times without sleeping.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            initial_backoff: Duration::ZERO,
            multiplier: 1.0,
            max_backoff: Duration::ZERO,
        }
    }

    /// Delay to wait after the `failures`-th consecutive failure (1-based):
    /// `initial * multiplier^(failures-1)`, capped at `max_backoff`.
    pub fn delay_for(&self, failures: u32) -> Duration {
        if failures == 0 {
            return Duration::ZERO;
        }
        let factor = self.multiplier.max(1.0).powi(failures.saturating_sub(1) as i32);
        let secs = self.initial_backoff.as_secs_f64() * factor;
        if !secs.is_finite() || secs >= self.max_backoff.as_secs_f64() {
            self.max_backoff
        } else {
            Duration::from_secs_f64(secs)
        }
    }

    /// Run `op` until it succeeds, aborts, or the attempt budget is spent.
    ///
    /// `op` receives the 1-based attempt number.
    pub async fn run<T, E, F, Fut>(&self, what: &str, mut op: F) -> std::result::Result<T, Exhausted<E>>
    where
        E: Display,
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = std::result::Result<T, Attempt<E>>>,
    {
        let max = self.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(Attempt::Abort(last)) => return Err(Exhausted { attempts: attempt, last }),
                Err(Attempt::Retry(last)) if attempt >= max => {
                    return Err(Exhausted { attempts: attempt, last });
                }
                Err(Attempt::Retry(err)) => {
                    let delay = self.delay_for(attempt);
                    warn!(%what, attempt, max, ?delay, error = %err, "attempt failed, retrying");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}
