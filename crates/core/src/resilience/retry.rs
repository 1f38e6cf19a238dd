//! Retry executor with pluggable backoff.
//!
//! Only errors whose recovery classification is `Retryable` are retried;
//! everything else surfaces on the first failure. Backoff sleeps are
//! cancellation-aware through [`OpContext::sleep`].

use crate::ctx::OpContext;
use crate::error::{Error, Result};
use rand::Rng;
use std::future::Future;
use std::time::Duration;

/// Deferral strategy between attempts.
#[derive(Debug, Clone, PartialEq)]
pub enum BackoffStrategy {
    /// Constant delay between attempts.
    Fixed { delay: Duration },
    /// Delay grows by `increment` each attempt.
    Linear { initial: Duration, increment: Duration, max: Duration },
    /// Delay multiplies by `factor` each attempt, optionally jittered
    /// uniformly in `[delay/2, delay]`.
    Exponential { initial: Duration, factor: f64, max: Duration, jitter: bool },
    /// AWS decorrelated jitter: `next = uniform(base, last * 3)`, capped.
    DecorrelatedJitter { base: Duration, max: Duration },
}

impl BackoffStrategy {
    /// Delay before attempt `attempt + 1`, given the previous delay.
    /// `attempt` is zero-based (the first failure computes attempt 0).
    pub fn next_delay(&self, attempt: u32, last: Duration) -> Duration {
        match *self {
            BackoffStrategy::Fixed { delay } => delay,
            BackoffStrategy::Linear { initial, increment, max } => {
                (initial + increment * attempt).min(max)
            }
            BackoffStrategy::Exponential { initial, factor, max, jitter } => {
                let scaled = initial.as_secs_f64() * factor.powi(attempt as i32);
                let delay = Duration::from_secs_f64(scaled.min(max.as_secs_f64()));
                if jitter {
                    let mut rng = rand::thread_rng();
                    let low = delay.as_secs_f64() / 2.0;
                    Duration::from_secs_f64(rng.gen_range(low..=delay.as_secs_f64().max(low)))
                } else {
                    delay
                }
            }
            BackoffStrategy::DecorrelatedJitter { base, max } => {
                let mut rng = rand::thread_rng();
                let last = last.max(base);
                let high = (last.as_secs_f64() * 3.0).max(base.as_secs_f64());
                let next = rng.gen_range(base.as_secs_f64()..=high);
                Duration::from_secs_f64(next.min(max.as_secs_f64()))
            }
        }
    }
}

/// Retry policy: attempt budget plus backoff.
#[derive(Debug, Clone)]
pub struct Retrier {
    pub max_attempts: u32,
    pub strategy: BackoffStrategy,
}

impl Retrier {
    pub fn new(max_attempts: u32, strategy: BackoffStrategy) -> Self {
        Self { max_attempts: max_attempts.max(1), strategy }
    }

    /// Run `op` until it succeeds, exhausts the attempt budget, or fails
    /// with a non-retryable error.
    pub async fn run<T, F, Fut>(&self, ctx: &OpContext, operation: &str, mut op: F) -> Result<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut last_delay = Duration::ZERO;
        let mut attempt: u32 = 0;
        loop {
            ctx.check(operation)?;
            match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(err) => {
                    let attempts_left = attempt + 1 < self.max_attempts;
                    if !err.is_retryable() || !attempts_left {
                        return Err(err.with_attempt(attempt + 1));
                    }
                    let delay = self.strategy.next_delay(attempt, last_delay);
                    tracing::debug!(
                        operation,
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "retrying after backoff"
                    );
                    ctx.sleep(delay, operation).await?;
                    last_delay = delay;
                    attempt += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn retryable() -> Error {
        Error::new(ErrorKind::Network, "flaky")
    }

    #[test]
    fn fixed_backoff_is_constant() {
        let s = BackoffStrategy::Fixed { delay: Duration::from_millis(10) };
        assert_eq!(s.next_delay(0, Duration::ZERO), Duration::from_millis(10));
        assert_eq!(s.next_delay(5, Duration::ZERO), Duration::from_millis(10));
    }

    #[test]
    fn linear_backoff_caps_at_max() {
        let s = BackoffStrategy::Linear {
            initial: Duration::from_millis(10),
            increment: Duration::from_millis(20),
            max: Duration::from_millis(50),
        };
        assert_eq!(s.next_delay(0, Duration::ZERO), Duration::from_millis(10));
        assert_eq!(s.next_delay(1, Duration::ZERO), Duration::from_millis(30));
        assert_eq!(s.next_delay(4, Duration::ZERO), Duration::from_millis(50));
    }

    #[test]
    fn exponential_backoff_doubles_without_jitter() {
        let s = BackoffStrategy::Exponential {
            initial: Duration::from_millis(100),
            factor: 2.0,
            max: Duration::from_secs(1),
            jitter: false,
        };
        assert_eq!(s.next_delay(0, Duration::ZERO), Duration::from_millis(100));
        assert_eq!(s.next_delay(1, Duration::ZERO), Duration::from_millis(200));
        assert_eq!(s.next_delay(2, Duration::ZERO), Duration::from_millis(400));
        assert_eq!(s.next_delay(10, Duration::ZERO), Duration::from_secs(1));
    }

    #[test]
    fn decorrelated_jitter_stays_within_bounds() {
        let base = Duration::from_millis(50);
        let max = Duration::from_secs(2);
        let s = BackoffStrategy::DecorrelatedJitter { base, max };
        let mut last = Duration::ZERO;
        for attempt in 0..20 {
            let next = s.next_delay(attempt, last);
            assert!(next >= base, "delay below base: {next:?}");
            assert!(next <= max, "delay above cap: {next:?}");
            last = next;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn retries_retryable_until_success() {
        let calls = AtomicU32::new(0);
        let retrier = Retrier::new(
            5,
            BackoffStrategy::Fixed { delay: Duration::from_millis(1) },
        );
        let result = retrier
            .run(&OpContext::background(), "flaky_op", |_| {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err(retryable())
                    } else {
                        Ok(n)
                    }
                }
            })
            .await;
        assert_eq!(result.unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn non_retryable_fails_immediately() {
        let calls = AtomicU32::new(0);
        let retrier = Retrier::new(
            5,
            BackoffStrategy::Fixed { delay: Duration::from_millis(1) },
        );
        let result: Result<()> = retrier
            .run(&OpContext::background(), "precondition", |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(Error::new(ErrorKind::InsufficientStock, "short by 5")) }
            })
            .await;
        assert_eq!(result.unwrap_err().kind, ErrorKind::InsufficientStock);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn attempt_budget_is_honored() {
        let calls = AtomicU32::new(0);
        let retrier = Retrier::new(
            3,
            BackoffStrategy::Fixed { delay: Duration::from_millis(1) },
        );
        let result: Result<()> = retrier
            .run(&OpContext::background(), "always_down", |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(retryable()) }
            })
            .await;
        let err = result.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Network);
        assert_eq!(err.context.attempt, Some(3));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
