//! Resilience envelope for outbound calls.
//!
//! Every third-party call goes through [`ResilienceManager::execute`], which
//! composes `RateLimit → CircuitBreak → Retry → Timeout → call`. Call sites
//! select a predefined policy by name; limiter and breaker state is shared
//! per name across the process.

pub mod circuit_breaker;
pub mod rate_limit;
pub mod retry;

pub use circuit_breaker::{CircuitBreaker, CircuitState};
pub use rate_limit::RateLimiter;
pub use retry::{BackoffStrategy, Retrier};

use crate::config::{CircuitBreakerConfig, RateLimitConfig};
use crate::ctx::OpContext;
use crate::error::{Error, Result};
use once_cell::sync::Lazy;
use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;
use tokio::sync::RwLock;

/// A named bundle of limiter, breaker, retry and timeout settings.
#[derive(Debug, Clone)]
pub struct ResiliencePolicy {
    pub name: &'static str,
    pub rate_limit: RateLimitConfig,
    pub circuit_breaker: CircuitBreakerConfig,
    pub max_attempts: u32,
    pub backoff: BackoffStrategy,
    /// Per-attempt deadline.
    pub timeout: Duration,
}

fn rate(requests_per_minute: u32, burst_size: u32) -> RateLimitConfig {
    RateLimitConfig { requests_per_minute, burst_size, cleanup_interval_secs: 300 }
}

fn breaker(failure_threshold: u32, reset_timeout_secs: u64) -> CircuitBreakerConfig {
    CircuitBreakerConfig { failure_threshold, reset_timeout_secs, half_open_probes: 1 }
}

static POLICIES: Lazy<HashMap<&'static str, ResiliencePolicy>> = Lazy::new(|| {
    let mut m = HashMap::new();
    for policy in [
        ResiliencePolicy {
            name: "fast",
            rate_limit: rate(600, 50),
            circuit_breaker: breaker(5, 10),
            max_attempts: 2,
            backoff: BackoffStrategy::Fixed { delay: Duration::from_millis(50) },
            timeout: Duration::from_secs(2),
        },
        ResiliencePolicy {
            name: "standard",
            rate_limit: rate(300, 30),
            circuit_breaker: breaker(5, 30),
            max_attempts: 3,
            backoff: BackoffStrategy::Exponential {
                initial: Duration::from_millis(100),
                factor: 2.0,
                max: Duration::from_secs(5),
                jitter: true,
            },
            timeout: Duration::from_secs(10),
        },
        ResiliencePolicy {
            name: "slow",
            rate_limit: rate(60, 10),
            circuit_breaker: breaker(5, 60),
            max_attempts: 3,
            backoff: BackoffStrategy::Exponential {
                initial: Duration::from_millis(500),
                factor: 2.0,
                max: Duration::from_secs(15),
                jitter: true,
            },
            timeout: Duration::from_secs(60),
        },
        ResiliencePolicy {
            name: "external_api",
            rate_limit: rate(240, 20),
            circuit_breaker: breaker(5, 30),
            max_attempts: 4,
            backoff: BackoffStrategy::DecorrelatedJitter {
                base: Duration::from_millis(200),
                max: Duration::from_secs(10),
            },
            timeout: Duration::from_secs(30),
        },
        ResiliencePolicy {
            name: "database",
            rate_limit: rate(6000, 500),
            circuit_breaker: breaker(10, 15),
            max_attempts: 3,
            backoff: BackoffStrategy::Exponential {
                initial: Duration::from_millis(50),
                factor: 2.0,
                max: Duration::from_secs(2),
                jitter: true,
            },
            timeout: Duration::from_secs(5),
        },
        ResiliencePolicy {
            name: "messaging",
            rate_limit: rate(1200, 100),
            circuit_breaker: breaker(5, 30),
            max_attempts: 5,
            backoff: BackoffStrategy::Exponential {
                initial: Duration::from_millis(100),
                factor: 2.0,
                max: Duration::from_secs(10),
                jitter: true,
            },
            timeout: Duration::from_secs(10),
        },
        ResiliencePolicy {
            name: "ai_provider",
            rate_limit: rate(60, 5),
            circuit_breaker: breaker(3, 60),
            max_attempts: 2,
            backoff: BackoffStrategy::DecorrelatedJitter {
                base: Duration::from_secs(1),
                max: Duration::from_secs(30),
            },
            timeout: Duration::from_secs(120),
        },
    ] {
        m.insert(policy.name, policy);
    }
    m
});

/// Look up a predefined policy by name.
pub fn named_policy(name: &str) -> Result<&'static ResiliencePolicy> {
    POLICIES.get(name).ok_or_else(|| {
        Error::not_found(format!("resilience policy '{name}'")).with_component("resilience")
    })
}

/// Holds per-policy limiter and breaker instances. Construct one in the
/// composition root and pass it by reference; there is no global singleton.
pub struct ResilienceManager {
    limiters: RwLock<HashMap<&'static str, RateLimiter>>,
    breakers: RwLock<HashMap<&'static str, CircuitBreaker>>,
}

impl ResilienceManager {
    pub fn new() -> Self {
        Self { limiters: RwLock::new(HashMap::new()), breakers: RwLock::new(HashMap::new()) }
    }

    async fn limiter(&self, policy: &'static ResiliencePolicy) -> RateLimiter {
        if let Some(limiter) = self.limiters.read().await.get(policy.name) {
            return limiter.clone();
        }
        let mut limiters = self.limiters.write().await;
        limiters
            .entry(policy.name)
            .or_insert_with(|| RateLimiter::new(policy.name, policy.rate_limit.clone()))
            .clone()
    }

    async fn breaker(&self, policy: &'static ResiliencePolicy) -> CircuitBreaker {
        if let Some(breaker) = self.breakers.read().await.get(policy.name) {
            return breaker.clone();
        }
        let mut breakers = self.breakers.write().await;
        breakers
            .entry(policy.name)
            .or_insert_with(|| CircuitBreaker::new(policy.name, policy.circuit_breaker.clone()))
            .clone()
    }

    /// Breaker state for a policy, for observability and tests.
    pub async fn breaker_state(&self, policy_name: &str) -> Result<CircuitState> {
        let policy = named_policy(policy_name)?;
        Ok(self.breaker(policy).await.state().await)
    }

    /// Run `op` under the named policy.
    ///
    /// Order of protections: the rate limiter is consulted once per logical
    /// call, the breaker gates every attempt, the retrier re-runs retryable
    /// failures, and each attempt runs under the policy's timeout.
    pub async fn execute<T, F, Fut>(
        &self,
        policy_name: &str,
        ctx: &OpContext,
        operation: &str,
        op: F,
    ) -> Result<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let policy = named_policy(policy_name)?;
        let limiter = self.limiter(policy).await;
        let breaker = self.breaker(policy).await;

        limiter.acquire(ctx).await?;

        let retrier = Retrier::new(policy.max_attempts, policy.backoff.clone());
        retrier
            .run(ctx, operation, |_attempt| {
                let breaker = breaker.clone();
                let attempt_ctx = ctx.with_timeout(policy.timeout);
                let op = &op;
                async move {
                    // An open breaker never invokes the remote.
                    breaker.acquire().await?;
                    let outcome = attempt_ctx.run(operation, op()).await;
                    match &outcome {
                        Ok(_) => breaker.record_success().await,
                        Err(err) if err.kind.category() == "infrastructure" => {
                            breaker.record_failure().await
                        }
                        // Caller-side failures (validation, domain
                        // preconditions) say nothing about the dependency.
                        Err(_) => {}
                    }
                    outcome
                }
            })
            .await
    }
}

impl Default for ResilienceManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn all_named_policies_resolve() {
        for name in
            ["fast", "standard", "slow", "external_api", "database", "messaging", "ai_provider"]
        {
            assert!(named_policy(name).is_ok(), "missing policy {name}");
        }
        assert_eq!(named_policy("bogus").unwrap_err().kind, ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn execute_passes_through_success() {
        let manager = ResilienceManager::new();
        let ctx = OpContext::background();
        let result = manager
            .execute("fast", &ctx, "echo", || async { Ok::<_, Error>(7) })
            .await
            .unwrap();
        assert_eq!(result, 7);
    }

    #[tokio::test(start_paused = true)]
    async fn execute_retries_infrastructure_failures() {
        let manager = ResilienceManager::new();
        let ctx = OpContext::background();
        let calls = AtomicU32::new(0);
        let result = manager
            .execute("standard", &ctx, "flaky", || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n == 0 {
                        Err(Error::new(ErrorKind::Network, "reset"))
                    } else {
                        Ok(n)
                    }
                }
            })
            .await
            .unwrap();
        assert_eq!(result, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn breaker_trips_after_threshold_and_fails_fast() {
        let manager = ResilienceManager::new();
        let ctx = OpContext::background();
        let calls = AtomicU32::new(0);

        // "ai_provider" trips after 3 consecutive failures; 2 attempts per
        // execute means two calls exhaust the budget and a third opens it.
        for _ in 0..2 {
            let _ = manager
                .execute("ai_provider", &ctx, "down", || {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async { Err::<(), _>(Error::new(ErrorKind::Network, "down")) }
                })
                .await;
        }
        assert_eq!(manager.breaker_state("ai_provider").await.unwrap(), CircuitState::Open);

        let invoked_before = calls.load(Ordering::SeqCst);
        let err = manager
            .execute("ai_provider", &ctx, "down", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Ok::<(), _>(()) }
            })
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::CircuitOpen);
        // The remote was never invoked while open.
        assert_eq!(calls.load(Ordering::SeqCst), invoked_before);
    }

    #[tokio::test]
    async fn domain_errors_do_not_trip_the_breaker() {
        let manager = ResilienceManager::new();
        let ctx = OpContext::background();
        for _ in 0..10 {
            let _ = manager
                .execute("fast", &ctx, "validate", || async {
                    Err::<(), _>(Error::new(ErrorKind::InvalidInput, "bad sku"))
                })
                .await;
        }
        assert_eq!(manager.breaker_state("fast").await.unwrap(), CircuitState::Closed);
    }
}
