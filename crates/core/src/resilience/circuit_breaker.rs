//! Three-state circuit breaker: Closed → Open → HalfOpen.
//!
//! Trips after a configured number of consecutive failures. While open,
//! calls fail fast with `CircuitOpen`. After the reset timeout one probe
//! (configurable) is allowed through; probe success closes the breaker,
//! probe failure reopens it.

use crate::config::CircuitBreakerConfig;
use crate::error::{Error, ErrorKind, Result};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    consecutive_failures: u32,
    probes_in_flight: u32,
    opened_at: Option<Instant>,
}

/// Circuit breaker serialized by a per-instance lock; instances are held
/// per policy name by the resilience manager.
#[derive(Clone)]
pub struct CircuitBreaker {
    name: Arc<str>,
    config: CircuitBreakerConfig,
    inner: Arc<Mutex<BreakerInner>>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<Arc<str>>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            inner: Arc::new(Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                probes_in_flight: 0,
                opened_at: None,
            })),
        }
    }

    pub async fn state(&self) -> CircuitState {
        self.inner.lock().await.state
    }

    /// Gate a call. Returns `CircuitOpen` without invoking the remote when
    /// the breaker is open; transitions to half-open once the reset timeout
    /// has elapsed and admits up to `half_open_probes` probes.
    pub async fn acquire(&self) -> Result<()> {
        let mut inner = self.inner.lock().await;
        match inner.state {
            CircuitState::Closed => Ok(()),
            CircuitState::Open => {
                let elapsed_reset = inner
                    .opened_at
                    .is_some_and(|at| at.elapsed() >= self.config.reset_timeout());
                if elapsed_reset {
                    debug!(breaker = %self.name, "circuit half-open, admitting probe");
                    inner.state = CircuitState::HalfOpen;
                    inner.probes_in_flight = 1;
                    Ok(())
                } else {
                    Err(self.open_error())
                }
            }
            CircuitState::HalfOpen => {
                if inner.probes_in_flight < self.config.half_open_probes {
                    inner.probes_in_flight += 1;
                    Ok(())
                } else {
                    Err(self.open_error())
                }
            }
        }
    }

    pub async fn record_success(&self) {
        let mut inner = self.inner.lock().await;
        match inner.state {
            CircuitState::Closed => inner.consecutive_failures = 0,
            CircuitState::HalfOpen => {
                debug!(breaker = %self.name, "probe succeeded, closing circuit");
                inner.state = CircuitState::Closed;
                inner.consecutive_failures = 0;
                inner.probes_in_flight = 0;
                inner.opened_at = None;
            }
            CircuitState::Open => {}
        }
    }

    pub async fn record_failure(&self) {
        let mut inner = self.inner.lock().await;
        match inner.state {
            CircuitState::Closed => {
                inner.consecutive_failures += 1;
                if inner.consecutive_failures >= self.config.failure_threshold {
                    warn!(
                        breaker = %self.name,
                        failures = inner.consecutive_failures,
                        "circuit tripped open"
                    );
                    inner.state = CircuitState::Open;
                    inner.opened_at = Some(Instant::now());
                }
            }
            CircuitState::HalfOpen => {
                warn!(breaker = %self.name, "probe failed, reopening circuit");
                inner.state = CircuitState::Open;
                inner.probes_in_flight = 0;
                inner.opened_at = Some(Instant::now());
            }
            CircuitState::Open => {}
        }
    }

    fn open_error(&self) -> Error {
        Error::new(ErrorKind::CircuitOpen, format!("circuit open: {}", self.name))
            .with_component("circuit_breaker")
            .with_resource(self.name.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn config(threshold: u32, reset_secs: u64) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: threshold,
            reset_timeout_secs: reset_secs,
            half_open_probes: 1,
        }
    }

    #[tokio::test]
    async fn starts_closed_and_permits_calls() {
        let cb = CircuitBreaker::new("test", config(5, 30));
        assert_eq!(cb.state().await, CircuitState::Closed);
        assert!(cb.acquire().await.is_ok());
    }

    #[tokio::test]
    async fn opens_after_consecutive_failures() {
        let cb = CircuitBreaker::new("test", config(3, 30));
        for _ in 0..2 {
            cb.acquire().await.unwrap();
            cb.record_failure().await;
        }
        assert_eq!(cb.state().await, CircuitState::Closed);
        cb.acquire().await.unwrap();
        cb.record_failure().await;
        assert_eq!(cb.state().await, CircuitState::Open);
        assert_eq!(cb.acquire().await.unwrap_err().kind, ErrorKind::CircuitOpen);
    }

    #[tokio::test]
    async fn success_resets_failure_streak() {
        let cb = CircuitBreaker::new("test", config(3, 30));
        cb.record_failure().await;
        cb.record_failure().await;
        cb.record_success().await;
        cb.record_failure().await;
        cb.record_failure().await;
        assert_eq!(cb.state().await, CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn half_open_probe_success_closes() {
        let cb = CircuitBreaker::new("test", config(1, 30));
        cb.acquire().await.unwrap();
        cb.record_failure().await;
        assert_eq!(cb.state().await, CircuitState::Open);

        tokio::time::advance(Duration::from_secs(31)).await;
        cb.acquire().await.unwrap();
        assert_eq!(cb.state().await, CircuitState::HalfOpen);
        // Second call while the probe is out is rejected.
        assert_eq!(cb.acquire().await.unwrap_err().kind, ErrorKind::CircuitOpen);

        cb.record_success().await;
        assert_eq!(cb.state().await, CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn five_failures_trip_then_probe_recovers_after_reset() {
        let cb = CircuitBreaker::new("remote", config(5, 30));
        for _ in 0..5 {
            cb.acquire().await.unwrap();
            cb.record_failure().await;
        }
        assert_eq!(cb.state().await, CircuitState::Open);
        // Sixth call fails fast without reaching the remote.
        assert_eq!(cb.acquire().await.unwrap_err().kind, ErrorKind::CircuitOpen);

        tokio::time::advance(Duration::from_secs(30)).await;
        cb.acquire().await.unwrap();
        cb.record_success().await;
        assert_eq!(cb.state().await, CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn half_open_probe_failure_reopens() {
        let cb = CircuitBreaker::new("test", config(1, 30));
        cb.record_failure().await;
        tokio::time::advance(Duration::from_secs(31)).await;
        cb.acquire().await.unwrap();
        cb.record_failure().await;
        assert_eq!(cb.state().await, CircuitState::Open);
        assert_eq!(cb.acquire().await.unwrap_err().kind, ErrorKind::CircuitOpen);
    }
}
