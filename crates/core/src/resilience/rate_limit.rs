//! Token-bucket rate limiter.
//!
//! One bucket per named policy. Tokens refill continuously at
//! `requests_per_minute / 60` per second up to `burst_size`. `acquire`
//! grants immediately when a token is available, otherwise waits up to the
//! caller's deadline and returns `RateLimitExceeded` on expiry.

use crate::config::RateLimitConfig;
use crate::ctx::OpContext;
use crate::error::{Error, ErrorKind, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

#[derive(Debug)]
struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

/// Token bucket serialized by a per-instance lock; never held across waits.
#[derive(Clone)]
pub struct RateLimiter {
    name: Arc<str>,
    config: RateLimitConfig,
    bucket: Arc<Mutex<Bucket>>,
}

impl RateLimiter {
    pub fn new(name: impl Into<Arc<str>>, config: RateLimitConfig) -> Self {
        let tokens = config.burst_size as f64;
        Self {
            name: name.into(),
            config,
            bucket: Arc::new(Mutex::new(Bucket { tokens, last_refill: Instant::now() })),
        }
    }

    fn rate_per_second(&self) -> f64 {
        self.config.requests_per_minute as f64 / 60.0
    }

    /// Take one token, waiting for refill if necessary. Cancellation and
    /// deadline expiry surface while waiting, not while holding the lock.
    pub async fn acquire(&self, ctx: &OpContext) -> Result<()> {
        loop {
            ctx.check("rate_limit.acquire")?;
            let wait = {
                let mut bucket = self.bucket.lock().await;
                self.refill(&mut bucket);
                if bucket.tokens >= 1.0 {
                    bucket.tokens -= 1.0;
                    return Ok(());
                }
                // Time until one full token accumulates.
                Duration::from_secs_f64((1.0 - bucket.tokens) / self.rate_per_second())
            };

            if let Some(remaining) = ctx.remaining() {
                if wait > remaining {
                    // The deadline will pass before a token frees up; wait it
                    // out and report the limit.
                    ctx.sleep(remaining, "rate_limit.acquire").await.ok();
                    return Err(self.exceeded_error());
                }
            }
            if let Err(err) = ctx.sleep(wait, "rate_limit.acquire").await {
                // Explicit cancellation keeps its own error; deadline expiry
                // is reported as the rate limit.
                return Err(if ctx.is_cancelled() { err } else { self.exceeded_error() });
            }
        }
    }

    /// Non-waiting variant used by callers that degrade instead of queueing.
    pub async fn try_acquire(&self) -> bool {
        let mut bucket = self.bucket.lock().await;
        self.refill(&mut bucket);
        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    fn refill(&self, bucket: &mut Bucket) {
        let now = Instant::now();
        let elapsed = now.duration_since(bucket.last_refill).as_secs_f64();
        bucket.tokens =
            (bucket.tokens + elapsed * self.rate_per_second()).min(self.config.burst_size as f64);
        bucket.last_refill = now;
    }

    fn exceeded_error(&self) -> Error {
        Error::new(ErrorKind::RateLimitExceeded, format!("rate limit exceeded: {}", self.name))
            .with_component("rate_limiter")
            .with_resource(self.name.to_string())
    }
}
