//! Hierarchical configuration for the engine.
//!
//! Values load in order of increasing precedence: `config/default.toml`,
//! then `config/{environment}.toml`, then `ROASTLINE_*` environment
//! variables. Every section rejects unrecognized keys so a typo fails at
//! startup instead of silently using a default.

use config::{ConfigError, Environment, File};
use serde::Deserialize;
use std::env;
use std::time::Duration;

/// Top-level configuration bag. Unknown keys are rejected.
#[derive(Debug, Deserialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Lifetime of an OAuth state entry before the sweeper removes it, seconds.
    #[serde(default = "default_state_timeout_secs")]
    pub state_timeout_secs: u64,
    /// Whether provider tokens are stored encrypted at rest.
    #[serde(default)]
    pub token_encryption: bool,
    /// Whether provider tokens refresh automatically before expiry.
    #[serde(default = "default_true")]
    pub auto_refresh: bool,
    /// How long before expiry a token refresh is scheduled, seconds.
    #[serde(default = "default_refresh_buffer_secs")]
    pub refresh_buffer_secs: u64,

    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub circuit_breaker: CircuitBreakerConfig,
    #[serde(default)]
    pub reorder: ReorderConfig,
}

/// PostgreSQL connection and pool settings for the ledger store.
#[derive(Debug, Deserialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct RateLimitConfig {
    pub requests_per_minute: u32,
    pub burst_size: u32,
    /// How often idle buckets are swept, seconds.
    pub cleanup_interval_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff_factor: f64,
    pub jitter: bool,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    pub reset_timeout_secs: u64,
    pub half_open_probes: u32,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct ReorderConfig {
    /// Interval between automatic reorder evaluations, seconds.
    pub review_cycle_secs: u64,
    /// Days of safety stock the forecast-based policy covers.
    pub safety_stock_days: u32,
    /// Order total above which approval is required.
    pub approval_threshold: f64,
    /// Whether orders above the threshold wait for approval.
    pub require_approval: bool,
}

fn default_state_timeout_secs() -> u64 {
    600
}

fn default_refresh_buffer_secs() -> u64 {
    300
}

fn default_true() -> bool {
    true
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "postgresql://localhost:5432/roastline".to_string(),
            max_connections: 20,
            min_connections: 5,
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self { requests_per_minute: 60, burst_size: 10, cleanup_interval_secs: 300 }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay_ms: 100,
            max_delay_ms: 30_000,
            backoff_factor: 2.0,
            jitter: true,
        }
    }
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self { failure_threshold: 5, reset_timeout_secs: 30, half_open_probes: 1 }
    }
}

impl Default for ReorderConfig {
    fn default() -> Self {
        Self {
            review_cycle_secs: 3600,
            safety_stock_days: 7,
            approval_threshold: 5000.0,
            require_approval: true,
        }
    }
}

impl Config {
    /// Load configuration with environment detection via `ENVIRONMENT`
    /// (development/testing/production, default development).
    pub fn load() -> Result<Self, ConfigError> {
        let environment = env::var("ENVIRONMENT").unwrap_or_else(|_| "development".to_string());

        let builder = config::Config::builder()
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{environment}")).required(false))
            .add_source(Environment::with_prefix("ROASTLINE").separator("__"));

        let loaded: Config = builder.build()?.try_deserialize()?;
        loaded.validate()?;
        Ok(loaded)
    }

    /// Fail fast on values no deployment should run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.state_timeout_secs == 0 {
            return Err(ConfigError::Message("state_timeout must be positive".into()));
        }
        if !self.database.url.starts_with("postgresql://") {
            return Err(ConfigError::Message(
                "database.url must be a postgresql:// connection string".into(),
            ));
        }
        if self.database.min_connections > self.database.max_connections {
            return Err(ConfigError::Message(
                "database.min_connections cannot exceed max_connections".into(),
            ));
        }
        if self.rate_limit.requests_per_minute == 0 || self.rate_limit.burst_size == 0 {
            return Err(ConfigError::Message(
                "rate_limit.requests_per_minute and burst_size must be positive".into(),
            ));
        }
        if self.retry.max_attempts == 0 {
            return Err(ConfigError::Message("retry.max_attempts must be at least 1".into()));
        }
        if self.retry.backoff_factor < 1.0 {
            return Err(ConfigError::Message("retry.backoff_factor must be >= 1.0".into()));
        }
        if self.retry.initial_delay_ms > self.retry.max_delay_ms {
            return Err(ConfigError::Message(
                "retry.initial_delay cannot exceed retry.max_delay".into(),
            ));
        }
        if self.circuit_breaker.failure_threshold == 0 {
            return Err(ConfigError::Message(
                "circuit_breaker.failure_threshold must be at least 1".into(),
            ));
        }
        if self.circuit_breaker.half_open_probes == 0 {
            return Err(ConfigError::Message(
                "circuit_breaker.half_open_probes must be at least 1".into(),
            ));
        }
        if self.reorder.review_cycle_secs == 0 {
            return Err(ConfigError::Message("reorder.review_cycle must be positive".into()));
        }
        if self.reorder.approval_threshold < 0.0 {
            return Err(ConfigError::Message(
                "reorder.approval_threshold cannot be negative".into(),
            ));
        }
        Ok(())
    }

    pub fn state_timeout(&self) -> Duration {
        Duration::from_secs(self.state_timeout_secs)
    }

    pub fn refresh_buffer(&self) -> Duration {
        Duration::from_secs(self.refresh_buffer_secs)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            state_timeout_secs: default_state_timeout_secs(),
            token_encryption: false,
            auto_refresh: true,
            refresh_buffer_secs: default_refresh_buffer_secs(),
            database: DatabaseConfig::default(),
            rate_limit: RateLimitConfig::default(),
            retry: RetryConfig::default(),
            circuit_breaker: CircuitBreakerConfig::default(),
            reorder: ReorderConfig::default(),
        }
    }
}

impl RetryConfig {
    pub fn initial_delay(&self) -> Duration {
        Duration::from_millis(self.initial_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }
}

impl CircuitBreakerConfig {
    pub fn reset_timeout(&self) -> Duration {
        Duration::from_secs(self.reset_timeout_secs)
    }
}

impl ReorderConfig {
    pub fn review_cycle(&self) -> Duration {
        Duration::from_secs(self.review_cycle_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_pass_validation() {
        Config::default().validate().expect("defaults must be valid");
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let toml = r#"
            state_timeout_secs = 300
            totally_unknown = true
        "#;
        let result: Result<Config, _> = config::Config::builder()
            .add_source(File::from_str(toml, config::FileFormat::Toml))
            .build()
            .unwrap()
            .try_deserialize();
        assert!(result.is_err());
    }

    #[test]
    fn nested_unknown_keys_are_rejected() {
        let toml = r#"
            [retry]
            max_attempts = 3
            initial_delay_ms = 10
            max_delay_ms = 100
            backoff_factor = 2.0
            jitter = false
            surprise = 1
        "#;
        let result: Result<Config, _> = config::Config::builder()
            .add_source(File::from_str(toml, config::FileFormat::Toml))
            .build()
            .unwrap()
            .try_deserialize();
        assert!(result.is_err());
    }

    #[test]
    fn zero_attempts_fails_validation() {
        let mut cfg = Config::default();
        cfg.retry.max_attempts = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn backwards_delay_bounds_fail_validation() {
        let mut cfg = Config::default();
        cfg.retry.initial_delay_ms = 60_000;
        cfg.retry.max_delay_ms = 1_000;
        assert!(cfg.validate().is_err());
    }
}
