//! Error taxonomy shared across the engine.
//!
//! Every failure carries a stable [`ErrorKind`], structured [`ErrorContext`]
//! and a recovery classification. Retryability is a property of the error,
//! not of the caller: the resilience envelope consults [`Error::recovery`]
//! and nothing else when deciding whether to retry.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error as ThisError;
use uuid::Uuid;

pub type Result<T> = std::result::Result<T, Error>;

/// How an error kind interacts with the resilience envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Recovery {
    /// Safe to retry with backoff.
    Retryable,
    /// Surface to the caller; retrying cannot help.
    NonRetryable,
    /// Degrade to a fallback path (e.g. local forecast when the predictor is down).
    Fallback,
    /// Stop calling the dependency until its breaker resets.
    CircuitBreak,
}

/// Severity levels used for log routing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

/// Stable error kinds for the whole engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    // Validation
    InvalidInput,
    MissingField,
    ValueOutOfRange,

    // Authentication / authorization
    AuthFailed,
    TokenExpired,
    RateLimitExceeded,

    // Resource
    NotFound,
    AlreadyExists,
    Conflict,
    VersionConflict,

    // Inventory domain
    InsufficientStock,
    InvalidReservation,
    NegativeStock,
    SameLocation,
    ItemInactive,
    OrderCannotTransition,

    // Infrastructure
    Network,
    Timeout,
    StorageUnavailable,
    MessagingUnavailable,

    // Circuit breaker
    CircuitOpen,

    // Internal
    Internal,
    Panic,
}

impl ErrorKind {
    /// Recovery classification for this kind.
    pub fn recovery(self) -> Recovery {
        match self {
            ErrorKind::InvalidInput | ErrorKind::MissingField | ErrorKind::ValueOutOfRange => {
                Recovery::NonRetryable
            }

            ErrorKind::AuthFailed | ErrorKind::TokenExpired => Recovery::NonRetryable,
            // Rate limits clear on their own; retry after backing off.
            ErrorKind::RateLimitExceeded => Recovery::Retryable,

            ErrorKind::NotFound
            | ErrorKind::AlreadyExists
            | ErrorKind::Conflict
            | ErrorKind::VersionConflict => Recovery::NonRetryable,

            ErrorKind::InsufficientStock
            | ErrorKind::InvalidReservation
            | ErrorKind::NegativeStock
            | ErrorKind::SameLocation
            | ErrorKind::ItemInactive
            | ErrorKind::OrderCannotTransition => Recovery::NonRetryable,

            ErrorKind::Network
            | ErrorKind::Timeout
            | ErrorKind::StorageUnavailable
            | ErrorKind::MessagingUnavailable => Recovery::Retryable,

            ErrorKind::CircuitOpen => Recovery::CircuitBreak,

            ErrorKind::Internal | ErrorKind::Panic => Recovery::NonRetryable,
        }
    }

    pub fn is_retryable(self) -> bool {
        matches!(self.recovery(), Recovery::Retryable)
    }

    /// Taxonomy group, used in log fields.
    pub fn category(self) -> &'static str {
        match self {
            ErrorKind::InvalidInput | ErrorKind::MissingField | ErrorKind::ValueOutOfRange => {
                "validation"
            }
            ErrorKind::AuthFailed | ErrorKind::TokenExpired | ErrorKind::RateLimitExceeded => {
                "auth"
            }
            ErrorKind::NotFound
            | ErrorKind::AlreadyExists
            | ErrorKind::Conflict
            | ErrorKind::VersionConflict => "resource",
            ErrorKind::InsufficientStock
            | ErrorKind::InvalidReservation
            | ErrorKind::NegativeStock
            | ErrorKind::SameLocation
            | ErrorKind::ItemInactive
            | ErrorKind::OrderCannotTransition => "inventory",
            ErrorKind::Network
            | ErrorKind::Timeout
            | ErrorKind::StorageUnavailable
            | ErrorKind::MessagingUnavailable => "infrastructure",
            ErrorKind::CircuitOpen => "circuit_breaker",
            ErrorKind::Internal | ErrorKind::Panic => "internal",
        }
    }

    fn default_severity(self) -> Severity {
        match self {
            ErrorKind::Internal | ErrorKind::Panic => Severity::Critical,
            ErrorKind::StorageUnavailable | ErrorKind::MessagingUnavailable => Severity::High,
            ErrorKind::Network | ErrorKind::Timeout | ErrorKind::CircuitOpen => Severity::Medium,
            _ => Severity::Low,
        }
    }
}

/// Structured context attached to every error instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorContext {
    /// Unique identifier for this error instance.
    pub error_id: Uuid,
    /// Logical operation that failed, e.g. `movement.issue`.
    pub operation: Option<String>,
    /// Component that produced the error, e.g. `movement_engine`.
    pub component: Option<String>,
    /// Resource the operation acted on (item id, order number, policy name).
    pub resource: Option<String>,
    /// Attempt number when produced under the retrier.
    pub attempt: Option<u32>,
    /// Wall-clock time spent before failing.
    pub duration_ms: Option<u64>,
    /// Additional structured data.
    pub metadata: HashMap<String, serde_json::Value>,
    pub timestamp: DateTime<Utc>,
}

impl ErrorContext {
    pub fn new() -> Self {
        Self {
            error_id: Uuid::new_v4(),
            operation: None,
            component: None,
            resource: None,
            attempt: None,
            duration_ms: None,
            metadata: HashMap::new(),
            timestamp: Utc::now(),
        }
    }
}

impl Default for ErrorContext {
    fn default() -> Self {
        Self::new()
    }
}

/// Engine-wide error type.
#[derive(Debug, Clone, ThisError)]
#[error("{message}")]
pub struct Error {
    pub kind: ErrorKind,
    pub message: String,
    pub context: ErrorContext,
    pub severity: Severity,
    pub cause: Option<Box<Error>>,
    pub suggestions: Vec<String>,
}

impl Error {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            context: ErrorContext::new(),
            severity: kind.default_severity(),
            cause: None,
            suggestions: Vec::new(),
        }
    }

    pub fn with_operation(mut self, operation: impl Into<String>) -> Self {
        self.context.operation = Some(operation.into());
        self
    }

    pub fn with_component(mut self, component: impl Into<String>) -> Self {
        self.context.component = Some(component.into());
        self
    }

    pub fn with_resource(mut self, resource: impl Into<String>) -> Self {
        self.context.resource = Some(resource.into());
        self
    }

    pub fn with_attempt(mut self, attempt: u32) -> Self {
        self.context.attempt = Some(attempt);
        self
    }

    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.context.duration_ms = Some(duration.as_millis() as u64);
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.context.metadata.insert(key.into(), value);
        self
    }

    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }

    pub fn with_cause(mut self, cause: Error) -> Self {
        self.cause = Some(Box::new(cause));
        self
    }

    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestions.push(suggestion.into());
        self
    }

    pub fn recovery(&self) -> Recovery {
        self.kind.recovery()
    }

    pub fn is_retryable(&self) -> bool {
        self.kind.is_retryable()
    }

    // Convenience constructors for the kinds produced across crate seams.

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidInput, message)
    }

    pub fn missing_field(field: &str) -> Self {
        Self::new(ErrorKind::MissingField, format!("missing required field: {field}"))
            .with_resource(field)
    }

    pub fn not_found(resource: impl Into<String>) -> Self {
        let resource = resource.into();
        Self::new(ErrorKind::NotFound, format!("not found: {resource}")).with_resource(resource)
    }

    pub fn version_conflict(resource: impl Into<String>, stored: i64, basis: i64) -> Self {
        let resource = resource.into();
        Self::new(
            ErrorKind::VersionConflict,
            format!("version conflict on {resource}: stored {stored}, basis {basis}"),
        )
        .with_resource(resource)
        .with_suggestion("re-read the aggregate and retry the operation")
    }

    pub fn timeout(operation: impl Into<String>, elapsed: Duration) -> Self {
        let operation = operation.into();
        Self::new(ErrorKind::Timeout, format!("operation timed out: {operation}"))
            .with_operation(operation)
            .with_duration(elapsed)
    }

    pub fn storage(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::StorageUnavailable, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, message)
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::new(ErrorKind::Internal, format!("serialization error: {err}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recovery_classification_matches_taxonomy() {
        assert_eq!(ErrorKind::Network.recovery(), Recovery::Retryable);
        assert_eq!(ErrorKind::Timeout.recovery(), Recovery::Retryable);
        assert_eq!(ErrorKind::StorageUnavailable.recovery(), Recovery::Retryable);
        assert_eq!(ErrorKind::RateLimitExceeded.recovery(), Recovery::Retryable);
        assert_eq!(ErrorKind::CircuitOpen.recovery(), Recovery::CircuitBreak);
        assert_eq!(ErrorKind::InsufficientStock.recovery(), Recovery::NonRetryable);
        assert_eq!(ErrorKind::VersionConflict.recovery(), Recovery::NonRetryable);
        assert_eq!(ErrorKind::Panic.recovery(), Recovery::NonRetryable);
    }

    #[test]
    fn stock_preconditions_are_never_retryable() {
        for kind in [
            ErrorKind::InsufficientStock,
            ErrorKind::InvalidReservation,
            ErrorKind::NegativeStock,
            ErrorKind::SameLocation,
            ErrorKind::ItemInactive,
            ErrorKind::OrderCannotTransition,
        ] {
            assert!(!kind.is_retryable(), "{kind:?} must not retry");
        }
    }

    #[test]
    fn context_builder_populates_fields() {
        let err = Error::new(ErrorKind::Network, "connection reset")
            .with_operation("supplier.sync")
            .with_component("external_api")
            .with_attempt(3)
            .with_duration(Duration::from_millis(250));

        assert_eq!(err.context.operation.as_deref(), Some("supplier.sync"));
        assert_eq!(err.context.attempt, Some(3));
        assert_eq!(err.context.duration_ms, Some(250));
        assert!(err.is_retryable());
    }

    #[test]
    fn cause_chain_is_preserved() {
        let root = Error::new(ErrorKind::Network, "dns failure");
        let err = Error::storage("commit failed").with_cause(root);
        assert_eq!(err.cause.as_ref().unwrap().kind, ErrorKind::Network);
    }

    #[test]
    fn internal_errors_are_critical() {
        assert_eq!(Error::internal("bug").severity, Severity::Critical);
    }
}
