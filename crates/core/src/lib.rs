//! Cross-cutting infrastructure for the Roastline inventory engine.
//!
//! This crate carries everything the domain crates share: the error
//! taxonomy with recovery classification, operation contexts (cancellation
//! and deadlines), domain events and the event-sink port, the resilience
//! envelope for outbound calls, provider capability ports, configuration,
//! and the OAuth state / token bookkeeping for external collaborators.

pub mod auth;
pub mod config;
pub mod ctx;
pub mod error;
pub mod events;
pub mod providers;
pub mod resilience;

pub use config::Config;
pub use ctx::{CancelHandle, OpContext};
pub use error::{Error, ErrorContext, ErrorKind, Recovery, Result, Severity};
pub use events::{ChannelEventSink, DomainEvent, EventSink, EventType, MemoryEventSink};
pub use providers::{ProviderInfo, ProviderKind, ProviderRegistry};
pub use resilience::{
    named_policy, BackoffStrategy, CircuitBreaker, CircuitState, RateLimiter, ResilienceManager,
    ResiliencePolicy, Retrier,
};
