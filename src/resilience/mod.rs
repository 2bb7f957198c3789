//! Resilience
//!
//! Resilience patterns for outbound HTTP calls.
//!
//! This module provides:
//!
//! - **Retry**: attempt loop with pluggable retry policy and backoff
//! - **Circuit Breaker**: generation-tagged protection against failing dependencies

pub mod circuit_breaker;
pub mod policy;
pub mod retry;

// Retry
pub use policy::{
    Backoff, CheckRetry, DefaultRetryPolicy, ExponentialBackoff, LinearJitterBackoff, RequestHook,
    RetryCheck,
};
pub use retry::{create_retry_executor, RetryConfig, RetryExecutor, RetryMiddleware};

// Circuit Breaker
pub use circuit_breaker::{
    create_circuit_breaker, default_is_successful, default_ready_to_trip, CircuitBreakerHook,
    CircuitBreakerService, CircuitBreakerSettings, CircuitState, Counts, SuccessPredicate,
    TripPredicate,
};
