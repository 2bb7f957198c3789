//! Resilience Error Types
//!
//! Error hierarchy shared by the transport, retry, circuit breaker and
//! credential layers.

use std::time::Duration;
use thiserror::Error;

use crate::core::HttpMethod;

/// Root error type for the resilience layer.
#[derive(Error, Debug)]
pub enum ResilienceError {
    #[error("Request error: {0}")]
    Request(#[from] RequestError),

    #[error("Network error: {0}")]
    Network(#[from] NetworkError),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("unexpected HTTP status {status}")]
    UnexpectedStatus { status: u16 },

    #[error("{0}")]
    CircuitBreaker(#[from] CircuitBreakerError),

    #[error("{0}")]
    Context(#[from] ContextError),

    #[error("Token error: {0}")]
    Token(#[from] TokenError),

    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    #[error("{method} {url} giving up after {attempts} attempt(s): {source}")]
    RetriesExhausted {
        method: HttpMethod,
        url: String,
        attempts: u32,
        source: Box<ResilienceError>,
    },
}

impl ResilienceError {
    /// Get error code for telemetry.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Request(_) => "HTTP_REQUEST",
            Self::Network(_) => "HTTP_NETWORK",
            Self::Protocol(_) => "HTTP_PROTOCOL",
            Self::UnexpectedStatus { .. } => "HTTP_STATUS",
            Self::CircuitBreaker(_) => "HTTP_CIRCUIT_BREAKER",
            Self::Context(_) => "HTTP_CONTEXT",
            Self::Token(_) => "HTTP_TOKEN",
            Self::Configuration(_) => "HTTP_CONFIG",
            Self::RetriesExhausted { .. } => "HTTP_RETRIES_EXHAUSTED",
        }
    }

    /// Check if the error is a transient fault worth retrying.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Network(_) => true,
            Self::UnexpectedStatus { status } => {
                *status == 0 || *status == 429 || (*status >= 500 && *status != 501)
            }
            _ => false,
        }
    }

    /// Check if the error (or the cause it wraps) is a cancellation or deadline.
    pub fn is_cancellation(&self) -> bool {
        matches!(self.root_cause(), Self::Context(_))
    }

    /// Check if the error was produced by a circuit breaker rejecting the call.
    pub fn is_circuit_breaker_rejection(&self) -> bool {
        matches!(self.root_cause(), Self::CircuitBreaker(_))
    }

    /// Strip retry annotations and return the underlying cause.
    pub fn root_cause(&self) -> &ResilienceError {
        match self {
            Self::RetriesExhausted { source, .. } => source.root_cause(),
            other => other,
        }
    }
}

/// Malformed input; never retried.
#[derive(Error, Debug)]
pub enum RequestError {
    #[error("Invalid URL {url}: {message}")]
    InvalidUrl { url: String, message: String },

    #[error("Body producer failed: {message}")]
    BodyProducer { message: String },

    #[error("Body serialization failed: {message}")]
    BodySerialization { message: String },

    #[error("Invalid header {name}: {message}")]
    InvalidHeader { name: String, message: String },
}

/// Network/transport error.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NetworkError {
    #[error("Connection failed: {message}")]
    ConnectionFailed { message: String },

    #[error("Request timeout after {timeout:?}")]
    Timeout { timeout: Duration },

    #[error("Failed to read response body: {message}")]
    BodyRead { message: String },
}

/// Response decoding error.
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Invalid JSON: {message}")]
    InvalidJson { message: String },

    #[error("Invalid response: {message}")]
    InvalidResponse { message: String },
}

/// Circuit breaker rejection.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitBreakerError {
    #[error("circuit breaker is open")]
    Open,

    #[error("too many requests")]
    TooManyRequests,
}

/// Cancellation or deadline reported by a [`RequestContext`](crate::core::RequestContext).
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextError {
    #[error("context canceled")]
    Cancelled,

    #[error("context deadline exceeded")]
    DeadlineExceeded,
}

/// Credential refresh error.
#[derive(Error, Debug)]
pub enum TokenError {
    #[error("Token refresh failed with HTTP {status}: {message}")]
    RefreshFailed { status: u16, message: String },

    #[error("Invalid token response: {message}")]
    InvalidResponse { message: String },
}

/// Configuration error.
#[derive(Error, Debug)]
pub enum ConfigurationError {
    #[error("Invalid configuration: {message}")]
    InvalidConfig { message: String },

    #[error("Missing required field: {field}")]
    MissingRequired { field: String },

    #[error("Invalid endpoint URL: {url}")]
    InvalidEndpoint { url: String },
}

/// Result type for resilience operations.
pub type ResilienceResult<T> = Result<T, ResilienceError>;
