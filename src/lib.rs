//! Resilient HTTP
//!
//! Resilience middleware for outbound HTTP calls, composed as a decorator
//! chain over a pooled transport.
//!
//! # Features
//!
//! - Retry with pluggable policy, exponential or linear-jitter backoff and
//!   replayable request bodies
//! - Generation-tagged circuit breaker with closed, open and half-open states
//! - Client credentials bearer token cache with single-flight refresh
//! - User agent injection and an ordered middleware client
//!
//! # Example
//!
//! ```rust,ignore
//! use resilient_http::{
//!     oauth_config, CircuitBreakerService, CredentialCache, EnrichableClient, OAuthMiddleware,
//!     ReqwestHttpTransport, Request, RetryMiddleware,
//! };
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let transport = Arc::new(ReqwestHttpTransport::new()?);
//!
//!     let config = oauth_config()
//!         .token_url("https://auth.example.com/oauth/token")
//!         .client_id("my-client-id")
//!         .client_secret("my-client-secret")
//!         .build()?;
//!     let credentials = Arc::new(CredentialCache::with_transport(config, transport.clone()));
//!
//!     // Outermost first: breaker, then retry, then credential injection
//!     let client = EnrichableClient::new(transport)
//!         .with(CircuitBreakerService::default())
//!         .with(RetryMiddleware::default())
//!         .with(OAuthMiddleware::new(credentials));
//!
//!     let response = client.send(Request::get("https://api.example.com/v1/items")?).await?;
//!     println!("status: {}", response.status);
//!
//!     Ok(())
//! }
//! ```
//!
//! # Architecture
//!
//! - `core`: request, response, transport and middleware composition
//! - `error`: error hierarchy
//! - `resilience`: retry executor, retry policies and circuit breaker
//! - `token`: bearer credential cache and its middleware
//! - `types`: credential configuration and token types
//! - `builders`: fluent configuration builders
//! - `client`: thin client applying middleware in order
//! - `telemetry`: logging setup

pub mod builders;
pub mod client;
pub mod core;
pub mod error;
pub mod resilience;
pub mod telemetry;
pub mod token;
pub mod types;

// Re-export client
pub use client::{read_response, EnrichableClient, UserAgentMiddleware};

// Re-export builders
pub use builders::{oauth_config, OAuthConfigBuilder};

// Re-export errors
pub use error::{
    CircuitBreakerError, ConfigurationError, ContextError, NetworkError, ProtocolError,
    RequestError, ResilienceError, ResilienceResult, TokenError,
};

// Re-export types
pub use types::{BearerCredential, BearerResponse, OAuthConfig};

// Re-export core components
pub use core::{
    // Request / Response
    assert_status_code, HttpMethod, HttpResponse, Request, RequestBody, RequestContext,
    ResponseBody, RESPONSE_BODY_READ_LIMIT,
    // Transport
    create_mock_transport, create_transport, HttpTransport, MockHttpTransport, MockResponse,
    ReqwestHttpTransport,
    // Middleware
    apply_middleware, responder, transport_responder, Middleware, Responder,
};

// Re-export token management
pub use token::{CredentialCache, OAuthMiddleware};

// Re-export resilience
pub use resilience::{
    // Retry
    create_retry_executor, Backoff, CheckRetry, DefaultRetryPolicy, ExponentialBackoff,
    LinearJitterBackoff, RequestHook, RetryCheck, RetryConfig, RetryExecutor, RetryMiddleware,
    // Circuit Breaker
    create_circuit_breaker, CircuitBreakerHook, CircuitBreakerService, CircuitBreakerSettings,
    CircuitState, Counts,
};

// Re-export telemetry
pub use telemetry::{init_logging, LogFormat, LogLevel, LoggingConfig};
