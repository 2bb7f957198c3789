//! Retry Logic
//!
//! Attempt loop with pluggable retry policy and backoff, body rewinding
//! between attempts and cancellable waits.

use futures::future::FutureExt;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::core::{
    HttpResponse, HttpTransport, Middleware, Request, Responder, RESPONSE_BODY_READ_LIMIT,
};
use crate::error::ResilienceError;
use crate::resilience::policy::{
    Backoff, CheckRetry, DefaultRetryPolicy, ExponentialBackoff, RequestHook, RetryCheck,
};

const DEFAULT_RETRY_WAIT_MIN: Duration = Duration::from_secs(1);
const DEFAULT_RETRY_WAIT_MAX: Duration = Duration::from_secs(30);
const DEFAULT_RETRY_MAX: u32 = 3;

/// Retry configuration.
#[derive(Clone)]
pub struct RetryConfig {
    /// Minimum time to wait between attempts.
    pub min_wait: Duration,
    /// Maximum time to wait between attempts.
    pub max_wait: Duration,
    /// Maximum number of retries; a call makes at most `max_retries + 1` attempts.
    pub max_retries: u32,
    /// Decides whether an attempt should be retried.
    pub check_retry: Arc<dyn CheckRetry>,
    /// Computes the wait before the next attempt.
    pub backoff: Arc<dyn Backoff>,
    /// Called with each prepared attempt.
    pub request_hook: Option<Arc<dyn RequestHook>>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            min_wait: DEFAULT_RETRY_WAIT_MIN,
            max_wait: DEFAULT_RETRY_WAIT_MAX,
            max_retries: DEFAULT_RETRY_MAX,
            check_retry: Arc::new(DefaultRetryPolicy),
            backoff: Arc::new(ExponentialBackoff),
            request_hook: None,
        }
    }
}

impl fmt::Debug for RetryConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryConfig")
            .field("min_wait", &self.min_wait)
            .field("max_wait", &self.max_wait)
            .field("max_retries", &self.max_retries)
            .field("request_hook", &self.request_hook.is_some())
            .finish_non_exhaustive()
    }
}

impl RetryConfig {
    /// Load from `RESILIENT_HTTP_RETRY_*` environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load using an arbitrary key lookup; missing or unparseable values
    /// keep their defaults.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let millis = |key: &str| {
            lookup(key)
                .and_then(|s| s.trim().parse::<u64>().ok())
                .map(Duration::from_millis)
        };

        let defaults = Self::default();
        Self {
            min_wait: millis("RESILIENT_HTTP_RETRY_WAIT_MIN_MS").unwrap_or(defaults.min_wait),
            max_wait: millis("RESILIENT_HTTP_RETRY_WAIT_MAX_MS").unwrap_or(defaults.max_wait),
            max_retries: lookup("RESILIENT_HTTP_RETRY_MAX")
                .and_then(|s| s.trim().parse().ok())
                .unwrap_or(defaults.max_retries),
            ..defaults
        }
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_wait(mut self, min_wait: Duration, max_wait: Duration) -> Self {
        self.min_wait = min_wait;
        self.max_wait = max_wait;
        self
    }

    pub fn with_check_retry(mut self, check_retry: impl CheckRetry + 'static) -> Self {
        self.check_retry = Arc::new(check_retry);
        self
    }

    pub fn with_backoff(mut self, backoff: impl Backoff + 'static) -> Self {
        self.backoff = Arc::new(backoff);
        self
    }

    pub fn with_request_hook(mut self, hook: impl RequestHook + 'static) -> Self {
        self.request_hook = Some(Arc::new(hook));
        self
    }
}

/// Runs a call repeatedly until the retry policy is satisfied or the
/// retry budget runs out.
#[derive(Debug, Clone, Default)]
pub struct RetryExecutor {
    config: RetryConfig,
}

impl RetryExecutor {
    /// Create new retry executor.
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Execute `call` for `request` with retries.
    ///
    /// `transport` owns the connection pool; its idle connections are
    /// released whenever the loop is abandoned with an error.
    pub async fn execute(
        &self,
        transport: &dyn HttpTransport,
        mut request: Request,
        call: &Responder,
    ) -> Result<HttpResponse, ResilienceError> {
        let context = request.context().clone();
        let mut attempt: u32 = 0;

        let (outcome, check) = loop {
            if let Err(error) = request.rewind_body() {
                transport.close_idle_connections();
                return Err(error.into());
            }

            if let Some(hook) = &self.config.request_hook {
                hook.on_request(&request, attempt);
            }

            let mut outcome = match context.err() {
                Some(error) => Err(ResilienceError::from(error)),
                None => call(request.clone()).await,
            };

            let check = self.config.check_retry.check_retry(&context, &outcome);
            if !check.should_retry || attempt >= self.config.max_retries {
                break (outcome, check);
            }

            if let Ok(response) = &mut outcome {
                response.body.drain(RESPONSE_BODY_READ_LIMIT).await;
            }
            let wait = self.config.backoff.backoff(
                self.config.min_wait,
                self.config.max_wait,
                attempt,
                outcome.as_ref().ok(),
            );

            debug!(
                method = %request.method,
                url = %request.url,
                attempt = attempt + 1,
                wait_ms = wait.as_millis() as u64,
                "Retrying request"
            );

            tokio::select! {
                error = context.done() => {
                    transport.close_idle_connections();
                    return Err(error.into());
                }
                _ = tokio::time::sleep(wait) => {}
            }

            attempt += 1;
        };

        let attempts = attempt + 1;
        let RetryCheck {
            should_retry,
            error: policy_error,
        } = check;

        let error = match (policy_error, outcome) {
            (Some(error), _) => error,
            (None, Err(error)) => error,
            (None, Ok(response)) => {
                if should_retry {
                    warn!(
                        method = %request.method,
                        url = %request.url,
                        attempts,
                        status = response.status,
                        "Retries exhausted, returning last response"
                    );
                }
                return Ok(response);
            }
        };

        transport.close_idle_connections();
        warn!(
            method = %request.method,
            url = %request.url,
            attempts,
            error = %error,
            "Giving up on request"
        );

        Err(ResilienceError::RetriesExhausted {
            method: request.method,
            url: request.url.to_string(),
            attempts,
            source: Box::new(error),
        })
    }
}

/// Middleware running each call through a [`RetryExecutor`].
#[derive(Debug, Clone, Default)]
pub struct RetryMiddleware {
    executor: Arc<RetryExecutor>,
}

impl RetryMiddleware {
    pub fn new(config: RetryConfig) -> Self {
        Self {
            executor: Arc::new(RetryExecutor::new(config)),
        }
    }
}

impl Middleware for RetryMiddleware {
    fn wrap(&self, transport: &Arc<dyn HttpTransport>, next: Responder) -> Responder {
        let executor = self.executor.clone();
        let transport = transport.clone();
        Arc::new(move |request: Request| {
            let executor = executor.clone();
            let transport = transport.clone();
            let next = next.clone();
            async move { executor.execute(transport.as_ref(), request, &next).await }.boxed()
        })
    }
}

/// Create retry executor.
pub fn create_retry_executor(config: RetryConfig) -> RetryExecutor {
    RetryExecutor::new(config)
}
