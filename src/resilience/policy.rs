//! Retry Policies
//!
//! Pluggable decisions for the retry loop: whether an attempt should be
//! retried, how long to wait before the next one, and a pre-send hook.

use std::time::Duration;

use crate::core::{HttpResponse, Request, RequestContext};
use crate::error::ResilienceError;

/// Outcome of a retry check.
#[derive(Debug)]
pub struct RetryCheck {
    /// Whether another attempt should be made.
    pub should_retry: bool,
    /// Error reported by the policy; takes precedence over the call error.
    pub error: Option<ResilienceError>,
}

impl RetryCheck {
    pub fn retry() -> Self {
        Self {
            should_retry: true,
            error: None,
        }
    }

    pub fn stop() -> Self {
        Self {
            should_retry: false,
            error: None,
        }
    }

    pub fn with_error(mut self, error: impl Into<ResilienceError>) -> Self {
        self.error = Some(error.into());
        self
    }
}

/// Decides whether an attempt outcome should be retried.
pub trait CheckRetry: Send + Sync {
    fn check_retry(
        &self,
        context: &RequestContext,
        outcome: &Result<HttpResponse, ResilienceError>,
    ) -> RetryCheck;
}

impl<F> CheckRetry for F
where
    F: Fn(&RequestContext, &Result<HttpResponse, ResilienceError>) -> RetryCheck + Send + Sync,
{
    fn check_retry(
        &self,
        context: &RequestContext,
        outcome: &Result<HttpResponse, ResilienceError>,
    ) -> RetryCheck {
        self(context, outcome)
    }
}

/// Retries transport errors, 429 and 5xx other than 501.
///
/// A cancelled or expired context is never retried and its error is
/// reported verbatim. Status 0 is retried and reported as an unexpected
/// status so that giving up on it surfaces an error.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultRetryPolicy;

impl CheckRetry for DefaultRetryPolicy {
    fn check_retry(
        &self,
        context: &RequestContext,
        outcome: &Result<HttpResponse, ResilienceError>,
    ) -> RetryCheck {
        if let Some(error) = context.err() {
            return RetryCheck::stop().with_error(error);
        }

        let response = match outcome {
            Ok(response) => response,
            Err(_) => return RetryCheck::retry(),
        };

        match response.status {
            429 => RetryCheck::retry(),
            status if status >= 500 && status != 501 => RetryCheck::retry(),
            0 => RetryCheck::retry().with_error(ResilienceError::UnexpectedStatus { status: 0 }),
            _ => RetryCheck::stop(),
        }
    }
}

/// Computes the wait before the next attempt.
pub trait Backoff: Send + Sync {
    fn backoff(
        &self,
        min: Duration,
        max: Duration,
        attempt: u32,
        response: Option<&HttpResponse>,
    ) -> Duration;
}

impl<F> Backoff for F
where
    F: Fn(Duration, Duration, u32, Option<&HttpResponse>) -> Duration + Send + Sync,
{
    fn backoff(
        &self,
        min: Duration,
        max: Duration,
        attempt: u32,
        response: Option<&HttpResponse>,
    ) -> Duration {
        self(min, max, attempt, response)
    }
}

/// `min * 2^attempt`, capped at `max`.
///
/// A 429 or 503 response carrying an integer `Retry-After` is honoured
/// verbatim instead.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExponentialBackoff;

impl ExponentialBackoff {
    fn retry_after(response: &HttpResponse) -> Option<Duration> {
        if response.status != 429 && response.status != 503 {
            return None;
        }
        response
            .header("retry-after")
            .and_then(|value| value.trim().parse::<u64>().ok())
            .map(Duration::from_secs)
    }
}

impl Backoff for ExponentialBackoff {
    fn backoff(
        &self,
        min: Duration,
        max: Duration,
        attempt: u32,
        response: Option<&HttpResponse>,
    ) -> Duration {
        if let Some(wait) = response.and_then(Self::retry_after) {
            return wait;
        }

        2u32.checked_pow(attempt)
            .and_then(|factor| min.checked_mul(factor))
            .map_or(max, |wait| wait.min(max))
    }
}

/// Linear backoff with jitter.
///
/// A random point in `[min, max)` is multiplied by `attempt + 1`, so `min`
/// and `max` bound the jitter rather than the wait itself.
#[derive(Debug, Clone, Copy, Default)]
pub struct LinearJitterBackoff;

impl Backoff for LinearJitterBackoff {
    fn backoff(
        &self,
        min: Duration,
        max: Duration,
        attempt: u32,
        _response: Option<&HttpResponse>,
    ) -> Duration {
        let multiplier = attempt.saturating_add(1);
        let base = if max <= min {
            min
        } else {
            min + (max - min).mul_f64(rand::random::<f64>())
        };
        base.checked_mul(multiplier).unwrap_or(Duration::MAX)
    }
}

/// Called with each fully prepared attempt before it is sent.
pub trait RequestHook: Send + Sync {
    fn on_request(&self, request: &Request, attempt: u32);
}

impl<F> RequestHook for F
where
    F: Fn(&Request, u32) + Send + Sync,
{
    fn on_request(&self, request: &Request, attempt: u32) {
        self(request, attempt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ContextError, NetworkError};

    fn check(status: u16) -> RetryCheck {
        DefaultRetryPolicy.check_retry(
            &RequestContext::new(),
            &Ok(HttpResponse::new(status)),
        )
    }

    #[test]
    fn test_default_policy_statuses() {
        for status in [429, 500, 502, 503, 504, 599, 999] {
            let result = check(status);
            assert!(result.should_retry, "status {} should retry", status);
            assert!(result.error.is_none());
        }
        for status in [200, 204, 301, 304, 400, 401, 404, 501] {
            assert!(!check(status).should_retry, "status {} should not retry", status);
        }
    }

    #[test]
    fn test_default_policy_status_zero() {
        let result = check(0);
        assert!(result.should_retry);
        assert!(matches!(
            result.error,
            Some(ResilienceError::UnexpectedStatus { status: 0 })
        ));
    }

    #[test]
    fn test_default_policy_transport_error() {
        let outcome = Err(ResilienceError::from(NetworkError::ConnectionFailed {
            message: "refused".to_string(),
        }));
        let result = DefaultRetryPolicy.check_retry(&RequestContext::new(), &outcome);
        assert!(result.should_retry);
        assert!(result.error.is_none());
    }

    #[test]
    fn test_default_policy_cancelled_context() {
        let context = RequestContext::new();
        context.cancel();
        let result = DefaultRetryPolicy.check_retry(&context, &Ok(HttpResponse::new(503)));
        assert!(!result.should_retry);
        assert!(matches!(
            result.error,
            Some(ResilienceError::Context(ContextError::Cancelled))
        ));
    }

    #[test]
    fn test_exponential_backoff_sequence() {
        let min = Duration::from_secs(1);
        let max = Duration::from_secs(30);
        let waits: Vec<u64> = (0..8)
            .map(|attempt| ExponentialBackoff.backoff(min, max, attempt, None).as_secs())
            .collect();
        assert_eq!(waits, vec![1, 2, 4, 8, 16, 30, 30, 30]);
    }

    #[test]
    fn test_exponential_backoff_saturates() {
        let min = Duration::from_secs(1);
        let max = Duration::from_secs(30);
        assert_eq!(ExponentialBackoff.backoff(min, max, 64, None), max);
        assert_eq!(ExponentialBackoff.backoff(min, max, u32::MAX, None), max);
    }

    #[test]
    fn test_exponential_backoff_retry_after() {
        let min = Duration::from_secs(1);
        let max = Duration::from_secs(30);

        let throttled = HttpResponse::new(429).with_header("Retry-After", "45");
        assert_eq!(
            ExponentialBackoff.backoff(min, max, 0, Some(&throttled)),
            Duration::from_secs(45)
        );

        let unavailable = HttpResponse::new(503).with_header("Retry-After", "2");
        assert_eq!(
            ExponentialBackoff.backoff(min, max, 3, Some(&unavailable)),
            Duration::from_secs(2)
        );

        // Only 429 and 503 consult the header
        let failed = HttpResponse::new(500).with_header("Retry-After", "45");
        assert_eq!(
            ExponentialBackoff.backoff(min, max, 1, Some(&failed)),
            Duration::from_secs(2)
        );

        let http_date =
            HttpResponse::new(429).with_header("Retry-After", "Wed, 21 Oct 2015 07:28:00 GMT");
        assert_eq!(
            ExponentialBackoff.backoff(min, max, 2, Some(&http_date)),
            Duration::from_secs(4)
        );
    }

    #[test]
    fn test_linear_jitter_backoff() {
        let min = Duration::from_millis(800);
        let max = Duration::from_millis(1200);
        for attempt in 0..5u32 {
            let wait = LinearJitterBackoff.backoff(min, max, attempt, None);
            assert!(wait >= min * (attempt + 1));
            assert!(wait <= max * (attempt + 1));
        }

        let fixed = Duration::from_secs(1);
        assert_eq!(
            LinearJitterBackoff.backoff(fixed, fixed, 2, None),
            Duration::from_secs(3)
        );
    }

    #[test]
    fn test_closure_policies() {
        let never =
            |_: &RequestContext, _: &Result<HttpResponse, ResilienceError>| RetryCheck::stop();
        assert!(
            !never
                .check_retry(&RequestContext::new(), &Ok(HttpResponse::new(500)))
                .should_retry
        );

        let constant =
            |_: Duration, _: Duration, _: u32, _: Option<&HttpResponse>| Duration::from_millis(7);
        assert_eq!(
            constant.backoff(Duration::ZERO, Duration::ZERO, 9, None),
            Duration::from_millis(7)
        );
    }
}
