//! Circuit Breaker
//!
//! Generation-tagged circuit breaker guarding calls to an unhealthy
//! dependency. State transitions are evaluated lazily whenever the state is
//! queried; there is no background timer.

use futures::future::FutureExt;
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::core::{assert_status_code, HttpResponse, HttpTransport, Middleware, Request, Responder};
use crate::error::{CircuitBreakerError, ResilienceError};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);
const DEFAULT_CONSECUTIVE_FAILURES: u32 = 5;

/// Circuit state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CircuitState {
    /// Calls flow normally.
    Closed,
    /// Limited trial calls are admitted.
    HalfOpen,
    /// Calls are rejected.
    Open,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Closed => f.write_str("closed"),
            Self::HalfOpen => f.write_str("half-open"),
            Self::Open => f.write_str("open"),
        }
    }
}

/// Request counts for the current generation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Counts {
    pub requests: u32,
    pub total_successes: u32,
    pub total_failures: u32,
    pub consecutive_successes: u32,
    pub consecutive_failures: u32,
}

impl Counts {
    fn on_request(&mut self) {
        self.requests = self.requests.saturating_add(1);
    }

    fn on_success(&mut self) {
        self.total_successes = self.total_successes.saturating_add(1);
        self.consecutive_successes = self.consecutive_successes.saturating_add(1);
        self.consecutive_failures = 0;
    }

    fn on_failure(&mut self) {
        self.total_failures = self.total_failures.saturating_add(1);
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        self.consecutive_successes = 0;
    }

    fn clear(&mut self) {
        *self = Self::default();
    }
}

/// Hook for circuit breaker state changes.
pub trait CircuitBreakerHook: Send + Sync {
    fn on_state_change(&self, from: CircuitState, to: CircuitState);
}

impl<F> CircuitBreakerHook for F
where
    F: Fn(CircuitState, CircuitState) + Send + Sync,
{
    fn on_state_change(&self, from: CircuitState, to: CircuitState) {
        self(from, to)
    }
}

/// Decides whether closed-state counts should trip the breaker.
pub type TripPredicate = Arc<dyn Fn(Counts) -> bool + Send + Sync>;

/// Classifies a call outcome as success or failure.
pub type SuccessPredicate =
    Arc<dyn Fn(&Result<HttpResponse, ResilienceError>) -> bool + Send + Sync>;

/// Trips after more than five consecutive failures.
pub fn default_ready_to_trip(counts: Counts) -> bool {
    counts.consecutive_failures > DEFAULT_CONSECUTIVE_FAILURES
}

/// A call succeeds when it returns a response whose status passes
/// [`assert_status_code`].
pub fn default_is_successful(outcome: &Result<HttpResponse, ResilienceError>) -> bool {
    match outcome {
        Ok(response) => assert_status_code(response).is_ok(),
        Err(_) => false,
    }
}

/// Circuit breaker configuration.
#[derive(Clone)]
pub struct CircuitBreakerSettings {
    /// Calls admitted while half-open, and consecutive successes needed to close.
    pub max_requests: u32,
    /// Period after which closed-state counts are cleared; zero never clears.
    pub interval: Duration,
    /// Time spent open before moving to half-open.
    pub timeout: Duration,
    pub ready_to_trip: TripPredicate,
    pub is_successful: SuccessPredicate,
    pub hooks: Vec<Arc<dyn CircuitBreakerHook>>,
}

impl Default for CircuitBreakerSettings {
    fn default() -> Self {
        Self {
            max_requests: 1,
            interval: Duration::ZERO,
            timeout: DEFAULT_TIMEOUT,
            ready_to_trip: Arc::new(default_ready_to_trip),
            is_successful: Arc::new(default_is_successful),
            hooks: Vec::new(),
        }
    }
}

impl fmt::Debug for CircuitBreakerSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreakerSettings")
            .field("max_requests", &self.max_requests)
            .field("interval", &self.interval)
            .field("timeout", &self.timeout)
            .field("hooks", &self.hooks.len())
            .finish_non_exhaustive()
    }
}

impl CircuitBreakerSettings {
    /// Load from `RESILIENT_HTTP_BREAKER_*` environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load using an arbitrary key lookup; missing or unparseable values
    /// keep their defaults.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let number = |key: &str| lookup(key).and_then(|s| s.trim().parse::<u64>().ok());

        let defaults = Self::default();
        Self {
            max_requests: number("RESILIENT_HTTP_BREAKER_MAX_REQUESTS")
                .and_then(|n| u32::try_from(n).ok())
                .unwrap_or(defaults.max_requests),
            interval: number("RESILIENT_HTTP_BREAKER_INTERVAL_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.interval),
            timeout: number("RESILIENT_HTTP_BREAKER_TIMEOUT_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.timeout),
            ..defaults
        }
    }

    pub fn with_max_requests(mut self, max_requests: u32) -> Self {
        self.max_requests = max_requests;
        self
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_ready_to_trip<F>(mut self, ready_to_trip: F) -> Self
    where
        F: Fn(Counts) -> bool + Send + Sync + 'static,
    {
        self.ready_to_trip = Arc::new(ready_to_trip);
        self
    }

    pub fn with_is_successful<F>(mut self, is_successful: F) -> Self
    where
        F: Fn(&Result<HttpResponse, ResilienceError>) -> bool + Send + Sync + 'static,
    {
        self.is_successful = Arc::new(is_successful);
        self
    }

    pub fn with_hook(mut self, hook: impl CircuitBreakerHook + 'static) -> Self {
        self.hooks.push(Arc::new(hook));
        self
    }

    fn normalized(mut self) -> Self {
        if self.max_requests == 0 {
            self.max_requests = 1;
        }
        if self.timeout.is_zero() {
            self.timeout = DEFAULT_TIMEOUT;
        }
        self
    }
}

struct BreakerInner {
    state: CircuitState,
    generation: u64,
    counts: Counts,
    /// `None` while half-open, or while closed without an interval.
    expiry: Option<Instant>,
    /// Transitions not yet reported to hooks.
    transitions: Vec<(CircuitState, CircuitState)>,
}

impl BreakerInner {
    fn current_state(
        &mut self,
        settings: &CircuitBreakerSettings,
        now: Instant,
    ) -> (CircuitState, u64) {
        match (self.state, self.expiry) {
            (CircuitState::Closed, Some(expiry)) if expiry <= now => {
                self.to_new_generation(settings, now);
            }
            (CircuitState::Open, Some(expiry)) if expiry <= now => {
                self.set_state(settings, CircuitState::HalfOpen, now);
            }
            _ => {}
        }
        (self.state, self.generation)
    }

    fn set_state(&mut self, settings: &CircuitBreakerSettings, state: CircuitState, now: Instant) {
        if self.state == state {
            return;
        }
        let previous = self.state;
        self.state = state;
        self.to_new_generation(settings, now);
        self.transitions.push((previous, state));
    }

    fn to_new_generation(&mut self, settings: &CircuitBreakerSettings, now: Instant) {
        self.generation += 1;
        self.counts.clear();
        self.expiry = match self.state {
            CircuitState::Closed if settings.interval.is_zero() => None,
            CircuitState::Closed => Some(now + settings.interval),
            CircuitState::Open => Some(now + settings.timeout),
            CircuitState::HalfOpen => None,
        };
    }

    fn on_success(&mut self, settings: &CircuitBreakerSettings, state: CircuitState, now: Instant) {
        match state {
            CircuitState::Closed => self.counts.on_success(),
            CircuitState::HalfOpen => {
                self.counts.on_success();
                if self.counts.consecutive_successes >= settings.max_requests {
                    self.set_state(settings, CircuitState::Closed, now);
                }
            }
            CircuitState::Open => {}
        }
    }

    fn on_failure(&mut self, settings: &CircuitBreakerSettings, state: CircuitState, now: Instant) {
        match state {
            CircuitState::Closed => {
                self.counts.on_failure();
                if (settings.ready_to_trip)(self.counts) {
                    self.set_state(settings, CircuitState::Open, now);
                }
            }
            CircuitState::HalfOpen => self.set_state(settings, CircuitState::Open, now),
            CircuitState::Open => {}
        }
    }
}

/// Circuit breaker service.
///
/// Clones share state. All mutable state sits behind one lock which is
/// never held across the wrapped call.
#[derive(Clone)]
pub struct CircuitBreakerService {
    settings: Arc<CircuitBreakerSettings>,
    inner: Arc<Mutex<BreakerInner>>,
}

impl fmt::Debug for CircuitBreakerService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("CircuitBreakerService")
            .field("settings", &self.settings)
            .field("state", &inner.state)
            .field("generation", &inner.generation)
            .field("counts", &inner.counts)
            .finish()
    }
}

impl Default for CircuitBreakerService {
    fn default() -> Self {
        Self::new(CircuitBreakerSettings::default())
    }
}

impl CircuitBreakerService {
    /// Create new circuit breaker, starting closed.
    pub fn new(settings: CircuitBreakerSettings) -> Self {
        let settings = settings.normalized();
        let mut inner = BreakerInner {
            state: CircuitState::Closed,
            generation: 0,
            counts: Counts::default(),
            expiry: None,
            transitions: Vec::new(),
        };
        inner.to_new_generation(&settings, Instant::now());

        Self {
            settings: Arc::new(settings),
            inner: Arc::new(Mutex::new(inner)),
        }
    }

    pub fn settings(&self) -> &CircuitBreakerSettings {
        &self.settings
    }

    /// Current state, applying any transition that is due.
    pub fn state(&self) -> CircuitState {
        let (state, transitions) = {
            let mut inner = self.inner.lock();
            let (state, _) = inner.current_state(&self.settings, Instant::now());
            (state, std::mem::take(&mut inner.transitions))
        };
        self.notify(transitions);
        state
    }

    /// Counts of the current generation.
    pub fn counts(&self) -> Counts {
        self.inner.lock().counts
    }

    pub fn generation(&self) -> u64 {
        self.inner.lock().generation
    }

    /// Run `next` for `request` if the breaker admits it.
    ///
    /// The wrapped call's own result is returned unchanged; rejected calls
    /// never reach `next`. A call dropped before completion counts as a
    /// failure.
    pub async fn execute(
        &self,
        request: Request,
        next: &Responder,
    ) -> Result<HttpResponse, ResilienceError> {
        let admission = self.before_request()?;
        let outcome = next(request).await;
        admission.settle((self.settings.is_successful)(&outcome));
        outcome
    }

    fn before_request(&self) -> Result<Admission<'_>, CircuitBreakerError> {
        let (result, transitions) = {
            let mut inner = self.inner.lock();
            let (state, generation) = inner.current_state(&self.settings, Instant::now());

            let result = match state {
                CircuitState::Open => Err(CircuitBreakerError::Open),
                CircuitState::HalfOpen if inner.counts.requests >= self.settings.max_requests => {
                    Err(CircuitBreakerError::TooManyRequests)
                }
                _ => {
                    inner.counts.on_request();
                    Ok(generation)
                }
            };
            (result, std::mem::take(&mut inner.transitions))
        };
        self.notify(transitions);

        match result {
            Ok(generation) => Ok(Admission {
                breaker: self,
                generation,
                settled: false,
            }),
            Err(error) => {
                debug!(error = %error, "Circuit breaker rejected request");
                Err(error)
            }
        }
    }

    fn after_request(&self, before: u64, success: bool) {
        let transitions = {
            let mut inner = self.inner.lock();
            let now = Instant::now();
            let (state, generation) = inner.current_state(&self.settings, now);
            if generation == before {
                if success {
                    inner.on_success(&self.settings, state, now);
                } else {
                    inner.on_failure(&self.settings, state, now);
                }
            }
            std::mem::take(&mut inner.transitions)
        };
        self.notify(transitions);
    }

    fn notify(&self, transitions: Vec<(CircuitState, CircuitState)>) {
        for (from, to) in transitions {
            match to {
                CircuitState::Open => warn!(%from, %to, "Circuit breaker opened"),
                _ => info!(%from, %to, "Circuit breaker state changed"),
            }
            for hook in &self.settings.hooks {
                hook.on_state_change(from, to);
            }
        }
    }
}

/// An admitted call awaiting its outcome.
struct Admission<'a> {
    breaker: &'a CircuitBreakerService,
    generation: u64,
    settled: bool,
}

impl Admission<'_> {
    fn settle(mut self, success: bool) {
        self.settled = true;
        self.breaker.after_request(self.generation, success);
    }
}

impl Drop for Admission<'_> {
    fn drop(&mut self) {
        if !self.settled {
            self.breaker.after_request(self.generation, false);
        }
    }
}

impl Middleware for CircuitBreakerService {
    fn wrap(&self, _transport: &Arc<dyn HttpTransport>, next: Responder) -> Responder {
        let breaker = self.clone();
        Arc::new(move |request: Request| {
            let breaker = breaker.clone();
            let next = next.clone();
            async move { breaker.execute(request, &next).await }.boxed()
        })
    }
}

/// Create circuit breaker.
pub fn create_circuit_breaker(settings: CircuitBreakerSettings) -> CircuitBreakerService {
    CircuitBreakerService::new(settings)
}
