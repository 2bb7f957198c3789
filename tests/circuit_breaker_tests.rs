//! Integration tests for the circuit breaker middleware.

use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use resilient_http::{
    apply_middleware, CircuitBreakerError, CircuitBreakerService, CircuitBreakerSettings,
    CircuitState, Counts, HttpTransport, Middleware, MockHttpTransport, MockResponse, Request,
    ResilienceError, Responder,
};
use std::sync::Arc;
use std::time::Duration;

fn breaker_chain(
    mock: &Arc<MockHttpTransport>,
    breaker: &CircuitBreakerService,
) -> Responder {
    let transport: Arc<dyn HttpTransport> = mock.clone();
    let layers: Vec<Arc<dyn Middleware>> = vec![Arc::new(breaker.clone())];
    apply_middleware(&transport, &layers)
}

fn get() -> Request {
    Request::get("https://api.example.com/v1/status").unwrap()
}

#[tokio::test(start_paused = true)]
async fn test_default_breaker_trips_and_recovers() {
    // Arrange
    let mock = Arc::new(MockHttpTransport::new());
    let breaker = CircuitBreakerService::default();
    let chain = breaker_chain(&mock, &breaker);

    // Act - six consecutive server errors trip the default breaker
    for _ in 0..6 {
        mock.queue_response(MockResponse::new(500, "down"));
        let response = chain(get()).await.unwrap();
        assert_eq!(response.status, 500);
    }

    // Assert
    assert_eq!(breaker.state(), CircuitState::Open);
    assert_eq!(mock.request_count(), 6);

    let rejected = chain(get()).await.unwrap_err();
    assert!(rejected.is_circuit_breaker_rejection());
    assert!(matches!(
        rejected,
        ResilienceError::CircuitBreaker(CircuitBreakerError::Open)
    ));
    assert_eq!(mock.request_count(), 6);

    // After the open timeout a single trial call closes the breaker again
    tokio::time::advance(Duration::from_secs(60)).await;
    assert_eq!(breaker.state(), CircuitState::HalfOpen);

    mock.queue_response(MockResponse::new(200, "up"));
    let response = chain(get()).await.unwrap();
    assert_eq!(response.status, 200);
    assert_eq!(breaker.state(), CircuitState::Closed);
    assert_eq!(breaker.counts(), Counts::default());
}

#[tokio::test(start_paused = true)]
async fn test_half_open_limits_trial_calls() {
    // Arrange
    let mock = Arc::new(MockHttpTransport::new());
    mock.set_latency(Duration::from_secs(1));
    let breaker = CircuitBreakerService::new(
        CircuitBreakerSettings::default()
            .with_timeout(Duration::from_secs(10))
            .with_ready_to_trip(|counts: Counts| counts.consecutive_failures >= 1),
    );
    let chain = breaker_chain(&mock, &breaker);

    mock.queue_response(MockResponse::new(503, ""));
    chain(get()).await.unwrap();
    assert_eq!(breaker.state(), CircuitState::Open);
    tokio::time::advance(Duration::from_secs(10)).await;

    // Act - the first trial is in flight when the second arrives
    mock.queue_response(MockResponse::new(200, ""));
    let mut trial = chain(get());
    assert!(futures::poll!(&mut trial).is_pending());

    let second = chain(get()).await.unwrap_err();

    // Assert
    assert!(matches!(
        second,
        ResilienceError::CircuitBreaker(CircuitBreakerError::TooManyRequests)
    ));
    assert_eq!(trial.await.unwrap().status, 200);
    assert_eq!(breaker.state(), CircuitState::Closed);
    assert_eq!(mock.request_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_failed_trial_reopens() {
    let transitions = Arc::new(Mutex::new(Vec::new()));
    let recorder = transitions.clone();

    let mock = Arc::new(MockHttpTransport::new());
    let breaker = CircuitBreakerService::new(
        CircuitBreakerSettings::default()
            .with_timeout(Duration::from_secs(5))
            .with_ready_to_trip(|counts: Counts| counts.consecutive_failures >= 2)
            .with_hook(move |from: CircuitState, to: CircuitState| {
                recorder.lock().push(format!("{} -> {}", from, to))
            }),
    );
    let chain = breaker_chain(&mock, &breaker);

    mock.set_default_response(MockResponse::new(502, ""));
    chain(get()).await.unwrap();
    chain(get()).await.unwrap();
    tokio::time::advance(Duration::from_secs(5)).await;
    chain(get()).await.unwrap();

    assert_eq!(breaker.state(), CircuitState::Open);
    assert_eq!(
        *transitions.lock(),
        vec![
            "closed -> open".to_string(),
            "open -> half-open".to_string(),
            "half-open -> open".to_string(),
        ]
    );
}

#[tokio::test]
async fn test_client_errors_count_as_success() {
    let mock = Arc::new(MockHttpTransport::new());
    mock.set_default_response(MockResponse::new(404, ""));
    let breaker = CircuitBreakerService::default();
    let chain = breaker_chain(&mock, &breaker);

    for _ in 0..10 {
        chain(get()).await.unwrap();
    }

    assert_eq!(breaker.state(), CircuitState::Closed);
    assert_eq!(breaker.counts().total_successes, 10);
    assert_eq!(breaker.counts().total_failures, 0);
}

#[tokio::test]
async fn test_transport_errors_count_as_failure() {
    let mock = Arc::new(MockHttpTransport::new());
    let breaker = CircuitBreakerService::default();
    let chain = breaker_chain(&mock, &breaker);

    for _ in 0..3 {
        let error = chain(get()).await.unwrap_err();
        assert!(!error.is_circuit_breaker_rejection());
    }

    assert_eq!(
        breaker.counts(),
        Counts {
            requests: 3,
            total_successes: 0,
            total_failures: 3,
            consecutive_successes: 0,
            consecutive_failures: 3,
        }
    );
}
