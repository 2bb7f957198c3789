//! Integration tests for the full decorator chain:
//! circuit breaker, retry, bearer credential, transport.

use resilient_http::{
    transport_responder, CircuitBreakerService, CircuitBreakerSettings, CircuitState, Counts,
    CredentialCache, EnrichableClient, HttpTransport, MockHttpTransport, MockResponse,
    OAuthConfig, OAuthMiddleware, ReqwestHttpTransport, Request, RequestContext, RetryConfig,
    RetryMiddleware, UserAgentMiddleware,
};
use std::sync::Arc;
use std::time::{Duration, Instant};
use wiremock::matchers::method;
use wiremock::{Mock, MockServer, ResponseTemplate};

struct Harness {
    api: Arc<MockHttpTransport>,
    auth: Arc<MockHttpTransport>,
    breaker: CircuitBreakerService,
    client: EnrichableClient,
}

fn harness(settings: CircuitBreakerSettings) -> Harness {
    let auth = Arc::new(MockHttpTransport::new());
    auth.set_default_response(MockResponse::json(
        200,
        &serde_json::json!({"access_token": "abc", "expires_in": 3600}),
    ));
    let auth_transport: Arc<dyn HttpTransport> = auth.clone();
    let config = OAuthConfig::builder()
        .token_url("https://auth.example.com/oauth/token")
        .client_id("svc")
        .client_secret("s3cret")
        .build()
        .unwrap();
    let credentials = Arc::new(CredentialCache::new(
        config,
        transport_responder(auth_transport),
    ));

    let api = Arc::new(MockHttpTransport::new());
    let breaker = CircuitBreakerService::new(settings);
    let client = EnrichableClient::new(api.clone())
        .with(breaker.clone())
        .with(RetryMiddleware::new(
            RetryConfig::default().with_wait(Duration::ZERO, Duration::ZERO),
        ))
        .with(OAuthMiddleware::new(credentials))
        .with(UserAgentMiddleware::new("orders", "2.0.1"));

    Harness {
        api,
        auth,
        breaker,
        client,
    }
}

fn create_order() -> Request {
    Request::post("https://api.example.com/v1/orders")
        .unwrap()
        .header("content-type", "application/json")
        .with_body(r#"{"sku":"A-1","qty":2}"#)
        .unwrap()
}

#[tokio::test]
async fn test_every_attempt_is_authorized_with_same_body() {
    // Arrange
    let h = harness(CircuitBreakerSettings::default());
    h.api.set_default_response(MockResponse::new(503, "busy"));

    // Act
    let response = h.client.send(create_order()).await.unwrap();

    // Assert - retries exhausted without an error return the last response
    assert_eq!(response.status, 503);
    let attempts = h.api.get_requests();
    assert_eq!(attempts.len(), 4);
    for attempt in &attempts {
        assert_eq!(attempt.header_value("authorization"), Some("Bearer abc"));
        assert_eq!(attempt.header_value("user-agent"), Some("orders/2.0.1"));
        assert_eq!(
            attempt.body.as_deref(),
            Some(&br#"{"sku":"A-1","qty":2}"#[..])
        );
    }
    assert_eq!(h.auth.request_count(), 1);

    // The breaker sees one failed call, not four
    assert_eq!(
        h.breaker.counts(),
        Counts {
            requests: 1,
            total_successes: 0,
            total_failures: 1,
            consecutive_successes: 0,
            consecutive_failures: 1,
        }
    );
}

#[tokio::test]
async fn test_recovery_within_retry_budget_counts_as_success() {
    let h = harness(CircuitBreakerSettings::default());
    h.api
        .queue_response(MockResponse::new(500, ""))
        .queue_response(MockResponse::new(201, r#"{"id":"o-1"}"#));

    let response = h.client.send(create_order()).await.unwrap();

    assert_eq!(response.status, 201);
    assert_eq!(h.api.request_count(), 2);
    assert_eq!(h.breaker.counts().total_successes, 1);
    assert_eq!(h.breaker.counts().total_failures, 0);
}

#[tokio::test]
async fn test_open_breaker_short_circuits_chain() {
    // Arrange
    let h = harness(
        CircuitBreakerSettings::default()
            .with_ready_to_trip(|counts: Counts| counts.consecutive_failures >= 1),
    );
    h.api.set_default_response(MockResponse::new(502, ""));
    h.client.send(create_order()).await.unwrap();
    assert_eq!(h.breaker.state(), CircuitState::Open);
    let sent = h.api.request_count();

    // Act
    let error = h.client.send(create_order()).await.unwrap_err();

    // Assert - the rejected call never reached the inner layers
    assert!(error.is_circuit_breaker_rejection());
    assert!(!error.is_retryable());
    assert_eq!(h.api.request_count(), sent);
    assert_eq!(h.auth.request_count(), 1);
}

#[tokio::test]
async fn test_credential_failure_never_reaches_api() {
    let h = harness(CircuitBreakerSettings::default());
    let auth_down = Arc::new(MockHttpTransport::new());
    auth_down.set_default_response(MockResponse::new(400, r#"{"error":"invalid_client"}"#));

    let config = OAuthConfig::builder()
        .token_url("https://auth.example.com/oauth/token")
        .client_id("svc")
        .build()
        .unwrap();
    let down: Arc<dyn HttpTransport> = auth_down.clone();
    let credentials = Arc::new(CredentialCache::new(config, transport_responder(down)));
    let client = EnrichableClient::new(h.api.clone())
        .with(RetryMiddleware::new(
            RetryConfig::default().with_wait(Duration::ZERO, Duration::ZERO),
        ))
        .with(OAuthMiddleware::new(credentials));

    let error = client.send(create_order()).await.unwrap_err();

    // The refresh failure surfaces as the call error and is retried like one
    assert_eq!(error.root_cause().error_code(), "HTTP_TOKEN");
    assert_eq!(h.api.request_count(), 0);
    assert_eq!(auth_down.request_count(), 4);
}

#[tokio::test]
async fn test_deadline_abandons_in_flight_call() {
    // Arrange
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(3)))
        .mount(&server)
        .await;
    let client = EnrichableClient::new(Arc::new(ReqwestHttpTransport::new().unwrap()))
        .with(RetryMiddleware::default());
    let request = Request::get(&server.uri())
        .unwrap()
        .with_context(RequestContext::new().with_timeout(Duration::from_millis(100)));

    // Act
    let started = Instant::now();
    let error = client.send(request).await.unwrap_err();

    // Assert
    assert!(started.elapsed() < Duration::from_secs(1));
    assert!(error.is_cancellation());
    assert!(error.to_string().ends_with("context deadline exceeded"));
}

#[tokio::test]
async fn test_cancelled_request_is_never_sent() {
    let h = harness(CircuitBreakerSettings::default());
    h.api.set_default_response(MockResponse::new(201, ""));

    let context = RequestContext::new();
    context.cancel();
    let error = h
        .client
        .send(create_order().with_context(context))
        .await
        .unwrap_err();

    assert!(error.is_cancellation());
    assert_eq!(h.api.request_count(), 0);
    assert_eq!(h.auth.request_count(), 0);
}
