//! HTTP Transport
//!
//! Transport interface and implementations sitting at the bottom of the
//! middleware chain.

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use crate::core::{HttpMethod, HttpResponse, Request, ResponseBody};
use crate::error::{ConfigurationError, NetworkError, RequestError, ResilienceError};

/// HTTP transport interface (for dependency injection).
#[async_trait]
pub trait HttpTransport: Send + Sync {
    /// Send an HTTP request.
    async fn send(&self, request: Request) -> Result<HttpResponse, ResilienceError>;

    /// Release pooled connections that are not in use.
    fn close_idle_connections(&self) {}
}

/// Default reqwest-based HTTP transport.
pub struct ReqwestHttpTransport {
    client: RwLock<reqwest::Client>,
    default_timeout: Duration,
}

impl ReqwestHttpTransport {
    /// Create new transport with default settings.
    pub fn new() -> Result<Self, ResilienceError> {
        Self::with_timeout(Duration::from_secs(30))
    }

    /// Create transport with a custom default timeout.
    pub fn with_timeout(timeout: Duration) -> Result<Self, ResilienceError> {
        Ok(Self {
            client: RwLock::new(Self::build_client(timeout)?),
            default_timeout: timeout,
        })
    }

    fn build_client(timeout: Duration) -> Result<reqwest::Client, ResilienceError> {
        reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| {
                ConfigurationError::InvalidConfig {
                    message: format!("failed to create HTTP client: {}", e),
                }
                .into()
            })
    }

    fn header_map(
        headers: &HashMap<String, String>,
    ) -> Result<reqwest::header::HeaderMap, RequestError> {
        let mut map = reqwest::header::HeaderMap::with_capacity(headers.len());
        for (name, value) in headers {
            let invalid = |message: String| RequestError::InvalidHeader {
                name: name.clone(),
                message,
            };
            let header_name = reqwest::header::HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| invalid(e.to_string()))?;
            let header_value =
                reqwest::header::HeaderValue::from_str(value).map_err(|e| invalid(e.to_string()))?;
            map.insert(header_name, header_value);
        }
        Ok(map)
    }

    fn map_send_error(error: reqwest::Error, timeout: Duration) -> ResilienceError {
        if error.is_timeout() {
            NetworkError::Timeout { timeout }.into()
        } else {
            NetworkError::ConnectionFailed {
                message: error.to_string(),
            }
            .into()
        }
    }
}

#[async_trait]
impl HttpTransport for ReqwestHttpTransport {
    async fn send(&self, request: Request) -> Result<HttpResponse, ResilienceError> {
        let context = request.context().clone();
        if let Some(error) = context.err() {
            return Err(error.into());
        }

        let timeout = request.timeout.unwrap_or(self.default_timeout);
        let client = self.client.read().clone();

        let method = match request.method {
            HttpMethod::Get => reqwest::Method::GET,
            HttpMethod::Head => reqwest::Method::HEAD,
            HttpMethod::Post => reqwest::Method::POST,
            HttpMethod::Put => reqwest::Method::PUT,
            HttpMethod::Patch => reqwest::Method::PATCH,
            HttpMethod::Delete => reqwest::Method::DELETE,
        };

        let headers = Self::header_map(&request.headers)?;
        let mut builder = client
            .request(method, request.url)
            .timeout(timeout)
            .headers(headers);
        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        let response = tokio::select! {
            biased;
            error = context.done() => return Err(error.into()),
            sent = builder.send() => sent.map_err(|e| Self::map_send_error(e, timeout))?,
        };

        let status = response.status().as_u16();
        let mut headers = HashMap::new();
        for (key, value) in response.headers() {
            if let Ok(v) = value.to_str() {
                headers.insert(key.as_str().to_ascii_lowercase(), v.to_string());
            }
        }

        let stream = response.bytes_stream().map(|chunk| {
            chunk.map_err(|e| NetworkError::BodyRead {
                message: e.to_string(),
            })
        });

        Ok(HttpResponse {
            status,
            headers,
            body: ResponseBody::from_stream(stream).bounded_by(context),
        })
    }

    /// Swap in a fresh client; the old pool is released once in-flight
    /// requests holding it complete.
    fn close_idle_connections(&self) {
        match Self::build_client(self.default_timeout) {
            Ok(fresh) => *self.client.write() = fresh,
            Err(error) => tracing::warn!(%error, "Failed to rebuild HTTP client"),
        }
    }
}

/// Canned response for [`MockHttpTransport`].
#[derive(Clone, Debug)]
pub struct MockResponse {
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub body: Bytes,
}

impl MockResponse {
    pub fn new(status: u16, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            headers: HashMap::new(),
            body: body.into(),
        }
    }

    pub fn json<T: serde::Serialize>(status: u16, body: &T) -> Self {
        let encoded = serde_json::to_vec(body).unwrap_or_default();
        Self::new(status, encoded).with_header("content-type", "application/json")
    }

    pub fn with_header(mut self, name: impl AsRef<str>, value: impl Into<String>) -> Self {
        self.headers
            .insert(name.as_ref().to_ascii_lowercase(), value.into());
        self
    }

    fn to_response(&self) -> HttpResponse {
        HttpResponse {
            status: self.status,
            headers: self.headers.clone(),
            body: ResponseBody::from_bytes(self.body.clone()),
        }
    }
}

#[derive(Clone, Debug)]
enum MockOutcome {
    Response(MockResponse),
    Error(NetworkError),
}

/// Mock HTTP transport for testing.
///
/// Queued outcomes are served first-in first-out; once the queue is empty
/// the default response (if any) is returned.
#[derive(Default)]
pub struct MockHttpTransport {
    outcomes: Mutex<VecDeque<MockOutcome>>,
    request_history: Mutex<Vec<Request>>,
    default_response: Mutex<Option<MockResponse>>,
    latency: Mutex<Option<Duration>>,
    idle_closes: AtomicU32,
}

impl MockHttpTransport {
    /// Create new mock transport.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a response to return.
    pub fn queue_response(&self, response: MockResponse) -> &Self {
        self.outcomes
            .lock()
            .push_back(MockOutcome::Response(response));
        self
    }

    /// Queue a transport-level failure.
    pub fn queue_error(&self, error: NetworkError) -> &Self {
        self.outcomes.lock().push_back(MockOutcome::Error(error));
        self
    }

    /// Set default response when queue is empty.
    pub fn set_default_response(&self, response: MockResponse) -> &Self {
        *self.default_response.lock() = Some(response);
        self
    }

    /// Delay every send by `latency`.
    pub fn set_latency(&self, latency: Duration) -> &Self {
        *self.latency.lock() = Some(latency);
        self
    }

    /// Get request history.
    pub fn get_requests(&self) -> Vec<Request> {
        self.request_history.lock().clone()
    }

    /// Number of requests seen.
    pub fn request_count(&self) -> usize {
        self.request_history.lock().len()
    }

    /// Get last request.
    pub fn get_last_request(&self) -> Option<Request> {
        self.request_history.lock().last().cloned()
    }

    /// Number of times idle connections were released.
    pub fn idle_close_count(&self) -> u32 {
        self.idle_closes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl HttpTransport for MockHttpTransport {
    async fn send(&self, request: Request) -> Result<HttpResponse, ResilienceError> {
        self.request_history.lock().push(request);

        let latency = *self.latency.lock();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }

        let outcome = self.outcomes.lock().pop_front().or_else(|| {
            self.default_response
                .lock()
                .clone()
                .map(MockOutcome::Response)
        });

        match outcome {
            Some(MockOutcome::Response(response)) => Ok(response.to_response()),
            Some(MockOutcome::Error(error)) => Err(error.into()),
            None => Err(NetworkError::ConnectionFailed {
                message: "No mock response available".to_string(),
            }
            .into()),
        }
    }

    fn close_idle_connections(&self) {
        self.idle_closes.fetch_add(1, Ordering::SeqCst);
    }
}

/// Create the default HTTP transport.
pub fn create_transport(
    timeout: Option<Duration>,
) -> Result<ReqwestHttpTransport, ResilienceError> {
    match timeout {
        Some(timeout) => ReqwestHttpTransport::with_timeout(timeout),
        None => ReqwestHttpTransport::new(),
    }
}

/// Create mock transport for testing.
pub fn create_mock_transport() -> MockHttpTransport {
    MockHttpTransport::new()
}
