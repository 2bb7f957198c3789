//! HTTP Request
//!
//! Request descriptor with a replayable body and an ambient cancellation
//! context.

use bytes::Bytes;
use std::collections::HashMap;
use std::fmt;
use std::io::Read;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::error::{ContextError, RequestError, ResilienceError};

/// HTTP method.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum HttpMethod {
    Get,
    Head,
    Post,
    Put,
    Patch,
    Delete,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Head => "HEAD",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Patch => "PATCH",
            Self::Delete => "DELETE",
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Zero-argument factory yielding a fresh view of the request payload.
pub type BodyProducer = Arc<dyn Fn() -> Result<Bytes, RequestError> + Send + Sync>;

/// Replayable request body.
///
/// Every call to [`RequestBody::produce`] yields an independent `Bytes` view;
/// the source buffer is never consumed, so the same logical body can be sent
/// on every retry attempt.
#[derive(Clone)]
pub struct RequestBody {
    producer: BodyProducer,
}

impl RequestBody {
    /// Body backed by an in-memory buffer.
    pub fn from_bytes(bytes: impl Into<Bytes>) -> Self {
        let buf: Bytes = bytes.into();
        Self::from_fn(move || Ok(buf.clone()))
    }

    /// Body serialized to JSON once, replayed from the encoded buffer.
    pub fn from_json<T: serde::Serialize + ?Sized>(value: &T) -> Result<Self, RequestError> {
        let encoded =
            serde_json::to_vec(value).map_err(|e| RequestError::BodySerialization {
                message: e.to_string(),
            })?;
        Ok(Self::from_bytes(encoded))
    }

    /// Body read fully from a one-shot reader so it can be replayed.
    pub fn from_reader<R: Read>(mut reader: R) -> Result<Self, RequestError> {
        let mut buf = Vec::new();
        reader
            .read_to_end(&mut buf)
            .map_err(|e| RequestError::BodyProducer {
                message: e.to_string(),
            })?;
        Ok(Self::from_bytes(buf))
    }

    /// Body backed by a caller-supplied producer.
    pub fn from_fn<F>(producer: F) -> Self
    where
        F: Fn() -> Result<Bytes, RequestError> + Send + Sync + 'static,
    {
        Self {
            producer: Arc::new(producer),
        }
    }

    /// Produce a fresh view of the payload.
    pub fn produce(&self) -> Result<Bytes, RequestError> {
        (self.producer)()
    }
}

impl fmt::Debug for RequestBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestBody").finish_non_exhaustive()
    }
}

impl From<Bytes> for RequestBody {
    fn from(bytes: Bytes) -> Self {
        Self::from_bytes(bytes)
    }
}

impl From<Vec<u8>> for RequestBody {
    fn from(bytes: Vec<u8>) -> Self {
        Self::from_bytes(bytes)
    }
}

impl From<String> for RequestBody {
    fn from(text: String) -> Self {
        Self::from_bytes(text)
    }
}

impl From<&'static str> for RequestBody {
    fn from(text: &'static str) -> Self {
        Self::from_bytes(Bytes::from_static(text.as_bytes()))
    }
}

/// Ambient cancellation and deadline for a request.
#[derive(Clone, Debug, Default)]
pub struct RequestContext {
    cancellation: CancellationToken,
    deadline: Option<Instant>,
}

impl RequestContext {
    /// Context that never fires unless cancelled explicitly.
    pub fn new() -> Self {
        Self::default()
    }

    /// Use an externally owned cancellation token.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }

    /// Set an absolute deadline.
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Set a deadline relative to now.
    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    /// Cancel this context and every clone of it.
    pub fn cancel(&self) {
        self.cancellation.cancel();
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Non-blocking check; cancellation wins over an elapsed deadline.
    pub fn err(&self) -> Option<ContextError> {
        if self.cancellation.is_cancelled() {
            return Some(ContextError::Cancelled);
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Some(ContextError::DeadlineExceeded),
            _ => None,
        }
    }

    /// Resolve once the context is cancelled or its deadline passes.
    pub async fn done(&self) -> ContextError {
        match self.deadline {
            Some(deadline) => tokio::select! {
                biased;
                _ = self.cancellation.cancelled() => ContextError::Cancelled,
                _ = tokio::time::sleep_until(deadline) => ContextError::DeadlineExceeded,
            },
            None => {
                self.cancellation.cancelled().await;
                ContextError::Cancelled
            }
        }
    }
}

/// HTTP request passed along the middleware chain.
#[derive(Clone, Debug)]
pub struct Request {
    /// HTTP method.
    pub method: HttpMethod,
    /// Target URL.
    pub url: Url,
    /// Request headers, keys lower-cased.
    pub headers: HashMap<String, String>,
    /// Body for the current attempt.
    pub body: Option<Bytes>,
    /// Per-request transport timeout.
    pub timeout: Option<Duration>,
    body_producer: Option<RequestBody>,
    context: RequestContext,
}

impl Request {
    /// Create a request without a body.
    pub fn new(method: HttpMethod, url: &str) -> Result<Self, ResilienceError> {
        let url = Url::parse(url).map_err(|e| RequestError::InvalidUrl {
            url: url.to_string(),
            message: e.to_string(),
        })?;
        Ok(Self::from_url(method, url))
    }

    pub fn from_url(method: HttpMethod, url: Url) -> Self {
        Self {
            method,
            url,
            headers: HashMap::new(),
            body: None,
            timeout: None,
            body_producer: None,
            context: RequestContext::default(),
        }
    }

    pub fn get(url: &str) -> Result<Self, ResilienceError> {
        Self::new(HttpMethod::Get, url)
    }

    pub fn post(url: &str) -> Result<Self, ResilienceError> {
        Self::new(HttpMethod::Post, url)
    }

    pub fn put(url: &str) -> Result<Self, ResilienceError> {
        Self::new(HttpMethod::Put, url)
    }

    pub fn delete(url: &str) -> Result<Self, ResilienceError> {
        Self::new(HttpMethod::Delete, url)
    }

    /// Set a header (name is lower-cased).
    pub fn header(mut self, name: impl AsRef<str>, value: impl Into<String>) -> Self {
        self.set_header(name, value);
        self
    }

    pub fn set_header(&mut self, name: impl AsRef<str>, value: impl Into<String>) {
        self.headers
            .insert(name.as_ref().to_ascii_lowercase(), value.into());
    }

    /// Get a header value by case-insensitive name.
    pub fn header_value(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    /// Attach a replayable body and materialize it for the first send.
    pub fn with_body(mut self, body: impl Into<RequestBody>) -> Result<Self, ResilienceError> {
        self.body_producer = Some(body.into());
        self.rewind_body()?;
        Ok(self)
    }

    /// Attach a JSON body and the matching content type.
    pub fn with_json<T: serde::Serialize + ?Sized>(
        self,
        value: &T,
    ) -> Result<Self, ResilienceError> {
        let body = RequestBody::from_json(value)?;
        self.header("content-type", "application/json; charset=utf-8")
            .with_body(body)
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_context(mut self, context: RequestContext) -> Self {
        self.context = context;
        self
    }

    pub fn context(&self) -> &RequestContext {
        &self.context
    }

    /// Replace the current body with a fresh view from the producer.
    ///
    /// Requests without a producer keep whatever body they already carry.
    pub fn rewind_body(&mut self) -> Result<(), RequestError> {
        if let Some(producer) = &self.body_producer {
            self.body = Some(producer.produce()?);
        }
        Ok(())
    }
}
