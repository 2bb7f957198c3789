//! HTTP Response
//!
//! Response with a streaming body that can be drained for connection reuse.

use bytes::{Bytes, BytesMut};
use futures::stream::{self, BoxStream, StreamExt};
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::fmt;

use crate::core::RequestContext;
use crate::error::{NetworkError, ProtocolError, ResilienceError};

/// Bytes consumed from a discarded response body before it is closed.
pub const RESPONSE_BODY_READ_LIMIT: usize = 1024;

/// Streaming response body.
#[derive(Default)]
pub struct ResponseBody {
    stream: Option<BoxStream<'static, Result<Bytes, NetworkError>>>,
}

impl ResponseBody {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn from_bytes(bytes: impl Into<Bytes>) -> Self {
        let bytes: Bytes = bytes.into();
        if bytes.is_empty() {
            return Self::empty();
        }
        Self::from_stream(stream::once(async move { Ok(bytes) }))
    }

    pub fn from_stream<S>(stream: S) -> Self
    where
        S: futures::Stream<Item = Result<Bytes, NetworkError>> + Send + 'static,
    {
        Self {
            stream: Some(stream.boxed()),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.stream.is_none()
    }

    /// Stop reading once `context` is cancelled or past its deadline.
    ///
    /// The next read after that yields a [`NetworkError::BodyRead`] carrying
    /// the context error, and the body ends.
    pub fn bounded_by(self, context: RequestContext) -> Self {
        let Some(inner) = self.stream else {
            return Self::empty();
        };
        let guarded = stream::unfold(Some((inner, context)), |state| async move {
            let Some((mut inner, context)) = state else {
                return None;
            };
            let next = tokio::select! {
                biased;
                error = context.done() => Err(error),
                chunk = inner.next() => Ok(chunk),
            };
            match next {
                Ok(Some(chunk)) => Some((chunk, Some((inner, context)))),
                Ok(None) => None,
                Err(error) => Some((
                    Err(NetworkError::BodyRead {
                        message: error.to_string(),
                    }),
                    None,
                )),
            }
        });
        Self::from_stream(guarded)
    }

    /// Read and discard at most `limit` bytes, then close the body.
    ///
    /// Read errors are ignored; the body is closed either way. Returns the
    /// number of bytes discarded.
    pub async fn drain(&mut self, limit: usize) -> usize {
        let Some(mut stream) = self.stream.take() else {
            return 0;
        };
        let mut discarded = 0;
        while discarded < limit {
            match stream.next().await {
                Some(Ok(chunk)) => discarded += chunk.len().min(limit - discarded),
                Some(Err(_)) | None => break,
            }
        }
        discarded
    }

    /// Collect the remaining body.
    pub async fn bytes(mut self) -> Result<Bytes, ResilienceError> {
        let Some(mut stream) = self.stream.take() else {
            return Ok(Bytes::new());
        };
        let mut buf = BytesMut::new();
        while let Some(chunk) = stream.next().await {
            buf.extend_from_slice(&chunk?);
        }
        Ok(buf.freeze())
    }
}

impl fmt::Debug for ResponseBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResponseBody")
            .field("open", &self.stream.is_some())
            .finish()
    }
}

/// HTTP response returned along the middleware chain.
#[derive(Debug)]
pub struct HttpResponse {
    /// HTTP status code; 0 marks a malformed or absent status line.
    pub status: u16,
    /// Response headers, keys lower-cased.
    pub headers: HashMap<String, String>,
    /// Response body.
    pub body: ResponseBody,
}

impl HttpResponse {
    pub fn new(status: u16) -> Self {
        Self {
            status,
            headers: HashMap::new(),
            body: ResponseBody::empty(),
        }
    }

    pub fn with_header(mut self, name: impl AsRef<str>, value: impl Into<String>) -> Self {
        self.headers
            .insert(name.as_ref().to_ascii_lowercase(), value.into());
        self
    }

    pub fn with_body(mut self, body: ResponseBody) -> Self {
        self.body = body;
        self
    }

    /// Get a header value by case-insensitive name.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub async fn bytes(self) -> Result<Bytes, ResilienceError> {
        self.body.bytes().await
    }

    pub async fn text(self) -> Result<String, ResilienceError> {
        let bytes = self.bytes().await?;
        String::from_utf8(bytes.to_vec()).map_err(|e| {
            ProtocolError::InvalidResponse {
                message: e.to_string(),
            }
            .into()
        })
    }

    pub async fn json<T: DeserializeOwned>(self) -> Result<T, ResilienceError> {
        let bytes = self.bytes().await?;
        serde_json::from_slice(&bytes).map_err(|e| {
            ProtocolError::InvalidJson {
                message: e.to_string(),
            }
            .into()
        })
    }
}

/// Verify the status is one the caller should treat as a completed call.
///
/// 2xx, 404 and 304 pass; every other status is reported as
/// [`ResilienceError::UnexpectedStatus`].
pub fn assert_status_code(response: &HttpResponse) -> Result<(), ResilienceError> {
    match response.status {
        200..=299 | 304 | 404 => Ok(()),
        status => Err(ResilienceError::UnexpectedStatus { status }),
    }
}
