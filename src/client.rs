//! Enrichable Client
//!
//! A thin client that runs requests through an ordered middleware chain on
//! top of a transport.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;

use crate::core::{
    apply_middleware, assert_status_code, responder, HttpMethod, HttpResponse, HttpTransport,
    Middleware, ReqwestHttpTransport, Request, Responder,
};
use crate::error::ResilienceError;

/// Client composing middleware over a transport.
///
/// Middleware registered first runs outermost, so the usual order is
/// circuit breaker, retry, credential injection.
#[derive(Clone)]
pub struct EnrichableClient {
    transport: Arc<dyn HttpTransport>,
    middleware: Vec<Arc<dyn Middleware>>,
}

impl EnrichableClient {
    pub fn new(transport: Arc<dyn HttpTransport>) -> Self {
        Self {
            transport,
            middleware: Vec::new(),
        }
    }

    /// Client over a pooled reqwest transport with default timeouts.
    pub fn with_default_transport() -> Result<Self, ResilienceError> {
        Ok(Self::new(Arc::new(ReqwestHttpTransport::new()?)))
    }

    /// Append a middleware layer.
    pub fn with(mut self, middleware: impl Middleware + 'static) -> Self {
        self.middleware.push(Arc::new(middleware));
        self
    }

    /// Append an already shared middleware layer.
    pub fn use_middleware(&mut self, middleware: Arc<dyn Middleware>) -> &mut Self {
        self.middleware.push(middleware);
        self
    }

    pub fn transport(&self) -> &Arc<dyn HttpTransport> {
        &self.transport
    }

    pub fn middleware_count(&self) -> usize {
        self.middleware.len()
    }

    /// Build the call chain for the currently registered middleware.
    pub fn responder(&self) -> Responder {
        apply_middleware(&self.transport, &self.middleware)
    }

    /// Send a request through the chain.
    pub async fn send(&self, request: Request) -> Result<HttpResponse, ResilienceError> {
        let call = self.responder();
        call(request).await
    }

    /// GET `url` and decode a JSON response.
    pub async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T, ResilienceError> {
        let request = Request::get(url)?.header("accept", "application/json");
        read_response(self.send(request).await?).await
    }

    /// Send `body` as JSON with `method` and decode a JSON response.
    pub async fn send_json<B, T>(
        &self,
        method: HttpMethod,
        url: &str,
        body: &B,
    ) -> Result<T, ResilienceError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let request = Request::new(method, url)?
            .header("accept", "application/json")
            .with_json(body)?;
        read_response(self.send(request).await?).await
    }
}

impl fmt::Debug for EnrichableClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EnrichableClient")
            .field("middleware", &self.middleware.len())
            .finish_non_exhaustive()
    }
}

/// Check the status and decode a JSON body.
pub async fn read_response<T: DeserializeOwned>(
    response: HttpResponse,
) -> Result<T, ResilienceError> {
    assert_status_code(&response)?;
    response.json().await
}

/// Sets `user-agent: {app}/{version}` on every request.
#[derive(Debug, Clone)]
pub struct UserAgentMiddleware {
    user_agent: Arc<str>,
}

impl UserAgentMiddleware {
    pub fn new(app: impl AsRef<str>, version: impl AsRef<str>) -> Self {
        Self {
            user_agent: format!("{}/{}", app.as_ref(), version.as_ref()).into(),
        }
    }

    pub fn user_agent(&self) -> &str {
        &self.user_agent
    }
}

impl Middleware for UserAgentMiddleware {
    fn wrap(&self, _transport: &Arc<dyn HttpTransport>, next: Responder) -> Responder {
        let user_agent = self.user_agent.clone();
        responder(move |mut request: Request| {
            request.set_header("user-agent", user_agent.to_string());
            next(request)
        })
    }
}
