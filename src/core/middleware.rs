//! Middleware Composition
//!
//! Each layer wraps the next call function and returns a new one with the
//! same signature, so layers compose by nesting.

use futures::future::{BoxFuture, FutureExt};
use std::future::Future;
use std::sync::Arc;

use crate::core::{HttpResponse, HttpTransport, Request};
use crate::error::ResilienceError;

/// A single "make one call" function.
pub type Responder =
    Arc<dyn Fn(Request) -> BoxFuture<'static, Result<HttpResponse, ResilienceError>> + Send + Sync>;

/// Build a [`Responder`] from an async closure.
pub fn responder<F, Fut>(f: F) -> Responder
where
    F: Fn(Request) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<HttpResponse, ResilienceError>> + Send + 'static,
{
    Arc::new(move |request| f(request).boxed())
}

/// Middleware interface.
///
/// `transport` is the pooled connection owner at the bottom of the chain; layers
/// use it to release idle connections when they abandon a call.
pub trait Middleware: Send + Sync {
    fn wrap(&self, transport: &Arc<dyn HttpTransport>, next: Responder) -> Responder;
}

impl<F> Middleware for F
where
    F: Fn(&Arc<dyn HttpTransport>, Responder) -> Responder + Send + Sync,
{
    fn wrap(&self, transport: &Arc<dyn HttpTransport>, next: Responder) -> Responder {
        self(transport, next)
    }
}

/// Innermost responder: hand the request to the transport.
///
/// A request whose context is already done never reaches the transport, and
/// an in-flight send is abandoned as soon as the context fires.
pub fn transport_responder(transport: Arc<dyn HttpTransport>) -> Responder {
    Arc::new(move |request: Request| {
        let transport = transport.clone();
        async move {
            let context = request.context().clone();
            if let Some(error) = context.err() {
                return Err(ResilienceError::from(error));
            }
            tokio::select! {
                biased;
                error = context.done() => Err(ResilienceError::from(error)),
                outcome = transport.send(request) => outcome,
            }
        }
        .boxed()
    })
}

/// Compose `middleware` over `transport`.
///
/// The first entry ends up outermost: `[a, b, c]` yields `a(b(c(transport)))`.
pub fn apply_middleware(
    transport: &Arc<dyn HttpTransport>,
    middleware: &[Arc<dyn Middleware>],
) -> Responder {
    middleware
        .iter()
        .rev()
        .fold(transport_responder(transport.clone()), |next, layer| {
            layer.wrap(transport, next)
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{MockHttpTransport, MockResponse, RequestContext};
    use crate::error::ContextError;
    use std::time::Duration;

    fn tagging(tag: &'static str) -> Arc<dyn Middleware> {
        Arc::new(move |_: &Arc<dyn HttpTransport>, next: Responder| {
            responder(move |mut request: Request| {
                let trail = request
                    .header_value("x-trail")
                    .map(|t| format!("{},{}", t, tag))
                    .unwrap_or_else(|| tag.to_string());
                request.set_header("x-trail", trail);
                next(request)
            })
        })
    }

    #[tokio::test]
    async fn test_first_middleware_is_outermost() {
        let mock = Arc::new(MockHttpTransport::new());
        mock.set_default_response(MockResponse::new(200, ""));
        let transport: Arc<dyn HttpTransport> = mock.clone();

        let chain = apply_middleware(&transport, &[tagging("a"), tagging("b"), tagging("c")]);
        let response = chain(Request::get("https://example.com").unwrap())
            .await
            .unwrap();
        assert_eq!(response.status, 200);

        let sent = mock.get_last_request().unwrap();
        assert_eq!(sent.header_value("x-trail"), Some("a,b,c"));
    }

    #[tokio::test]
    async fn test_done_context_never_reaches_transport() {
        let mock = Arc::new(MockHttpTransport::new());
        mock.set_default_response(MockResponse::new(200, ""));
        let call = transport_responder(mock.clone());

        let context = RequestContext::new();
        context.cancel();
        let request = Request::post("https://example.com")
            .unwrap()
            .with_context(context);
        let error = call(request).await.unwrap_err();

        assert!(matches!(
            error,
            ResilienceError::Context(ContextError::Cancelled)
        ));
        assert_eq!(mock.request_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_in_flight_send_abandoned_at_deadline() {
        let mock = Arc::new(MockHttpTransport::new());
        mock.set_default_response(MockResponse::new(200, ""))
            .set_latency(Duration::from_secs(3));
        let call = transport_responder(mock.clone());

        let started = tokio::time::Instant::now();
        let request = Request::get("https://example.com")
            .unwrap()
            .with_context(RequestContext::new().with_timeout(Duration::from_millis(100)));
        let error = call(request).await.unwrap_err();

        assert!(matches!(
            error,
            ResilienceError::Context(ContextError::DeadlineExceeded)
        ));
        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(mock.request_count(), 1);
    }

    #[tokio::test]
    async fn test_empty_chain_calls_transport() {
        let mock = Arc::new(MockHttpTransport::new());
        mock.queue_response(MockResponse::new(204, ""));
        let transport: Arc<dyn HttpTransport> = mock.clone();

        let chain = apply_middleware(&transport, &[]);
        let response = chain(Request::get("https://example.com").unwrap())
            .await
            .unwrap();
        assert_eq!(response.status, 204);
        assert_eq!(mock.request_count(), 1);
    }
}
