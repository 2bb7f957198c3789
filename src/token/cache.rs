//! Credential Cache
//!
//! Lazily refreshed bearer credential shared by every request that passes
//! through the credential middleware.

use futures::future::FutureExt;
use parking_lot::RwLock;
use secrecy::ExposeSecret;
use std::sync::Arc;
use tokio::sync::Mutex as AsyncMutex;
use tokio::time::Instant;
use tracing::{debug, warn};
use url::form_urlencoded;

use crate::core::{
    apply_middleware, assert_status_code, HttpMethod, HttpTransport, Middleware, Request,
    RequestContext, Responder,
};
use crate::error::{ResilienceError, TokenError};
use crate::resilience::RetryMiddleware;
use crate::types::{BearerCredential, BearerResponse, OAuthConfig};

const GRANT_TYPE: &str = "client_credentials";
const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";

/// Client credentials bearer token cache.
///
/// Reads take a shared lock. A miss queues behind a single refresh gate and
/// re-checks the cache once admitted, so concurrent misses collapse into one
/// outbound refresh.
pub struct CredentialCache {
    config: OAuthConfig,
    responder: Responder,
    credential: RwLock<Option<BearerCredential>>,
    refresh_gate: AsyncMutex<()>,
}

impl CredentialCache {
    /// Create a cache refreshing through `responder`.
    pub fn new(config: OAuthConfig, responder: Responder) -> Self {
        Self {
            config,
            responder,
            credential: RwLock::new(None),
            refresh_gate: AsyncMutex::new(()),
        }
    }

    /// Create a cache refreshing through `transport` with default retries.
    pub fn with_transport(config: OAuthConfig, transport: Arc<dyn HttpTransport>) -> Self {
        let retry: Arc<dyn Middleware> = Arc::new(RetryMiddleware::default());
        let responder = apply_middleware(&transport, &[retry]);
        Self::new(config, responder)
    }

    pub fn config(&self) -> &OAuthConfig {
        &self.config
    }

    /// Snapshot of the cached credential, valid or not.
    pub fn current_credential(&self) -> Option<BearerCredential> {
        self.credential.read().clone()
    }

    /// Drop the cached credential so the next call refreshes.
    pub fn invalidate(&self) {
        *self.credential.write() = None;
    }

    /// Return a valid access token, refreshing it if needed.
    ///
    /// Waiting for another caller's refresh and the refresh itself both
    /// give up as soon as `context` is cancelled or expires.
    pub async fn get_token(&self, context: &RequestContext) -> Result<String, ResilienceError> {
        if let Some(token) = self.cached_token() {
            return Ok(token);
        }

        let _gate = tokio::select! {
            biased;
            error = context.done() => return Err(error.into()),
            gate = self.refresh_gate.lock() => gate,
        };

        // Another caller may have refreshed while this one waited.
        if let Some(token) = self.cached_token() {
            return Ok(token);
        }

        let credential = tokio::select! {
            biased;
            error = context.done() => return Err(error.into()),
            result = self.fetch_credential(context) => result?,
        };

        let token = credential.access_token().to_string();
        *self.credential.write() = Some(credential);
        Ok(token)
    }

    /// Set the `authorization` header of `request`.
    pub async fn authorize(&self, request: &mut Request) -> Result<(), ResilienceError> {
        let token = self.get_token(request.context()).await?;
        request.set_header("authorization", format!("Bearer {}", token));
        Ok(())
    }

    fn cached_token(&self) -> Option<String> {
        self.credential
            .read()
            .as_ref()
            .filter(|credential| credential.is_valid())
            .map(|credential| credential.access_token().to_string())
    }

    fn form_body(&self) -> String {
        let mut form = form_urlencoded::Serializer::new(String::new());
        form.append_pair("grant_type", GRANT_TYPE)
            .append_pair("client_id", &self.config.client_id);
        if let Some(secret) = &self.config.client_secret {
            if !secret.expose_secret().is_empty() {
                form.append_pair("client_secret", secret.expose_secret());
            }
        }
        if let Some(scope) = &self.config.scope {
            form.append_pair("scope", scope);
        }
        form.finish()
    }

    async fn fetch_credential(
        &self,
        context: &RequestContext,
    ) -> Result<BearerCredential, ResilienceError> {
        debug!(token_url = %self.config.token_url, "Refreshing bearer token");

        let request = Request::from_url(HttpMethod::Post, self.config.token_url.clone())
            .header("content-type", FORM_CONTENT_TYPE)
            .header("accept", "application/json")
            .with_context(context.clone())
            .with_body(self.form_body())?;

        let response = (self.responder)(request).await?;
        let status = response.status;

        if assert_status_code(&response).is_err() {
            let message = response.text().await.unwrap_or_default();
            warn!(status, "Bearer token refresh rejected");
            return Err(TokenError::RefreshFailed { status, message }.into());
        }

        let body = response.bytes().await?;
        let parsed: BearerResponse =
            serde_json::from_slice(&body).map_err(|e| TokenError::InvalidResponse {
                message: format!("HTTP {}: {}", status, e),
            })?;
        if parsed.access_token.is_empty() {
            return Err(TokenError::InvalidResponse {
                message: "empty access_token".to_string(),
            }
            .into());
        }

        let credential = BearerCredential::from_response(&parsed, Instant::now());
        debug!(
            expires_in = parsed.lifetime().as_secs(),
            token_type = %parsed.token_type,
            "Bearer token refreshed"
        );
        Ok(credential)
    }
}

impl std::fmt::Debug for CredentialCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialCache")
            .field("config", &self.config)
            .field("credential", &*self.credential.read())
            .finish_non_exhaustive()
    }
}

/// Middleware adding a bearer token to every request.
#[derive(Debug, Clone)]
pub struct OAuthMiddleware {
    cache: Arc<CredentialCache>,
}

impl OAuthMiddleware {
    pub fn new(cache: Arc<CredentialCache>) -> Self {
        Self { cache }
    }

    pub fn cache(&self) -> &Arc<CredentialCache> {
        &self.cache
    }
}

impl Middleware for OAuthMiddleware {
    fn wrap(&self, _transport: &Arc<dyn HttpTransport>, next: Responder) -> Responder {
        let cache = self.cache.clone();
        Arc::new(move |mut request: Request| {
            let cache = cache.clone();
            let next = next.clone();
            async move {
                cache.authorize(&mut request).await?;
                next(request).await
            }
            .boxed()
        })
    }
}
