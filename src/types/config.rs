//! Configuration Types
//!
//! Client credentials grant configuration.

use secrecy::SecretString;
use std::fmt;
use url::Url;

use crate::builders::OAuthConfigBuilder;
use crate::error::ResilienceError;

/// Client credentials grant configuration.
#[derive(Clone)]
pub struct OAuthConfig {
    /// Token endpoint of the authorization server.
    pub token_url: Url,
    /// Client identifier.
    pub client_id: String,
    /// Client secret; omitted from the grant when absent.
    pub client_secret: Option<SecretString>,
    /// Requested scope (the API audience); omitted when absent.
    pub scope: Option<String>,
}

impl OAuthConfig {
    /// Start a configuration builder.
    pub fn builder() -> OAuthConfigBuilder {
        OAuthConfigBuilder::new()
    }

    /// Load from `RESILIENT_HTTP_OAUTH_*` environment variables.
    pub fn from_env() -> Result<Self, ResilienceError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load using an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ResilienceError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let value = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let mut builder = Self::builder();
        if let Some(url) = value("RESILIENT_HTTP_OAUTH_TOKEN_URL") {
            builder = builder.token_url(url);
        }
        if let Some(client_id) = value("RESILIENT_HTTP_OAUTH_CLIENT_ID") {
            builder = builder.client_id(client_id);
        }
        if let Some(secret) = value("RESILIENT_HTTP_OAUTH_CLIENT_SECRET") {
            builder = builder.client_secret(secret);
        }
        if let Some(scope) = value("RESILIENT_HTTP_OAUTH_SCOPE") {
            builder = builder.scope(scope);
        }
        builder.build()
    }
}

impl fmt::Debug for OAuthConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OAuthConfig")
            .field("token_url", &self.token_url.as_str())
            .field("client_id", &self.client_id)
            .field("client_secret", &"[REDACTED]")
            .field("scope", &self.scope)
            .finish()
    }
}
