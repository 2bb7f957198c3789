//! Configuration Builder
//!
//! Fluent builder for client credentials configuration.

use secrecy::SecretString;
use url::Url;

use crate::error::{ConfigurationError, ResilienceError};
use crate::types::OAuthConfig;

/// Client credentials configuration builder.
#[derive(Default)]
pub struct OAuthConfigBuilder {
    token_url: Option<String>,
    client_id: Option<String>,
    client_secret: Option<SecretString>,
    scope: Option<String>,
}

impl OAuthConfigBuilder {
    /// Create new configuration builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set token endpoint.
    pub fn token_url(mut self, url: impl Into<String>) -> Self {
        self.token_url = Some(url.into());
        self
    }

    /// Set client ID.
    pub fn client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = Some(client_id.into());
        self
    }

    /// Set client secret.
    pub fn client_secret(mut self, client_secret: impl Into<String>) -> Self {
        self.client_secret = Some(SecretString::new(client_secret.into()));
        self
    }

    /// Set requested scope.
    pub fn scope(mut self, scope: impl Into<String>) -> Self {
        self.scope = Some(scope.into());
        self
    }

    /// Build the configuration.
    pub fn build(self) -> Result<OAuthConfig, ResilienceError> {
        let token_url = self.token_url.ok_or_else(|| ConfigurationError::MissingRequired {
            field: "token_url".to_string(),
        })?;

        let client_id = self
            .client_id
            .filter(|id| !id.is_empty())
            .ok_or_else(|| ConfigurationError::MissingRequired {
                field: "client_id".to_string(),
            })?;

        let token_url = Url::parse(&token_url)
            .map_err(|_| ConfigurationError::InvalidEndpoint { url: token_url.clone() })?;
        if !matches!(token_url.scheme(), "http" | "https") {
            return Err(ConfigurationError::InvalidEndpoint {
                url: token_url.to_string(),
            }
            .into());
        }

        Ok(OAuthConfig {
            token_url,
            client_id,
            client_secret: self.client_secret,
            scope: self.scope.filter(|s| !s.is_empty()),
        })
    }
}

/// Create a new configuration builder.
pub fn oauth_config() -> OAuthConfigBuilder {
    OAuthConfigBuilder::new()
}
