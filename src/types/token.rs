//! Token Types
//!
//! Bearer token wire format and the cached credential.

use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use std::fmt;
use std::time::Duration;
use tokio::time::Instant;

/// Token response from the authorization server.
#[derive(Clone, Debug, Deserialize)]
pub struct BearerResponse {
    /// Access token.
    pub access_token: String,
    /// Token type (usually "Bearer").
    #[serde(default = "default_token_type")]
    pub token_type: String,
    /// Lifetime in seconds.
    #[serde(default)]
    pub expires_in: Option<i64>,
    /// Refresh token (unused by the client credentials grant).
    #[serde(default)]
    pub refresh_token: Option<String>,
}

fn default_token_type() -> String {
    "Bearer".to_string()
}

impl BearerResponse {
    /// Lifetime of the token; missing or negative values mean already expired.
    pub fn lifetime(&self) -> Duration {
        self.expires_in
            .and_then(|secs| u64::try_from(secs).ok())
            .map(Duration::from_secs)
            .unwrap_or(Duration::ZERO)
    }
}

/// Cached bearer credential.
#[derive(Clone)]
pub struct BearerCredential {
    access_token: SecretString,
    expires_at: Instant,
}

impl BearerCredential {
    pub fn new(access_token: impl Into<String>, expires_at: Instant) -> Self {
        Self {
            access_token: SecretString::new(access_token.into()),
            expires_at,
        }
    }

    /// Build from a token response received at `received_at`.
    pub fn from_response(response: &BearerResponse, received_at: Instant) -> Self {
        Self::new(
            response.access_token.clone(),
            received_at + response.lifetime(),
        )
    }

    pub fn access_token(&self) -> &str {
        self.access_token.expose_secret()
    }

    pub fn expires_at(&self) -> Instant {
        self.expires_at
    }

    /// Valid strictly before its expiry instant.
    pub fn is_valid_at(&self, now: Instant) -> bool {
        now < self.expires_at
    }

    pub fn is_valid(&self) -> bool {
        self.is_valid_at(Instant::now())
    }
}

impl fmt::Debug for BearerCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BearerCredential")
            .field("access_token", &"[REDACTED]")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}
