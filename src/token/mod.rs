//! Token Management
//!
//! Bearer credential caching and injection.

pub mod cache;

pub use cache::{CredentialCache, OAuthMiddleware};
