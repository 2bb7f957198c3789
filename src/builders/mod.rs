//! Builders
//!
//! Fluent builders for configuration.

pub mod config;

pub use config::{oauth_config, OAuthConfigBuilder};
