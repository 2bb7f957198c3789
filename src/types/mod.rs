//! Types
//!
//! Credential configuration and bearer token types.

pub mod config;
pub mod token;

pub use config::*;
pub use token::*;
