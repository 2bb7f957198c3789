//! Telemetry
//!
//! Structured logging setup. The resilience components emit `tracing`
//! events; this module installs a subscriber for them.

pub mod logging;

pub use logging::{init_logging, LogFormat, LogLevel, LoggingConfig};
