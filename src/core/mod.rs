//! Core Components
//!
//! Request and response types, the transport seam and middleware composition.

pub mod middleware;
pub mod request;
pub mod response;
pub mod transport;

pub use middleware::*;
pub use request::*;
pub use response::*;
pub use transport::*;
