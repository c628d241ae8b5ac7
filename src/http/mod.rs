//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP/TLS connection
//!     → server.rs (Dispatcher: accept loops, worker pool, hyper connection)
//!     → request.rs (request ID, conversion to the instance request form)
//!     → [routing::VersionRouter decides]
//!     → response.rs (hop-by-hop stripping, flat or chunked body)
//!     → Send to client, connection closed
//! ```

pub mod request;
pub mod response;
pub mod server;

pub use request::{RequestIdExt, RequestIdLayer, X_REQUEST_ID};
pub use server::{build_app, Dispatcher, PeriodicCheck};
