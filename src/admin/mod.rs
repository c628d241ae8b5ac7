//! Administrative paths answered by the proxy itself.
//!
//! # Data Flow
//! ```text
//! routing::SpecialPaths classifies the request
//!     → test_page.rs (/test: status, per-version health, log tail, history)
//!     → shutdown.rs  (/shutdown: drain the version table)
//!     → swagger.rs   (/swagger/*: docs aggregated from live versions)
//! ```
//!
//! # Design Decisions
//! - None of these paths require a bearer token or a `Version` header
//! - Failures render as ordinary responses; nothing here crashes the router

pub mod shutdown;
pub mod swagger;
pub mod test_page;

pub use shutdown::shutdown_instances;
pub use swagger::SwaggerResponder;
