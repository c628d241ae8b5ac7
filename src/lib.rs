//! Version-routing reverse proxy library.
//!
//! Hosts several builds of an API side by side, sends each request to the
//! live instance of the major version named in its `Version` header, and
//! promotes newly deployed builds only after they pass a health check.

// Core subsystems
pub mod config;
pub mod http;
pub mod net;
pub mod routing;

// Deployment and hosting
pub mod deploy;
pub mod health;
pub mod hosting;
pub mod versioning;

// Cross-cutting concerns
pub mod admin;
pub mod lifecycle;
pub mod observability;
pub mod resilience;
pub mod security;

pub use config::schema::ProxyConfig;
pub use http::Dispatcher;
pub use lifecycle::Shutdown;
