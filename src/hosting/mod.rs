//! Hosting of backend application instances.
//!
//! # Data Flow
//! ```text
//! Candidate (from the version table)
//!     → AppLauncher::launch (process.rs starts the instance)
//!     → SiteHost::start (health probe gate)
//!     → admitted to the table, or disposed on probe failure
//!
//! Live traffic:
//!     AppRequest → SiteHost::request → HostedApp::direct_call → AppResponse
//!                        └─ call/failure counters + rolling histories
//! ```
//!
//! # Design Decisions
//! - The router only depends on the `HostedApp` capability, never on how an
//!   instance is actually run
//! - Every hosted instance is released through `Disposable::dispose`, which
//!   is idempotent

use std::path::PathBuf;

use axum::body::Bytes;
use axum::http::{HeaderMap, Method, StatusCode};
use futures_util::future::BoxFuture;
use thiserror::Error;

use crate::resilience::timeouts::DeadlineExceeded;
use crate::versioning::Candidate;

pub mod process;
pub mod site_host;

pub use process::ProcessLauncher;
pub use site_host::SiteHost;

/// Generic request form handed to a hosted instance.
#[derive(Debug, Clone)]
pub struct AppRequest {
    pub method: Method,
    /// Path and query, always starting with `/`.
    pub uri: String,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl AppRequest {
    pub fn get(uri: impl Into<String>) -> Self {
        Self {
            method: Method::GET,
            uri: uri.into(),
            headers: HeaderMap::new(),
            body: Bytes::new(),
        }
    }
}

/// Generic response form returned by a hosted instance.
#[derive(Debug, Clone)]
pub struct AppResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl AppResponse {
    pub fn new(status: StatusCode, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: body.into(),
        }
    }
}

/// Errors raised while starting, calling or stopping a hosted instance.
#[derive(Debug, Error)]
pub enum HostError {
    /// The artifact backing the candidate is gone.
    #[error("artifact not found: {}", .0.display())]
    MissingArtifact(PathBuf),

    /// The instance could not be started.
    #[error("launch failed: {0}")]
    Launch(String),

    /// The instance did not pass its warm-up health probe.
    #[error("health check failed for {version}: {reason}")]
    Warmup { version: String, reason: String },

    /// A forwarded call failed before producing a response.
    #[error("call failed: {0}")]
    Call(String),

    #[error(transparent)]
    Timeout(#[from] DeadlineExceeded),

    /// The instance has already been disposed.
    #[error("instance {0} has been shut down")]
    Disposed(String),

    #[error("shutdown failed: {0}")]
    Shutdown(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl HostError {
    pub fn is_warmup_failure(&self) -> bool {
        matches!(self, HostError::Warmup { .. })
    }
}

/// Minimal capability every running backend instance provides.
pub trait HostedApp: Send + Sync {
    /// Forward one request to the instance and wait for its full response.
    fn direct_call(&self, request: AppRequest) -> BoxFuture<'_, Result<AppResponse, HostError>>;

    /// Stop the instance and release its resources.
    fn shutdown(&self) -> BoxFuture<'_, Result<(), HostError>>;

    /// Non-fatal problem noticed while preparing the instance, if any.
    fn setup_warning(&self) -> Option<String> {
        None
    }
}

/// Starts instances for candidates that are about to be health-checked.
pub trait AppLauncher: Send + Sync {
    fn launch<'a>(
        &'a self,
        candidate: &'a Candidate,
    ) -> BoxFuture<'a, Result<Box<dyn HostedApp>, HostError>>;
}

/// Something owned by the version table that must be released exactly once
/// when it leaves the table.
pub trait Disposable: Send + Sync + 'static {
    fn dispose(&self) -> BoxFuture<'_, Result<(), HostError>>;
}
