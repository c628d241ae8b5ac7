//! Admission control.
//!
//! # Data Flow
//! ```text
//! startup
//!     → signing_keys.rs: JWKS fetched on a detached task → SigningKeyCache
//!
//! every proxied request
//!     → jwt.rs: bearer token from Authorization / WWW-Authenticate
//!     → signature + audience + issuer checked against the cached keys
//!     → Pass | Fail (Fail ⇒ 401 at the router)
//! ```
//!
//! # Design Decisions
//! - Validation never errors out to the caller; every problem is a `Fail`
//! - A stale key cache is accepted; refresh is best effort

use axum::http::HeaderMap;
use thiserror::Error;

pub mod jwt;
pub mod signing_keys;

pub use jwt::JwtSecurityCheck;
pub use signing_keys::{SigningKey, SigningKeyCache};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecurityOutcome {
    Pass,
    Fail,
}

#[derive(Debug, Error)]
pub enum SecurityError {
    #[error("token is malformed: {0}")]
    Malformed(String),

    #[error("no signing key for kid '{0}'")]
    UnknownKey(String),

    #[error("token rejected: {0}")]
    Rejected(String),

    #[error("signing key fetch failed: {0}")]
    KeyFetch(String),
}

/// Admission check run before a request is routed to a version.
pub trait SecurityCheck: Send + Sync {
    fn validate(&self, headers: &HeaderMap) -> SecurityOutcome;
}

/// Admits every request. Used when token validation is disabled.
#[derive(Debug, Clone, Copy, Default)]
pub struct AcceptInsecure;

impl SecurityCheck for AcceptInsecure {
    fn validate(&self, _headers: &HeaderMap) -> SecurityOutcome {
        SecurityOutcome::Pass
    }
}
