//! Deadlines for calls into hosted instances.
//!
//! Forwarded calls can take arbitrarily long, so every call made from the
//! edge (proxying, warm-up probes, documentation fetches) is bounded here.

use std::future::Future;
use std::time::Duration;

use thiserror::Error;

/// The bounded operation did not finish in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("deadline of {0:?} exceeded")]
pub struct DeadlineExceeded(pub Duration);

/// Run `fut` with a deadline, folding expiry into the caller's error type.
pub async fn with_deadline<T, E, F>(limit: Duration, fut: F) -> Result<T, E>
where
    F: Future<Output = Result<T, E>>,
    E: From<DeadlineExceeded>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(DeadlineExceeded(limit).into()),
    }
}
