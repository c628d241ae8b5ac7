//! Resilience helpers.
//!
//! # Responsibilities
//! - Bound calls into hosted instances with deadlines (timeouts.rs)
//! - Space out retries of transient artifact conflicts (backoff.rs)

pub mod backoff;
pub mod timeouts;

pub use timeouts::{with_deadline, DeadlineExceeded};
