//! Health gating and call history.
//!
//! # Data Flow
//! ```text
//! Warm-up (probe.rs):
//!     candidate instance started
//!     → GET /health (deadline bound)
//!     → status >= 500, error or timeout ⇒ candidate rejected
//!
//! Rolling history (timeslice.rs):
//!     proxied call finished
//!     → success or failure Timeslice records one event
//!     → /test renders the per-bucket rates
//! ```
//!
//! # Design Decisions
//! - The probe runs once per candidate; live instances are judged only by
//!   the traffic they serve
//! - Histories trade precision for constant memory

pub mod probe;
pub mod timeslice;

pub use probe::{warm_up, HEALTH_PATH};
pub use timeslice::{RatePoint, Timeslice};
