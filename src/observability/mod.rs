//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! All subsystems produce:
//!     → logging.rs (structured log events, stdout + in-memory tail)
//!     → metrics.rs (counters, gauges, histograms)
//!
//! Consumers:
//!     → stdout / log aggregation
//!     → /test diagnostics page (log tail)
//!     → Metrics endpoint (Prometheus scrape)
//! ```
//!
//! # Design Decisions
//! - Request ID flows through every request span
//! - Metrics are cheap (atomic increments)

pub mod logging;
pub mod metrics;

pub use logging::{init_logging, LogTail};
