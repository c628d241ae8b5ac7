//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (startup.rs):
//!     Config → security check → deployer + router → background scans → Dispatcher
//!
//! Shutdown (shutdown.rs):
//!     Signal / parent exit → Stop accepting → Drain connections → Dispose instances
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → Trigger graceful shutdown
//!     Periodic tick → Parent process gone? → Trigger graceful shutdown
//! ```
//!
//! # Design Decisions
//! - Listeners start before the initial scan completes; requests get 503 until versions load
//! - Ordered shutdown: stop accept, drain, dispose
//! - Drain has a deadline; instances are disposed regardless

pub mod shutdown;
pub mod signals;
pub mod startup;

pub use shutdown::Shutdown;
pub use signals::{listen_for_signals, parent_watchdog};
pub use startup::{security_from_config, Services, StartupError};
