//! Routing subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming Request (connection info, path, headers)
//!     → router.rs: upgrade redirect?
//!     → matcher.rs: administrative path?      → admin handlers / upload pipeline
//!     → router.rs: security check             → 401 + versions
//!     → router.rs: table empty?               → 503
//!     → router.rs: Version header lookup      → 400 + versions
//!     → SiteHost::request under the deadline  → shaped response | 500 | 504
//! ```
//!
//! # Design Decisions
//! - Special paths are fixed at startup, immutable at runtime
//! - No regex in hot path (exact and prefix matching only)
//! - The version table is read lock-free; routing never waits on a promotion

pub mod matcher;
pub mod router;

pub use matcher::{SpecialPath, SpecialPaths};
pub use router::{ConnectionInfo, RouterSettings, UpgradeRedirect, VersionRouter, VERSION_HEADER};
