//! Deployment subsystem.
//!
//! # Data Flow
//! ```text
//! triggers: initial scan │ SEARCH /upload │ POST /upload │ notify event │ sweep
//!     → scanner.rs (known set ∪ walk(target), snapshot published)
//!     → coordinator.rs (clear removed, submit each path, retry once)
//!     → versioning::VersionTable (health-gated promotion)
//!
//! POST /upload:
//!     upload.rs → package.rs (verify signature, expand) → coordinator (RefreshTarget)
//! ```
//!
//! # Design Decisions
//! - Every path into the table holds the promotion lock, so uploads,
//!   watcher rescans and sweeps are serialized
//! - Snapshots are full sets, not diffs; reprocessing known paths is a no-op

pub mod coordinator;
pub mod package;
pub mod scanner;
pub mod upload;
pub mod watcher;

pub use coordinator::{Deployer, ScanReport};
pub use package::{PackageError, PackageVerifier, SignedTarballVerifier};
pub use scanner::{PluginScanner, ScanError, ScanFilter, ScanSnapshot};
pub use upload::{UploadError, UploadOutcome, UploadPipeline};
pub use watcher::{FolderWatcher, RescanTrigger};
