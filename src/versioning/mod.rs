//! Version identity and the live version table.
//!
//! # Data Flow
//! ```text
//! artifact path (from the scanner)
//!     → metadata.rs (MetadataReader: major + build + launch spec)
//!     → table.rs (TableWriter::submit_version)
//!         ├─ older / equal build  → ignored
//!         ├─ vanished             → RetryLater
//!         └─ newer build          → factory (health gated) → swap → dispose old
//!
//! request routing:
//!     Version header → VersionTable::get_for_version_header → live instance
//! ```

pub mod build_version;
pub mod metadata;
pub mod table;

pub use build_version::{version_name, BuildVersion, ParseBuildVersionError};
pub use metadata::{ArtifactMetadata, Candidate, LaunchSpec, ManifestReader, MetadataError, MetadataReader};
pub use table::{LookupError, SubmitOutcome, TableWriter, VersionError, VersionTable};
