//! Artifact metadata extraction.
//!
//! # Responsibilities
//! - Decide whether a scanned file is an application artifact at all
//! - Extract the declared major version and build identity
//! - Describe how the artifact is launched
//!
//! The default reader understands a TOML manifest with an `[app]` table:
//!
//! ```toml
//! [app]
//! major = 2
//! build = "2024.03.07.12"
//! command = "./orders-api"
//! args = ["--listen", "127.0.0.1:{port}"]
//!
//! [app.env]
//! RUST_LOG = "info"
//! ```

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

use crate::resilience::backoff::calculate_backoff;
use crate::versioning::build_version::{version_name, BuildVersion};

/// How a hosted instance is started.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LaunchSpec {
    pub command: String,
    /// Arguments; `{port}` is replaced with the port the instance must listen on.
    pub args: Vec<String>,
    pub env: BTreeMap<String, String>,
}

/// Everything learned from an application artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactMetadata {
    /// Raw declared major. Values below 1 are rejected by the table.
    pub major: i64,
    pub minor: BuildVersion,
    pub launch: LaunchSpec,
}

/// A validated candidate handed to the instance factory.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub path: PathBuf,
    pub major: u32,
    pub minor: BuildVersion,
    pub launch: LaunchSpec,
}

impl Candidate {
    pub fn version_name(&self) -> String {
        version_name(self.major, &self.minor)
    }

    pub fn host_name(&self) -> String {
        self.minor.host_name(self.major)
    }

    /// Directory the artifact lives in; instances run from here.
    pub fn root(&self) -> &Path {
        self.path.parent().unwrap_or_else(|| Path::new("."))
    }
}

#[derive(Debug, Error)]
pub enum MetadataError {
    /// The file disappeared between listing and reading.
    #[error("artifact vanished while being read: {}", .0.display())]
    Vanished(PathBuf),

    #[error("artifact could not be read: {0}")]
    Io(#[from] io::Error),

    /// The artifact claims to be an application but its marker is unusable.
    #[error("malformed artifact {}: {reason}", path.display())]
    Malformed { path: PathBuf, reason: String },
}

/// Pluggable inspection step run for every scanned path.
pub trait MetadataReader: Send + Sync {
    /// Returns `Ok(None)` when the artifact carries no application marker.
    fn read(&self, path: &Path) -> Result<Option<ArtifactMetadata>, MetadataError>;
}

#[derive(Debug, Deserialize)]
struct ManifestFile {
    app: Option<AppSection>,
}

#[derive(Debug, Deserialize)]
struct AppSection {
    #[serde(default)]
    major: i64,
    build: String,
    command: String,
    #[serde(default)]
    args: Vec<String>,
    #[serde(default)]
    env: BTreeMap<String, String>,
}

/// Reads TOML application manifests, retrying transient IO failures.
#[derive(Debug, Clone)]
pub struct ManifestReader {
    attempts: u32,
    base_delay_ms: u64,
}

impl ManifestReader {
    pub fn new() -> Self {
        Self {
            attempts: 5,
            base_delay_ms: 250,
        }
    }

    fn read_text(&self, path: &Path) -> Result<String, MetadataError> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match fs::read_to_string(path) {
                Ok(text) => return Ok(text),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    return Err(MetadataError::Vanished(path.to_path_buf()));
                }
                Err(e) if e.kind() == io::ErrorKind::InvalidData => {
                    return Err(MetadataError::Malformed {
                        path: path.to_path_buf(),
                        reason: "not valid UTF-8".to_string(),
                    });
                }
                Err(e) if attempt >= self.attempts => return Err(MetadataError::Io(e)),
                Err(e) => {
                    let delay = calculate_backoff(attempt, self.base_delay_ms, self.base_delay_ms);
                    tracing::debug!(
                        path = %path.display(),
                        attempt,
                        error = %e,
                        delay = ?delay,
                        "Artifact read failed, retrying"
                    );
                    std::thread::sleep(delay);
                }
            }
        }
    }
}

impl Default for ManifestReader {
    fn default() -> Self {
        Self::new()
    }
}

impl MetadataReader for ManifestReader {
    fn read(&self, path: &Path) -> Result<Option<ArtifactMetadata>, MetadataError> {
        let text = self.read_text(path)?;

        let manifest: ManifestFile = toml::from_str(&text).map_err(|e| MetadataError::Malformed {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let Some(app) = manifest.app else {
            return Ok(None);
        };

        let minor = app
            .build
            .parse::<BuildVersion>()
            .map_err(|e| MetadataError::Malformed {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?;

        if app.command.trim().is_empty() {
            return Err(MetadataError::Malformed {
                path: path.to_path_buf(),
                reason: "empty launch command".to_string(),
            });
        }

        Ok(Some(ArtifactMetadata {
            major: app.major,
            minor,
            launch: LaunchSpec {
                command: app.command,
                args: app.args,
                env: app.env,
            },
        }))
    }
}
