//! Watch-folder scanner.
//!
//! # Responsibilities
//! - Walk the watch root (or one subfolder of it) for candidate artifacts
//! - Filter out files that belong to toolchains rather than applications
//! - Remember every path ever seen; disappearance is detected downstream
//! - Publish the full known set after every refresh

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use thiserror::Error;
use tokio::sync::watch;
use walkdir::WalkDir;

/// Full set of known artifact paths, published after every refresh.
pub type ScanSnapshot = Arc<Vec<PathBuf>>;

#[derive(Debug, Error)]
pub enum ScanError {
    #[error("watch folder does not exist: {}", .0.display())]
    RootMissing(PathBuf),

    #[error("scan target does not exist: {}", .0.display())]
    TargetMissing(PathBuf),

    #[error("scanner state is poisoned")]
    Poisoned,

    #[error("scan task failed: {0}")]
    Task(String),
}

/// File name prefixes skipped by default.
pub const DEFAULT_EXCLUDED_PREFIXES: [&str; 7] =
    ["Cargo.", "rust-toolchain", "rustfmt.", "clippy.", "deny.", "config.", "."];

/// Which file names are candidate artifacts.
#[derive(Debug, Clone)]
pub struct ScanFilter {
    extension: String,
    excluded_prefixes: Vec<String>,
}

impl ScanFilter {
    pub fn new(extension: impl Into<String>, excluded_prefixes: Vec<String>) -> Self {
        Self {
            extension: extension.into().trim_start_matches('.').to_ascii_lowercase(),
            excluded_prefixes,
        }
    }

    pub fn accepts(&self, path: &Path) -> bool {
        let extension_matches = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.eq_ignore_ascii_case(&self.extension))
            .unwrap_or(false);
        if !extension_matches {
            return false;
        }

        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            return false;
        };
        !self
            .excluded_prefixes
            .iter()
            .any(|prefix| name.starts_with(prefix.as_str()))
    }
}

impl Default for ScanFilter {
    fn default() -> Self {
        Self::new(
            "toml",
            DEFAULT_EXCLUDED_PREFIXES
                .iter()
                .map(|p| p.to_string())
                .collect(),
        )
    }
}

pub struct PluginScanner {
    root: PathBuf,
    filter: ScanFilter,
    known: Mutex<BTreeSet<PathBuf>>,
    changes: watch::Sender<ScanSnapshot>,
}

impl PluginScanner {
    pub fn new(root: impl Into<PathBuf>, filter: ScanFilter) -> Result<Self, ScanError> {
        let root = root.into();
        if !root.is_dir() {
            return Err(ScanError::RootMissing(root));
        }
        let (changes, _) = watch::channel(Arc::new(Vec::new()));
        Ok(Self {
            root,
            filter,
            known: Mutex::new(BTreeSet::new()),
            changes,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Rescan the whole watch root.
    pub fn refresh_plugins(&self) -> Result<ScanSnapshot, ScanError> {
        self.refresh_target(&self.root)
    }

    /// Rescan one folder and merge what it holds into the known set.
    pub fn refresh_target(&self, target: &Path) -> Result<ScanSnapshot, ScanError> {
        if !target.is_dir() {
            return Err(ScanError::TargetMissing(target.to_path_buf()));
        }

        let snapshot = {
            let mut known = self.known.lock().map_err(|_| ScanError::Poisoned)?;
            let before = known.len();

            for entry in WalkDir::new(target).follow_links(true) {
                let entry = match entry {
                    Ok(entry) => entry,
                    Err(e) => {
                        tracing::debug!(target = %target.display(), error = %e, "Skipping unreadable entry");
                        continue;
                    }
                };
                if entry.file_type().is_file() && self.filter.accepts(entry.path()) {
                    known.insert(entry.into_path());
                }
            }

            tracing::debug!(
                target = %target.display(),
                known = known.len(),
                new = known.len() - before,
                "Scan finished"
            );
            Arc::new(known.iter().cloned().collect::<Vec<_>>())
        };

        self.changes.send_replace(Arc::clone(&snapshot));
        Ok(snapshot)
    }

    /// The snapshot published by the most recent refresh.
    pub fn currently_available(&self) -> ScanSnapshot {
        Arc::clone(&self.changes.borrow())
    }

    /// Change notifications carrying the full snapshot.
    pub fn subscribe(&self) -> watch::Receiver<ScanSnapshot> {
        self.changes.subscribe()
    }
}
