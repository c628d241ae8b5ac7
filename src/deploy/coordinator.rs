//! Deployment coordinator.
//!
//! Connects scanner snapshots to the version table: clears versions whose
//! artifacts vanished, submits every known path, retries transient
//! conflicts once, and keeps the scan status shown on the diagnostics page.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::{Duration, Instant};

use crate::deploy::scanner::{PluginScanner, ScanError};
use crate::hosting::{AppLauncher, HostError, SiteHost};
use crate::observability::metrics;
use crate::resilience::backoff::jittered;
use crate::versioning::{MetadataReader, SubmitOutcome, TableWriter, VersionError, VersionTable};

/// Delay before re-submitting paths that reported "retry later".
pub const RETRY_DELAY: Duration = Duration::from_millis(500);

/// What one pass over a snapshot did.
#[derive(Debug, Default)]
pub struct ScanReport {
    pub promoted: Vec<String>,
    pub removed: Vec<String>,
    pub failures: Vec<(PathBuf, VersionError)>,
    /// Paths still conflicting after the retry.
    pub deferred: Vec<PathBuf>,
}

impl ScanReport {
    /// First failure for an artifact below `dir`.
    pub fn failure_under(&self, dir: &Path) -> Option<&VersionError> {
        self.failures
            .iter()
            .find(|(path, _)| path.starts_with(dir))
            .map(|(_, error)| error)
    }
}

/// Owns the live table and drives promotions from scans.
pub struct Deployer {
    table: VersionTable<SiteHost>,
    scanner: Arc<PluginScanner>,
    launcher: Arc<dyn AppLauncher>,
    probe_timeout: Duration,
    created: Instant,
    scanning: AtomicBool,
    warm_up: OnceLock<Duration>,
    last_scan_error: Mutex<Option<String>>,
}

/// Clears the scanning flag however the pass ends.
struct ScanningFlag<'a>(&'a AtomicBool);

impl<'a> ScanningFlag<'a> {
    fn raise(flag: &'a AtomicBool) -> Self {
        flag.store(true, Ordering::Release);
        Self(flag)
    }
}

impl Drop for ScanningFlag<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl Deployer {
    pub fn new(
        scanner: Arc<PluginScanner>,
        launcher: Arc<dyn AppLauncher>,
        reader: Arc<dyn MetadataReader>,
        probe_timeout: Duration,
    ) -> Self {
        Self {
            table: VersionTable::new(reader),
            scanner,
            launcher,
            probe_timeout,
            created: Instant::now(),
            scanning: AtomicBool::new(false),
            warm_up: OnceLock::new(),
            last_scan_error: Mutex::new(None),
        }
    }

    pub fn table(&self) -> &VersionTable<SiteHost> {
        &self.table
    }

    pub fn scanner(&self) -> &PluginScanner {
        &self.scanner
    }

    pub fn watch_folder(&self) -> &Path {
        self.scanner.root()
    }

    pub fn is_scanning(&self) -> bool {
        self.scanning.load(Ordering::Acquire)
    }

    /// Time from startup until the initial scan finished, once known.
    pub fn warm_up(&self) -> Option<Duration> {
        self.warm_up.get().copied()
    }

    pub fn last_scan_error(&self) -> Option<String> {
        self.last_scan_error.lock().ok().and_then(|e| e.clone())
    }

    fn set_last_error(&self, message: String) {
        if let Ok(mut last) = self.last_scan_error.lock() {
            *last = Some(message);
        }
    }

    /// First scan at startup; runs detached so the listener is up immediately.
    pub async fn initial_scan(self: Arc<Self>) {
        match self.rescan().await {
            Ok(report) => tracing::info!(
                promoted = report.promoted.len(),
                failures = report.failures.len(),
                deferred = report.deferred.len(),
                "Initial scan finished"
            ),
            Err(e) => {
                tracing::error!(error = %e, "Initial scan failed");
                self.set_last_error(e.to_string());
            }
        }
        let elapsed = self.created.elapsed();
        let _ = self.warm_up.set(elapsed);
        tracing::info!(warm_up = ?elapsed, versions = %self.table.versions_available(), "Warm-up complete");
    }

    /// Rescan the whole watch folder under the promotion lock.
    pub async fn rescan(&self) -> Result<ScanReport, ScanError> {
        let mut writer = self.table.writer().await;
        self.rescan_locked(&mut writer, None).await
    }

    /// Rescan `target` (or the whole folder) with a writer the caller already holds.
    pub async fn rescan_locked(
        &self,
        writer: &mut TableWriter<'_, SiteHost>,
        target: Option<&Path>,
    ) -> Result<ScanReport, ScanError> {
        let scanner = Arc::clone(&self.scanner);
        let target = target.map(Path::to_path_buf);
        let snapshot = tokio::task::spawn_blocking(move || match target {
            Some(target) => scanner.refresh_target(&target),
            None => scanner.refresh_plugins(),
        })
        .await
        .map_err(|e| ScanError::Task(e.to_string()))??;

        Ok(self.apply_snapshot(writer, &snapshot).await)
    }

    async fn apply_snapshot(&self, writer: &mut TableWriter<'_, SiteHost>, snapshot: &[PathBuf]) -> ScanReport {
        let _scanning = ScanningFlag::raise(&self.scanning);
        let mut report = ScanReport {
            removed: writer.clear_removed_versions().await,
            ..ScanReport::default()
        };

        let mut retry = Vec::new();
        for path in snapshot {
            if self.submit(writer, path, &mut report).await {
                retry.push(path.clone());
            }
        }

        if !retry.is_empty() {
            tokio::time::sleep(jittered(RETRY_DELAY)).await;
            for path in retry {
                if self.submit(writer, &path, &mut report).await {
                    tracing::warn!(path = %path.display(), "Artifact still busy, leaving it for the next scan");
                    report.deferred.push(path);
                }
            }
        }

        metrics::record_versions_loaded(self.table.len());
        report
    }

    /// Submit one path. Returns true when it should be retried.
    async fn submit(&self, writer: &mut TableWriter<'_, SiteHost>, path: &Path, report: &mut ScanReport) -> bool {
        let launcher = Arc::clone(&self.launcher);
        let probe_timeout = self.probe_timeout;
        let outcome = writer
            .submit_version(path, move |candidate| async move {
                SiteHost::start(candidate, launcher.as_ref(), probe_timeout)
                    .await
                    .map(Arc::new)
            })
            .await;

        match outcome {
            Ok(SubmitOutcome::Promoted { version, .. }) => {
                metrics::record_promotion("promoted");
                report.promoted.push(version);
                false
            }
            Ok(SubmitOutcome::RetryLater) => true,
            Ok(_) => false,
            Err(e) => {
                metrics::record_promotion("failed");
                tracing::error!(path = %path.display(), error = %e, "Version rejected");
                self.set_last_error(e.to_string());
                report.failures.push((path.to_path_buf(), e));
                false
            }
        }
    }

    /// Remove and dispose every live instance.
    pub async fn shutdown_all(&self) -> Vec<(String, HostError)> {
        let errors = self.table.writer().await.drain().await;
        metrics::record_versions_loaded(0);
        errors
    }
}
