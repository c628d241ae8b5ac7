//! Concurrent registry of live instances keyed by major version.
//!
//! # Responsibilities
//! - Hold at most one live instance per major version
//! - Only ever replace a live build with a newer one
//! - Dispose every instance that leaves the table exactly once
//! - Keep the display string and name list in step with the entries
//!
//! # Design Decisions
//! - Readers load an immutable snapshot through `ArcSwap`; they never block
//!   and never observe a half-applied mutation
//! - All mutation goes through a `TableWriter`, which holds the table-wide
//!   promotion lock for as long as it lives. Uploads hold one writer across
//!   unpacking and promotion so they cannot race a scan
//! - The instance factory only runs for candidates that would actually be
//!   promoted, and always under the promotion lock

use std::collections::BTreeMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use arc_swap::ArcSwap;
use thiserror::Error;
use tokio::sync::{Mutex, MutexGuard};

use crate::hosting::{Disposable, HostError};
use crate::versioning::build_version::{version_name, BuildVersion};
use crate::versioning::metadata::{Candidate, MetadataError, MetadataReader};

/// Why a header or exact-name lookup found nothing.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LookupError {
    #[error("no version header was supplied")]
    Missing,
    #[error("version '{0}' is malformed")]
    Malformed(String),
    #[error("major version in '{0}' is malformed")]
    MajorMalformed(String),
    #[error("build version in '{0}' is malformed")]
    MinorMalformed(String),
    #[error("no matching version is loaded")]
    NotLoaded,
    /// The major is loaded, but with a different build.
    #[error("version {requested} is not live, {live} serves that major version")]
    Superseded { requested: String, live: String },
}

/// Errors that reject a submitted artifact or a failed promotion.
#[derive(Debug, Error)]
pub enum VersionError {
    #[error("major version {major} declared by {} is invalid", path.display())]
    InvalidMajor { path: PathBuf, major: i64 },

    #[error("candidate {version} failed to start: {source}")]
    Promotion {
        version: String,
        #[source]
        source: HostError,
    },

    #[error("artifact inspection task failed: {0}")]
    Inspection(String),
}

impl VersionError {
    /// The candidate started but failed its warm-up health probe.
    pub fn is_health_failure(&self) -> bool {
        matches!(self, VersionError::Promotion { source, .. } if source.is_warmup_failure())
    }
}

/// Result of submitting one artifact path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// A new instance now serves this major version.
    Promoted {
        version: String,
        replaced: Option<String>,
    },
    /// The same build is already live.
    Unchanged { version: String },
    /// A newer build is already live; the artifact is ignored.
    Older { candidate: String, live: String },
    /// Not an application artifact, or its marker is unusable.
    Skipped { reason: String },
    /// The artifact vanished while it was being inspected; try again shortly.
    RetryLater,
}

struct Entry<T> {
    minor: BuildVersion,
    location: PathBuf,
    instance: Arc<T>,
}

impl<T> Clone for Entry<T> {
    fn clone(&self) -> Self {
        Self {
            minor: self.minor,
            location: self.location.clone(),
            instance: Arc::clone(&self.instance),
        }
    }
}

struct Snapshot<T> {
    entries: BTreeMap<u32, Entry<T>>,
    names: Vec<String>,
    available: String,
}

impl<T> Snapshot<T> {
    fn build(entries: BTreeMap<u32, Entry<T>>) -> Self {
        let names: Vec<String> = entries
            .iter()
            .map(|(major, entry)| version_name(*major, &entry.minor))
            .collect();
        let available = names.join(", ");
        Self {
            entries,
            names,
            available,
        }
    }
}

/// Registry of live instances, one per major version.
pub struct VersionTable<T: Disposable> {
    current: ArcSwap<Snapshot<T>>,
    promotion: Mutex<()>,
    reader: Arc<dyn MetadataReader>,
}

impl<T: Disposable> VersionTable<T> {
    pub fn new(reader: Arc<dyn MetadataReader>) -> Self {
        Self {
            current: ArcSwap::from_pointee(Snapshot::build(BTreeMap::new())),
            promotion: Mutex::new(()),
            reader,
        }
    }

    /// Acquire the promotion lock. Every mutation happens through the writer.
    pub async fn writer(&self) -> TableWriter<'_, T> {
        TableWriter {
            table: self,
            _guard: self.promotion.lock().await,
        }
    }

    /// Select the instance for a `Version` header value.
    pub fn get_for_version_header(&self, value: Option<&str>) -> Result<Arc<T>, LookupError> {
        let value = value.map(str::trim).filter(|v| !v.is_empty());
        let Some(value) = value else {
            return Err(LookupError::Missing);
        };
        let major: u32 = value
            .parse()
            .map_err(|_| LookupError::Malformed(value.to_string()))?;

        self.current
            .load()
            .entries
            .get(&major)
            .map(|entry| Arc::clone(&entry.instance))
            .ok_or(LookupError::NotLoaded)
    }

    /// Select the instance whose full name is exactly `name`.
    pub fn get_exact_version(&self, name: &str) -> Result<Arc<T>, LookupError> {
        let name = name.trim();
        let Some((major, minor)) = name.split_once('-') else {
            return Err(LookupError::Malformed(name.to_string()));
        };
        let major: u32 = major
            .parse()
            .map_err(|_| LookupError::MajorMalformed(name.to_string()))?;
        let minor: BuildVersion = minor
            .parse()
            .map_err(|_| LookupError::MinorMalformed(name.to_string()))?;

        let snapshot = self.current.load();
        let entry = snapshot.entries.get(&major).ok_or(LookupError::NotLoaded)?;
        if entry.minor != minor {
            return Err(LookupError::Superseded {
                requested: name.to_string(),
                live: version_name(major, &entry.minor),
            });
        }
        Ok(Arc::clone(&entry.instance))
    }

    /// All live instances, ordered by major version.
    pub fn all_versions(&self) -> Vec<Arc<T>> {
        self.current
            .load()
            .entries
            .values()
            .map(|entry| Arc::clone(&entry.instance))
            .collect()
    }

    /// Live version names joined by `", "`.
    pub fn versions_available(&self) -> String {
        self.current.load().available.clone()
    }

    pub fn version_names(&self) -> Vec<String> {
        self.current.load().names.clone()
    }

    /// Live build for a major version, if any.
    pub fn live_version(&self, major: u32) -> Option<BuildVersion> {
        self.current.load().entries.get(&major).map(|entry| entry.minor)
    }

    pub fn is_empty(&self) -> bool {
        self.current.load().entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.current.load().entries.len()
    }
}

/// Exclusive handle for mutating a `VersionTable`.
pub struct TableWriter<'a, T: Disposable> {
    table: &'a VersionTable<T>,
    _guard: MutexGuard<'a, ()>,
}

impl<'a, T: Disposable> TableWriter<'a, T> {
    pub fn table(&self) -> &'a VersionTable<T> {
        self.table
    }

    /// Inspect `path` and, if it carries a newer build for its major version,
    /// build an instance with `factory` and swap it in.
    ///
    /// The previous instance for that major is disposed after the swap. A
    /// factory failure leaves the table untouched.
    pub async fn submit_version<F, Fut>(
        &mut self,
        path: &Path,
        factory: F,
    ) -> Result<SubmitOutcome, VersionError>
    where
        F: FnOnce(Candidate) -> Fut,
        Fut: Future<Output = Result<Arc<T>, HostError>>,
    {
        if !path.exists() {
            return Ok(SubmitOutcome::Skipped {
                reason: "artifact no longer exists".to_string(),
            });
        }

        let reader = Arc::clone(&self.table.reader);
        let owned = path.to_path_buf();
        let inspected = tokio::task::spawn_blocking(move || reader.read(&owned))
            .await
            .map_err(|e| VersionError::Inspection(e.to_string()))?;

        let metadata = match inspected {
            Ok(Some(metadata)) => metadata,
            Ok(None) => {
                return Ok(SubmitOutcome::Skipped {
                    reason: "no application marker".to_string(),
                });
            }
            Err(MetadataError::Vanished(_)) => return Ok(SubmitOutcome::RetryLater),
            Err(e) => {
                tracing::debug!(path = %path.display(), error = %e, "Skipping artifact");
                return Ok(SubmitOutcome::Skipped {
                    reason: e.to_string(),
                });
            }
        };

        let major = u32::try_from(metadata.major)
            .ok()
            .filter(|major| *major >= 1)
            .ok_or_else(|| VersionError::InvalidMajor {
                path: path.to_path_buf(),
                major: metadata.major,
            })?;
        let candidate_name = version_name(major, &metadata.minor);

        let snapshot = self.table.current.load_full();
        if let Some(live) = snapshot.entries.get(&major) {
            let live_name = version_name(major, &live.minor);
            if live.minor == metadata.minor {
                return Ok(SubmitOutcome::Unchanged { version: live_name });
            }
            if live.minor > metadata.minor {
                tracing::debug!(
                    candidate = %candidate_name,
                    live = %live_name,
                    "Ignoring older build"
                );
                return Ok(SubmitOutcome::Older {
                    candidate: candidate_name,
                    live: live_name,
                });
            }
        }

        let candidate = Candidate {
            path: path.to_path_buf(),
            major,
            minor: metadata.minor,
            launch: metadata.launch,
        };
        let instance = factory(candidate)
            .await
            .map_err(|source| VersionError::Promotion {
                version: candidate_name.clone(),
                source,
            })?;

        let mut entries = snapshot.entries.clone();
        let replaced = entries.insert(
            major,
            Entry {
                minor: metadata.minor,
                location: path.to_path_buf(),
                instance,
            },
        );
        self.table.current.store(Arc::new(Snapshot::build(entries)));

        tracing::info!(
            major,
            version = %candidate_name,
            path = %path.display(),
            "Version promoted"
        );

        let replaced_name = match replaced {
            Some(old) => {
                let name = version_name(major, &old.minor);
                dispose(&name, &old.instance).await;
                Some(name)
            }
            None => None,
        };

        Ok(SubmitOutcome::Promoted {
            version: candidate_name,
            replaced: replaced_name,
        })
    }

    /// Remove and dispose every entry whose artifact no longer exists.
    /// Returns the names of the removed versions.
    pub async fn clear_removed_versions(&mut self) -> Vec<String> {
        let snapshot = self.table.current.load_full();
        let (kept, removed): (BTreeMap<_, _>, BTreeMap<_, _>) = snapshot
            .entries
            .iter()
            .map(|(major, entry)| (*major, entry.clone()))
            .partition(|(_, entry)| entry.location.exists());

        if removed.is_empty() {
            return Vec::new();
        }

        self.table.current.store(Arc::new(Snapshot::build(kept)));

        let mut names = Vec::with_capacity(removed.len());
        for (major, entry) in removed {
            let name = version_name(major, &entry.minor);
            tracing::info!(
                version = %name,
                path = %entry.location.display(),
                "Artifact removed, unloading version"
            );
            dispose(&name, &entry.instance).await;
            names.push(name);
        }
        names
    }

    /// Empty the table, disposing every instance.
    /// Returns the disposal errors keyed by version name.
    pub async fn drain(&mut self) -> Vec<(String, HostError)> {
        let snapshot = self.table.current.swap(Arc::new(Snapshot::build(BTreeMap::new())));

        let mut errors = Vec::new();
        for (major, entry) in snapshot.entries.iter() {
            let name = version_name(*major, &entry.minor);
            if let Err(e) = entry.instance.dispose().await {
                tracing::warn!(version = %name, error = %e, "Disposal failed");
                errors.push((name, e));
            }
        }
        errors
    }
}

async fn dispose<T: Disposable>(name: &str, instance: &Arc<T>) {
    if let Err(e) = instance.dispose().await {
        tracing::warn!(version = %name, error = %e, "Disposal of retired instance failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::versioning::metadata::ManifestReader;
    use futures_util::future::BoxFuture;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    #[derive(Debug, Default)]
    struct Instance {
        disposals: AtomicUsize,
    }

    impl Disposable for Instance {
        fn dispose(&self) -> BoxFuture<'_, Result<(), HostError>> {
            self.disposals.fetch_add(1, Ordering::SeqCst);
            Box::pin(async { Ok(()) })
        }
    }

    fn table() -> VersionTable<Instance> {
        VersionTable::new(Arc::new(ManifestReader::new()))
    }

    fn manifest(dir: &Path, name: &str, major: i64, build: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(
            &path,
            format!("[app]\nmajor = {major}\nbuild = \"{build}\"\ncommand = \"serve\"\n"),
        )
        .unwrap();
        path
    }

    async fn submit(
        table: &VersionTable<Instance>,
        path: &Path,
    ) -> (Result<SubmitOutcome, VersionError>, Arc<Instance>) {
        let instance = Arc::new(Instance::default());
        let handed = Arc::clone(&instance);
        let mut writer = table.writer().await;
        let outcome = writer
            .submit_version(path, move |_| async move { Ok(handed) })
            .await;
        (outcome, instance)
    }

    #[tokio::test]
    async fn promotes_then_replaces_with_newer() {
        let dir = tempfile::tempdir().unwrap();
        let table = table();
        let v1 = manifest(dir.path(), "a.toml", 1, "2024.1.1.1");
        let v2 = manifest(dir.path(), "b.toml", 1, "2024.1.2.1");

        let (outcome, first) = submit(&table, &v1).await;
        assert_eq!(
            outcome.unwrap(),
            SubmitOutcome::Promoted {
                version: "1-2024.01.01.1".into(),
                replaced: None
            }
        );

        let (outcome, second) = submit(&table, &v2).await;
        assert_eq!(
            outcome.unwrap(),
            SubmitOutcome::Promoted {
                version: "1-2024.01.02.1".into(),
                replaced: Some("1-2024.01.01.1".into())
            }
        );

        assert_eq!(first.disposals.load(Ordering::SeqCst), 1);
        assert_eq!(second.disposals.load(Ordering::SeqCst), 0);
        assert!(Arc::ptr_eq(
            &table.get_for_version_header(Some("1")).unwrap(),
            &second
        ));
        assert_eq!(table.versions_available(), "1-2024.01.02.1");
    }

    #[tokio::test]
    async fn older_and_equal_builds_are_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let table = table();
        let newer = manifest(dir.path(), "a.toml", 2, "2024.5.1.0");
        let older = manifest(dir.path(), "b.toml", 2, "2024.4.1.0");

        let (_, live) = submit(&table, &newer).await;

        let mut called = false;
        {
            let mut writer = table.writer().await;
            let outcome = writer
                .submit_version(&older, |_| {
                    called = true;
                    async { Ok(Arc::new(Instance::default())) }
                })
                .await
                .unwrap();
            assert!(matches!(outcome, SubmitOutcome::Older { .. }));

            let outcome = writer
                .submit_version(&newer, |_| async { Ok(Arc::new(Instance::default())) })
                .await
                .unwrap();
            assert_eq!(
                outcome,
                SubmitOutcome::Unchanged {
                    version: "2-2024.05.01.0".into()
                }
            );
        }

        assert!(!called);
        assert_eq!(live.disposals.load(Ordering::SeqCst), 0);
        assert_eq!(table.live_version(2), Some(BuildVersion::new(2024, 5, 1, 0)));
    }

    #[tokio::test]
    async fn invalid_major_is_rejected_without_side_effects() {
        let dir = tempfile::tempdir().unwrap();
        let table = table();
        let zero = manifest(dir.path(), "a.toml", 0, "2024.1.1.1");
        let negative = manifest(dir.path(), "b.toml", -4, "2024.1.1.1");

        let (outcome, _) = submit(&table, &zero).await;
        assert!(matches!(outcome, Err(VersionError::InvalidMajor { major: 0, .. })));
        let (outcome, _) = submit(&table, &negative).await;
        assert!(matches!(outcome, Err(VersionError::InvalidMajor { major: -4, .. })));
        assert!(table.is_empty());
    }

    #[tokio::test]
    async fn failed_factory_keeps_previous_version() {
        let dir = tempfile::tempdir().unwrap();
        let table = table();
        let good = manifest(dir.path(), "a.toml", 1, "2024.1.1.1");
        let bad = manifest(dir.path(), "b.toml", 1, "2024.9.9.9");

        let (_, live) = submit(&table, &good).await;
        let mut writer = table.writer().await;
        let outcome = writer
            .submit_version(&bad, |c| async move {
                Err(HostError::Warmup {
                    version: c.version_name(),
                    reason: "status 500".into(),
                })
            })
            .await;
        drop(writer);

        assert!(outcome.unwrap_err().is_health_failure());
        assert!(Arc::ptr_eq(&table.get_for_version_header(Some("1")).unwrap(), &live));
        assert_eq!(live.disposals.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn non_applications_and_missing_files() {
        let dir = tempfile::tempdir().unwrap();
        let table = table();
        let plain = dir.path().join("notes.toml");
        std::fs::write(&plain, "title = \"hello\"\n").unwrap();
        let broken = dir.path().join("broken.toml");
        std::fs::write(&broken, "[app\nmajor=").unwrap();

        let (outcome, _) = submit(&table, &plain).await;
        assert!(matches!(outcome.unwrap(), SubmitOutcome::Skipped { .. }));
        let (outcome, _) = submit(&table, &broken).await;
        assert!(matches!(outcome.unwrap(), SubmitOutcome::Skipped { .. }));
        let (outcome, _) = submit(&table, &dir.path().join("gone.toml")).await;
        assert!(matches!(outcome.unwrap(), SubmitOutcome::Skipped { .. }));
        assert!(table.is_empty());
    }

    #[tokio::test]
    async fn clear_removed_then_rescan_restores() {
        let dir = tempfile::tempdir().unwrap();
        let table = table();
        let v1 = manifest(dir.path(), "one.toml", 1, "2024.1.1.1");
        let v3 = manifest(dir.path(), "three.toml", 3, "2024.1.1.1");
        let (_, first) = submit(&table, &v1).await;
        submit(&table, &v3).await;
        assert_eq!(table.version_names(), vec!["1-2024.01.01.1", "3-2024.01.01.1"]);

        std::fs::remove_file(&v1).unwrap();
        let removed = table.writer().await.clear_removed_versions().await;
        assert_eq!(removed, vec!["1-2024.01.01.1"]);
        assert_eq!(first.disposals.load(Ordering::SeqCst), 1);
        assert_eq!(
            table.get_for_version_header(Some("1")).err(),
            Some(LookupError::NotLoaded)
        );

        let v1 = manifest(dir.path(), "one.toml", 1, "2024.1.1.1");
        let (outcome, _) = submit(&table, &v1).await;
        assert!(matches!(outcome.unwrap(), SubmitOutcome::Promoted { .. }));
        assert!(table.get_for_version_header(Some("1")).is_ok());
    }

    #[tokio::test]
    async fn monotonic_under_any_submission_order() {
        let builds = ["2024.3.1.0", "2024.1.1.0", "2024.3.1.2", "2023.12.31.9", "2024.3.1.1"];
        let dir = tempfile::tempdir().unwrap();
        let table = table();
        let mut best = BuildVersion::default();

        for (i, build) in builds.iter().enumerate() {
            let path = manifest(dir.path(), &format!("m{i}.toml"), 5, build);
            submit(&table, &path).await.0.unwrap();
            best = best.max(build.parse().unwrap());
            assert_eq!(table.live_version(5), Some(best));
        }
        assert_eq!(best, BuildVersion::new(2024, 3, 1, 2));
    }

    #[tokio::test]
    async fn header_and_exact_lookups() {
        let dir = tempfile::tempdir().unwrap();
        let table = table();
        let path = manifest(dir.path(), "a.toml", 4, "2024.2.3.4");
        submit(&table, &path).await;

        assert_eq!(table.get_for_version_header(None).err(), Some(LookupError::Missing));
        assert_eq!(table.get_for_version_header(Some("  ")).err(), Some(LookupError::Missing));
        assert!(matches!(
            table.get_for_version_header(Some("four")),
            Err(LookupError::Malformed(_))
        ));
        assert_eq!(table.get_for_version_header(Some("9")).err(), Some(LookupError::NotLoaded));
        assert!(table.get_for_version_header(Some(" 4 ")).is_ok());

        assert!(table.get_exact_version("4-2024.02.03.4").is_ok());
        assert!(matches!(table.get_exact_version("4"), Err(LookupError::Malformed(_))));
        assert!(matches!(
            table.get_exact_version("x-2024.02.03.4"),
            Err(LookupError::MajorMalformed(_))
        ));
        assert!(matches!(
            table.get_exact_version("4-2024.02"),
            Err(LookupError::MinorMalformed(_))
        ));
        assert!(matches!(
            table.get_exact_version("4-2024.02.03.1"),
            Err(LookupError::Superseded { .. })
        ));
        assert_eq!(
            table.get_exact_version("7-2024.02.03.4").err(),
            Some(LookupError::NotLoaded)
        );
    }

    #[tokio::test]
    async fn drain_disposes_each_once() {
        let dir = tempfile::tempdir().unwrap();
        let table = table();
        let (_, a) = submit(&table, &manifest(dir.path(), "a.toml", 1, "2024.1.1.1")).await;
        let (_, b) = submit(&table, &manifest(dir.path(), "b.toml", 2, "2024.1.1.1")).await;
        assert!(Arc::ptr_eq(table.all_versions().last().unwrap(), &b));

        let errors = table.writer().await.drain().await;
        assert!(errors.is_empty());
        assert!(table.is_empty());
        assert_eq!(table.versions_available(), "");
        assert_eq!(a.disposals.load(Ordering::SeqCst), 1);
        assert_eq!(b.disposals.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_submissions_keep_one_live_instance() {
        let dir = tempfile::tempdir().unwrap();
        let table = Arc::new(table());
        let paths: Vec<PathBuf> = [3, 7, 1, 8, 5, 2, 6, 4]
            .iter()
            .map(|day| manifest(dir.path(), &format!("m{day}.toml"), 1, &format!("2024.1.{day}.0")))
            .collect();

        let done = Arc::new(AtomicBool::new(false));
        let mut readers = tokio::task::JoinSet::new();
        for _ in 0..3 {
            let table = Arc::clone(&table);
            let done = Arc::clone(&done);
            readers.spawn(async move {
                let mut last = None;
                while !done.load(Ordering::SeqCst) {
                    let seen = table.live_version(1);
                    assert!(seen >= last, "saw {:?} after {:?}", seen, last);
                    if seen.is_some() {
                        assert!(table.get_for_version_header(Some("1")).is_ok());
                    }
                    last = seen;
                    tokio::task::yield_now().await;
                }
            });
        }

        let created = Arc::new(Mutex::new(Vec::new()));
        let mut submitters = tokio::task::JoinSet::new();
        for path in paths {
            let table = Arc::clone(&table);
            let created = Arc::clone(&created);
            submitters.spawn(async move {
                let mut writer = table.writer().await;
                writer
                    .submit_version(&path, move |_| async move {
                        tokio::time::sleep(Duration::from_millis(2)).await;
                        let instance = Arc::new(Instance::default());
                        created.lock().unwrap().push(Arc::clone(&instance));
                        Ok(instance)
                    })
                    .await
                    .unwrap()
            });
        }

        let mut promotions = 0;
        while let Some(outcome) = submitters.join_next().await {
            if matches!(outcome.unwrap(), SubmitOutcome::Promoted { .. }) {
                promotions += 1;
            }
        }
        done.store(true, Ordering::SeqCst);
        while let Some(reader) = readers.join_next().await {
            reader.unwrap();
        }

        assert_eq!(table.live_version(1), Some(BuildVersion::new(2024, 1, 8, 0)));
        let created = created.lock().unwrap();
        assert_eq!(created.len(), promotions);
        let disposals: usize = created.iter().map(|i| i.disposals.load(Ordering::SeqCst)).sum();
        assert_eq!(disposals, promotions - 1);
        let live = table.get_for_version_header(Some("1")).unwrap();
        assert_eq!(live.disposals.load(Ordering::SeqCst), 0);
        assert!(created.iter().all(|i| i.disposals.load(Ordering::SeqCst) <= 1));
    }
}
