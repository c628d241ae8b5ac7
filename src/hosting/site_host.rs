//! A health-gated, accounted wrapper around one hosted instance.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use futures_util::future::BoxFuture;

use crate::health::{probe, RatePoint, Timeslice};
use crate::hosting::{AppLauncher, AppRequest, AppResponse, Disposable, HostError, HostedApp};
use crate::resilience::with_deadline;
use crate::versioning::Candidate;

/// Owns one running instance and its call accounting.
pub struct SiteHost {
    app: Box<dyn HostedApp>,
    target_path: PathBuf,
    major: u32,
    version_name: String,
    host_name: String,
    call_count: AtomicU64,
    failure_count: AtomicU64,
    success_history: Mutex<Timeslice>,
    failure_history: Mutex<Timeslice>,
    last_error: Mutex<Option<String>>,
    disposed: AtomicBool,
}

impl SiteHost {
    /// Launch the candidate and admit it only if its warm-up probe passes.
    /// On probe failure the started instance is shut down before returning.
    pub async fn start(
        candidate: Candidate,
        launcher: &dyn AppLauncher,
        probe_timeout: Duration,
    ) -> Result<Self, HostError> {
        if !candidate.path.is_file() {
            return Err(HostError::MissingArtifact(candidate.path));
        }

        let version_name = candidate.version_name();
        tracing::info!(
            version = %version_name,
            path = %candidate.path.display(),
            "Starting up site"
        );

        let app = launcher.launch(&candidate).await?;

        if let Err(e) = probe::warm_up(app.as_ref(), &version_name, probe_timeout).await {
            tracing::warn!(version = %version_name, error = %e, "Candidate failed warm-up");
            if let Err(stop) = app.shutdown().await {
                tracing::warn!(version = %version_name, error = %stop, "Failed to stop rejected candidate");
            }
            return Err(e);
        }

        let last_error = app.setup_warning();
        Ok(Self {
            app,
            major: candidate.major,
            host_name: candidate.host_name(),
            target_path: candidate.path,
            version_name,
            call_count: AtomicU64::new(0),
            failure_count: AtomicU64::new(0),
            success_history: Mutex::new(Timeslice::new()),
            failure_history: Mutex::new(Timeslice::new()),
            last_error: Mutex::new(last_error),
            disposed: AtomicBool::new(false),
        })
    }

    /// Forward a request under `limit` and account for its outcome.
    /// An expired deadline counts as a failure.
    pub async fn request(&self, request: AppRequest, limit: Duration) -> Result<AppResponse, HostError> {
        if self.disposed.load(Ordering::Acquire) {
            return Err(HostError::Disposed(self.version_name.clone()));
        }
        self.call_count.fetch_add(1, Ordering::Relaxed);

        match with_deadline(limit, self.app.direct_call(request)).await {
            Ok(response) => {
                if response.status.is_server_error() {
                    self.record_failure();
                } else {
                    record(&self.success_history);
                }
                Ok(response)
            }
            Err(e) => {
                self.record_failure();
                if let Ok(mut last) = self.last_error.lock() {
                    *last = Some(e.to_string());
                }
                Err(e)
            }
        }
    }

    /// Call the instance without touching the counters (diagnostics only).
    pub async fn direct_call(&self, request: AppRequest) -> Result<AppResponse, HostError> {
        self.app.direct_call(request).await
    }

    fn record_failure(&self) {
        self.failure_count.fetch_add(1, Ordering::Relaxed);
        record(&self.failure_history);
    }

    /// 0 with no calls, 1 with no failures, otherwise `1 - failures / calls`.
    pub fn success_rate(&self) -> f64 {
        let calls = self.call_count();
        let failures = self.failure_count();
        if calls == 0 {
            return 0.0;
        }
        if failures == 0 {
            return 1.0;
        }
        1.0 - failures as f64 / calls as f64
    }

    pub fn call_count(&self) -> u64 {
        self.call_count.load(Ordering::Relaxed)
    }

    pub fn failure_count(&self) -> u64 {
        self.failure_count.load(Ordering::Relaxed)
    }

    pub fn success_history(&self) -> Vec<RatePoint> {
        view(&self.success_history)
    }

    pub fn failure_history(&self) -> Vec<RatePoint> {
        view(&self.failure_history)
    }

    pub fn last_error(&self) -> Option<String> {
        self.last_error.lock().ok().and_then(|last| last.clone())
    }

    pub fn major(&self) -> u32 {
        self.major
    }

    pub fn version_name(&self) -> &str {
        &self.version_name
    }

    pub fn host_name(&self) -> &str {
        &self.host_name
    }

    pub fn target_path(&self) -> &Path {
        &self.target_path
    }
}

fn record(history: &Mutex<Timeslice>) {
    if let Ok(mut slice) = history.lock() {
        slice.record();
    }
}

fn view(history: &Mutex<Timeslice>) -> Vec<RatePoint> {
    history.lock().map(|mut slice| slice.view()).unwrap_or_default()
}

impl Disposable for SiteHost {
    fn dispose(&self) -> BoxFuture<'_, Result<(), HostError>> {
        Box::pin(async move {
            if self.disposed.swap(true, Ordering::AcqRel) {
                return Ok(());
            }
            tracing::info!(version = %self.version_name, "Shutting down site");
            self.app.shutdown().await
        })
    }
}

impl std::fmt::Debug for SiteHost {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SiteHost")
            .field("version", &self.version_name)
            .field("path", &self.target_path)
            .field("calls", &self.call_count())
            .field("failures", &self.failure_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::versioning::{BuildVersion, LaunchSpec};
    use axum::http::StatusCode;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    const LIMIT: Duration = Duration::from_secs(1);

    #[derive(Default)]
    struct Counters {
        launches: AtomicUsize,
        shutdowns: AtomicUsize,
    }

    struct ScriptedApp {
        health: StatusCode,
        counters: Arc<Counters>,
    }

    impl HostedApp for ScriptedApp {
        fn direct_call(&self, request: AppRequest) -> BoxFuture<'_, Result<AppResponse, HostError>> {
            Box::pin(async move {
                match request.uri.as_str() {
                    "/health" => Ok(AppResponse::new(self.health, "")),
                    "/boom" => Ok(AppResponse::new(StatusCode::INTERNAL_SERVER_ERROR, "boom")),
                    "/broken" => Err(HostError::Call("connection reset".into())),
                    "/hang" => {
                        tokio::time::sleep(Duration::from_secs(60)).await;
                        Ok(AppResponse::new(StatusCode::OK, "late"))
                    }
                    _ => Ok(AppResponse::new(StatusCode::OK, "fine")),
                }
            })
        }

        fn shutdown(&self) -> BoxFuture<'_, Result<(), HostError>> {
            self.counters.shutdowns.fetch_add(1, Ordering::SeqCst);
            Box::pin(async { Ok(()) })
        }
    }

    struct ScriptedLauncher {
        health: StatusCode,
        counters: Arc<Counters>,
    }

    impl AppLauncher for ScriptedLauncher {
        fn launch<'a>(&'a self, _: &'a Candidate) -> BoxFuture<'a, Result<Box<dyn HostedApp>, HostError>> {
            self.counters.launches.fetch_add(1, Ordering::SeqCst);
            let app = ScriptedApp {
                health: self.health,
                counters: Arc::clone(&self.counters),
            };
            Box::pin(async move { Ok(Box::new(app) as Box<dyn HostedApp>) })
        }
    }

    fn candidate(dir: &Path) -> Candidate {
        let path = dir.join("app.toml");
        std::fs::write(&path, "[app]").unwrap();
        Candidate {
            path,
            major: 1,
            minor: BuildVersion::new(2024, 1, 1, 1),
            launch: LaunchSpec::default(),
        }
    }

    async fn start(health: StatusCode, dir: &Path) -> (Result<SiteHost, HostError>, Arc<Counters>) {
        let counters = Arc::new(Counters::default());
        let launcher = ScriptedLauncher {
            health,
            counters: Arc::clone(&counters),
        };
        let host = SiteHost::start(candidate(dir), &launcher, Duration::from_secs(1)).await;
        (host, counters)
    }

    #[tokio::test]
    async fn failed_probe_disposes_candidate() {
        let dir = tempfile::tempdir().unwrap();
        let (host, counters) = start(StatusCode::INTERNAL_SERVER_ERROR, dir.path()).await;
        assert!(host.unwrap_err().is_warmup_failure());
        assert_eq!(counters.launches.load(Ordering::SeqCst), 1);
        assert_eq!(counters.shutdowns.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn missing_artifact_never_launches() {
        let dir = tempfile::tempdir().unwrap();
        let counters = Arc::new(Counters::default());
        let launcher = ScriptedLauncher {
            health: StatusCode::OK,
            counters: Arc::clone(&counters),
        };
        let mut c = candidate(dir.path());
        c.path = dir.path().join("nope.toml");
        let err = SiteHost::start(c, &launcher, Duration::from_secs(1)).await.unwrap_err();
        assert!(matches!(err, HostError::MissingArtifact(_)));
        assert_eq!(counters.launches.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn accounts_calls_and_failures() {
        let dir = tempfile::tempdir().unwrap();
        let (host, _) = start(StatusCode::OK, dir.path()).await;
        let host = host.unwrap();
        assert_eq!(host.version_name(), "1-2024.01.01.1");
        assert_eq!(host.host_name(), "1_2024_01_01_1");
        assert_eq!(host.success_rate(), 0.0);

        host.request(AppRequest::get("/a"), LIMIT).await.unwrap();
        host.request(AppRequest::get("/b"), LIMIT).await.unwrap();
        host.request(AppRequest::get("/c"), LIMIT).await.unwrap();
        assert_eq!(host.success_rate(), 1.0);

        let boom = host.request(AppRequest::get("/boom"), LIMIT).await.unwrap();
        assert_eq!(boom.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(host.call_count(), 4);
        assert_eq!(host.failure_count(), 1);
        assert_eq!(host.success_rate(), 0.75);
        assert!(host.last_error().is_none());

        assert!(host.request(AppRequest::get("/broken"), LIMIT).await.is_err());
        assert_eq!(host.failure_count(), 2);
        assert!(host.last_error().unwrap().contains("connection reset"));

        host.direct_call(AppRequest::get("/a")).await.unwrap();
        assert_eq!(host.call_count(), 5);
    }

    #[tokio::test]
    async fn dispose_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let (host, counters) = start(StatusCode::OK, dir.path()).await;
        let host = host.unwrap();

        host.dispose().await.unwrap();
        host.dispose().await.unwrap();
        assert_eq!(counters.shutdowns.load(Ordering::SeqCst), 1);
        assert!(matches!(
            host.request(AppRequest::get("/a"), LIMIT).await,
            Err(HostError::Disposed(_))
        ));
    }

    #[tokio::test]
    async fn expired_deadline_counts_as_failure() {
        let dir = tempfile::tempdir().unwrap();
        let (host, _) = start(StatusCode::OK, dir.path()).await;
        let host = host.unwrap();
        host.request(AppRequest::get("/a"), LIMIT).await.unwrap();

        let err = host
            .request(AppRequest::get("/hang"), Duration::from_millis(50))
            .await
            .unwrap_err();

        assert!(matches!(err, HostError::Timeout(_)));
        assert_eq!(host.call_count(), 2);
        assert_eq!(host.failure_count(), 1);
        assert_eq!(host.success_rate(), 0.5);
        assert!(host.last_error().unwrap().contains("deadline"));
    }
}
