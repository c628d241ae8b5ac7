//! Startup orchestration.
//!
//! # Responsibilities
//! - Initialize subsystems in dependency order
//! - Start background tasks (initial scan, watcher, sweeper, key refresh)
//! - Serve until shutdown, then dispose every loaded instance
//!
//! # Design Decisions
//! - The initial scan runs detached: the listener is up while versions load
//! - A failed filesystem watcher is logged, not fatal; the sweep still runs

use std::sync::Arc;
use std::time::Duration;

use notify::RecommendedWatcher;
use thiserror::Error;
use tokio::task::JoinHandle;
use url::Url;

use crate::admin::SwaggerResponder;
use crate::config::schema::SecurityConfig;
use crate::config::ProxyConfig;
use crate::deploy::watcher::{run_rescans, spawn_sweeper};
use crate::deploy::{Deployer, FolderWatcher, PluginScanner, ScanError, ScanFilter, SignedTarballVerifier, UploadPipeline};
use crate::hosting::AppLauncher;
use crate::http::Dispatcher;
use crate::lifecycle::Shutdown;
use crate::net::ListenerError;
use crate::observability::LogTail;
use crate::routing::{RouterSettings, UpgradeRedirect, VersionRouter};
use crate::security::{AcceptInsecure, JwtSecurityCheck, SecurityCheck, SigningKeyCache};
use crate::versioning::ManifestReader;

#[derive(Debug, Error)]
pub enum StartupError {
    #[error("cannot prepare watch folder: {0}")]
    Io(#[from] std::io::Error),

    #[error("cannot scan watch folder: {0}")]
    Scan(#[from] ScanError),

    #[error("cannot listen: {0}")]
    Listener(#[from] ListenerError),
}

/// Build the admission check. Key discovery starts in the background.
pub fn security_from_config(config: &SecurityConfig) -> Arc<dyn SecurityCheck> {
    if !config.enabled {
        tracing::warn!("Token validation disabled, every request is admitted");
        return Arc::new(AcceptInsecure);
    }

    let keys = Arc::new(SigningKeyCache::new());
    match &config.key_discovery_url {
        Some(url) => {
            keys.spawn_refresh(url.clone(), config.key_fetch_timeout());
        }
        None => tracing::warn!("No key discovery URL configured, every token will fail validation"),
    }

    let check = JwtSecurityCheck::new(keys, config.audience.clone(), &config.issuer_root, &config.tenant_key);
    tracing::info!(issuer = %check.issuer(), audience = %config.audience, "Token validation enabled");
    Arc::new(check)
}

/// Everything the dispatcher serves, plus the tasks that keep it current.
pub struct Services {
    pub deployer: Arc<Deployer>,
    pub router: Arc<VersionRouter>,
    background: Vec<JoinHandle<()>>,
    _watcher: Option<RecommendedWatcher>,
}

impl Services {
    /// Wire up deployment and routing and start the background tasks.
    /// Must run inside the runtime.
    pub fn build(
        config: &ProxyConfig,
        launcher: Arc<dyn AppLauncher>,
        security: Arc<dyn SecurityCheck>,
        log_tail: LogTail,
        shutdown: &Shutdown,
    ) -> Result<Self, StartupError> {
        let deployment = &config.deployment;
        std::fs::create_dir_all(&deployment.watch_folder)?;

        let filter = ScanFilter::new(
            deployment.artifact_extension.clone(),
            deployment.excluded_prefixes.clone(),
        );
        let scanner = Arc::new(PluginScanner::new(&deployment.watch_folder, filter)?);
        let deployer = Arc::new(Deployer::new(
            scanner,
            launcher,
            Arc::new(ManifestReader::new()),
            config.timeouts.health_probe(),
        ));

        let uploads = UploadPipeline::new(
            Arc::clone(&deployer),
            Arc::new(SignedTarballVerifier),
            deployment.trusted_certificate.clone(),
        );

        let external = config
            .listener
            .external_endpoint
            .as_deref()
            .and_then(|e| Url::parse(e).ok());
        let upgrade_http = config.listener.upgrades_http();
        if config.listener.upgrade_http && !upgrade_http {
            tracing::warn!("Ignoring upgrade_http: no https endpoint is configured");
        }
        let swagger = SwaggerResponder::new(
            deployment.swagger_ui_folder.clone(),
            external.clone(),
            upgrade_http,
            config.listener.https_available(),
            config.timeouts.request(),
        );
        let settings = RouterSettings {
            upgrade: upgrade_http.then(|| UpgradeRedirect::new(external)),
            request_timeout: config.timeouts.request(),
            probe_timeout: config.timeouts.health_probe(),
            max_body_bytes: config.timeouts.max_body_bytes,
        };
        let router = Arc::new(VersionRouter::new(
            Arc::clone(&deployer),
            uploads,
            security,
            swagger,
            log_tail,
            settings,
        ));

        let mut background = vec![tokio::spawn(Arc::clone(&deployer).initial_scan())];

        let (folder_watcher, triggers) = FolderWatcher::new(&deployment.watch_folder);
        let watcher = if deployment.watch_filesystem {
            match folder_watcher.run() {
                Ok(watcher) => Some(watcher),
                Err(e) => {
                    tracing::warn!(error = %e, "Filesystem watcher unavailable, relying on sweeps");
                    None
                }
            }
        } else {
            None
        };
        background.extend(spawn_sweeper(
            deployment.sweep_interval(),
            folder_watcher.trigger_sender(),
            shutdown.subscribe(),
        ));
        background.push(tokio::spawn(run_rescans(
            Arc::clone(&deployer),
            triggers,
            shutdown.subscribe(),
        )));

        tracing::info!(
            watch_folder = %deployment.watch_folder.display(),
            watching = watcher.is_some(),
            "Deployment services started"
        );

        Ok(Self {
            deployer,
            router,
            background,
            _watcher: watcher,
        })
    }

    /// Serve until shutdown, then stop.
    pub async fn serve(self, dispatcher: Dispatcher, shutdown: Shutdown, drain: Duration) {
        dispatcher.serve(shutdown, drain).await;
        self.stop(drain).await;
    }

    /// Wait for the background tasks to see the shutdown, then dispose every
    /// loaded instance.
    pub async fn stop(self, drain: Duration) {
        // a scan in progress finishes so launched instances land in the table
        for task in self.background {
            if tokio::time::timeout(drain, task).await.is_err() {
                tracing::warn!("Background task still running at shutdown");
            }
        }

        let failures = self.deployer.shutdown_all().await;
        for (version, error) in &failures {
            tracing::error!(version = %version, error = %error, "Failed to dispose instance");
        }
        tracing::info!(failures = failures.len(), "All instances disposed");
    }
}
