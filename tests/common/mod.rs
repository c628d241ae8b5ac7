//! Shared utilities for integration tests.
#![allow(dead_code)]

use std::collections::HashSet;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::body::Body;
use axum::http::{HeaderMap, HeaderValue, Request, StatusCode};
use axum::Router;
use ed25519_dalek::{Signer, SigningKey as PackageKey};
use flate2::write::GzEncoder;
use flate2::Compression;
use futures_util::future::BoxFuture;
use jsonwebtoken::{encode, Algorithm, DecodingKey, EncodingKey, Header};
use serde_json::json;
use tokio::task::JoinHandle;
use tower::ServiceExt;

use version_proxy::config::{EndpointConfig, ProxyConfig};
use version_proxy::health::HEALTH_PATH;
use version_proxy::hosting::{AppLauncher, AppRequest, AppResponse, HostError, HostedApp};
use version_proxy::http::{build_app, Dispatcher};
use version_proxy::lifecycle::{Services, Shutdown};
use version_proxy::observability::LogTail;
use version_proxy::security::{AcceptInsecure, JwtSecurityCheck, SecurityCheck, SigningKey, SigningKeyCache};
use version_proxy::versioning::Candidate;

pub const BUILD_A: &str = "2024.03.07.1";
pub const BUILD_B: &str = "2024.04.01.1";
pub const ARTIFACT: &str = "app.toml";

pub const TOKEN_SECRET: &[u8] = b"integration-secret";
pub const AUDIENCE: &str = "api://orders";
pub const ISSUER_ROOT: &str = "https://sts.example.net/";
pub const TENANT: &str = "tenant-a";

/// In-memory instance. Echoes its version name, method and path.
pub struct StubApp {
    name: String,
    health: StatusCode,
    calls: Arc<AtomicUsize>,
    disposed: Arc<AtomicUsize>,
}

impl HostedApp for StubApp {
    fn direct_call(&self, request: AppRequest) -> BoxFuture<'_, Result<AppResponse, HostError>> {
        Box::pin(async move {
            if request.uri == HEALTH_PATH {
                return Ok(AppResponse::new(self.health, "health"));
            }
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut response = AppResponse::new(
                StatusCode::OK,
                format!("{} {} {}", self.name, request.method, request.uri),
            );
            response
                .headers
                .insert("x-served-by", HeaderValue::from_str(&self.name).unwrap());
            Ok(response)
        })
    }

    fn shutdown(&self) -> BoxFuture<'_, Result<(), HostError>> {
        Box::pin(async move {
            self.disposed.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
    }
}

/// Launches `StubApp`s; health can be failed per version name.
#[derive(Default)]
pub struct StubLauncher {
    unhealthy: Mutex<HashSet<String>>,
    launched: AtomicUsize,
    calls: Arc<AtomicUsize>,
    disposed: Arc<AtomicUsize>,
}

impl StubLauncher {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn fail_health_for(&self, version_name: &str) {
        self.unhealthy.lock().unwrap().insert(version_name.to_string());
    }

    pub fn launched(&self) -> usize {
        self.launched.load(Ordering::SeqCst)
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn disposed(&self) -> usize {
        self.disposed.load(Ordering::SeqCst)
    }
}

impl AppLauncher for StubLauncher {
    fn launch<'a>(&'a self, candidate: &'a Candidate) -> BoxFuture<'a, Result<Box<dyn HostedApp>, HostError>> {
        Box::pin(async move {
            self.launched.fetch_add(1, Ordering::SeqCst);
            let name = candidate.version_name();
            let health = if self.unhealthy.lock().unwrap().contains(&name) {
                StatusCode::INTERNAL_SERVER_ERROR
            } else {
                StatusCode::OK
            };
            Ok(Box::new(StubApp {
                name,
                health,
                calls: Arc::clone(&self.calls),
                disposed: Arc::clone(&self.disposed),
            }) as Box<dyn HostedApp>)
        })
    }
}

pub fn version_name(major: u32, build: &str) -> String {
    let parts: Vec<u32> = build.split('.').map(|p| p.parse().unwrap()).collect();
    format!("{}-{}.{:02}.{:02}.{}", major, parts[0], parts[1], parts[2], parts[3])
}

pub fn manifest(major: u32, build: &str) -> String {
    format!(
        "[app]\nmajor = {}\nbuild = \"{}\"\ncommand = \"stub\"\n",
        major, build
    )
}

/// Write an artifact under `root/dir` and return its path.
pub fn write_artifact(root: &Path, dir: &str, major: u32, build: &str) -> PathBuf {
    let dir = root.join(dir);
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join(ARTIFACT);
    std::fs::write(&path, manifest(major, build)).unwrap();
    path
}

pub fn trusted_key() -> PackageKey {
    PackageKey::from_bytes(&[7u8; 32])
}

pub fn rogue_key() -> PackageKey {
    PackageKey::from_bytes(&[9u8; 32])
}

/// Signature followed by the gzip tarball it covers.
pub fn signed_package(key: &PackageKey, files: &[(&str, String)]) -> Vec<u8> {
    let mut builder = tar::Builder::new(GzEncoder::new(Vec::new(), Compression::default()));
    for (name, body) in files {
        let mut header = tar::Header::new_gnu();
        header.set_size(body.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder.append_data(&mut header, name, body.as_bytes()).unwrap();
    }
    let payload = builder.into_inner().unwrap().finish().unwrap();

    let mut package = key.sign(&payload).to_bytes().to_vec();
    package.extend_from_slice(&payload);
    package
}

/// Security check accepting HS256 tokens minted by `mint_token`.
pub fn token_check() -> Arc<dyn SecurityCheck> {
    let keys = Arc::new(SigningKeyCache::new());
    keys.insert(
        "test",
        SigningKey {
            key: DecodingKey::from_secret(TOKEN_SECRET),
            algorithm: Algorithm::HS256,
        },
    );
    Arc::new(JwtSecurityCheck::new(keys, AUDIENCE, ISSUER_ROOT, TENANT))
}

pub fn mint_token() -> String {
    let mut header = Header::new(Algorithm::HS256);
    header.kid = Some("test".to_string());
    let exp = chrono::Utc::now().timestamp() + 600;
    encode(
        &header,
        &json!({
            "aud": AUDIENCE,
            "iss": format!("{}{}/", ISSUER_ROOT, TENANT),
            "exp": exp,
            "sub": "integration"
        }),
        &EncodingKey::from_secret(TOKEN_SECRET),
    )
    .unwrap()
}

/// A full set of services over a scratch watch folder.
pub struct Harness {
    pub dir: tempfile::TempDir,
    pub config: ProxyConfig,
    pub launcher: Arc<StubLauncher>,
    pub shutdown: Shutdown,
    pub services: Services,
    pub app: Router,
}

impl Harness {
    pub async fn new(security: Arc<dyn SecurityCheck>) -> Self {
        Self::configured(security, |_| {}).await
    }

    /// Like `new`, with `configure` applied to the config before startup.
    pub async fn configured(security: Arc<dyn SecurityCheck>, configure: impl FnOnce(&mut ProxyConfig)) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let mut config = ProxyConfig::default();
        config.listener.endpoints = vec![EndpointConfig::http("test", "127.0.0.1:0")];
        config.listener.periodic_check_ms = 100;
        config.deployment.watch_folder = dir.path().join("uploads");
        config.deployment.trusted_certificate = dir.path().join("trusted.key");
        config.deployment.watch_filesystem = false;
        config.deployment.sweep_interval_secs = 0;
        config.timeouts.health_probe_secs = 5;
        config.timeouts.drain_secs = 2;
        configure(&mut config);
        std::fs::write(
            &config.deployment.trusted_certificate,
            hex::encode(trusted_key().verifying_key().to_bytes()),
        )
        .unwrap();

        let launcher = StubLauncher::new();
        let shutdown = Shutdown::new();
        let services = Services::build(
            &config,
            Arc::clone(&launcher) as Arc<dyn AppLauncher>,
            security,
            LogTail::default(),
            &shutdown,
        )
        .unwrap();
        let app = build_app(Arc::clone(&services.router));

        let harness = Self {
            dir,
            config,
            launcher,
            shutdown,
            services,
            app,
        };
        harness.wait_for_warm_up().await;
        harness
    }

    pub async fn insecure() -> Self {
        Self::new(Arc::new(AcceptInsecure)).await
    }

    pub fn watch_folder(&self) -> &Path {
        &self.config.deployment.watch_folder
    }

    /// Deploy an artifact on disk and rescan.
    pub async fn deploy(&self, dir: &str, major: u32, build: &str) {
        write_artifact(self.watch_folder(), dir, major, build);
        self.services.deployer.rescan().await.unwrap();
    }

    async fn wait_for_warm_up(&self) {
        for _ in 0..100 {
            if self.services.deployer.warm_up().is_some() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("initial scan did not finish");
    }

    pub async fn send(&self, request: Request<Body>) -> (StatusCode, HeaderMap, String) {
        let response = self.app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let headers = response.headers().clone();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, headers, String::from_utf8_lossy(&body).into_owned())
    }

    pub async fn get(&self, uri: &str, version: Option<&str>) -> (StatusCode, String) {
        let mut builder = Request::builder().uri(uri);
        if let Some(version) = version {
            builder = builder.header("Version", version);
        }
        let (status, _, body) = self.send(builder.body(Body::empty()).unwrap()).await;
        (status, body)
    }

    pub async fn upload(&self, package: Vec<u8>) -> (StatusCode, String) {
        let request = Request::builder()
            .method("POST")
            .uri("/upload")
            .body(Body::from(package))
            .unwrap();
        let (status, _, body) = self.send(request).await;
        (status, body)
    }

    /// Directories directly under the watch folder.
    pub fn deployed_dirs(&self) -> Vec<PathBuf> {
        let mut dirs: Vec<PathBuf> = std::fs::read_dir(self.watch_folder())
            .unwrap()
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.is_dir())
            .collect();
        dirs.sort();
        dirs
    }

    /// Bind a dispatcher on an ephemeral port and serve in the background.
    pub async fn boot(self) -> Booted {
        let dispatcher = Dispatcher::bind(&self.config.listener, self.app.clone(), Arc::new(|| {}))
            .await
            .unwrap();
        let addr = dispatcher.local_addrs()[0].1;
        let shutdown = self.shutdown.clone();
        let drain = self.config.timeouts.drain();
        let launcher = Arc::clone(&self.launcher);
        let deployer = Arc::clone(&self.services.deployer);
        let dir = self.dir;
        let server = tokio::spawn(self.services.serve(dispatcher, shutdown.clone(), drain));
        Booted {
            _dir: dir,
            addr,
            shutdown,
            launcher,
            deployer,
            server,
        }
    }
}

pub struct Booted {
    _dir: tempfile::TempDir,
    pub addr: SocketAddr,
    pub shutdown: Shutdown,
    pub launcher: Arc<StubLauncher>,
    pub deployer: Arc<version_proxy::deploy::Deployer>,
    pub server: JoinHandle<()>,
}

impl Booted {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }
}
