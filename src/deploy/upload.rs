//! Upload pipeline for signed packages.
//!
//! # Data Flow
//! ```text
//! POST /upload (package body)
//!     → promotion lock acquired (held until the end)
//!     → <watch>/<timestamp>/upload.inpkg written from the body stream
//!     → signature verified, payload expanded, archive deleted
//!     → RefreshTarget(<timestamp>) promotes what the package holds
//!
//! SEARCH /upload
//!     → promotion lock acquired → full rescan
//! ```
//!
//! Any failure removes the staging directory.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use axum::body::Body;
use axum::http::{Method, StatusCode};
use chrono::Utc;
use futures_util::StreamExt;
use thiserror::Error;
use tokio::io::AsyncWriteExt;

use crate::deploy::coordinator::{Deployer, ScanReport};
use crate::deploy::package::{PackageError, PackageVerifier};
use crate::observability::metrics;

pub const ARCHIVE_NAME: &str = "upload.inpkg";

/// The scan-trigger verb accepted on the upload path.
pub const SEARCH: &str = "SEARCH";

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("Only POST and SEARCH methods accepted")]
    BadVerb(Method),

    #[error("package rejected: {0}")]
    Signature(#[source] PackageError),

    #[error("uploaded version failed its health check: {0}")]
    HealthCheck(String),

    #[error("upload failed: {0}")]
    Failed(String),
}

impl UploadError {
    pub fn status(&self) -> StatusCode {
        match self {
            UploadError::BadVerb(_) => StatusCode::BAD_REQUEST,
            UploadError::Signature(_) => StatusCode::FORBIDDEN,
            UploadError::HealthCheck(_) => StatusCode::BAD_REQUEST,
            UploadError::Failed(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn metric_label(&self) -> &'static str {
        match self {
            UploadError::BadVerb(_) => "bad_verb",
            UploadError::Signature(_) => "signature",
            UploadError::HealthCheck(_) => "health",
            UploadError::Failed(_) => "failed",
        }
    }
}

#[derive(Debug)]
pub enum UploadOutcome {
    /// A package was accepted; the versions it promoted.
    Accepted { directory: PathBuf, promoted: Vec<String> },
    /// A rescan was triggered.
    Rescanned(ScanReport),
}

/// Staging directory removed on drop unless kept.
struct StagingDir {
    path: PathBuf,
    keep: bool,
}

impl StagingDir {
    async fn create(watch_folder: &Path) -> Result<Self, UploadError> {
        let stamp = Utc::now().format("%Y%m%d_%H%M%S_%6f").to_string();
        let mut path = watch_folder.join(&stamp);
        let mut suffix = 1;
        while tokio::fs::try_exists(&path).await.unwrap_or(false) {
            path = watch_folder.join(format!("{}_{}", stamp, suffix));
            suffix += 1;
        }
        tokio::fs::create_dir_all(&path)
            .await
            .map_err(|e| UploadError::Failed(format!("create {}: {}", path.display(), e)))?;
        Ok(Self { path, keep: false })
    }

    fn keep(mut self) -> PathBuf {
        self.keep = true;
        self.path.clone()
    }
}

impl Drop for StagingDir {
    fn drop(&mut self) {
        if self.keep {
            return;
        }
        if let Err(e) = std::fs::remove_dir_all(&self.path) {
            tracing::warn!(path = %self.path.display(), error = %e, "Failed to remove staging directory");
        }
    }
}

pub struct UploadPipeline {
    deployer: Arc<Deployer>,
    verifier: Arc<dyn PackageVerifier>,
    trusted_cert: PathBuf,
}

impl UploadPipeline {
    pub fn new(deployer: Arc<Deployer>, verifier: Arc<dyn PackageVerifier>, trusted_cert: PathBuf) -> Self {
        Self {
            deployer,
            verifier,
            trusted_cert,
        }
    }

    /// Handle one request on the upload path.
    pub async fn accept(&self, method: &Method, body: Body) -> Result<UploadOutcome, UploadError> {
        let result = self.run(method, body).await;
        match &result {
            Ok(UploadOutcome::Accepted { directory, promoted }) => {
                metrics::record_upload("accepted");
                tracing::info!(directory = %directory.display(), promoted = ?promoted, "Upload accepted");
            }
            Ok(UploadOutcome::Rescanned(report)) => {
                metrics::record_upload("rescan");
                tracing::info!(promoted = ?report.promoted, removed = ?report.removed, "Rescan requested");
            }
            Err(e) => {
                metrics::record_upload(e.metric_label());
                tracing::warn!(error = %e, "Upload rejected");
            }
        }
        result
    }

    async fn run(&self, method: &Method, body: Body) -> Result<UploadOutcome, UploadError> {
        let is_search = method.as_str() == SEARCH;
        if !is_search && *method != Method::POST {
            return Err(UploadError::BadVerb(method.clone()));
        }

        let mut writer = self.deployer.table().writer().await;

        if is_search {
            let report = self
                .deployer
                .rescan_locked(&mut writer, None)
                .await
                .map_err(|e| UploadError::Failed(e.to_string()))?;
            return Ok(UploadOutcome::Rescanned(report));
        }

        if !self.trusted_cert.is_file() {
            return Err(UploadError::Failed(
                PackageError::CertificateMissing(self.trusted_cert.clone()).to_string(),
            ));
        }

        let staging = StagingDir::create(self.deployer.watch_folder()).await?;
        let archive = staging.path.join(ARCHIVE_NAME);
        persist(body, &archive).await?;

        let verifier = Arc::clone(&self.verifier);
        let (archive_path, target, cert) = (archive.clone(), staging.path.clone(), self.trusted_cert.clone());
        tokio::task::spawn_blocking(move || verifier.decompress_and_verify(&archive_path, &target, &cert))
            .await
            .map_err(|e| UploadError::Failed(e.to_string()))?
            .map_err(|e| {
                if e.is_signature_failure() {
                    UploadError::Signature(e)
                } else {
                    UploadError::Failed(e.to_string())
                }
            })?;

        tokio::fs::remove_file(&archive)
            .await
            .map_err(|e| UploadError::Failed(format!("remove {}: {}", archive.display(), e)))?;

        let report = self
            .deployer
            .rescan_locked(&mut writer, Some(&staging.path))
            .await
            .map_err(|e| UploadError::Failed(e.to_string()))?;

        if let Some(failure) = report.failure_under(&staging.path) {
            return Err(if failure.is_health_failure() {
                UploadError::HealthCheck(failure.to_string())
            } else {
                UploadError::Failed(failure.to_string())
            });
        }

        Ok(UploadOutcome::Accepted {
            directory: staging.keep(),
            promoted: report.promoted,
        })
    }
}

async fn persist(body: Body, archive: &Path) -> Result<(), UploadError> {
    let mut file = tokio::fs::File::create(archive)
        .await
        .map_err(|e| UploadError::Failed(format!("create {}: {}", archive.display(), e)))?;

    let mut stream = body.into_data_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| UploadError::Failed(format!("read upload body: {}", e)))?;
        file.write_all(&chunk)
            .await
            .map_err(|e| UploadError::Failed(format!("write {}: {}", archive.display(), e)))?;
    }
    file.flush()
        .await
        .map_err(|e| UploadError::Failed(format!("flush {}: {}", archive.display(), e)))?;
    Ok(())
}
