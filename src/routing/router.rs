//! Per-request decision pipeline.
//!
//! # Responsibilities
//! - Redirect plain connections to https when upgrading is enabled
//! - Answer the administrative paths
//! - Admit the request through the security check
//! - Select the live instance for the `Version` header and proxy to it
//!
//! # Design Decisions
//! - Every stage short-circuits with a complete response
//! - Failures list the loaded versions so clients can fix their header
//! - Proxy calls run under the request deadline

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::body::Body;
use axum::http::{header, HeaderMap, Request, StatusCode};
use axum::response::Response;
use url::Url;

use crate::admin::{self, SwaggerResponder};
use crate::deploy::{Deployer, UploadError, UploadOutcome, UploadPipeline};
use crate::hosting::{HostError, SiteHost};
use crate::http::request::{to_app_request, RequestIdExt};
use crate::http::response::{from_app_response, text, with_versions};
use crate::observability::{metrics, LogTail};
use crate::routing::matcher::{SpecialPath, SpecialPaths};
use crate::security::{SecurityCheck, SecurityOutcome};

/// Request header selecting the major version.
pub const VERSION_HEADER: &str = "version";

/// Facts about the connection a request arrived on, attached by the dispatcher.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConnectionInfo {
    pub secure: bool,
    pub peer: Option<SocketAddr>,
}

/// Where insecure requests are sent when upgrading to https.
#[derive(Debug, Clone)]
pub struct UpgradeRedirect {
    external: Option<Url>,
}

impl UpgradeRedirect {
    pub fn new(external: Option<Url>) -> Self {
        Self { external }
    }

    /// `None` when no host is known to redirect to.
    pub fn location(&self, headers: &HeaderMap, path_and_query: &str) -> Option<String> {
        match &self.external {
            Some(url) if url.scheme() == "https" => {
                let host = url.host_str()?;
                Some(match url.port() {
                    Some(port) => format!("https://{}:{}{}", host, port, path_and_query),
                    None => format!("https://{}{}", host, path_and_query),
                })
            }
            Some(url) => Some(format!("https://{}{}", url.host_str()?, path_and_query)),
            None => {
                let host = headers.get(header::HOST)?.to_str().ok()?;
                let host = host.rsplit_once(':').map(|(h, _)| h).unwrap_or(host);
                Some(format!("https://{}{}", host, path_and_query))
            }
        }
    }
}

pub struct RouterSettings {
    /// Set when plain-http requests must be redirected.
    pub upgrade: Option<UpgradeRedirect>,
    pub request_timeout: Duration,
    pub probe_timeout: Duration,
    pub max_body_bytes: usize,
}

pub struct VersionRouter {
    deployer: Arc<Deployer>,
    uploads: UploadPipeline,
    security: Arc<dyn SecurityCheck>,
    special: SpecialPaths,
    swagger: SwaggerResponder,
    log_tail: LogTail,
    settings: RouterSettings,
}

impl VersionRouter {
    pub fn new(
        deployer: Arc<Deployer>,
        uploads: UploadPipeline,
        security: Arc<dyn SecurityCheck>,
        swagger: SwaggerResponder,
        log_tail: LogTail,
        settings: RouterSettings,
    ) -> Self {
        Self {
            deployer,
            uploads,
            security,
            special: SpecialPaths::standard(),
            swagger,
            log_tail,
            settings,
        }
    }

    pub fn deployer(&self) -> &Arc<Deployer> {
        &self.deployer
    }

    pub async fn handle(&self, request: Request<Body>) -> Response {
        let start = Instant::now();
        let method = request.method().clone();
        let path_and_query = path_and_query(&request);
        let request_id = request.request_id().unwrap_or("-").to_string();

        let (outcome, response) = self.route(request, &path_and_query).await;

        tracing::debug!(
            request_id = %request_id,
            method = %method,
            path = %path_and_query,
            status = response.status().as_u16(),
            outcome,
            elapsed = ?start.elapsed(),
            "Request complete"
        );
        metrics::record_request(response.status().as_u16(), outcome, start);
        response
    }

    async fn route(&self, request: Request<Body>, path_and_query: &str) -> (&'static str, Response) {
        let connection = request
            .extensions()
            .get::<ConnectionInfo>()
            .copied()
            .unwrap_or_default();

        if let Some(upgrade) = &self.settings.upgrade {
            if !connection.secure {
                if let Some(location) = upgrade.location(request.headers(), path_and_query) {
                    return ("upgrade", redirect(&location));
                }
            }
        }

        if let Some(special) = self.special.classify(path_and_query) {
            return (special.label(), self.special_path(special, request).await);
        }

        let table = self.deployer.table();

        if self.security.validate(request.headers()) == SecurityOutcome::Fail {
            tracing::info!("Rejecting - security fail");
            return (
                "unauthorized",
                with_versions(
                    StatusCode::UNAUTHORIZED,
                    "Rejected: you didn't say the magic word",
                    &table.versions_available(),
                ),
            );
        }

        if table.is_empty() {
            tracing::info!("Rejecting - no loaded APIs");
            return (
                "unavailable",
                text(
                    StatusCode::SERVICE_UNAVAILABLE,
                    "\r\nRejected: no APIs are loaded into the host",
                ),
            );
        }

        let header = request
            .headers()
            .get(VERSION_HEADER)
            .and_then(|v| v.to_str().ok());
        let host = match table.get_for_version_header(header) {
            Ok(host) => host,
            Err(e) => {
                tracing::info!(reason = %e, "Rejecting - no matching API");
                return (
                    "no_version",
                    with_versions(
                        StatusCode::BAD_REQUEST,
                        "Rejected: You must supply a 'Version' header for a known major version",
                        &table.versions_available(),
                    ),
                );
            }
        };

        self.proxy(host, request).await
    }

    async fn proxy(&self, host: Arc<SiteHost>, request: Request<Body>) -> (&'static str, Response) {
        let client_version = request.version();
        let app_request = match to_app_request(request, self.settings.max_body_bytes).await {
            Ok(app_request) => app_request,
            Err(e) => {
                tracing::warn!(version = host.version_name(), error = %e, "Failed to read request body");
                return ("proxy_error", proxy_failure(&e.to_string(), &host));
            }
        };

        let started = Instant::now();
        match host.request(app_request, self.settings.request_timeout).await {
            Ok(response) => {
                tracing::debug!(version = host.version_name(), core = ?started.elapsed(), "Call complete");
                ("proxied", from_app_response(response, client_version))
            }
            Err(HostError::Timeout(e)) => {
                tracing::warn!(version = host.version_name(), error = %e, "Call timed out");
                (
                    "timeout",
                    text(
                        StatusCode::GATEWAY_TIMEOUT,
                        format!("Failure in the proxy parent:\r\n{}", e),
                    ),
                )
            }
            Err(e) => {
                tracing::warn!(version = host.version_name(), error = %e, "Call failed");
                ("proxy_error", proxy_failure(&e.to_string(), &host))
            }
        }
    }

    async fn special_path(&self, special: SpecialPath, request: Request<Body>) -> Response {
        match special {
            SpecialPath::Favicon => {
                tracing::debug!("Ignoring a favicon request");
                let mut response = Response::new(Body::empty());
                *response.status_mut() = StatusCode::GONE;
                response
            }
            SpecialPath::Swagger => {
                let host_header = request
                    .headers()
                    .get(header::HOST)
                    .and_then(|v| v.to_str().ok());
                self.swagger
                    .respond(request.uri().path(), host_header, self.deployer.table())
                    .await
            }
            SpecialPath::TestPage => {
                let state = admin::test_page::collect(
                    &self.deployer,
                    self.log_tail.contents(),
                    self.settings.probe_timeout,
                )
                .await;
                html(admin::test_page::render(&state))
            }
            SpecialPath::Shutdown => admin::shutdown_instances(request.method(), &self.deployer).await,
            SpecialPath::Upload => {
                let (parts, body) = request.into_parts();
                upload_response(self.uploads.accept(&parts.method, body).await)
            }
        }
    }
}

fn path_and_query<B>(request: &Request<B>) -> String {
    request
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| "/".to_string())
}

fn redirect(location: &str) -> Response {
    let mut response = Response::new(Body::empty());
    *response.status_mut() = StatusCode::MOVED_PERMANENTLY;
    if let Ok(value) = location.parse() {
        response.headers_mut().insert(header::LOCATION, value);
    }
    response
}

fn html(body: String) -> Response {
    let mut response = Response::new(Body::from(body));
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        header::HeaderValue::from_static("text/html; charset=utf-8"),
    );
    response
}

fn proxy_failure(error: &str, host: &SiteHost) -> Response {
    let mut body = format!("Failure in the proxy parent:\r\n{}", error);
    if let Some(last) = host.last_error() {
        body.push_str("The site host has error: ");
        body.push_str(&last);
    }
    text(StatusCode::INTERNAL_SERVER_ERROR, body)
}

fn upload_response(result: Result<UploadOutcome, UploadError>) -> Response {
    match result {
        Ok(UploadOutcome::Accepted { .. }) => text(
            StatusCode::ACCEPTED,
            "Upload accepted. New version will be available if applicable.",
        ),
        Ok(UploadOutcome::Rescanned(_)) => text(
            StatusCode::OK,
            "Rescan triggered. New version will be available if applicable.",
        ),
        Err(e) => {
            let body = match &e {
                UploadError::BadVerb(_) => e.to_string(),
                UploadError::Signature(_) => format!("Rejected upload due to signature failure: {}", e),
                UploadError::HealthCheck(_) => format!("Upload failed health check: {}", e),
                UploadError::Failed(_) => format!("Failed to accept upload: {}", e),
            };
            text(e.status(), body)
        }
    }
}
