//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the proxy.
//! All types derive Serde traits for deserialization from config files, and
//! every field has a default so an empty file is a runnable configuration.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::observability::logging::DEFAULT_TAIL_BYTES;

/// Root configuration for the proxy.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ProxyConfig {
    /// Listener configuration (endpoints, worker pool, TLS).
    pub listener: ListenerConfig,

    /// Watch folder and package handling.
    pub deployment: DeploymentConfig,

    /// Bearer token admission.
    pub security: SecurityConfig,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Scheme {
    Http,
    Https,
}

/// One listening endpoint.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EndpointConfig {
    /// Name used in logs; must be unique.
    pub name: String,

    /// Bind address (e.g., "0.0.0.0:8080").
    pub address: String,

    #[serde(default = "default_scheme")]
    pub scheme: Scheme,
}

fn default_scheme() -> Scheme {
    Scheme::Http
}

impl EndpointConfig {
    pub fn http(name: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            address: address.into(),
            scheme: Scheme::Http,
        }
    }

    pub fn is_secure(&self) -> bool {
        self.scheme == Scheme::Https
    }
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    pub endpoints: Vec<EndpointConfig>,

    /// Worker pool width: connections handled at once.
    pub parallelism: usize,

    /// Accepted connections allowed to wait for a worker.
    pub max_queued: usize,

    /// Accept loop wakes at least this often to run the liveness check.
    pub periodic_check_ms: u64,

    /// Public address of the proxy, used for upgrade redirects and swagger hosts.
    pub external_endpoint: Option<String>,

    /// Redirect plain-http requests to https when an https endpoint exists.
    pub upgrade_http: bool,

    /// Optional TLS configuration, required by https endpoints.
    pub tls: Option<TlsConfig>,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            endpoints: vec![EndpointConfig::http("default", "0.0.0.0:8080")],
            parallelism: 20,
            max_queued: 1_000,
            periodic_check_ms: 1_500,
            external_endpoint: None,
            upgrade_http: false,
            tls: None,
        }
    }
}

impl ListenerConfig {
    pub fn periodic_check(&self) -> Duration {
        Duration::from_millis(self.periodic_check_ms)
    }

    pub fn https_available(&self) -> bool {
        self.endpoints.iter().any(EndpointConfig::is_secure)
    }

    /// Plain http is redirected only when there is an https endpoint to go to.
    pub fn upgrades_http(&self) -> bool {
        self.upgrade_http && self.https_available()
    }
}

/// TLS configuration for the listener.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TlsConfig {
    /// Path to certificate file (PEM).
    pub cert_path: String,

    /// Path to private key file (PEM).
    pub key_path: String,
}

/// Watch folder and package handling.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DeploymentConfig {
    /// Root scanned for artifacts; created when missing.
    pub watch_folder: PathBuf,

    /// Hex-encoded Ed25519 key trusted for uploaded packages.
    pub trusted_certificate: PathBuf,

    /// Artifact file extension, without the dot.
    pub artifact_extension: String,

    /// File name prefixes that are never artifacts.
    pub excluded_prefixes: Vec<String>,

    /// Rescan on filesystem events.
    pub watch_filesystem: bool,

    /// Periodic full rescan; 0 disables it.
    pub sweep_interval_secs: u64,

    /// Static swagger-ui files served under `/swagger/`.
    pub swagger_ui_folder: Option<PathBuf>,
}

impl Default for DeploymentConfig {
    fn default() -> Self {
        Self {
            watch_folder: PathBuf::from("./uploads"),
            trusted_certificate: PathBuf::from("./trusted.key"),
            artifact_extension: "toml".to_string(),
            excluded_prefixes: crate::deploy::scanner::DEFAULT_EXCLUDED_PREFIXES
                .iter()
                .map(|p| p.to_string())
                .collect(),
            watch_filesystem: true,
            sweep_interval_secs: 60,
            swagger_ui_folder: None,
        }
    }
}

impl DeploymentConfig {
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

/// Bearer token admission.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SecurityConfig {
    /// When false every request is admitted.
    pub enabled: bool,

    pub tenant_key: String,

    pub audience: String,

    /// Issuer prefix; the tenant key and a trailing slash are appended.
    pub issuer_root: String,

    /// JWKS document with the signing keys.
    pub key_discovery_url: Option<String>,

    pub key_fetch_timeout_secs: u64,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            tenant_key: String::new(),
            audience: String::new(),
            issuer_root: "https://sts.windows.net/".to_string(),
            key_discovery_url: None,
            key_fetch_timeout_secs: 5,
        }
    }
}

impl SecurityConfig {
    pub fn key_fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.key_fetch_timeout_secs)
    }
}

/// Timeout configuration for various operations.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Deadline for one proxied request, in seconds.
    pub request_secs: u64,

    /// Deadline for the warm-up health probe, in seconds.
    pub health_probe_secs: u64,

    /// Time an instance gets to start listening, in seconds.
    pub launch_secs: u64,

    /// Time shutdown waits for in-flight requests, in seconds.
    pub drain_secs: u64,

    /// Largest request body buffered for an instance, in bytes.
    pub max_body_bytes: usize,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            request_secs: 100,
            health_probe_secs: 30,
            launch_secs: 30,
            drain_secs: 30,
            max_body_bytes: 64 * 1024 * 1024,
        }
    }
}

impl TimeoutConfig {
    pub fn request(&self) -> Duration {
        Duration::from_secs(self.request_secs)
    }

    pub fn health_probe(&self) -> Duration {
        Duration::from_secs(self.health_probe_secs)
    }

    pub fn launch(&self) -> Duration {
        Duration::from_secs(self.launch_secs)
    }

    pub fn drain(&self) -> Duration {
        Duration::from_secs(self.drain_secs)
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Bytes of recent log output kept for the diagnostics page.
    pub log_tail_bytes: usize,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_tail_bytes: DEFAULT_TAIL_BYTES,
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}
