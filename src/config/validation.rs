//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (timeouts > 0, widths > 0)
//! - Check that https endpoints have TLS material and names are unique
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ProxyConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::collections::HashSet;
use std::net::SocketAddr;

use thiserror::Error;
use url::Url;

use crate::config::schema::ProxyConfig;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("listener.parallelism must be at least 1")]
    ZeroParallelism,

    #[error("listener has no endpoints")]
    NoEndpoints,

    #[error("duplicate endpoint name '{0}'")]
    DuplicateEndpoint(String),

    #[error("endpoint '{name}' has an invalid address '{address}'")]
    InvalidAddress { name: String, address: String },

    #[error("endpoint '{0}' is https but listener.tls is not configured")]
    MissingTls(String),

    #[error("listener.external_endpoint '{0}' is not an absolute URL")]
    InvalidExternalEndpoint(String),

    #[error("timeouts.{0} must be greater than zero")]
    ZeroTimeout(&'static str),

    #[error("deployment.artifact_extension must not be empty")]
    EmptyExtension,

    #[error("security is enabled but security.{0} is empty")]
    MissingSecuritySetting(&'static str),

    #[error("observability.metrics_address '{0}' is not a socket address")]
    InvalidMetricsAddress(String),
}

pub fn validate_config(config: &ProxyConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();
    let listener = &config.listener;

    if listener.parallelism == 0 {
        errors.push(ValidationError::ZeroParallelism);
    }
    if listener.endpoints.is_empty() {
        errors.push(ValidationError::NoEndpoints);
    }

    let mut names = HashSet::new();
    for endpoint in &listener.endpoints {
        if !names.insert(endpoint.name.as_str()) {
            errors.push(ValidationError::DuplicateEndpoint(endpoint.name.clone()));
        }
        if endpoint.address.parse::<SocketAddr>().is_err() {
            errors.push(ValidationError::InvalidAddress {
                name: endpoint.name.clone(),
                address: endpoint.address.clone(),
            });
        }
        if endpoint.is_secure() && listener.tls.is_none() {
            errors.push(ValidationError::MissingTls(endpoint.name.clone()));
        }
    }

    if let Some(external) = &listener.external_endpoint {
        let absolute = Url::parse(external).map(|u| u.has_host()).unwrap_or(false);
        if !absolute {
            errors.push(ValidationError::InvalidExternalEndpoint(external.clone()));
        }
    }

    let timeouts = &config.timeouts;
    for (name, value) in [
        ("request_secs", timeouts.request_secs),
        ("health_probe_secs", timeouts.health_probe_secs),
        ("launch_secs", timeouts.launch_secs),
    ] {
        if value == 0 {
            errors.push(ValidationError::ZeroTimeout(name));
        }
    }

    if config.deployment.artifact_extension.trim_start_matches('.').is_empty() {
        errors.push(ValidationError::EmptyExtension);
    }

    let security = &config.security;
    if security.enabled {
        if security.audience.is_empty() {
            errors.push(ValidationError::MissingSecuritySetting("audience"));
        }
        if security.issuer_root.is_empty() {
            errors.push(ValidationError::MissingSecuritySetting("issuer_root"));
        }
    }

    let observability = &config.observability;
    if observability.metrics_enabled && observability.metrics_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::InvalidMetricsAddress(
            observability.metrics_address.clone(),
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::{EndpointConfig, Scheme};

    #[test]
    fn defaults_are_valid() {
        assert!(validate_config(&ProxyConfig::default()).is_ok());
    }

    #[test]
    fn reports_every_problem() {
        let mut config = ProxyConfig::default();
        config.listener.parallelism = 0;
        config.listener.endpoints = vec![
            EndpointConfig::http("a", "127.0.0.1:1"),
            EndpointConfig::http("a", "not-an-address"),
            EndpointConfig {
                name: "s".into(),
                address: "127.0.0.1:2".into(),
                scheme: Scheme::Https,
            },
        ];
        config.listener.external_endpoint = Some("relative/path".into());
        config.timeouts.request_secs = 0;
        config.deployment.artifact_extension = ".".into();
        config.security.enabled = true;

        let errors = validate_config(&config).unwrap_err();
        assert!(errors.contains(&ValidationError::ZeroParallelism));
        assert!(errors.contains(&ValidationError::DuplicateEndpoint("a".into())));
        assert!(errors.contains(&ValidationError::InvalidAddress {
            name: "a".into(),
            address: "not-an-address".into()
        }));
        assert!(errors.contains(&ValidationError::MissingTls("s".into())));
        assert!(errors.contains(&ValidationError::InvalidExternalEndpoint("relative/path".into())));
        assert!(errors.contains(&ValidationError::ZeroTimeout("request_secs")));
        assert!(errors.contains(&ValidationError::EmptyExtension));
        assert!(errors.contains(&ValidationError::MissingSecuritySetting("audience")));
        assert_eq!(errors.len(), 8);
    }
}
