//! Configuration loading from disk and environment.

use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::config::schema::ProxyConfig;
use crate::config::validation::{validate_config, ValidationError};

pub const ENV_WATCH_FOLDER: &str = "VERSION_PROXY_WATCH_FOLDER";
pub const ENV_EXTERNAL_ENDPOINT: &str = "VERSION_PROXY_EXTERNAL_ENDPOINT";
pub const ENV_UPGRADE_HTTP: &str = "VERSION_PROXY_UPGRADE_HTTP";

/// Error type for configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid value for {name}: '{value}'")]
    Env { name: &'static str, value: String },

    #[error("Validation failed: {}", join(.0))]
    Validation(Vec<ValidationError>),
}

fn join(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Load configuration from an optional TOML file, apply environment
/// overrides and validate the result.
pub fn load_config(path: Option<&Path>) -> Result<ProxyConfig, ConfigError> {
    let mut config = match path {
        Some(path) => parse_config(&fs::read_to_string(path)?)?,
        None => ProxyConfig::default(),
    };
    apply_env_overrides(&mut config, |name| std::env::var(name).ok())?;
    validate_config(&config).map_err(ConfigError::Validation)?;
    Ok(config)
}

pub fn parse_config(content: &str) -> Result<ProxyConfig, ConfigError> {
    Ok(toml::from_str(content)?)
}

/// Apply `VERSION_PROXY_*` overrides read through `lookup`.
pub fn apply_env_overrides<F>(config: &mut ProxyConfig, lookup: F) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(folder) = lookup(ENV_WATCH_FOLDER) {
        config.deployment.watch_folder = PathBuf::from(folder);
    }
    if let Some(endpoint) = lookup(ENV_EXTERNAL_ENDPOINT) {
        config.listener.external_endpoint = Some(endpoint);
    }
    if let Some(value) = lookup(ENV_UPGRADE_HTTP) {
        config.listener.upgrade_http = match value.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" => true,
            "0" | "false" | "no" => false,
            _ => {
                return Err(ConfigError::Env {
                    name: ENV_UPGRADE_HTTP,
                    value,
                })
            }
        };
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn env_overrides_win() {
        let env: HashMap<&str, &str> = [
            (ENV_WATCH_FOLDER, "/srv/drop"),
            (ENV_EXTERNAL_ENDPOINT, "https://api.example.net"),
            (ENV_UPGRADE_HTTP, "TRUE"),
        ]
        .into_iter()
        .collect();

        let mut config = ProxyConfig::default();
        apply_env_overrides(&mut config, |k| env.get(k).map(|v| v.to_string())).unwrap();
        assert_eq!(config.deployment.watch_folder, PathBuf::from("/srv/drop"));
        assert_eq!(config.listener.external_endpoint.as_deref(), Some("https://api.example.net"));
        assert!(config.listener.upgrade_http);
    }

    #[test]
    fn bad_boolean_is_rejected() {
        let mut config = ProxyConfig::default();
        let err = apply_env_overrides(&mut config, |k| {
            (k == ENV_UPGRADE_HTTP).then(|| "maybe".to_string())
        })
        .unwrap_err();
        assert!(matches!(err, ConfigError::Env { .. }));
    }

    #[test]
    fn loads_file_and_validates() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("proxy.toml");
        fs::write(&path, "[listener]\nparallelism = 0\n").unwrap();

        match load_config(Some(&path)) {
            Err(ConfigError::Validation(errors)) => {
                assert_eq!(errors, vec![ValidationError::ZeroParallelism]);
            }
            other => panic!("unexpected result: {other:?}"),
        }

        fs::write(&path, "[listener\n").unwrap();
        assert!(matches!(load_config(Some(&path)), Err(ConfigError::Parse(_))));
    }
}
