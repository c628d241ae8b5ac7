//! Cache of token signing keys, keyed by `kid`.
//!
//! Filled from a JWKS document on a detached task. Validations read it
//! concurrently and accept whatever is cached at the time.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use jsonwebtoken::{Algorithm, DecodingKey};
use serde::Deserialize;
use tokio::task::JoinHandle;

use crate::security::SecurityError;

#[derive(Clone)]
pub struct SigningKey {
    pub key: DecodingKey,
    pub algorithm: Algorithm,
}

/// A JSON Web Key as published in a discovery document.
#[derive(Debug, Clone, Deserialize)]
pub struct JsonWebKey {
    #[serde(default)]
    pub kty: String,
    #[serde(rename = "use", default)]
    pub key_use: Option<String>,
    pub kid: Option<String>,
    pub n: Option<String>,
    pub e: Option<String>,
    #[serde(default)]
    pub x5c: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct JwkSet {
    pub keys: Vec<JsonWebKey>,
}

#[derive(Default)]
pub struct SigningKeyCache {
    keys: DashMap<String, SigningKey>,
}

impl SigningKeyCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, kid: impl Into<String>, key: SigningKey) {
        self.keys.insert(kid.into(), key);
    }

    pub fn get(&self, kid: &str) -> Option<SigningKey> {
        self.keys.get(kid).map(|entry| entry.value().clone())
    }

    pub fn all(&self) -> Vec<SigningKey> {
        self.keys.iter().map(|entry| entry.value().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Cache the RSA signing keys of `set`. Keys not meant for signatures,
    /// non-RSA keys and keys without exactly one certificate are ignored.
    /// Returns how many keys were cached.
    pub fn load_jwks(&self, set: &JwkSet) -> usize {
        let mut loaded = 0;
        for jwk in &set.keys {
            if jwk.key_use.as_deref() != Some("sig") || jwk.kty != "RSA" || jwk.x5c.len() != 1 {
                continue;
            }
            let (Some(kid), Some(n), Some(e)) = (&jwk.kid, &jwk.n, &jwk.e) else {
                continue;
            };
            match DecodingKey::from_rsa_components(n, e) {
                Ok(key) => {
                    self.insert(
                        kid.clone(),
                        SigningKey {
                            key,
                            algorithm: Algorithm::RS256,
                        },
                    );
                    loaded += 1;
                }
                Err(err) => tracing::warn!(kid = %kid, error = %err, "Ignoring unusable signing key"),
            }
        }
        loaded
    }

    /// Fetch the JWKS document at `url` and cache its keys.
    pub async fn refresh(&self, client: &reqwest::Client, url: &str) -> Result<usize, SecurityError> {
        let set: JwkSet = client
            .get(url)
            .send()
            .await
            .and_then(|response| response.error_for_status())
            .map_err(|e| SecurityError::KeyFetch(e.to_string()))?
            .json()
            .await
            .map_err(|e| SecurityError::KeyFetch(e.to_string()))?;
        Ok(self.load_jwks(&set))
    }

    /// Refresh on a detached task; request handling never waits for it.
    pub fn spawn_refresh(self: &Arc<Self>, url: String, timeout: Duration) -> JoinHandle<()> {
        let cache = Arc::clone(self);
        tokio::spawn(async move {
            let client = match reqwest::Client::builder().timeout(timeout).build() {
                Ok(client) => client,
                Err(e) => {
                    tracing::error!(error = %e, "Failed to build key discovery client");
                    return;
                }
            };
            match cache.refresh(&client, &url).await {
                Ok(count) => tracing::info!(url = %url, keys = count, "Signing keys loaded"),
                Err(e) => tracing::error!(url = %url, error = %e, "Signing key refresh failed"),
            }
        })
    }
}
