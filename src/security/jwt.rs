//! Bearer token admission check.

use std::sync::Arc;

use axum::http::{header, HeaderMap};
use jsonwebtoken::{decode, decode_header, Validation};

use crate::security::signing_keys::SigningKeyCache;
use crate::security::{SecurityCheck, SecurityError, SecurityOutcome};

const BEARER: &str = "Bearer ";

/// Validates bearer tokens against the signing-key cache.
pub struct JwtSecurityCheck {
    keys: Arc<SigningKeyCache>,
    audience: String,
    issuer: String,
}

impl JwtSecurityCheck {
    /// `issuer_root` and `tenant_key` form the expected issuer
    /// `{issuer_root}{tenant_key}/`.
    pub fn new(keys: Arc<SigningKeyCache>, audience: impl Into<String>, issuer_root: &str, tenant_key: &str) -> Self {
        Self {
            keys,
            audience: audience.into(),
            issuer: format!("{}{}/", issuer_root, tenant_key),
        }
    }

    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    fn verify(&self, token: &str) -> Result<(), SecurityError> {
        let header = decode_header(token).map_err(|e| SecurityError::Malformed(e.to_string()))?;

        let candidates = match &header.kid {
            Some(kid) => self.keys.get(kid).into_iter().collect::<Vec<_>>(),
            None => self.keys.all(),
        };
        if candidates.is_empty() {
            return Err(SecurityError::UnknownKey(header.kid.unwrap_or_default()));
        }

        let mut last = None;
        for candidate in candidates {
            let mut validation = Validation::new(candidate.algorithm);
            validation.set_audience(&[&self.audience]);
            validation.set_issuer(&[&self.issuer]);

            match decode::<serde_json::Value>(token, &candidate.key, &validation) {
                Ok(_) => return Ok(()),
                Err(e) => last = Some(e),
            }
        }
        Err(SecurityError::Rejected(
            last.map(|e| e.to_string()).unwrap_or_default(),
        ))
    }
}

/// Token from `Authorization`, falling back to `WWW-Authenticate`.
pub fn bearer_token(headers: &HeaderMap) -> Option<String> {
    let raw = headers
        .get(header::AUTHORIZATION)
        .or_else(|| headers.get(header::WWW_AUTHENTICATE))?
        .to_str()
        .ok()?;
    let token = raw.replace(BEARER, "");
    let token = token.trim();
    if token.is_empty() {
        None
    } else {
        Some(token.to_string())
    }
}

impl SecurityCheck for JwtSecurityCheck {
    fn validate(&self, headers: &HeaderMap) -> SecurityOutcome {
        let Some(token) = bearer_token(headers) else {
            tracing::debug!("Rejected request without bearer token");
            return SecurityOutcome::Fail;
        };
        match self.verify(&token) {
            Ok(()) => SecurityOutcome::Pass,
            Err(e) => {
                tracing::debug!(error = %e, "Rejected bearer token");
                SecurityOutcome::Fail
            }
        }
    }
}
