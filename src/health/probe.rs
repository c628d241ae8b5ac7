//! Warm-up health probe issued to a candidate before promotion.

use std::time::Duration;

use axum::http::{header, HeaderValue, StatusCode};

use crate::hosting::{AppRequest, HostError, HostedApp};
use crate::resilience::with_deadline;

/// Fixed path every hosted application must answer.
pub const HEALTH_PATH: &str = "/health";

const PROBE_ACCEPT: &str = "text/plain,application/json";

pub fn health_request() -> AppRequest {
    let mut request = AppRequest::get(HEALTH_PATH);
    request
        .headers
        .insert(header::ACCEPT, HeaderValue::from_static(PROBE_ACCEPT));
    request
}

/// Probe `app` once. A server-error status, a failed call or an expired
/// deadline all fail the probe. Other statuses pass.
pub async fn warm_up(app: &dyn HostedApp, version: &str, limit: Duration) -> Result<StatusCode, HostError> {
    let outcome = with_deadline(limit, app.direct_call(health_request())).await;

    let reason = match outcome {
        Ok(response) if !response.status.is_server_error() => {
            tracing::debug!(version, status = %response.status, "Warm-up probe passed");
            return Ok(response.status);
        }
        Ok(response) => format!(
            "{} returned {}: {}",
            HEALTH_PATH,
            response.status,
            String::from_utf8_lossy(&response.body)
        ),
        Err(e) => format!("{} call failed: {}", HEALTH_PATH, e),
    };

    Err(HostError::Warmup {
        version: version.to_string(),
        reason,
    })
}
