//! `/shutdown`: dispose every live instance.
//!
//! Known artifacts stay known, so a later rescan promotes them again.

use axum::http::{Method, StatusCode};
use axum::response::Response;

use crate::deploy::Deployer;
use crate::http::response::text;

pub async fn shutdown_instances(method: &Method, deployer: &Deployer) -> Response {
    if *method != Method::POST {
        return text(StatusCode::BAD_REQUEST, "This must be called as a POST");
    }

    let errors = deployer.shutdown_all().await;
    if errors.is_empty() {
        tracing::info!("All instances shut down on request");
        return text(
            StatusCode::OK,
            "All proxies shut down. They may be restarted by subsequent calls.",
        );
    }

    let listing = errors
        .iter()
        .map(|(version, error)| format!("{}: {}", version, error))
        .collect::<Vec<_>>()
        .join("\r\n");
    tracing::warn!(failed = errors.len(), "Some instances failed to shut down cleanly");
    text(
        StatusCode::INTERNAL_SERVER_ERROR,
        format!(
            "Some proxies errored during shutdown. They have been force terminated:\r\n{}",
            listing
        ),
    )
}
