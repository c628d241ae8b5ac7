//! Request identification and conversion.
//!
//! # Responsibilities
//! - Give every inbound request an `x-request-id` (UUID v4) as early as possible
//! - Convert an inbound request into the generic form hosted instances accept
//!
//! # Design Decisions
//! - An id supplied by the client is kept, so calls can be correlated end to end
//! - Hop-by-hop headers never travel to the instance

use axum::body::Body;
use axum::http::{HeaderValue, Request};
use tower_http::request_id::{MakeRequestId, PropagateRequestIdLayer, RequestId, SetRequestIdLayer};
use uuid::Uuid;

use crate::hosting::AppRequest;
use crate::http::response::strip_hop_by_hop;

pub const X_REQUEST_ID: &str = "x-request-id";

/// Generates UUID v4 request ids.
#[derive(Debug, Clone, Copy, Default)]
pub struct MakeUuidRequestId;

impl MakeRequestId for MakeUuidRequestId {
    fn make_request_id<B>(&mut self, _request: &Request<B>) -> Option<RequestId> {
        HeaderValue::from_str(&Uuid::new_v4().to_string())
            .ok()
            .map(RequestId::new)
    }
}

/// Layers that assign an id to each request and echo it on the response.
pub struct RequestIdLayer;

impl RequestIdLayer {
    pub fn set() -> SetRequestIdLayer<MakeUuidRequestId> {
        SetRequestIdLayer::x_request_id(MakeUuidRequestId)
    }

    pub fn propagate() -> PropagateRequestIdLayer {
        PropagateRequestIdLayer::x_request_id()
    }
}

pub trait RequestIdExt {
    fn request_id(&self) -> Option<&str>;
}

impl<B> RequestIdExt for Request<B> {
    fn request_id(&self) -> Option<&str> {
        self.headers().get(X_REQUEST_ID).and_then(|v| v.to_str().ok())
    }
}

/// Read the whole body and build the instance-facing request.
pub async fn to_app_request(request: Request<Body>, body_limit: usize) -> Result<AppRequest, axum::Error> {
    let (parts, body) = request.into_parts();
    let body = axum::body::to_bytes(body, body_limit).await?;

    let uri = parts
        .uri
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| "/".to_string());

    let mut headers = parts.headers;
    strip_hop_by_hop(&mut headers);

    Ok(AppRequest {
        method: parts.method,
        uri,
        headers,
        body,
    })
}
