//! Response shaping.
//!
//! # Responsibilities
//! - Turn an instance response back into an HTTP response
//! - Strip hop-by-hop headers and the backend's framing
//! - Stream large bodies in chunks to HTTP/1.1+ clients, send the rest flat
//!   with a content-length
//! - Build the plain-text diagnostic responses the router emits

use std::convert::Infallible;

use axum::body::{Body, Bytes};
use axum::http::{header, HeaderMap, HeaderName, HeaderValue, StatusCode, Version};
use axum::response::{IntoResponse, Response};

use crate::hosting::AppResponse;

/// Bodies above this size are streamed when the client can take chunks.
pub const STREAM_THRESHOLD: usize = 64 * 1024;

const CHUNK_SIZE: usize = 16 * 1024;

const HOP_BY_HOP: [HeaderName; 8] = [
    header::CONNECTION,
    HeaderName::from_static("keep-alive"),
    header::PROXY_AUTHENTICATE,
    header::PROXY_AUTHORIZATION,
    header::TE,
    header::TRAILER,
    header::TRANSFER_ENCODING,
    header::UPGRADE,
];

pub fn strip_hop_by_hop(headers: &mut HeaderMap) {
    for name in HOP_BY_HOP.iter() {
        headers.remove(name);
    }
}

fn supports_chunks(version: Version) -> bool {
    version >= Version::HTTP_11
}

/// Body for `payload`, chunked when large and the client protocol allows it.
pub fn shape_body(payload: Bytes, version: Version) -> Body {
    if payload.len() <= STREAM_THRESHOLD || !supports_chunks(version) {
        return Body::from(payload);
    }

    let chunks: Vec<Result<Bytes, Infallible>> = (0..payload.len())
        .step_by(CHUNK_SIZE)
        .map(|start| Ok(payload.slice(start..(start + CHUNK_SIZE).min(payload.len()))))
        .collect();
    Body::from_stream(futures_util::stream::iter(chunks))
}

/// Convert an instance response for a client speaking `version`.
pub fn from_app_response(app: AppResponse, version: Version) -> Response {
    let mut headers = app.headers;
    strip_hop_by_hop(&mut headers);
    headers.remove(header::CONTENT_LENGTH);

    let mut response = Response::new(shape_body(app.body, version));
    *response.status_mut() = app.status;
    *response.headers_mut() = headers;
    response
}

/// Plain-text response.
pub fn text(status: StatusCode, body: impl Into<String>) -> Response {
    (
        status,
        [(header::CONTENT_TYPE, HeaderValue::from_static("text/plain; charset=utf-8"))],
        body.into(),
    )
        .into_response()
}

/// Plain-text failure that lists the loaded versions.
pub fn with_versions(status: StatusCode, message: &str, versions: &str) -> Response {
    text(status, format!("\r\n{}\r\nCurrently loaded: {}", message, versions))
}
