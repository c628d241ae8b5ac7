//! `/swagger/*`: API documentation aggregated from the live versions.
//!
//! # Responsibilities
//! - Serve the swagger-ui static files
//! - Generate the loader script listing every live version
//! - Fetch each version's own swagger JSON and annotate it with the proxy's
//!   host, schemes and bearer security definition

use std::fmt::Write as _;
use std::path::{Component, Path, PathBuf};
use std::time::Duration;

use axum::body::Body;
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Redirect, Response};
use serde_json::{json, Value};
use url::Url;

use crate::hosting::{AppRequest, HostError, SiteHost};
use crate::http::response::text;
use crate::versioning::VersionTable;

const LOADER_SCRIPT: &str = "wrapperLoadFunction.js";
const JSON_PREFIX: &str = "json/";

pub struct SwaggerResponder {
    ui_folder: Option<PathBuf>,
    external: Option<Url>,
    upgrade_http: bool,
    https_available: bool,
    fetch_timeout: Duration,
}

impl SwaggerResponder {
    pub fn new(
        ui_folder: Option<PathBuf>,
        external: Option<Url>,
        upgrade_http: bool,
        https_available: bool,
        fetch_timeout: Duration,
    ) -> Self {
        Self {
            ui_folder,
            external,
            upgrade_http: upgrade_http && https_available,
            https_available,
            fetch_timeout,
        }
    }

    /// Answer a request under `/swagger`. `host_header` is the inbound Host,
    /// used when no external endpoint is configured.
    pub async fn respond(&self, path: &str, host_header: Option<&str>, table: &VersionTable<SiteHost>) -> Response {
        if path == "/swagger" {
            return Redirect::permanent("/swagger/").into_response();
        }
        let Some(rest) = path.strip_prefix("/swagger/") else {
            return text(StatusCode::NOT_FOUND, "Not found");
        };

        if rest.is_empty() {
            return self.send_file("index.html").await;
        }
        if rest == LOADER_SCRIPT {
            return javascript(loader_script(&table.version_names()));
        }
        if let Some(requested) = rest.strip_prefix(JSON_PREFIX) {
            tracing::debug!(version = requested, "Looking for API documentation");
            let doc = self.spec_for_version(requested, host_header, table).await;
            return json_response(&doc);
        }
        self.send_file(rest).await
    }

    async fn send_file(&self, relative: &str) -> Response {
        let Some(root) = &self.ui_folder else {
            return text(StatusCode::NOT_FOUND, "Swagger UI is not installed");
        };
        let relative = Path::new(relative);
        if relative.components().any(|c| !matches!(c, Component::Normal(_))) {
            return text(StatusCode::NOT_FOUND, "Not found");
        }

        let path = root.join(relative);
        match tokio::fs::read(&path).await {
            Ok(bytes) => {
                let mut response = Response::new(Body::from(bytes));
                response
                    .headers_mut()
                    .insert(header::CONTENT_TYPE, HeaderValue::from_static(content_type(&path)));
                response
            }
            Err(e) => {
                tracing::debug!(path = %path.display(), error = %e, "Swagger file not served");
                text(StatusCode::NOT_FOUND, "Not found")
            }
        }
    }

    async fn spec_for_version(&self, requested: &str, host_header: Option<&str>, table: &VersionTable<SiteHost>) -> Value {
        let host = match table.get_exact_version(requested) {
            Ok(host) => host,
            Err(e) => return error_document(&e.to_string()),
        };

        let routes = doc_routes(host.major());
        for route in &routes {
            let fetched: Result<_, HostError> =
                host.request(AppRequest::get(route.as_str()), self.fetch_timeout).await;
            let response = match fetched {
                Ok(response) if response.status.as_u16() < 300 => response,
                Ok(_) => continue,
                Err(e) => {
                    tracing::debug!(route = %route, error = %e, "Documentation route failed");
                    continue;
                }
            };
            match serde_json::from_slice::<Value>(&response.body) {
                Ok(spec) => return self.annotate(spec, requested, host_header),
                Err(e) => return error_document(&format!("{} returned invalid JSON: {}", route, e)),
            }
        }

        error_document(&format!(
            "Failed to find a JSON endpoint in the hosted API. Make sure that hosted APIs respond to one of:<br/>{}",
            routes.join("<br/>")
        ))
    }

    fn annotate(&self, mut spec: Value, requested: &str, host_header: Option<&str>) -> Value {
        let Some(doc) = spec.as_object_mut() else {
            return error_document("hosted API documentation is not a JSON object");
        };

        if let Some(host) = self.self_authority(host_header) {
            doc.insert("host".into(), Value::String(host));
        }

        let info = doc.entry("info").or_insert_with(|| json!({}));
        if let Some(info) = info.as_object_mut() {
            info.insert("version".into(), Value::String(requested.to_string()));
        }

        doc.insert("schemes".into(), json!(self.schemes()));
        doc.insert(
            "securityDefinitions".into(),
            json!({ "Bearer Token": { "type": "apiKey", "name": "Authorization", "in": "header" } }),
        );
        doc.insert("security".into(), json!([{ "Bearer Token": [] }]));
        spec
    }

    fn schemes(&self) -> Vec<&'static str> {
        if self.upgrade_http {
            vec!["https"]
        } else if self.https_available {
            vec!["http", "https"]
        } else {
            vec!["http"]
        }
    }

    /// Host to advertise: the external authority, or just its host name when
    /// plain http would be upgraded anyway.
    fn self_authority(&self, host_header: Option<&str>) -> Option<String> {
        match &self.external {
            Some(url) => {
                let host = url.host_str()?;
                if self.upgrade_http && url.scheme() == "http" {
                    return Some(host.to_string());
                }
                Some(match url.port() {
                    Some(port) => format!("{}:{}", host, port),
                    None => host.to_string(),
                })
            }
            None => host_header.map(str::to_string),
        }
    }
}

fn doc_routes(major: u32) -> [String; 4] {
    [
        "/swagger/docs/v1".to_string(),
        "/swagger/v1/swagger.json".to_string(),
        format!("/swagger/docs/v{}", major),
        format!("/swagger/v{}/swagger.json", major),
    ]
}

/// Swagger 2.0 document describing a failure, so the UI can show it.
pub fn error_document(message: &str) -> Value {
    json!({
        "swagger": "2.0",
        "info": {
            "version": "err",
            "title": "Swagger Proxy Failure",
            "description": format!(
                "{}<br/>Try <a href=\"/swagger/\">refreshing the page</a> to get the most recent versions",
                message
            ),
        },
        "paths": {},
    })
}

pub fn loader_script(names: &[String]) -> String {
    let mut js = String::from("window.onload = function () { var ui = SwaggerUIBundle({\n    urls: [");
    if names.is_empty() {
        js.push_str("{ url: './json/0-0.0.0.0', name: 'No versions loaded!'},");
    }
    for name in names {
        let _ = write!(js, "{{ url: './json/{0}', name: '{0}'}},", name);
    }
    js.push_str("],\n");
    js.push_str(
        "    requestInterceptor: function (req) {\n\
         \x20       if (! req.loadSpec) {\n\
         \x20           req.headers.Version = document.getElementById('select').selectedOptions[0].innerText.split('-')[0];\n\
         \x20       }\n\
         \x20       return req;\n\
         \x20   },\n",
    );
    js.push_str(
        "    dom_id: '#swagger-ui', deepLinking: true, presets: [ SwaggerUIBundle.presets.apis, SwaggerUIStandalonePreset ],\n\
         \x20   plugins: [ SwaggerUIBundle.plugins.DownloadUrl ],\n\
         \x20   layout: 'StandaloneLayout'\n\
         });\n\
         window.ui = ui;\n\
         }\n",
    );
    js
}

fn content_type(path: &Path) -> &'static str {
    match path.extension().and_then(|e| e.to_str()) {
        Some("html") => "text/html; charset=utf-8",
        Some("js") => "application/javascript",
        Some("css") => "text/css",
        Some("json") => "application/json",
        Some("png") => "image/png",
        Some("svg") => "image/svg+xml",
        Some("map") => "application/json",
        _ => "application/octet-stream",
    }
}

fn javascript(body: String) -> Response {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, HeaderValue::from_static("application/javascript"))],
        body,
    )
        .into_response()
}

fn json_response(doc: &Value) -> Response {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, HeaderValue::from_static("application/json"))],
        doc.to_string(),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn responder(external: Option<&str>, upgrade: bool, https: bool) -> SwaggerResponder {
        SwaggerResponder::new(
            None,
            external.map(|u| Url::parse(u).unwrap()),
            upgrade,
            https,
            Duration::from_secs(1),
        )
    }

    #[test]
    fn schemes_follow_listener_settings() {
        assert_eq!(responder(None, true, true).schemes(), vec!["https"]);
        assert_eq!(responder(None, false, true).schemes(), vec!["http", "https"]);
        assert_eq!(responder(None, false, false).schemes(), vec!["http"]);
    }

    #[test]
    fn upgrade_without_https_advertises_plain_http() {
        let responder = responder(Some("http://api.example.net:8080"), true, false);
        assert_eq!(responder.schemes(), vec!["http"]);
        assert_eq!(responder.self_authority(None), Some("api.example.net:8080".into()));
    }

    #[test]
    fn host_comes_from_external_endpoint() {
        let plain = responder(Some("http://api.example.net:8080"), false, false);
        assert_eq!(plain.self_authority(Some("ignored")), Some("api.example.net:8080".into()));

        let upgraded = responder(Some("http://api.example.net:8080"), true, true);
        assert_eq!(upgraded.self_authority(None), Some("api.example.net".into()));

        let fallback = responder(None, false, false);
        assert_eq!(fallback.self_authority(Some("localhost:5000")), Some("localhost:5000".into()));
    }

    #[test]
    fn annotates_spec() {
        let spec = json!({ "swagger": "2.0", "info": { "title": "Orders", "version": "v1" }, "paths": {} });
        let doc = responder(Some("https://api.example.net"), false, true).annotate(spec, "2-2024.03.04.5", None);

        assert_eq!(doc["host"], "api.example.net");
        assert_eq!(doc["info"]["version"], "2-2024.03.04.5");
        assert_eq!(doc["info"]["title"], "Orders");
        assert_eq!(doc["schemes"], json!(["http", "https"]));
        assert_eq!(doc["securityDefinitions"]["Bearer Token"]["in"], "header");
        assert_eq!(doc["security"], json!([{ "Bearer Token": [] }]));
    }

    #[test]
    fn loader_lists_versions_or_placeholder() {
        let empty = loader_script(&[]);
        assert!(empty.contains("No versions loaded!"));

        let js = loader_script(&["1-2024.01.02.3".to_string(), "2-2024.03.04.5".to_string()]);
        assert!(js.contains("{ url: './json/1-2024.01.02.3', name: '1-2024.01.02.3'}"));
        assert!(js.contains("{ url: './json/2-2024.03.04.5', name: '2-2024.03.04.5'}"));
        assert!(!js.contains("No versions loaded!"));
    }

    #[test]
    fn error_document_is_swagger() {
        let doc = error_document("boom");
        assert_eq!(doc["swagger"], "2.0");
        assert_eq!(doc["info"]["title"], "Swagger Proxy Failure");
        assert!(doc["info"]["description"].as_str().unwrap().starts_with("boom<br/>"));
    }

    #[tokio::test]
    async fn static_files_need_the_ui_folder() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("index.html"), "<html>ui</html>").unwrap();
        let table = VersionTable::<SiteHost>::new(std::sync::Arc::new(crate::versioning::ManifestReader::new()));

        let missing = responder(None, false, false);
        assert_eq!(missing.respond("/swagger/", None, &table).await.status(), StatusCode::NOT_FOUND);

        let served = SwaggerResponder::new(Some(dir.path().to_path_buf()), None, false, false, Duration::from_secs(1));
        let index = served.respond("/swagger/", None, &table).await;
        assert_eq!(index.status(), StatusCode::OK);
        assert_eq!(index.headers()[header::CONTENT_TYPE], "text/html; charset=utf-8");

        let escape = served.respond("/swagger/../secret", None, &table).await;
        assert_eq!(escape.status(), StatusCode::NOT_FOUND);

        let redirect = served.respond("/swagger", None, &table).await;
        assert_eq!(redirect.status(), StatusCode::PERMANENT_REDIRECT);
    }

    #[tokio::test]
    async fn unknown_version_yields_error_document() {
        let table = VersionTable::<SiteHost>::new(std::sync::Arc::new(crate::versioning::ManifestReader::new()));
        let response = responder(None, false, false)
            .respond("/swagger/json/1-2024.01.02.3", None, &table)
            .await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let doc: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(doc["info"]["title"], "Swagger Proxy Failure");
    }
}
