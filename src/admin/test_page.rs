//! `/test` diagnostics page.

use std::fmt::Write as _;
use std::time::Duration;

use html_escape::encode_text;

use crate::deploy::Deployer;
use crate::health::probe::health_request;
use crate::hosting::{HostError, SiteHost};
use crate::resilience::with_deadline;

/// Everything the page shows, gathered before rendering.
pub struct PageState {
    pub warm_up: Option<Duration>,
    pub versions_available: String,
    pub watch_folder: String,
    pub scanning: bool,
    pub last_scan_error: Option<String>,
    pub versions: Vec<VersionState>,
    pub log_tail: String,
}

pub struct VersionState {
    pub name: String,
    pub major: u32,
    pub calls: u64,
    pub success_rate: f64,
    pub health: String,
    pub health_body: Option<String>,
    pub last_error: Option<String>,
    pub history: Vec<(String, f64)>,
}

/// Collect the page state, probing every live version's health endpoint.
pub async fn collect(deployer: &Deployer, log_tail: String, probe_timeout: Duration) -> PageState {
    let table = deployer.table();
    let mut versions = Vec::new();
    for host in table.all_versions() {
        versions.push(version_state(&host, probe_timeout).await);
    }

    PageState {
        warm_up: deployer.warm_up(),
        versions_available: table.versions_available(),
        watch_folder: deployer.watch_folder().display().to_string(),
        scanning: deployer.is_scanning(),
        last_scan_error: deployer.last_scan_error(),
        versions,
        log_tail,
    }
}

async fn version_state(host: &SiteHost, probe_timeout: Duration) -> VersionState {
    let probe: Result<_, HostError> = with_deadline(probe_timeout, host.direct_call(health_request())).await;
    let (health, health_body) = match probe {
        Ok(response) => {
            let reason = response.status.canonical_reason().unwrap_or("");
            let body = (!response.body.is_empty()).then(|| String::from_utf8_lossy(&response.body).into_owned());
            (format!("{} {}", response.status.as_u16(), reason), body)
        }
        Err(e) => (format!("health call failed: {}", e), None),
    };

    VersionState {
        name: host.version_name().to_string(),
        major: host.major(),
        calls: host.call_count(),
        success_rate: host.success_rate(),
        health,
        health_body,
        last_error: host.last_error(),
        history: host
            .success_history()
            .into_iter()
            .map(|point| (point.at.format("%Y-%m-%d %H:%M").to_string(), point.rate))
            .collect(),
    }
}

pub fn render(state: &PageState) -> String {
    let mut html = String::with_capacity(4096);
    html.push_str("<html><head><title>Version proxy test page</title></head><body>");

    html.push_str("<h1>Status</h1>");
    match state.warm_up {
        None => html.push_str("<p>The proxy is starting up. Versions will be listed below as they are ready.</p>"),
        Some(warm_up) => {
            let _ = write!(html, "<p>The proxy is active. Initial warm up took: {:?}</p>", warm_up);
        }
    }
    let _ = write!(html, "<p>Currently loaded: {}</p>", encode_text(&state.versions_available));
    let _ = write!(
        html,
        "<p>Watch folder: <tt>{}</tt> {}</p>",
        encode_text(&state.watch_folder),
        if state.scanning { "Scan is in progress" } else { "Scanner is idle" }
    );
    if let Some(error) = &state.last_scan_error {
        let _ = write!(html, "<p>Last scan error: {}</p>", encode_text(error));
    }

    html.push_str("<h1>Health check</h1>");
    for version in &state.versions {
        let _ = write!(html, "<h3>Version {}</h3>", encode_text(&version.name));
        let _ = write!(
            html,
            "<p>{} calls, {:.2}% successful</p>",
            version.calls,
            100.0 * version.success_rate
        );
        let _ = write!(html, "<p>{}</p>", encode_text(&version.health));
        if let Some(body) = &version.health_body {
            let _ = write!(html, "<pre>{}</pre>", encode_text(body));
        }
        if let Some(error) = &version.last_error {
            let _ = write!(html, "<p>Last proxy error: {}</p>", encode_text(error));
        }
    }

    html.push_str("<h1>Recent log entries</h1>");
    let _ = write!(
        html,
        "<div style=\"direction:rtl;overflow-y:scroll;height:40%;\"><pre style=\"direction: ltr;\">{}</pre></div>",
        encode_text(&state.log_tail)
    );

    html.push_str("<h1>History</h1>");
    for version in &state.versions {
        let _ = write!(html, "<h3>{}</h3><pre>", version.major);
        for (at, rate) in &version.history {
            let _ = write!(html, "\r\n{} -> {}", at, rate);
        }
        html.push_str("</pre>");
    }

    html.push_str("</body></html>");
    html
}
