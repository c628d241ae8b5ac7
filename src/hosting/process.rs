//! Process-backed application hosting.
//!
//! # Responsibilities
//! - Start the manifest command next to its artifact with a free loopback port
//! - Wait until the instance accepts connections
//! - Forward calls over HTTP/1.1 with the hyper-util client
//! - Kill the child process on disposal (or when the handle is dropped)

use std::net::{Ipv4Addr, SocketAddr, TcpListener as StdTcpListener};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};

use axum::body::Body;
use axum::http::{header, HeaderValue, Request};
use futures_util::future::BoxFuture;
use hyper_util::client::legacy::{connect::HttpConnector, Client};
use hyper_util::rt::TokioExecutor;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::net::TcpStream;
use tokio::process::{Child, Command};
use tokio::sync::Mutex;

use crate::hosting::{AppLauncher, AppRequest, AppResponse, HostError, HostedApp};
use crate::versioning::Candidate;

const PORT_PLACEHOLDER: &str = "{port}";

/// Launches each candidate as a child process.
pub struct ProcessLauncher {
    client: Client<HttpConnector, Body>,
    launch_timeout: Duration,
}

impl ProcessLauncher {
    pub fn new(launch_timeout: Duration) -> Self {
        let client = Client::builder(TokioExecutor::new()).build(HttpConnector::new());
        Self {
            client,
            launch_timeout,
        }
    }
}

fn free_port() -> Result<u16, HostError> {
    let probe = StdTcpListener::bind((Ipv4Addr::LOCALHOST, 0))?;
    Ok(probe.local_addr()?.port())
}

/// Relative commands containing a path separator resolve against the artifact directory.
fn resolve_command(root: &Path, command: &str) -> PathBuf {
    let path = Path::new(command);
    if path.is_relative() && path.components().count() > 1 {
        root.join(path)
    } else {
        path.to_path_buf()
    }
}

fn forward_output<R>(stream: Option<R>, version: String, stream_name: &'static str)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let Some(stream) = stream else { return };
    tokio::spawn(async move {
        let mut lines = BufReader::new(stream).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            tracing::info!(version = %version, stream = stream_name, "{}", line);
        }
    });
}

async fn wait_until_listening(addr: SocketAddr, child: &mut Child, limit: Duration) -> Result<(), HostError> {
    let deadline = Instant::now() + limit;
    loop {
        if TcpStream::connect(addr).await.is_ok() {
            return Ok(());
        }
        if let Some(status) = child.try_wait()? {
            return Err(HostError::Launch(format!("process exited early with {}", status)));
        }
        if Instant::now() >= deadline {
            return Err(HostError::Launch(format!(
                "instance did not listen on {} within {:?}",
                addr, limit
            )));
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}

impl AppLauncher for ProcessLauncher {
    fn launch<'a>(&'a self, candidate: &'a Candidate) -> BoxFuture<'a, Result<Box<dyn HostedApp>, HostError>> {
        Box::pin(async move {
            let port = free_port()?;
            let root = candidate.root();
            let program = resolve_command(root, &candidate.launch.command);
            let port_text = port.to_string();
            let args: Vec<String> = candidate
                .launch
                .args
                .iter()
                .map(|arg| arg.replace(PORT_PLACEHOLDER, &port_text))
                .collect();

            let mut child = Command::new(&program)
                .args(&args)
                .envs(&candidate.launch.env)
                .env("PORT", &port_text)
                .current_dir(root)
                .stdin(Stdio::null())
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .kill_on_drop(true)
                .spawn()
                .map_err(|e| HostError::Launch(format!("{}: {}", program.display(), e)))?;

            let version = candidate.version_name();
            forward_output(child.stdout.take(), version.clone(), "stdout");
            forward_output(child.stderr.take(), version.clone(), "stderr");

            let addr = SocketAddr::from((Ipv4Addr::LOCALHOST, port));
            wait_until_listening(addr, &mut child, self.launch_timeout).await?;

            tracing::info!(version = %version, address = %addr, pid = ?child.id(), "Instance listening");

            Ok(Box::new(ProcessApp {
                addr,
                client: self.client.clone(),
                child: Mutex::new(Some(child)),
            }) as Box<dyn HostedApp>)
        })
    }
}

/// A running child process answering HTTP on a loopback port.
pub struct ProcessApp {
    addr: SocketAddr,
    client: Client<HttpConnector, Body>,
    child: Mutex<Option<Child>>,
}

impl ProcessApp {
    async fn call(&self, request: AppRequest) -> Result<AppResponse, HostError> {
        let uri = format!("http://{}{}", self.addr, request.uri);
        let mut builder = Request::builder().method(request.method).uri(uri);
        if let Some(headers) = builder.headers_mut() {
            *headers = request.headers;
            if let Ok(host) = HeaderValue::from_str(&self.addr.to_string()) {
                headers.insert(header::HOST, host);
            }
        }
        let outbound = builder
            .body(Body::from(request.body))
            .map_err(|e| HostError::Call(e.to_string()))?;

        let response = self
            .client
            .request(outbound)
            .await
            .map_err(|e| HostError::Call(e.to_string()))?;

        let (parts, body) = response.into_parts();
        let body = axum::body::to_bytes(Body::new(body), usize::MAX)
            .await
            .map_err(|e| HostError::Call(e.to_string()))?;

        Ok(AppResponse {
            status: parts.status,
            headers: parts.headers,
            body,
        })
    }
}

impl HostedApp for ProcessApp {
    fn direct_call(&self, request: AppRequest) -> BoxFuture<'_, Result<AppResponse, HostError>> {
        Box::pin(self.call(request))
    }

    fn shutdown(&self) -> BoxFuture<'_, Result<(), HostError>> {
        Box::pin(async move {
            let Some(mut child) = self.child.lock().await.take() else {
                return Ok(());
            };
            if child.try_wait()?.is_some() {
                return Ok(());
            }
            child
                .kill()
                .await
                .map_err(|e| HostError::Shutdown(format!("kill {}: {}", self.addr, e)))
        })
    }
}
