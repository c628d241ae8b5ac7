//! HTTP server setup and connection dispatch.
//!
//! # Responsibilities
//! - Create the Axum app around the version router
//! - Wire up middleware (tracing, request ID, panic capture)
//! - Run one accept loop per endpoint with a periodic liveness callback
//! - Hand each connection to a bounded worker pool
//! - Drain in-flight connections on shutdown
//!
//! # Design Decisions
//! - One request per connection: HTTP/1 keep-alive is off, so every exit
//!   path closes the socket
//! - Worker permits are taken inside the connection task, so the accept loop
//!   only blocks when the accept queue is full

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::extract::State;
use axum::http::Request;
use axum::response::Response;
use axum::Router;
use hyper::body::Incoming;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto;
use hyper_util::service::TowerToHyperService;
use tokio::sync::Semaphore;
use tower::ServiceExt;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::trace::TraceLayer;

use crate::config::ListenerConfig;
use crate::http::request::RequestIdLayer;
use crate::lifecycle::Shutdown;
use crate::net::{Accepted, ConnectionTracker, Listener, ListenerError, TlsTerminator};
use crate::routing::{ConnectionInfo, VersionRouter};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Callback run whenever an accept loop sees no connection for a full
/// check interval.
pub type PeriodicCheck = Arc<dyn Fn() + Send + Sync>;

/// Build the Axum app: every path goes to the version router.
pub fn build_app(router: Arc<VersionRouter>) -> Router {
    Router::new()
        .fallback(route_request)
        .with_state(router)
        .layer(CatchPanicLayer::new())
        .layer(RequestIdLayer::propagate())
        .layer(TraceLayer::new_for_http())
        .layer(RequestIdLayer::set())
}

async fn route_request(State(router): State<Arc<VersionRouter>>, request: Request<Body>) -> Response {
    router.handle(request).await
}

struct DispatchShared {
    app: Router,
    tls: Option<TlsTerminator>,
    workers: Arc<Semaphore>,
    tracker: ConnectionTracker,
    periodic_check: Duration,
    on_tick: PeriodicCheck,
}

/// Accepts connections on every configured endpoint and serves them.
pub struct Dispatcher {
    listeners: Vec<Listener>,
    shared: Arc<DispatchShared>,
}

impl Dispatcher {
    /// Bind every endpoint. Endpoints that fail to bind are logged and
    /// skipped; it is an error only when none can be bound.
    pub async fn bind(config: &ListenerConfig, app: Router, on_tick: PeriodicCheck) -> Result<Self, ListenerError> {
        let tls = match &config.tls {
            Some(tls) if config.https_available() => {
                Some(TlsTerminator::from_config(tls).await.map_err(ListenerError::Tls)?)
            }
            _ => None,
        };

        let mut listeners = Vec::new();
        for endpoint in &config.endpoints {
            if endpoint.is_secure() && tls.is_none() {
                tracing::error!(endpoint = %endpoint.name, "Skipping https endpoint without TLS configuration");
                continue;
            }
            match Listener::bind(endpoint, config.max_queued).await {
                Ok(listener) => listeners.push(listener),
                Err(e) => tracing::error!(endpoint = %endpoint.name, error = %e, "Failed to bind endpoint"),
            }
        }
        if listeners.is_empty() {
            return Err(ListenerError::NothingBound);
        }

        tracing::info!(
            endpoints = listeners.len(),
            parallelism = config.parallelism,
            "Dispatcher ready"
        );

        Ok(Self {
            listeners,
            shared: Arc::new(DispatchShared {
                app,
                tls,
                workers: Arc::new(Semaphore::new(config.parallelism.max(1))),
                tracker: ConnectionTracker::new(),
                periodic_check: config.periodic_check(),
                on_tick,
            }),
        })
    }

    /// Bound addresses, by endpoint name.
    pub fn local_addrs(&self) -> Vec<(String, SocketAddr)> {
        self.listeners
            .iter()
            .filter_map(|l| l.local_addr().ok().map(|addr| (l.name().to_string(), addr)))
            .collect()
    }

    pub fn tracker(&self) -> ConnectionTracker {
        self.shared.tracker.clone()
    }

    /// Serve until `shutdown` fires, then wait up to `drain` for in-flight
    /// connections.
    pub async fn serve(self, shutdown: Shutdown, drain: Duration) {
        let loops: Vec<_> = self
            .listeners
            .into_iter()
            .map(|listener| tokio::spawn(accept_loop(listener, Arc::clone(&self.shared), shutdown.clone())))
            .collect();

        for handle in loops {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "Accept loop panicked");
            }
        }
        // every loop gone means nothing is listening any more
        shutdown.trigger();

        let in_flight = self.shared.tracker.active_count();
        if in_flight > 0 {
            tracing::info!(in_flight, "Draining connections");
        }
        if !self.shared.tracker.wait_idle(drain).await {
            tracing::warn!(
                remaining = self.shared.tracker.active_count(),
                "Drain timed out"
            );
        }
        tracing::info!("Dispatcher stopped");
    }
}

async fn accept_loop(listener: Listener, shared: Arc<DispatchShared>, shutdown: Shutdown) {
    let mut stop = shutdown.subscribe();
    let secure = listener.is_secure();

    while !shutdown.is_triggered() {
        let accepted = tokio::select! {
            _ = stop.recv() => break,
            accepted = listener.accept_within(shared.periodic_check) => accepted,
        };

        match accepted {
            Ok(Some(connection)) => dispatch(connection, secure, Arc::clone(&shared)),
            Ok(None) => (shared.on_tick)(),
            Err(ListenerError::Closed) => break,
            Err(e) => {
                tracing::warn!(endpoint = %listener.name(), error = %e, "Accept failed");
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
        }
    }
    tracing::debug!(endpoint = %listener.name(), "Accept loop stopped");
}

fn dispatch(connection: Accepted, secure: bool, shared: Arc<DispatchShared>) {
    let guard = shared.tracker.track();
    tokio::spawn(async move {
        let Accepted { stream, peer, permit } = connection;
        let Ok(_worker) = Arc::clone(&shared.workers).acquire_owned().await else {
            return;
        };
        drop(permit);

        let info = ConnectionInfo {
            secure,
            peer: Some(peer),
        };
        let served = if secure {
            let Some(tls) = &shared.tls else {
                return;
            };
            match tls.handshake(stream).await {
                Ok(stream) => serve_io(TokioIo::new(stream), shared.app.clone(), info).await,
                Err(e) => {
                    tracing::debug!(connection_id = %guard.id(), peer_addr = %peer, error = %e, "TLS handshake failed");
                    return;
                }
            }
        } else {
            serve_io(TokioIo::new(stream), shared.app.clone(), info).await
        };

        if let Err(e) = served {
            tracing::debug!(connection_id = %guard.id(), peer_addr = %peer, error = %e, "Connection ended with error");
        }
        drop(guard);
    });
}

async fn serve_io<I>(io: I, app: Router, info: ConnectionInfo) -> Result<(), BoxError>
where
    I: hyper::rt::Read + hyper::rt::Write + Unpin + Send + 'static,
{
    let service = app.map_request(move |mut request: Request<Incoming>| {
        request.extensions_mut().insert(info);
        request
    });

    let mut builder = auto::Builder::new(TokioExecutor::new());
    builder.http1().keep_alive(false);
    builder
        .serve_connection(io, TowerToHyperService::new(service))
        .await
}
