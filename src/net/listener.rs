//! TCP listener implementation with backpressure.
//!
//! # Responsibilities
//! - Bind one configured endpoint
//! - Accept incoming TCP connections with a bounded wait
//! - Bound the connections waiting for a worker via semaphore
//!
//! # Design Decisions
//! - A queue permit is taken before accepting, so a full queue stops the
//!   accept loop instead of piling up sockets
//! - `accept_within` returns `None` on timeout so the caller can run its
//!   periodic checks between connections

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::config::EndpointConfig;

/// Error type for listener operations.
#[derive(Debug, Error)]
pub enum ListenerError {
    #[error("Failed to bind {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to accept: {0}")]
    Accept(#[source] std::io::Error),

    #[error("TLS setup failed: {0}")]
    Tls(#[source] std::io::Error),

    #[error("no endpoint could be bound")]
    NothingBound,

    #[error("listener queue closed")]
    Closed,
}

/// One bound endpoint.
pub struct Listener {
    name: String,
    secure: bool,
    inner: TcpListener,
    queue: Arc<Semaphore>,
}

/// An accepted connection holding its queue slot.
pub struct Accepted {
    pub stream: TcpStream,
    pub peer: SocketAddr,
    pub permit: QueuePermit,
}

impl Listener {
    /// Bind `endpoint`, allowing `max_queued` accepted connections to wait for a worker.
    pub async fn bind(endpoint: &EndpointConfig, max_queued: usize) -> Result<Self, ListenerError> {
        let bind_error = |source| ListenerError::Bind {
            address: endpoint.address.clone(),
            source,
        };
        let addr: SocketAddr = endpoint
            .address
            .parse()
            .map_err(|e| bind_error(std::io::Error::new(std::io::ErrorKind::InvalidInput, e)))?;

        let listener = TcpListener::bind(addr).await.map_err(bind_error)?;
        let local_addr = listener.local_addr().map_err(bind_error)?;

        tracing::info!(
            endpoint = %endpoint.name,
            address = %local_addr,
            secure = endpoint.is_secure(),
            max_queued,
            "Listener bound"
        );

        Ok(Self {
            name: endpoint.name.clone(),
            secure: endpoint.is_secure(),
            inner: listener,
            queue: Arc::new(Semaphore::new(max_queued.max(1))),
        })
    }

    /// Accept one connection, waiting at most `wait` (for a queue slot and
    /// for the connection each).
    pub async fn accept_within(&self, wait: Duration) -> Result<Option<Accepted>, ListenerError> {
        let permit = match tokio::time::timeout(wait, Arc::clone(&self.queue).acquire_owned()).await {
            Err(_) => return Ok(None),
            Ok(Err(_)) => return Err(ListenerError::Closed),
            Ok(Ok(permit)) => permit,
        };

        match tokio::time::timeout(wait, self.inner.accept()).await {
            Err(_) => Ok(None),
            Ok(Err(e)) => Err(ListenerError::Accept(e)),
            Ok(Ok((stream, peer))) => {
                tracing::trace!(
                    endpoint = %self.name,
                    peer_addr = %peer,
                    queue_free = self.queue.available_permits(),
                    "Connection accepted"
                );
                Ok(Some(Accepted {
                    stream,
                    peer,
                    permit: QueuePermit { _permit: permit },
                }))
            }
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_secure(&self) -> bool {
        self.secure
    }

    /// Get the local address this listener is bound to.
    pub fn local_addr(&self) -> Result<SocketAddr, std::io::Error> {
        self.inner.local_addr()
    }
}

/// A slot in the accept queue, released when dropped.
#[derive(Debug)]
pub struct QueuePermit {
    _permit: OwnedSemaphorePermit,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn endpoint() -> EndpointConfig {
        EndpointConfig::http("test", "127.0.0.1:0")
    }

    #[tokio::test]
    async fn times_out_without_connections() {
        let listener = Listener::bind(&endpoint(), 4).await.unwrap();
        let accepted = listener.accept_within(Duration::from_millis(20)).await.unwrap();
        assert!(accepted.is_none());
    }

    #[tokio::test]
    async fn full_queue_blocks_accepting() {
        let listener = Listener::bind(&endpoint(), 1).await.unwrap();
        let addr = listener.local_addr().unwrap();

        let _first = TcpStream::connect(addr).await.unwrap();
        let _second = TcpStream::connect(addr).await.unwrap();

        let held = listener
            .accept_within(Duration::from_secs(1))
            .await
            .unwrap()
            .expect("first connection");
        assert!(listener.accept_within(Duration::from_millis(20)).await.unwrap().is_none());

        drop(held);
        assert!(listener.accept_within(Duration::from_secs(1)).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn bad_address_fails_to_bind() {
        let err = Listener::bind(&EndpointConfig::http("x", "nowhere"), 1)
            .await
            .err()
            .unwrap();
        assert!(matches!(err, ListenerError::Bind { .. }));
    }
}
