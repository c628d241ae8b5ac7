//! TLS configuration and handshakes for https endpoints.

use std::path::Path;

use axum_server::accept::Accept;
use axum_server::tls_rustls::{RustlsAcceptor, RustlsConfig};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;

use crate::config::schema::TlsConfig;

/// Load TLS configuration from certificate and key files.
pub async fn load_tls_config(cert_path: &Path, key_path: &Path) -> Result<RustlsConfig, std::io::Error> {
    for (kind, path) in [("Certificate", cert_path), ("Private key", key_path)] {
        if !path.exists() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("{} file not found: {}", kind, path.display()),
            ));
        }
    }
    RustlsConfig::from_pem_file(cert_path, key_path).await
}

/// Server-side TLS handshake for accepted sockets.
#[derive(Clone)]
pub struct TlsTerminator {
    acceptor: RustlsAcceptor,
}

impl TlsTerminator {
    pub async fn from_config(config: &TlsConfig) -> Result<Self, std::io::Error> {
        let rustls = load_tls_config(Path::new(&config.cert_path), Path::new(&config.key_path)).await?;
        Ok(Self::new(rustls))
    }

    pub fn new(config: RustlsConfig) -> Self {
        Self {
            acceptor: RustlsAcceptor::new(config),
        }
    }

    pub async fn handshake(
        &self,
        stream: TcpStream,
    ) -> std::io::Result<impl AsyncRead + AsyncWrite + Unpin + Send + 'static> {
        let (stream, ()) = self.acceptor.accept(stream, ()).await?;
        Ok(stream)
    }
}
