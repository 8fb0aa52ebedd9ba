use axum::{Extension, Router};
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder;
use hyper_util::service::TowerToHyperService;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio_rustls::LazyConfigAcceptor;
use tracing::{debug, error, info, warn};

use crate::tls::{ClientTlsNegotiator, TlsError};

#[derive(Debug, Error)]
pub enum ServerError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Tls(#[from] TlsError),

    #[error("TLS handshake timed out")]
    HandshakeTimeout,

    #[error("connection error: {0}")]
    Connection(String),
}

/// Transport facts about the connection a request arrived on
#[derive(Debug, Clone)]
pub struct ConnectionInfo {
    pub remote: SocketAddr,
    /// DER encoded client certificate chain, leaf first
    pub certificates: Arc<Vec<Vec<u8>>>,
}

impl ConnectionInfo {
    pub fn new(remote: SocketAddr) -> Self {
        Self {
            remote,
            certificates: Arc::new(Vec::new()),
        }
    }
}

/// Accepts TLS connections until `shutdown` resolves, one task per connection
pub async fn serve(
    listener: TcpListener,
    negotiator: ClientTlsNegotiator,
    app: Router,
    handshake_timeout: Duration,
    shutdown: impl Future<Output = ()>,
) -> Result<(), ServerError> {
    info!("Listening on https://{}", listener.local_addr()?);
    tokio::pin!(shutdown);

    loop {
        let (stream, remote) = tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok(pair) => pair,
                Err(e) => {
                    warn!("Failed to accept connection: {}", e);
                    continue;
                }
            },
            _ = &mut shutdown => {
                info!("Shutting down listener");
                return Ok(());
            }
        };

        let negotiator = negotiator.clone();
        let app = app.clone();
        tokio::spawn(async move {
            if let Err(e) = serve_connection(stream, remote, negotiator, app, handshake_timeout).await {
                debug!("Connection from {} closed with error: {}", remote, e);
            }
        });
    }
}

async fn serve_connection(
    stream: TcpStream,
    remote: SocketAddr,
    negotiator: ClientTlsNegotiator,
    app: Router,
    handshake_timeout: Duration,
) -> Result<(), ServerError> {
    let handshake = async {
        let start = LazyConfigAcceptor::new(rustls::server::Acceptor::default(), stream).await?;
        let config = negotiator.select(remote.ip()).await.map_err(|e| {
            error!("Unable to prepare TLS configuration for {}: {}", remote, e);
            e
        })?;
        Ok::<_, ServerError>(start.into_stream(config).await?)
    };
    let tls = tokio::time::timeout(handshake_timeout, handshake)
        .await
        .map_err(|_| ServerError::HandshakeTimeout)??;

    let certificates = tls
        .get_ref()
        .1
        .peer_certificates()
        .map(|chain| chain.iter().map(|c| c.as_ref().to_vec()).collect())
        .unwrap_or_default();
    let info = ConnectionInfo {
        remote,
        certificates: Arc::new(certificates),
    };

    let service = TowerToHyperService::new(app.layer(Extension(info)));
    Builder::new(TokioExecutor::new())
        .serve_connection(TokioIo::new(tls), service)
        .await
        .map_err(|e| ServerError::Connection(e.to_string()))
}
