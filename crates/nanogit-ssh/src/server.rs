//! TCP listener and connection dispatch.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use russh::{MethodKind, MethodSet};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;
use uuid::Uuid;

use crate::config::ServerConfig;
use crate::constants::{SSH_AUTH_REJECTION_DELAY, SSH_INACTIVITY_TIMEOUT, SSH_MAX_AUTH_ATTEMPTS};
use crate::error::ConfigError;
use crate::host_key::load_or_generate_host_key;
use crate::session::ConnectionHandler;

/// Git SSH server ready to bind.
pub struct GitSshServer {
    config: ServerConfig,
}

/// A server whose host key is loaded and whose socket is listening.
pub struct BoundServer {
    listener: TcpListener,
    russh_config: Arc<russh::server::Config>,
    config: ServerConfig,
}

impl GitSshServer {
    pub fn new(config: ServerConfig) -> Self {
        Self { config }
    }

    /// Load (or generate) the host key and bind the listening socket.
    pub async fn bind(self) -> Result<BoundServer, ConfigError> {
        let host_key = match self.config.host_key() {
            Some(key) => key.clone(),
            None => {
                load_or_generate_host_key(self.config.private_key_path(), self.config.keygen())
                    .await?
            }
        };

        let mut methods = MethodSet::empty();
        methods.push(MethodKind::PublicKey);

        let russh_config = russh::server::Config {
            auth_rejection_time: SSH_AUTH_REJECTION_DELAY,
            auth_rejection_time_initial: Some(Duration::ZERO),
            inactivity_timeout: Some(SSH_INACTIVITY_TIMEOUT),
            max_auth_attempts: SSH_MAX_AUTH_ATTEMPTS,
            methods,
            keys: vec![host_key],
            ..Default::default()
        };

        let addr = self.config.listen_addr();
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|source| ConfigError::Bind { addr, source })?;

        Ok(BoundServer {
            listener,
            russh_config: Arc::new(russh_config),
            config: self.config,
        })
    }

    /// Bind, then serve until `shutdown` is cancelled.
    pub async fn run(self, shutdown: CancellationToken) -> Result<(), ConfigError> {
        self.bind().await?.serve(shutdown).await;
        Ok(())
    }
}

impl BoundServer {
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept connections until `shutdown` is cancelled. Connections already
    /// in flight keep running on their own tasks.
    pub async fn serve(self, shutdown: CancellationToken) {
        match self.listener.local_addr() {
            Ok(addr) => tracing::info!(%addr, "git ssh server listening"),
            Err(e) => tracing::warn!(error = %e, "git ssh server listening on unknown address"),
        }

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    tracing::info!("shutdown requested, no longer accepting connections");
                    break;
                }
                accepted = self.listener.accept() => {
                    let (stream, peer) = match accepted {
                        Ok(pair) => pair,
                        Err(e) => {
                            tracing::warn!(error = %e, "failed to accept connection");
                            continue;
                        }
                    };
                    let handler = ConnectionHandler::new(
                        Some(peer),
                        self.config.verifier().clone(),
                        self.config.commands().clone(),
                    );
                    let span = tracing::info_span!("connection", conn = %Uuid::new_v4(), %peer);
                    tokio::spawn(
                        handle_connection(self.russh_config.clone(), stream, handler).instrument(span),
                    );
                }
            }
        }
    }
}

async fn handle_connection(
    config: Arc<russh::server::Config>,
    stream: TcpStream,
    handler: ConnectionHandler,
) {
    tracing::debug!("connection accepted");
    if let Err(e) = stream.set_nodelay(true) {
        tracing::debug!(error = %e, "set_nodelay failed");
    }

    match russh::server::run_stream(config, stream, handler).await {
        Ok(session) => match session.await {
            Ok(()) => tracing::debug!("connection closed"),
            Err(e) => tracing::debug!(error = %e, "connection ended with error"),
        },
        Err(e) => tracing::warn!(error = %e, "ssh handshake failed"),
    }
}
