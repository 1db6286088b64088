//! TCP server
//!
//! Owns the listener and the accept loop. Every accepted connection gets
//! its own task running the connection router; all connections share one
//! `ServerState`.

use std::net::SocketAddr;
use std::sync::Arc;

use object_store::ObjectStore;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};

use packhouse_metadata::{DistributedLock, MetadataStore, PermissionCheck};
use packhouse_storage::BatchStore;

use crate::config::ServerConfig;
use crate::error::Result;
use crate::router;

/// Shared state for all connections.
pub struct ServerState {
    /// Configuration
    pub config: ServerConfig,
    /// Package, batch, and lock metadata
    pub metadata: Arc<dyn MetadataStore>,
    /// Permission checks, keyed by the connection's HELLO username
    pub permissions: Arc<dyn PermissionCheck>,
    /// Chunked batch data
    pub batches: BatchStore,
    /// Upload stream locks
    pub lock: DistributedLock,
}

impl ServerState {
    pub fn new(
        config: ServerConfig,
        metadata: Arc<dyn MetadataStore>,
        permissions: Arc<dyn PermissionCheck>,
        object_store: Arc<dyn ObjectStore>,
    ) -> Self {
        let lock = DistributedLock::new(metadata.clone()).with_ttl(config.lock_ttl);
        Self {
            config,
            metadata,
            permissions,
            batches: BatchStore::new(object_store),
            lock,
        }
    }
}

/// The packhouse data server.
pub struct PackhouseServer {
    state: Arc<ServerState>,
}

impl PackhouseServer {
    pub fn new(state: Arc<ServerState>) -> Self {
        Self { state }
    }

    /// Bind the configured address, keeping the listener for a later run.
    pub async fn bind(self) -> Result<BoundServer> {
        let listener = TcpListener::bind(&self.state.config.bind_addr).await?;
        info!("packhouse server listening on {}", listener.local_addr()?);

        Ok(BoundServer {
            listener,
            state: self.state,
        })
    }
}

/// A server that has been bound to a port.
pub struct BoundServer {
    listener: TcpListener,
    state: Arc<ServerState>,
}

impl BoundServer {
    /// The local address the server is bound to.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept connections until the shutdown signal fires (or its sender
    /// is dropped).
    pub async fn run_until(self, shutdown: oneshot::Receiver<()>) -> Result<()> {
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                result = self.listener.accept() => {
                    match result {
                        Ok((stream, addr)) => {
                            let state = self.state.clone();
                            tokio::spawn(async move {
                                match router::run_connection(stream, state).await {
                                    Ok(()) => debug!(peer = %addr, "connection closed"),
                                    Err(e) => warn!(peer = %addr, error = %e, "connection error"),
                                }
                            });
                        }
                        Err(e) => {
                            error!("failed to accept connection: {}", e);
                        }
                    }
                }
                _ = &mut shutdown => {
                    info!("packhouse server shutting down");
                    break;
                }
            }
        }

        Ok(())
    }

    /// Accept connections forever.
    pub async fn run(self) -> Result<()> {
        let (_keep_open, shutdown) = oneshot::channel();
        self.run_until(shutdown).await
    }
}
