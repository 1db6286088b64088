//! Packhouse Data Server
//!
//! Main entry point for the packhouse data-plane server: framed TCP
//! upload/download of versioned data batches backed by SQLite metadata
//! and chunked object storage.
//!
//! ## Configuration
//! All configuration is done via environment variables:
//!
//! - `PACKHOUSE_ADDR`: Server bind address (default: 0.0.0.0:7171)
//! - `PACKHOUSE_DB`: SQLite database path (default: ./data/packhouse.db)
//! - `PACKHOUSE_DATA_DIR`: Chunk storage directory (default: ./data/chunks)
//! - `PACKHOUSE_LOCK_ATTEMPTS`: Upload lock retries before giving up (default: 30)
//!
//! ## Logging
//! Logging is controlled via the `RUST_LOG` environment variable:
//! ```bash
//! RUST_LOG=debug cargo run -p packhouse-server    # Detailed logs
//! RUST_LOG=info cargo run -p packhouse-server     # Standard logs (default)
//! ```

use std::path::Path;
use std::sync::Arc;

use packhouse_metadata::{OpenPermissions, SqliteMetadataStore};
use packhouse_server::{PackhouseServer, ServerConfig, ServerState};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = ServerConfig::from_env()?;

    if let Some(parent) = Path::new(&config.db_path).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    std::fs::create_dir_all(&config.data_dir)?;

    tracing::info!("Initializing metadata store at {}", config.db_path);
    let metadata = Arc::new(SqliteMetadataStore::new(&config.db_path).await?);

    tracing::info!("Initializing chunk storage at {}", config.data_dir);
    let object_store: Arc<dyn object_store::ObjectStore> = Arc::new(
        object_store::local::LocalFileSystem::new_with_prefix(&config.data_dir)?,
    );

    // Authorization is enforced per message; the binary currently wires
    // in the allow-everything checker until an account system fronts it.
    let permissions = Arc::new(OpenPermissions::new());

    let bind_addr = config.bind_addr.clone();
    let state = Arc::new(ServerState::new(config, metadata, permissions, object_store));

    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();

    tokio::spawn(async move {
        let ctrl_c = async {
            tokio::signal::ctrl_c()
                .await
                .expect("failed to install Ctrl+C handler");
        };

        #[cfg(unix)]
        let terminate = async {
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .expect("failed to install signal handler")
                .recv()
                .await;
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {
                tracing::info!("Received SIGINT (Ctrl+C), initiating graceful shutdown");
            },
            _ = terminate => {
                tracing::info!("Received SIGTERM, initiating graceful shutdown");
            },
        }

        let _ = shutdown_tx.send(());
    });

    tracing::info!("Packhouse server starting on {}", bind_addr);
    PackhouseServer::new(state)
        .bind()
        .await?
        .run_until(shutdown_rx)
        .await?;

    tracing::info!("Packhouse server shut down gracefully");

    Ok(())
}
