//! # Packhouse Data Server
//!
//! The data-plane server for packhouse: clients connect over framed TCP,
//! identify themselves, and then upload record streams into batches,
//! fetch batches back out, or flip which batches are active.
//!
//! ## Protocol
//!
//! Messages are length-prefixed JSON frames (see `packhouse-wire`). A
//! connection starts with `HELLO` and then multiplexes:
//!
//! - **Upload**: `START_UPLOAD` / `UPLOAD_DATA`* / `UPLOAD_STOP`, one
//!   session per connection, guarded by a distributed per-stream lock.
//!   Each `UPLOAD_DATA` is acked once its records are queued, so the
//!   client self-paces against storage.
//! - **Download**: `OPEN_FETCH_CHANNEL` / `START` / `ACK`*, any number
//!   of channels per connection. The server keeps one unacknowledged
//!   `DATA` frame in flight per channel and pushes `STOP` when the
//!   batch is exhausted.
//! - **Activation**: `SET_ACTIVE_BATCHES` flips the default batch per
//!   stream in one transaction.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use packhouse_metadata::{OpenPermissions, SqliteMetadataStore};
//! use packhouse_server::{PackhouseServer, ServerConfig, ServerState};
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = ServerConfig::default();
//!     let metadata = Arc::new(SqliteMetadataStore::new(&config.db_path).await.unwrap());
//!     let store = Arc::new(object_store::memory::InMemory::new());
//!     let state = ServerState::new(config, metadata, Arc::new(OpenPermissions::new()), store);
//!     PackhouseServer::new(Arc::new(state)).bind().await.unwrap().run().await.unwrap();
//! }
//! ```

pub mod config;
pub mod error;
pub mod router;
pub mod server;
pub mod session;

pub use config::ServerConfig;
pub use error::{Result, ServerError, SessionError};
pub use router::run_connection;
pub use server::{BoundServer, PackhouseServer, ServerState};
