//! Server configuration
//!
//! All knobs come from environment variables in the binary; tests build a
//! `ServerConfig` directly (usually `bind_addr = "127.0.0.1:0"` plus a
//! small lock attempt count).

use std::time::Duration;

use packhouse_metadata::DEFAULT_LOCK_TTL;

use crate::error::ServerError;

/// Server configuration.
///
/// Environment variables, read by [`ServerConfig::from_env`]:
/// - `PACKHOUSE_ADDR`: bind address (default `0.0.0.0:7171`)
/// - `PACKHOUSE_DB`: SQLite database path (default `./data/packhouse.db`)
/// - `PACKHOUSE_DATA_DIR`: chunk object store root (default `./data/chunks`)
/// - `PACKHOUSE_LOCK_ATTEMPTS`: upload lock attempts before giving up (default `30`)
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind the listener to
    pub bind_addr: String,
    /// Path of the SQLite metadata database
    pub db_path: String,
    /// Directory backing the local object store
    pub data_dir: String,
    /// How many times an upload session tries for its stream lock
    pub lock_attempts: u32,
    /// How long an unrenewed upload lock survives
    pub lock_ttl: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:7171".to_string(),
            db_path: "./data/packhouse.db".to_string(),
            data_dir: "./data/chunks".to_string(),
            lock_attempts: 30,
            lock_ttl: DEFAULT_LOCK_TTL,
        }
    }
}

impl ServerConfig {
    /// Build a configuration from the environment, falling back to the
    /// defaults for anything unset.
    pub fn from_env() -> Result<Self, ServerError> {
        let defaults = Self::default();

        let lock_attempts = match std::env::var("PACKHOUSE_LOCK_ATTEMPTS") {
            Ok(raw) => raw.parse().map_err(|_| {
                ServerError::Config(format!("invalid PACKHOUSE_LOCK_ATTEMPTS: {raw:?}"))
            })?,
            Err(_) => defaults.lock_attempts,
        };

        Ok(Self {
            bind_addr: std::env::var("PACKHOUSE_ADDR").unwrap_or(defaults.bind_addr),
            db_path: std::env::var("PACKHOUSE_DB").unwrap_or(defaults.db_path),
            data_dir: std::env::var("PACKHOUSE_DATA_DIR").unwrap_or(defaults.data_dir),
            lock_attempts,
            lock_ttl: defaults.lock_ttl,
        })
    }
}
