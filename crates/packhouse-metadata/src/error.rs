//! Metadata error types.
//!
//! Every store operation returns [`Result<T>`], aliased to
//! `Result<T, MetadataError>`. Database failures convert automatically via
//! `?`; the named variants exist so callers can map "thing does not exist"
//! onto protocol-level error codes without string matching.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, MetadataError>;

#[derive(Debug, Error)]
pub enum MetadataError {
    #[error("package not found: {0}")]
    PackageNotFound(String),

    #[error("batch not found: {0}")]
    BatchNotFound(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("migration error: {0}")]
    Migration(String),
}

impl From<sqlx::migrate::MigrateError> for MetadataError {
    fn from(e: sqlx::migrate::MigrateError) -> Self {
        MetadataError::Migration(e.to_string())
    }
}
