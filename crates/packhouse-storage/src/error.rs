//! Storage Error Types
//!
//! All storage operations return `Result<T>`, aliased to `Result<T, Error>`.
//! Chunk format violations surface as `packhouse_core::Error` values wrapped
//! in `Core`; backend failures come through `ObjectStore`.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Chunk format error: {0}")]
    Core(#[from] packhouse_core::Error),

    #[error("Object store error: {0}")]
    ObjectStore(#[from] object_store::Error),

    #[error("Chunk upload failed: {0}")]
    ChunkUpload(String),
}
