//! Error Types for Packhouse Core
//!
//! This module defines the errors shared by the chunk format and the types
//! built on top of it.
//!
//! ## Error Categories
//!
//! ### Data Integrity Errors
//! - `InvalidMagic`: Chunk file doesn't start (or end) with the expected magic bytes ("PKCH")
//! - `CrcMismatch`: Data corruption detected via checksum
//! - `InvalidChunk`: Malformed chunk data (truncated, bad framing, count mismatch)
//!
//! ### Version/Compatibility Errors
//! - `UnsupportedVersion`: Chunk was created by a newer format version
//! - `InvalidCompression`: Unknown compression type ID
//!
//! ### Encoding Errors
//! - `Encode` / `Decode`: Record serialization to or from the chunk frame format failed
//! - `Decompression`: Failed to decompress a block (likely corruption)
//!
//! ## Usage
//! Functions in this crate return `Result<T>`, aliased to `Result<T, Error>`,
//! so errors propagate with the `?` operator.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid magic bytes")]
    InvalidMagic,

    #[error("Unsupported version: {0}")]
    UnsupportedVersion(u16),

    #[error("Invalid compression type: {0}")]
    InvalidCompression(u16),

    #[error("CRC mismatch")]
    CrcMismatch,

    #[error("Invalid chunk: {0}")]
    InvalidChunk(String),

    #[error("Record encode error: {0}")]
    Encode(String),

    #[error("Record decode error: {0}")]
    Decode(String),

    #[error("Decompression error: {0}")]
    Decompression(String),
}

pub type Result<T> = std::result::Result<T, Error>;
