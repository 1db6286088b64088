//! Packhouse Storage - Chunked Batch Persistence
//!
//! This crate stores batch data as immutable, compressed **chunks** in any
//! `object_store` backend (local filesystem in the server binary, memory in
//! tests, S3-compatible stores in production).
//!
//! ## Architecture
//!
//! ```text
//! upload session                         download session
//!      │                                       ▲
//!      │ record groups                         │ record groups
//!      ▼                                       │
//! ┌──────────────┐                      ┌──────────────┐
//! │  BatchStore  │                      │  BatchStore  │
//! │  write_batch │                      │  read_batch  │
//! └──────┬───────┘                      └──────▲───────┘
//!        │ ChunkWriter                         │ ChunkReader
//!        │ (encode + compress)                 │ (validate + decode)
//!        ▼                                     │
//! ┌─────────────────────────────────────────────────────┐
//! │ object storage: data/{batch_id}/{start_offset}.phc  │
//! └─────────────────────────────────────────────────────┘
//! ```
//!
//! Each call to `write_batch` produces exactly one new chunk named by the
//! offset of its first record, so a batch built across several upload
//! sessions is a sorted sequence of chunk objects. Readers list that
//! sequence, seek by start offset, and decode lazily one chunk at a time.

pub mod batch_store;
pub mod batching;
pub mod chunk;
mod error;

pub use batch_store::{BatchStore, ChunkEntry, ChunkSequence};
pub use batching::{BatchingTransform, MAX_GROUP_RECORDS};
pub use chunk::{ChunkReader, ChunkSummary, ChunkWriter};
pub use error::{Error, Result};
