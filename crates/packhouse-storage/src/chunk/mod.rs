//! Chunk Codec - The Binary Format for Batch Data
//!
//! This module implements the binary file format for storing record runs in
//! object storage.
//!
//! ## Chunk File Structure
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │ Header (16 bytes)                                           │
//! │ - Magic bytes: "PKCH" (4 bytes)                             │
//! │ - Version: 1 (2 bytes)                                      │
//! │ - Compression: None/Lz4 (2 bytes)                           │
//! │ - Base offset (8 bytes)                                     │
//! ├─────────────────────────────────────────────────────────────┤
//! │ Block 1                                                     │
//! │ - Block length (4 bytes)                                    │
//! │ - LZ4-compressed run of record frames (~1MB uncompressed)   │
//! ├─────────────────────────────────────────────────────────────┤
//! │ Block 2                                                     │
//! ├─────────────────────────────────────────────────────────────┤
//! │ ...                                                         │
//! ├─────────────────────────────────────────────────────────────┤
//! │ Footer (20 bytes)                                           │
//! │ - Record count (4 bytes)                                    │
//! │ - End offset (8 bytes)                                      │
//! │ - CRC32 checksum (4 bytes)                                  │
//! │ - Magic bytes: "PKCH" again (4 bytes)                       │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Record Frame Format (inside a block, uncompressed)
//!
//! ```text
//! Frame 1:
//!   - Frame length (4 bytes)
//!   - MessagePack-encoded RecordContext (offset, received_at, payload)
//! Frame 2:
//!   ...
//! ```
//!
//! ## Why This Design?
//!
//! ### Header First, Footer Last
//! A chunk can be arbitrarily large (one upload session = one chunk), so
//! the writer must emit bytes before it knows the record count or the end
//! offset. Everything known up front lives in the header; everything only
//! known at the end lives in the footer. The reader gets the offset range
//! and count without decompressing anything.
//!
//! ### Block-based Compression
//! - Blocks target ~1MB uncompressed for good LZ4 ratios
//! - A sealed block can be shipped to object storage immediately, keeping
//!   writer memory bounded no matter how long the upload runs
//! - Failed decompression only affects one block
//!
//! ### Self-describing Record Frames
//! Records are schema-described JSON documents of arbitrary shape, so each
//! frame holds a MessagePack document rather than a fixed field layout.
//!
//! ### CRC32 Checksum
//! - Detects corruption from storage or transfer
//! - Covers every byte before the checksum itself
//!
//! ## Object Naming
//!
//! Within a batch namespace a chunk is named `{start_offset}.phc`, where
//! `start_offset` is the offset of the first record in the chunk. While an
//! upload is still streaming, the object carries the `inflight-` prefix;
//! the rename to its final name is the commit point, and readers never
//! touch `inflight-` objects.

mod reader;
mod writer;

pub use reader::ChunkReader;
pub use writer::{ChunkSummary, ChunkWriter};

/// File extension for finalized chunk objects
pub const CHUNK_EXT: &str = "phc";

/// Name prefix marking a chunk upload that has not been committed yet
pub const INFLIGHT_PREFIX: &str = "inflight-";

/// The object name for a chunk starting at the given record offset.
pub fn chunk_object_name(start_offset: u64) -> String {
    format!("{start_offset}.{CHUNK_EXT}")
}

/// Parse a chunk object name back into its start offset.
///
/// Returns `None` for anything that is not `{offset}.phc`, including
/// in-progress names and foreign objects that ended up in the namespace.
pub fn parse_chunk_start_offset(name: &str) -> Option<u64> {
    name.strip_suffix(CHUNK_EXT)?
        .strip_suffix('.')?
        .parse::<u64>()
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn object_names_round_trip() {
        for offset in [0u64, 1, 140, u64::MAX] {
            let name = chunk_object_name(offset);
            assert_eq!(parse_chunk_start_offset(&name), Some(offset));
        }
    }

    #[test]
    fn foreign_names_do_not_parse() {
        assert_eq!(parse_chunk_start_offset("notes.txt"), None);
        assert_eq!(parse_chunk_start_offset("inflight-140.phc"), None);
        assert_eq!(parse_chunk_start_offset("140.phc.bak"), None);
        assert_eq!(parse_chunk_start_offset(".phc"), None);
        assert_eq!(parse_chunk_start_offset("-3.phc"), None);
    }
}
