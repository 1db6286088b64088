//! Chunk Format Constants
//!
//! A chunk is the immutable storage unit for batch data: one compressed
//! object holding a contiguous run of records, named by the offset of its
//! first record. The encoder and decoder live in the storage crate; this
//! module pins down the constants both sides share.
//!
//! ## Chunk Lifecycle
//! 1. An upload session streams records through the chunk writer
//! 2. Encoded blocks are piped to object storage under an in-progress name
//! 3. On success the object is renamed to `<start_offset>.phc` (the commit point)
//! 4. Readers list a batch's chunks by name, never touching in-progress objects
//!
//! ## Compression Types
//! - **None**: no compression, blocks stored raw (still length-framed)
//! - **Lz4**: `lz4_flex` block compression with a size-prepended payload

use serde::{Deserialize, Serialize};

/// Magic bytes for chunk files: "PKCH"
pub const CHUNK_MAGIC: [u8; 4] = [0x50, 0x4B, 0x43, 0x48];

/// Version number for the chunk format
pub const CHUNK_VERSION: u16 = 1;

/// Chunk header size: magic (4) + version (2) + compression (2) + base offset (8)
pub const HEADER_SIZE: usize = 16;

/// Chunk footer size: record count (4) + end offset (8) + CRC32 (4) + magic (4)
pub const FOOTER_SIZE: usize = 20;

/// Target uncompressed block size (~1MB)
pub const BLOCK_SIZE_TARGET: usize = 1024 * 1024;

/// Compression type for chunk blocks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u16)]
pub enum Compression {
    None = 0,
    Lz4 = 1,
}

impl TryFrom<u16> for Compression {
    type Error = crate::Error;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Compression::None),
            1 => Ok(Compression::Lz4),
            _ => Err(crate::Error::InvalidCompression(value)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compression_round_trips_through_wire_value() {
        for compression in [Compression::None, Compression::Lz4] {
            let value = compression as u16;
            assert_eq!(Compression::try_from(value).unwrap(), compression);
        }
    }

    #[test]
    fn unknown_compression_is_rejected() {
        assert!(matches!(
            Compression::try_from(9),
            Err(crate::Error::InvalidCompression(9))
        ));
    }
}
