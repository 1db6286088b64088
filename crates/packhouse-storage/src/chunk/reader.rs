//! Chunk Reader - Validation and Decoding
//!
//! `ChunkReader` takes the complete bytes of one chunk object and converts
//! them back into records.
//!
//! ## What Does ChunkReader Do?
//!
//! 1. **Validates the chunk** (magic bytes at both ends, version, CRC32)
//! 2. **Parses header and footer** for the offset range and record count,
//!    which callers get without decompressing anything
//! 3. **Decompresses blocks** and decodes record frames on `records()`
//!
//! ## Validation Process
//!
//! 1. Check the file is at least header + footer
//! 2. Verify magic bytes at the start ("PKCH")
//! 3. Check the version is supported (currently v1)
//! 4. Verify the CRC32 of everything before the checksum field
//! 5. Verify magic bytes at the end
//!
//! A chunk that fails any of these is rejected before a single block is
//! decompressed, so corruption surfaces as a typed error rather than as
//! garbage records.

use bytes::{Buf, Bytes};
use packhouse_core::chunk::{
    Compression, CHUNK_MAGIC, CHUNK_VERSION, FOOTER_SIZE, HEADER_SIZE,
};
use packhouse_core::{Error, RecordContext, Result};

/// Reads records from one chunk object.
#[derive(Debug)]
pub struct ChunkReader {
    data: Bytes,
    compression: Compression,
    base_offset: u64,
    end_offset: u64,
    record_count: u32,
}

impl ChunkReader {
    /// Validate chunk bytes and prepare them for decoding.
    pub fn new(data: Bytes) -> Result<Self> {
        if data.len() < HEADER_SIZE + FOOTER_SIZE {
            return Err(Error::InvalidChunk(format!(
                "chunk of {} bytes is smaller than header plus footer",
                data.len()
            )));
        }

        // Header: magic, version, compression, base offset.
        let mut cursor = &data[..HEADER_SIZE];
        let mut magic = [0u8; 4];
        cursor.copy_to_slice(&mut magic);
        if magic != CHUNK_MAGIC {
            return Err(Error::InvalidMagic);
        }

        let version = cursor.get_u16();
        if version != CHUNK_VERSION {
            return Err(Error::UnsupportedVersion(version));
        }

        let compression = Compression::try_from(cursor.get_u16())?;
        let base_offset = cursor.get_u64();

        // Footer: record count, end offset, CRC, magic.
        let footer_start = data.len() - FOOTER_SIZE;
        let mut cursor = &data[footer_start..];
        let record_count = cursor.get_u32();
        let end_offset = cursor.get_u64();

        let stored_crc = cursor.get_u32();
        let calculated_crc = crc32fast::hash(&data[..data.len() - 8]);
        if stored_crc != calculated_crc {
            return Err(Error::CrcMismatch);
        }

        let mut magic = [0u8; 4];
        cursor.copy_to_slice(&mut magic);
        if magic != CHUNK_MAGIC {
            return Err(Error::InvalidMagic);
        }

        if end_offset < base_offset {
            return Err(Error::InvalidChunk(format!(
                "end offset {end_offset} precedes base offset {base_offset}"
            )));
        }

        Ok(Self {
            data,
            compression,
            base_offset,
            end_offset,
            record_count,
        })
    }

    /// Offset of the first record in the chunk.
    pub fn base_offset(&self) -> u64 {
        self.base_offset
    }

    /// Offset of the last record in the chunk (inclusive).
    pub fn end_offset(&self) -> u64 {
        self.end_offset
    }

    /// Number of records in the chunk.
    pub fn record_count(&self) -> u32 {
        self.record_count
    }

    pub fn compression(&self) -> Compression {
        self.compression
    }

    /// Decompress every block and decode all records.
    pub fn records(&self) -> Result<Vec<RecordContext>> {
        let body = &self.data[HEADER_SIZE..self.data.len() - FOOTER_SIZE];
        let mut records = Vec::with_capacity(self.record_count as usize);

        let mut cursor = body;
        while cursor.has_remaining() {
            if cursor.remaining() < 4 {
                return Err(Error::InvalidChunk(
                    "truncated block length".to_string(),
                ));
            }
            let block_len = cursor.get_u32() as usize;
            if cursor.remaining() < block_len {
                return Err(Error::InvalidChunk(format!(
                    "block of {block_len} bytes overruns the chunk body"
                )));
            }

            let block = &cursor[..block_len];
            let raw = match self.compression {
                Compression::Lz4 => lz4_flex::decompress_size_prepended(block)
                    .map_err(|e| Error::Decompression(e.to_string()))?,
                Compression::None => block.to_vec(),
            };
            cursor.advance(block_len);

            self.decode_block(&raw, &mut records)?;
        }

        if records.len() != self.record_count as usize {
            return Err(Error::InvalidChunk(format!(
                "decoded {} records but the footer promised {}",
                records.len(),
                self.record_count
            )));
        }

        Ok(records)
    }

    fn decode_block(&self, raw: &[u8], records: &mut Vec<RecordContext>) -> Result<()> {
        let mut cursor = raw;
        while cursor.has_remaining() {
            if cursor.remaining() < 4 {
                return Err(Error::InvalidChunk(
                    "truncated record frame length".to_string(),
                ));
            }
            let frame_len = cursor.get_u32() as usize;
            if cursor.remaining() < frame_len {
                return Err(Error::InvalidChunk(format!(
                    "record frame of {frame_len} bytes overruns its block"
                )));
            }

            let record: RecordContext = rmp_serde::from_slice(&cursor[..frame_len])
                .map_err(|e| Error::Decode(e.to_string()))?;
            records.push(record);
            cursor.advance(frame_len);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::ChunkWriter;
    use bytes::BufMut;
    use serde_json::json;

    fn rec(offset: u64) -> RecordContext {
        RecordContext::new(
            offset,
            1_700_000_000_000 + offset as i64,
            json!({ "n": offset, "station": "KSEA" }),
        )
    }

    fn build_chunk(offsets: std::ops::Range<u64>, compression: Compression) -> Vec<u8> {
        build_chunk_with_target(offsets, compression, packhouse_core::chunk::BLOCK_SIZE_TARGET)
    }

    fn build_chunk_with_target(
        offsets: std::ops::Range<u64>,
        compression: Compression,
        block_target: usize,
    ) -> Vec<u8> {
        let mut writer = ChunkWriter::with_block_target(compression, block_target);
        let mut bytes = Vec::new();
        for offset in offsets {
            writer.append(&rec(offset)).unwrap();
            if let Some(ready) = writer.take_pending() {
                bytes.extend_from_slice(&ready);
            }
        }
        let (tail, _) = writer.finish().unwrap();
        bytes.extend_from_slice(&tail);
        bytes
    }

    #[test]
    fn round_trip_lz4() {
        let data = build_chunk(0..25, Compression::Lz4);
        let reader = ChunkReader::new(Bytes::from(data)).unwrap();

        assert_eq!(reader.base_offset(), 0);
        assert_eq!(reader.end_offset(), 24);
        assert_eq!(reader.record_count(), 25);
        assert_eq!(reader.compression(), Compression::Lz4);

        let records = reader.records().unwrap();
        assert_eq!(records.len(), 25);
        for (i, record) in records.iter().enumerate() {
            assert_eq!(record, &rec(i as u64));
        }
    }

    #[test]
    fn round_trip_uncompressed() {
        let data = build_chunk(100..110, Compression::None);
        let reader = ChunkReader::new(Bytes::from(data)).unwrap();

        assert_eq!(reader.base_offset(), 100);
        assert_eq!(reader.end_offset(), 109);
        assert_eq!(reader.records().unwrap(), (100..110).map(rec).collect::<Vec<_>>());
    }

    #[test]
    fn round_trip_multi_block() {
        // A tiny block target forces dozens of blocks for 200 records.
        let data = build_chunk_with_target(0..200, Compression::Lz4, 96);
        let reader = ChunkReader::new(Bytes::from(data)).unwrap();

        let records = reader.records().unwrap();
        assert_eq!(records.len(), 200);
        assert_eq!(records.first().unwrap().offset, 0);
        assert_eq!(records.last().unwrap().offset, 199);
    }

    #[test]
    fn single_record_chunk() {
        let data = build_chunk(7..8, Compression::Lz4);
        let reader = ChunkReader::new(Bytes::from(data)).unwrap();

        assert_eq!(reader.base_offset(), 7);
        assert_eq!(reader.end_offset(), 7);
        assert_eq!(reader.records().unwrap(), vec![rec(7)]);
    }

    #[test]
    fn corrupted_body_fails_crc() {
        let mut data = build_chunk(0..10, Compression::Lz4);
        let mid = data.len() / 2;
        data[mid] ^= 0xFF;

        assert!(matches!(
            ChunkReader::new(Bytes::from(data)),
            Err(Error::CrcMismatch)
        ));
    }

    #[test]
    fn wrong_leading_magic_is_rejected() {
        let mut data = build_chunk(0..10, Compression::Lz4);
        data[0] = b'X';

        assert!(matches!(
            ChunkReader::new(Bytes::from(data)),
            Err(Error::InvalidMagic)
        ));
    }

    #[test]
    fn truncated_chunk_is_rejected() {
        let data = build_chunk(0..10, Compression::Lz4);
        let truncated = data[..data.len() - 6].to_vec();

        // Losing the tail invalidates the footer; exactly which typed error
        // fires depends on what the remaining bytes look like, but it must
        // never decode.
        assert!(ChunkReader::new(Bytes::from(truncated)).is_err());
    }

    #[test]
    fn tiny_input_is_rejected() {
        assert!(matches!(
            ChunkReader::new(Bytes::from_static(b"PKCH")),
            Err(Error::InvalidChunk(_))
        ));
    }

    #[test]
    fn future_version_is_rejected() {
        let mut data = build_chunk(0..5, Compression::Lz4);
        // Patch the version field (bytes 4..6) and recompute the checksum so
        // version handling is tested, not CRC handling.
        data[4..6].copy_from_slice(&9u16.to_be_bytes());
        let crc_pos = data.len() - 8;
        let crc = crc32fast::hash(&data[..crc_pos]);
        let mut patched = data[..crc_pos].to_vec();
        patched.put_u32(crc);
        patched.extend_from_slice(&CHUNK_MAGIC);

        assert!(matches!(
            ChunkReader::new(Bytes::from(patched)),
            Err(Error::UnsupportedVersion(9))
        ));
    }

    #[test]
    fn record_count_mismatch_is_detected() {
        let mut data = build_chunk(0..5, Compression::Lz4);
        // Lie about the record count in the footer, fixing up the CRC so the
        // structural check is what fires.
        let footer_start = data.len() - packhouse_core::chunk::FOOTER_SIZE;
        data[footer_start..footer_start + 4].copy_from_slice(&99u32.to_be_bytes());
        let crc_pos = data.len() - 8;
        let crc = crc32fast::hash(&data[..crc_pos]);
        let mut patched = data[..crc_pos].to_vec();
        patched.put_u32(crc);
        patched.extend_from_slice(&CHUNK_MAGIC);

        let reader = ChunkReader::new(Bytes::from(patched)).unwrap();
        assert!(matches!(reader.records(), Err(Error::InvalidChunk(_))));
    }

    #[test]
    fn large_payloads_survive_compression() {
        let mut writer = ChunkWriter::new(Compression::Lz4);
        let big = "x".repeat(64 * 1024);
        for offset in 0..8 {
            let record = RecordContext::new(offset, 0, json!({ "blob": big }));
            writer.append(&record).unwrap();
        }
        let (bytes, summary) = writer.finish().unwrap();

        // Highly repetitive payloads should compress well below raw size.
        assert!(summary.bytes_written < (8 * 64 * 1024) as u64);

        let reader = ChunkReader::new(Bytes::from(bytes)).unwrap();
        let records = reader.records().unwrap();
        assert_eq!(records.len(), 8);
        assert_eq!(records[3].payload["blob"].as_str().unwrap().len(), 64 * 1024);
    }
}
