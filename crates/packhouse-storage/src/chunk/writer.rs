//! Chunk Writer - Incremental Encoding and Compression
//!
//! `ChunkWriter` turns an ordered run of records into chunk-format bytes.
//! It is a plain synchronous encoder: records go in through `append`,
//! finished bytes come out through `take_pending`, and `finish` seals the
//! footer. The async upload plumbing in `BatchStore` drains `take_pending`
//! into a multipart upload as blocks fill, so a chunk of any size streams
//! out with bounded memory.
//!
//! ## Usage
//!
//! ```ignore
//! let mut writer = ChunkWriter::new(Compression::Lz4);
//!
//! for record in records {
//!     writer.append(&record)?;
//!     if let Some(bytes) = writer.take_pending() {
//!         upload.write(&bytes); // ship a sealed block
//!     }
//! }
//!
//! let (tail, summary) = writer.finish()?;
//! upload.write(&tail); // last block + footer
//! ```
//!
//! ## Invariants Enforced Here
//!
//! - Offsets must be strictly increasing within a chunk
//! - A chunk holds at least one record (`finish` on an empty writer fails)
//! - A record frame is never split across blocks

use bytes::BufMut;
use crc32fast::Hasher;
use packhouse_core::chunk::{
    Compression, BLOCK_SIZE_TARGET, CHUNK_MAGIC, CHUNK_VERSION,
};
use packhouse_core::{Error, RecordContext, Result};

/// What a finished chunk contained, reported back to the caller so it can
/// update batch metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkSummary {
    /// Offset of the first record in the chunk
    pub start_offset: u64,

    /// Offset of the last record in the chunk (inclusive)
    pub end_offset: u64,

    /// Number of records in the chunk
    pub record_count: u32,

    /// Total encoded size of the chunk object
    pub bytes_written: u64,
}

/// Incremental encoder for a single chunk.
pub struct ChunkWriter {
    compression: Compression,
    block_target: usize,

    /// Offset of the first record, set on first append
    base_offset: Option<u64>,

    /// Offset of the most recent record
    last_offset: Option<u64>,

    record_count: u32,

    /// Uncompressed frames of the block currently being filled
    block: Vec<u8>,

    /// Encoded bytes ready to leave the writer (header + sealed blocks)
    pending: Vec<u8>,

    /// Rolling checksum over every byte emitted so far
    hasher: Hasher,

    /// Total bytes emitted into `pending` over the writer's lifetime
    bytes_written: u64,
}

impl ChunkWriter {
    pub fn new(compression: Compression) -> Self {
        Self::with_block_target(compression, BLOCK_SIZE_TARGET)
    }

    /// A writer with a non-default block size target. Smaller targets force
    /// more blocks, which tests use to exercise multi-block chunks cheaply.
    pub fn with_block_target(compression: Compression, block_target: usize) -> Self {
        Self {
            compression,
            block_target: block_target.max(1),
            base_offset: None,
            last_offset: None,
            record_count: 0,
            block: Vec::new(),
            pending: Vec::new(),
            hasher: Hasher::new(),
            bytes_written: 0,
        }
    }

    /// Append one record to the chunk.
    ///
    /// The first append fixes the chunk's base offset and emits the header.
    /// Offsets must be strictly increasing; a regression means the caller's
    /// offset accounting is broken and the chunk would be unreadable.
    pub fn append(&mut self, record: &RecordContext) -> Result<()> {
        if let Some(last) = self.last_offset {
            if record.offset <= last {
                return Err(Error::InvalidChunk(format!(
                    "offset {} does not advance past {}",
                    record.offset, last
                )));
            }
        }

        if self.base_offset.is_none() {
            self.base_offset = Some(record.offset);
            self.emit_header(record.offset);
        }

        let frame = rmp_serde::to_vec(record).map_err(|e| Error::Encode(e.to_string()))?;
        self.block.put_u32(frame.len() as u32);
        self.block.extend_from_slice(&frame);

        self.last_offset = Some(record.offset);
        self.record_count += 1;

        if self.block.len() >= self.block_target {
            self.seal_block();
        }

        Ok(())
    }

    /// Drain any bytes that are ready to be shipped (the header and all
    /// sealed blocks). Returns `None` when nothing new is ready.
    pub fn take_pending(&mut self) -> Option<Vec<u8>> {
        if self.pending.is_empty() {
            None
        } else {
            Some(std::mem::take(&mut self.pending))
        }
    }

    /// Number of records appended so far.
    pub fn record_count(&self) -> u32 {
        self.record_count
    }

    /// Seal the chunk: flush the in-progress block, write the footer, and
    /// return the remaining bytes plus a summary of the whole chunk.
    pub fn finish(mut self) -> Result<(Vec<u8>, ChunkSummary)> {
        let (Some(start_offset), Some(end_offset)) = (self.base_offset, self.last_offset) else {
            return Err(Error::InvalidChunk(
                "cannot finish a chunk with no records".to_string(),
            ));
        };

        self.seal_block();

        // Footer: record count and end offset are covered by the CRC,
        // the CRC itself and the trailing magic are not.
        let mut footer = Vec::with_capacity(12);
        footer.put_u32(self.record_count);
        footer.put_u64(end_offset);
        self.hasher.update(&footer);
        let crc = self.hasher.finalize();
        footer.put_u32(crc);
        footer.extend_from_slice(&CHUNK_MAGIC);

        self.pending.extend_from_slice(&footer);
        self.bytes_written += footer.len() as u64;

        let summary = ChunkSummary {
            start_offset,
            end_offset,
            record_count: self.record_count,
            bytes_written: self.bytes_written,
        };

        Ok((self.pending, summary))
    }

    fn emit_header(&mut self, base_offset: u64) {
        let mut header = Vec::with_capacity(16);
        header.extend_from_slice(&CHUNK_MAGIC);
        header.put_u16(CHUNK_VERSION);
        header.put_u16(self.compression as u16);
        header.put_u64(base_offset);

        self.hasher.update(&header);
        self.bytes_written += header.len() as u64;
        self.pending.extend_from_slice(&header);
    }

    fn seal_block(&mut self) {
        if self.block.is_empty() {
            return;
        }

        let raw = std::mem::take(&mut self.block);
        let payload = match self.compression {
            Compression::Lz4 => lz4_flex::compress_prepend_size(&raw),
            Compression::None => raw,
        };

        let mut framed = Vec::with_capacity(payload.len() + 4);
        framed.put_u32(payload.len() as u32);
        framed.extend_from_slice(&payload);

        self.hasher.update(&framed);
        self.bytes_written += framed.len() as u64;
        self.pending.extend_from_slice(&framed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use packhouse_core::chunk::{FOOTER_SIZE, HEADER_SIZE};
    use serde_json::json;

    fn rec(offset: u64) -> RecordContext {
        RecordContext::new(offset, 1_700_000_000_000, json!({ "n": offset }))
    }

    #[test]
    fn empty_writer_cannot_finish() {
        let writer = ChunkWriter::new(Compression::Lz4);
        assert!(matches!(
            writer.finish(),
            Err(Error::InvalidChunk(_))
        ));
    }

    #[test]
    fn offsets_must_strictly_increase() {
        let mut writer = ChunkWriter::new(Compression::Lz4);
        writer.append(&rec(5)).unwrap();
        writer.append(&rec(6)).unwrap();

        assert!(matches!(writer.append(&rec(6)), Err(Error::InvalidChunk(_))));
        assert!(matches!(writer.append(&rec(2)), Err(Error::InvalidChunk(_))));
    }

    #[test]
    fn summary_reports_offset_range_and_count() {
        let mut writer = ChunkWriter::new(Compression::Lz4);
        for offset in 10..20 {
            writer.append(&rec(offset)).unwrap();
        }
        let (tail, summary) = writer.finish().unwrap();

        assert_eq!(summary.start_offset, 10);
        assert_eq!(summary.end_offset, 19);
        assert_eq!(summary.record_count, 10);
        assert_eq!(summary.bytes_written, tail.len() as u64);
        assert!(tail.len() >= HEADER_SIZE + FOOTER_SIZE);
    }

    #[test]
    fn nothing_pending_before_first_append() {
        let mut writer = ChunkWriter::new(Compression::Lz4);
        assert!(writer.take_pending().is_none());
    }

    #[test]
    fn header_is_pending_after_first_append() {
        let mut writer = ChunkWriter::new(Compression::Lz4);
        writer.append(&rec(0)).unwrap();

        let pending = writer.take_pending().expect("header should be ready");
        assert_eq!(&pending[..4], &CHUNK_MAGIC);
        // Block not sealed yet, so only the header is ready.
        assert_eq!(pending.len(), HEADER_SIZE);
        assert!(writer.take_pending().is_none());
    }

    #[test]
    fn small_block_target_seals_blocks_incrementally() {
        let mut writer = ChunkWriter::with_block_target(Compression::Lz4, 64);
        let mut shipped = Vec::new();

        for offset in 0..50 {
            writer.append(&rec(offset)).unwrap();
            if let Some(bytes) = writer.take_pending() {
                shipped.push(bytes);
            }
        }

        // With a 64-byte target every record seals a block, so bytes left
        // the writer long before finish.
        assert!(shipped.len() > 1);

        let (tail, summary) = writer.finish().unwrap();
        assert_eq!(summary.record_count, 50);

        let total: usize = shipped.iter().map(Vec::len).sum::<usize>() + tail.len();
        assert_eq!(summary.bytes_written, total as u64);
    }

    #[test]
    fn incremental_and_one_shot_encodings_match() {
        let records: Vec<_> = (0..30).map(rec).collect();

        // Drained after every append.
        let mut incremental = ChunkWriter::with_block_target(Compression::Lz4, 128);
        let mut drained = Vec::new();
        for record in &records {
            incremental.append(record).unwrap();
            if let Some(bytes) = incremental.take_pending() {
                drained.extend_from_slice(&bytes);
            }
        }
        let (tail, _) = incremental.finish().unwrap();
        drained.extend_from_slice(&tail);

        // Never drained until finish.
        let mut one_shot = ChunkWriter::with_block_target(Compression::Lz4, 128);
        for record in &records {
            one_shot.append(record).unwrap();
        }
        let (whole, _) = one_shot.finish().unwrap();

        assert_eq!(drained, whole);
    }
}
