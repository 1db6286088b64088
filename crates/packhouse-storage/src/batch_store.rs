//! Batch Store - Chunked Batch Persistence over Object Storage
//!
//! `BatchStore` maps batches onto an object store namespace:
//!
//! ```text
//! data/{batch_id}/0.phc              committed chunk, records 0..=N
//! data/{batch_id}/1400.phc           committed chunk, records 1400..=M
//! data/{batch_id}/inflight-2913.phc  upload in progress, invisible to readers
//! ```
//!
//! ## Write Path
//!
//! One `write_batch` call consumes one ordered stream of record groups and
//! produces **one** new chunk named by the first record's offset. Bytes are
//! piped into a multipart upload as blocks seal, so memory stays bounded no
//! matter how much a session sends. The upload happens under the
//! `inflight-` name; the rename to the final name is the commit point.
//!
//! ## Read Path
//!
//! `read_batch` lists the namespace once, parses start offsets out of the
//! object names into a sorted table, and hands back a lazy sequence of
//! chunk readers. Seeking to an offset only decides *where the sequence
//! starts*; no chunk before the selected one is ever fetched. The first
//! yielded chunk can still contain records below the requested offset, and
//! the caller filters those record-by-record.

use std::sync::Arc;

use futures::{Stream, StreamExt, TryStreamExt};
use object_store::path::Path;
use object_store::{ObjectStore, WriteMultipart};
use tracing::{debug, warn};

use packhouse_core::chunk::Compression;
use packhouse_core::RecordContext;

use crate::chunk::{
    chunk_object_name, parse_chunk_start_offset, ChunkReader, ChunkSummary, ChunkWriter,
    INFLIGHT_PREFIX,
};
use crate::{Error, Result};

/// Buffered multipart parts allowed in flight per chunk upload.
const UPLOAD_CONCURRENCY: usize = 8;

/// Chunked batch persistence over a pluggable object store.
#[derive(Clone)]
pub struct BatchStore {
    store: Arc<dyn ObjectStore>,
    compression: Compression,
}

/// One chunk upload in progress.
struct OpenChunk {
    writer: ChunkWriter,
    upload: WriteMultipart,
    inflight: Path,
    committed: Path,
}

impl BatchStore {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self {
            store,
            compression: Compression::Lz4,
        }
    }

    pub fn with_compression(mut self, compression: Compression) -> Self {
        self.compression = compression;
        self
    }

    fn batch_prefix(batch_id: i64) -> Path {
        Path::from(format!("data/{batch_id}"))
    }

    /// Persist one ordered stream of record groups as one new chunk.
    ///
    /// Returns `None` when the stream carried no records at all (nothing is
    /// written). Otherwise the chunk is committed and its summary returned;
    /// on any failure the in-progress object is abandoned and the batch's
    /// committed chunks are untouched.
    pub async fn write_batch(
        &self,
        batch_id: i64,
        mut groups: impl Stream<Item = Vec<RecordContext>> + Send + Unpin,
    ) -> Result<Option<ChunkSummary>> {
        let mut open: Option<OpenChunk> = None;

        let outcome = self.pump_groups(batch_id, &mut groups, &mut open).await;

        match (outcome, open) {
            (Ok(()), None) => Ok(None),
            (Ok(()), Some(chunk)) => self.finalize_chunk(batch_id, chunk).await.map(Some),
            (Err(err), None) => Err(err),
            (Err(err), Some(chunk)) => {
                self.abandon_chunk(chunk).await;
                Err(err)
            }
        }
    }

    async fn pump_groups(
        &self,
        batch_id: i64,
        groups: &mut (impl Stream<Item = Vec<RecordContext>> + Send + Unpin),
        open: &mut Option<OpenChunk>,
    ) -> Result<()> {
        while let Some(group) = groups.next().await {
            for record in group {
                if open.is_none() {
                    *open = Some(self.open_chunk(batch_id, record.offset).await?);
                }
                if let Some(chunk) = open.as_mut() {
                    chunk.writer.append(&record)?;
                    if let Some(bytes) = chunk.writer.take_pending() {
                        chunk
                            .upload
                            .wait_for_capacity(UPLOAD_CONCURRENCY)
                            .await?;
                        chunk.upload.write(&bytes);
                    }
                }
            }
        }
        Ok(())
    }

    async fn open_chunk(&self, batch_id: i64, start_offset: u64) -> Result<OpenChunk> {
        let name = chunk_object_name(start_offset);
        let prefix = Self::batch_prefix(batch_id);
        let committed = prefix.child(name.as_str());
        let inflight = prefix.child(format!("{INFLIGHT_PREFIX}{name}"));

        let multipart = self.store.put_multipart(&inflight).await?;
        debug!(batch_id, start_offset, "opened chunk upload");

        Ok(OpenChunk {
            writer: ChunkWriter::new(self.compression),
            upload: WriteMultipart::new(multipart),
            inflight,
            committed,
        })
    }

    async fn finalize_chunk(&self, batch_id: i64, chunk: OpenChunk) -> Result<ChunkSummary> {
        let OpenChunk {
            writer,
            mut upload,
            inflight,
            committed,
        } = chunk;

        let (tail, summary) = match writer.finish() {
            Ok(finished) => finished,
            Err(err) => {
                self.abort_upload(upload).await;
                self.discard_inflight(&inflight).await;
                return Err(err.into());
            }
        };
        upload.write(&tail);

        if let Err(err) = upload.finish().await {
            self.discard_inflight(&inflight).await;
            return Err(Error::ChunkUpload(err.to_string()));
        }

        // The rename is the commit point: until it happens the chunk keeps
        // its in-progress name and no reader will list it.
        if let Err(err) = self.store.rename(&inflight, &committed).await {
            self.discard_inflight(&inflight).await;
            return Err(err.into());
        }

        debug!(
            batch_id,
            start_offset = summary.start_offset,
            end_offset = summary.end_offset,
            records = summary.record_count,
            bytes = summary.bytes_written,
            "committed chunk"
        );
        Ok(summary)
    }

    async fn abandon_chunk(&self, chunk: OpenChunk) {
        // Abort tears down the backend's multipart state; the delete covers
        // backends that already materialized the in-progress object.
        let OpenChunk {
            upload, inflight, ..
        } = chunk;
        self.abort_upload(upload).await;
        self.discard_inflight(&inflight).await;
    }

    async fn abort_upload(&self, upload: WriteMultipart) {
        if let Err(err) = upload.abort().await {
            warn!(%err, "failed to abort in-progress chunk upload");
        }
    }

    async fn discard_inflight(&self, inflight: &Path) {
        match self.store.delete(inflight).await {
            Ok(()) | Err(object_store::Error::NotFound { .. }) => {}
            Err(err) => warn!(%inflight, %err, "failed to remove in-progress chunk"),
        }
    }

    /// List a batch's chunks and return a lazy reader sequence.
    ///
    /// With `from_offset = Some(o)` the sequence starts at the last chunk
    /// whose start offset is at or below `o`, so a record at `o` is always
    /// reachable even when it sits in the middle of a chunk. Chunks wholly
    /// before the start are listed but never fetched.
    pub async fn read_batch(
        &self,
        batch_id: i64,
        from_offset: Option<u64>,
    ) -> Result<ChunkSequence> {
        let prefix = Self::batch_prefix(batch_id);
        let metas: Vec<_> = self.store.list(Some(&prefix)).try_collect().await?;

        let mut entries = Vec::with_capacity(metas.len());
        for meta in metas {
            let Some(name) = meta.location.filename() else {
                continue;
            };
            if name.starts_with(INFLIGHT_PREFIX) {
                debug!(batch_id, name, "skipping in-progress chunk");
                continue;
            }
            match parse_chunk_start_offset(name) {
                Some(start_offset) => entries.push(ChunkEntry {
                    start_offset,
                    location: meta.location,
                }),
                None => {
                    warn!(batch_id, name, "skipping unrecognized object in batch namespace");
                }
            }
        }
        entries.sort_by_key(|entry| entry.start_offset);

        let first = match from_offset {
            Some(offset) => entries
                .partition_point(|entry| entry.start_offset <= offset)
                .saturating_sub(1),
            None => 0,
        };

        Ok(ChunkSequence {
            store: Arc::clone(&self.store),
            entries,
            next: first,
        })
    }

    /// Delete every object under a batch's namespace.
    ///
    /// Returns how many objects went away; deleting a batch that has no
    /// data (or was already deleted) is a successful no-op.
    pub async fn delete_batch(&self, batch_id: i64) -> Result<usize> {
        let prefix = Self::batch_prefix(batch_id);
        let metas: Vec<_> = self.store.list(Some(&prefix)).try_collect().await?;

        let mut deleted = 0;
        for meta in metas {
            match self.store.delete(&meta.location).await {
                Ok(()) => deleted += 1,
                Err(object_store::Error::NotFound { .. }) => {}
                Err(err) => return Err(err.into()),
            }
        }

        if deleted > 0 {
            debug!(batch_id, deleted, "deleted batch data");
        }
        Ok(deleted)
    }
}

/// One committed chunk, as discovered by listing a batch namespace.
#[derive(Debug, Clone)]
pub struct ChunkEntry {
    /// Offset of the chunk's first record, parsed out of its name
    pub start_offset: u64,

    /// Full object path of the chunk
    pub location: Path,
}

/// Lazy, forward-only sequence of chunk readers for one batch.
///
/// Built fresh by every `read_batch` call, so a caller can restart a read
/// at a new offset just by asking again.
pub struct ChunkSequence {
    store: Arc<dyn ObjectStore>,
    entries: Vec<ChunkEntry>,
    next: usize,
}

impl ChunkSequence {
    /// Every committed chunk of the batch, sorted by start offset,
    /// including any before the sequence's starting position.
    pub fn entries(&self) -> &[ChunkEntry] {
        &self.entries
    }

    /// Chunks not yet yielded.
    pub fn remaining(&self) -> usize {
        self.entries.len() - self.next
    }

    /// Fetch and validate the next chunk, or `None` at the end.
    pub async fn next_chunk(&mut self) -> Result<Option<ChunkReader>> {
        let Some(entry) = self.entries.get(self.next) else {
            return Ok(None);
        };
        self.next += 1;

        let bytes = self.store.get(&entry.location).await?.bytes().await?;
        Ok(Some(ChunkReader::new(bytes)?))
    }
}
