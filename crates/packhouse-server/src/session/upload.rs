//! Upload session
//!
//! One upload session writes one chunk into one batch. The session is
//! exclusive per logical stream: the distributed lock is taken before any
//! batch row is touched and held (renewed on every data message) until
//! the session ends, however it ends.
//!
//! ## Lifecycle
//!
//! ```text
//! START_UPLOAD ──▶ permission ──▶ lock ──▶ resolve batch ──▶ Active
//!                 (fail closed)  (bounded   (reuse latest or
//!                                 retries)   create next number)
//!
//! Active: UPLOAD_DATA* ──▶ stamp offsets ──▶ regroup ──▶ ingest pipe
//!                                                            │
//!                                            writer task ◀───┘
//!                                            (chunk upload, tail update)
//!
//! UPLOAD_STOP / disconnect ──▶ flush, close pipe, join writer,
//!                              release lock
//! ```
//!
//! The ingest pipe is a small bounded channel. The router only acks an
//! UPLOAD_DATA after its groups entered the pipe, so a client that waits
//! for acks can never get more than the pipe depth ahead of the chunk
//! upload.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{info, warn};

use packhouse_core::{BatchRef, RecordContext, StreamPath};
use packhouse_metadata::{upload_lock_key, BatchRecord, LockLease, Permission};
use packhouse_storage::{BatchingTransform, ChunkSummary};

use crate::error::SessionError;
use crate::server::ServerState;

/// Record groups buffered between the session and its writer task.
const PIPE_DEPTH: usize = 4;

/// An established upload session, `Active` until finished.
pub struct UploadSession {
    state: Arc<ServerState>,
    batch: BatchRef,
    lease: Option<LockLease>,
    pipe: Option<mpsc::Sender<Vec<RecordContext>>>,
    writer: Option<JoinHandle<Result<Option<ChunkSummary>, SessionError>>>,
    transform: BatchingTransform<RecordContext>,
    next_offset: u64,
}

impl std::fmt::Debug for UploadSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UploadSession")
            .field("batch", &self.batch)
            .field("next_offset", &self.next_offset)
            .finish_non_exhaustive()
    }
}

impl UploadSession {
    /// Run the establishment sequence: permission, lock, batch
    /// resolution, ingest pipe.
    ///
    /// On errors after the lock was taken, the lock is released before
    /// returning.
    pub async fn start(
        state: Arc<ServerState>,
        username: &str,
        stream: StreamPath,
        new_batch: bool,
    ) -> Result<Self, SessionError> {
        let allowed = state
            .permissions
            .has_permission(username, &stream.package, Permission::Edit)
            .await
            .unwrap_or(false);
        if !allowed {
            return Err(SessionError::NotAuthorized);
        }

        let key = upload_lock_key(&stream);
        let lease = state
            .lock
            .acquire(&key, state.config.lock_attempts)
            .await?
            .ok_or(SessionError::StreamLocked)?;

        let record = match resolve_batch(&state, &stream, new_batch, username).await {
            Ok(record) => record,
            Err(err) => {
                if let Err(release_err) = state.lock.release(&lease).await {
                    warn!(key = lease.key(), error = %release_err, "failed to release lock");
                }
                return Err(err);
            }
        };

        let next_offset = record.next_offset();
        let batch = record.batch_ref(&stream.package);
        info!(stream = %stream, batch = batch.batch_number, next_offset, "upload session established");

        let (pipe, groups) = mpsc::channel(PIPE_DEPTH);
        let writer = spawn_writer(state.clone(), record.id, groups);

        Ok(Self {
            state,
            batch,
            lease: Some(lease),
            pipe: Some(pipe),
            writer: Some(writer),
            transform: BatchingTransform::default(),
            next_offset,
        })
    }

    /// The batch this session appends to.
    pub fn batch(&self) -> &BatchRef {
        &self.batch
    }

    /// Ingest one UPLOAD_DATA payload array.
    ///
    /// Offsets are assigned in arrival order and every record gets the
    /// same receipt timestamp. Completed groups go into the pipe; this
    /// suspends on a full pipe, which is what delays the ack the client
    /// is waiting on. An empty array still renews the lock.
    pub async fn handle_data(&mut self, payloads: Vec<serde_json::Value>) -> Result<(), SessionError> {
        let received_at = chrono::Utc::now().timestamp_millis();

        let mut records = Vec::with_capacity(payloads.len());
        for payload in payloads {
            records.push(RecordContext::new(self.next_offset, received_at, payload));
            self.next_offset += 1;
        }

        for group in self.transform.push(records) {
            self.send_group(group).await?;
        }

        self.renew_lock().await
    }

    /// Close the ingest pipe, wait for the chunk to commit, and release
    /// the stream lock.
    ///
    /// Used for graceful stops, forced stops, and disconnects alike; the
    /// lock is released no matter what the writer reports. Returns the
    /// committed chunk's summary, or `None` when the session never
    /// carried a record.
    pub async fn finish(mut self) -> Result<Option<ChunkSummary>, SessionError> {
        let flushed = match self.transform.flush() {
            Some(tail) => self.send_group(tail).await,
            None => Ok(()),
        };

        self.pipe = None;
        let written = self.join_writer().await;
        self.release_lock().await;

        flushed?;
        written
    }

    async fn send_group(&mut self, group: Vec<RecordContext>) -> Result<(), SessionError> {
        let Some(pipe) = self.pipe.as_ref() else {
            return Err(SessionError::Internal("ingest pipe already closed".to_string()));
        };
        if pipe.send(group).await.is_err() {
            // The writer dropped its receiver, so it stopped early;
            // surface why.
            self.pipe = None;
            return Err(self.writer_failure().await);
        }
        Ok(())
    }

    async fn writer_failure(&mut self) -> SessionError {
        match self.join_writer().await {
            Ok(_) => SessionError::Internal("batch writer stopped unexpectedly".to_string()),
            Err(err) => err,
        }
    }

    async fn join_writer(&mut self) -> Result<Option<ChunkSummary>, SessionError> {
        let Some(writer) = self.writer.take() else {
            return Ok(None);
        };
        match writer.await {
            Ok(result) => result,
            Err(join_err) => Err(SessionError::Internal(format!(
                "batch writer panicked: {join_err}"
            ))),
        }
    }

    async fn renew_lock(&self) -> Result<(), SessionError> {
        let Some(lease) = self.lease.as_ref() else {
            return Ok(());
        };
        match self.state.lock.renew(lease).await {
            Ok(true) => Ok(()),
            Ok(false) => Err(SessionError::StreamLocked),
            Err(err) => Err(err.into()),
        }
    }

    async fn release_lock(&mut self) {
        let Some(lease) = self.lease.take() else {
            return;
        };
        if let Err(err) = self.state.lock.release(&lease).await {
            warn!(key = lease.key(), error = %err, "failed to release upload lock");
        }
    }
}

/// Pick the batch the session appends to.
///
/// A fresh batch is created when the client asked for one or when the
/// stream has none yet; otherwise the latest batch continues.
async fn resolve_batch(
    state: &ServerState,
    stream: &StreamPath,
    new_batch: bool,
    author: &str,
) -> Result<BatchRecord, SessionError> {
    let package = state
        .metadata
        .find_package(&stream.package)
        .await?
        .ok_or_else(|| SessionError::NotFound(stream.package.to_string()))?;

    let existing = if new_batch {
        None
    } else {
        state.metadata.latest_batch(package.id, stream).await?
    };

    let record = match existing {
        Some(batch) => batch,
        None => {
            state
                .metadata
                .create_batch(package.id, stream, author)
                .await?
        }
    };
    Ok(record)
}

fn spawn_writer(
    state: Arc<ServerState>,
    batch_id: i64,
    groups: mpsc::Receiver<Vec<RecordContext>>,
) -> JoinHandle<Result<Option<ChunkSummary>, SessionError>> {
    tokio::spawn(async move {
        let summary = state
            .batches
            .write_batch(batch_id, ReceiverStream::new(groups))
            .await?;
        if let Some(summary) = &summary {
            state
                .metadata
                .update_batch_tail(batch_id, summary.end_offset)
                .await?;
        }
        Ok(summary)
    })
}
