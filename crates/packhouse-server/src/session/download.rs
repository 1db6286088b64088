//! Download session
//!
//! Each opened fetch channel gets a pump task that walks the batch's
//! chunks and pushes bounded DATA groups to the client. Flow control is
//! stop-and-wait: exactly one DATA message is ever unacknowledged, so a
//! slow reader holds back the pump instead of filling the outbound
//! queue. Downloads take no lock; committed chunks are immutable and a
//! concurrent upload only ever adds chunks this listing never saw.
//!
//! The router talks to the pump over a small event channel. Closing that
//! channel (or aborting the task) is the silent-teardown path used on
//! disconnect.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use uuid::Uuid;

use packhouse_core::{BatchRef, RecordContext};
use packhouse_metadata::Permission;
use packhouse_storage::BatchingTransform;
use packhouse_wire::{ErrorCode, ServerMessage};

use crate::error::SessionError;
use crate::server::ServerState;

/// Control events buffered between the router and one pump.
const EVENT_DEPTH: usize = 8;

/// Control events routed to a pump by channel name.
#[derive(Debug)]
pub enum DownloadEvent {
    /// Begin streaming from `offset`; acknowledged under `request_id`.
    Start { request_id: u64, offset: u64 },
    /// The in-flight DATA message was consumed.
    Ack,
    /// Client-requested stop; the pump exits without a completion push.
    Stop,
}

/// How one delivery round ended.
enum Delivery {
    /// The client acknowledged; keep streaming.
    Acked,
    /// Stop event, closed channel, or dead connection; go silent.
    Interrupted,
}

/// Router-side handle to one fetch channel's pump.
#[derive(Debug)]
pub struct DownloadSession {
    events: mpsc::Sender<DownloadEvent>,
    task: JoinHandle<()>,
}

impl DownloadSession {
    /// Validate a fetch target and spawn its pump.
    ///
    /// Returns the allocated channel name along with the handle. The
    /// pump idles until a `Start` event arrives.
    pub async fn open(
        state: Arc<ServerState>,
        username: &str,
        batch: BatchRef,
        outbound: mpsc::Sender<ServerMessage>,
    ) -> Result<(String, Self), SessionError> {
        let allowed = state
            .permissions
            .has_permission(username, &batch.stream.package, Permission::View)
            .await
            .unwrap_or(false);
        if !allowed {
            return Err(SessionError::NotAuthorized);
        }

        let package = state
            .metadata
            .find_package(&batch.stream.package)
            .await?
            .ok_or_else(|| SessionError::NotFound(batch.stream.package.to_string()))?;
        let record = state
            .metadata
            .find_batch(package.id, &batch.stream, batch.batch_number)
            .await?
            .ok_or_else(|| SessionError::NotFound(batch.to_string()))?;

        let channel = format!("fetch/{}/{}", batch.batch_number, Uuid::new_v4());
        debug!(batch = %batch, channel, "fetch channel opened");

        let (events, event_queue) = mpsc::channel(EVENT_DEPTH);
        let task = tokio::spawn(run_pump(
            state,
            channel.clone(),
            record.id,
            outbound,
            event_queue,
        ));

        Ok((channel, Self { events, task }))
    }

    /// Forward one control event; `false` when the pump already exited.
    pub async fn send(&self, event: DownloadEvent) -> bool {
        self.events.send(event).await.is_ok()
    }

    /// Tear the pump down without any further messages to the client.
    pub fn abort(self) {
        self.task.abort();
    }
}

async fn run_pump(
    state: Arc<ServerState>,
    channel: String,
    batch_id: i64,
    outbound: mpsc::Sender<ServerMessage>,
    mut events: mpsc::Receiver<DownloadEvent>,
) {
    // Wait for START. Acks at this point have nothing in flight to
    // acknowledge and are dropped.
    let (request_id, offset) = loop {
        match events.recv().await {
            Some(DownloadEvent::Start { request_id, offset }) => break (request_id, offset),
            Some(DownloadEvent::Ack) => {}
            Some(DownloadEvent::Stop) | None => return,
        }
    };

    if outbound.send(ServerMessage::Ack { request_id }).await.is_err() {
        return;
    }

    match stream_chunks(&state, &channel, batch_id, offset, &outbound, &mut events).await {
        Ok(Delivery::Interrupted) => return,
        Ok(Delivery::Acked) => {
            debug!(channel, batch_id, "download complete");
        }
        Err(err) => {
            warn!(channel, batch_id, error = %err, "download failed");
            let _ = outbound
                .send(ServerMessage::channel_error(
                    channel.as_str(),
                    ErrorCode::ServerError,
                    err.to_string(),
                ))
                .await;
        }
    }

    // Completion (and failure) both end with the STOP push.
    let _ = outbound.send(ServerMessage::Stop { channel }).await;
}

/// Walk the chunk sequence from `offset`, regrouping across chunk
/// boundaries and delivering one group at a time.
async fn stream_chunks(
    state: &ServerState,
    channel: &str,
    batch_id: i64,
    offset: u64,
    outbound: &mpsc::Sender<ServerMessage>,
    events: &mut mpsc::Receiver<DownloadEvent>,
) -> Result<Delivery, packhouse_storage::Error> {
    let mut sequence = state.batches.read_batch(batch_id, Some(offset)).await?;
    let mut transform = BatchingTransform::default();
    let mut first = true;

    while let Some(chunk) = sequence.next_chunk().await? {
        let mut records = chunk.records()?;
        if first {
            // Seeking lands on the chunk containing the offset; records
            // before it inside that chunk are dropped one by one.
            records.retain(|record| record.offset >= offset);
            first = false;
        }
        for group in transform.push(records) {
            if let Delivery::Interrupted = deliver(channel, group, outbound, events).await {
                return Ok(Delivery::Interrupted);
            }
        }
    }

    if let Some(tail) = transform.flush() {
        if let Delivery::Interrupted = deliver(channel, tail, outbound, events).await {
            return Ok(Delivery::Interrupted);
        }
    }

    Ok(Delivery::Acked)
}

/// Push one DATA message and pause until the client acknowledges it.
///
/// Acks queued up while nothing was in flight are discarded first, so a
/// client can never accumulate delivery credit.
async fn deliver(
    channel: &str,
    records: Vec<RecordContext>,
    outbound: &mpsc::Sender<ServerMessage>,
    events: &mut mpsc::Receiver<DownloadEvent>,
) -> Delivery {
    loop {
        match events.try_recv() {
            Ok(DownloadEvent::Ack) => {}
            Ok(DownloadEvent::Start { request_id, .. }) => {
                reject_restart(request_id, outbound).await;
            }
            Ok(DownloadEvent::Stop) => return Delivery::Interrupted,
            Err(mpsc::error::TryRecvError::Empty) => break,
            Err(mpsc::error::TryRecvError::Disconnected) => return Delivery::Interrupted,
        }
    }

    let message = ServerMessage::Data {
        channel: channel.to_string(),
        records,
    };
    if outbound.send(message).await.is_err() {
        return Delivery::Interrupted;
    }

    loop {
        match events.recv().await {
            Some(DownloadEvent::Ack) => return Delivery::Acked,
            Some(DownloadEvent::Start { request_id, .. }) => {
                reject_restart(request_id, outbound).await;
            }
            Some(DownloadEvent::Stop) | None => return Delivery::Interrupted,
        }
    }
}

async fn reject_restart(request_id: u64, outbound: &mpsc::Sender<ServerMessage>) {
    let _ = outbound
        .send(ServerMessage::request_error(
            request_id,
            ErrorCode::ServerError,
            "channel already started",
        ))
        .await;
}
