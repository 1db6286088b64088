//! Connection router
//!
//! One task per connection reads frames in order and dispatches them:
//! top-level requests go to the upload session or the activation
//! handler, channel-scoped messages route by channel name to download
//! pumps. All outbound traffic funnels through a single writer task, so
//! pumps and the dispatcher can interleave messages without tearing
//! frames.
//!
//! A session failure is answered on its own `request_id` or channel and
//! never takes the connection down. The connection goes down on frame
//! errors or EOF, and teardown then stops every live session exactly
//! once: the upload finalizes and frees its lock, pumps are aborted.

use std::collections::HashMap;
use std::sync::Arc;

use futures::{SinkExt, Stream, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio_util::codec::Framed;
use tracing::{debug, info, warn};

use packhouse_core::{BatchRef, StreamPath};
use packhouse_wire::{ClientMessage, ErrorCode, ServerCodec, ServerMessage, WireError};

use crate::server::ServerState;
use crate::session::{activate, DownloadEvent, DownloadSession, UploadSession};

/// Outbound messages buffered between sessions and the socket writer.
const OUTBOUND_DEPTH: usize = 256;

/// Drive one client connection to completion.
///
/// Generic over the transport so tests can run it over
/// `tokio::io::duplex` instead of TCP.
pub async fn run_connection<S>(stream: S, state: Arc<ServerState>) -> packhouse_wire::Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let framed = Framed::new(stream, ServerCodec::new());
    let (mut sink, mut inbound) = framed.split();

    let (outbound, mut queue) = mpsc::channel::<ServerMessage>(OUTBOUND_DEPTH);
    let writer = tokio::spawn(async move {
        while let Some(message) = queue.recv().await {
            if let Err(err) = sink.send(message).await {
                debug!(error = %err, "outbound write failed");
                break;
            }
        }
    });

    let result = serve(&mut inbound, outbound, state).await;

    // All senders are gone once serve returns, so the writer drains the
    // queue and exits; waiting on it flushes any final error frames.
    writer.await.ok();
    result
}

/// Identify the client, then dispatch messages until the stream ends.
async fn serve<In>(
    inbound: &mut In,
    outbound: mpsc::Sender<ServerMessage>,
    state: Arc<ServerState>,
) -> packhouse_wire::Result<()>
where
    In: Stream<Item = Result<ClientMessage, WireError>> + Unpin,
{
    let username = match inbound.next().await {
        Some(Ok(ClientMessage::Hello { username })) => username,
        Some(Ok(_)) => {
            warn!("connection opened without HELLO");
            let _ = outbound
                .send(ServerMessage::error(
                    ErrorCode::NotAuthorized,
                    "first message must be HELLO",
                ))
                .await;
            return Ok(());
        }
        Some(Err(err)) => return Err(err),
        None => return Ok(()),
    };

    if outbound.send(ServerMessage::HelloAck).await.is_err() {
        return Ok(());
    }
    debug!(username, "connection identified");

    let mut connection = Connection {
        state,
        username,
        outbound,
        upload: None,
        downloads: HashMap::new(),
    };

    let result = loop {
        match inbound.next().await {
            Some(Ok(message)) => connection.dispatch(message).await,
            Some(Err(err)) => break Err(err),
            None => break Ok(()),
        }
    };

    connection.teardown().await;
    result
}

/// Everything the dispatcher tracks for one identified connection.
struct Connection {
    state: Arc<ServerState>,
    username: String,
    outbound: mpsc::Sender<ServerMessage>,
    upload: Option<UploadSession>,
    downloads: HashMap<String, DownloadSession>,
}

impl Connection {
    async fn dispatch(&mut self, message: ClientMessage) {
        match message {
            ClientMessage::Hello { .. } => {
                self.send(ServerMessage::error(
                    ErrorCode::ServerError,
                    "connection is already identified",
                ))
                .await;
            }
            ClientMessage::StartUpload {
                request_id,
                stream,
                new_batch,
            } => self.start_upload(request_id, stream, new_batch).await,
            ClientMessage::UploadData {
                request_id,
                records,
            } => self.upload_data(request_id, records).await,
            ClientMessage::UploadStop { request_id } => self.upload_stop(request_id).await,
            ClientMessage::OpenFetchChannel { request_id, batch } => {
                self.open_fetch_channel(request_id, batch).await
            }
            ClientMessage::Start {
                request_id,
                channel,
                offset,
            } => self.channel_start(request_id, channel, offset).await,
            ClientMessage::Ack { channel } => self.channel_ack(channel).await,
            ClientMessage::Stop {
                request_id,
                channel,
            } => self.channel_stop(request_id, channel).await,
            ClientMessage::SetActiveBatches {
                request_id,
                batches,
            } => self.set_active_batches(request_id, batches).await,
        }
    }

    /// A failed send means the connection is closing; inbound ends
    /// shortly after and teardown handles the rest.
    async fn send(&self, message: ServerMessage) {
        let _ = self.outbound.send(message).await;
    }

    async fn fail(&self, request_id: u64, err: &crate::error::SessionError) {
        self.send(ServerMessage::request_error(
            request_id,
            err.code(),
            err.to_string(),
        ))
        .await;
    }

    async fn start_upload(&mut self, request_id: u64, stream: StreamPath, new_batch: bool) {
        if self.upload.is_some() {
            self.send(ServerMessage::request_error(
                request_id,
                ErrorCode::ServerError,
                "an upload session is already active",
            ))
            .await;
            return;
        }

        match UploadSession::start(self.state.clone(), &self.username, stream, new_batch).await {
            Ok(session) => {
                let batch = session.batch().clone();
                info!(username = %self.username, batch = %batch, "upload started");
                self.upload = Some(session);
                self.send(ServerMessage::UploadStarted { request_id, batch })
                    .await;
            }
            Err(err) => self.fail(request_id, &err).await,
        }
    }

    async fn upload_data(&mut self, request_id: u64, records: Vec<serde_json::Value>) {
        let Some(session) = self.upload.as_mut() else {
            self.send(ServerMessage::request_error(
                request_id,
                ErrorCode::ServerError,
                "no active upload session",
            ))
            .await;
            return;
        };

        match session.handle_data(records).await {
            Ok(()) => self.send(ServerMessage::Ack { request_id }).await,
            Err(err) => {
                warn!(username = %self.username, error = %err, "upload failed, stopping session");
                self.send(ServerMessage::UploadStop).await;
                self.fail(request_id, &err).await;
                if let Some(session) = self.upload.take() {
                    if let Err(finish_err) = session.finish().await {
                        debug!(error = %finish_err, "failed upload session closed");
                    }
                }
            }
        }
    }

    async fn upload_stop(&mut self, request_id: u64) {
        let Some(session) = self.upload.take() else {
            self.send(ServerMessage::request_error(
                request_id,
                ErrorCode::ServerError,
                "no active upload session",
            ))
            .await;
            return;
        };

        let batch = session.batch().clone();
        match session.finish().await {
            Ok(summary) => {
                let records = summary.map_or(0, |s| s.record_count);
                info!(username = %self.username, batch = %batch, records, "upload stopped");
                self.send(ServerMessage::Ack { request_id }).await;
            }
            Err(err) => {
                warn!(batch = %batch, error = %err, "upload finalization failed");
                self.fail(request_id, &err).await;
            }
        }
    }

    async fn open_fetch_channel(&mut self, request_id: u64, batch: BatchRef) {
        let opened = DownloadSession::open(
            self.state.clone(),
            &self.username,
            batch,
            self.outbound.clone(),
        )
        .await;

        match opened {
            Ok((channel, session)) => {
                self.downloads.insert(channel.clone(), session);
                self.send(ServerMessage::FetchChannelOpened {
                    request_id,
                    channel,
                })
                .await;
            }
            Err(err) => self.fail(request_id, &err).await,
        }
    }

    async fn channel_start(&mut self, request_id: u64, channel: String, offset: u64) {
        let Some(session) = self.downloads.get(&channel) else {
            self.send(ServerMessage::request_error(
                request_id,
                ErrorCode::NotFound,
                format!("unknown channel {channel}"),
            ))
            .await;
            return;
        };

        if !session.send(DownloadEvent::Start { request_id, offset }).await {
            // The pump already finished; the channel is spent.
            self.downloads.remove(&channel);
            self.send(ServerMessage::request_error(
                request_id,
                ErrorCode::NotFound,
                format!("channel {channel} is closed"),
            ))
            .await;
        }
    }

    async fn channel_ack(&mut self, channel: String) {
        let Some(session) = self.downloads.get(&channel) else {
            debug!(channel, "ignoring ack for unknown channel");
            return;
        };
        if !session.send(DownloadEvent::Ack).await {
            self.downloads.remove(&channel);
        }
    }

    async fn channel_stop(&mut self, request_id: u64, channel: String) {
        let Some(session) = self.downloads.remove(&channel) else {
            self.send(ServerMessage::request_error(
                request_id,
                ErrorCode::NotFound,
                format!("unknown channel {channel}"),
            ))
            .await;
            return;
        };

        // The pump may have completed on its own already; stopping is
        // then a no-op and the ack still stands.
        let _ = session.send(DownloadEvent::Stop).await;
        debug!(channel, "fetch channel stopped by client");
        self.send(ServerMessage::Ack { request_id }).await;
    }

    async fn set_active_batches(&mut self, request_id: u64, batches: Vec<BatchRef>) {
        match activate::set_active_batches(&self.state, &self.username, &batches).await {
            Ok(activated) => {
                self.send(ServerMessage::BatchesActivated {
                    request_id,
                    batches: activated,
                })
                .await;
            }
            Err(err) => self.fail(request_id, &err).await,
        }
    }

    /// Stop every live session exactly once after the stream ended.
    async fn teardown(mut self) {
        if let Some(session) = self.upload.take() {
            // Disconnect finalization: whatever already arrived becomes
            // durable and resumable, and the stream lock frees now
            // rather than at TTL expiry.
            match session.finish().await {
                Ok(_) => info!(username = %self.username, "upload finalized after disconnect"),
                Err(err) => {
                    warn!(username = %self.username, error = %err, "upload finalization failed after disconnect");
                }
            }
        }

        for (channel, session) in self.downloads.drain() {
            debug!(channel, "closing fetch channel");
            session.abort();
        }
    }
}
