//! Protocol client.
//!
//! [`Client`] drives the packhouse wire protocol over one connection.
//! Every method runs a complete request/response conversation: requests
//! carry a monotonically increasing `request_id`, and frames that do
//! not belong to the conversation in progress (server pushes, late
//! channel traffic) are queued as [`ServerEvent`]s instead of being
//! dropped.
//!
//! The client is stop-and-wait on both paths: uploads send one record
//! group per `UPLOAD_DATA` and wait for the ack, fetches ack one `DATA`
//! frame at a time. That mirrors the server's flow control, so a slow
//! reader or writer never builds an unbounded backlog on either side.

use std::collections::VecDeque;

use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpStream, ToSocketAddrs};
use tokio_util::codec::Framed;
use tracing::debug;

use packhouse_core::{BatchRef, RecordContext, StreamPath};
use packhouse_wire::{ClientCodec, ClientMessage, ErrorCode, ServerMessage};

use crate::error::{ClientError, Result};

/// Records per `UPLOAD_DATA` frame.
const GROUP_RECORDS: usize = 250;

/// Server pushes observed while a request was in flight.
///
/// Collected via [`Client::drain_events`]; an idle protocol has none.
#[derive(Debug)]
pub enum ServerEvent {
    /// The server ended the upload session on its own.
    UploadStopped,
    /// Records for a fetch channel no conversation was reading.
    Data {
        channel: String,
        records: Vec<RecordContext>,
    },
    /// A fetch channel was closed by the server.
    ChannelStopped { channel: String },
    /// A fetch channel failed.
    ChannelError {
        channel: String,
        code: ErrorCode,
        message: String,
    },
}

/// One authenticated protocol connection.
pub struct Client<S = TcpStream> {
    framed: Framed<S, ClientCodec>,
    next_request_id: u64,
    events: VecDeque<ServerEvent>,
}

impl<S> std::fmt::Debug for Client<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("next_request_id", &self.next_request_id)
            .field("events", &self.events)
            .finish_non_exhaustive()
    }
}

impl Client<TcpStream> {
    /// Dial the server and identify as `username`.
    pub async fn connect(addr: impl ToSocketAddrs, username: impl Into<String>) -> Result<Self> {
        let stream = TcpStream::connect(addr).await?;
        Self::handshake(stream, username).await
    }
}

impl<S: AsyncRead + AsyncWrite + Unpin> Client<S> {
    /// Run the `HELLO` handshake over an already-established transport.
    pub async fn handshake(io: S, username: impl Into<String>) -> Result<Self> {
        let username = username.into();
        let mut client = Self {
            framed: Framed::new(io, ClientCodec::new()),
            next_request_id: 0,
            events: VecDeque::new(),
        };

        client.send(ClientMessage::Hello { username }).await?;
        match client.recv().await? {
            ServerMessage::HelloAck => Ok(client),
            ServerMessage::Error { code, message, .. } => {
                Err(ClientError::Server { code, message })
            }
            other => Err(unexpected("HELLO_ACK", &other)),
        }
    }

    /// Upload payloads to a stream in one session.
    ///
    /// Starts a session (resuming the latest batch unless `new_batch`),
    /// sends every payload in ack-paced groups, then stops the session.
    /// Returns the batch the records landed in.
    pub async fn upload(
        &mut self,
        stream: StreamPath,
        new_batch: bool,
        payloads: impl IntoIterator<Item = serde_json::Value>,
    ) -> Result<BatchRef> {
        let request_id = self.next_id();
        self.send(ClientMessage::StartUpload {
            request_id,
            stream,
            new_batch,
        })
        .await?;
        let batch = match self.reply(request_id).await? {
            ServerMessage::UploadStarted { batch, .. } => batch,
            other => return Err(unexpected("UPLOAD_STARTED", &other)),
        };
        debug!(batch = %batch, "upload session started");

        let mut payloads = payloads.into_iter();
        loop {
            let records: Vec<serde_json::Value> =
                payloads.by_ref().take(GROUP_RECORDS).collect();
            if records.is_empty() {
                break;
            }

            let request_id = self.next_id();
            self.send(ClientMessage::UploadData {
                request_id,
                records,
            })
            .await?;
            match self.reply(request_id).await? {
                ServerMessage::Ack { .. } => {}
                other => return Err(unexpected("ACK", &other)),
            }
        }

        let request_id = self.next_id();
        self.send(ClientMessage::UploadStop { request_id }).await?;
        match self.reply(request_id).await? {
            ServerMessage::Ack { .. } => Ok(batch),
            other => Err(unexpected("ACK", &other)),
        }
    }

    /// Fetch a batch's records from `from_offset` through the end.
    ///
    /// Acks every `DATA` frame and returns once the server pushes the
    /// channel's `STOP`.
    pub async fn fetch(&mut self, batch: BatchRef, from_offset: u64) -> Result<Vec<RecordContext>> {
        let request_id = self.next_id();
        self.send(ClientMessage::OpenFetchChannel { request_id, batch })
            .await?;
        let channel = match self.reply(request_id).await? {
            ServerMessage::FetchChannelOpened { channel, .. } => channel,
            other => return Err(unexpected("FETCH_CHANNEL_OPENED", &other)),
        };
        debug!(channel, from_offset, "fetch channel opened");

        let request_id = self.next_id();
        self.send(ClientMessage::Start {
            request_id,
            channel: channel.clone(),
            offset: from_offset,
        })
        .await?;
        match self.reply(request_id).await? {
            ServerMessage::Ack { .. } => {}
            other => return Err(unexpected("ACK", &other)),
        }

        let mut records = Vec::new();
        loop {
            match self.recv().await? {
                ServerMessage::Data {
                    channel: ch,
                    records: group,
                } if ch == channel => {
                    records.extend(group);
                    self.send(ClientMessage::Ack {
                        channel: channel.clone(),
                    })
                    .await?;
                }
                ServerMessage::Stop { channel: ch } if ch == channel => {
                    return Ok(records);
                }
                ServerMessage::Error {
                    channel: Some(ch),
                    code,
                    message,
                    ..
                } if ch == channel => {
                    return Err(ClientError::Server { code, message });
                }
                other => self.note(other)?,
            }
        }
    }

    /// Atomically re-point stream defaults at `batches`.
    ///
    /// Returns the activated batches as the server recorded them.
    pub async fn set_active_batches(&mut self, batches: Vec<BatchRef>) -> Result<Vec<BatchRef>> {
        let request_id = self.next_id();
        self.send(ClientMessage::SetActiveBatches {
            request_id,
            batches,
        })
        .await?;
        match self.reply(request_id).await? {
            ServerMessage::BatchesActivated { batches, .. } => Ok(batches),
            other => Err(unexpected("BATCHES_ACTIVATED", &other)),
        }
    }

    /// Take every server push observed since the last drain.
    pub fn drain_events(&mut self) -> Vec<ServerEvent> {
        self.events.drain(..).collect()
    }

    fn next_id(&mut self) -> u64 {
        self.next_request_id += 1;
        self.next_request_id
    }

    async fn send(&mut self, message: ClientMessage) -> Result<()> {
        self.framed.send(message).await?;
        Ok(())
    }

    async fn recv(&mut self) -> Result<ServerMessage> {
        match self.framed.next().await {
            Some(frame) => Ok(frame?),
            None => Err(ClientError::ConnectionClosed),
        }
    }

    /// Read frames until the reply correlated to `request_id` arrives,
    /// queueing unrelated pushes as events.
    async fn reply(&mut self, request_id: u64) -> Result<ServerMessage> {
        loop {
            let message = self.recv().await?;
            match &message {
                ServerMessage::Error {
                    request_id: Some(id),
                    code,
                    message: text,
                    ..
                } if *id == request_id => {
                    return Err(ClientError::Server {
                        code: *code,
                        message: text.clone(),
                    });
                }
                ServerMessage::UploadStarted {
                    request_id: id, ..
                }
                | ServerMessage::Ack { request_id: id }
                | ServerMessage::FetchChannelOpened {
                    request_id: id, ..
                }
                | ServerMessage::BatchesActivated {
                    request_id: id, ..
                } if *id == request_id => {
                    return Ok(message);
                }
                _ => self.note(message)?,
            }
        }
    }

    /// Queue a push for [`Self::drain_events`]; anything that is not a
    /// recognizable push is a protocol violation.
    fn note(&mut self, message: ServerMessage) -> Result<()> {
        let event = match message {
            ServerMessage::UploadStop => ServerEvent::UploadStopped,
            ServerMessage::Data { channel, records } => ServerEvent::Data { channel, records },
            ServerMessage::Stop { channel } => ServerEvent::ChannelStopped { channel },
            ServerMessage::Error {
                channel: Some(channel),
                code,
                message,
                ..
            } => ServerEvent::ChannelError {
                channel,
                code,
                message,
            },
            other => {
                return Err(ClientError::Protocol(format!(
                    "frame does not belong to any conversation: {other:?}"
                )));
            }
        };
        self.events.push_back(event);
        Ok(())
    }
}

fn unexpected(wanted: &str, got: &ServerMessage) -> ClientError {
    ClientError::Protocol(format!("expected {wanted}, got {got:?}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use packhouse_core::PackageRef;
    use packhouse_wire::ServerCodec;
    use serde_json::json;
    use tokio::io::DuplexStream;

    type FakeServer = Framed<DuplexStream, ServerCodec>;

    fn stream_path() -> StreamPath {
        StreamPath::new(
            PackageRef::new("noaa", "daily-temps"),
            1,
            "TemperatureReading",
            "us-west",
        )
    }

    /// Server side of the handshake, for scripted tests.
    async fn accept(io: DuplexStream) -> FakeServer {
        let mut framed = Framed::new(io, ServerCodec::new());
        let hello = framed.next().await.unwrap().unwrap();
        assert!(matches!(hello, ClientMessage::Hello { .. }));
        framed.send(ServerMessage::HelloAck).await.unwrap();
        framed
    }

    async fn expect(server: &mut FakeServer) -> ClientMessage {
        server.next().await.unwrap().unwrap()
    }

    #[tokio::test]
    async fn handshake_identifies_before_anything_else() {
        let (client_io, server_io) = tokio::io::duplex(64 * 1024);

        let server = tokio::spawn(async move {
            let mut framed = Framed::new(server_io, ServerCodec::new());
            let hello = framed.next().await.unwrap().unwrap();
            let ClientMessage::Hello { username } = hello else {
                panic!("expected HELLO, got {hello:?}");
            };
            assert_eq!(username, "ana");
            framed.send(ServerMessage::HelloAck).await.unwrap();
        });

        Client::handshake(client_io, "ana").await.unwrap();
        server.await.unwrap();
    }

    #[tokio::test]
    async fn handshake_surfaces_rejection() {
        let (client_io, server_io) = tokio::io::duplex(64 * 1024);

        tokio::spawn(async move {
            let mut framed = Framed::new(server_io, ServerCodec::new());
            framed.next().await.unwrap().unwrap();
            framed
                .send(ServerMessage::error(
                    ErrorCode::NotAuthorized,
                    "unknown user",
                ))
                .await
                .unwrap();
        });

        let err = Client::handshake(client_io, "nobody").await.unwrap_err();
        assert!(matches!(
            err,
            ClientError::Server {
                code: ErrorCode::NotAuthorized,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn upload_sends_acked_groups_of_bounded_size() {
        let (client_io, server_io) = tokio::io::duplex(1024 * 1024);

        let server = tokio::spawn(async move {
            let mut server = accept(server_io).await;

            let msg = expect(&mut server).await;
            let ClientMessage::StartUpload {
                request_id,
                new_batch,
                ..
            } = msg
            else {
                panic!("expected START_UPLOAD, got {msg:?}");
            };
            assert!(!new_batch);
            server
                .send(ServerMessage::UploadStarted {
                    request_id,
                    batch: stream_path().batch(1),
                })
                .await
                .unwrap();

            // 600 payloads arrive as 250 + 250 + 100, each acked.
            let mut group_sizes = Vec::new();
            loop {
                match expect(&mut server).await {
                    ClientMessage::UploadData {
                        request_id,
                        records,
                    } => {
                        group_sizes.push(records.len());
                        server
                            .send(ServerMessage::Ack { request_id })
                            .await
                            .unwrap();
                    }
                    ClientMessage::UploadStop { request_id } => {
                        server
                            .send(ServerMessage::Ack { request_id })
                            .await
                            .unwrap();
                        break;
                    }
                    other => panic!("unexpected frame: {other:?}"),
                }
            }
            group_sizes
        });

        let mut client = Client::handshake(client_io, "ana").await.unwrap();
        let batch = client
            .upload(
                stream_path(),
                false,
                (0..600).map(|n| json!({ "n": n })),
            )
            .await
            .unwrap();

        assert_eq!(batch.batch_number, 1);
        assert_eq!(server.await.unwrap(), vec![250, 250, 100]);
    }

    #[tokio::test]
    async fn upload_rejection_carries_the_wire_code() {
        let (client_io, server_io) = tokio::io::duplex(64 * 1024);

        tokio::spawn(async move {
            let mut server = accept(server_io).await;
            let msg = expect(&mut server).await;
            let ClientMessage::StartUpload { request_id, .. } = msg else {
                panic!("expected START_UPLOAD, got {msg:?}");
            };
            server
                .send(ServerMessage::request_error(
                    request_id,
                    ErrorCode::StreamLocked,
                    "stream is locked",
                ))
                .await
                .unwrap();
        });

        let mut client = Client::handshake(client_io, "ana").await.unwrap();
        let err = client
            .upload(stream_path(), false, vec![json!({ "n": 0 })])
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ClientError::Server {
                code: ErrorCode::StreamLocked,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn fetch_acks_every_data_frame_until_stop() {
        let (client_io, server_io) = tokio::io::duplex(1024 * 1024);

        let server = tokio::spawn(async move {
            let mut server = accept(server_io).await;

            let msg = expect(&mut server).await;
            let ClientMessage::OpenFetchChannel { request_id, batch } = msg else {
                panic!("expected OPEN_FETCH_CHANNEL, got {msg:?}");
            };
            assert_eq!(batch.batch_number, 3);
            let channel = "fetch/3/test".to_string();
            server
                .send(ServerMessage::FetchChannelOpened {
                    request_id,
                    channel: channel.clone(),
                })
                .await
                .unwrap();

            let msg = expect(&mut server).await;
            let ClientMessage::Start {
                request_id, offset, ..
            } = msg
            else {
                panic!("expected START, got {msg:?}");
            };
            assert_eq!(offset, 5);
            server
                .send(ServerMessage::Ack { request_id })
                .await
                .unwrap();

            // Two groups, each held until the ack comes back.
            for group in [vec![5, 6, 7], vec![8, 9]] {
                server
                    .send(ServerMessage::Data {
                        channel: channel.clone(),
                        records: group
                            .into_iter()
                            .map(|n| RecordContext::new(n, 0, json!({ "n": n })))
                            .collect(),
                    })
                    .await
                    .unwrap();
                let msg = expect(&mut server).await;
                assert!(matches!(msg, ClientMessage::Ack { channel: ref c } if *c == channel));
            }

            server.send(ServerMessage::Stop { channel }).await.unwrap();
        });

        let mut client = Client::handshake(client_io, "ana").await.unwrap();
        let records = client.fetch(stream_path().batch(3), 5).await.unwrap();

        let offsets: Vec<u64> = records.iter().map(|r| r.offset).collect();
        assert_eq!(offsets, vec![5, 6, 7, 8, 9]);
        server.await.unwrap();
    }

    #[tokio::test]
    async fn channel_error_fails_the_fetch() {
        let (client_io, server_io) = tokio::io::duplex(64 * 1024);

        tokio::spawn(async move {
            let mut server = accept(server_io).await;

            let msg = expect(&mut server).await;
            let ClientMessage::OpenFetchChannel { request_id, .. } = msg else {
                panic!("expected OPEN_FETCH_CHANNEL, got {msg:?}");
            };
            let channel = "fetch/1/test".to_string();
            server
                .send(ServerMessage::FetchChannelOpened {
                    request_id,
                    channel: channel.clone(),
                })
                .await
                .unwrap();

            let msg = expect(&mut server).await;
            let ClientMessage::Start { request_id, .. } = msg else {
                panic!("expected START, got {msg:?}");
            };
            server
                .send(ServerMessage::Ack { request_id })
                .await
                .unwrap();
            server
                .send(ServerMessage::channel_error(
                    channel,
                    ErrorCode::ServerError,
                    "chunk checksum mismatch",
                ))
                .await
                .unwrap();
        });

        let mut client = Client::handshake(client_io, "ana").await.unwrap();
        let err = client.fetch(stream_path().batch(1), 0).await.unwrap_err();
        assert!(matches!(
            err,
            ClientError::Server {
                code: ErrorCode::ServerError,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn pushes_during_a_conversation_become_events() {
        let (client_io, server_io) = tokio::io::duplex(64 * 1024);

        tokio::spawn(async move {
            let mut server = accept(server_io).await;
            let msg = expect(&mut server).await;
            let ClientMessage::SetActiveBatches { request_id, batches } = msg else {
                panic!("expected SET_ACTIVE_BATCHES, got {msg:?}");
            };

            // A stale channel closes while the reply is pending.
            server
                .send(ServerMessage::Stop {
                    channel: "fetch/2/old".to_string(),
                })
                .await
                .unwrap();
            server
                .send(ServerMessage::BatchesActivated {
                    request_id,
                    batches,
                })
                .await
                .unwrap();
        });

        let mut client = Client::handshake(client_io, "ana").await.unwrap();
        let activated = client
            .set_active_batches(vec![stream_path().batch(2)])
            .await
            .unwrap();
        assert_eq!(activated.len(), 1);

        let events = client.drain_events();
        assert_eq!(events.len(), 1);
        assert!(matches!(
            &events[0],
            ServerEvent::ChannelStopped { channel } if channel == "fetch/2/old"
        ));
        assert!(client.drain_events().is_empty());
    }

    #[tokio::test]
    async fn disconnect_mid_conversation_is_reported() {
        let (client_io, server_io) = tokio::io::duplex(64 * 1024);

        tokio::spawn(async move {
            let mut server = accept(server_io).await;
            let _ = expect(&mut server).await;
            // Drop without answering.
        });

        let mut client = Client::handshake(client_io, "ana").await.unwrap();
        let err = client
            .upload(stream_path(), false, Vec::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::ConnectionClosed));
    }
}
