//! Protocol message catalog.
//!
//! Every frame on the wire is one of these two enums, tagged by a `type`
//! field in SCREAMING_SNAKE_CASE. Request/response pairs carry a client
//! chosen `request_id`; fetch traffic is correlated by server-assigned
//! `channel` names instead, because one connection can hold many fetch
//! channels at once.
//!
//! Identity types ([`StreamPath`], [`BatchRef`]) and [`RecordContext`]
//! embed as nested JSON objects.

use packhouse_core::{BatchRef, RecordContext, StreamPath};
use serde::{Deserialize, Serialize};

/// Client → Server messages
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClientMessage {
    /// First frame on every connection: identify the caller.
    Hello { username: String },

    /// Begin an upload session on a logical stream.
    ///
    /// `new_batch` forces a fresh batch; otherwise the latest batch is
    /// resumed (or batch 1 created if none exists).
    StartUpload {
        request_id: u64,
        stream: StreamPath,
        new_batch: bool,
    },

    /// A group of record payloads for the active upload session.
    ///
    /// The client must wait for the server's `ACK` before sending the
    /// next group.
    UploadData {
        request_id: u64,
        records: Vec<serde_json::Value>,
    },

    /// End the upload session gracefully.
    UploadStop { request_id: u64 },

    /// Open a fetch channel on one batch.
    OpenFetchChannel { request_id: u64, batch: BatchRef },

    /// Start (or restart) delivery on a fetch channel from `offset`.
    Start {
        request_id: u64,
        channel: String,
        offset: u64,
    },

    /// Acknowledge the most recent `DATA` frame on a fetch channel.
    Ack { channel: String },

    /// Close a fetch channel.
    Stop { request_id: u64, channel: String },

    /// Atomically re-point stream defaults at the given batches.
    SetActiveBatches {
        request_id: u64,
        batches: Vec<BatchRef>,
    },
}

/// Server → Client messages
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ServerMessage {
    /// Connection accepted; the client may start making requests.
    HelloAck,

    /// Upload session established on the named batch.
    UploadStarted { request_id: u64, batch: BatchRef },

    /// Generic request acknowledgement (upload data, upload stop,
    /// fetch start, fetch stop).
    Ack { request_id: u64 },

    /// Server-initiated upload termination. The session is over; any
    /// explanation arrives as a separate `ERROR` frame.
    UploadStop,

    /// Fetch channel created; subsequent frames reference it by name.
    FetchChannelOpened { request_id: u64, channel: String },

    /// A group of records on a fetch channel. Exactly one `DATA` frame
    /// is in flight per channel until the client `ACK`s it.
    Data {
        channel: String,
        records: Vec<RecordContext>,
    },

    /// No more data on this channel (or the server is closing it).
    Stop { channel: String },

    /// Defaults flipped; echoes the activated batches.
    BatchesActivated {
        request_id: u64,
        batches: Vec<BatchRef>,
    },

    /// Request or channel failure.
    Error {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        request_id: Option<u64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        channel: Option<String>,
        code: ErrorCode,
        message: String,
    },
}

/// Error codes (closed set)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// Caller lacks the required permission on the package
    NotAuthorized,
    /// Package, batch, or channel does not exist
    NotFound,
    /// Another session holds the stream's upload lock
    StreamLocked,
    /// Internal failure (storage, database, protocol misuse)
    ServerError,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::NotAuthorized => "NOT_AUTHORIZED",
            ErrorCode::NotFound => "NOT_FOUND",
            ErrorCode::StreamLocked => "STREAM_LOCKED",
            ErrorCode::ServerError => "SERVER_ERROR",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl ServerMessage {
    /// Error tied to a request.
    pub fn request_error(request_id: u64, code: ErrorCode, message: impl Into<String>) -> Self {
        Self::Error {
            request_id: Some(request_id),
            channel: None,
            code,
            message: message.into(),
        }
    }

    /// Error tied to a fetch channel.
    pub fn channel_error(
        channel: impl Into<String>,
        code: ErrorCode,
        message: impl Into<String>,
    ) -> Self {
        Self::Error {
            request_id: None,
            channel: Some(channel.into()),
            code,
            message: message.into(),
        }
    }

    /// Error with no correlation (connection-level failures).
    pub fn error(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::Error {
            request_id: None,
            channel: None,
            code,
            message: message.into(),
        }
    }
}
