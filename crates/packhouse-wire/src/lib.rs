//! Packhouse Wire Protocol
//!
//! The registry speaks one duplex protocol over a plain TCP connection:
//! length-prefixed JSON frames carrying tagged messages. This crate holds
//! the two halves every peer needs:
//!
//! - [`message`]: the full client/server message catalog
//! - [`codec`]: the `tokio_util` frame codec that moves those messages
//!
//! Frame format:
//! ```text
//! +------------------+---------------------+
//! | Length (u32, BE) | JSON document       |
//! +------------------+---------------------+
//! ```
//!
//! The same connection multiplexes request/response exchanges (correlated
//! by `request_id`), an at-most-one upload session, and any number of
//! named fetch channels. See [`message::ClientMessage`] and
//! [`message::ServerMessage`] for the catalog.

pub mod codec;
pub mod error;
pub mod message;

pub use codec::{ClientCodec, ServerCodec, WireCodec, MAX_FRAME_SIZE};
pub use error::{Result, WireError};
pub use message::{ClientMessage, ErrorCode, ServerMessage};
