//! Length-prefixed JSON frame codec.
//!
//! Frame format:
//! ```text
//! +------------------+---------------------+
//! | Length (u32, BE) | JSON document       |
//! +------------------+---------------------+
//! ```
//!
//! [`WireCodec`] is generic over the inbound and outbound message types,
//! so the same implementation serves both ends of the connection:
//! servers decode [`ClientMessage`] and encode [`ServerMessage`], clients
//! the reverse. The [`ServerCodec`] and [`ClientCodec`] aliases pick the
//! orientation.

use crate::error::WireError;
use crate::message::{ClientMessage, ServerMessage};
use bytes::{Buf, BufMut, BytesMut};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::marker::PhantomData;
use tokio_util::codec::{Decoder, Encoder};

/// Maximum frame size (16 MiB).
///
/// Generous for record groups (a group tops out at 250 records) while
/// still bounding what one frame can make the server buffer.
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Frame codec, typed by message direction.
pub struct WireCodec<In, Out> {
    max_frame_size: usize,
    _direction: PhantomData<fn(In) -> Out>,
}

/// Codec orientation for the server end of a connection.
pub type ServerCodec = WireCodec<ClientMessage, ServerMessage>;

/// Codec orientation for the client end of a connection.
pub type ClientCodec = WireCodec<ServerMessage, ClientMessage>;

impl<In, Out> WireCodec<In, Out> {
    pub fn new() -> Self {
        Self {
            max_frame_size: MAX_FRAME_SIZE,
            _direction: PhantomData,
        }
    }

    pub fn with_max_frame_size(max_frame_size: usize) -> Self {
        Self {
            max_frame_size,
            _direction: PhantomData,
        }
    }
}

impl<In, Out> Default for WireCodec<In, Out> {
    fn default() -> Self {
        Self::new()
    }
}

impl<In: DeserializeOwned, Out> Decoder for WireCodec<In, Out> {
    type Item = In;
    type Error = WireError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<In>, WireError> {
        // Need at least the 4-byte length prefix.
        if src.len() < 4 {
            return Ok(None);
        }

        // Read the length without consuming it.
        let length = (&src[..4]).get_u32() as usize;

        if length > self.max_frame_size {
            return Err(WireError::FrameTooLarge {
                size: length,
                max: self.max_frame_size,
            });
        }

        let total_length = 4 + length;
        if src.len() < total_length {
            src.reserve(total_length - src.len());
            return Ok(None);
        }

        src.advance(4);
        let payload = src.split_to(length);

        Ok(Some(serde_json::from_slice(&payload)?))
    }
}

impl<In, Out: Serialize> Encoder<Out> for WireCodec<In, Out> {
    type Error = WireError;

    fn encode(&mut self, item: Out, dst: &mut BytesMut) -> Result<(), WireError> {
        let payload = serde_json::to_vec(&item)?;

        if payload.len() > self.max_frame_size {
            return Err(WireError::FrameTooLarge {
                size: payload.len(),
                max: self.max_frame_size,
            });
        }

        dst.reserve(4 + payload.len());
        dst.put_u32(payload.len() as u32);
        dst.extend_from_slice(&payload);

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode_client(msg: ClientMessage) -> BytesMut {
        let mut codec = ClientCodec::new();
        let mut buf = BytesMut::new();
        codec.encode(msg, &mut buf).unwrap();
        buf
    }

    #[test]
    fn test_round_trip_through_opposing_codecs() {
        let mut buf = encode_client(ClientMessage::Hello {
            username: "alice".to_string(),
        });

        let mut server = ServerCodec::new();
        let decoded = server.decode(&mut buf).unwrap().unwrap();
        assert!(matches!(decoded, ClientMessage::Hello { username } if username == "alice"));
        assert!(buf.is_empty());
    }

    #[test]
    fn test_decode_waits_for_length_prefix() {
        let mut server = ServerCodec::new();
        let mut buf = BytesMut::from(&[0u8, 0][..]);

        assert!(server.decode(&mut buf).unwrap().is_none());
        // The partial prefix stays buffered.
        assert_eq!(buf.len(), 2);
    }

    #[test]
    fn test_decode_waits_for_full_payload() {
        let full = encode_client(ClientMessage::UploadStop { request_id: 1 });

        let mut server = ServerCodec::new();
        let mut buf = BytesMut::new();

        // Feed everything except the last byte.
        buf.extend_from_slice(&full[..full.len() - 1]);
        assert!(server.decode(&mut buf).unwrap().is_none());

        // The final byte completes the frame.
        buf.extend_from_slice(&full[full.len() - 1..]);
        let decoded = server.decode(&mut buf).unwrap().unwrap();
        assert!(matches!(decoded, ClientMessage::UploadStop { request_id: 1 }));
    }

    #[test]
    fn test_decode_multiple_frames_from_one_buffer() {
        let mut buf = BytesMut::new();
        buf.extend_from_slice(&encode_client(ClientMessage::Ack {
            channel: "fetch/1/a".to_string(),
        }));
        buf.extend_from_slice(&encode_client(ClientMessage::Ack {
            channel: "fetch/1/b".to_string(),
        }));

        let mut server = ServerCodec::new();
        let first = server.decode(&mut buf).unwrap().unwrap();
        let second = server.decode(&mut buf).unwrap().unwrap();
        assert!(matches!(first, ClientMessage::Ack { channel } if channel == "fetch/1/a"));
        assert!(matches!(second, ClientMessage::Ack { channel } if channel == "fetch/1/b"));
        assert!(buf.is_empty());
    }

    #[test]
    fn test_decode_rejects_oversized_frame() {
        let mut server: ServerCodec = WireCodec::with_max_frame_size(64);
        let mut buf = BytesMut::new();
        buf.put_u32(65);

        let err = server.decode(&mut buf).unwrap_err();
        assert!(matches!(err, WireError::FrameTooLarge { size: 65, max: 64 }));
    }

    #[test]
    fn test_encode_rejects_oversized_frame() {
        let mut client: ClientCodec = WireCodec::with_max_frame_size(16);
        let mut buf = BytesMut::new();

        let err = client
            .encode(
                ClientMessage::Hello {
                    username: "a-name-well-past-sixteen-bytes".to_string(),
                },
                &mut buf,
            )
            .unwrap_err();
        assert!(matches!(err, WireError::FrameTooLarge { .. }));
        assert!(buf.is_empty());
    }

    #[test]
    fn test_decode_rejects_malformed_json() {
        let mut server = ServerCodec::new();
        let mut buf = BytesMut::new();
        let garbage = b"not json at all";
        buf.put_u32(garbage.len() as u32);
        buf.extend_from_slice(garbage);

        let err = server.decode(&mut buf).unwrap_err();
        assert!(matches!(err, WireError::Json(_)));
    }

    #[test]
    fn test_length_prefix_is_big_endian_payload_length() {
        let buf = encode_client(ClientMessage::Hello {
            username: "x".to_string(),
        });
        let length = (&buf[..4]).get_u32() as usize;
        assert_eq!(length, buf.len() - 4);
        assert_eq!(buf[4], b'{');
    }
}
