//! Envelope encoding.
//!
//! Every message travels in an envelope with a 5-byte prefix:
//! ```text
//! ┌──────────┬──────────────┬───────────────┐
//! │ Flag     │ Length       │ Payload       │
//! │ 1 byte   │ 4 bytes BE   │ Length bytes  │
//! └──────────┴──────────────┴───────────────┘
//! ```
//! Flag bit 0 marks a compressed payload; bits 1-7 are reserved and must
//! be zero.

use bytes::{BufMut, Bytes, BytesMut};

/// Prefix size in bytes (fixed, exactly 5).
pub const PREFIX_LEN: usize = 5;

/// Flag bit 0: payload is compressed with the negotiated encoding.
pub const COMPRESSED_FLAG: u8 = 0x01;

/// Default maximum payload size (4 MiB), the conventional gRPC limit.
pub const DEFAULT_MAX_MESSAGE_SIZE: u32 = 4 * 1024 * 1024;

/// One framed message: the compressed flag and the payload bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    /// Whether the payload is compressed with the negotiated encoding.
    pub compressed: bool,
    /// Payload bytes (zero-copy via `bytes::Bytes`).
    pub payload: Bytes,
}

impl Envelope {
    /// An uncompressed envelope.
    pub fn plain(payload: impl Into<Bytes>) -> Self {
        Self {
            compressed: false,
            payload: payload.into(),
        }
    }

    /// An envelope with an explicit compressed flag.
    pub fn new(compressed: bool, payload: impl Into<Bytes>) -> Self {
        Self {
            compressed,
            payload: payload.into(),
        }
    }

    /// Total wire size: prefix plus payload.
    #[inline]
    pub fn encoded_len(&self) -> usize {
        PREFIX_LEN + self.payload.len()
    }

    /// Encode prefix and payload into a contiguous buffer.
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.encoded_len());
        self.encode_into(&mut buf);
        buf.freeze()
    }

    /// Append the wire form to an existing buffer.
    pub fn encode_into(&self, buf: &mut BytesMut) {
        buf.put_u8(if self.compressed { COMPRESSED_FLAG } else { 0 });
        buf.put_u32(self.payload.len() as u32);
        buf.extend_from_slice(&self.payload);
    }
}
