//! Envelope buffer for accumulating partial reads.
//!
//! HTTP/2 DATA frames split the message stream at arbitrary byte
//! boundaries, so decoding is a state machine over an accumulation
//! buffer:
//! - `WaitingForPrefix`: need at least 5 bytes
//! - `WaitingForPayload`: prefix parsed, need N more payload bytes

use bytes::{Bytes, BytesMut};

use super::envelope::{Envelope, COMPRESSED_FLAG, DEFAULT_MAX_MESSAGE_SIZE, PREFIX_LEN};
use crate::status::{GrpcException, StatusCode};

/// State machine for envelope parsing.
#[derive(Debug, Clone)]
enum State {
    /// Waiting for a complete 5-byte prefix.
    WaitingForPrefix,
    /// Prefix parsed, waiting for payload bytes.
    WaitingForPayload { compressed: bool, remaining: u32 },
}

/// Buffer for accumulating incoming bytes and extracting complete
/// envelopes.
///
/// All data is stored in a single `BytesMut`; payloads are extracted by
/// zero-copy split.
pub struct EnvelopeBuffer {
    /// Accumulated bytes from transport data chunks.
    buffer: BytesMut,
    /// Current parsing state.
    state: State,
    /// Maximum allowed payload size.
    max_message_size: u32,
}

impl EnvelopeBuffer {
    /// Create a buffer with the default 4 MiB message limit.
    pub fn new() -> Self {
        Self::with_max_message(DEFAULT_MAX_MESSAGE_SIZE)
    }

    /// Create a buffer with a custom message limit.
    pub fn with_max_message(max_message_size: u32) -> Self {
        Self {
            buffer: BytesMut::with_capacity(8 * 1024),
            state: State::WaitingForPrefix,
            max_message_size,
        }
    }

    /// Push a data chunk and extract all complete envelopes.
    ///
    /// Partial data is buffered for the next push.
    ///
    /// # Errors
    ///
    /// `ResourceExhausted` when a prefix announces a payload over the
    /// configured limit; `Internal` when reserved flag bits are set.
    pub fn push(&mut self, data: &[u8]) -> Result<Vec<Envelope>, GrpcException> {
        self.buffer.extend_from_slice(data);

        let mut envelopes = Vec::new();
        while let Some(envelope) = self.try_extract_one()? {
            envelopes.push(envelope);
        }
        Ok(envelopes)
    }

    /// Whether a message prefix or payload is still incomplete.
    pub fn has_partial(&self) -> bool {
        !self.buffer.is_empty() || matches!(self.state, State::WaitingForPayload { .. })
    }

    fn try_extract_one(&mut self) -> Result<Option<Envelope>, GrpcException> {
        match &self.state {
            State::WaitingForPrefix => {
                if self.buffer.len() < PREFIX_LEN {
                    return Ok(None);
                }

                let flag = self.buffer[0];
                if flag & !COMPRESSED_FLAG != 0 {
                    return Err(GrpcException::new(StatusCode::Internal)
                        .with_message(format!("reserved envelope flag bits set: 0x{flag:02x}")));
                }
                let length = u32::from_be_bytes([
                    self.buffer[1],
                    self.buffer[2],
                    self.buffer[3],
                    self.buffer[4],
                ]);
                if length > self.max_message_size {
                    return Err(GrpcException::new(StatusCode::ResourceExhausted)
                        .with_message(format!(
                            "message of {length} bytes exceeds limit of {} bytes",
                            self.max_message_size
                        )));
                }

                let _ = self.buffer.split_to(PREFIX_LEN);

                if length == 0 {
                    return Ok(Some(Envelope::new(flag & COMPRESSED_FLAG != 0, Bytes::new())));
                }

                self.state = State::WaitingForPayload {
                    compressed: flag & COMPRESSED_FLAG != 0,
                    remaining: length,
                };
                self.try_extract_one()
            }

            State::WaitingForPayload {
                compressed,
                remaining,
            } => {
                let compressed = *compressed;
                let remaining = *remaining as usize;
                if self.buffer.len() < remaining {
                    return Ok(None);
                }

                let payload = self.buffer.split_to(remaining).freeze();
                self.state = State::WaitingForPrefix;
                Ok(Some(Envelope::new(compressed, payload)))
            }
        }
    }
}

impl Default for EnvelopeBuffer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wire(envelopes: &[Envelope]) -> Vec<u8> {
        envelopes.iter().flat_map(|e| e.encode()).collect()
    }

    #[test]
    fn test_single_complete_envelope() {
        let mut buffer = EnvelopeBuffer::new();
        let envelopes = buffer
            .push(&wire(&[Envelope::plain(&b"hello"[..])]))
            .unwrap();

        assert_eq!(envelopes.len(), 1);
        assert_eq!(&envelopes[0].payload[..], b"hello");
        assert!(!envelopes[0].compressed);
        assert!(!buffer.has_partial());
    }

    #[test]
    fn test_multiple_envelopes_in_one_push() {
        let mut buffer = EnvelopeBuffer::new();
        let input = wire(&[
            Envelope::plain(&b"first"[..]),
            Envelope::plain(&b"second"[..]),
            Envelope::plain(&b"third"[..]),
        ]);

        let envelopes = buffer.push(&input).unwrap();
        let payloads: Vec<_> = envelopes.iter().map(|e| &e.payload[..]).collect();
        assert_eq!(payloads, vec![&b"first"[..], b"second", b"third"]);
    }

    #[test]
    fn test_fragmented_prefix() {
        let mut buffer = EnvelopeBuffer::new();
        let input = wire(&[Envelope::plain(&b"test"[..])]);

        assert!(buffer.push(&input[..3]).unwrap().is_empty());
        assert!(buffer.has_partial());

        let envelopes = buffer.push(&input[3..]).unwrap();
        assert_eq!(envelopes.len(), 1);
        assert_eq!(&envelopes[0].payload[..], b"test");
    }

    #[test]
    fn test_fragmented_payload() {
        let mut buffer = EnvelopeBuffer::new();
        let payload = b"a payload split across two data frames";
        let input = wire(&[Envelope::plain(&payload[..])]);

        let cut = PREFIX_LEN + 10;
        assert!(buffer.push(&input[..cut]).unwrap().is_empty());
        assert!(buffer.has_partial());

        let envelopes = buffer.push(&input[cut..]).unwrap();
        assert_eq!(&envelopes[0].payload[..], &payload[..]);
        assert!(!buffer.has_partial());
    }

    #[test]
    fn test_byte_at_a_time() {
        let mut buffer = EnvelopeBuffer::new();
        let input = wire(&[Envelope::new(true, &b"hi"[..])]);

        let mut all = Vec::new();
        for byte in &input {
            all.extend(buffer.push(std::slice::from_ref(byte)).unwrap());
        }

        assert_eq!(all.len(), 1);
        assert!(all[0].compressed);
        assert_eq!(&all[0].payload[..], b"hi");
    }

    #[test]
    fn test_empty_payload_envelope() {
        let mut buffer = EnvelopeBuffer::new();
        let envelopes = buffer.push(&wire(&[Envelope::plain(&b""[..])])).unwrap();
        assert_eq!(envelopes.len(), 1);
        assert!(envelopes[0].payload.is_empty());
    }

    #[test]
    fn test_oversize_message_is_resource_exhausted() {
        let mut buffer = EnvelopeBuffer::with_max_message(100);
        let prefix = [0u8, 0, 0, 0x03, 0xe8]; // claims 1000 bytes

        let err = buffer.push(&prefix).unwrap_err();
        assert_eq!(err.status, StatusCode::ResourceExhausted);
    }

    #[test]
    fn test_reserved_flag_bits_rejected() {
        let mut buffer = EnvelopeBuffer::new();
        let err = buffer.push(&[0x80, 0, 0, 0, 0]).unwrap_err();
        assert_eq!(err.status, StatusCode::Internal);
    }

    #[test]
    fn test_decode_encode_round_trip() {
        let frames = vec![
            Envelope::plain(&b""[..]),
            Envelope::new(true, &b"compressed bytes"[..]),
            Envelope::plain(vec![0xab; 64 * 1024]),
        ];
        let mut buffer = EnvelopeBuffer::new();
        let decoded = buffer.push(&wire(&frames)).unwrap();
        assert_eq!(decoded, frames);
    }
}
