//! Framing module - length-prefixed message envelopes.
//!
//! This module implements the gRPC message framing layer:
//! - 5-byte prefix encoding/decoding
//! - envelope buffer for accumulating partial reads
//!
//! Envelopes carry opaque payload bytes; serialization and compression
//! are external collaborators.

mod buffer;
mod envelope;

pub use buffer::EnvelopeBuffer;
pub use envelope::{Envelope, COMPRESSED_FLAG, DEFAULT_MAX_MESSAGE_SIZE, PREFIX_LEN};
