//! Custom metadata: validated header names and key/value entries.
//!
//! gRPC lets applications attach custom key/value pairs to requests,
//! responses and trailers. Names ending in `-bin` carry raw bytes and are
//! base64-coded on the wire; all other names carry printable-ASCII values
//! sent verbatim.
//!
//! # Example
//!
//! ```
//! use callwire::metadata::{CustomMetadata, HeaderName};
//!
//! let name = HeaderName::new("trace-bin").unwrap();
//! let entry = CustomMetadata::new(name, &b"\x00\xFF\x10"[..]).unwrap();
//! assert_eq!(&entry.wire_value()[..], b"AP8Q");
//! ```

use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use base64::{alphabet, Engine};
use bytes::Bytes;
use thiserror::Error;

/// Wire coding for binary (`-bin`) values: unpadded on encode, padding
/// accepted on decode.
const BASE64: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new()
        .with_encode_padding(false)
        .with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// Header names reserved by HTTP or by the gRPC protocol itself.
const RESERVED_NAMES: &[&str] = &["user-agent", "content-type", "te", "trailer"];

/// Validation failure for a custom metadata name or value.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MetadataError {
    /// Header name is empty.
    #[error("header name is empty")]
    EmptyName,

    /// Header name contains a byte outside `[0-9a-z_-.]`.
    #[error("header name contains invalid byte 0x{0:02x}")]
    InvalidNameByte(u8),

    /// Names starting with `grpc-` belong to the protocol.
    #[error("header names starting with grpc- are reserved")]
    GrpcPrefix,

    /// Name collides with a reserved HTTP/gRPC header.
    #[error("{0} is a reserved header name")]
    ReservedName(&'static str),

    /// ASCII header value contains a byte outside `0x20..=0x7e`.
    #[error("ascii header value contains non-printable byte 0x{0:02x}")]
    InvalidValueByte(u8),

    /// Binary header value is not valid base64 on the wire.
    #[error("binary header value is not valid base64")]
    InvalidBase64,
}

/// A validated custom-metadata header name.
///
/// Names are non-empty lowercase ASCII restricted to `[0-9a-z_-.]`, must
/// not start with `grpc-`, and must not collide with the reserved set.
/// The `-bin` suffix selects the binary value kind.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct HeaderName {
    name: String,
    binary: bool,
}

impl HeaderName {
    /// Validate `name` and classify it as ASCII or binary.
    pub fn new(name: impl AsRef<[u8]>) -> Result<Self, MetadataError> {
        let raw = name.as_ref();
        if raw.is_empty() {
            return Err(MetadataError::EmptyName);
        }
        for &b in raw {
            if !matches!(b, b'0'..=b'9' | b'a'..=b'z' | b'_' | b'-' | b'.') {
                return Err(MetadataError::InvalidNameByte(b));
            }
        }
        // All bytes validated above, so this is ASCII.
        let name = std::str::from_utf8(raw)
            .expect("validated ascii")
            .to_string();
        if name.starts_with("grpc-") {
            return Err(MetadataError::GrpcPrefix);
        }
        if let Some(reserved) = RESERVED_NAMES.iter().find(|r| **r == name) {
            return Err(MetadataError::ReservedName(reserved));
        }
        let binary = name.ends_with("-bin");
        Ok(Self { name, binary })
    }

    /// The name as a string slice.
    #[inline]
    pub fn as_str(&self) -> &str {
        &self.name
    }

    /// Whether values under this name are binary (`-bin` suffix).
    #[inline]
    pub fn is_binary(&self) -> bool {
        self.binary
    }
}

impl std::fmt::Display for HeaderName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.name)
    }
}

/// One custom metadata entry: a validated name and its decoded value.
///
/// ASCII entries hold printable-ASCII bytes with surrounding whitespace
/// trimmed at construction; binary entries hold arbitrary bytes. Duplicate
/// names are permitted and are semantically equivalent to a single
/// comma-joined value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CustomMetadata {
    name: HeaderName,
    value: Bytes,
}

impl CustomMetadata {
    /// Build an entry from an in-memory (decoded) value.
    ///
    /// For ASCII names the value is trimmed of surrounding spaces/tabs and
    /// every remaining byte must be printable ASCII. Binary names accept
    /// any bytes.
    pub fn new(name: HeaderName, value: impl Into<Bytes>) -> Result<Self, MetadataError> {
        let value = value.into();
        if name.is_binary() {
            return Ok(Self { name, value });
        }
        let trimmed = trim_whitespace(&value);
        for &b in trimmed.iter() {
            if !(0x20..=0x7e).contains(&b) {
                return Err(MetadataError::InvalidValueByte(b));
            }
        }
        Ok(Self {
            name,
            value: trimmed,
        })
    }

    /// Build an entry from the wire form: base64-decodes binary values,
    /// validates ASCII ones.
    pub fn from_wire(name: HeaderName, raw: &[u8]) -> Result<Self, MetadataError> {
        if name.is_binary() {
            let value = BASE64
                .decode(raw)
                .map_err(|_| MetadataError::InvalidBase64)?;
            Ok(Self {
                name,
                value: Bytes::from(value),
            })
        } else {
            Self::new(name, Bytes::copy_from_slice(raw))
        }
    }

    /// The entry's name.
    #[inline]
    pub fn name(&self) -> &HeaderName {
        &self.name
    }

    /// The decoded value bytes.
    #[inline]
    pub fn value(&self) -> &[u8] {
        &self.value
    }

    /// The value as it appears on the wire: base64 (unpadded) for binary
    /// names, verbatim for ASCII ones.
    pub fn wire_value(&self) -> Bytes {
        if self.name.is_binary() {
            Bytes::from(BASE64.encode(&self.value).into_bytes())
        } else {
            self.value.clone()
        }
    }
}

/// Base64-encode a binary header value for the wire (unpadded).
pub(crate) fn base64_encode(value: &[u8]) -> String {
    BASE64.encode(value)
}

/// Decode a base64 wire value; padding optional.
pub(crate) fn base64_decode(raw: &[u8]) -> Result<Vec<u8>, MetadataError> {
    BASE64.decode(raw).map_err(|_| MetadataError::InvalidBase64)
}

/// Strip leading/trailing HTTP padding whitespace (space and tab).
fn trim_whitespace(value: &Bytes) -> Bytes {
    let start = value
        .iter()
        .position(|b| *b != b' ' && *b != b'\t')
        .unwrap_or(value.len());
    let end = value
        .iter()
        .rposition(|b| *b != b' ' && *b != b'\t')
        .map(|i| i + 1)
        .unwrap_or(start);
    value.slice(start..end)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_ascii_name() {
        let name = HeaderName::new("x-request-id").unwrap();
        assert_eq!(name.as_str(), "x-request-id");
        assert!(!name.is_binary());
    }

    #[test]
    fn test_bin_suffix_selects_binary() {
        let name = HeaderName::new("trace-bin").unwrap();
        assert!(name.is_binary());
    }

    #[test]
    fn test_empty_name_rejected() {
        assert_eq!(HeaderName::new(""), Err(MetadataError::EmptyName));
    }

    #[test]
    fn test_uppercase_rejected() {
        assert_eq!(
            HeaderName::new("X-Request-Id"),
            Err(MetadataError::InvalidNameByte(b'X'))
        );
    }

    #[test]
    fn test_invalid_byte_rejected() {
        assert_eq!(
            HeaderName::new("x request"),
            Err(MetadataError::InvalidNameByte(b' '))
        );
        assert_eq!(
            HeaderName::new("x:request"),
            Err(MetadataError::InvalidNameByte(b':'))
        );
    }

    #[test]
    fn test_grpc_prefix_rejected() {
        assert_eq!(
            HeaderName::new("grpc-anything"),
            Err(MetadataError::GrpcPrefix)
        );
    }

    #[test]
    fn test_reserved_names_rejected() {
        for reserved in ["user-agent", "content-type", "te", "trailer"] {
            assert_eq!(
                HeaderName::new(reserved),
                Err(MetadataError::ReservedName(reserved)),
                "{reserved} should be reserved"
            );
        }
    }

    #[test]
    fn test_allowed_punctuation() {
        assert!(HeaderName::new("a_b-c.d0").is_ok());
    }

    #[test]
    fn test_ascii_value_trimmed() {
        let name = HeaderName::new("x-note").unwrap();
        let entry = CustomMetadata::new(name, &b"  hello \t"[..]).unwrap();
        assert_eq!(entry.value(), b"hello");
    }

    #[test]
    fn test_ascii_value_rejects_control_bytes() {
        let name = HeaderName::new("bad").unwrap();
        let err = CustomMetadata::new(name, &b"\x01"[..]).unwrap_err();
        assert_eq!(err, MetadataError::InvalidValueByte(0x01));
    }

    #[test]
    fn test_binary_value_unconstrained() {
        let name = HeaderName::new("trace-bin").unwrap();
        let entry = CustomMetadata::new(name, &b"\x00\x01\xff"[..]).unwrap();
        assert_eq!(entry.value(), b"\x00\x01\xff");
    }

    #[test]
    fn test_binary_wire_value_is_unpadded_base64() {
        let name = HeaderName::new("trace-bin").unwrap();
        let entry = CustomMetadata::new(name, &b"\x00\xff\x10"[..]).unwrap();
        assert_eq!(&entry.wire_value()[..], b"AP8Q");
    }

    #[test]
    fn test_binary_from_wire_accepts_padding() {
        let name = HeaderName::new("trace-bin").unwrap();
        let unpadded = CustomMetadata::from_wire(name.clone(), b"AP8").unwrap();
        let padded = CustomMetadata::from_wire(name, b"AP8=").unwrap();
        assert_eq!(unpadded.value(), b"\x00\xff");
        assert_eq!(padded.value(), b"\x00\xff");
    }

    #[test]
    fn test_binary_from_wire_rejects_garbage() {
        let name = HeaderName::new("trace-bin").unwrap();
        let err = CustomMetadata::from_wire(name, b"!!not-base64!!").unwrap_err();
        assert_eq!(err, MetadataError::InvalidBase64);
    }

    #[test]
    fn test_binary_round_trip_through_wire() {
        let name = HeaderName::new("trace-bin").unwrap();
        let entry = CustomMetadata::new(name.clone(), &b"\x00\xff\x10"[..]).unwrap();
        let wire = entry.wire_value();
        let back = CustomMetadata::from_wire(name, &wire).unwrap();
        assert_eq!(back, entry);
    }

    #[test]
    fn test_ascii_wire_value_verbatim() {
        let name = HeaderName::new("x-host").unwrap();
        let entry = CustomMetadata::new(name, &b"example.com"[..]).unwrap();
        assert_eq!(&entry.wire_value()[..], b"example.com");
    }
}
