//! Invalid-header accumulation.
//!
//! Header parsing never throws: every entry that fails validation lands
//! here, ordered, so the HTTP status and the gRPC status of the reply can
//! be derived from one consistent view.

use bytes::Bytes;

use crate::status::{GrpcException, StatusCode};

/// One problem found while parsing a header block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvalidHeader {
    /// A header that was present but failed validation.
    Invalid {
        /// HTTP status this problem should be reported with, when the
        /// default 400 is not right (e.g. 415 for a bad content-type).
        http_status: Option<u16>,
        /// Header name as received.
        name: Bytes,
        /// Header value as received.
        value: Bytes,
        /// Human-readable validation failure.
        reason: String,
    },
    /// A required header that was absent.
    Missing {
        /// Name of the missing header.
        name: &'static str,
    },
    /// A header that must not appear in this block.
    Unexpected {
        /// Header name as received.
        name: Bytes,
    },
}

impl std::fmt::Display for InvalidHeader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InvalidHeader::Invalid { name, reason, .. } => {
                write!(f, "{}: {}", String::from_utf8_lossy(name), reason)
            }
            InvalidHeader::Missing { name } => write!(f, "missing required header {name}"),
            InvalidHeader::Unexpected { name } => {
                write!(f, "unexpected header {}", String::from_utf8_lossy(name))
            }
        }
    }
}

/// Ordered accumulator of header problems for one header block.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InvalidHeaders {
    entries: Vec<InvalidHeader>,
}

impl InvalidHeaders {
    /// Create an empty accumulator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an invalid header with the default HTTP status.
    pub fn invalid(&mut self, name: impl Into<Bytes>, value: impl Into<Bytes>, reason: String) {
        self.entries.push(InvalidHeader::Invalid {
            http_status: None,
            name: name.into(),
            value: value.into(),
            reason,
        });
    }

    /// Record an invalid header that maps to a specific HTTP status.
    pub fn invalid_with_status(
        &mut self,
        http_status: u16,
        name: impl Into<Bytes>,
        value: impl Into<Bytes>,
        reason: String,
    ) {
        self.entries.push(InvalidHeader::Invalid {
            http_status: Some(http_status),
            name: name.into(),
            value: value.into(),
            reason,
        });
    }

    /// Record a required header as missing.
    pub fn missing(&mut self, name: &'static str) {
        self.entries.push(InvalidHeader::Missing { name });
    }

    /// Record a header that must not appear in this block.
    pub fn unexpected(&mut self, name: impl Into<Bytes>) {
        self.entries.push(InvalidHeader::Unexpected { name: name.into() });
    }

    /// Whether any problem was recorded.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of recorded problems.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Iterate over the problems in the order they were found.
    pub fn iter(&self) -> impl Iterator<Item = &InvalidHeader> {
        self.entries.iter()
    }

    /// The HTTP status to report: the first entry carrying one, else 400.
    pub fn http_status(&self) -> u16 {
        self.entries
            .iter()
            .find_map(|e| match e {
                InvalidHeader::Invalid {
                    http_status: Some(s),
                    ..
                } => Some(*s),
                _ => None,
            })
            .unwrap_or(400)
    }

    /// The gRPC status and message for a Trailers-Only reply.
    pub fn to_exception(&self) -> GrpcException {
        let status = StatusCode::from_http(self.http_status());
        let detail = self
            .entries
            .first()
            .map(|e| e.to_string())
            .unwrap_or_else(|| "invalid headers".to_string());
        GrpcException::new(status).with_message(format!("invalid headers: {detail}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_http_status_is_400() {
        let mut invalid = InvalidHeaders::new();
        invalid.invalid(&b"bad"[..], &b"\x01"[..], "non-printable".to_string());
        assert_eq!(invalid.http_status(), 400);
    }

    #[test]
    fn test_first_explicit_status_wins() {
        let mut invalid = InvalidHeaders::new();
        invalid.missing("content-type");
        invalid.invalid_with_status(415, &b"content-type"[..], &b"text/html"[..], "x".to_string());
        invalid.invalid_with_status(401, &b"other"[..], &b""[..], "y".to_string());
        assert_eq!(invalid.http_status(), 415);
    }

    #[test]
    fn test_order_preserved() {
        let mut invalid = InvalidHeaders::new();
        invalid.missing("te");
        invalid.unexpected(&b"grpc-status"[..]);
        let kinds: Vec<_> = invalid.iter().collect();
        assert!(matches!(kinds[0], InvalidHeader::Missing { name: "te" }));
        assert!(matches!(kinds[1], InvalidHeader::Unexpected { .. }));
    }

    #[test]
    fn test_to_exception_maps_http_status() {
        let mut invalid = InvalidHeaders::new();
        invalid.invalid_with_status(415, &b"content-type"[..], &b"text/html"[..], "not grpc".to_string());
        let exc = invalid.to_exception();
        assert_eq!(exc.status, StatusCode::Internal);
        assert!(exc.message.unwrap().contains("content-type"));
    }
}
