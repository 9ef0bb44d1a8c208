//! Trailers: `grpc-status`, `grpc-message` and trailing metadata.
//!
//! `grpc-message` uses the gRPC percent-encoding dialect: bytes outside
//! printable ASCII (and `%` itself) become `%XX`; decoders are lenient
//! and pass malformed escapes through verbatim.

use bytes::Bytes;

use super::response::parse_response_head;
use super::{absorb_custom, extend_with_metadata, extend_with_raw, InvalidHeaders, ResponseHeaders};
use crate::metadata::CustomMetadata;
use crate::status::{GrpcException, StatusCode};
use crate::transport::{RawHeader, RawHeaders};

/// Parsed trailing headers for one call.
#[derive(Debug, Clone, PartialEq)]
pub struct Trailers {
    /// The call's final status.
    pub status: StatusCode,
    /// Optional human-readable detail from `grpc-message`.
    pub message: Option<String>,
    /// Trailing custom metadata.
    pub metadata: Vec<CustomMetadata>,
    /// Trailing headers this engine does not recognize.
    pub unrecognized: Vec<RawHeader>,
}

impl Trailers {
    /// Successful completion with no message or metadata.
    pub fn ok() -> Self {
        Self {
            status: StatusCode::Ok,
            message: None,
            metadata: Vec::new(),
            unrecognized: Vec::new(),
        }
    }
}

impl Default for Trailers {
    fn default() -> Self {
        Self::ok()
    }
}

impl From<GrpcException> for Trailers {
    fn from(exc: GrpcException) -> Self {
        Self {
            status: exc.status,
            message: exc.message,
            metadata: exc.metadata,
            unrecognized: Vec::new(),
        }
    }
}

/// Parse a trailing HEADERS frame. `grpc-status` is required; its absence
/// is accumulated and the record defaults to [`StatusCode::Unknown`].
pub fn parse_trailers(raw: &RawHeaders) -> (Trailers, InvalidHeaders) {
    let mut invalid = InvalidHeaders::new();
    let trailers = parse_trailer_fields(raw, false, &mut invalid);
    (trailers, invalid)
}

/// Parse a Trailers-Only frame: one HEADERS frame carrying the combined
/// response head and trailers.
pub(crate) fn parse_trailers_only(
    raw: &RawHeaders,
) -> (ResponseHeaders, Trailers, InvalidHeaders) {
    let (headers, mut invalid) = parse_response_head(raw, true);
    let trailers = parse_trailer_fields(raw, true, &mut invalid);
    (headers, trailers, invalid)
}

fn parse_trailer_fields(
    raw: &RawHeaders,
    combined_head: bool,
    invalid: &mut InvalidHeaders,
) -> Trailers {
    let mut trailers = Trailers::ok();
    let mut saw_status = false;

    for header in raw.iter() {
        let name = &header.name[..];
        let value = &header.value[..];
        match name {
            b"grpc-status" => {
                match std::str::from_utf8(value).ok().and_then(|v| v.parse::<u32>().ok()) {
                    Some(code) if !saw_status => {
                        trailers.status = StatusCode::from_code(code);
                        saw_status = true;
                    }
                    Some(_) => invalid.invalid(
                        header.name.clone(),
                        header.value.clone(),
                        "duplicate grpc-status".to_string(),
                    ),
                    None => invalid.invalid(
                        header.name.clone(),
                        header.value.clone(),
                        "malformed grpc-status".to_string(),
                    ),
                }
            }
            b"grpc-message" => {
                if trailers.message.is_none() {
                    trailers.message = Some(percent_decode(value));
                } else {
                    invalid.invalid(
                        header.name.clone(),
                        header.value.clone(),
                        "duplicate grpc-message".to_string(),
                    );
                }
            }
            // Head fields of a Trailers-Only frame are parsed separately.
            _ if combined_head && (name.starts_with(b":") || is_head_field(name)) => {}
            _ if name.starts_with(b":") => invalid.unexpected(header.name.clone()),
            _ => absorb_custom(
                header,
                &mut trailers.metadata,
                &mut trailers.unrecognized,
                invalid,
            ),
        }
    }

    if !saw_status {
        invalid.missing("grpc-status");
        trailers.status = StatusCode::Unknown;
    }

    trailers
}

fn is_head_field(name: &[u8]) -> bool {
    matches!(
        name,
        b"content-type" | b"grpc-encoding" | b"grpc-accept-encoding"
    )
}

/// Serialize a trailing HEADERS frame.
pub fn serialize_trailers(trailers: &Trailers) -> RawHeaders {
    let mut out = RawHeaders::new();
    out.push(
        &b"grpc-status"[..],
        Bytes::from(trailers.status.code().to_string().into_bytes()),
    );
    if let Some(message) = &trailers.message {
        out.push(
            &b"grpc-message"[..],
            Bytes::from(percent_encode(message).into_bytes()),
        );
    }
    extend_with_metadata(&mut out, &trailers.metadata);
    extend_with_raw(&mut out, &trailers.unrecognized);
    out
}

/// Serialize a Trailers-Only frame: the combined response head and
/// trailers in one HEADERS frame marked end-of-stream by the caller.
pub fn serialize_trailers_only(
    http_status: u16,
    headers: &ResponseHeaders,
    trailers: &Trailers,
) -> RawHeaders {
    let mut out = RawHeaders::new();
    out.push(
        &b":status"[..],
        Bytes::from(http_status.to_string().into_bytes()),
    );
    out.push(
        &b"content-type"[..],
        Bytes::from(headers.format.content_type().into_bytes()),
    );
    extend_with_metadata(&mut out, &headers.metadata);
    out.push(
        &b"grpc-status"[..],
        Bytes::from(trailers.status.code().to_string().into_bytes()),
    );
    if let Some(message) = &trailers.message {
        out.push(
            &b"grpc-message"[..],
            Bytes::from(percent_encode(message).into_bytes()),
        );
    }
    extend_with_metadata(&mut out, &trailers.metadata);
    extend_with_raw(&mut out, &trailers.unrecognized);
    out
}

/// gRPC percent-encoding: printable ASCII except `%` passes through.
fn percent_encode(message: &str) -> String {
    let mut out = String::with_capacity(message.len());
    for &b in message.as_bytes() {
        if (0x20..=0x7e).contains(&b) && b != b'%' {
            out.push(b as char);
        } else {
            out.push_str(&format!("%{b:02X}"));
        }
    }
    out
}

/// Lenient decode: malformed escapes pass through verbatim.
fn percent_decode(raw: &[u8]) -> String {
    let mut out = Vec::with_capacity(raw.len());
    let mut i = 0;
    while i < raw.len() {
        if raw[i] == b'%' && i + 2 < raw.len() {
            if let (Some(hi), Some(lo)) = (hex_value(raw[i + 1]), hex_value(raw[i + 2])) {
                out.push(hi << 4 | lo);
                i += 3;
                continue;
            }
        }
        out.push(raw[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

fn hex_value(b: u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'A'..=b'F' => Some(b - b'A' + 10),
        b'a'..=b'f' => Some(b - b'a' + 10),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::HeaderName;

    #[test]
    fn test_percent_encode_printable_passthrough() {
        assert_eq!(percent_encode("Hello, world!"), "Hello, world!");
    }

    #[test]
    fn test_percent_encode_escapes() {
        assert_eq!(percent_encode("100%"), "100%25");
        assert_eq!(percent_encode("déjà"), "d%C3%A9j%C3%A0");
        assert_eq!(percent_encode("a\nb"), "a%0Ab");
    }

    #[test]
    fn test_percent_decode_round_trip() {
        for message in ["plain", "100%", "déjà vu", "tab\there", ""] {
            assert_eq!(percent_decode(percent_encode(message).as_bytes()), message);
        }
    }

    #[test]
    fn test_percent_decode_lenient() {
        assert_eq!(percent_decode(b"50%"), "50%");
        assert_eq!(percent_decode(b"%zz"), "%zz");
        assert_eq!(percent_decode(b"%4"), "%4");
    }

    #[test]
    fn test_trailers_round_trip() {
        let trailers = Trailers {
            status: StatusCode::ResourceExhausted,
            message: Some("quota blown: 100%".to_string()),
            metadata: vec![CustomMetadata::new(
                HeaderName::new("retry-after-bin").unwrap(),
                &b"\x00\x05"[..],
            )
            .unwrap()],
            unrecognized: Vec::new(),
        };
        let (parsed, invalid) = parse_trailers(&serialize_trailers(&trailers));
        assert!(invalid.is_empty(), "{invalid:?}");
        assert_eq!(parsed, trailers);
    }

    #[test]
    fn test_missing_grpc_status_accumulates() {
        let raw = RawHeaders::new();
        let (trailers, invalid) = parse_trailers(&raw);
        assert_eq!(trailers.status, StatusCode::Unknown);
        assert_eq!(invalid.len(), 1);
    }

    #[test]
    fn test_unknown_status_code_is_unknown() {
        let mut raw = RawHeaders::new();
        raw.push(&b"grpc-status"[..], &b"99"[..]);
        let (trailers, invalid) = parse_trailers(&raw);
        assert!(invalid.is_empty());
        assert_eq!(trailers.status, StatusCode::Unknown);
    }

    #[test]
    fn test_trailers_only_combined_frame() {
        let headers = ResponseHeaders::default();
        let trailers = Trailers::from(
            GrpcException::new(StatusCode::Unimplemented).with_message("no such method"),
        );
        let wire = serialize_trailers_only(200, &headers, &trailers);

        assert_eq!(wire.get(b":status"), Some(&b"200"[..]));
        assert_eq!(wire.get(b"grpc-status"), Some(&b"12"[..]));

        let (parsed_headers, parsed_trailers, invalid) = parse_trailers_only(&wire);
        assert!(invalid.is_empty(), "{invalid:?}");
        assert_eq!(parsed_headers, headers);
        assert_eq!(parsed_trailers, trailers);
    }
}
