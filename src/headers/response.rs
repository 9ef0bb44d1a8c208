//! Response headers: the typed record and its wire form.

use bytes::Bytes;

use super::{
    absorb_custom, encoding_list_value, extend_with_metadata, extend_with_raw,
    parse_encoding_list, trim_ascii, Compression, InvalidHeaders, MessageFormat,
};
use crate::metadata::CustomMetadata;
use crate::transport::{RawHeader, RawHeaders};

/// Parsed response head for one call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResponseHeaders {
    /// Message format tag from `content-type`.
    pub format: MessageFormat,
    /// Message encoding from `grpc-encoding`.
    pub encoding: Option<Compression>,
    /// Encodings the server accepts, from `grpc-accept-encoding`.
    pub accept_encoding: Vec<Compression>,
    /// Initial custom response metadata.
    pub metadata: Vec<CustomMetadata>,
    /// Headers this engine does not recognize, preserved in order.
    pub unrecognized: Vec<RawHeader>,
}

impl ResponseHeaders {
    /// Serialize into wire headers, `:status` first.
    pub fn to_wire(&self) -> RawHeaders {
        let mut out = RawHeaders::new();
        out.push(&b":status"[..], &b"200"[..]);
        out.push(
            &b"content-type"[..],
            Bytes::from(self.format.content_type().into_bytes()),
        );
        if let Some(encoding) = &self.encoding {
            out.push(
                &b"grpc-encoding"[..],
                Bytes::copy_from_slice(encoding.name().as_bytes()),
            );
        }
        if !self.accept_encoding.is_empty() {
            out.push(
                &b"grpc-accept-encoding"[..],
                Bytes::from(encoding_list_value(&self.accept_encoding).into_bytes()),
            );
        }
        extend_with_metadata(&mut out, &self.metadata);
        extend_with_raw(&mut out, &self.unrecognized);
        out
    }
}

/// Parse a response head. Never fails: problems accumulate alongside a
/// best-effort record.
pub fn parse_response_headers(raw: &RawHeaders) -> (ResponseHeaders, InvalidHeaders) {
    parse_response_head(raw, false)
}

/// Shared parse for a plain response head and for the head part of a
/// Trailers-Only frame (which additionally carries the trailer fields,
/// consumed elsewhere).
pub(crate) fn parse_response_head(
    raw: &RawHeaders,
    trailers_only: bool,
) -> (ResponseHeaders, InvalidHeaders) {
    let mut headers = ResponseHeaders::default();
    let mut invalid = InvalidHeaders::new();
    let mut saw_status = false;
    let mut saw_content_type = false;

    for header in raw.iter() {
        let name = &header.name[..];
        let value = &header.value[..];
        match name {
            b":status" => {
                saw_status = true;
                match std::str::from_utf8(value).ok().and_then(|v| v.parse::<u16>().ok()) {
                    Some(200) => {}
                    Some(status) => invalid.invalid_with_status(
                        status,
                        header.name.clone(),
                        header.value.clone(),
                        format!("HTTP status {status}"),
                    ),
                    None => invalid.invalid(
                        header.name.clone(),
                        header.value.clone(),
                        "malformed :status".to_string(),
                    ),
                }
            }
            _ if name.starts_with(b":") => {}
            b"content-type" => match MessageFormat::from_content_type(trim_ascii(value)) {
                Some(format) if !saw_content_type => {
                    headers.format = format;
                    saw_content_type = true;
                }
                Some(_) => invalid.invalid(
                    header.name.clone(),
                    header.value.clone(),
                    "duplicate content-type".to_string(),
                ),
                None => invalid.invalid_with_status(
                    415,
                    header.name.clone(),
                    header.value.clone(),
                    "not a gRPC content-type".to_string(),
                ),
            },
            b"grpc-encoding" => {
                if headers.encoding.is_none() {
                    headers.encoding = Some(Compression::from_name(trim_ascii(value)));
                } else {
                    invalid.invalid(
                        header.name.clone(),
                        header.value.clone(),
                        "duplicate grpc-encoding".to_string(),
                    );
                }
            }
            b"grpc-accept-encoding" => {
                parse_encoding_list(value, &mut headers.accept_encoding)
            }
            b"grpc-status" | b"grpc-message" if trailers_only => {}
            b"grpc-status" | b"grpc-message" => invalid.unexpected(header.name.clone()),
            // In a Trailers-Only frame the custom metadata is trailing
            // metadata and belongs to the trailers record.
            _ if trailers_only => {}
            _ => absorb_custom(
                header,
                &mut headers.metadata,
                &mut headers.unrecognized,
                &mut invalid,
            ),
        }
    }

    if !saw_status {
        invalid.missing(":status");
    }
    if !saw_content_type {
        invalid.missing("content-type");
    }

    (headers, invalid)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::HeaderName;

    fn full_record() -> ResponseHeaders {
        ResponseHeaders {
            format: MessageFormat::Tagged("proto".to_string()),
            encoding: Some(Compression::Identity),
            accept_encoding: vec![Compression::Gzip, Compression::Zstd],
            metadata: vec![CustomMetadata::new(
                HeaderName::new("x-server").unwrap(),
                &b"callwire"[..],
            )
            .unwrap()],
            unrecognized: vec![RawHeader {
                name: Bytes::from_static(b"grpc-retry-pushback-ms"),
                value: Bytes::from_static(b"100"),
            }],
        }
    }

    #[test]
    fn test_wire_round_trip() {
        let record = full_record();
        let (parsed, invalid) = parse_response_headers(&record.to_wire());
        assert!(invalid.is_empty(), "{invalid:?}");
        assert_eq!(parsed, record);
    }

    #[test]
    fn test_missing_status_accumulates() {
        let mut raw = RawHeaders::new();
        raw.push(&b"content-type"[..], &b"application/grpc"[..]);
        let (_, invalid) = parse_response_headers(&raw);
        assert_eq!(invalid.len(), 1);
    }

    #[test]
    fn test_non_200_status_carries_through() {
        let mut raw = RawHeaders::new();
        raw.push(&b":status"[..], &b"503"[..]);
        raw.push(&b"content-type"[..], &b"application/grpc"[..]);
        let (_, invalid) = parse_response_headers(&raw);
        assert_eq!(invalid.http_status(), 503);
    }

    #[test]
    fn test_grpc_status_unexpected_in_streaming_head() {
        let mut raw = RawHeaders::new();
        raw.push(&b":status"[..], &b"200"[..]);
        raw.push(&b"content-type"[..], &b"application/grpc"[..]);
        raw.push(&b"grpc-status"[..], &b"0"[..]);
        let (_, invalid) = parse_response_headers(&raw);
        assert_eq!(invalid.len(), 1);
    }
}
