//! Request headers: the typed record and its wire form.

use bytes::Bytes;

use super::{
    absorb_custom, encoding_list_value, extend_with_metadata, extend_with_raw,
    parse_encoding_list, trim_ascii, Compression, InvalidHeaders, MessageFormat, Path, Timeout,
};
use crate::metadata::{self, CustomMetadata};
use crate::transport::{RawHeader, RawHeaders};

/// Parsed request head for one call.
///
/// Recognized fields are typed; everything else lands in `metadata`
/// (valid custom names) or `unrecognized` (unknown protocol headers,
/// passed through verbatim).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RequestHeaders {
    /// Deadline from `grpc-timeout`.
    pub timeout: Option<Timeout>,
    /// Message format tag from `content-type`.
    pub format: MessageFormat,
    /// Message encoding from `grpc-encoding`.
    pub encoding: Option<Compression>,
    /// Encodings the client accepts, from `grpc-accept-encoding`.
    pub accept_encoding: Vec<Compression>,
    /// `user-agent`, if sent.
    pub user_agent: Option<String>,
    /// Decoded `grpc-trace-bin` trace context.
    pub trace_context: Option<Bytes>,
    /// Custom application metadata.
    pub metadata: Vec<CustomMetadata>,
    /// Headers this engine does not recognize, preserved in order.
    pub unrecognized: Vec<RawHeader>,
}

impl RequestHeaders {
    /// Serialize into wire headers, pseudo-headers first.
    pub fn to_wire(&self, path: &Path, scheme: &str, authority: &str) -> RawHeaders {
        let mut out = RawHeaders::new();
        out.push(&b":method"[..], &b"POST"[..]);
        out.push(&b":scheme"[..], Bytes::copy_from_slice(scheme.as_bytes()));
        out.push(
            &b":path"[..],
            Bytes::from(path.to_string().into_bytes()),
        );
        out.push(
            &b":authority"[..],
            Bytes::copy_from_slice(authority.as_bytes()),
        );
        out.push(&b"te"[..], &b"trailers"[..]);
        out.push(
            &b"content-type"[..],
            Bytes::from(self.format.content_type().into_bytes()),
        );
        if let Some(agent) = &self.user_agent {
            out.push(
                &b"user-agent"[..],
                Bytes::copy_from_slice(agent.as_bytes()),
            );
        }
        if let Some(timeout) = self.timeout {
            out.push(
                &b"grpc-timeout"[..],
                Bytes::from(timeout.wire_value().into_bytes()),
            );
        }
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
        if let Some(trace) = &self.trace_context {
            out.push(
                &b"grpc-trace-bin"[..],
                Bytes::from(metadata::base64_encode(trace).into_bytes()),
            );
        }
        extend_with_metadata(&mut out, &self.metadata);
        extend_with_raw(&mut out, &self.unrecognized);
        out
    }
}

/// Parse a request head. Never fails: problems accumulate alongside a
/// best-effort record.
pub fn parse_request_headers(raw: &RawHeaders) -> (RequestHeaders, InvalidHeaders) {
    let mut headers = RequestHeaders::default();
    let mut invalid = InvalidHeaders::new();
    let mut saw_content_type = false;

    for header in raw.iter() {
        let name = &header.name[..];
        let value = &header.value[..];
        match name {
            // Pseudo-headers are owned by the role adapters.
            _ if name.starts_with(b":") => {}
            b"te" => {
                if trim_ascii(value) != b"trailers" {
                    invalid.invalid(
                        header.name.clone(),
                        header.value.clone(),
                        "te must be \"trailers\"".to_string(),
                    );
                }
            }
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
            b"grpc-timeout" => match Timeout::parse(trim_ascii(value)) {
                Some(timeout) if headers.timeout.is_none() => headers.timeout = Some(timeout),
                Some(_) => invalid.invalid(
                    header.name.clone(),
                    header.value.clone(),
                    "duplicate grpc-timeout".to_string(),
                ),
                None => invalid.invalid(
                    header.name.clone(),
                    header.value.clone(),
                    "malformed grpc-timeout".to_string(),
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
            // Mergeable list: repeated occurrences append.
            b"grpc-accept-encoding" => {
                parse_encoding_list(value, &mut headers.accept_encoding)
            }
            b"user-agent" => match std::str::from_utf8(value) {
                Ok(agent) if headers.user_agent.is_none() => {
                    headers.user_agent = Some(agent.to_string());
                }
                Ok(_) => invalid.invalid(
                    header.name.clone(),
                    header.value.clone(),
                    "duplicate user-agent".to_string(),
                ),
                Err(_) => invalid.invalid(
                    header.name.clone(),
                    header.value.clone(),
                    "user-agent is not utf-8".to_string(),
                ),
            },
            b"grpc-trace-bin" => match metadata::base64_decode(value) {
                Ok(trace) if headers.trace_context.is_none() => {
                    headers.trace_context = Some(Bytes::from(trace));
                }
                Ok(_) => invalid.invalid(
                    header.name.clone(),
                    header.value.clone(),
                    "duplicate grpc-trace-bin".to_string(),
                ),
                Err(err) => invalid.invalid(
                    header.name.clone(),
                    header.value.clone(),
                    err.to_string(),
                ),
            },
            // Response-only protocol headers must not appear here.
            b"grpc-status" | b"grpc-message" => invalid.unexpected(header.name.clone()),
            _ => absorb_custom(
                header,
                &mut headers.metadata,
                &mut headers.unrecognized,
                &mut invalid,
            ),
        }
    }

    if !saw_content_type {
        invalid.missing("content-type");
    }

    (headers, invalid)
}
