//! Headers module - typed gRPC header records and their wire forms.
//!
//! This module implements the header layer of the protocol:
//! - request/response head parsing and serialization
//! - trailers (`grpc-status`, `grpc-message`, trailing metadata)
//! - invalid-header accumulation (parsing never fails silently)
//! - `grpc-timeout` deadlines and content-type format tags
//!
//! Parsers take a [`RawHeaders`](crate::transport::RawHeaders) list and
//! return a best-effort typed record plus an [`InvalidHeaders`]
//! accumulator; callers decide whether accumulated problems are fatal.

mod invalid;
mod request;
mod response;
mod timeout;
mod trailers;

pub use invalid::{InvalidHeader, InvalidHeaders};
pub use request::{parse_request_headers, RequestHeaders};
pub use response::{parse_response_headers, ResponseHeaders};
pub use timeout::{Timeout, TimeoutUnit};
pub use trailers::{parse_trailers, serialize_trailers, serialize_trailers_only, Trailers};

pub(crate) use trailers::parse_trailers_only;

use bytes::Bytes;

use crate::metadata::{CustomMetadata, HeaderName, MetadataError};
use crate::transport::{RawHeader, RawHeaders};

/// The bare gRPC content type; a `+<format>` suffix tags the message
/// serialization format.
pub const CONTENT_TYPE_GRPC: &str = "application/grpc";

/// A service/method pair, rendered on the wire as `/<service>/<method>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Path {
    /// Fully qualified service name.
    pub service: String,
    /// Method name within the service.
    pub method: String,
}

impl Path {
    /// Build a path from its parts.
    pub fn new(service: impl Into<String>, method: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            method: method.into(),
        }
    }

    /// Parse a `:path` pseudo-header value.
    ///
    /// Returns `None` unless the value is `/<service>/<method>` with both
    /// parts non-empty ASCII.
    pub fn parse(raw: &[u8]) -> Option<Self> {
        let raw = std::str::from_utf8(raw).ok()?;
        let rest = raw.strip_prefix('/')?;
        let (service, method) = rest.split_once('/')?;
        if service.is_empty() || method.is_empty() || method.contains('/') {
            return None;
        }
        if !rest.is_ascii() {
            return None;
        }
        Some(Self::new(service, method))
    }
}

impl std::fmt::Display for Path {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "/{}/{}", self.service, self.method)
    }
}

/// Message-encoding identifier negotiated via `grpc-encoding` /
/// `grpc-accept-encoding`.
///
/// The engine does not compress; it validates the per-envelope compressed
/// flag against the negotiated encoding and hands the name to an external
/// compressor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Compression {
    /// No transformation.
    Identity,
    /// gzip.
    Gzip,
    /// zlib/deflate.
    Deflate,
    /// Snappy.
    Snappy,
    /// Zstandard.
    Zstd,
    /// An encoding this engine has no built-in name for.
    Other(String),
}

impl Compression {
    /// Parse a single `grpc-encoding` token.
    pub fn from_name(name: &[u8]) -> Self {
        match name {
            b"identity" => Compression::Identity,
            b"gzip" => Compression::Gzip,
            b"deflate" => Compression::Deflate,
            b"snappy" => Compression::Snappy,
            b"zstd" => Compression::Zstd,
            other => Compression::Other(String::from_utf8_lossy(other).into_owned()),
        }
    }

    /// The wire token for this encoding.
    pub fn name(&self) -> &str {
        match self {
            Compression::Identity => "identity",
            Compression::Gzip => "gzip",
            Compression::Deflate => "deflate",
            Compression::Snappy => "snappy",
            Compression::Zstd => "zstd",
            Compression::Other(name) => name,
        }
    }

    /// Whether envelopes under this encoding may set the compressed flag.
    pub fn allows_compressed_flag(&self) -> bool {
        !matches!(self, Compression::Identity)
    }
}

/// Parse a comma-separated `grpc-accept-encoding` list.
pub(crate) fn parse_encoding_list(value: &[u8], out: &mut Vec<Compression>) {
    for token in value.split(|b| *b == b',') {
        let token = trim_ascii(token);
        if !token.is_empty() {
            out.push(Compression::from_name(token));
        }
    }
}

/// Join an encoding list back into its wire form.
pub(crate) fn encoding_list_value(encodings: &[Compression]) -> String {
    encodings
        .iter()
        .map(Compression::name)
        .collect::<Vec<_>>()
        .join(",")
}

/// The message serialization format tag carried in `content-type`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum MessageFormat {
    /// Bare `application/grpc`.
    #[default]
    Unspecified,
    /// `application/grpc+<tag>`, e.g. `proto` or `json`.
    Tagged(String),
}

impl MessageFormat {
    /// Render the `content-type` header value.
    pub fn content_type(&self) -> String {
        match self {
            MessageFormat::Unspecified => CONTENT_TYPE_GRPC.to_string(),
            MessageFormat::Tagged(tag) => format!("{CONTENT_TYPE_GRPC}+{tag}"),
        }
    }

    /// Parse a `content-type` value; `None` if it is not a gRPC one.
    pub fn from_content_type(value: &[u8]) -> Option<Self> {
        let value = std::str::from_utf8(value).ok()?;
        let rest = value.strip_prefix(CONTENT_TYPE_GRPC)?;
        if rest.is_empty() {
            return Some(MessageFormat::Unspecified);
        }
        let tag = rest.strip_prefix('+')?;
        if tag.is_empty() {
            return None;
        }
        Some(MessageFormat::Tagged(tag.to_string()))
    }
}

pub(crate) fn trim_ascii(value: &[u8]) -> &[u8] {
    let start = value
        .iter()
        .position(|b| *b != b' ' && *b != b'\t')
        .unwrap_or(value.len());
    let end = value
        .iter()
        .rposition(|b| *b != b' ' && *b != b'\t')
        .map(|i| i + 1)
        .unwrap_or(start);
    &value[start..end]
}

/// Classify one unconsumed header: custom metadata if its name validates,
/// otherwise `unrecognized` (unknown `grpc-*`) or an invalid entry.
pub(crate) fn absorb_custom(
    header: &RawHeader,
    metadata: &mut Vec<CustomMetadata>,
    unrecognized: &mut Vec<RawHeader>,
    invalid: &mut InvalidHeaders,
) {
    match HeaderName::new(&header.name) {
        Ok(name) => match CustomMetadata::from_wire(name, &header.value) {
            Ok(entry) => metadata.push(entry),
            Err(err) => invalid.invalid(header.name.clone(), header.value.clone(), err.to_string()),
        },
        // Unknown protocol-namespace headers are kept, not rejected:
        // future protocol extensions must pass through untouched.
        Err(MetadataError::GrpcPrefix) | Err(MetadataError::ReservedName(_)) => {
            unrecognized.push(header.clone());
        }
        Err(err) => {
            invalid.invalid(header.name.clone(), header.value.clone(), err.to_string());
        }
    }
}

/// Append custom metadata entries in their wire form.
pub(crate) fn extend_with_metadata(out: &mut RawHeaders, metadata: &[CustomMetadata]) {
    for entry in metadata {
        out.push(
            Bytes::copy_from_slice(entry.name().as_str().as_bytes()),
            entry.wire_value(),
        );
    }
}

/// Append the unrecognized bucket verbatim.
pub(crate) fn extend_with_raw(out: &mut RawHeaders, raw: &[RawHeader]) {
    for header in raw {
        out.push(header.name.clone(), header.value.clone());
    }
}
