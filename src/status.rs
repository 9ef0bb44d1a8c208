//! gRPC status codes and the typed protocol exception.

use std::fmt;

use crate::metadata::CustomMetadata;

/// The gRPC status code carried in `grpc-status` trailers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatusCode {
    /// Not an error.
    Ok,
    /// The operation was cancelled, typically by the caller.
    Cancelled,
    /// Unknown error, including unmapped peer errors.
    Unknown,
    /// The client specified an invalid argument.
    InvalidArgument,
    /// The deadline expired before the operation could complete.
    DeadlineExceeded,
    /// A requested entity was not found.
    NotFound,
    /// The entity a client attempted to create already exists.
    AlreadyExists,
    /// The caller lacks permission for the operation.
    PermissionDenied,
    /// A resource (quota, message size, queue) has been exhausted.
    ResourceExhausted,
    /// The system is not in a state required for the operation.
    FailedPrecondition,
    /// The operation was aborted, e.g. a concurrency conflict.
    Aborted,
    /// The operation was attempted past the valid range.
    OutOfRange,
    /// The operation is not implemented or supported.
    Unimplemented,
    /// An invariant expected by the underlying system was broken.
    Internal,
    /// The service is currently unavailable.
    Unavailable,
    /// Unrecoverable data loss or corruption.
    DataLoss,
    /// The request lacks valid authentication credentials.
    Unauthenticated,
}

impl StatusCode {
    /// The wire integer written to `grpc-status`.
    pub const fn code(self) -> u32 {
        match self {
            StatusCode::Ok => 0,
            StatusCode::Cancelled => 1,
            StatusCode::Unknown => 2,
            StatusCode::InvalidArgument => 3,
            StatusCode::DeadlineExceeded => 4,
            StatusCode::NotFound => 5,
            StatusCode::AlreadyExists => 6,
            StatusCode::PermissionDenied => 7,
            StatusCode::ResourceExhausted => 8,
            StatusCode::FailedPrecondition => 9,
            StatusCode::Aborted => 10,
            StatusCode::OutOfRange => 11,
            StatusCode::Unimplemented => 12,
            StatusCode::Internal => 13,
            StatusCode::Unavailable => 14,
            StatusCode::DataLoss => 15,
            StatusCode::Unauthenticated => 16,
        }
    }

    /// Decode a `grpc-status` integer. Codes outside the defined range
    /// are treated as [`StatusCode::Unknown`].
    pub const fn from_code(code: u32) -> StatusCode {
        match code {
            0 => StatusCode::Ok,
            1 => StatusCode::Cancelled,
            2 => StatusCode::Unknown,
            3 => StatusCode::InvalidArgument,
            4 => StatusCode::DeadlineExceeded,
            5 => StatusCode::NotFound,
            6 => StatusCode::AlreadyExists,
            7 => StatusCode::PermissionDenied,
            8 => StatusCode::ResourceExhausted,
            9 => StatusCode::FailedPrecondition,
            10 => StatusCode::Aborted,
            11 => StatusCode::OutOfRange,
            12 => StatusCode::Unimplemented,
            13 => StatusCode::Internal,
            14 => StatusCode::Unavailable,
            15 => StatusCode::DataLoss,
            16 => StatusCode::Unauthenticated,
            _ => StatusCode::Unknown,
        }
    }

    /// Map an HTTP status (from a non-200 response head or an
    /// invalid-header reply) to the gRPC status a peer should observe.
    pub const fn from_http(status: u16) -> StatusCode {
        match status {
            200 => StatusCode::Ok,
            400 | 415 => StatusCode::Internal,
            401 => StatusCode::Unauthenticated,
            403 => StatusCode::PermissionDenied,
            404 => StatusCode::Unimplemented,
            429 | 502 | 503 | 504 => StatusCode::Unavailable,
            _ => StatusCode::Unknown,
        }
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// An intentional, typed protocol error raised by a handler or by the
/// engine itself, mapped to `grpc-status` trailers on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GrpcException {
    /// Status code for the `grpc-status` trailer.
    pub status: StatusCode,
    /// Optional human-readable detail for `grpc-message`.
    pub message: Option<String>,
    /// Trailing custom metadata attached to the error.
    pub metadata: Vec<CustomMetadata>,
}

impl GrpcException {
    /// An exception with no message or metadata.
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            message: None,
            metadata: Vec::new(),
        }
    }

    /// Attach a `grpc-message` detail.
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    /// Attach trailing custom metadata.
    pub fn with_metadata(mut self, metadata: Vec<CustomMetadata>) -> Self {
        self.metadata = metadata;
        self
    }
}

impl fmt::Display for GrpcException {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.message {
            Some(msg) => write!(f, "{}: {}", self.status, msg),
            None => write!(f, "{}", self.status),
        }
    }
}

impl std::error::Error for GrpcException {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_code_round_trip() {
        for code in 0u32..=16 {
            let status = StatusCode::from_code(code);
            assert_eq!(status.code(), code);
        }
    }

    #[test]
    fn test_unknown_codes_map_to_unknown() {
        assert_eq!(StatusCode::from_code(17), StatusCode::Unknown);
        assert_eq!(StatusCode::from_code(u32::MAX), StatusCode::Unknown);
    }

    #[test]
    fn test_http_mapping() {
        assert_eq!(StatusCode::from_http(200), StatusCode::Ok);
        assert_eq!(StatusCode::from_http(400), StatusCode::Internal);
        assert_eq!(StatusCode::from_http(401), StatusCode::Unauthenticated);
        assert_eq!(StatusCode::from_http(404), StatusCode::Unimplemented);
        assert_eq!(StatusCode::from_http(503), StatusCode::Unavailable);
        assert_eq!(StatusCode::from_http(418), StatusCode::Unknown);
    }

    #[test]
    fn test_exception_display() {
        let plain = GrpcException::new(StatusCode::NotFound);
        assert_eq!(plain.to_string(), "NotFound");

        let detailed = GrpcException::new(StatusCode::Unimplemented).with_message("no such method");
        assert_eq!(detailed.to_string(), "Unimplemented: no such method");
    }
}
