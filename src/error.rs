//! Error types for the call engine.

use thiserror::Error;

use crate::status::GrpcException;

/// Main error type for all call operations.
#[derive(Debug, Error)]
pub enum CallError {
    /// I/O error from the underlying transport.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Typed protocol error carried as `grpc-status` trailers.
    #[error(transparent)]
    Grpc(#[from] GrpcException),

    /// Failure before the handler was invoked (bad headers, unknown
    /// method). Eligible for retry by an external policy.
    #[error("call setup failed (HTTP {http_status}): {grpc}")]
    SetupFailure {
        /// HTTP status the server reported (or would report).
        http_status: u16,
        /// The gRPC status sent with the Trailers-Only reply.
        grpc: GrpcException,
    },

    /// The client dropped mid-call.
    #[error("client disconnected")]
    ClientDisconnected,

    /// The server dropped mid-call.
    #[error("server disconnected")]
    ServerDisconnected,

    /// The call was used after its terminal event.
    #[error("call already terminated")]
    HandlerTerminated,

    /// The response was already initiated; initial metadata and
    /// Trailers-Only are no longer possible.
    #[error("response already initiated")]
    ResponseAlreadyInitiated,

    /// The peer omitted a required pseudo-header.
    #[error("peer did not send required pseudo-header {0}")]
    MissingPseudoHeader(&'static str),

    /// A terminal input element was required but a streaming one arrived.
    #[error("expected a final input element, got a streaming one")]
    UnexpectedNonFinalInput,

    /// The input stream ended before the expected message arrived.
    #[error("input stream ended before the expected message")]
    MissingInput,

    /// A non-streaming receive observed more than one input message.
    #[error("expected exactly one input message, got more")]
    UnexpectedExtraInput,

    /// The response head was missing mandatory gRPC fields.
    #[error("invalid response headers: {0}")]
    ResponseHeadersInvalid(String),

    /// Wire protocol violation (malformed frame, bad sequencing).
    #[error("protocol error: {0}")]
    Protocol(String),
}

/// Result type alias using CallError.
pub type Result<T> = std::result::Result<T, CallError>;
