//! # callwire
//!
//! A gRPC call engine: the per-call state machine that sits on top of an
//! abstract HTTP/2 stream and implements the gRPC wire protocol for both
//! the client and the server role.
//!
//! The engine owns header negotiation, length-prefixed message framing,
//! trailers (including the Trailers-Only shortcut) and the full-duplex
//! concurrency that lets an application send and receive simultaneously.
//! It does **not** own the HTTP/2 frame layer, TLS, or message
//! serialization; those are external collaborators behind the
//! [`transport`] handles and opaque `Bytes` payloads.
//!
//! ## Architecture
//!
//! ```text
//! bytes ◄─► framing ◄─► channel workers ◄─► Call facade ◄─► handler
//! ```
//!
//! Each open call owns two worker tasks, one per direction, coupled to
//! the facade through bounded queues. Headers flow once at each
//! boundary; trailers flow once at the tail; messages flow in between.
//!
//! ## Example
//!
//! ```ignore
//! use callwire::{initiate_request, CallConfig, Path, RequestHeaders};
//!
//! let mut call = initiate_request(&conn, Path::new("Greeter", "SayHello"),
//!     RequestHeaders::default(), &CallConfig::default())?;
//! call.send_final_output(&b"name=world"[..]).await?;
//! let reply = call.recv_next_input().await?;
//! ```

pub mod call;
pub mod channel;
pub mod client;
pub mod error;
pub mod framing;
pub mod headers;
pub mod metadata;
pub mod server;
pub mod status;
pub mod transport;

pub use call::{Call, CallConfig};
pub use channel::{Channel, ClientSession, NoMetadata, ServerSession, Session, StreamElem};
pub use client::initiate_request;
pub use error::{CallError, Result};
pub use headers::{Path, RequestHeaders, ResponseHeaders, Trailers};
pub use metadata::{CustomMetadata, HeaderName};
pub use server::{accept_call, serve_call, HandlerMap};
pub use status::{GrpcException, StatusCode};
