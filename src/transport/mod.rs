//! Transport module - abstract HTTP/2 stream handles.
//!
//! The engine never touches frames, flow control or sockets. It consumes
//! per-stream handles that a real HTTP/2 binding feeds:
//!
//! - client side: [`H2Conn::open_request`] returns a body writer and a
//!   response reader for one stream;
//! - server side: the binding hands the engine a [`ConnectionToClient`]
//!   per accepted stream.
//!
//! The handles are bounded channels, so writers see backpressure when the
//! peer (or the binding's flow control) is slow. A writer dropped without
//! a clean end-of-stream frame is observed by the reader as a reset, not
//! as a normal end.
//!
//! The [`mem`] submodule provides a connected in-process pair used by the
//! test suite and for loopback calls.

use bytes::Bytes;
use tokio::sync::mpsc;

/// Capacity of the per-direction frame queues in the in-memory transport.
pub const DEFAULT_STREAM_CAPACITY: usize = 32;

/// One raw header as it appears on the wire: name and value byte strings.
///
/// Names are expected lowercase (HTTP/2 rule); values are opaque.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawHeader {
    /// Header name bytes.
    pub name: Bytes,
    /// Header value bytes.
    pub value: Bytes,
}

/// An ordered list of raw headers. Duplicate names are preserved in
/// arrival order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawHeaders {
    entries: Vec<RawHeader>,
}

impl RawHeaders {
    /// Create an empty header list.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a header.
    pub fn push(&mut self, name: impl Into<Bytes>, value: impl Into<Bytes>) {
        self.entries.push(RawHeader {
            name: name.into(),
            value: value.into(),
        });
    }

    /// First value under `name`, if any.
    pub fn get(&self, name: &[u8]) -> Option<&[u8]> {
        self.entries
            .iter()
            .find(|h| h.name == name)
            .map(|h| &h.value[..])
    }

    /// All values under `name`, in arrival order.
    pub fn get_all<'a>(&'a self, name: &'a [u8]) -> impl Iterator<Item = &'a [u8]> + 'a {
        self.entries
            .iter()
            .filter(move |h| h.name == name)
            .map(|h| &h.value[..])
    }

    /// Iterate over all entries in arrival order.
    pub fn iter(&self) -> impl Iterator<Item = &RawHeader> {
        self.entries.iter()
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the list is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl IntoIterator for RawHeaders {
    type Item = RawHeader;
    type IntoIter = std::vec::IntoIter<RawHeader>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

impl Extend<RawHeader> for RawHeaders {
    fn extend<T: IntoIterator<Item = RawHeader>>(&mut self, iter: T) {
        self.entries.extend(iter);
    }
}

/// A frame on the request (client → server) direction of a stream.
///
/// Request headers are not a frame here: they travel with
/// [`H2Conn::open_request`] and arrive as [`ConnectionToClient::head`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestFrame {
    /// A chunk of the request body.
    Data(Bytes),
    /// Clean half-close: no more request data will follow.
    End,
}

/// A frame on the response (server → client) direction of a stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponseFrame {
    /// The response head. With `end_stream` set this is a Trailers-Only
    /// response: a single HEADERS frame closing the stream.
    Headers {
        /// Response headers (including `:status`).
        headers: RawHeaders,
        /// Whether the stream ends with this frame.
        end_stream: bool,
    },
    /// A chunk of the response body.
    Data(Bytes),
    /// Trailing headers; closes the stream.
    Trailers(RawHeaders),
}

/// Error returned when writing to a stream whose peer side is gone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamClosed;

impl std::fmt::Display for StreamClosed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("stream closed by peer")
    }
}

impl std::error::Error for StreamClosed {}

/// Write half of the request body, owned by the client's outbound worker.
#[derive(Debug)]
pub struct RequestWriter {
    tx: mpsc::Sender<RequestFrame>,
}

impl RequestWriter {
    /// Send one request frame; waits when the stream is backpressured.
    pub async fn send(&self, frame: RequestFrame) -> Result<(), StreamClosed> {
        self.tx.send(frame).await.map_err(|_| StreamClosed)
    }
}

/// Read half of the request body, owned by the server's inbound worker.
#[derive(Debug)]
pub struct BodyReader {
    rx: mpsc::Receiver<RequestFrame>,
}

impl BodyReader {
    /// Next request frame. `None` means the peer vanished without a clean
    /// [`RequestFrame::End`] - a stream reset.
    pub async fn next_frame(&mut self) -> Option<RequestFrame> {
        self.rx.recv().await
    }
}

/// Write half of the response, owned by the server's outbound worker.
#[derive(Debug)]
pub struct ResponseWriter {
    tx: mpsc::Sender<ResponseFrame>,
}

impl ResponseWriter {
    /// Send one response frame; waits when the stream is backpressured.
    pub async fn send(&self, frame: ResponseFrame) -> Result<(), StreamClosed> {
        self.tx.send(frame).await.map_err(|_| StreamClosed)
    }
}

/// Read half of the response, owned by the client's inbound worker.
#[derive(Debug)]
pub struct ResponseReader {
    rx: mpsc::Receiver<ResponseFrame>,
}

impl ResponseReader {
    /// Next response frame. `None` before trailers (or before a
    /// Trailers-Only head) is a stream reset.
    pub async fn next_frame(&mut self) -> Option<ResponseFrame> {
        self.rx.recv().await
    }
}

/// One accepted stream, as handed to the server role adapter.
#[derive(Debug)]
pub struct ConnectionToClient {
    /// Request head: pseudo-headers plus regular headers.
    pub head: RawHeaders,
    /// The request body and half-close signal.
    pub body: BodyReader,
    /// Where the response is written.
    pub respond: ResponseWriter,
}

/// One opened stream, as handed to the client role adapter.
#[derive(Debug)]
pub struct ConnectionToServer {
    /// Where the request body is written.
    pub body: RequestWriter,
    /// The response head, body and trailers.
    pub response: ResponseReader,
}

/// An HTTP/2 connection capable of opening request streams.
///
/// Implemented by transport bindings; the engine only ever calls
/// [`open_request`](H2Conn::open_request) and reads the connection's
/// scheme/authority for pseudo-header construction.
pub trait H2Conn: Send + Sync {
    /// `http` or `https`, for the `:scheme` pseudo-header.
    fn scheme(&self) -> &str;

    /// Host for the `:authority` pseudo-header.
    fn authority(&self) -> &str;

    /// Open a new stream carrying `head` as the request HEADERS frame.
    fn open_request(&self, head: RawHeaders) -> std::io::Result<ConnectionToServer>;
}

/// In-memory transport: a connected client/server pair over bounded
/// channels, one stream per `open_request`.
pub mod mem {
    use super::*;

    /// Client half of an in-memory connection.
    #[derive(Debug)]
    pub struct MemConn {
        authority: String,
        capacity: usize,
        accept_tx: mpsc::UnboundedSender<ConnectionToClient>,
    }

    /// Server half of an in-memory connection; yields one
    /// [`ConnectionToClient`] per stream the client opens.
    #[derive(Debug)]
    pub struct MemListener {
        accept_rx: mpsc::UnboundedReceiver<ConnectionToClient>,
    }

    /// Create a connected pair with the default per-stream capacity.
    pub fn pair() -> (MemConn, MemListener) {
        pair_with_capacity(DEFAULT_STREAM_CAPACITY)
    }

    /// Create a connected pair with a custom per-stream frame capacity.
    pub fn pair_with_capacity(capacity: usize) -> (MemConn, MemListener) {
        let (accept_tx, accept_rx) = mpsc::unbounded_channel();
        (
            MemConn {
                authority: "in-process".to_string(),
                capacity,
                accept_tx,
            },
            MemListener { accept_rx },
        )
    }

    impl H2Conn for MemConn {
        fn scheme(&self) -> &str {
            "http"
        }

        fn authority(&self) -> &str {
            &self.authority
        }

        fn open_request(&self, head: RawHeaders) -> std::io::Result<ConnectionToServer> {
            let (req_tx, req_rx) = mpsc::channel(self.capacity);
            let (resp_tx, resp_rx) = mpsc::channel(self.capacity);
            let accepted = ConnectionToClient {
                head,
                body: BodyReader { rx: req_rx },
                respond: ResponseWriter { tx: resp_tx },
            };
            self.accept_tx.send(accepted).map_err(|_| {
                std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "listener closed")
            })?;
            Ok(ConnectionToServer {
                body: RequestWriter { tx: req_tx },
                response: ResponseReader { rx: resp_rx },
            })
        }
    }

    impl MemListener {
        /// Wait for the next stream the client opens. `None` once the
        /// client half is gone.
        pub async fn accept(&mut self) -> Option<ConnectionToClient> {
            self.accept_rx.recv().await
        }
    }
}
