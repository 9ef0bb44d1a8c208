//! Channel module - the symmetric per-call session channel.
//!
//! A [`Channel`] is the typed view of one HTTP/2 stream: two independent
//! directions, each carrying headers once, then ordered messages, then
//! end-of-stream metadata. The client and server roles use the same
//! machinery with the direction types swapped, selected by the
//! [`Session`] capability trait.
//!
//! Each direction couples user-facing queue operations to a background
//! worker through a bounded FIFO:
//!
//! ```text
//! facade send ─► OutboundQueue ─► outbound worker ─► transport
//! facade recv ◄─ InboundQueue  ◄─ inbound worker  ◄─ transport
//! ```
//!
//! Workers own their side's transport handle exclusively. Failures are
//! recorded in a per-direction fault slot and surface on the next queue
//! operation; they never tear the other direction down.

mod slot;

pub(crate) use slot::{slot, SlotReader, SlotWriter};

use std::sync::{Arc, Mutex};

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::{CallError, Result};
use crate::framing::Envelope;
use crate::headers::{Compression, RequestHeaders, ResponseHeaders, Trailers};
use crate::status::{GrpcException, StatusCode};

/// End-of-stream marker for directions that carry no trailing metadata
/// (the request direction: a client half-close is just an empty DATA
/// frame boundary).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NoMetadata;

/// One element of a message stream: a message, the final message fused
/// with end-of-stream metadata, or the end-of-stream metadata alone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamElem<A, B = NoMetadata> {
    /// Another message; more may follow.
    Elem(A),
    /// The last message, fused with the end-of-stream metadata.
    FinalElem(A, B),
    /// End-of-stream metadata with no further message.
    NoMoreElems(B),
}

impl<A, B> StreamElem<A, B> {
    /// Whether this element ends the stream.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, StreamElem::Elem(_))
    }

    /// The message carried by this element, if any.
    pub fn message(&self) -> Option<&A> {
        match self {
            StreamElem::Elem(msg) | StreamElem::FinalElem(msg, _) => Some(msg),
            StreamElem::NoMoreElems(_) => None,
        }
    }
}

/// The capability set that lets a [`Channel`] be used symmetrically by
/// client or server code: the per-role direction types and role-specific
/// call state.
pub trait Session: Send + Sync + 'static {
    /// Headers parsed from the inbound direction.
    type InboundHeaders: std::fmt::Debug + Send + Sync + 'static;
    /// End-of-stream metadata on the inbound direction.
    type InboundTrailers: std::fmt::Debug + Clone + Send + 'static;
    /// End-of-stream metadata on the outbound direction.
    type OutboundTrailers: std::fmt::Debug + Send + 'static;
    /// Role-specific state carried by the call facade.
    type Context: std::fmt::Debug + Send + 'static;

    /// The error surfaced when the peer drops mid-call.
    fn peer_disconnected() -> CallError;
}

/// Client role: sends a request body, receives response headers,
/// messages and trailers.
#[derive(Debug, Clone, Copy)]
pub struct ClientSession;

impl Session for ClientSession {
    type InboundHeaders = ResponseHeaders;
    type InboundTrailers = Trailers;
    type OutboundTrailers = NoMetadata;
    type Context = crate::call::ClientContext;

    fn peer_disconnected() -> CallError {
        CallError::ServerDisconnected
    }
}

/// Server role: receives a request body, sends response headers,
/// messages and trailers.
#[derive(Debug, Clone, Copy)]
pub struct ServerSession;

impl Session for ServerSession {
    type InboundHeaders = RequestHeaders;
    type InboundTrailers = NoMetadata;
    type OutboundTrailers = Trailers;
    type Context = crate::call::ServerContext;

    fn peer_disconnected() -> CallError {
        CallError::ClientDisconnected
    }
}

/// How the server's outbound worker opens the response, decided exactly
/// once per call by the response-initiation latch.
#[derive(Debug)]
pub(crate) enum ResponseStart {
    /// Streaming response: HEADERS now, DATA and trailing HEADERS later.
    Streaming(ResponseHeaders),
    /// Trailers-Only: one HEADERS frame with end-of-stream.
    TrailersOnly {
        http_status: u16,
        headers: ResponseHeaders,
        trailers: Trailers,
    },
}

/// A failure recorded by a worker, replayed to every subsequent queue
/// operation on that direction.
#[derive(Debug, Clone)]
pub(crate) enum ChannelFault {
    /// The peer vanished mid-stream.
    Disconnected,
    /// A typed protocol error (bad envelope, deadline, bad encoding).
    Grpc(GrpcException),
    /// The response head was not a usable gRPC head.
    InvalidResponseHead(String),
    /// Wire-level sequencing violation.
    Protocol(String),
}

impl ChannelFault {
    fn into_error<S: Session>(self) -> CallError {
        match self {
            ChannelFault::Disconnected => S::peer_disconnected(),
            ChannelFault::Grpc(exc) => CallError::Grpc(exc),
            ChannelFault::InvalidResponseHead(detail) => {
                CallError::ResponseHeadersInvalid(detail)
            }
            ChannelFault::Protocol(detail) => CallError::Protocol(detail),
        }
    }
}

/// Shared, first-write-wins fault cell for one direction.
#[derive(Debug, Clone, Default)]
pub(crate) struct FaultSlot {
    fault: Arc<Mutex<Option<ChannelFault>>>,
}

impl FaultSlot {
    /// Record a fault; later faults on the same direction are dropped so
    /// the caller always sees the first failure.
    pub fn set(&self, fault: ChannelFault) {
        let mut slot = self.fault.lock().expect("fault slot poisoned");
        if slot.is_none() {
            *slot = Some(fault);
        }
    }

    pub fn get(&self) -> Option<ChannelFault> {
        self.fault.lock().expect("fault slot poisoned").clone()
    }
}

/// Validate an inbound envelope against the negotiated encoding and
/// strip it to its payload.
pub(crate) fn accept_envelope(
    envelope: Envelope,
    encoding: Option<&Compression>,
) -> std::result::Result<Bytes, ChannelFault> {
    if !envelope.compressed {
        return Ok(envelope.payload);
    }
    match encoding {
        Some(compression) if compression.allows_compressed_flag() => Ok(envelope.payload),
        Some(compression) => Err(ChannelFault::Grpc(
            GrpcException::new(StatusCode::Unimplemented).with_message(format!(
                "compressed message under {} encoding",
                compression.name()
            )),
        )),
        None => Err(ChannelFault::Grpc(
            GrpcException::new(StatusCode::Unimplemented)
                .with_message("compressed message without negotiated encoding"),
        )),
    }
}

/// Worker-side handle for one inbound direction: the headers slot, the
/// element queue and the fault cell.
pub(crate) struct InboundSink<S: Session> {
    headers: SlotWriter<S::InboundHeaders>,
    tx: mpsc::Sender<StreamElem<Bytes, S::InboundTrailers>>,
    fault: FaultSlot,
}

impl<S: Session> InboundSink<S> {
    /// Publish the parsed inbound headers. Returns `false` if they were
    /// already published.
    pub fn set_headers(&self, headers: S::InboundHeaders) -> bool {
        self.headers.set(headers)
    }

    /// Enqueue one element; waits under backpressure. Returns `false`
    /// when the consumer is gone and the worker should stop.
    pub async fn push(&self, elem: StreamElem<Bytes, S::InboundTrailers>) -> bool {
        self.tx.send(elem).await.is_ok()
    }

    /// Record a failure; the consumer observes it once the queue drains.
    pub fn fail(&self, fault: ChannelFault) {
        self.fault.set(fault);
    }
}

/// Consumer side of the inbound direction.
#[derive(Debug)]
pub(crate) struct InboundQueue<S: Session> {
    headers: SlotReader<S::InboundHeaders>,
    rx: mpsc::Receiver<StreamElem<Bytes, S::InboundTrailers>>,
    fault: FaultSlot,
    /// End-of-stream metadata, kept so receives stay at end-of-stream.
    finished: Option<S::InboundTrailers>,
    locally_closed: bool,
}

impl<S: Session> InboundQueue<S> {
    /// Wait for the inbound headers.
    pub async fn headers(&mut self) -> Result<Arc<S::InboundHeaders>> {
        if let Some(headers) = self.headers.get().await {
            return Ok(headers);
        }
        match self.fault.get() {
            Some(fault) => Err(fault.into_error::<S>()),
            None if self.locally_closed => Err(CallError::HandlerTerminated),
            None => Err(S::peer_disconnected()),
        }
    }

    /// Receive the next element. Sticky at end-of-stream; surfaces the
    /// direction's fault after the queue drains.
    pub async fn recv(&mut self) -> Result<StreamElem<Bytes, S::InboundTrailers>> {
        if let Some(trailers) = &self.finished {
            return Ok(StreamElem::NoMoreElems(trailers.clone()));
        }
        match self.rx.recv().await {
            Some(elem) => {
                match &elem {
                    StreamElem::FinalElem(_, trailers) | StreamElem::NoMoreElems(trailers) => {
                        self.finished = Some(trailers.clone());
                    }
                    StreamElem::Elem(_) => {}
                }
                Ok(elem)
            }
            None => match self.fault.get() {
                Some(fault) => Err(fault.into_error::<S>()),
                None if self.locally_closed => Err(CallError::HandlerTerminated),
                // A clean end always arrives as an element; a bare queue
                // closure means the worker died with the peer.
                None => Err(S::peer_disconnected()),
            },
        }
    }

    fn close(&mut self) {
        self.locally_closed = true;
        self.rx.close();
    }
}

/// Producer side of the outbound direction.
#[derive(Debug)]
pub(crate) struct OutboundQueue<S: Session> {
    tx: Option<mpsc::Sender<StreamElem<Bytes, S::OutboundTrailers>>>,
    fault: FaultSlot,
}

impl<S: Session> OutboundQueue<S> {
    /// Enqueue one element; waits under backpressure. A terminal element
    /// closes the direction.
    pub async fn send(&mut self, elem: StreamElem<Bytes, S::OutboundTrailers>) -> Result<()> {
        let terminal = elem.is_terminal();
        let tx = self.tx.as_ref().ok_or(CallError::HandlerTerminated)?;
        match tx.send(elem).await {
            Ok(()) => {
                if terminal {
                    self.tx = None;
                }
                Ok(())
            }
            Err(_) => {
                self.tx = None;
                match self.fault.get() {
                    Some(fault) => Err(fault.into_error::<S>()),
                    None => Err(S::peer_disconnected()),
                }
            }
        }
    }

    /// Whether a terminal element has been accepted.
    pub fn is_finished(&self) -> bool {
        self.tx.is_none()
    }

    /// Close the direction without a terminal element (abort).
    pub fn abort(&mut self) {
        self.tx = None;
    }
}

/// Everything needed to wire one call: worker-side handles plus the
/// consumer-facing queues.
pub(crate) struct Endpoints<S: Session> {
    pub sink: InboundSink<S>,
    pub source: mpsc::Receiver<StreamElem<Bytes, S::OutboundTrailers>>,
    pub out_fault: FaultSlot,
    pub inbound: InboundQueue<S>,
    pub outbound: OutboundQueue<S>,
}

/// Create the per-direction slots and bounded queues for one call.
pub(crate) fn endpoints<S: Session>(capacity: usize) -> Endpoints<S> {
    let (headers_tx, headers_rx) = slot();
    let (in_tx, in_rx) = mpsc::channel(capacity.max(1));
    let (out_tx, out_rx) = mpsc::channel(capacity.max(1));
    let in_fault = FaultSlot::default();
    let out_fault = FaultSlot::default();

    Endpoints {
        sink: InboundSink {
            headers: headers_tx,
            tx: in_tx,
            fault: in_fault.clone(),
        },
        source: out_rx,
        out_fault: out_fault.clone(),
        inbound: InboundQueue {
            headers: headers_rx,
            rx: in_rx,
            fault: in_fault,
            finished: None,
            locally_closed: false,
        },
        outbound: OutboundQueue {
            tx: Some(out_tx),
            fault: out_fault,
        },
    }
}

/// The typed inbound/outbound pair for one open call, with its two
/// worker tasks.
///
/// Owned exclusively by the call facade; dropping it aborts both workers.
#[derive(Debug)]
pub struct Channel<S: Session> {
    pub(crate) inbound: InboundQueue<S>,
    pub(crate) outbound: OutboundQueue<S>,
    pub(crate) inbound_task: Option<JoinHandle<()>>,
    pub(crate) outbound_task: Option<JoinHandle<()>>,
}

impl<S: Session> Channel<S> {
    pub(crate) fn new(
        inbound: InboundQueue<S>,
        outbound: OutboundQueue<S>,
        inbound_task: JoinHandle<()>,
        outbound_task: JoinHandle<()>,
    ) -> Self {
        Self {
            inbound,
            outbound,
            inbound_task: Some(inbound_task),
            outbound_task: Some(outbound_task),
        }
    }

    /// Wait for the inbound headers.
    pub async fn inbound_headers(&mut self) -> Result<Arc<S::InboundHeaders>> {
        self.inbound.headers().await
    }

    /// Receive the next inbound element. Sticky at end-of-stream.
    pub async fn recv(&mut self) -> Result<StreamElem<Bytes, S::InboundTrailers>> {
        self.inbound.recv().await
    }

    /// Send one outbound element; waits when the queue is full.
    pub async fn send(&mut self, elem: StreamElem<Bytes, S::OutboundTrailers>) -> Result<()> {
        self.outbound.send(elem).await
    }

    /// Close the channel: stop the inbound worker, let the outbound
    /// worker flush everything already queued, and join both. Idempotent.
    pub async fn close(&mut self) {
        self.inbound.close();
        self.outbound.abort();
        if let Some(task) = self.inbound_task.take() {
            // The inbound worker may be parked on a transport read with
            // nothing left to deliver; cancel rather than wait.
            task.abort();
            let _ = task.await;
        }
        if let Some(task) = self.outbound_task.take() {
            let _ = task.await;
        }
    }
}

impl<S: Session> Drop for Channel<S> {
    fn drop(&mut self) {
        if let Some(task) = &self.inbound_task {
            task.abort();
        }
        if let Some(task) = &self.outbound_task {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stream_elem_terminal() {
        let elem: StreamElem<u32, NoMetadata> = StreamElem::Elem(1);
        assert!(!elem.is_terminal());
        assert!(StreamElem::FinalElem(1, NoMetadata).is_terminal());
        assert!(StreamElem::<u32, _>::NoMoreElems(NoMetadata).is_terminal());
    }

    #[test]
    fn test_stream_elem_message() {
        assert_eq!(StreamElem::<_, NoMetadata>::Elem(5).message(), Some(&5));
        assert_eq!(StreamElem::FinalElem(6, NoMetadata).message(), Some(&6));
        assert_eq!(
            StreamElem::<u32, _>::NoMoreElems(NoMetadata).message(),
            None
        );
    }

    #[test]
    fn test_fault_slot_first_write_wins() {
        let fault = FaultSlot::default();
        fault.set(ChannelFault::Disconnected);
        fault.set(ChannelFault::Protocol("late".to_string()));
        assert!(matches!(fault.get(), Some(ChannelFault::Disconnected)));
    }

    #[test]
    fn test_accept_envelope_plain() {
        let payload = accept_envelope(Envelope::plain(&b"ok"[..]), None).unwrap();
        assert_eq!(&payload[..], b"ok");
    }

    #[test]
    fn test_accept_envelope_compressed_requires_encoding() {
        let err = accept_envelope(Envelope::new(true, &b"x"[..]), None).unwrap_err();
        match err {
            ChannelFault::Grpc(exc) => assert_eq!(exc.status, StatusCode::Unimplemented),
            other => panic!("unexpected fault: {other:?}"),
        }
    }

    #[test]
    fn test_accept_envelope_identity_rejects_flag() {
        let err =
            accept_envelope(Envelope::new(true, &b"x"[..]), Some(&Compression::Identity))
                .unwrap_err();
        assert!(matches!(err, ChannelFault::Grpc(_)));
    }

    #[test]
    fn test_accept_envelope_negotiated_passthrough() {
        let payload =
            accept_envelope(Envelope::new(true, &b"z"[..]), Some(&Compression::Gzip)).unwrap();
        assert_eq!(&payload[..], b"z");
    }

    #[tokio::test]
    async fn test_inbound_queue_sticky_end() {
        let parts = endpoints::<ServerSession>(4);
        let mut inbound = parts.inbound;
        let sink = parts.sink;

        assert!(sink.push(StreamElem::Elem(Bytes::from_static(b"m"))).await);
        assert!(sink.push(StreamElem::NoMoreElems(NoMetadata)).await);

        assert_eq!(
            inbound.recv().await.unwrap(),
            StreamElem::Elem(Bytes::from_static(b"m"))
        );
        assert_eq!(
            inbound.recv().await.unwrap(),
            StreamElem::NoMoreElems(NoMetadata)
        );
        // End-of-stream repeats indefinitely.
        assert_eq!(
            inbound.recv().await.unwrap(),
            StreamElem::NoMoreElems(NoMetadata)
        );
    }

    #[tokio::test]
    async fn test_inbound_queue_surfaces_fault_after_drain() {
        let parts = endpoints::<ServerSession>(4);
        let mut inbound = parts.inbound;
        let sink = parts.sink;

        assert!(sink.push(StreamElem::Elem(Bytes::from_static(b"m"))).await);
        sink.fail(ChannelFault::Disconnected);
        drop(sink);

        assert!(matches!(inbound.recv().await, Ok(StreamElem::Elem(_))));
        assert!(matches!(
            inbound.recv().await,
            Err(CallError::ClientDisconnected)
        ));
        // The fault is sticky too.
        assert!(matches!(
            inbound.recv().await,
            Err(CallError::ClientDisconnected)
        ));
    }

    #[tokio::test]
    async fn test_client_session_fault_maps_to_server_disconnected() {
        let parts = endpoints::<ClientSession>(4);
        let mut inbound = parts.inbound;
        let sink = parts.sink;

        sink.fail(ChannelFault::Disconnected);
        drop(sink);

        assert!(matches!(
            inbound.recv().await,
            Err(CallError::ServerDisconnected)
        ));
    }

    #[tokio::test]
    async fn test_outbound_terminal_closes_direction() {
        let mut parts = endpoints::<ServerSession>(4);

        parts
            .outbound
            .send(StreamElem::NoMoreElems(Trailers::ok()))
            .await
            .unwrap();
        assert!(parts.outbound.is_finished());

        let err = parts
            .outbound
            .send(StreamElem::Elem(Bytes::from_static(b"late")))
            .await
            .unwrap_err();
        assert!(matches!(err, CallError::HandlerTerminated));

        // The worker side still drains what was accepted.
        assert!(matches!(
            parts.source.recv().await,
            Some(StreamElem::NoMoreElems(_))
        ));
    }

    #[tokio::test]
    async fn test_outbound_send_after_worker_gone_maps_fault() {
        let mut parts = endpoints::<ServerSession>(4);
        parts.out_fault.set(ChannelFault::Disconnected);
        drop(parts.source);

        let err = parts
            .outbound
            .send(StreamElem::Elem(Bytes::from_static(b"m")))
            .await
            .unwrap_err();
        assert!(matches!(err, CallError::ClientDisconnected));
    }

    #[tokio::test]
    async fn test_headers_slot_roundtrip() {
        let parts = endpoints::<ServerSession>(4);
        let mut inbound = parts.inbound;
        let sink = parts.sink;

        assert!(sink.set_headers(RequestHeaders::default()));
        assert!(!sink.set_headers(RequestHeaders::default()));

        let headers = inbound.headers().await.unwrap();
        assert_eq!(*headers, RequestHeaders::default());
    }
}
