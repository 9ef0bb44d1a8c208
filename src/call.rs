//! The call facade.
//!
//! A [`Call`] is one open gRPC invocation: the typed channel plus
//! role-specific state. Handlers and clients only ever talk to this
//! surface; the channel workers own the transport.
//!
//! The receive side is shared between roles. The send side differs in
//! one place: a server must initiate its response (choosing between a
//! streaming head and Trailers-Only) before the first byte leaves, which
//! is what the response-initiation latch guards.

use std::sync::Arc;

use bytes::Bytes;

use crate::channel::{
    Channel, ClientSession, NoMetadata, ResponseStart, ServerSession, Session, SlotWriter,
    StreamElem,
};
use crate::error::{CallError, Result};
use crate::headers::{Path, RequestHeaders, ResponseHeaders, Trailers};
use crate::metadata::CustomMetadata;
use crate::status::GrpcException;

/// Per-call tuning knobs.
#[derive(Debug, Clone)]
pub struct CallConfig {
    /// Capacity of each direction's element queue (backpressure bound).
    pub queue_capacity: usize,
    /// Largest inbound message accepted before `ResourceExhausted`.
    pub max_recv_message_size: u32,
}

impl Default for CallConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 32,
            max_recv_message_size: crate::framing::DEFAULT_MAX_MESSAGE_SIZE,
        }
    }
}

/// Client-role state: the chosen method and the request head that was
/// sent with it.
#[derive(Debug)]
pub struct ClientContext {
    pub(crate) path: Path,
    pub(crate) request: Arc<RequestHeaders>,
}

/// Server-role state: the accepted request, the response template and
/// the initiation latch.
#[derive(Debug)]
pub struct ServerContext {
    pub(crate) path: Path,
    pub(crate) request: Arc<RequestHeaders>,
    /// Response head sent on initiation; initial metadata accumulates
    /// here until then.
    pub(crate) response_template: ResponseHeaders,
    /// The initiation latch: write-once, observed by the outbound worker.
    pub(crate) start: SlotWriter<ResponseStart>,
}

/// One open gRPC call.
///
/// Dropping a call aborts its workers; prefer [`Call::close`] (or the
/// role-specific completion operations) for a clean finish.
#[derive(Debug)]
pub struct Call<S: Session> {
    channel: Channel<S>,
    context: S::Context,
    trailers_sent: bool,
}

impl<S: Session> Call<S> {
    pub(crate) fn new(channel: Channel<S>, context: S::Context) -> Self {
        Self {
            channel,
            context,
            trailers_sent: false,
        }
    }

    /// Wait for the inbound headers (response head on the client,
    /// request head on the server).
    pub async fn inbound_headers(&mut self) -> Result<Arc<S::InboundHeaders>> {
        self.channel.inbound_headers().await
    }

    /// Receive the next inbound element. End-of-stream is sticky: once
    /// seen, every further receive returns it again.
    pub async fn recv_input(&mut self) -> Result<StreamElem<Bytes, S::InboundTrailers>> {
        self.channel.recv().await
    }

    /// Receive the next message, stripping the stream tag. Errors once
    /// the stream has ended.
    pub async fn recv_next_input(&mut self) -> Result<Bytes> {
        match self.channel.recv().await? {
            StreamElem::Elem(msg) | StreamElem::FinalElem(msg, _) => Ok(msg),
            StreamElem::NoMoreElems(_) => Err(CallError::MissingInput),
        }
    }

    /// Receive the final message and the end-of-stream metadata.
    ///
    /// Accepts either the fused final element or a message immediately
    /// followed by end-of-stream; anything else is a sequencing error.
    pub async fn recv_final_input(&mut self) -> Result<(Bytes, S::InboundTrailers)> {
        match self.channel.recv().await? {
            StreamElem::FinalElem(msg, trailers) => Ok((msg, trailers)),
            StreamElem::Elem(msg) => match self.channel.recv().await? {
                StreamElem::NoMoreElems(trailers) => Ok((msg, trailers)),
                _ => Err(CallError::UnexpectedNonFinalInput),
            },
            StreamElem::NoMoreElems(_) => Err(CallError::MissingInput),
        }
    }

    /// Non-streaming receive: exactly one message, then end-of-stream.
    pub async fn recv_only_input(&mut self) -> Result<Bytes> {
        match self.channel.recv().await? {
            StreamElem::FinalElem(msg, _) => Ok(msg),
            StreamElem::Elem(msg) => match self.channel.recv().await? {
                StreamElem::NoMoreElems(_) => Ok(msg),
                _ => Err(CallError::UnexpectedExtraInput),
            },
            StreamElem::NoMoreElems(_) => Err(CallError::MissingInput),
        }
    }

    /// Whether a terminal outbound element has been sent.
    pub fn is_finished(&self) -> bool {
        self.trailers_sent
    }

    /// Enqueue an outbound element with terminal bookkeeping.
    async fn send_raw(&mut self, elem: StreamElem<Bytes, S::OutboundTrailers>) -> Result<()> {
        if self.trailers_sent {
            return Err(CallError::HandlerTerminated);
        }
        let terminal = elem.is_terminal();
        self.channel.send(elem).await?;
        if terminal {
            self.trailers_sent = true;
        }
        Ok(())
    }

    async fn close_channel(&mut self) {
        self.channel.close().await;
    }
}

impl Call<ClientSession> {
    /// The method this call invokes.
    pub fn path(&self) -> &Path {
        &self.context.path
    }

    /// The request head that was sent.
    pub fn request_headers(&self) -> &RequestHeaders {
        &self.context.request
    }

    /// Wait for the response head. For a Trailers-Only response this
    /// resolves too, with the next receive returning end-of-stream.
    pub async fn response_headers(&mut self) -> Result<Arc<ResponseHeaders>> {
        self.channel.inbound_headers().await
    }

    /// Send one element of the request body.
    pub async fn send_output(&mut self, elem: StreamElem<Bytes, NoMetadata>) -> Result<()> {
        self.send_raw(elem).await
    }

    /// Send one request message; more may follow.
    pub async fn send_next_output(&mut self, msg: impl Into<Bytes>) -> Result<()> {
        self.send_raw(StreamElem::Elem(msg.into())).await
    }

    /// Send the last request message and half-close.
    pub async fn send_final_output(&mut self, msg: impl Into<Bytes>) -> Result<()> {
        self.send_raw(StreamElem::FinalElem(msg.into(), NoMetadata))
            .await
    }

    /// Half-close the request direction without a further message.
    /// Receiving continues independently. Idempotent.
    pub async fn finish_request(&mut self) -> Result<()> {
        if self.trailers_sent {
            return Ok(());
        }
        self.send_raw(StreamElem::NoMoreElems(NoMetadata)).await
    }

    /// Close the call: half-close if still open, then tear down both
    /// workers. Idempotent.
    pub async fn close(&mut self) {
        let _ = self.finish_request().await;
        self.close_channel().await;
    }
}

impl Call<ServerSession> {
    /// The method this call was dispatched to.
    pub fn path(&self) -> &Path {
        &self.context.path
    }

    /// The parsed request head. Available immediately on the server.
    pub fn request_headers(&self) -> &RequestHeaders {
        &self.context.request
    }

    /// The request's custom metadata.
    pub fn get_request_metadata(&self) -> &[CustomMetadata] {
        &self.context.request.metadata
    }

    /// Whether the response has been initiated (head or Trailers-Only
    /// committed to the wire order).
    pub fn response_initiated(&self) -> bool {
        self.context.start.is_set()
    }

    /// Add initial response metadata. Must precede response initiation.
    pub fn set_response_initial_metadata(
        &mut self,
        metadata: Vec<CustomMetadata>,
    ) -> Result<()> {
        if self.context.start.is_set() {
            return Err(CallError::ResponseAlreadyInitiated);
        }
        self.context.response_template.metadata.extend(metadata);
        Ok(())
    }

    /// Initiate a streaming response now, before any output is written.
    /// Idempotent; a no-op if the response is already initiated.
    pub fn initiate_response(&mut self) {
        if !self.context.start.is_set() {
            let headers = self.context.response_template.clone();
            self.context.start.set(ResponseStart::Streaming(headers));
        }
    }

    /// Send one element of the response.
    ///
    /// The first output initiates the response implicitly. Going straight
    /// to trailers with zero messages elides the streaming shape into a
    /// single Trailers-Only frame.
    pub async fn send_output(&mut self, elem: StreamElem<Bytes, Trailers>) -> Result<()> {
        if self.trailers_sent {
            return Err(CallError::HandlerTerminated);
        }
        if let StreamElem::NoMoreElems(trailers) = elem {
            if !self.context.start.is_set() {
                return self.finish_trailers_only(200, trailers);
            }
            return self.send_raw(StreamElem::NoMoreElems(trailers)).await;
        }
        self.initiate_response();
        self.send_raw(elem).await
    }

    /// Send one response message; more may follow.
    pub async fn send_next_output(&mut self, msg: impl Into<Bytes>) -> Result<()> {
        self.send_output(StreamElem::Elem(msg.into())).await
    }

    /// Send the last response message fused with the trailers.
    pub async fn send_final_output(
        &mut self,
        msg: impl Into<Bytes>,
        trailers: Trailers,
    ) -> Result<()> {
        self.send_output(StreamElem::FinalElem(msg.into(), trailers))
            .await
    }

    /// Send the trailers, ending the response. Idempotent once set.
    pub async fn send_trailers(&mut self, trailers: Trailers) -> Result<()> {
        if self.trailers_sent {
            return Ok(());
        }
        self.send_output(StreamElem::NoMoreElems(trailers)).await
    }

    /// Reply with a single Trailers-Only frame. Must precede any output.
    pub async fn send_trailers_only(&mut self, trailers: Trailers) -> Result<()> {
        if self.context.start.is_set() {
            return Err(CallError::ResponseAlreadyInitiated);
        }
        self.finish_trailers_only(200, trailers)
    }

    /// Map a typed protocol error to the wire: Trailers-Only when the
    /// response was never initiated, in-body trailers otherwise.
    pub async fn send_grpc_exception(&mut self, exc: GrpcException) -> Result<()> {
        if self.trailers_sent {
            return Err(CallError::HandlerTerminated);
        }
        if !self.context.start.is_set() {
            return self.finish_trailers_only(200, exc.into());
        }
        self.send_raw(StreamElem::NoMoreElems(exc.into())).await
    }

    /// Close the call: send `Ok` trailers if none were sent, then tear
    /// down both workers. Idempotent.
    pub async fn close(&mut self) {
        if !self.trailers_sent {
            let _ = self.send_trailers(Trailers::ok()).await;
        }
        self.close_channel().await;
    }

    pub(crate) fn finish_trailers_only(
        &mut self,
        http_status: u16,
        trailers: Trailers,
    ) -> Result<()> {
        let headers = self.context.response_template.clone();
        if !self.context.start.set(ResponseStart::TrailersOnly {
            http_status,
            headers,
            trailers,
        }) {
            return Err(CallError::ResponseAlreadyInitiated);
        }
        self.trailers_sent = true;
        Ok(())
    }
}
