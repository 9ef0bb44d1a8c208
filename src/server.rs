//! Server role adapter.
//!
//! [`accept_call`] turns one accepted HTTP/2 stream into an open
//! [`Call`]: pseudo-header checks, request-header parsing (invalid heads
//! are answered with a Trailers-Only reply before any handler runs),
//! deadline arming, and worker spawn.
//!
//! [`HandlerMap`] and [`serve_call`] are the dispatch layer consumed by
//! listener code: handlers are keyed by [`Path`], unknown methods get a
//! Trailers-Only `Unimplemented` reply, and uncaught handler errors are
//! mapped to `Unknown` with a sanitized message.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::call::{Call, CallConfig, ServerContext};
use crate::channel::{
    accept_envelope, endpoints, slot, Channel, ChannelFault, FaultSlot, InboundSink, NoMetadata,
    ResponseStart, ServerSession, SlotReader, StreamElem,
};
use crate::error::{CallError, Result};
use crate::framing::{Envelope, EnvelopeBuffer};
use crate::headers::{
    parse_request_headers, serialize_trailers, serialize_trailers_only, Compression, Path,
    ResponseHeaders, Trailers,
};
use crate::status::{GrpcException, StatusCode};
use crate::transport::{
    BodyReader, ConnectionToClient, RequestFrame, ResponseFrame, ResponseWriter,
};

/// Accept one call from the transport.
///
/// Setup failures (bad pseudo-headers, invalid request head) are
/// answered on the wire with a Trailers-Only reply and returned as
/// [`CallError::SetupFailure`]; the handler layer never sees them.
pub async fn accept_call(
    conn: ConnectionToClient,
    config: &CallConfig,
) -> Result<Call<ServerSession>> {
    let ConnectionToClient {
        head,
        body,
        respond,
    } = conn;

    let method = head
        .get(b":method")
        .ok_or(CallError::MissingPseudoHeader(":method"))?;
    if method != b"POST" {
        let exc = GrpcException::new(StatusCode::Internal).with_message("method must be POST");
        reply_trailers_only(&respond, 405, &exc).await;
        return Err(CallError::SetupFailure {
            http_status: 405,
            grpc: exc,
        });
    }

    let raw_path = head
        .get(b":path")
        .ok_or(CallError::MissingPseudoHeader(":path"))?;
    let path = match Path::parse(raw_path) {
        Some(path) => path,
        None => {
            let exc = GrpcException::new(StatusCode::InvalidArgument).with_message(format!(
                "malformed path {:?}",
                String::from_utf8_lossy(raw_path)
            ));
            reply_trailers_only(&respond, 400, &exc).await;
            return Err(CallError::SetupFailure {
                http_status: 400,
                grpc: exc,
            });
        }
    };

    let (request, invalid) = parse_request_headers(&head);
    if !invalid.is_empty() {
        let http_status = invalid.http_status();
        let exc = invalid.to_exception();
        tracing::debug!(method = %path, http_status, "rejecting request with invalid headers");
        reply_trailers_only(&respond, http_status, &exc).await;
        return Err(CallError::SetupFailure {
            http_status,
            grpc: exc,
        });
    }

    let deadline = request
        .timeout
        .map(|timeout| Instant::now() + timeout.to_duration());
    let empty_body = head.get(b"content-length") == Some(&b"0"[..]);
    let encoding = request.encoding.clone();
    // The response mirrors the request's format tag.
    let response_template = ResponseHeaders {
        format: request.format.clone(),
        ..ResponseHeaders::default()
    };

    let parts = endpoints::<ServerSession>(config.queue_capacity);
    parts.sink.set_headers(request.clone());

    let (start_writer, start_reader) = slot();
    let inbound_task = tokio::spawn(inbound_worker(
        body,
        parts.sink,
        encoding,
        config.max_recv_message_size,
        deadline,
        empty_body,
    ));
    let outbound_task = tokio::spawn(outbound_worker(
        respond,
        start_reader,
        parts.source,
        parts.out_fault,
        deadline,
    ));

    let channel = Channel::new(parts.inbound, parts.outbound, inbound_task, outbound_task);
    let context = ServerContext {
        path,
        request: Arc::new(request),
        response_template,
        start: start_writer,
    };
    Ok(Call::new(channel, context))
}

/// Best-effort Trailers-Only reply used before a call exists.
async fn reply_trailers_only(respond: &ResponseWriter, http_status: u16, exc: &GrpcException) {
    let wire = serialize_trailers_only(
        http_status,
        &ResponseHeaders::default(),
        &Trailers::from(exc.clone()),
    );
    let _ = respond
        .send(ResponseFrame::Headers {
            headers: wire,
            end_stream: true,
        })
        .await;
}

fn deadline_exceeded() -> GrpcException {
    GrpcException::new(StatusCode::DeadlineExceeded).with_message("deadline exceeded")
}

/// Inbound worker: decode request body chunks into the element queue;
/// a clean half-close becomes the end-of-input element.
async fn inbound_worker(
    mut body: BodyReader,
    sink: InboundSink<ServerSession>,
    encoding: Option<Compression>,
    max_recv: u32,
    deadline: Option<Instant>,
    empty_body: bool,
) {
    if empty_body {
        // content-length: 0 short-circuit; nothing to read.
        sink.push(StreamElem::NoMoreElems(NoMetadata)).await;
        return;
    }

    let mut buffer = EnvelopeBuffer::with_max_message(max_recv);
    loop {
        let frame = match deadline {
            Some(at) => tokio::select! {
                frame = body.next_frame() => frame,
                _ = tokio::time::sleep_until(at) => {
                    sink.fail(ChannelFault::Grpc(deadline_exceeded()));
                    return;
                }
            },
            None => body.next_frame().await,
        };
        match frame {
            Some(RequestFrame::Data(chunk)) => {
                let envelopes = match buffer.push(&chunk) {
                    Ok(envelopes) => envelopes,
                    Err(exc) => {
                        sink.fail(ChannelFault::Grpc(exc));
                        return;
                    }
                };
                for envelope in envelopes {
                    match accept_envelope(envelope, encoding.as_ref()) {
                        Ok(payload) => {
                            if !sink.push(StreamElem::Elem(payload)).await {
                                return;
                            }
                        }
                        Err(fault) => {
                            sink.fail(fault);
                            return;
                        }
                    }
                }
            }
            Some(RequestFrame::End) => {
                if buffer.has_partial() {
                    sink.fail(ChannelFault::Protocol(
                        "request ended mid-message".to_string(),
                    ));
                    return;
                }
                sink.push(StreamElem::NoMoreElems(NoMetadata)).await;
                return;
            }
            None => {
                sink.fail(ChannelFault::Disconnected);
                return;
            }
        }
    }
}

/// Outbound worker: wait for the initiation decision, then emit either a
/// single Trailers-Only frame or the streaming HEADERS/DATA/trailers
/// sequence. A deadline expiring here sends `DeadlineExceeded` itself.
async fn outbound_worker(
    respond: ResponseWriter,
    mut start: SlotReader<ResponseStart>,
    mut source: mpsc::Receiver<StreamElem<Bytes, Trailers>>,
    fault: FaultSlot,
    deadline: Option<Instant>,
) {
    let decision = match deadline {
        Some(at) => tokio::select! {
            decision = start.get() => decision,
            _ = tokio::time::sleep_until(at) => {
                fault.set(ChannelFault::Grpc(deadline_exceeded()));
                let wire = serialize_trailers_only(
                    200,
                    &ResponseHeaders::default(),
                    &Trailers::from(deadline_exceeded()),
                );
                let _ = respond
                    .send(ResponseFrame::Headers { headers: wire, end_stream: true })
                    .await;
                return;
            }
        },
        None => start.get().await,
    };
    let decision = match decision {
        Some(decision) => decision,
        // Call dropped before initiating anything: reset the stream.
        None => return,
    };

    match &*decision {
        ResponseStart::TrailersOnly {
            http_status,
            headers,
            trailers,
        } => {
            let wire = serialize_trailers_only(*http_status, headers, trailers);
            if respond
                .send(ResponseFrame::Headers {
                    headers: wire,
                    end_stream: true,
                })
                .await
                .is_err()
            {
                fault.set(ChannelFault::Disconnected);
            }
        }
        ResponseStart::Streaming(headers) => {
            if respond
                .send(ResponseFrame::Headers {
                    headers: headers.to_wire(),
                    end_stream: false,
                })
                .await
                .is_err()
            {
                fault.set(ChannelFault::Disconnected);
                return;
            }
            stream_body(&respond, &mut source, &fault, deadline).await;
        }
    }
}

async fn stream_body(
    respond: &ResponseWriter,
    source: &mut mpsc::Receiver<StreamElem<Bytes, Trailers>>,
    fault: &FaultSlot,
    deadline: Option<Instant>,
) {
    loop {
        let elem = match deadline {
            Some(at) => tokio::select! {
                elem = source.recv() => elem,
                _ = tokio::time::sleep_until(at) => {
                    fault.set(ChannelFault::Grpc(deadline_exceeded()));
                    let wire = serialize_trailers(&Trailers::from(deadline_exceeded()));
                    let _ = respond.send(ResponseFrame::Trailers(wire)).await;
                    return;
                }
            },
            None => source.recv().await,
        };
        match elem {
            Some(StreamElem::Elem(msg)) => {
                let frame = ResponseFrame::Data(Envelope::plain(msg).encode());
                if respond.send(frame).await.is_err() {
                    fault.set(ChannelFault::Disconnected);
                    return;
                }
            }
            Some(StreamElem::FinalElem(msg, trailers)) => {
                let data = ResponseFrame::Data(Envelope::plain(msg).encode());
                let tail = ResponseFrame::Trailers(serialize_trailers(&trailers));
                if respond.send(data).await.is_err() || respond.send(tail).await.is_err() {
                    fault.set(ChannelFault::Disconnected);
                }
                return;
            }
            Some(StreamElem::NoMoreElems(trailers)) => {
                let tail = ResponseFrame::Trailers(serialize_trailers(&trailers));
                if respond.send(tail).await.is_err() {
                    fault.set(ChannelFault::Disconnected);
                }
                return;
            }
            // Aborted without trailers: dropping the writer resets.
            None => return,
        }
    }
}

/// Boxed future for handler results.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// An RPC handler: borrows the call for its lifetime and completes with
/// a result the dispatch layer maps onto trailers.
pub trait Handler: Send + Sync + 'static {
    /// Handle one call.
    fn call<'a>(&'a self, call: &'a mut Call<ServerSession>) -> BoxFuture<'a, Result<()>>;
}

impl<F> Handler for F
where
    F: for<'a> Fn(&'a mut Call<ServerSession>) -> BoxFuture<'a, Result<()>>
        + Send
        + Sync
        + 'static,
{
    fn call<'a>(&'a self, call: &'a mut Call<ServerSession>) -> BoxFuture<'a, Result<()>> {
        self(call)
    }
}

/// Handlers keyed by path.
#[derive(Default)]
pub struct HandlerMap {
    handlers: HashMap<Path, Box<dyn Handler>>,
}

impl HandlerMap {
    /// Create an empty map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for `/<service>/<method>`.
    pub fn register(
        &mut self,
        service: impl Into<String>,
        method: impl Into<String>,
        handler: impl Handler,
    ) {
        self.handlers
            .insert(Path::new(service, method), Box::new(handler));
    }

    /// Look up the handler for a path.
    pub fn get(&self, path: &Path) -> Option<&dyn Handler> {
        self.handlers.get(path).map(|h| h.as_ref())
    }

    /// Number of registered handlers.
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// Whether no handlers are registered.
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

/// Accept a call, dispatch it to its handler and drive it to completion.
///
/// Unknown methods get Trailers-Only `Unimplemented`. A handler error
/// that is a [`GrpcException`] goes onto the wire as-is; any other error
/// is logged and mapped to `Unknown` with a sanitized message.
pub async fn serve_call(
    conn: ConnectionToClient,
    handlers: &HandlerMap,
    config: &CallConfig,
) -> Result<()> {
    let mut call = accept_call(conn, config).await?;
    let path = call.path().clone();

    let Some(handler) = handlers.get(&path) else {
        tracing::debug!(method = %path, "no handler registered");
        let exc = GrpcException::new(StatusCode::Unimplemented)
            .with_message(format!("unknown method {path}"));
        let _ = call.send_trailers_only(Trailers::from(exc)).await;
        call.close().await;
        return Ok(());
    };

    match handler.call(&mut call).await {
        Ok(()) => {}
        Err(CallError::Grpc(exc)) => {
            let _ = call.send_grpc_exception(exc).await;
        }
        Err(err) => {
            tracing::error!(method = %path, error = %err, "handler failed");
            let sanitized =
                GrpcException::new(StatusCode::Unknown).with_message("internal error");
            let _ = call.send_grpc_exception(sanitized).await;
        }
    }
    call.close().await;
    Ok(())
}
