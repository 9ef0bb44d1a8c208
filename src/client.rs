//! Client role adapter.
//!
//! [`initiate_request`] turns a connection and a set of request headers
//! into an open [`Call`]: it serializes the head, opens the HTTP/2
//! stream, and spawns the two workers that move the request body out and
//! the response in.
//!
//! Failures before the stream opens are classified as setup failures
//! (`CallError::SetupFailure`), the only class an external retry policy
//! may safely retry: the server has not seen any application bytes.

use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::mpsc;

use crate::call::{Call, CallConfig, ClientContext};
use crate::channel::{
    accept_envelope, endpoints, Channel, ChannelFault, ClientSession, FaultSlot, InboundSink,
    NoMetadata, StreamElem,
};
use crate::error::{CallError, Result};
use crate::framing::{Envelope, EnvelopeBuffer};
use crate::headers::{
    parse_response_headers, parse_trailers, parse_trailers_only, Path, RequestHeaders,
};
use crate::status::{GrpcException, StatusCode};
use crate::transport::{H2Conn, RequestFrame, RequestWriter, ResponseFrame, ResponseReader};

/// Open a call: validate and send the request head, spawn the workers,
/// return the facade.
pub fn initiate_request(
    conn: &dyn H2Conn,
    path: Path,
    headers: RequestHeaders,
    config: &CallConfig,
) -> Result<Call<ClientSession>> {
    let wire = headers.to_wire(&path, conn.scheme(), conn.authority());
    let stream = conn.open_request(wire).map_err(|err| {
        // Nothing reached the server: retry-eligible.
        CallError::SetupFailure {
            http_status: 503,
            grpc: GrpcException::new(StatusCode::Unavailable)
                .with_message(format!("failed to open stream: {err}")),
        }
    })?;

    let parts = endpoints::<ClientSession>(config.queue_capacity);
    let outbound_task = tokio::spawn(outbound_worker(
        stream.body,
        parts.source,
        parts.out_fault,
    ));
    let inbound_task = tokio::spawn(inbound_worker(
        stream.response,
        parts.sink,
        config.max_recv_message_size,
    ));

    let channel = Channel::new(parts.inbound, parts.outbound, inbound_task, outbound_task);
    let context = ClientContext {
        path,
        request: Arc::new(headers),
    };
    Ok(Call::new(channel, context))
}

/// Outbound worker: drain the element queue into the request body,
/// half-closing after the terminal element.
async fn outbound_worker(
    body: RequestWriter,
    mut source: mpsc::Receiver<StreamElem<Bytes, NoMetadata>>,
    fault: FaultSlot,
) {
    while let Some(elem) = source.recv().await {
        match elem {
            StreamElem::Elem(msg) => {
                let frame = RequestFrame::Data(Envelope::plain(msg).encode());
                if body.send(frame).await.is_err() {
                    fault.set(ChannelFault::Disconnected);
                    return;
                }
            }
            StreamElem::FinalElem(msg, NoMetadata) => {
                let frame = RequestFrame::Data(Envelope::plain(msg).encode());
                if body.send(frame).await.is_err() || body.send(RequestFrame::End).await.is_err()
                {
                    fault.set(ChannelFault::Disconnected);
                }
                return;
            }
            StreamElem::NoMoreElems(NoMetadata) => {
                if body.send(RequestFrame::End).await.is_err() {
                    fault.set(ChannelFault::Disconnected);
                }
                return;
            }
        }
    }
    // Queue dropped without a terminal element: the stream resets when
    // the body writer drops here.
    tracing::trace!("request aborted before half-close");
}

/// Inbound worker: wait for the response head, then stream body and
/// trailers into the element queue.
async fn inbound_worker(
    mut response: ResponseReader,
    sink: InboundSink<ClientSession>,
    max_recv: u32,
) {
    let (raw_head, end_stream) = match response.next_frame().await {
        Some(ResponseFrame::Headers { headers, end_stream }) => (headers, end_stream),
        Some(_) => {
            sink.fail(ChannelFault::Protocol(
                "response body before response head".to_string(),
            ));
            return;
        }
        None => {
            sink.fail(ChannelFault::Disconnected);
            return;
        }
    };

    // Trailers-Only: the head carries the trailers and ends the stream.
    if raw_head.get(b"grpc-status").is_some() {
        let (headers, trailers, invalid) = parse_trailers_only(&raw_head);
        if !invalid.is_empty() {
            tracing::debug!(
                problems = invalid.len(),
                "lenient parse of Trailers-Only frame"
            );
        }
        sink.set_headers(headers);
        sink.push(StreamElem::NoMoreElems(trailers)).await;
        return;
    }
    if end_stream {
        sink.fail(ChannelFault::InvalidResponseHead(
            "stream ended without grpc-status".to_string(),
        ));
        return;
    }

    // An HTTP-level error page is surfaced as the mapped gRPC status.
    if let Some(status) = http_status(&raw_head) {
        if status != 200 {
            sink.fail(ChannelFault::Grpc(
                GrpcException::new(StatusCode::from_http(status))
                    .with_message(format!("HTTP status {status}")),
            ));
            return;
        }
    }

    let (headers, invalid) = parse_response_headers(&raw_head);
    if !invalid.is_empty() {
        let detail = invalid
            .iter()
            .next()
            .map(|e| e.to_string())
            .unwrap_or_default();
        sink.fail(ChannelFault::InvalidResponseHead(detail));
        return;
    }
    let encoding = headers.encoding.clone();
    sink.set_headers(headers);

    let mut buffer = EnvelopeBuffer::with_max_message(max_recv);
    loop {
        match response.next_frame().await {
            Some(ResponseFrame::Data(chunk)) => {
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
            Some(ResponseFrame::Trailers(raw)) => {
                if buffer.has_partial() {
                    sink.fail(ChannelFault::Protocol(
                        "response ended mid-message".to_string(),
                    ));
                    return;
                }
                let (trailers, invalid) = parse_trailers(&raw);
                if !invalid.is_empty() {
                    tracing::warn!(problems = invalid.len(), "problems in response trailers");
                }
                sink.push(StreamElem::NoMoreElems(trailers)).await;
                return;
            }
            Some(ResponseFrame::Headers { .. }) => {
                sink.fail(ChannelFault::Protocol(
                    "unexpected second HEADERS frame".to_string(),
                ));
                return;
            }
            None => {
                sink.fail(ChannelFault::Disconnected);
                return;
            }
        }
    }
}

fn http_status(raw: &crate::transport::RawHeaders) -> Option<u16> {
    raw.get(b":status")
        .and_then(|v| std::str::from_utf8(v).ok())
        .and_then(|v| v.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::headers::Trailers;
    use crate::transport::{mem, RawHeaders, ResponseWriter};

    fn open(conn: &dyn H2Conn) -> Call<ClientSession> {
        initiate_request(
            conn,
            Path::new("Greeter", "SayHello"),
            RequestHeaders::default(),
            &CallConfig::default(),
        )
        .unwrap()
    }

    async fn respond_head(respond: &ResponseWriter) {
        let mut head = RawHeaders::new();
        head.push(&b":status"[..], &b"200"[..]);
        head.push(&b"content-type"[..], &b"application/grpc"[..]);
        respond
            .send(ResponseFrame::Headers {
                headers: head,
                end_stream: false,
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_setup_failure_when_connection_refused() {
        let (conn, listener) = mem::pair();
        drop(listener);

        let err = initiate_request(
            &conn,
            Path::new("Greeter", "SayHello"),
            RequestHeaders::default(),
            &CallConfig::default(),
        )
        .unwrap_err();

        match err {
            CallError::SetupFailure { grpc, .. } => {
                assert_eq!(grpc.status, StatusCode::Unavailable);
            }
            other => panic!("expected setup failure, got {other}"),
        }
    }

    #[tokio::test]
    async fn test_request_head_reaches_server() {
        let (conn, mut listener) = mem::pair();
        let _call = open(&conn);

        let accepted = listener.accept().await.unwrap();
        assert_eq!(accepted.head.get(b":method"), Some(&b"POST"[..]));
        assert_eq!(accepted.head.get(b":path"), Some(&b"/Greeter/SayHello"[..]));
        assert_eq!(
            accepted.head.get(b"content-type"),
            Some(&b"application/grpc"[..])
        );
    }

    #[tokio::test]
    async fn test_request_body_is_enveloped_and_half_closed() {
        let (conn, mut listener) = mem::pair();
        let mut call = open(&conn);
        let mut accepted = listener.accept().await.unwrap();

        call.send_final_output(&b"ping"[..]).await.unwrap();

        let frame = accepted.body.next_frame().await.unwrap();
        match frame {
            RequestFrame::Data(bytes) => {
                assert_eq!(&bytes[..5], &[0, 0, 0, 0, 4]);
                assert_eq!(&bytes[5..], b"ping");
            }
            other => panic!("expected data frame, got {other:?}"),
        }
        assert_eq!(accepted.body.next_frame().await, Some(RequestFrame::End));
    }

    #[tokio::test]
    async fn test_trailers_only_response() {
        let (conn, mut listener) = mem::pair();
        let mut call = open(&conn);
        let accepted = listener.accept().await.unwrap();

        let mut head = RawHeaders::new();
        head.push(&b":status"[..], &b"200"[..]);
        head.push(&b"content-type"[..], &b"application/grpc"[..]);
        head.push(&b"grpc-status"[..], &b"12"[..]);
        head.push(&b"grpc-message"[..], &b"no such method"[..]);
        accepted
            .respond
            .send(ResponseFrame::Headers {
                headers: head,
                end_stream: true,
            })
            .await
            .unwrap();

        match call.recv_input().await.unwrap() {
            StreamElem::NoMoreElems(trailers) => {
                assert_eq!(trailers.status, StatusCode::Unimplemented);
                assert_eq!(trailers.message.as_deref(), Some("no such method"));
            }
            other => panic!("expected end-of-stream, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_http_error_page_maps_to_grpc_status() {
        let (conn, mut listener) = mem::pair();
        let mut call = open(&conn);
        let accepted = listener.accept().await.unwrap();

        let mut head = RawHeaders::new();
        head.push(&b":status"[..], &b"503"[..]);
        head.push(&b"content-type"[..], &b"text/html"[..]);
        accepted
            .respond
            .send(ResponseFrame::Headers {
                headers: head,
                end_stream: false,
            })
            .await
            .unwrap();

        match call.recv_input().await {
            Err(CallError::Grpc(exc)) => assert_eq!(exc.status, StatusCode::Unavailable),
            other => panic!("expected grpc error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_streaming_response_with_trailers() {
        let (conn, mut listener) = mem::pair();
        let mut call = open(&conn);
        let accepted = listener.accept().await.unwrap();

        respond_head(&accepted.respond).await;
        accepted
            .respond
            .send(ResponseFrame::Data(Envelope::plain(&b"out"[..]).encode()))
            .await
            .unwrap();
        accepted
            .respond
            .send(ResponseFrame::Trailers(crate::headers::serialize_trailers(
                &Trailers::ok(),
            )))
            .await
            .unwrap();

        let headers = call.response_headers().await.unwrap();
        assert!(headers.encoding.is_none());

        assert_eq!(
            call.recv_next_input().await.unwrap(),
            Bytes::from_static(b"out")
        );
        match call.recv_input().await.unwrap() {
            StreamElem::NoMoreElems(trailers) => assert_eq!(trailers.status, StatusCode::Ok),
            other => panic!("expected trailers, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_reset_before_trailers_is_disconnect() {
        let (conn, mut listener) = mem::pair();
        let mut call = open(&conn);
        let accepted = listener.accept().await.unwrap();

        respond_head(&accepted.respond).await;
        accepted
            .respond
            .send(ResponseFrame::Data(Envelope::plain(&b"only"[..]).encode()))
            .await
            .unwrap();
        drop(accepted);

        assert!(matches!(call.recv_input().await, Ok(StreamElem::Elem(_))));
        assert!(matches!(
            call.recv_input().await,
            Err(CallError::ServerDisconnected)
        ));
    }
}
