//! Backend → client adapter.
//!
//! # Responsibilities
//! - Route every backend response back to the client stream that asked
//! - Translate responses when client and backend disagree on protocol
//! - Transcode bodies the client cannot decode
//! - Turn backend resets and GOAWAY into client-visible outcomes
//!
//! # Design Decisions
//! - Runs on the connection task, so it shares nothing but the registry
//! - HTTP/2 backends are demultiplexed by proxy stream id, HTTP/1.1
//!   backends by the FIFO of in-flight exchanges
//! - Backend settings, pings and window updates are hop-by-hop

use std::collections::HashMap;
use std::io;
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use http::header::{CONTENT_LENGTH, TRANSFER_ENCODING};
use http::{HeaderValue, StatusCode};

use crate::connection::{ClientStream, ConnectionError, ConnectionId, Stream, Streams};
use crate::http::compression::{CompressionPolicy, Transcoder};
use crate::http::headers::STATUS;
use crate::http::{
    convert, ErrorCode, Http1Content, Http1Response, Http2Data, Http2GoAway, Http2Headers,
    Http2Reset, HttpObject, ProtocolError, StreamId,
};
use crate::net::{Channel, Protocol};
use crate::observability::metrics;

/// A response whose head went to the client and whose body is flowing.
struct ResponseState {
    client: ClientStream,
    transcoder: Option<Transcoder>,
}

impl ResponseState {
    fn body(&mut self, data: Bytes, last: bool) -> io::Result<Bytes> {
        let Some(transcoder) = self.transcoder.as_mut() else {
            return Ok(data);
        };
        let processed = transcoder.process(&data)?;
        if !last {
            return Ok(processed);
        }
        let tail = match self.transcoder.take() {
            Some(transcoder) => transcoder.finish()?,
            None => Bytes::new(),
        };
        let mut out = BytesMut::with_capacity(processed.len() + tail.len());
        out.extend_from_slice(&processed);
        out.extend_from_slice(&tail);
        Ok(out.freeze())
    }
}

/// Handles everything one backend connection sends.
pub struct DownstreamHandler {
    connection_id: ConnectionId,
    client: Arc<dyn Channel>,
    backend_protocol: Protocol,
    streams: Streams,
    policy: Arc<CompressionPolicy>,
    /// HTTP/2 backend: responses in progress by proxy stream.
    responses: HashMap<StreamId, ResponseState>,
    /// HTTP/1.1 backend: the response in progress.
    current: Option<ResponseState>,
    upgraded: bool,
}

impl DownstreamHandler {
    /// Create the response path of one backend connection.
    pub fn new(
        connection_id: ConnectionId,
        client: Arc<dyn Channel>,
        backend_protocol: Protocol,
        streams: Streams,
        policy: Arc<CompressionPolicy>,
    ) -> Self {
        Self {
            connection_id,
            client,
            backend_protocol,
            streams,
            policy,
            responses: HashMap::new(),
            current: None,
            upgraded: false,
        }
    }

    /// Handle one object read from the backend.
    pub fn on_inbound(&mut self, object: HttpObject) -> Result<(), ConnectionError> {
        match self.backend_protocol {
            Protocol::Http2 => self.on_http2(object),
            Protocol::Http1 => self.on_http1(object),
        }
    }

    /// True when no response is owed to the client.
    pub fn is_idle(&self) -> bool {
        self.current.is_none()
            && self.streams.is_empty()
            && self.streams.front_exchange().is_none()
    }

    /// Fail every exchange still open on this connection.
    ///
    /// Exchanges that have not produced a response yet get a bad gateway,
    /// the others are cut: RST_STREAM for HTTP/2 clients, close for
    /// HTTP/1.1 clients.
    pub fn abort(&mut self) {
        let mut http1_started = false;
        let mut http1_waiting = false;

        let mut failed: Vec<(ClientStream, bool)> = self
            .streams
            .snapshot()
            .into_iter()
            .map(|stream| (stream.client, self.responses.contains_key(&stream.proxy)))
            .collect();
        if let Some(state) = self.current.take() {
            failed.push((state.client, true));
        }
        failed.extend(
            self.streams
                .pending_exchanges()
                .into_iter()
                .map(|exchange| (exchange.client, false)),
        );

        for (client, started) in failed {
            match client {
                ClientStream::Http2(stream) if started => {
                    let _ = self.client.send(HttpObject::Reset(Http2Reset {
                        stream,
                        error_code: ErrorCode::INTERNAL_ERROR,
                    }));
                }
                ClientStream::Http2(stream) => {
                    let _ = self.client.send(Http2Headers::bad_gateway(stream).into());
                }
                ClientStream::Http1 if started => http1_started = true,
                ClientStream::Http1 => http1_waiting = true,
            }
        }

        if http1_started || http1_waiting {
            if !http1_started {
                let _ = self.client.send(Http1Response::bad_gateway().into());
            }
            tracing::warn!(connection_id = %self.connection_id, "Closing HTTP/1.1 client after backend failure");
            self.client.close();
        }
        self.responses.clear();
        self.streams.clear();
    }

    fn on_http2(&mut self, object: HttpObject) -> Result<(), ConnectionError> {
        match object {
            HttpObject::Headers(headers) => self.http2_headers(headers),
            HttpObject::Data(data) => self.http2_data(data),
            HttpObject::Reset(reset) => self.http2_reset(reset),
            HttpObject::GoAway(goaway) => self.http2_goaway(goaway),
            HttpObject::Settings(_)
            | HttpObject::SettingsAck
            | HttpObject::Ping(_)
            | HttpObject::WindowUpdate(_) => {
                tracing::trace!(connection_id = %self.connection_id, kind = object.kind(), "Backend control frame not relayed");
                Ok(())
            }
            other => Err(ConnectionError::UnsupportedMessage(other.kind())),
        }
    }

    fn http2_headers(&mut self, frame: Http2Headers) -> Result<(), ConnectionError> {
        let proxy = frame.stream;
        if self.responses.contains_key(&proxy) {
            return self.http2_trailers(frame);
        }
        let Some(stream) = self.streams.get(proxy) else {
            tracing::debug!(connection_id = %self.connection_id, stream = %proxy, "HEADERS for unknown stream dropped");
            return Ok(());
        };

        let status = frame
            .headers
            .status()
            .ok_or(ProtocolError::MissingPseudoHeader(STATUS))?;
        let status = convert::parse_status(status)?;
        if status.is_informational() {
            return match stream.client {
                ClientStream::Http2(client) => {
                    self.send(Http2Headers::new(client, frame.headers, false).into())
                }
                ClientStream::Http1 => {
                    let mut response = convert::http2_to_response(&frame.headers)?;
                    response.body = Some(Bytes::new());
                    self.send(response.into())
                }
            };
        }

        let transcoder = if frame.end_stream {
            None
        } else {
            self.negotiate(&stream, frame.headers.get_str("content-encoding"))
        };
        tracing::debug!(
            connection_id = %self.connection_id,
            stream = %proxy,
            client = %stream.client,
            status = status.as_u16(),
            end_stream = frame.end_stream,
            "Response headers from HTTP/2 backend"
        );

        match stream.client {
            ClientStream::Http2(client) => {
                let mut block = frame.headers;
                if let Some(transcoder) = &transcoder {
                    transcoder.apply_to_block(&mut block);
                }
                self.send(Http2Headers::new(client, block, frame.end_stream).into())?;
            }
            ClientStream::Http1 => {
                let mut response = convert::http2_to_response(&frame.headers)?;
                if let Some(transcoder) = &transcoder {
                    transcoder.apply_to_headers(&mut response.headers);
                }
                if frame.end_stream {
                    response.body = Some(Bytes::new());
                    if !response.headers.contains_key(CONTENT_LENGTH) && has_body(status) {
                        response
                            .headers
                            .insert(CONTENT_LENGTH, HeaderValue::from_static("0"));
                    }
                } else if !response.headers.contains_key(CONTENT_LENGTH) {
                    response
                        .headers
                        .insert(TRANSFER_ENCODING, HeaderValue::from_static("chunked"));
                }
                self.send(response.into())?;
            }
        }

        if frame.end_stream {
            self.streams.remove(proxy);
        } else {
            self.responses.insert(
                proxy,
                ResponseState {
                    client: stream.client,
                    transcoder,
                },
            );
        }
        Ok(())
    }

    fn http2_trailers(&mut self, frame: Http2Headers) -> Result<(), ConnectionError> {
        let Some(mut state) = self.responses.remove(&frame.stream) else {
            return Ok(());
        };
        self.streams.remove(frame.stream);
        let tail = state.body(Bytes::new(), true)?;

        match state.client {
            ClientStream::Http2(client) => {
                if !tail.is_empty() {
                    self.send(Http2Data::new(client, tail, false).into())?;
                }
                self.send(Http2Headers::new(client, frame.headers, true).into())
            }
            ClientStream::Http1 => {
                let trailers = convert::http2_to_trailers(&frame.headers)?;
                self.send(Http1Content::last_with_trailers(tail, trailers).into())
            }
        }
    }

    fn http2_data(&mut self, frame: Http2Data) -> Result<(), ConnectionError> {
        let proxy = frame.stream;
        let Some(state) = self.responses.get_mut(&proxy) else {
            tracing::debug!(connection_id = %self.connection_id, stream = %proxy, "DATA for unknown stream dropped");
            return Ok(());
        };
        let data = state.body(frame.data, frame.end_stream)?;
        let client = state.client;
        if frame.end_stream {
            self.responses.remove(&proxy);
            self.streams.remove(proxy);
        }

        match client {
            ClientStream::Http2(stream) => {
                if frame.end_stream || !data.is_empty() {
                    self.send(Http2Data::new(stream, data, frame.end_stream).into())?;
                }
            }
            ClientStream::Http1 => {
                if frame.end_stream {
                    self.send(Http1Content::last(data).into())?;
                } else if !data.is_empty() {
                    self.send(Http1Content::chunk(data).into())?;
                }
            }
        }
        Ok(())
    }

    fn http2_reset(&mut self, reset: Http2Reset) -> Result<(), ConnectionError> {
        self.responses.remove(&reset.stream);
        match self.streams.remove(reset.stream) {
            Some(Stream {
                client: ClientStream::Http2(client),
                ..
            }) => self.send(HttpObject::Reset(Http2Reset {
                stream: client,
                error_code: reset.error_code,
            })),
            Some(Stream {
                client: ClientStream::Http1,
                ..
            }) => {
                tracing::warn!(
                    connection_id = %self.connection_id,
                    stream = %reset.stream,
                    error_code = %reset.error_code,
                    "Backend reset HTTP/1.1 exchange, closing client"
                );
                self.client.close();
                Ok(())
            }
            None => Ok(()),
        }
    }

    fn http2_goaway(&mut self, goaway: Http2GoAway) -> Result<(), ConnectionError> {
        let refused = self.streams.remove_proxy_streams_above(goaway.last_stream_id);
        tracing::info!(
            connection_id = %self.connection_id,
            last_stream_id = %goaway.last_stream_id,
            error_code = %goaway.error_code,
            refused = refused.len(),
            "Backend sent GOAWAY"
        );

        let mut close_client = false;
        for stream in refused {
            let started = self.responses.remove(&stream.proxy).is_some();
            match stream.client {
                ClientStream::Http2(client) => self.send(HttpObject::Reset(Http2Reset {
                    stream: client,
                    error_code: ErrorCode::REFUSED_STREAM,
                }))?,
                ClientStream::Http1 => {
                    if !started {
                        self.send(Http1Response::bad_gateway().into())?;
                    }
                    close_client = true;
                }
            }
        }
        if close_client {
            self.client.close();
        }
        Err(ConnectionError::GoAway(goaway.error_code))
    }

    fn on_http1(&mut self, object: HttpObject) -> Result<(), ConnectionError> {
        match object {
            HttpObject::Response(response) => self.http1_response(response),
            HttpObject::Content(content) => self.http1_content(content),
            HttpObject::Upgraded(frame) if self.upgraded => self.send(HttpObject::Upgraded(frame)),
            other => Err(ConnectionError::UnsupportedMessage(other.kind())),
        }
    }

    fn http1_response(&mut self, mut response: Http1Response) -> Result<(), ConnectionError> {
        if response.status.is_informational() && response.status != StatusCode::SWITCHING_PROTOCOLS {
            let exchange = self
                .streams
                .front_exchange()
                .ok_or(ProtocolError::UnsolicitedResponse)?;
            return match exchange.client {
                ClientStream::Http1 => self.send(response.into()),
                ClientStream::Http2(client) => self.send(
                    Http2Headers::new(client, convert::response_to_http2(&response), false).into(),
                ),
            };
        }

        if self.current.is_some() {
            return Err(ProtocolError::UnsolicitedResponse.into());
        }
        let exchange = self
            .streams
            .pop_exchange()
            .ok_or(ProtocolError::UnsolicitedResponse)?;

        if response.status == StatusCode::SWITCHING_PROTOCOLS {
            return match exchange.client {
                ClientStream::Http2(_) => Err(ProtocolError::SwitchingProtocols.into()),
                ClientStream::Http1 => {
                    tracing::debug!(connection_id = %self.connection_id, "Backend switched protocols");
                    self.upgraded = true;
                    self.send(response.into())
                }
            };
        }

        let empty = response.body.as_ref().is_some_and(|b| b.is_empty());
        let stream = Stream {
            client: exchange.client,
            proxy: StreamId::CONNECTION,
            accept_encoding: exchange.accept_encoding,
        };
        let transcoder = if empty {
            None
        } else {
            let content_encoding = response
                .headers
                .get(http::header::CONTENT_ENCODING)
                .and_then(|v| v.to_str().ok());
            self.negotiate(&stream, content_encoding)
        };
        tracing::debug!(
            connection_id = %self.connection_id,
            client = %exchange.client,
            status = response.status.as_u16(),
            full = response.is_full(),
            "Response from HTTP/1.1 backend"
        );

        match exchange.client {
            ClientStream::Http1 => {
                if let Some(transcoder) = &transcoder {
                    transcoder.apply_to_headers(&mut response.headers);
                }
                match response.body.take() {
                    Some(body) => {
                        if let Some(transcoder) = transcoder {
                            let body = transcoder.transcode_all(&body)?;
                            response.headers.insert(CONTENT_LENGTH, HeaderValue::from(body.len()));
                            response.body = Some(body);
                        } else {
                            response.body = Some(body);
                        }
                        self.send(response.into())
                    }
                    None => {
                        if transcoder.is_some() && !response.headers.contains_key(TRANSFER_ENCODING) {
                            response
                                .headers
                                .insert(TRANSFER_ENCODING, HeaderValue::from_static("chunked"));
                        }
                        self.send(response.into())?;
                        self.current = Some(ResponseState {
                            client: ClientStream::Http1,
                            transcoder,
                        });
                        Ok(())
                    }
                }
            }
            ClientStream::Http2(client) => {
                let mut block = convert::response_to_http2(&response);
                if let Some(transcoder) = &transcoder {
                    transcoder.apply_to_block(&mut block);
                }
                match response.body {
                    Some(body) => {
                        let body = match transcoder {
                            Some(transcoder) => {
                                let body = transcoder.transcode_all(&body)?;
                                block.set("content-length", body.len().to_string());
                                body
                            }
                            None => body,
                        };
                        if body.is_empty() {
                            self.send(Http2Headers::new(client, block, true).into())
                        } else {
                            self.send(Http2Headers::new(client, block, false).into())?;
                            self.send(Http2Data::new(client, body, true).into())
                        }
                    }
                    None => {
                        self.send(Http2Headers::new(client, block, false).into())?;
                        self.current = Some(ResponseState {
                            client: ClientStream::Http2(client),
                            transcoder,
                        });
                        Ok(())
                    }
                }
            }
        }
    }

    fn http1_content(&mut self, content: Http1Content) -> Result<(), ConnectionError> {
        let Some(state) = self.current.as_mut() else {
            return Err(ProtocolError::NoMessageInProgress.into());
        };
        let last = content.last;
        let data = state.body(content.data, last)?;
        let client = state.client;
        if last {
            self.current = None;
        }

        match client {
            ClientStream::Http1 => {
                if last || !data.is_empty() {
                    self.send(
                        Http1Content {
                            data,
                            last,
                            trailers: content.trailers,
                        }
                        .into(),
                    )?;
                }
                Ok(())
            }
            ClientStream::Http2(stream) => {
                if !last {
                    if !data.is_empty() {
                        self.send(Http2Data::new(stream, data, false).into())?;
                    }
                    return Ok(());
                }
                let trailers = content
                    .trailers
                    .as_ref()
                    .filter(|t| !t.is_empty())
                    .map(convert::trailers_to_http2);
                match trailers {
                    Some(block) => {
                        if !data.is_empty() {
                            self.send(Http2Data::new(stream, data, false).into())?;
                        }
                        self.send(Http2Headers::new(stream, block, true).into())
                    }
                    None => self.send(Http2Data::new(stream, data, true).into()),
                }
            }
        }
    }

    fn negotiate(&self, stream: &Stream, content_encoding: Option<&str>) -> Option<Transcoder> {
        let transcoder = Transcoder::negotiate(
            &self.policy,
            stream.accept_encoding.as_deref(),
            content_encoding,
        )?;
        tracing::debug!(
            connection_id = %self.connection_id,
            client = %stream.client,
            from = %transcoder.source(),
            to = %transcoder.target(),
            "Transcoding response body"
        );
        metrics::record_transcoded_response(transcoder.source().token(), transcoder.target().token());
        Some(transcoder)
    }

    fn send(&self, object: HttpObject) -> Result<(), ConnectionError> {
        tracing::trace!(
            connection_id = %self.connection_id,
            kind = object.kind(),
            stream = ?object.stream(),
            "Writing to client"
        );
        self.client.send(object).map_err(ConnectionError::from)
    }
}

fn has_body(status: StatusCode) -> bool {
    status != StatusCode::NO_CONTENT && status != StatusCode::NOT_MODIFIED
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::Exchange;
    use crate::http::HeaderBlock;
    use crate::net::MpscChannel;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;
    use tokio::sync::mpsc::UnboundedReceiver;

    fn handler(
        backend: Protocol,
    ) -> (DownstreamHandler, Streams, UnboundedReceiver<HttpObject>) {
        let (client, rx) = MpscChannel::pair(false);
        let streams = Streams::new();
        let handler = DownstreamHandler::new(
            ConnectionId::new(),
            Arc::new(client),
            backend,
            streams.clone(),
            Arc::new(CompressionPolicy::default()),
        );
        (handler, streams, rx)
    }

    fn drain(rx: &mut UnboundedReceiver<HttpObject>) -> Vec<HttpObject> {
        let mut objects = Vec::new();
        while let Ok(object) = rx.try_recv() {
            objects.push(object);
        }
        objects
    }

    fn status_block(status: &str) -> HeaderBlock {
        let mut block = HeaderBlock::new();
        block.append(":status", status.to_string());
        block
    }

    fn register(streams: &Streams, proxy: u32, client: ClientStream, accept: Option<&str>) {
        streams.put(
            StreamId::new(proxy),
            Stream {
                client,
                proxy: StreamId::new(proxy),
                accept_encoding: accept.map(str::to_string),
            },
        );
    }

    fn gzip(data: &[u8]) -> Vec<u8> {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(data).unwrap();
        encoder.finish().unwrap()
    }

    #[test]
    fn http2_response_to_http1_client() {
        let (mut handler, streams, mut rx) = handler(Protocol::Http2);
        register(&streams, 1, ClientStream::Http1, None);

        handler
            .on_inbound(Http2Headers::new(StreamId::new(1), status_block("200"), false).into())
            .unwrap();
        handler
            .on_inbound(Http2Data::new(StreamId::new(1), "Meow", true).into())
            .unwrap();

        let objects = drain(&mut rx);
        assert_eq!(objects.len(), 2);
        let HttpObject::Response(response) = &objects[0] else {
            panic!("expected response, got {:?}", objects[0]);
        };
        assert_eq!(response.status, StatusCode::OK);
        assert!(!response.is_full());
        assert_eq!(response.headers[TRANSFER_ENCODING], "chunked");
        assert_eq!(objects[1], HttpObject::from(Http1Content::last("Meow")));
        assert!(streams.is_empty());
    }

    #[test]
    fn http2_passthrough_remaps_to_client_stream() {
        let (mut handler, streams, mut rx) = handler(Protocol::Http2);
        register(&streams, 3, ClientStream::Http2(StreamId::new(41)), Some("gzip"));

        handler
            .on_inbound(Http2Headers::new(StreamId::new(3), status_block("204"), true).into())
            .unwrap();
        let objects = drain(&mut rx);
        assert_eq!(objects[0].stream(), Some(StreamId::new(41)));
        assert!(streams.is_empty());
    }

    #[test]
    fn http2_status_101_is_protocol_error() {
        let (mut handler, streams, _rx) = handler(Protocol::Http2);
        register(&streams, 1, ClientStream::Http2(StreamId::new(1)), None);
        let error = handler
            .on_inbound(Http2Headers::new(StreamId::new(1), status_block("101"), false).into())
            .unwrap_err();
        assert!(matches!(
            error,
            ConnectionError::Protocol(ProtocolError::SwitchingProtocols)
        ));
    }

    #[test]
    fn http1_response_to_http2_client_with_trailers() {
        let (mut handler, streams, mut rx) = handler(Protocol::Http1);
        streams.push_exchange(Exchange {
            client: ClientStream::Http2(StreamId::new(9)),
            accept_encoding: None,
        });

        let mut response = Http1Response::new(StatusCode::OK);
        response
            .headers
            .insert(TRANSFER_ENCODING, HeaderValue::from_static("chunked"));
        handler.on_inbound(response.into()).unwrap();
        handler.on_inbound(Http1Content::chunk("Me").into()).unwrap();
        let mut trailers = http::HeaderMap::new();
        trailers.insert("x-checksum", HeaderValue::from_static("abc"));
        handler
            .on_inbound(Http1Content::last_with_trailers("ow", trailers).into())
            .unwrap();

        let objects = drain(&mut rx);
        assert_eq!(objects.len(), 4);
        let HttpObject::Headers(head) = &objects[0] else {
            panic!("expected headers");
        };
        assert_eq!(head.stream, StreamId::new(9));
        assert_eq!(head.headers.status(), Some("200"));
        assert!(!head.headers.contains("transfer-encoding"));
        assert_eq!(objects[1], HttpObject::from(Http2Data::new(StreamId::new(9), "Me", false)));
        assert_eq!(objects[2], HttpObject::from(Http2Data::new(StreamId::new(9), "ow", false)));
        let HttpObject::Headers(tail) = &objects[3] else {
            panic!("expected trailers");
        };
        assert!(tail.end_stream);
        assert_eq!(tail.headers.get_str("x-checksum"), Some("abc"));
    }

    #[test]
    fn http1_backend_101_to_http2_client_is_protocol_error() {
        let (mut handler, streams, _rx) = handler(Protocol::Http1);
        streams.push_exchange(Exchange {
            client: ClientStream::Http2(StreamId::new(1)),
            accept_encoding: None,
        });
        let error = handler
            .on_inbound(Http1Response::new(StatusCode::SWITCHING_PROTOCOLS).into())
            .unwrap_err();
        assert!(error.is_fatal());
    }

    #[test]
    fn interim_response_keeps_exchange() {
        let (mut handler, streams, mut rx) = handler(Protocol::Http1);
        streams.push_exchange(Exchange {
            client: ClientStream::Http1,
            accept_encoding: None,
        });
        handler
            .on_inbound(Http1Response::new(StatusCode::CONTINUE).into())
            .unwrap();
        assert!(streams.front_exchange().is_some());
        handler
            .on_inbound(Http1Response::full(StatusCode::OK, "done").into())
            .unwrap();
        assert!(streams.front_exchange().is_none());
        assert_eq!(drain(&mut rx).len(), 2);
    }

    #[test]
    fn gzip_body_decoded_for_client_without_gzip() {
        let (mut handler, streams, mut rx) = handler(Protocol::Http1);
        streams.push_exchange(Exchange {
            client: ClientStream::Http1,
            accept_encoding: None,
        });
        let mut response = Http1Response::full(StatusCode::OK, gzip(b"Meow"));
        response
            .headers
            .insert(http::header::CONTENT_ENCODING, HeaderValue::from_static("gzip"));
        handler.on_inbound(response.into()).unwrap();

        let objects = drain(&mut rx);
        let HttpObject::Response(response) = &objects[0] else {
            panic!("expected response");
        };
        assert_eq!(response.body.as_deref(), Some(&b"Meow"[..]));
        assert!(!response.headers.contains_key(http::header::CONTENT_ENCODING));
        assert_eq!(response.headers[CONTENT_LENGTH], "4");
    }

    #[test]
    fn backend_reset_is_relayed() {
        let (mut handler, streams, mut rx) = handler(Protocol::Http2);
        register(&streams, 5, ClientStream::Http2(StreamId::new(7)), None);
        handler
            .on_inbound(HttpObject::Reset(Http2Reset {
                stream: StreamId::new(5),
                error_code: ErrorCode::CANCEL,
            }))
            .unwrap();
        assert_eq!(
            drain(&mut rx),
            vec![HttpObject::Reset(Http2Reset {
                stream: StreamId::new(7),
                error_code: ErrorCode::CANCEL
            })]
        );
    }

    #[test]
    fn backend_goaway_refuses_streams_above_last() {
        let (mut handler, streams, mut rx) = handler(Protocol::Http2);
        register(&streams, 1, ClientStream::Http2(StreamId::new(11)), None);
        register(&streams, 3, ClientStream::Http2(StreamId::new(13)), None);

        let error = handler
            .on_inbound(HttpObject::GoAway(Http2GoAway {
                last_stream_id: StreamId::new(1),
                error_code: ErrorCode::NO_ERROR,
                debug_data: Bytes::new(),
            }))
            .unwrap_err();
        assert!(matches!(error, ConnectionError::GoAway(ErrorCode::NO_ERROR)));
        assert_eq!(
            drain(&mut rx),
            vec![HttpObject::Reset(Http2Reset {
                stream: StreamId::new(13),
                error_code: ErrorCode::REFUSED_STREAM
            })]
        );
        assert_eq!(streams.len(), 1);
    }

    #[test]
    fn abort_answers_waiting_and_cuts_started() {
        let (mut handler, streams, mut rx) = handler(Protocol::Http2);
        register(&streams, 1, ClientStream::Http2(StreamId::new(1)), None);
        register(&streams, 3, ClientStream::Http2(StreamId::new(3)), None);
        handler
            .on_inbound(Http2Headers::new(StreamId::new(1), status_block("200"), false).into())
            .unwrap();
        drain(&mut rx);

        handler.abort();
        let objects = drain(&mut rx);
        assert_eq!(
            objects[0],
            HttpObject::Reset(Http2Reset {
                stream: StreamId::new(1),
                error_code: ErrorCode::INTERNAL_ERROR
            })
        );
        assert_eq!(objects[1], HttpObject::from(Http2Headers::bad_gateway(StreamId::new(3))));
        assert!(streams.is_empty());
    }

    #[test]
    fn backend_control_frames_are_not_relayed() {
        let (mut handler, _streams, mut rx) = handler(Protocol::Http2);
        handler.on_inbound(HttpObject::SettingsAck).unwrap();
        assert!(drain(&mut rx).is_empty());
    }
}
