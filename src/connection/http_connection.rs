//! Protocol-aware backend connection.
//!
//! # Responsibilities
//! - Own the backend channel once negotiation completes
//! - Buffer writes in a bounded backlog until then, replay them in order
//! - Route every write through the translation path chosen by
//!   {connection protocol} × {message protocol}
//! - Allocate proxy-side stream ids and keep the stream registry current
//!
//! # Dispatch
//! ```text
//!                      HTTP/1.x message        HTTP/2 frame
//! HTTP/2 connection    convert 1.1 → 2         remap stream id, forward
//! HTTP/1.1 connection  forward                 convert 2 → 1.1
//! ```

use std::cell::OnceCell;
use std::sync::Arc;

use bytes::Bytes;
use http::header::{CONTENT_LENGTH, TRANSFER_ENCODING};
use http::{HeaderMap, HeaderValue};

use crate::config::ConnectionConfig;
use crate::connection::backlog::{Backlog, WaitingRequests};
use crate::connection::error::ConnectionError;
use crate::connection::state::{ConnectionId, ConnectionState};
use crate::connection::streams::{ClientStream, Exchange, Stream, Streams};
use crate::http::compression::{self, CompressionPolicy};
use crate::http::{
    convert, HeaderBlock, Http1Content, Http1Request, Http2Data, Http2GoAway, Http2Headers,
    Http2Reset, Http2WindowUpdate, HttpObject, ProtocolError, StreamId,
};
use crate::load_balancer::Node;
use crate::net::{Channel, ConnectError, Protocol};
use crate::observability::metrics;

/// A message whose head was translated and whose body is still arriving.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingTranslation {
    /// Proxy stream on an HTTP/2 connection, client stream on HTTP/1.1.
    pub stream: StreamId,
    pub accept_encoding: Option<String>,
}

/// Outcome of replaying the backlog.
#[derive(Debug, Default)]
pub struct ReplayReport {
    pub replayed: usize,
    /// Non-fatal errors hit by individual replayed writes.
    pub rejected: Vec<ConnectionError>,
}

enum State {
    Initialized(Backlog),
    Active(Box<dyn Channel>),
    Closed,
}

/// One proxy-to-backend link.
pub struct HttpConnection {
    id: ConnectionId,
    node: Arc<Node>,
    state: State,
    protocol: OnceCell<Protocol>,
    streams: Streams,
    pending: Option<PendingTranslation>,
    next_stream_id: u32,
    policy: Arc<CompressionPolicy>,
}

impl HttpConnection {
    /// Create a connection to `node` in the initialized state, with an
    /// empty backlog sized from `config`.
    pub fn new(node: Arc<Node>, config: &ConnectionConfig, policy: Arc<CompressionPolicy>) -> Self {
        Self {
            id: ConnectionId::new(),
            node,
            state: State::Initialized(Backlog::new(config.backlog_capacity)),
            protocol: OnceCell::new(),
            streams: Streams::new(),
            pending: None,
            next_stream_id: 1,
            policy,
        }
    }

    /// Get the connection ID.
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Get the backend node this connection serves.
    pub fn node(&self) -> &Arc<Node> {
        &self.node
    }

    /// Get the current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        match self.state {
            State::Initialized(_) => ConnectionState::Initialized,
            State::Active(_) => ConnectionState::Active,
            State::Closed => ConnectionState::Closed,
        }
    }

    /// Check if the connection has been closed.
    pub fn is_closed(&self) -> bool {
        matches!(self.state, State::Closed)
    }

    /// Negotiated protocol, once known.
    pub fn protocol(&self) -> Option<Protocol> {
        self.protocol.get().copied()
    }

    /// True once the backend negotiated HTTP/2.
    pub fn is_http2(&self) -> bool {
        self.protocol() == Some(Protocol::Http2)
    }

    /// Stream registry, shared with the response path.
    pub fn streams(&self) -> &Streams {
        &self.streams
    }

    /// HTTP/1.1 ⇄ HTTP/2 message whose body is still being translated.
    pub fn pending(&self) -> Option<&PendingTranslation> {
        self.pending.as_ref()
    }

    /// Number of writes held in the backlog. Zero once negotiated.
    pub fn backlog_len(&self) -> usize {
        match &self.state {
            State::Initialized(backlog) => backlog.len(),
            _ => 0,
        }
    }

    /// Write one object towards the backend.
    ///
    /// Before negotiation the object is queued (or dropped when the backlog
    /// is full), after close it is discarded. Fatal errors close the
    /// connection before they are returned.
    pub fn write_and_flush(&mut self, object: HttpObject) -> Result<(), ConnectionError> {
        match &mut self.state {
            State::Initialized(backlog) => {
                if let Err(rejected) = backlog.push(object) {
                    tracing::warn!(
                        connection_id = %self.id,
                        kind = rejected.kind(),
                        capacity = backlog.capacity(),
                        "Backlog full, dropping write"
                    );
                    metrics::record_backlog_dropped();
                }
                Ok(())
            }
            State::Closed => {
                tracing::trace!(connection_id = %self.id, kind = object.kind(), "Discarding write on closed connection");
                Ok(())
            }
            State::Active(_) => {
                let result = self.dispatch(object);
                if let Err(error) = &result {
                    if error.is_fatal() {
                        self.fail(error);
                    }
                }
                result
            }
        }
    }

    /// Consume the single negotiation result.
    ///
    /// On success the backlog is replayed through [`Self::write_and_flush`]
    /// in enqueue order. On failure it is released and the requests that
    /// were waiting are reported. Calls after the first are ignored.
    pub fn process_backlog(
        &mut self,
        outcome: Result<(Box<dyn Channel>, Protocol), ConnectError>,
    ) -> Result<ReplayReport, ConnectionError> {
        let backlog = match std::mem::replace(&mut self.state, State::Closed) {
            State::Initialized(backlog) => backlog,
            other => {
                self.state = other;
                tracing::warn!(
                    connection_id = %self.id,
                    state = %self.state(),
                    "Negotiation result after connection left initialized state, ignoring"
                );
                if let Ok((channel, _)) = outcome {
                    channel.close();
                }
                return Ok(ReplayReport::default());
            }
        };

        match outcome {
            Ok((channel, protocol)) => {
                if self.protocol.set(protocol).is_err() {
                    tracing::warn!(connection_id = %self.id, "Protocol already negotiated");
                }
                self.state = State::Active(channel);
                tracing::info!(
                    connection_id = %self.id,
                    node = %self.node,
                    protocol = %protocol,
                    backlog = backlog.len(),
                    "Backend connection active"
                );

                let mut report = ReplayReport::default();
                for object in backlog.into_objects() {
                    match self.write_and_flush(object) {
                        Ok(()) => report.replayed += 1,
                        Err(error) if !error.is_fatal() => report.rejected.push(error),
                        Err(error) => return Err(error),
                    }
                }
                Ok(report)
            }
            Err(source) => {
                let mut backlog = backlog;
                let waiting = backlog.waiting_requests();
                let released = backlog.release();
                tracing::error!(
                    connection_id = %self.id,
                    node = %self.node,
                    error = %source,
                    released,
                    "Backend connect failed"
                );
                metrics::record_connect_failure();
                self.streams.clear();
                self.pending = None;
                Err(ConnectionError::Connect { source, waiting })
            }
        }
    }

    /// Whether `object` belongs to an exchange already open on this
    /// connection rather than starting a new one.
    ///
    /// Control frames always count as belonging.
    pub fn continues_open_exchange(&self, object: &HttpObject) -> bool {
        let http2 = self.is_http2();
        match object {
            HttpObject::Request(_) => false,
            HttpObject::Content(_) => !http2 || self.pending.is_some(),
            HttpObject::Headers(Http2Headers { stream, .. })
            | HttpObject::Data(Http2Data { stream, .. }) => {
                if http2 {
                    self.streams.proxy_stream_for(*stream).is_some()
                } else {
                    self.pending_stream() == Some(*stream)
                }
            }
            _ => true,
        }
    }

    /// Give up on a connection that never became active.
    ///
    /// The backlog is released and the requests that were waiting in it
    /// are reported so they can be answered. Nothing is reported once the
    /// connection has left the initialized state.
    pub fn abandon(&mut self) -> WaitingRequests {
        let State::Initialized(backlog) = &self.state else {
            return WaitingRequests::default();
        };
        let waiting = backlog.waiting_requests();
        tracing::info!(
            connection_id = %self.id,
            http1 = waiting.http1,
            http2 = waiting.http2.len(),
            "Abandoning connection before negotiation"
        );
        self.close();
        self.streams.clear();
        waiting
    }

    /// Close the connection, releasing the backlog.
    ///
    /// The stream registry is left as is: the response path still has to
    /// fail whatever was in flight.
    pub fn close(&mut self) {
        match std::mem::replace(&mut self.state, State::Closed) {
            State::Initialized(mut backlog) => {
                let released = backlog.release();
                if released > 0 {
                    tracing::debug!(connection_id = %self.id, released, "Released backlog on close");
                }
            }
            State::Active(channel) => channel.close(),
            State::Closed => return,
        }
        self.pending = None;
        tracing::info!(connection_id = %self.id, node = %self.node, "Backend connection closed");
    }

    fn fail(&mut self, error: &ConnectionError) {
        tracing::error!(connection_id = %self.id, error = %error, "Closing backend connection");
        if let ConnectionError::Protocol(protocol_error) = error {
            metrics::record_protocol_error(protocol_error.kind());
        }
        self.close();
    }

    fn dispatch(&mut self, object: HttpObject) -> Result<(), ConnectionError> {
        let http2 = self.is_http2();
        match object {
            HttpObject::Request(request) if http2 => self.request_to_http2(request),
            HttpObject::Request(mut request) => {
                let accept_encoding = self.capture_accept_encoding(&mut request.headers);
                self.streams.push_exchange(Exchange {
                    client: ClientStream::Http1,
                    accept_encoding,
                });
                metrics::record_translation("http1_passthrough");
                self.send(request.into())
            }
            HttpObject::Content(content) if http2 => self.content_to_http2(content),
            HttpObject::Content(content) => self.send(content.into()),
            HttpObject::Headers(headers) if http2 => self.forward_headers(headers),
            HttpObject::Headers(headers) => self.headers_to_http1(headers),
            HttpObject::Data(data) if http2 => self.forward_data(data),
            HttpObject::Data(data) => self.data_to_http1(data),
            object @ (HttpObject::Settings(_) | HttpObject::SettingsAck | HttpObject::Ping(_)) => {
                self.send(object)
            }
            HttpObject::GoAway(goaway) if http2 => self.forward_goaway(goaway),
            HttpObject::GoAway(goaway) => {
                tracing::info!(
                    connection_id = %self.id,
                    error_code = %goaway.error_code,
                    "GOAWAY on HTTP/1.1 connection, closing"
                );
                self.close();
                Ok(())
            }
            HttpObject::WindowUpdate(update) if http2 => self.forward_window_update(update),
            HttpObject::WindowUpdate(update) => {
                tracing::trace!(connection_id = %self.id, stream = %update.stream, "Dropping WINDOW_UPDATE for HTTP/1.1");
                Ok(())
            }
            HttpObject::Reset(reset) if http2 => self.forward_reset(reset),
            HttpObject::Reset(reset) => {
                if self.pending_stream() == Some(reset.stream) {
                    tracing::debug!(connection_id = %self.id, stream = %reset.stream, "Pending translation reset by client");
                    self.pending = None;
                }
                Ok(())
            }
            HttpObject::Upgraded(frame) if !http2 => self.send(HttpObject::Upgraded(frame)),
            object @ (HttpObject::Upgraded(_) | HttpObject::Response(_)) => {
                tracing::warn!(
                    connection_id = %self.id,
                    kind = object.kind(),
                    "Unsupported message for backend connection"
                );
                Err(ConnectionError::UnsupportedMessage(object.kind()))
            }
        }
    }

    fn request_to_http2(&mut self, mut request: Http1Request) -> Result<(), ConnectionError> {
        if let Some(pending) = &self.pending {
            return Err(ProtocolError::MessageInProgress(pending.stream).into());
        }
        let accept_encoding = self.capture_accept_encoding(&mut request.headers);
        let block = convert::request_to_http2(&request, self.is_secure());
        let stream = self.allocate_stream()?;
        self.streams.put(
            stream,
            Stream {
                client: ClientStream::Http1,
                proxy: stream,
                accept_encoding: accept_encoding.clone(),
            },
        );
        metrics::record_translation("http1_to_http2");
        tracing::debug!(
            connection_id = %self.id,
            stream = %stream,
            method = %request.method,
            full = request.is_full(),
            "Translated HTTP/1.1 request to HTTP/2"
        );

        self.send(Http2Headers::new(stream, block, false).into())?;
        match request.body {
            Some(body) => self.send(Http2Data::new(stream, body, true).into()),
            None => {
                self.set_pending(PendingTranslation {
                    stream,
                    accept_encoding,
                });
                Ok(())
            }
        }
    }

    fn content_to_http2(&mut self, content: Http1Content) -> Result<(), ConnectionError> {
        let stream = self
            .pending_stream()
            .ok_or(ProtocolError::NoMessageInProgress)?;
        if !content.last {
            return self.send(Http2Data::new(stream, content.data, false).into());
        }

        let trailers = content
            .non_empty_trailers()
            .map(convert::trailers_to_http2);
        self.pending = None;
        match trailers {
            Some(block) => {
                self.send(Http2Data::new(stream, content.data, false).into())?;
                self.send(Http2Headers::new(stream, block, true).into())
            }
            None => self.send(Http2Data::new(stream, content.data, true).into()),
        }
    }

    fn forward_headers(&mut self, mut headers: Http2Headers) -> Result<(), ConnectionError> {
        if let Some(proxy) = self.streams.proxy_stream_for(headers.stream) {
            tracing::trace!(connection_id = %self.id, stream = %proxy, "Forwarding trailing HEADERS");
            headers.stream = proxy;
            return self.send(headers.into());
        }

        let client = headers.stream;
        let accept_encoding = self.capture_accept_encoding_block(&mut headers.headers);
        let proxy = self.allocate_stream()?;
        self.streams.put(
            proxy,
            Stream {
                client: ClientStream::Http2(client),
                proxy,
                accept_encoding,
            },
        );
        metrics::record_translation("http2_passthrough");
        tracing::debug!(
            connection_id = %self.id,
            client_stream = %client,
            stream = %proxy,
            "Opened proxy stream"
        );
        headers.stream = proxy;
        self.send(headers.into())
    }

    fn forward_data(&mut self, mut data: Http2Data) -> Result<(), ConnectionError> {
        let proxy = self
            .streams
            .proxy_stream_for(data.stream)
            .ok_or(ProtocolError::UnknownStream(data.stream))?;
        data.stream = proxy;
        self.send(data.into())
    }

    fn forward_goaway(&mut self, goaway: Http2GoAway) -> Result<(), ConnectionError> {
        let removed = self.streams.remove_client_streams_from(goaway.last_stream_id);
        tracing::info!(
            connection_id = %self.id,
            last_stream_id = %goaway.last_stream_id,
            error_code = %goaway.error_code,
            removed = removed.len(),
            "Forwarding GOAWAY"
        );
        self.send(HttpObject::GoAway(Http2GoAway {
            last_stream_id: StreamId::CONNECTION,
            ..goaway
        }))
    }

    fn forward_window_update(&mut self, update: Http2WindowUpdate) -> Result<(), ConnectionError> {
        if update.stream.is_connection() {
            return self.send(HttpObject::WindowUpdate(update));
        }
        match self.streams.proxy_stream_for(update.stream) {
            Some(proxy) => self.send(HttpObject::WindowUpdate(Http2WindowUpdate {
                stream: proxy,
                ..update
            })),
            None => {
                tracing::trace!(connection_id = %self.id, stream = %update.stream, "WINDOW_UPDATE for unknown stream dropped");
                Ok(())
            }
        }
    }

    fn forward_reset(&mut self, reset: Http2Reset) -> Result<(), ConnectionError> {
        match self.streams.proxy_stream_for(reset.stream) {
            Some(proxy) => {
                self.streams.remove(proxy);
                tracing::debug!(
                    connection_id = %self.id,
                    client_stream = %reset.stream,
                    stream = %proxy,
                    error_code = %reset.error_code,
                    "Forwarding RST_STREAM"
                );
                self.send(HttpObject::Reset(Http2Reset {
                    stream: proxy,
                    ..reset
                }))
            }
            None => {
                tracing::trace!(connection_id = %self.id, stream = %reset.stream, "RST_STREAM for unknown stream dropped");
                Ok(())
            }
        }
    }

    fn headers_to_http1(&mut self, mut headers: Http2Headers) -> Result<(), ConnectionError> {
        if let Some(pending) = self.pending_stream() {
            if pending != headers.stream {
                tracing::warn!(
                    connection_id = %self.id,
                    stream = %headers.stream,
                    pending = %pending,
                    "HTTP/1.1 backend busy with another stream, refusing"
                );
                return Err(ConnectionError::StreamRefused(headers.stream));
            }
            let trailers = convert::http2_to_trailers(&headers.headers)?;
            self.pending = None;
            return self.send(Http1Content::last_with_trailers(Bytes::new(), trailers).into());
        }

        let accept_encoding = self.capture_accept_encoding_block(&mut headers.headers);
        let mut request = convert::http2_to_request(&headers.headers)?;
        self.streams.push_exchange(Exchange {
            client: ClientStream::Http2(headers.stream),
            accept_encoding: accept_encoding.clone(),
        });
        metrics::record_translation("http2_to_http1");
        tracing::debug!(
            connection_id = %self.id,
            stream = %headers.stream,
            method = %request.method,
            end_stream = headers.end_stream,
            "Translated HTTP/2 request to HTTP/1.1"
        );

        if headers.end_stream {
            request.body = Some(Bytes::new());
            return self.send(request.into());
        }
        if !request.headers.contains_key(CONTENT_LENGTH) {
            request
                .headers
                .insert(TRANSFER_ENCODING, HeaderValue::from_static("chunked"));
        }
        self.send(request.into())?;
        self.set_pending(PendingTranslation {
            stream: headers.stream,
            accept_encoding,
        });
        Ok(())
    }

    fn data_to_http1(&mut self, data: Http2Data) -> Result<(), ConnectionError> {
        if self.pending_stream() != Some(data.stream) {
            tracing::debug!(connection_id = %self.id, stream = %data.stream, "DATA for a stream not being translated");
            return Err(ConnectionError::StreamRefused(data.stream));
        }
        if data.end_stream {
            self.pending = None;
            self.send(Http1Content::last(data.data).into())
        } else {
            self.send(Http1Content::chunk(data.data).into())
        }
    }

    fn send(&self, object: HttpObject) -> Result<(), ConnectionError> {
        match &self.state {
            State::Active(channel) => {
                tracing::trace!(
                    connection_id = %self.id,
                    kind = object.kind(),
                    stream = ?object.stream(),
                    "Writing to backend"
                );
                channel.send(object).map_err(ConnectionError::from)
            }
            _ => Err(ConnectionError::Closed),
        }
    }

    fn is_secure(&self) -> bool {
        match &self.state {
            State::Active(channel) => channel.is_secure(),
            _ => self.node.secure,
        }
    }

    fn capture_accept_encoding(&self, headers: &mut HeaderMap) -> Option<String> {
        if self.policy.enabled {
            compression::rewrite_accept_encoding(headers)
        } else {
            compression::accept_encoding_of(headers)
        }
    }

    fn capture_accept_encoding_block(&self, block: &mut HeaderBlock) -> Option<String> {
        if self.policy.enabled {
            compression::rewrite_accept_encoding_block(block)
        } else {
            compression::accept_encoding_of_block(block)
        }
    }

    fn allocate_stream(&mut self) -> Result<StreamId, ProtocolError> {
        if self.next_stream_id > StreamId::MAX.as_u32() {
            return Err(ProtocolError::StreamIdsExhausted);
        }
        let id = StreamId::new(self.next_stream_id);
        self.next_stream_id += 2;
        Ok(id)
    }

    fn pending_stream(&self) -> Option<StreamId> {
        self.pending.as_ref().map(|p| p.stream)
    }

    fn set_pending(&mut self, pending: PendingTranslation) {
        debug_assert!(
            self.pending.is_none(),
            "translation already pending on stream {:?}",
            self.pending_stream()
        );
        self.pending = Some(pending);
    }
}

impl std::fmt::Debug for HttpConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpConnection")
            .field("id", &self.id)
            .field("node", &self.node.name)
            .field("state", &self.state())
            .field("protocol", &self.protocol())
            .field("streams", &self.streams.len())
            .field("pending", &self.pending)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::{ErrorCode, Http2Ping};
    use crate::net::MpscChannel;
    use http::header::ACCEPT_ENCODING;
    use http::Method;
    use tokio::sync::mpsc::UnboundedReceiver;

    fn node() -> Arc<Node> {
        Arc::new(Node::parse("backend-1", "http://127.0.0.1:8080").unwrap())
    }

    fn connection(capacity: usize) -> HttpConnection {
        let config = ConnectionConfig {
            backlog_capacity: capacity,
            ..ConnectionConfig::default()
        };
        HttpConnection::new(node(), &config, Arc::new(CompressionPolicy::default()))
    }

    fn activate(
        connection: &mut HttpConnection,
        protocol: Protocol,
    ) -> UnboundedReceiver<HttpObject> {
        let (channel, rx) = MpscChannel::pair(false);
        connection
            .process_backlog(Ok((Box::new(channel), protocol)))
            .unwrap();
        rx
    }

    fn active(protocol: Protocol) -> (HttpConnection, UnboundedReceiver<HttpObject>) {
        let mut connection = connection(100);
        let rx = activate(&mut connection, protocol);
        (connection, rx)
    }

    fn drain(rx: &mut UnboundedReceiver<HttpObject>) -> Vec<HttpObject> {
        let mut objects = Vec::new();
        while let Ok(object) = rx.try_recv() {
            objects.push(object);
        }
        objects
    }

    fn h2_request(stream: u32, end_stream: bool) -> Http2Headers {
        let mut block = HeaderBlock::new();
        block.append(":method", "POST");
        block.append(":scheme", "https");
        block.append(":authority", "example.com");
        block.append(":path", "/upload");
        block.append("accept-encoding", "gzip");
        Http2Headers::new(StreamId::new(stream), block, end_stream)
    }

    #[test]
    fn writes_queue_until_negotiated() {
        let mut connection = connection(100);
        assert_eq!(connection.state(), ConnectionState::Initialized);
        connection.write_and_flush(HttpObject::SettingsAck).unwrap();
        connection
            .write_and_flush(HttpObject::Ping(Http2Ping {
                payload: [1; 8],
                ack: false,
            }))
            .unwrap();
        assert_eq!(connection.backlog_len(), 2);

        let mut rx = activate(&mut connection, Protocol::Http2);
        assert_eq!(connection.state(), ConnectionState::Active);
        assert_eq!(connection.backlog_len(), 0);

        let objects = drain(&mut rx);
        assert_eq!(objects.len(), 2);
        assert_eq!(objects[0], HttpObject::SettingsAck);
        assert_eq!(objects[0].kind(), "http2-settings-ack");
        assert_eq!(objects[1].kind(), "http2-ping");
    }

    #[test]
    fn backlog_drops_past_capacity_without_error() {
        let mut connection = connection(100);
        for _ in 0..101 {
            assert!(connection.write_and_flush(HttpObject::SettingsAck).is_ok());
        }
        assert_eq!(connection.backlog_len(), 100);
    }

    #[test]
    fn second_negotiation_result_is_ignored() {
        let mut connection = connection(10);
        let _rx = activate(&mut connection, Protocol::Http2);

        let (late, mut late_rx) = MpscChannel::pair(false);
        let report = connection
            .process_backlog(Ok((Box::new(late), Protocol::Http1)))
            .unwrap();
        assert_eq!(report.replayed, 0);
        assert_eq!(connection.protocol(), Some(Protocol::Http2));
        assert!(late_rx.try_recv().is_err());
    }

    #[test]
    fn connect_failure_releases_backlog_and_reports_waiting() {
        let mut connection = connection(10);
        connection
            .write_and_flush(h2_request(3, true).into())
            .unwrap();
        connection
            .write_and_flush(h2_request(5, false).into())
            .unwrap();

        let error = connection
            .process_backlog(Err(ConnectError::Refused("127.0.0.1:8080".into())))
            .unwrap_err();
        match error {
            ConnectionError::Connect { waiting, .. } => {
                assert_eq!(waiting.http2, vec![StreamId::new(3), StreamId::new(5)]);
            }
            other => panic!("unexpected error {other:?}"),
        }
        assert!(connection.is_closed());
        assert!(connection.write_and_flush(HttpObject::SettingsAck).is_ok());
    }

    #[test]
    fn full_get_becomes_headers_then_empty_data() {
        let (mut connection, mut rx) = active(Protocol::Http2);
        let mut request = Http1Request::full(Method::GET, "/", Bytes::new());
        request
            .headers
            .insert(http::header::HOST, HeaderValue::from_static("example.com"));
        request
            .headers
            .insert(ACCEPT_ENCODING, HeaderValue::from_static("gzip, br"));
        connection.write_and_flush(request.into()).unwrap();

        let objects = drain(&mut rx);
        assert_eq!(objects.len(), 2);
        let HttpObject::Headers(headers) = &objects[0] else {
            panic!("expected headers, got {:?}", objects[0]);
        };
        assert!(!headers.end_stream);
        assert_eq!(headers.headers.method(), Some("GET"));
        assert_eq!(headers.headers.path(), Some("/"));
        assert_eq!(headers.headers.get_str("accept-encoding"), Some("br, gzip, deflate"));
        assert_eq!(
            objects[1],
            HttpObject::Data(Http2Data::new(headers.stream, Bytes::new(), true))
        );

        let stream = connection.streams().get(headers.stream).unwrap();
        assert_eq!(stream.client, ClientStream::Http1);
        assert_eq!(stream.accept_encoding.as_deref(), Some("gzip, br"));
        assert!(connection.pending().is_none());
    }

    #[test]
    fn chunked_request_with_trailers() {
        let (mut connection, mut rx) = active(Protocol::Http2);
        connection
            .write_and_flush(Http1Request::new(Method::POST, "/submit").into())
            .unwrap();
        let stream = connection.pending().unwrap().stream;

        connection
            .write_and_flush(Http1Content::chunk("abc").into())
            .unwrap();
        let mut trailers = HeaderMap::new();
        trailers.insert("grpc-status", HeaderValue::from_static("0"));
        connection
            .write_and_flush(Http1Content::last_with_trailers("def", trailers).into())
            .unwrap();
        assert!(connection.pending().is_none());

        let objects = drain(&mut rx);
        assert_eq!(objects.len(), 4);
        assert_eq!(objects[1], HttpObject::from(Http2Data::new(stream, "abc", false)));
        assert_eq!(objects[2], HttpObject::from(Http2Data::new(stream, "def", false)));
        let HttpObject::Headers(trailer_frame) = &objects[3] else {
            panic!("expected trailers");
        };
        assert!(trailer_frame.end_stream);
        assert_eq!(trailer_frame.headers.get_str("grpc-status"), Some("0"));
    }

    #[test]
    fn content_without_pending_is_fatal_on_http2() {
        let (mut connection, _rx) = active(Protocol::Http2);
        let error = connection
            .write_and_flush(Http1Content::last("x").into())
            .unwrap_err();
        assert!(matches!(
            error,
            ConnectionError::Protocol(ProtocolError::NoMessageInProgress)
        ));
        assert!(connection.is_closed());
    }

    #[test]
    fn passthrough_keeps_streams_isolated() {
        let (mut connection, mut rx) = active(Protocol::Http2);
        connection.write_and_flush(h2_request(11, false).into()).unwrap();
        connection.write_and_flush(h2_request(13, false).into()).unwrap();
        let a = connection.streams().proxy_stream_for(StreamId::new(11)).unwrap();
        let b = connection.streams().proxy_stream_for(StreamId::new(13)).unwrap();
        assert_ne!(a, b);

        connection
            .write_and_flush(Http2Data::new(StreamId::new(13), "for b", true).into())
            .unwrap();
        connection
            .write_and_flush(Http2Data::new(StreamId::new(11), "for a", true).into())
            .unwrap();

        let objects = drain(&mut rx);
        assert_eq!(objects[2], HttpObject::from(Http2Data::new(b, "for b", true)));
        assert_eq!(objects[3], HttpObject::from(Http2Data::new(a, "for a", true)));
    }

    #[test]
    fn data_for_unknown_stream_is_protocol_error() {
        let (mut connection, _rx) = active(Protocol::Http2);
        let error = connection
            .write_and_flush(Http2Data::new(StreamId::new(9), "x", true).into())
            .unwrap_err();
        assert!(matches!(
            error,
            ConnectionError::Protocol(ProtocolError::UnknownStream(_))
        ));
        assert_eq!(connection.state(), ConnectionState::Closed);
    }

    #[test]
    fn goaway_clears_streams_and_is_forwarded() {
        let (mut connection, mut rx) = active(Protocol::Http2);
        connection.write_and_flush(h2_request(5, false).into()).unwrap();
        connection.write_and_flush(h2_request(7, false).into()).unwrap();

        connection
            .write_and_flush(HttpObject::GoAway(Http2GoAway {
                last_stream_id: StreamId::new(7),
                error_code: ErrorCode::NO_ERROR,
                debug_data: Bytes::new(),
            }))
            .unwrap();

        assert!(connection.streams().proxy_stream_for(StreamId::new(7)).is_none());
        assert!(connection.streams().proxy_stream_for(StreamId::new(5)).is_some());
        let objects = drain(&mut rx);
        let HttpObject::GoAway(goaway) = objects.last().unwrap() else {
            panic!("expected GOAWAY");
        };
        assert_eq!(goaway.error_code, ErrorCode::NO_ERROR);
    }

    #[test]
    fn window_update_and_reset_are_remapped() {
        let (mut connection, mut rx) = active(Protocol::Http2);
        connection.write_and_flush(h2_request(21, false).into()).unwrap();
        let proxy = connection.streams().proxy_stream_for(StreamId::new(21)).unwrap();

        for stream in [0, 21, 99] {
            connection
                .write_and_flush(HttpObject::WindowUpdate(Http2WindowUpdate {
                    stream: StreamId::new(stream),
                    increment: 1024,
                }))
                .unwrap();
        }
        connection
            .write_and_flush(HttpObject::Reset(Http2Reset {
                stream: StreamId::new(21),
                error_code: ErrorCode::CANCEL,
            }))
            .unwrap();

        let objects = drain(&mut rx);
        assert_eq!(objects.len(), 4);
        assert_eq!(objects[1].stream(), Some(StreamId::CONNECTION));
        assert_eq!(objects[2].stream(), Some(proxy));
        assert_eq!(
            objects[3],
            HttpObject::Reset(Http2Reset {
                stream: proxy,
                error_code: ErrorCode::CANCEL
            })
        );
        assert!(connection.streams().is_empty());
    }

    #[test]
    fn http2_headers_become_http1_request() {
        let (mut connection, mut rx) = active(Protocol::Http1);
        connection.write_and_flush(h2_request(1, true).into()).unwrap();

        let objects = drain(&mut rx);
        let HttpObject::Request(request) = &objects[0] else {
            panic!("expected request");
        };
        assert_eq!(request.method, Method::POST);
        assert_eq!(request.target, "/upload");
        assert_eq!(request.body, Some(Bytes::new()));
        assert_eq!(request.headers[http::header::HOST], "example.com");
        assert_eq!(request.headers[ACCEPT_ENCODING], "br, gzip, deflate");

        let exchange = connection.streams().front_exchange().unwrap();
        assert_eq!(exchange.client, ClientStream::Http2(StreamId::new(1)));
        assert_eq!(exchange.accept_encoding.as_deref(), Some("gzip"));
    }

    #[test]
    fn second_stream_is_refused_while_body_pending() {
        let (mut connection, mut rx) = active(Protocol::Http1);
        connection.write_and_flush(h2_request(1, false).into()).unwrap();

        let error = connection
            .write_and_flush(h2_request(3, false).into())
            .unwrap_err();
        assert!(matches!(error, ConnectionError::StreamRefused(s) if s == StreamId::new(3)));
        assert_eq!(connection.state(), ConnectionState::Active);

        connection
            .write_and_flush(Http2Data::new(StreamId::new(1), "body", true).into())
            .unwrap();
        assert!(connection.pending().is_none());

        let objects = drain(&mut rx);
        let HttpObject::Request(request) = &objects[0] else {
            panic!("expected request");
        };
        assert_eq!(request.headers[TRANSFER_ENCODING], "chunked");
        assert_eq!(objects[1], HttpObject::from(Http1Content::last("body")));
    }

    #[test]
    fn http1_connection_drops_flow_control_and_closes_on_goaway() {
        let (mut connection, mut rx) = active(Protocol::Http1);
        connection
            .write_and_flush(HttpObject::WindowUpdate(Http2WindowUpdate {
                stream: StreamId::new(1),
                increment: 10,
            }))
            .unwrap();
        connection.write_and_flush(HttpObject::SettingsAck).unwrap();
        assert_eq!(drain(&mut rx), vec![HttpObject::SettingsAck]);

        connection
            .write_and_flush(HttpObject::GoAway(Http2GoAway {
                last_stream_id: StreamId::new(1),
                error_code: ErrorCode::NO_ERROR,
                debug_data: Bytes::new(),
            }))
            .unwrap();
        assert!(connection.is_closed());
    }

    #[test]
    fn responses_are_unsupported_towards_backend() {
        let (mut connection, _rx) = active(Protocol::Http2);
        let error = connection
            .write_and_flush(crate::http::Http1Response::bad_gateway().into())
            .unwrap_err();
        assert!(matches!(error, ConnectionError::UnsupportedMessage("http1-response")));
        assert_eq!(connection.state(), ConnectionState::Active);

        let error = connection
            .write_and_flush(HttpObject::Upgraded(Bytes::from_static(b"ws")))
            .unwrap_err();
        assert!(!error.is_fatal());
    }

    #[test]
    fn close_releases_backlog() {
        let mut connection = connection(10);
        connection.write_and_flush(HttpObject::SettingsAck).unwrap();
        connection.close();
        assert_eq!(connection.backlog_len(), 0);
        assert!(connection.is_closed());
    }
}
