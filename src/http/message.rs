//! The closed set of objects that flow through a backend connection.
//!
//! HTTP/1.1 messages arrive from an HTTP/1.1 codec, HTTP/2 frames from an
//! HTTP/2 frame codec. Both codecs live outside this crate; what they hand
//! over is one of the variants of [`HttpObject`].

use bytes::Bytes;
use http::{HeaderMap, HeaderValue, Method, StatusCode, Version};

use crate::http::headers::{HeaderBlock, STATUS};

/// HTTP/2 stream identifier (31 bits).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct StreamId(u32);

impl StreamId {
    /// Stream 0: the connection itself.
    pub const CONNECTION: StreamId = StreamId(0);
    /// Largest legal stream identifier.
    pub const MAX: StreamId = StreamId(i32::MAX as u32);

    pub const fn new(id: u32) -> Self {
        Self(id & 0x7fff_ffff)
    }

    pub const fn as_u32(&self) -> u32 {
        self.0
    }

    pub const fn is_connection(&self) -> bool {
        self.0 == 0
    }
}

impl From<u32> for StreamId {
    fn from(id: u32) -> Self {
        Self::new(id)
    }
}

impl std::fmt::Display for StreamId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// HTTP/2 error code carried by RST_STREAM and GOAWAY.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ErrorCode(pub u32);

impl ErrorCode {
    pub const NO_ERROR: ErrorCode = ErrorCode(0x0);
    pub const PROTOCOL_ERROR: ErrorCode = ErrorCode(0x1);
    pub const INTERNAL_ERROR: ErrorCode = ErrorCode(0x2);
    pub const FLOW_CONTROL_ERROR: ErrorCode = ErrorCode(0x3);
    pub const STREAM_CLOSED: ErrorCode = ErrorCode(0x5);
    pub const REFUSED_STREAM: ErrorCode = ErrorCode(0x7);
    pub const CANCEL: ErrorCode = ErrorCode(0x8);
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// An HTTP/1.1 request head, optionally with its complete body.
#[derive(Debug, Clone, PartialEq)]
pub struct Http1Request {
    pub method: Method,
    /// Raw request-target; percent-encoding, query and fragment untouched.
    pub target: String,
    pub version: Version,
    pub headers: HeaderMap,
    /// `Some` for a fully-buffered message, `None` when content chunks follow.
    pub body: Option<Bytes>,
}

impl Http1Request {
    /// Header-only request; content follows as [`Http1Content`].
    pub fn new(method: Method, target: impl Into<String>) -> Self {
        Self {
            method,
            target: target.into(),
            version: Version::HTTP_11,
            headers: HeaderMap::new(),
            body: None,
        }
    }

    /// Complete request carrying `body`.
    pub fn full(method: Method, target: impl Into<String>, body: impl Into<Bytes>) -> Self {
        Self {
            body: Some(body.into()),
            ..Self::new(method, target)
        }
    }

    pub fn is_full(&self) -> bool {
        self.body.is_some()
    }
}

/// An HTTP/1.1 response head, optionally with its complete body.
#[derive(Debug, Clone, PartialEq)]
pub struct Http1Response {
    pub status: StatusCode,
    pub version: Version,
    pub headers: HeaderMap,
    pub body: Option<Bytes>,
}

impl Http1Response {
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            version: Version::HTTP_11,
            headers: HeaderMap::new(),
            body: None,
        }
    }

    pub fn full(status: StatusCode, body: impl Into<Bytes>) -> Self {
        Self {
            body: Some(body.into()),
            ..Self::new(status)
        }
    }

    /// Response sent to a client when no backend bytes could be produced.
    pub fn bad_gateway() -> Self {
        let body = Bytes::from_static(b"Bad Gateway");
        let mut response = Self::full(StatusCode::BAD_GATEWAY, body.clone());
        response
            .headers
            .insert(http::header::CONTENT_LENGTH, HeaderValue::from(body.len()));
        response
            .headers
            .insert(http::header::CONNECTION, HeaderValue::from_static("close"));
        response
    }

    pub fn is_full(&self) -> bool {
        self.body.is_some()
    }
}

/// A piece of HTTP/1.1 message content.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Http1Content {
    pub data: Bytes,
    /// Last chunk of the message.
    pub last: bool,
    /// Trailing headers; only meaningful on the last chunk.
    pub trailers: Option<HeaderMap>,
}

impl Http1Content {
    /// A body chunk that is not the last.
    pub fn chunk(data: impl Into<Bytes>) -> Self {
        Self {
            data: data.into(),
            last: false,
            trailers: None,
        }
    }

    /// The last body chunk, without trailers.
    pub fn last(data: impl Into<Bytes>) -> Self {
        Self {
            data: data.into(),
            last: true,
            trailers: None,
        }
    }

    /// The last body chunk, followed by trailers.
    pub fn last_with_trailers(data: impl Into<Bytes>, trailers: HeaderMap) -> Self {
        Self {
            data: data.into(),
            last: true,
            trailers: Some(trailers),
        }
    }

    /// Trailers, if this is the last chunk and it carries any.
    pub fn non_empty_trailers(&self) -> Option<&HeaderMap> {
        self.trailers.as_ref().filter(|t| self.last && !t.is_empty())
    }
}

/// HEADERS frame (including trailers).
#[derive(Debug, Clone, PartialEq)]
pub struct Http2Headers {
    pub stream: StreamId,
    pub headers: HeaderBlock,
    pub end_stream: bool,
}

impl Http2Headers {
    /// Create a HEADERS frame.
    pub fn new(stream: StreamId, headers: HeaderBlock, end_stream: bool) -> Self {
        Self {
            stream,
            headers,
            end_stream,
        }
    }

    /// Stream-level bad gateway answer for an HTTP/2 client.
    pub fn bad_gateway(stream: StreamId) -> Self {
        let mut headers = HeaderBlock::new();
        headers.append(STATUS, "502");
        Self::new(stream, headers, true)
    }
}

/// DATA frame.
#[derive(Debug, Clone, PartialEq)]
pub struct Http2Data {
    pub stream: StreamId,
    pub data: Bytes,
    pub end_stream: bool,
}

impl Http2Data {
    /// Create a DATA frame.
    pub fn new(stream: StreamId, data: impl Into<Bytes>, end_stream: bool) -> Self {
        Self {
            stream,
            data: data.into(),
            end_stream,
        }
    }
}

/// SETTINGS frame (non-ack).
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Http2Settings {
    pub parameters: Vec<(u16, u32)>,
}

/// PING frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Http2Ping {
    pub payload: [u8; 8],
    pub ack: bool,
}

/// GOAWAY frame.
#[derive(Debug, Clone, PartialEq)]
pub struct Http2GoAway {
    pub last_stream_id: StreamId,
    pub error_code: ErrorCode,
    pub debug_data: Bytes,
}

/// WINDOW_UPDATE frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Http2WindowUpdate {
    pub stream: StreamId,
    pub increment: u32,
}

/// RST_STREAM frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Http2Reset {
    pub stream: StreamId,
    pub error_code: ErrorCode,
}

/// Every message or frame a connection can be asked to carry.
#[derive(Debug, Clone, PartialEq)]
pub enum HttpObject {
    Request(Http1Request),
    Response(Http1Response),
    Content(Http1Content),
    Headers(Http2Headers),
    Data(Http2Data),
    Settings(Http2Settings),
    SettingsAck,
    Ping(Http2Ping),
    GoAway(Http2GoAway),
    WindowUpdate(Http2WindowUpdate),
    Reset(Http2Reset),
    /// Opaque frame of an upgraded protocol (e.g. WebSocket).
    Upgraded(Bytes),
}

impl HttpObject {
    /// Short name for logs and errors.
    pub fn kind(&self) -> &'static str {
        match self {
            HttpObject::Request(_) => "http1-request",
            HttpObject::Response(_) => "http1-response",
            HttpObject::Content(_) => "http1-content",
            HttpObject::Headers(_) => "http2-headers",
            HttpObject::Data(_) => "http2-data",
            HttpObject::Settings(_) => "http2-settings",
            HttpObject::SettingsAck => "http2-settings-ack",
            HttpObject::Ping(_) => "http2-ping",
            HttpObject::GoAway(_) => "http2-goaway",
            HttpObject::WindowUpdate(_) => "http2-window-update",
            HttpObject::Reset(_) => "http2-reset",
            HttpObject::Upgraded(_) => "upgraded",
        }
    }

    /// True for HTTP/1.x messages, false for HTTP/2 frames and upgraded frames.
    pub fn is_http1(&self) -> bool {
        matches!(
            self,
            HttpObject::Request(_) | HttpObject::Response(_) | HttpObject::Content(_)
        )
    }

    /// Client stream a frame belongs to, for HTTP/2 stream frames.
    pub fn stream(&self) -> Option<StreamId> {
        match self {
            HttpObject::Headers(h) => Some(h.stream),
            HttpObject::Data(d) => Some(d.stream),
            HttpObject::WindowUpdate(w) => Some(w.stream),
            HttpObject::Reset(r) => Some(r.stream),
            _ => None,
        }
    }
}

impl From<Http1Request> for HttpObject {
    fn from(value: Http1Request) -> Self {
        HttpObject::Request(value)
    }
}

impl From<Http1Response> for HttpObject {
    fn from(value: Http1Response) -> Self {
        HttpObject::Response(value)
    }
}

impl From<Http1Content> for HttpObject {
    fn from(value: Http1Content) -> Self {
        HttpObject::Content(value)
    }
}

impl From<Http2Headers> for HttpObject {
    fn from(value: Http2Headers) -> Self {
        HttpObject::Headers(value)
    }
}

impl From<Http2Data> for HttpObject {
    fn from(value: Http2Data) -> Self {
        HttpObject::Data(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stream_id_masks_reserved_bit() {
        assert_eq!(StreamId::new(0x8000_0003).as_u32(), 3);
        assert!(StreamId::CONNECTION.is_connection());
        assert_eq!(StreamId::MAX.as_u32(), 0x7fff_ffff);
    }

    #[test]
    fn content_trailers_only_count_on_last_chunk() {
        let mut trailers = HeaderMap::new();
        trailers.insert("grpc-status", HeaderValue::from_static("0"));

        let last = Http1Content::last_with_trailers(Bytes::new(), trailers.clone());
        assert!(last.non_empty_trailers().is_some());

        let empty = Http1Content::last_with_trailers(Bytes::new(), HeaderMap::new());
        assert!(empty.non_empty_trailers().is_none());

        let chunk = Http1Content {
            trailers: Some(trailers),
            ..Http1Content::chunk("x")
        };
        assert!(chunk.non_empty_trailers().is_none());
    }

    #[test]
    fn bad_gateway_is_complete() {
        let response = Http1Response::bad_gateway();
        assert_eq!(response.status, StatusCode::BAD_GATEWAY);
        assert!(response.is_full());
        assert_eq!(response.headers[http::header::CONTENT_LENGTH], "11");

        let frame = Http2Headers::bad_gateway(StreamId::new(5));
        assert!(frame.end_stream);
        assert_eq!(frame.headers.status(), Some("502"));
    }

    #[test]
    fn object_classification() {
        let request = HttpObject::from(Http1Request::new(Method::GET, "/"));
        assert!(request.is_http1());
        assert_eq!(request.stream(), None);

        let data = HttpObject::from(Http2Data::new(StreamId::new(3), "x", false));
        assert!(!data.is_http1());
        assert_eq!(data.stream(), Some(StreamId::new(3)));
        assert_eq!(data.kind(), "http2-data");
    }
}
