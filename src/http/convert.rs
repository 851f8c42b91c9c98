//! HTTP/1.1 <-> HTTP/2 header and message conversion.
//!
//! # Responsibilities
//! - Build HTTP/2 header blocks (pseudo-headers first) from HTTP/1.1 heads
//! - Rebuild HTTP/1.1 heads from HTTP/2 header blocks
//! - Drop connection-specific headers in both directions
//! - Split `cookie` into crumbs for HTTP/2, join them back for HTTP/1.1
//!
//! # Design Decisions
//! - Pure functions: no connection state, no I/O
//! - Every violation is a [`ProtocolError`]; callers decide what to close
//! - Status codes outside 100..=599 and `101` are rejected: there is no
//!   protocol switch inside an HTTP/2 stream

use bytes::{Bytes, BytesMut};
use http::header::{HeaderName, HeaderValue, COOKIE, HOST, TE};
use http::{HeaderMap, Method, StatusCode};
use thiserror::Error;

use crate::http::headers::{HeaderBlock, AUTHORITY, METHOD, PATH, SCHEME, STATUS};
use crate::http::message::{Http1Request, Http1Response, StreamId};

/// Headers that never cross the HTTP/1.1 / HTTP/2 boundary.
pub const CONNECTION_SPECIFIC_HEADERS: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-connection",
    "transfer-encoding",
    "host",
    "upgrade",
    // HTTP/2 stream bookkeeping carried as HTTP/1.1 extension headers
    "x-http2-stream-id",
    "x-http2-scheme",
    "x-http2-path",
    "x-http2-stream-promise-id",
    "x-http2-stream-dependency-id",
    "x-http2-stream-weight",
];

const COOKIE_SEPARATOR: &[u8] = b"; ";

/// Violations found while translating between protocol versions.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("missing required pseudo-header {0}")]
    MissingPseudoHeader(&'static str),

    #[error("pseudo-header {0} is not allowed here")]
    UnexpectedPseudoHeader(String),

    #[error("pseudo-header {0} appears after regular headers")]
    PseudoHeaderAfterRegular(String),

    #[error("invalid header {0}")]
    InvalidHeader(String),

    #[error("invalid :method {0}")]
    InvalidMethod(String),

    #[error("invalid status {0}")]
    InvalidStatus(String),

    #[error("101 Switching Protocols is not allowed on HTTP/2")]
    SwitchingProtocols,

    #[error("no stream mapping for stream {0}")]
    UnknownStream(StreamId),

    #[error("content arrived without a message in progress")]
    NoMessageInProgress,

    #[error("message on stream {0} is still in progress")]
    MessageInProgress(StreamId),

    #[error("response arrived without a request in flight")]
    UnsolicitedResponse,

    #[error("stream identifiers exhausted")]
    StreamIdsExhausted,
}

impl ProtocolError {
    /// Metric label.
    pub fn kind(&self) -> &'static str {
        match self {
            ProtocolError::MissingPseudoHeader(_) => "missing_pseudo_header",
            ProtocolError::UnexpectedPseudoHeader(_) => "unexpected_pseudo_header",
            ProtocolError::PseudoHeaderAfterRegular(_) => "pseudo_header_after_regular",
            ProtocolError::InvalidHeader(_) => "invalid_header",
            ProtocolError::InvalidMethod(_) => "invalid_method",
            ProtocolError::InvalidStatus(_) => "invalid_status",
            ProtocolError::SwitchingProtocols => "switching_protocols",
            ProtocolError::UnknownStream(_) => "unknown_stream",
            ProtocolError::NoMessageInProgress => "no_message_in_progress",
            ProtocolError::MessageInProgress(_) => "message_in_progress",
            ProtocolError::UnsolicitedResponse => "unsolicited_response",
            ProtocolError::StreamIdsExhausted => "stream_ids_exhausted",
        }
    }
}

/// Convert an HTTP/1.1 request head to an HTTP/2 header block.
///
/// `secure` selects the `:scheme` of the backend leg.
pub fn request_to_http2(request: &Http1Request, secure: bool) -> HeaderBlock {
    let mut block = HeaderBlock::new();
    block.append(METHOD, Bytes::copy_from_slice(request.method.as_str().as_bytes()));

    if request.method == Method::CONNECT {
        if let Some(authority) = request_authority(request) {
            block.append(AUTHORITY, authority);
        }
    } else {
        block.append(PATH, request_path(&request.target));
        block.append(SCHEME, if secure { "https" } else { "http" });
        if let Some(authority) = request_authority(request) {
            block.append(AUTHORITY, authority);
        }
    }

    copy_http1_headers(&request.headers, &mut block);
    block
}

/// Convert an HTTP/1.1 response head to an HTTP/2 header block.
pub fn response_to_http2(response: &Http1Response) -> HeaderBlock {
    let mut block = HeaderBlock::new();
    block.append(
        STATUS,
        Bytes::copy_from_slice(response.status.as_str().as_bytes()),
    );
    copy_http1_headers(&response.headers, &mut block);
    block
}

/// Convert HTTP/1.1 trailing headers to an HTTP/2 trailer block.
pub fn trailers_to_http2(trailers: &HeaderMap) -> HeaderBlock {
    let mut block = HeaderBlock::new();
    copy_http1_headers(trailers, &mut block);
    block
}

/// Rebuild an HTTP/1.1 request head from an HTTP/2 header block.
///
/// The returned request is header-only (`body == None`).
pub fn http2_to_request(block: &HeaderBlock) -> Result<Http1Request, ProtocolError> {
    validate_pseudo_headers(block, &[METHOD, SCHEME, AUTHORITY, PATH])?;

    let method = block
        .method()
        .ok_or(ProtocolError::MissingPseudoHeader(METHOD))?;
    let method = Method::from_bytes(method.as_bytes())
        .map_err(|_| ProtocolError::InvalidMethod(method.to_string()))?;

    let target = if method == Method::CONNECT {
        block
            .authority()
            .ok_or(ProtocolError::MissingPseudoHeader(AUTHORITY))?
            .to_string()
    } else {
        block
            .path()
            .ok_or(ProtocolError::MissingPseudoHeader(PATH))?
            .to_string()
    };

    let mut request = Http1Request::new(method, target);
    copy_http2_headers(block, &mut request.headers)?;

    if let Some(authority) = block.authority() {
        if !request.headers.contains_key(HOST) {
            let value = HeaderValue::from_str(authority)
                .map_err(|_| ProtocolError::InvalidHeader(AUTHORITY.to_string()))?;
            request.headers.insert(HOST, value);
        }
    }
    set_keep_alive(&mut request.headers);
    Ok(request)
}

/// Rebuild an HTTP/1.1 response head from an HTTP/2 header block.
pub fn http2_to_response(block: &HeaderBlock) -> Result<Http1Response, ProtocolError> {
    validate_pseudo_headers(block, &[STATUS])?;
    let status = parse_status(block.status().ok_or(ProtocolError::MissingPseudoHeader(STATUS))?)?;

    let mut response = Http1Response::new(status);
    copy_http2_headers(block, &mut response.headers)?;
    set_keep_alive(&mut response.headers);
    Ok(response)
}

/// Rebuild HTTP/1.1 trailing headers from an HTTP/2 trailer block.
pub fn http2_to_trailers(block: &HeaderBlock) -> Result<HeaderMap, ProtocolError> {
    validate_pseudo_headers(block, &[])?;
    let mut trailers = HeaderMap::new();
    copy_http2_headers(block, &mut trailers)?;
    Ok(trailers)
}

/// Parse an HTTP/2 `:status` value.
pub fn parse_status(value: &str) -> Result<StatusCode, ProtocolError> {
    if value.len() != 3 || !value.bytes().all(|b| b.is_ascii_digit()) {
        return Err(ProtocolError::InvalidStatus(value.to_string()));
    }
    let status = StatusCode::from_bytes(value.as_bytes())
        .map_err(|_| ProtocolError::InvalidStatus(value.to_string()))?;
    if status == StatusCode::SWITCHING_PROTOCOLS {
        return Err(ProtocolError::SwitchingProtocols);
    }
    if !(100..=599).contains(&status.as_u16()) {
        return Err(ProtocolError::InvalidStatus(value.to_string()));
    }
    Ok(status)
}

/// `:path` for a request-target. Origin-form is kept verbatim; for
/// absolute-form everything after the authority is kept (default `/`).
pub fn request_path(target: &str) -> String {
    if target.starts_with('/') || target == "*" {
        return target.to_string();
    }
    match target.split_once("://") {
        Some((_, rest)) => match rest.find(|c| matches!(c, '/' | '?' | '#')) {
            Some(index) if rest[index..].starts_with('/') => rest[index..].to_string(),
            Some(index) => format!("/{}", &rest[index..]),
            None => "/".to_string(),
        },
        None => target.to_string(),
    }
}

/// `:authority` for a request: the Host header, falling back to the
/// request-target authority. Userinfo is stripped.
pub fn request_authority(request: &Http1Request) -> Option<String> {
    let from_host = request
        .headers
        .get(HOST)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map(str::to_string);

    from_host
        .or_else(|| target_authority(&request.target))
        .map(|authority| strip_userinfo(&authority).to_string())
}

/// Authority component of an absolute-form (or authority-form) target.
fn target_authority(target: &str) -> Option<String> {
    if target.starts_with('/') || target == "*" {
        return None;
    }
    let rest = target.split_once("://").map(|(_, r)| r).unwrap_or(target);
    let end = rest.find(|c| matches!(c, '/' | '?' | '#')).unwrap_or(rest.len());
    let authority = &rest[..end];
    (!authority.is_empty()).then(|| authority.to_string())
}

fn strip_userinfo(authority: &str) -> &str {
    match authority.rfind('@') {
        Some(index) => &authority[index + 1..],
        None => authority,
    }
}

/// Names listed in the `Connection` header value, lowercased.
fn connection_listed(headers: &HeaderMap) -> Vec<String> {
    headers
        .get_all(http::header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .map(|token| token.trim().to_ascii_lowercase())
        .filter(|token| !token.is_empty())
        .collect()
}

fn is_connection_specific(name: &str) -> bool {
    CONNECTION_SPECIFIC_HEADERS.contains(&name)
}

fn te_allows_trailers(value: &HeaderValue) -> bool {
    value
        .to_str()
        .map(|v| {
            v.split(',')
                .map(|token| token.split(';').next().unwrap_or("").trim())
                .any(|token| token.eq_ignore_ascii_case("trailers"))
        })
        .unwrap_or(false)
}

fn copy_http1_headers(headers: &HeaderMap, block: &mut HeaderBlock) {
    let listed = connection_listed(headers);

    for (name, value) in headers {
        let name_str = name.as_str();
        if is_connection_specific(name_str) || listed.iter().any(|l| l == name_str) {
            continue;
        }
        if *name == TE {
            if te_allows_trailers(value) {
                block.append("te", "trailers");
            }
            continue;
        }
        if *name == COOKIE {
            for crumb in split_cookie(value.as_bytes()) {
                block.append("cookie", crumb);
            }
            continue;
        }
        block.append(name_str, Bytes::copy_from_slice(value.as_bytes()));
    }
}

fn split_cookie(value: &[u8]) -> Vec<Bytes> {
    let mut crumbs = Vec::new();
    let mut rest = value;
    while let Some(index) = find(rest, COOKIE_SEPARATOR) {
        if index > 0 {
            crumbs.push(Bytes::copy_from_slice(&rest[..index]));
        }
        rest = &rest[index + COOKIE_SEPARATOR.len()..];
    }
    if !rest.is_empty() {
        crumbs.push(Bytes::copy_from_slice(rest));
    }
    crumbs
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

/// Pseudo-headers must come first and be one of `allowed`.
fn validate_pseudo_headers(block: &HeaderBlock, allowed: &[&str]) -> Result<(), ProtocolError> {
    let mut regular_seen = false;
    for field in block {
        let name = String::from_utf8_lossy(&field.name);
        if field.is_pseudo() {
            if regular_seen {
                return Err(ProtocolError::PseudoHeaderAfterRegular(name.into_owned()));
            }
            if !allowed.contains(&&*name) {
                return Err(ProtocolError::UnexpectedPseudoHeader(name.into_owned()));
            }
        } else {
            regular_seen = true;
        }
    }
    Ok(())
}

fn copy_http2_headers(block: &HeaderBlock, headers: &mut HeaderMap) -> Result<(), ProtocolError> {
    let mut cookie = BytesMut::new();

    for field in block {
        if field.is_pseudo() {
            continue;
        }
        let name = HeaderName::from_bytes(&field.name)
            .map_err(|_| ProtocolError::InvalidHeader(String::from_utf8_lossy(&field.name).into_owned()))?;
        if name == http::header::TRANSFER_ENCODING || name == http::header::TRAILER {
            continue;
        }
        if name == COOKIE {
            if !cookie.is_empty() {
                cookie.extend_from_slice(COOKIE_SEPARATOR);
            }
            cookie.extend_from_slice(&field.value);
            continue;
        }
        let value = HeaderValue::from_maybe_shared(field.value.clone())
            .map_err(|_| ProtocolError::InvalidHeader(name.to_string()))?;
        headers.append(name, value);
    }

    if !cookie.is_empty() {
        let value = HeaderValue::from_maybe_shared(cookie.freeze())
            .map_err(|_| ProtocolError::InvalidHeader(COOKIE.to_string()))?;
        headers.insert(COOKIE, value);
    }
    Ok(())
}

fn set_keep_alive(headers: &mut HeaderMap) {
    headers.insert(
        http::header::CONNECTION,
        HeaderValue::from_static("keep-alive"),
    );
}
