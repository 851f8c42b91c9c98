//! Content-encoding negotiation and codec stages.
//!
//! # Data Flow
//! ```text
//! Request towards backend:
//!     client accept-encoding captured (kept in the stream record)
//!     → replaced by PROXY_ACCEPT_ENCODING
//!
//! Response towards client:
//!     backend content-encoding + captured client accept-encoding
//!     → Transcoder::negotiate
//!     → None: body passes untouched
//!     → Some: decoder stage → encoder stage, headers rewritten
//! ```
//!
//! # Design Decisions
//! - The backend is always asked for every encoding the proxy can decode
//! - A client without accept-encoding only gets identity
//! - Stages are incremental so chunked bodies are never buffered whole
//! - Multiple stacked codings or unknown codings pass through untouched

use std::io::{self, Write};
use std::sync::{Arc, Mutex};

use bytes::{Bytes, BytesMut};
use flate2::write::{GzDecoder, GzEncoder, ZlibDecoder, ZlibEncoder};
use flate2::Compression;
use http::header::{ACCEPT_ENCODING, CONTENT_ENCODING, CONTENT_LENGTH};
use http::{HeaderMap, HeaderValue};

use crate::config::CompressionConfig;
use crate::http::headers::HeaderBlock;

/// Accept-encoding the proxy sends to every backend.
pub const PROXY_ACCEPT_ENCODING: &str = "br, gzip, deflate";

const BROTLI_BUFFER_SIZE: usize = 4096;
const BROTLI_WINDOW: u32 = 22;

/// A content coding the proxy understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Encoding {
    Brotli,
    Gzip,
    Deflate,
    Identity,
}

impl Encoding {
    /// Content-coding token as it appears on the wire.
    pub fn token(&self) -> &'static str {
        match self {
            Encoding::Brotli => "br",
            Encoding::Gzip => "gzip",
            Encoding::Deflate => "deflate",
            Encoding::Identity => "identity",
        }
    }

    /// Parse a content-coding token, ignoring case.
    pub fn from_token(token: &str) -> Option<Self> {
        let token = token.trim();
        if token.eq_ignore_ascii_case("br") {
            Some(Encoding::Brotli)
        } else if token.eq_ignore_ascii_case("gzip") || token.eq_ignore_ascii_case("x-gzip") {
            Some(Encoding::Gzip)
        } else if token.eq_ignore_ascii_case("deflate") {
            Some(Encoding::Deflate)
        } else if token.eq_ignore_ascii_case("identity") {
            Some(Encoding::Identity)
        } else {
            None
        }
    }
}

impl std::fmt::Display for Encoding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.token())
    }
}

/// Runtime form of [`CompressionConfig`].
#[derive(Debug, Clone)]
pub struct CompressionPolicy {
    pub enabled: bool,
    /// Encodings to re-encode with, most preferred first.
    pub preference: Vec<Encoding>,
    pub level: u32,
}

impl CompressionPolicy {
    /// Build the policy from the compression section of the config.
    pub fn from_config(config: &CompressionConfig) -> Self {
        let preference = config
            .preference
            .iter()
            .filter_map(|token| Encoding::from_token(token))
            .filter(|encoding| *encoding != Encoding::Identity)
            .collect();
        Self {
            enabled: config.enabled,
            preference,
            level: config.level,
        }
    }
}

impl Default for CompressionPolicy {
    fn default() -> Self {
        Self::from_config(&CompressionConfig::default())
    }
}

/// Parsed `accept-encoding` value.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AcceptEncoding {
    entries: Vec<(String, f32)>,
}

impl AcceptEncoding {
    /// Parse an accept-encoding value with its q-values.
    pub fn parse(value: &str) -> Self {
        let entries = value
            .split(',')
            .filter_map(|item| {
                let mut parts = item.split(';');
                let token = parts.next()?.trim().to_ascii_lowercase();
                if token.is_empty() {
                    return None;
                }
                let q = parts
                    .filter_map(|p| p.trim().strip_prefix("q="))
                    .find_map(|q| q.trim().parse::<f32>().ok())
                    .unwrap_or(1.0);
                Some((token, q))
            })
            .collect();
        Self { entries }
    }

    /// Parse an optional header value; a missing header accepts identity only.
    pub fn from_header(value: Option<&str>) -> Self {
        value.map(Self::parse).unwrap_or_default()
    }

    fn quality(&self, token: &str) -> Option<f32> {
        self.entries
            .iter()
            .find(|(t, _)| t == token || (token == "gzip" && t == "x-gzip"))
            .map(|(_, q)| *q)
    }

    /// Check if the client accepts `encoding`.
    pub fn accepts(&self, encoding: Encoding) -> bool {
        if let Some(q) = self.quality(encoding.token()) {
            return q > 0.0;
        }
        let wildcard = self.quality("*");
        match encoding {
            Encoding::Identity => wildcard.map(|q| q > 0.0).unwrap_or(true),
            _ => wildcard.map(|q| q > 0.0).unwrap_or(false),
        }
    }

    /// Most preferred acceptable encoding, or identity.
    pub fn preferred(&self, preference: &[Encoding]) -> Encoding {
        preference
            .iter()
            .copied()
            .find(|encoding| self.accepts(*encoding))
            .unwrap_or(Encoding::Identity)
    }
}

/// Replace the accept-encoding of an HTTP/1.1 head, returning the client's.
pub fn rewrite_accept_encoding(headers: &mut HeaderMap) -> Option<String> {
    let original = join_values(
        headers
            .get_all(ACCEPT_ENCODING)
            .iter()
            .filter_map(|v| v.to_str().ok()),
    );
    headers.insert(ACCEPT_ENCODING, HeaderValue::from_static(PROXY_ACCEPT_ENCODING));
    original
}

/// Replace the accept-encoding of an HTTP/2 header block, returning the client's.
pub fn rewrite_accept_encoding_block(block: &mut HeaderBlock) -> Option<String> {
    let original = join_values(
        block
            .get_all("accept-encoding")
            .filter_map(|v| std::str::from_utf8(v).ok()),
    );
    block.set("accept-encoding", PROXY_ACCEPT_ENCODING);
    original
}

/// Accept-encoding of an HTTP/1.1 head without touching it.
pub fn accept_encoding_of(headers: &HeaderMap) -> Option<String> {
    join_values(
        headers
            .get_all(ACCEPT_ENCODING)
            .iter()
            .filter_map(|v| v.to_str().ok()),
    )
}

/// Accept-encoding of an HTTP/2 header block without touching it.
pub fn accept_encoding_of_block(block: &HeaderBlock) -> Option<String> {
    join_values(
        block
            .get_all("accept-encoding")
            .filter_map(|v| std::str::from_utf8(v).ok()),
    )
}

fn join_values<'a>(values: impl Iterator<Item = &'a str>) -> Option<String> {
    let joined = values.collect::<Vec<_>>().join(", ");
    (!joined.is_empty()).then_some(joined)
}

/// One incremental encode or decode step.
pub trait CodecStage: Send {
    /// Feed a chunk, returning whatever output is ready.
    fn process(&mut self, input: &[u8]) -> io::Result<Bytes>;

    /// End of input, returning the remaining output.
    fn finish(self: Box<Self>) -> io::Result<Bytes>;
}

/// Write target shared between a codec writer and its stage.
#[derive(Clone, Default)]
struct SharedSink(Arc<Mutex<BytesMut>>);

impl SharedSink {
    fn take(&self) -> Bytes {
        self.0
            .lock()
            .expect("codec sink mutex poisoned")
            .split()
            .freeze()
    }
}

impl Write for SharedSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0
            .lock()
            .expect("codec sink mutex poisoned")
            .extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

struct WriterStage<W: Write + Send> {
    writer: W,
    sink: SharedSink,
    finish: fn(W) -> io::Result<()>,
}

impl<W: Write + Send> CodecStage for WriterStage<W> {
    fn process(&mut self, input: &[u8]) -> io::Result<Bytes> {
        self.writer.write_all(input)?;
        self.writer.flush()?;
        Ok(self.sink.take())
    }

    fn finish(self: Box<Self>) -> io::Result<Bytes> {
        let WriterStage {
            writer,
            sink,
            finish,
        } = *self;
        finish(writer)?;
        Ok(sink.take())
    }
}

fn stage<W, F>(make: F, finish: fn(W) -> io::Result<()>) -> Box<dyn CodecStage>
where
    W: Write + Send + 'static,
    F: FnOnce(SharedSink) -> W,
{
    let sink = SharedSink::default();
    Box::new(WriterStage {
        writer: make(sink.clone()),
        sink,
        finish,
    })
}

/// Encoder stage for `encoding`; `None` for identity.
pub fn encoder(encoding: Encoding, level: u32) -> Option<Box<dyn CodecStage>> {
    let level = level.min(9);
    match encoding {
        Encoding::Gzip => Some(stage(
            |sink| GzEncoder::new(sink, Compression::new(level)),
            |w: GzEncoder<SharedSink>| w.finish().map(drop),
        )),
        Encoding::Deflate => Some(stage(
            |sink| ZlibEncoder::new(sink, Compression::new(level)),
            |w: ZlibEncoder<SharedSink>| w.finish().map(drop),
        )),
        Encoding::Brotli => Some(stage(
            |sink| brotli::CompressorWriter::new(sink, BROTLI_BUFFER_SIZE, level, BROTLI_WINDOW),
            // dropping the writer terminates the brotli stream
            |mut w: brotli::CompressorWriter<SharedSink>| w.flush(),
        )),
        Encoding::Identity => None,
    }
}

/// Decoder stage for `encoding`; `None` for identity.
pub fn decoder(encoding: Encoding) -> Option<Box<dyn CodecStage>> {
    match encoding {
        Encoding::Gzip => Some(stage(GzDecoder::new, |w: GzDecoder<SharedSink>| {
            w.finish().map(drop)
        })),
        Encoding::Deflate => Some(stage(ZlibDecoder::new, |w: ZlibDecoder<SharedSink>| {
            w.finish().map(drop)
        })),
        Encoding::Brotli => Some(stage(
            |sink| brotli::DecompressorWriter::new(sink, BROTLI_BUFFER_SIZE),
            |mut w: brotli::DecompressorWriter<SharedSink>| w.flush(),
        )),
        Encoding::Identity => None,
    }
}

/// Re-encodes one response body from the backend's coding to one the
/// client accepts.
pub struct Transcoder {
    from: Encoding,
    to: Encoding,
    decoder: Option<Box<dyn CodecStage>>,
    encoder: Option<Box<dyn CodecStage>>,
}

impl std::fmt::Debug for Transcoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transcoder")
            .field("from", &self.from)
            .field("to", &self.to)
            .finish()
    }
}

impl Transcoder {
    /// Decide whether a response must be transcoded for its client.
    pub fn negotiate(
        policy: &CompressionPolicy,
        client_accept: Option<&str>,
        content_encoding: Option<&str>,
    ) -> Option<Self> {
        if !policy.enabled {
            return None;
        }
        let content_encoding = content_encoding?.trim();
        if content_encoding.contains(',') {
            return None;
        }
        let from = Encoding::from_token(content_encoding)?;
        if from == Encoding::Identity {
            return None;
        }

        let accept = AcceptEncoding::from_header(client_accept);
        if accept.accepts(from) {
            return None;
        }
        let to = accept.preferred(&policy.preference);
        Some(Self::new(from, to, policy.level))
    }

    /// Create a transcoder from `from` to `to`, encoding at `level`.
    pub fn new(from: Encoding, to: Encoding, level: u32) -> Self {
        Self {
            from,
            to,
            decoder: decoder(from),
            encoder: encoder(to, level),
        }
    }

    pub fn source(&self) -> Encoding {
        self.from
    }

    pub fn target(&self) -> Encoding {
        self.to
    }

    /// Transcode one body chunk. Output may lag behind input.
    pub fn process(&mut self, input: &[u8]) -> io::Result<Bytes> {
        let decoded = match self.decoder.as_mut() {
            Some(decoder) => decoder.process(input)?,
            None => Bytes::copy_from_slice(input),
        };
        match self.encoder.as_mut() {
            Some(encoder) if !decoded.is_empty() => encoder.process(&decoded),
            Some(_) => Ok(Bytes::new()),
            None => Ok(decoded),
        }
    }

    /// Flush whatever the codec stages still hold.
    pub fn finish(self) -> io::Result<Bytes> {
        let tail = match self.decoder {
            Some(decoder) => decoder.finish()?,
            None => Bytes::new(),
        };
        match self.encoder {
            Some(mut encoder) => {
                let mut out = BytesMut::new();
                if !tail.is_empty() {
                    out.extend_from_slice(&encoder.process(&tail)?);
                }
                out.extend_from_slice(&encoder.finish()?);
                Ok(out.freeze())
            }
            None => Ok(tail),
        }
    }

    /// Transcode a complete body in one go.
    pub fn transcode_all(mut self, body: &[u8]) -> io::Result<Bytes> {
        let mut out = BytesMut::from(&self.process(body)?[..]);
        out.extend_from_slice(&self.finish()?);
        Ok(out.freeze())
    }

    /// Rewrite an HTTP/1.1 response head for the transcoded body.
    pub fn apply_to_headers(&self, headers: &mut HeaderMap) {
        headers.remove(CONTENT_LENGTH);
        match self.to {
            Encoding::Identity => {
                headers.remove(CONTENT_ENCODING);
            }
            to => {
                headers.insert(CONTENT_ENCODING, HeaderValue::from_static(to.token()));
            }
        }
    }

    /// Rewrite an HTTP/2 response header block for the transcoded body.
    pub fn apply_to_block(&self, block: &mut HeaderBlock) {
        block.remove("content-length");
        match self.to {
            Encoding::Identity => {
                block.remove("content-encoding");
            }
            to => block.set("content-encoding", to.token()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;

    fn gzip(data: &[u8]) -> Vec<u8> {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(data).unwrap();
        encoder.finish().unwrap()
    }

    fn brotli_decode(data: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        brotli::Decompressor::new(data, 4096)
            .read_to_end(&mut out)
            .unwrap();
        out
    }

    #[test]
    fn accept_encoding_qualities() {
        let accept = AcceptEncoding::parse("gzip;q=0.5, br;q=0, *;q=0.1");
        assert!(accept.accepts(Encoding::Gzip));
        assert!(!accept.accepts(Encoding::Brotli));
        assert!(accept.accepts(Encoding::Deflate));
        assert!(accept.accepts(Encoding::Identity));

        let none = AcceptEncoding::from_header(None);
        assert!(none.accepts(Encoding::Identity));
        assert!(!none.accepts(Encoding::Gzip));

        let no_identity = AcceptEncoding::parse("gzip, identity;q=0");
        assert!(!no_identity.accepts(Encoding::Identity));
    }

    #[test]
    fn preferred_follows_policy_order() {
        let policy = CompressionPolicy::default();
        let accept = AcceptEncoding::parse("deflate, gzip");
        assert_eq!(accept.preferred(&policy.preference), Encoding::Gzip);
        assert_eq!(
            AcceptEncoding::parse("compress").preferred(&policy.preference),
            Encoding::Identity
        );
    }

    #[test]
    fn rewrite_captures_client_value() {
        let mut headers = HeaderMap::new();
        headers.append(ACCEPT_ENCODING, HeaderValue::from_static("gzip"));
        headers.append(ACCEPT_ENCODING, HeaderValue::from_static("br"));
        assert_eq!(rewrite_accept_encoding(&mut headers).as_deref(), Some("gzip, br"));
        assert_eq!(headers[ACCEPT_ENCODING], PROXY_ACCEPT_ENCODING);

        let mut block = HeaderBlock::new();
        assert_eq!(rewrite_accept_encoding_block(&mut block), None);
        assert_eq!(block.get_str("accept-encoding"), Some(PROXY_ACCEPT_ENCODING));
    }

    #[test]
    fn negotiate_skips_acceptable_and_unknown_codings() {
        let policy = CompressionPolicy::default();
        assert!(Transcoder::negotiate(&policy, Some("gzip"), Some("gzip")).is_none());
        assert!(Transcoder::negotiate(&policy, Some("gzip"), None).is_none());
        assert!(Transcoder::negotiate(&policy, Some("gzip"), Some("zstd")).is_none());
        assert!(Transcoder::negotiate(&policy, Some("gzip"), Some("gzip, br")).is_none());

        let disabled = CompressionPolicy {
            enabled: false,
            ..CompressionPolicy::default()
        };
        assert!(Transcoder::negotiate(&disabled, None, Some("br")).is_none());

        let t = Transcoder::negotiate(&policy, Some("br, gzip"), Some("deflate")).unwrap();
        assert_eq!((t.source(), t.target()), (Encoding::Deflate, Encoding::Brotli));
    }

    #[test]
    fn gzip_to_identity_for_client_without_accept_encoding() {
        let policy = CompressionPolicy::default();
        let body = gzip(b"Meow meow meow");
        let transcoder = Transcoder::negotiate(&policy, None, Some("gzip")).unwrap();
        assert_eq!(transcoder.target(), Encoding::Identity);

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_ENCODING, HeaderValue::from_static("gzip"));
        headers.insert(CONTENT_LENGTH, HeaderValue::from(body.len()));
        transcoder.apply_to_headers(&mut headers);
        assert!(headers.is_empty());

        assert_eq!(&transcoder.transcode_all(&body).unwrap()[..], b"Meow meow meow");
    }

    #[test]
    fn chunked_gzip_to_brotli() {
        let payload = b"the quick brown fox jumps over the lazy dog ".repeat(64);
        let compressed = gzip(&payload);
        let mut transcoder = Transcoder::new(Encoding::Gzip, Encoding::Brotli, 5);

        let mut out = Vec::new();
        for chunk in compressed.chunks(17) {
            out.extend_from_slice(&transcoder.process(chunk).unwrap());
        }
        out.extend_from_slice(&transcoder.finish().unwrap());

        assert_eq!(brotli_decode(&out), payload);
    }
}
