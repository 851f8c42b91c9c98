//! Stream registry.
//!
//! # Responsibilities
//! - Map proxy-side stream ids to the client stream they serve
//! - Remap client stream ids to proxy stream ids in O(1)
//! - Keep the captured client accept-encoding for response negotiation
//! - Order in-flight exchanges on non-multiplexed (HTTP/1.1) backends
//!
//! # Design Decisions
//! - One registry per connection, shared with that connection's
//!   downstream handler through a cheap clone
//! - DashMap for the maps since frames and bookkeeping may touch them
//!   from different contexts

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use dashmap::DashMap;

use crate::http::StreamId;

/// Client side of a proxied exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClientStream {
    /// The client speaks HTTP/1.1; its connection is the stream.
    Http1,
    /// An HTTP/2 stream on the client connection.
    Http2(StreamId),
}

impl std::fmt::Display for ClientStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ClientStream::Http1 => f.write_str("http1"),
            ClientStream::Http2(id) => write!(f, "h2:{}", id),
        }
    }
}

/// Registry entry for a stream opened on an HTTP/2 backend connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stream {
    pub client: ClientStream,
    pub proxy: StreamId,
    /// The client's accept-encoding before the proxy rewrote it.
    pub accept_encoding: Option<String>,
}

/// A request in flight on an HTTP/1.1 backend connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Exchange {
    pub client: ClientStream,
    pub accept_encoding: Option<String>,
}

#[derive(Debug, Default)]
struct Inner {
    by_proxy: DashMap<StreamId, Stream>,
    by_client: DashMap<StreamId, StreamId>,
    exchanges: Mutex<VecDeque<Exchange>>,
}

/// Stream bookkeeping of one backend connection.
#[derive(Debug, Clone, Default)]
pub struct Streams {
    inner: Arc<Inner>,
}

impl Streams {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `stream` under its proxy-side id.
    pub fn put(&self, id: StreamId, stream: Stream) {
        if let ClientStream::Http2(client) = stream.client {
            self.inner.by_client.insert(client, id);
        }
        if let Some(previous) = self.inner.by_proxy.insert(id, stream) {
            tracing::warn!(stream = %id, client = %previous.client, "Stream id reused");
        }
    }

    /// Look up a stream by its proxy-side id.
    pub fn get(&self, id: StreamId) -> Option<Stream> {
        self.inner.by_proxy.get(&id).map(|entry| entry.value().clone())
    }

    /// Forget a stream, along with its client-side index entry.
    pub fn remove(&self, id: StreamId) -> Option<Stream> {
        let (_, stream) = self.inner.by_proxy.remove(&id)?;
        if let ClientStream::Http2(client) = stream.client {
            self.inner
                .by_client
                .remove_if(&client, |_, proxy| *proxy == id);
        }
        Some(stream)
    }

    /// Proxy-side id serving a client stream.
    pub fn proxy_stream_for(&self, client: StreamId) -> Option<StreamId> {
        self.inner.by_client.get(&client).map(|entry| *entry.value())
    }

    /// Remove the entry for client stream `last` and every client stream
    /// above it. Returns the removed entries.
    pub fn remove_client_streams_from(&self, last: StreamId) -> Vec<Stream> {
        let doomed: Vec<StreamId> = self
            .inner
            .by_client
            .iter()
            .filter(|entry| *entry.key() >= last)
            .map(|entry| *entry.value())
            .collect();
        doomed.into_iter().filter_map(|id| self.remove(id)).collect()
    }

    /// Remove every entry whose proxy-side id is above `last`.
    pub fn remove_proxy_streams_above(&self, last: StreamId) -> Vec<Stream> {
        let mut doomed: Vec<StreamId> = self
            .inner
            .by_proxy
            .iter()
            .filter(|entry| *entry.key() > last)
            .map(|entry| *entry.key())
            .collect();
        doomed.sort();
        doomed.into_iter().filter_map(|id| self.remove(id)).collect()
    }

    /// Every registered stream, ordered by proxy-side id.
    pub fn snapshot(&self) -> Vec<Stream> {
        let mut streams: Vec<Stream> = self
            .inner
            .by_proxy
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        streams.sort_by_key(|s| s.proxy);
        streams
    }

    /// Number of registered streams.
    pub fn len(&self) -> usize {
        self.inner.by_proxy.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.by_proxy.is_empty()
    }

    /// Queue an exchange sent to an HTTP/1.1 backend.
    pub fn push_exchange(&self, exchange: Exchange) {
        self.exchanges().push_back(exchange);
    }

    /// Oldest exchange still waiting for its response.
    pub fn front_exchange(&self) -> Option<Exchange> {
        self.exchanges().front().cloned()
    }

    /// Take the oldest exchange once its response is complete.
    pub fn pop_exchange(&self) -> Option<Exchange> {
        self.exchanges().pop_front()
    }

    /// Every waiting exchange, oldest first.
    pub fn pending_exchanges(&self) -> Vec<Exchange> {
        self.exchanges().iter().cloned().collect()
    }

    /// Forget every stream and exchange.
    pub fn clear(&self) {
        self.inner.by_proxy.clear();
        self.inner.by_client.clear();
        self.exchanges().clear();
    }

    fn exchanges(&self) -> std::sync::MutexGuard<'_, VecDeque<Exchange>> {
        self.inner
            .exchanges
            .lock()
            .expect("exchange queue mutex poisoned")
    }
}
