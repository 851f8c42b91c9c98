//! Shared utilities for integration tests.
//!
//! `ScriptedTransport` stands in for the socket layer: every connect call
//! waits until the test decides its outcome, and an accepted connection is
//! handed to the test as a [`Backend`] it can read from and reply on.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bridge_proxy::config::ConnectionConfig;
use bridge_proxy::http::compression::CompressionPolicy;
use bridge_proxy::http::{HeaderBlock, Http2Headers, HttpObject, StreamId};
use bridge_proxy::load_balancer::Node;
use bridge_proxy::net::{
    Channel, ConnectError, Established, MpscChannel, Protocol, Transport,
};
use bridge_proxy::Bootstrapper;
use futures_util::future::BoxFuture;
use tokio::sync::{mpsc, oneshot};

type Outcome = Result<Established, ConnectError>;

struct PendingConnect {
    node: Arc<Node>,
    tx: oneshot::Sender<Outcome>,
}

/// Transport whose connects complete when the test says so.
#[derive(Default)]
pub struct ScriptedTransport {
    pending: Mutex<VecDeque<PendingConnect>>,
}

impl ScriptedTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Number of connects still waiting for an outcome.
    pub fn pending(&self) -> usize {
        self.pending.lock().unwrap().len()
    }

    /// Complete the oldest connect with the given protocol.
    pub fn accept(&self, protocol: Protocol) -> Backend {
        let pending = self.next();
        let (channel, written) = MpscChannel::pair(pending.node.secure);
        let (replies, inbound) = mpsc::unbounded_channel();
        let _ = pending.tx.send(Ok(Established {
            channel: Box::new(channel),
            inbound,
            protocol,
        }));
        Backend { written, replies }
    }

    /// Fail the oldest connect.
    pub fn refuse(&self) {
        let pending = self.next();
        let address = pending.node.address.clone();
        let _ = pending.tx.send(Err(ConnectError::Refused(address)));
    }

    fn next(&self) -> PendingConnect {
        self.pending
            .lock()
            .unwrap()
            .pop_front()
            .expect("no connect in progress")
    }
}

impl Transport for ScriptedTransport {
    fn connect(&self, node: Arc<Node>) -> BoxFuture<'static, Outcome> {
        let (tx, rx) = oneshot::channel();
        let address = node.address.clone();
        self.pending
            .lock()
            .unwrap()
            .push_back(PendingConnect { node, tx });
        Box::pin(async move {
            rx.await
                .unwrap_or_else(|_| Err(ConnectError::Refused(address)))
        })
    }
}

/// Backend end of an accepted connection.
pub struct Backend {
    pub written: mpsc::UnboundedReceiver<HttpObject>,
    pub replies: mpsc::UnboundedSender<HttpObject>,
}

impl Backend {
    /// Next object the proxy wrote to this backend.
    pub async fn next(&mut self) -> HttpObject {
        recv(&mut self.written).await
    }

    pub fn reply(&self, object: impl Into<HttpObject>) {
        self.replies.send(object.into()).unwrap();
    }
}

/// Client end of the proxy: the channel handed to the proxy and the
/// receiver the test reads responses from.
pub fn client(secure: bool) -> (Arc<dyn Channel>, mpsc::UnboundedReceiver<HttpObject>) {
    let (channel, rx) = MpscChannel::pair(secure);
    (Arc::new(channel), rx)
}

pub fn node(address: &str) -> Arc<Node> {
    Arc::new(Node::parse("backend-1", address).unwrap())
}

pub fn bootstrapper(
    transport: &Arc<ScriptedTransport>,
    backlog_capacity: usize,
) -> Bootstrapper<ScriptedTransport> {
    let config = ConnectionConfig {
        backlog_capacity,
        ..ConnectionConfig::default()
    };
    Bootstrapper::new(Arc::clone(transport), config, CompressionPolicy::default())
}

/// Receive with a timeout so a missing object fails instead of hanging.
pub async fn recv(rx: &mut mpsc::UnboundedReceiver<HttpObject>) -> HttpObject {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("timed out waiting for object")
        .expect("channel closed")
}

/// Let spawned connection tasks run until they block.
pub async fn settle() {
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
}

/// HTTP/2 request headers for `stream`.
pub fn h2_request(stream: u32, method: &str, path: &str, end_stream: bool) -> Http2Headers {
    let mut block = HeaderBlock::new();
    block.append(":method", method.to_string());
    block.append(":scheme", "https");
    block.append(":authority", "example.com");
    block.append(":path", path.to_string());
    Http2Headers::new(StreamId::new(stream), block, end_stream)
}

/// HTTP/2 response headers for `stream`.
pub fn h2_status(stream: StreamId, status: &str, end_stream: bool) -> Http2Headers {
    let mut block = HeaderBlock::new();
    block.append(":status", status.to_string());
    Http2Headers::new(stream, block, end_stream)
}
