//! Backend connection bootstrapping.
//!
//! # Responsibilities
//! - Open a backend connection on behalf of a client and wire it to a
//!   fresh `HttpConnection`
//! - Run the per-connection task: connect, replay, serve, tear down
//! - Hand callers a cloneable handle that queues writes onto that task

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::BoxFuture;
use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::config::{ConnectionConfig, ProxyConfig};
use crate::connection::{
    ConnectionError, ConnectionGuard, ConnectionId, ConnectionTracker, HttpConnection,
    WaitingRequests,
};
use crate::http::compression::CompressionPolicy;
use crate::http::{ErrorCode, Http1Response, Http2Headers, Http2Reset, HttpObject};
use crate::lifecycle::{Shutdown, ShutdownSignal};
use crate::load_balancer::{Node, NodeConnectionGuard};
use crate::net::{Channel, ConnectError, Established, Protocol, Transport};
use crate::observability::metrics;
use crate::proxy::downstream::DownstreamHandler;

enum Command {
    Write(HttpObject),
    Close,
}

/// Caller side of a backend connection.
///
/// Writes are queued to the connection task and applied there in order;
/// their outcome is handled by the task.
#[derive(Clone)]
pub struct ConnectionHandle {
    id: ConnectionId,
    node: Arc<Node>,
    tx: mpsc::UnboundedSender<Command>,
    draining: Arc<AtomicBool>,
}

impl std::fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("id", &self.id)
            .field("node", &self.node.name)
            .field("closed", &self.tx.is_closed())
            .field("draining", &self.draining.load(Ordering::Acquire))
            .finish()
    }
}

impl ConnectionHandle {
    /// Get the ID of the connection behind this handle.
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Get the backend node the connection was opened to.
    pub fn node(&self) -> &Arc<Node> {
        &self.node
    }

    /// Queue one object for the backend.
    pub fn write_and_flush(&self, object: HttpObject) -> Result<(), ConnectionError> {
        if let HttpObject::Response(_) = object {
            return Err(ConnectionError::UnsupportedMessage(object.kind()));
        }
        self.tx
            .send(Command::Write(object))
            .map_err(|_| ConnectionError::Closed)
    }

    /// Ask the connection task to close. Writes queued before are applied.
    pub fn close(&self) {
        let _ = self.tx.send(Command::Close);
    }

    /// True once the connection takes no new requests: its task has
    /// finished, or the backend sent GOAWAY and it is draining.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed() || self.draining.load(Ordering::Acquire)
    }
}

/// Creates backend connections and the tasks that drive them.
pub struct Bootstrapper<T: Transport> {
    transport: Arc<T>,
    config: ConnectionConfig,
    policy: Arc<CompressionPolicy>,
    tracker: ConnectionTracker,
    shutdown: Shutdown,
}

impl<T: Transport> Bootstrapper<T> {
    /// Create a bootstrapper opening connections through `transport`.
    pub fn new(transport: Arc<T>, config: ConnectionConfig, policy: CompressionPolicy) -> Self {
        Self {
            transport,
            config,
            policy: Arc::new(policy),
            tracker: ConnectionTracker::new(),
            shutdown: Shutdown::new(),
        }
    }

    /// Create a bootstrapper from the proxy configuration.
    pub fn from_config(transport: Arc<T>, config: &ProxyConfig) -> Self {
        Self::new(
            transport,
            config.connection.clone(),
            CompressionPolicy::from_config(&config.compression),
        )
    }

    /// Open a connection to `node` serving `client`.
    ///
    /// Must be called from within a tokio runtime. The handle accepts
    /// writes right away; they are held in the backlog until the backend
    /// has negotiated its protocol.
    pub fn bootstrap(
        &self,
        node: Arc<Node>,
        client: Arc<dyn Channel>,
        client_protocol: Protocol,
    ) -> ConnectionHandle {
        let connection = HttpConnection::new(Arc::clone(&node), &self.config, Arc::clone(&self.policy));
        let id = connection.id();
        let (tx, commands) = mpsc::unbounded_channel();
        let draining = Arc::new(AtomicBool::new(false));

        tracing::info!(
            connection_id = %id,
            node = %node,
            client_protocol = %client_protocol,
            "Bootstrapping backend connection"
        );

        let task = ConnectionTask {
            connection,
            client,
            client_protocol,
            commands,
            draining: Arc::clone(&draining),
            shutdown: self.shutdown.subscribe(),
            policy: Arc::clone(&self.policy),
            connect_timeout: self.config.connect_timeout(),
            idle_timeout: self.config.idle_timeout(),
            _guard: self.tracker.track(id),
            _node_guard: node.track_connection(),
        };
        let connect = self.transport.connect(Arc::clone(&node));
        tokio::spawn(task.run(connect));

        ConnectionHandle {
            id,
            node,
            tx,
            draining,
        }
    }

    /// Tracker of the live connection tasks.
    pub fn tracker(&self) -> &ConnectionTracker {
        &self.tracker
    }

    /// Shutdown coordinator shared by every connection task.
    pub fn shutdown(&self) -> &Shutdown {
        &self.shutdown
    }

    /// Close every connection and wait for their tasks to finish.
    ///
    /// Returns false if some were still running after `timeout`.
    pub async fn shutdown_and_wait(&self, timeout: Duration) -> bool {
        self.shutdown.trigger();
        let idle = self.tracker.wait_for_idle(timeout).await;
        if !idle {
            tracing::warn!(
                remaining = self.tracker.active_count(),
                "Backend connections still open after shutdown timeout"
            );
        }
        idle
    }
}

/// Everything one backend connection needs, owned by its task.
struct ConnectionTask {
    connection: HttpConnection,
    client: Arc<dyn Channel>,
    client_protocol: Protocol,
    commands: mpsc::UnboundedReceiver<Command>,
    /// Set once the backend sent GOAWAY; read by every handle.
    draining: Arc<AtomicBool>,
    shutdown: ShutdownSignal,
    policy: Arc<CompressionPolicy>,
    connect_timeout: Duration,
    idle_timeout: Duration,
    _guard: ConnectionGuard,
    _node_guard: NodeConnectionGuard,
}

impl ConnectionTask {
    async fn run(mut self, connect: BoxFuture<'static, Result<Established, ConnectError>>) {
        let Some(Established {
            channel,
            inbound,
            protocol,
        }) = self.connect(connect).await
        else {
            self.connection.close();
            return;
        };

        let mut downstream = DownstreamHandler::new(
            self.connection.id(),
            Arc::clone(&self.client),
            protocol,
            self.connection.streams().clone(),
            Arc::clone(&self.policy),
        );

        match self.connection.process_backlog(Ok((channel, protocol))) {
            Ok(report) => {
                tracing::debug!(
                    connection_id = %self.connection.id(),
                    replayed = report.replayed,
                    rejected = report.rejected.len(),
                    "Backlog replayed"
                );
                let mut stop = false;
                for error in report.rejected {
                    stop |= self.on_write_error(error);
                }
                if !stop {
                    self.serve(&mut downstream, inbound).await;
                }
            }
            Err(error) => {
                self.on_write_error(error);
            }
        }

        downstream.abort();
        self.connection.close();
    }

    /// Wait for the transport while queueing writes into the backlog.
    async fn connect(
        &mut self,
        connect: BoxFuture<'static, Result<Established, ConnectError>>,
    ) -> Option<Established> {
        let timeout = self.connect_timeout;
        let attempt = tokio::time::timeout(timeout, connect);
        tokio::pin!(attempt);

        let outcome = loop {
            tokio::select! {
                biased;

                command = self.commands.recv() => match command {
                    Some(Command::Write(object)) => {
                        if let Err(error) = self.connection.write_and_flush(object) {
                            self.on_write_error(error);
                        }
                    }
                    Some(Command::Close) | None => {
                        tracing::debug!(connection_id = %self.connection.id(), "Closed while connecting");
                        return None;
                    }
                },
                result = &mut attempt => {
                    break result.unwrap_or(Err(ConnectError::Timeout(timeout)));
                }
                () = self.shutdown.recv() => {
                    tracing::debug!(connection_id = %self.connection.id(), "Shutdown while connecting");
                    let waiting = self.connection.abandon();
                    self.answer_bad_gateway(waiting);
                    return None;
                }
            }
        };

        match outcome {
            Ok(established) => Some(established),
            Err(source) => {
                if let Err(ConnectionError::Connect { waiting, .. }) =
                    self.connection.process_backlog(Err(source))
                {
                    self.answer_bad_gateway(waiting);
                }
                None
            }
        }
    }

    async fn serve(
        &mut self,
        downstream: &mut DownstreamHandler,
        mut inbound: mpsc::UnboundedReceiver<HttpObject>,
    ) {
        let id = self.connection.id();
        let idle_timeout = self.idle_timeout;
        let idle = tokio::time::sleep(idle_timeout);
        tokio::pin!(idle);
        let mut draining = false;

        while !self.connection.is_closed() {
            if draining && downstream.is_idle() {
                tracing::info!(connection_id = %id, "Drained after GOAWAY");
                break;
            }
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(Command::Write(object)) if draining && !self.connection.continues_open_exchange(&object) => {
                        self.refuse_while_draining(object);
                    }
                    Some(Command::Write(object)) => {
                        idle.as_mut().reset(Instant::now() + idle_timeout);
                        if let Err(error) = self.connection.write_and_flush(object) {
                            if self.on_write_error(error) {
                                break;
                            }
                        }
                    }
                    Some(Command::Close) | None => {
                        tracing::debug!(connection_id = %id, "Connection closed by client side");
                        break;
                    }
                },
                object = inbound.recv() => match object {
                    Some(object) => {
                        idle.as_mut().reset(Instant::now() + idle_timeout);
                        match downstream.on_inbound(object) {
                            Ok(()) => {}
                            Err(ConnectionError::GoAway(code)) => {
                                tracing::info!(connection_id = %id, error_code = %code, "Backend is going away, draining");
                                self.draining.store(true, Ordering::Release);
                                draining = true;
                            }
                            Err(error) => {
                                if self.on_read_error(error) {
                                    break;
                                }
                            }
                        }
                    }
                    None => {
                        tracing::info!(connection_id = %id, "Backend closed connection");
                        break;
                    }
                },
                () = &mut idle => {
                    tracing::info!(connection_id = %id, idle_timeout = ?idle_timeout, "Idle timeout");
                    break;
                }
                () = self.shutdown.recv() => {
                    tracing::info!(connection_id = %id, "Closing connection for shutdown");
                    break;
                }
            }
        }
    }

    /// Handle a failed write towards the backend. Returns true if the
    /// connection is done.
    fn on_write_error(&self, error: ConnectionError) -> bool {
        let id = self.connection.id();
        match error {
            ConnectionError::StreamRefused(stream) => {
                tracing::warn!(connection_id = %id, stream = %stream, "Refusing client stream");
                let _ = self.client.send(HttpObject::Reset(Http2Reset {
                    stream,
                    error_code: ErrorCode::REFUSED_STREAM,
                }));
                false
            }
            ConnectionError::UnsupportedMessage(kind) => {
                tracing::warn!(connection_id = %id, kind, "Unsupported message dropped");
                false
            }
            error => {
                tracing::error!(connection_id = %id, error = %error, "Backend write failed");
                true
            }
        }
    }

    /// Handle a failed read from the backend. Returns true if the
    /// connection is done.
    fn on_read_error(&self, error: ConnectionError) -> bool {
        let id = self.connection.id();
        if !error.is_fatal() {
            tracing::warn!(connection_id = %id, error = %error, "Backend message dropped");
            return false;
        }
        match &error {
            ConnectionError::Protocol(protocol_error) => {
                tracing::error!(connection_id = %id, error = %error, "Backend protocol error");
                metrics::record_protocol_error(protocol_error.kind());
            }
            _ => {
                tracing::error!(connection_id = %id, error = %error, "Response path failed");
            }
        }
        true
    }

    /// Turn away a write that would start a new exchange on a draining
    /// connection.
    fn refuse_while_draining(&self, object: HttpObject) {
        match object {
            HttpObject::Headers(headers) => {
                self.on_write_error(ConnectionError::StreamRefused(headers.stream));
            }
            HttpObject::Request(_) => self.answer_bad_gateway(WaitingRequests {
                http1: 1,
                http2: Vec::new(),
            }),
            object => tracing::debug!(
                connection_id = %self.connection.id(),
                kind = object.kind(),
                stream = ?object.stream(),
                "Write for a refused exchange dropped while draining"
            ),
        }
    }

    fn answer_bad_gateway(&self, waiting: WaitingRequests) {
        if waiting.is_empty() {
            return;
        }
        tracing::warn!(
            connection_id = %self.connection.id(),
            client_protocol = %self.client_protocol,
            http1 = waiting.http1,
            http2 = waiting.http2.len(),
            "Answering waiting requests with bad gateway"
        );
        for stream in waiting.http2 {
            let _ = self.client.send(Http2Headers::bad_gateway(stream).into());
        }
        if waiting.http1 > 0 {
            let _ = self.client.send(Http1Response::bad_gateway().into());
            self.client.close();
        }
    }
}
