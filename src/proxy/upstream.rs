//! Client → backend adapter.
//!
//! # Responsibilities
//! - Pick a backend node for each new client request or stream
//! - Reuse one live connection per node, bootstrapping on demand
//! - Keep client HTTP/2 streams pinned to the connection they opened on
//! - Answer requests with no route with a bad gateway

use std::collections::HashMap;
use std::sync::Arc;

use crate::connection::ConnectionError;
use crate::http::{convert, Http1Request, Http1Response, Http2Headers, HttpObject, ProtocolError, StreamId};
use crate::load_balancer::NodeSelector;
use crate::net::{Channel, Protocol, Transport};
use crate::proxy::bootstrap::{Bootstrapper, ConnectionHandle};

/// Everything one client connection sends.
pub struct UpstreamHandler<T: Transport> {
    bootstrapper: Arc<Bootstrapper<T>>,
    selector: Arc<dyn NodeSelector>,
    client: Arc<dyn Channel>,
    client_protocol: Protocol,
    /// Live connections by node name.
    connections: HashMap<String, ConnectionHandle>,
    /// HTTP/1.1 client: connection carrying the current request.
    current: Option<ConnectionHandle>,
    /// HTTP/2 client: streams whose request is still open.
    routes: HashMap<StreamId, ConnectionHandle>,
}

impl<T: Transport> UpstreamHandler<T> {
    /// Create the request path of one client connection.
    pub fn new(
        bootstrapper: Arc<Bootstrapper<T>>,
        selector: Arc<dyn NodeSelector>,
        client: Arc<dyn Channel>,
        client_protocol: Protocol,
    ) -> Self {
        Self {
            bootstrapper,
            selector,
            client,
            client_protocol,
            connections: HashMap::new(),
            current: None,
            routes: HashMap::new(),
        }
    }

    /// Handle one object read from the client.
    pub fn on_client_message(&mut self, object: HttpObject) -> Result<(), ConnectionError> {
        match object {
            HttpObject::Request(request) => self.client_request(request),
            HttpObject::Content(_) | HttpObject::Upgraded(_) => match &self.current {
                Some(handle) => handle.write_and_flush(object),
                None => Err(ProtocolError::NoMessageInProgress.into()),
            },
            HttpObject::Headers(headers) => self.client_headers(headers),
            HttpObject::Data(data) => {
                let stream = data.stream;
                let Some(handle) = self.route(stream, data.end_stream) else {
                    tracing::debug!(stream = %stream, "DATA for unrouted stream dropped");
                    return Ok(());
                };
                handle.write_and_flush(data.into())
            }
            HttpObject::Reset(reset) => match self.routes.remove(&reset.stream) {
                Some(handle) => handle.write_and_flush(HttpObject::Reset(reset)),
                None => {
                    self.broadcast(HttpObject::Reset(reset));
                    Ok(())
                }
            },
            HttpObject::WindowUpdate(update) => match self.routes.get(&update.stream).cloned() {
                Some(handle) => handle.write_and_flush(HttpObject::WindowUpdate(update)),
                None => {
                    self.broadcast(HttpObject::WindowUpdate(update));
                    Ok(())
                }
            },
            HttpObject::GoAway(_) => {
                self.routes.clear();
                self.broadcast(object);
                Ok(())
            }
            HttpObject::Settings(_) | HttpObject::SettingsAck | HttpObject::Ping(_) => {
                self.broadcast(object);
                Ok(())
            }
            HttpObject::Response(_) => Err(ConnectionError::UnsupportedMessage(object.kind())),
        }
    }

    /// Number of live backend connections serving this client.
    pub fn connection_count(&self) -> usize {
        self.connections.values().filter(|h| !h.is_closed()).count()
    }

    /// Close every backend connection of this client.
    pub fn close(&mut self) {
        for handle in self.connections.values() {
            handle.close();
        }
        self.connections.clear();
        self.routes.clear();
        self.current = None;
    }

    fn client_request(&mut self, request: Http1Request) -> Result<(), ConnectionError> {
        let handle = convert::request_authority(&request).and_then(|host| self.connection_for(&host));
        let Some(handle) = handle else {
            tracing::warn!(request_target = %request.target, "No backend for request, answering bad gateway");
            self.current = None;
            self.client.send(Http1Response::bad_gateway().into())?;
            self.client.close();
            return Ok(());
        };
        self.current = Some(handle.clone());
        handle.write_and_flush(request.into())
    }

    fn client_headers(&mut self, headers: Http2Headers) -> Result<(), ConnectionError> {
        if self.routes.contains_key(&headers.stream) {
            let Some(handle) = self.route(headers.stream, headers.end_stream) else {
                return Ok(());
            };
            return handle.write_and_flush(headers.into());
        }

        let host = headers
            .headers
            .authority()
            .or_else(|| headers.headers.get_str("host"))
            .map(str::to_string);
        let Some(handle) = host.and_then(|host| self.connection_for(&host)) else {
            tracing::warn!(stream = %headers.stream, "No backend for stream, answering bad gateway");
            self.client.send(Http2Headers::bad_gateway(headers.stream).into())?;
            return Ok(());
        };
        if !headers.end_stream {
            self.routes.insert(headers.stream, handle.clone());
        }
        handle.write_and_flush(headers.into())
    }

    fn route(&mut self, stream: StreamId, end_stream: bool) -> Option<ConnectionHandle> {
        if end_stream {
            self.routes.remove(&stream)
        } else {
            self.routes.get(&stream).cloned()
        }
    }

    fn connection_for(&mut self, host: &str) -> Option<ConnectionHandle> {
        let node = self.selector.select(host)?;
        if let Some(handle) = self.connections.get(&node.name) {
            if !handle.is_closed() {
                return Some(handle.clone());
            }
        }
        let handle = self
            .bootstrapper
            .bootstrap(Arc::clone(&node), Arc::clone(&self.client), self.client_protocol);
        self.connections.insert(node.name.clone(), handle.clone());
        Some(handle)
    }

    fn broadcast(&mut self, object: HttpObject) {
        self.connections.retain(|_, handle| !handle.is_closed());
        tracing::trace!(kind = object.kind(), connections = self.connections.len(), "Broadcasting control frame");
        for handle in self.connections.values() {
            let _ = handle.write_and_flush(object.clone());
        }
    }
}
