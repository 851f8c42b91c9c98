//! Bounded backlog of writes issued before the backend is ready.

use std::collections::VecDeque;

use crate::http::{HttpObject, StreamId};
use crate::observability::metrics;

/// Client requests still waiting in a backlog when it is released.
///
/// Used to answer each of them with a bad gateway.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WaitingRequests {
    /// HTTP/1.1 requests queued.
    pub http1: usize,
    /// HTTP/2 client streams that opened in the backlog, in order.
    pub http2: Vec<StreamId>,
}

impl WaitingRequests {
    pub fn is_empty(&self) -> bool {
        self.http1 == 0 && self.http2.is_empty()
    }
}

/// FIFO queue with a hard capacity.
#[derive(Debug)]
pub struct Backlog {
    queue: VecDeque<HttpObject>,
    capacity: usize,
}

impl Backlog {
    /// Create an empty backlog holding at most `capacity` objects.
    pub fn new(capacity: usize) -> Self {
        Self {
            queue: VecDeque::new(),
            capacity,
        }
    }

    /// Append an object, handing it back if the backlog is full.
    pub fn push(&mut self, object: HttpObject) -> Result<(), HttpObject> {
        if self.queue.len() >= self.capacity {
            return Err(object);
        }
        self.queue.push_back(object);
        metrics::record_backlog_enqueued();
        Ok(())
    }

    /// Number of queued objects.
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Requests that would go unanswered if the backlog were released now.
    pub fn waiting_requests(&self) -> WaitingRequests {
        let mut waiting = WaitingRequests::default();
        for object in &self.queue {
            match object {
                HttpObject::Request(_) => waiting.http1 += 1,
                HttpObject::Headers(headers) if !waiting.http2.contains(&headers.stream) => {
                    waiting.http2.push(headers.stream)
                }
                _ => {}
            }
        }
        waiting
    }

    /// Hand over every queued object in enqueue order.
    pub fn into_objects(self) -> VecDeque<HttpObject> {
        self.queue
    }

    /// Drop every queued object. Returns how many were released.
    pub fn release(&mut self) -> usize {
        let released = self.queue.len();
        self.queue.clear();
        if released > 0 {
            metrics::record_backlog_released(released);
        }
        released
    }
}
