//! Outbound message channels.
//!
//! # Responsibilities
//! - Abstract "write this object to the peer" for both legs of the proxy
//! - Carry whether the leg is TLS-secured (selects `:scheme`)
//! - Provide an in-memory implementation backed by a tokio mpsc queue

use std::sync::Mutex;

use thiserror::Error;
use tokio::sync::mpsc;

use crate::http::HttpObject;

/// Write on a channel that is already closed.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ChannelError {
    #[error("channel is closed")]
    Closed,
}

/// One direction of a connection, as seen by the proxy.
///
/// Implementations sit in front of a frame codec: whatever is sent here is
/// encoded and written to the socket by the owner of the receiving side.
pub trait Channel: Send + Sync {
    /// Queue an object for the peer.
    fn send(&self, object: HttpObject) -> Result<(), ChannelError>;

    /// Close the channel. Further sends fail.
    fn close(&self);

    fn is_open(&self) -> bool;

    /// True if the leg is TLS-secured.
    fn is_secure(&self) -> bool;
}

/// [`Channel`] feeding an unbounded tokio mpsc queue.
#[derive(Debug)]
pub struct MpscChannel {
    tx: Mutex<Option<mpsc::UnboundedSender<HttpObject>>>,
    secure: bool,
}

impl MpscChannel {
    /// Create a channel and the receiver its objects arrive on.
    pub fn pair(secure: bool) -> (Self, mpsc::UnboundedReceiver<HttpObject>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                tx: Mutex::new(Some(tx)),
                secure,
            },
            rx,
        )
    }
}

impl Channel for MpscChannel {
    fn send(&self, object: HttpObject) -> Result<(), ChannelError> {
        let tx = self.tx.lock().expect("channel mutex poisoned");
        match tx.as_ref() {
            Some(tx) => tx.send(object).map_err(|_| ChannelError::Closed),
            None => Err(ChannelError::Closed),
        }
    }

    fn close(&self) {
        self.tx.lock().expect("channel mutex poisoned").take();
    }

    fn is_open(&self) -> bool {
        self.tx
            .lock()
            .expect("channel mutex poisoned")
            .as_ref()
            .map(|tx| !tx.is_closed())
            .unwrap_or(false)
    }

    fn is_secure(&self) -> bool {
        self.secure
    }
}
