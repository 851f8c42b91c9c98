//! Errors surfaced by `write_and_flush` and the connection task.

use thiserror::Error;

use crate::connection::backlog::WaitingRequests;
use crate::http::{ErrorCode, ProtocolError, StreamId};
use crate::net::{ChannelError, ConnectError};

#[derive(Debug, Error)]
pub enum ConnectionError {
    /// Fatal; the connection is closed before this is returned.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// The object cannot travel on this connection. Not fatal.
    #[error("unsupported message type {0}")]
    UnsupportedMessage(&'static str),

    /// An HTTP/1.1 backend is busy with another stream's body. Not fatal.
    #[error("stream {0} refused")]
    StreamRefused(StreamId),

    /// The backend could not be reached; the backlog was released.
    #[error("backend connect failed: {source}")]
    Connect {
        #[source]
        source: ConnectError,
        waiting: WaitingRequests,
    },

    #[error("channel error: {0}")]
    Channel(#[from] ChannelError),

    #[error("connection is closed")]
    Closed,

    #[error("backend sent GOAWAY with code {0}")]
    GoAway(ErrorCode),

    #[error("transcoding failed: {0}")]
    Transcode(#[from] std::io::Error),
}

impl ConnectionError {
    /// True if the connection cannot carry further traffic.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            ConnectionError::UnsupportedMessage(_) | ConnectionError::StreamRefused(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stream_level_errors_are_not_fatal() {
        assert!(!ConnectionError::StreamRefused(StreamId::new(3)).is_fatal());
        assert!(!ConnectionError::UnsupportedMessage("http1-response").is_fatal());
        assert!(ConnectionError::from(ProtocolError::SwitchingProtocols).is_fatal());
        assert!(ConnectionError::Closed.is_fatal());
    }
}
