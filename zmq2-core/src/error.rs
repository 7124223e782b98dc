/// zmq2 Error Types
///
/// Everything a socket operation can fail with. Ordinary backpressure is not
/// an error: sends report it as `Ok(false)` / `Ok(None)`.
use std::io;
use thiserror::Error;

use crate::endpoint::EndpointError;

/// Main error type for zmq2 operations
#[derive(Error, Debug)]
pub enum ZmqError {
    /// IO error during socket operations
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Unparseable or unsupported endpoint
    #[error("Invalid endpoint: {0}")]
    Endpoint(#[from] EndpointError),

    /// An inproc name is already bound by another socket
    #[error("inproc endpoint '{0}' is already bound")]
    AlreadyBound(String),

    /// An inproc name is not bound by this socket
    #[error("inproc endpoint '{0}' is not bound by this socket")]
    NotBound(String),

    /// Corrupt length prefix or oversized frame on a stream
    #[error("Malformed frame: {0}")]
    MalformedFrame(String),

    /// Operation the socket pattern does not support
    #[error("{socket_type} sockets do not support {operation}")]
    Unsupported {
        socket_type: &'static str,
        operation: &'static str,
    },

    /// Message the socket cannot send (e.g. zero frames)
    #[error("Invalid message: {0}")]
    InvalidMessage(String),

    /// Socket closed
    #[error("Socket closed")]
    SocketClosed,
}

/// Result type alias for zmq2 operations
pub type Result<T> = std::result::Result<T, ZmqError>;

impl ZmqError {
    /// Create a malformed frame error with a message
    pub fn malformed(msg: impl Into<String>) -> Self {
        Self::MalformedFrame(msg.into())
    }

    /// Create an invalid message error
    pub fn invalid_message(msg: impl Into<String>) -> Self {
        Self::InvalidMessage(msg.into())
    }

    /// Create an unsupported-operation error
    pub const fn unsupported(socket_type: &'static str, operation: &'static str) -> Self {
        Self::Unsupported {
            socket_type,
            operation,
        }
    }

    /// Check if this error is a programming error rather than a runtime condition
    #[must_use]
    pub const fn is_usage_error(&self) -> bool {
        matches!(
            self,
            Self::Unsupported { .. }
                | Self::InvalidMessage(_)
                | Self::SocketClosed
                | Self::Endpoint(_)
        )
    }

    /// Check if this is a connection error
    #[must_use]
    pub fn is_connection_error(&self) -> bool {
        match self {
            Self::Io(e) => matches!(
                e.kind(),
                io::ErrorKind::ConnectionRefused
                    | io::ErrorKind::ConnectionReset
                    | io::ErrorKind::ConnectionAborted
                    | io::ErrorKind::BrokenPipe
                    | io::ErrorKind::NotConnected
            ),
            Self::MalformedFrame(_) | Self::SocketClosed => true,
            _ => false,
        }
    }
}
