//! Socket event monitoring.
//!
//! Provides event streams for tracking socket lifecycle events like
//! connections, disconnections, peer registration and reconnect scheduling.

use crate::endpoint::Endpoint;
use bytes::Bytes;
use std::fmt;
use std::time::Duration;

/// Socket lifecycle events.
#[derive(Debug, Clone)]
pub enum SocketEvent {
    /// Socket successfully bound to an endpoint.
    Bound(Endpoint),

    /// Bind operation failed.
    BindFailed { endpoint: Endpoint, reason: String },

    /// Outbound connection established.
    Connected(Endpoint),

    /// Connection attempt failed.
    ConnectFailed { endpoint: Endpoint, reason: String },

    /// A connect-initiated connection went away.
    Disconnected(Endpoint),

    /// A re-dial has been scheduled.
    ReconnectScheduled { endpoint: Endpoint, delay: Duration },

    /// A peer completed the identity handshake.
    PeerRegistered(Bytes),

    /// A registered peer went away.
    PeerUnregistered(Bytes),

    /// A connection sent bytes that do not decode as frames and was dropped.
    ProtocolError(String),

    /// The socket finished closing.
    Closed,
}

impl fmt::Display for SocketEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bound(ep) => write!(f, "Bound to {ep}"),
            Self::BindFailed { endpoint, reason } => {
                write!(f, "Bind failed for {endpoint}: {reason}")
            }
            Self::Connected(ep) => write!(f, "Connected to {ep}"),
            Self::ConnectFailed { endpoint, reason } => {
                write!(f, "Connect failed for {endpoint}: {reason}")
            }
            Self::Disconnected(ep) => write!(f, "Disconnected from {ep}"),
            Self::ReconnectScheduled { endpoint, delay } => {
                write!(f, "Reconnecting to {endpoint} in {delay:?}")
            }
            Self::PeerRegistered(id) => write!(f, "Peer registered: {}", String::from_utf8_lossy(id)),
            Self::PeerUnregistered(id) => {
                write!(f, "Peer unregistered: {}", String::from_utf8_lossy(id))
            }
            Self::ProtocolError(reason) => write!(f, "Protocol error: {reason}"),
            Self::Closed => write!(f, "Closed"),
        }
    }
}

/// Handle for receiving socket events.
pub type SocketMonitor = flume::Receiver<SocketEvent>;

/// Sender half kept by the socket.
pub type SocketEventSender = flume::Sender<SocketEvent>;

/// Creates a new monitoring channel pair.
#[must_use]
pub fn create_monitor() -> (SocketEventSender, SocketMonitor) {
    flume::unbounded()
}
