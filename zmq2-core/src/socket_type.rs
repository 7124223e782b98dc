//! Socket type enumeration.

use std::fmt;

/// ZeroMQ 2.x socket patterns implemented by zmq2.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum SocketType {
    /// PUB socket for publishing messages to subscribers
    Pub = 1,

    /// SUB socket for subscribing to published messages
    Sub = 2,

    /// REQ socket for request-reply clients
    Req = 3,

    /// REP socket for request-reply servers
    Rep = 4,

    /// DEALER socket (XREQ) for load-balanced asynchronous sends
    Dealer = 5,

    /// ROUTER socket (XREP) for routing messages by identity
    Router = 6,
}

impl SocketType {
    /// Get the socket type as a string name.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pub => "PUB",
            Self::Sub => "SUB",
            Self::Req => "REQ",
            Self::Rep => "REP",
            Self::Dealer => "DEALER",
            Self::Router => "ROUTER",
        }
    }

    /// Whether applications may hand messages to this socket directly.
    ///
    /// SUB is receive-only; REQ and REP send through `send_request` and
    /// `send_reply`, which add the envelope.
    pub const fn accepts_raw_send(&self) -> bool {
        matches!(self, Self::Pub | Self::Dealer | Self::Router)
    }
}

impl fmt::Display for SocketType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
