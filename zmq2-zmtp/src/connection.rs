//! The contract between a socket and its peer connections.
//!
//! A connection (TCP/IPC stream or in-process link) talks to its socket
//! through [`SocketEvents`]; the socket drives the connection through
//! [`PeerConnection`]. Both sides live on one thread and hold each other by
//! `Rc`/`Weak`; no `RefCell` borrow is ever held across one of these calls.

use bytes::Bytes;
use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};
use tracing::{debug, trace};
use zmq2_core::endpoint::Endpoint;
use zmq2_core::error::ZmqError;
use zmq2_core::reactor::Reactor;

use crate::codec::Multipart;

/// Unique (per thread) connection id.
pub type ConnectionId = u64;

thread_local! {
    static NEXT_CONNECTION_ID: Cell<ConnectionId> = const { Cell::new(1) };
}

/// Allocate a fresh connection id.
pub(crate) fn next_connection_id() -> ConnectionId {
    NEXT_CONNECTION_ID.with(|next| {
        let id = next.get();
        next.set(id + 1);
        id
    })
}

/// Connection lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Connected,
    Closing,
    Closed,
}

/// Socket-side handle to one peer connection.
pub trait PeerConnection {
    fn id(&self) -> ConnectionId;

    /// Queue one message for the peer.
    fn send_message(&self, frames: &[Bytes]);

    /// Queue a message whose wire encoding is already known. In-process
    /// connections ignore the encoding.
    fn send_encoded(&self, frames: &[Bytes], encoded: &Bytes) {
        let _ = encoded;
        self.send_message(frames);
    }

    /// Whether the connection can take more data right now. When it cannot,
    /// the connection remembers to report the peer free once it drains.
    fn not_too_busy(&self) -> bool;

    fn is_errored(&self) -> bool {
        false
    }

    /// Start closing. With `after_writing`, queued messages are delivered
    /// first; otherwise they are discarded.
    fn close(&self, after_writing: bool);

    /// Tear down immediately, abandoning any pending writes.
    fn abort(&self) {
        self.close(false);
    }
}

/// Per-socket settings a stream connection needs.
#[derive(Debug, Clone, Copy)]
pub struct StreamConfig {
    pub busy_threshold: usize,
    pub read_buffer_size: usize,
    pub max_frame_size: Option<usize>,
    pub tcp_nodelay: bool,
}

/// Connection-side handle to the owning socket.
pub trait SocketEvents {
    /// Identity sent to peers during the handshake.
    fn identity(&self) -> Bytes;

    fn reactor(&self) -> Rc<dyn Reactor>;

    fn stream_config(&self) -> StreamConfig;

    /// Record the peer under `identity` (generating one if empty) and return
    /// the identity actually registered.
    fn register_peer(&self, identity: Bytes, connection: Rc<dyn PeerConnection>) -> Bytes;

    /// Forget `identity`, if it still belongs to `connection`.
    fn unregister_peer(&self, identity: &Bytes, connection: ConnectionId);

    fn receive_message_and_peer(&self, message: Multipart, identity: &Bytes);

    /// The connection registered as `identity` can take data again.
    fn peer_free(&self, identity: &Bytes, connection: ConnectionId);

    /// A transport connection exists (handshake not yet complete).
    fn connection_opened(&self, connection: Rc<dyn PeerConnection>, endpoint: Option<Endpoint>);

    /// A connection is gone, or a dial attempt failed.
    fn not_connected(&self, connection: ConnectionId);

    /// Re-dial a connect-initiated endpoint.
    fn reconnect(&self, endpoint: Endpoint);

    /// The connection received undecodable data and is being closed.
    fn protocol_error(&self, connection: ConnectionId, error: ZmqError);
}

/// Identity handshake and socket notifications shared by every connection
/// type.
///
/// The first message a peer sends is its identity. It is registered with the
/// socket rather than delivered; every later message is delivered tagged with
/// the registered identity.
pub(crate) struct PeerLink {
    id: ConnectionId,
    socket: Weak<dyn SocketEvents>,
    peer_identity: RefCell<Option<Bytes>>,
    registered: Cell<bool>,
    unbound: Cell<bool>,
}

impl PeerLink {
    pub(crate) fn new(id: ConnectionId, socket: Weak<dyn SocketEvents>) -> Self {
        Self {
            id,
            socket,
            peer_identity: RefCell::new(None),
            registered: Cell::new(false),
            unbound: Cell::new(false),
        }
    }

    pub(crate) fn id(&self) -> ConnectionId {
        self.id
    }

    /// Own socket identity, for the handshake message.
    pub(crate) fn local_identity(&self) -> Option<Bytes> {
        self.socket.upgrade().map(|socket| socket.identity())
    }

    pub(crate) fn peer_identity(&self) -> Option<Bytes> {
        self.peer_identity.borrow().clone()
    }

    /// Handle one inbound message.
    pub(crate) fn accept(&self, message: Multipart, connection: &Rc<dyn PeerConnection>) {
        let Some(socket) = self.socket.upgrade() else {
            return;
        };
        match self.peer_identity() {
            Some(identity) => socket.receive_message_and_peer(message, &identity),
            None if self.unbound.get() => {
                trace!(connection = self.id, "[PeerLink] dropping message after teardown");
            }
            None => {
                let supplied = message.into_iter().next().unwrap_or_default();
                let identity = socket.register_peer(supplied, Rc::clone(connection));
                debug!(
                    connection = self.id,
                    identity = %String::from_utf8_lossy(&identity),
                    "[PeerLink] peer registered"
                );
                *self.peer_identity.borrow_mut() = Some(identity);
                self.registered.set(true);
            }
        }
    }

    /// The connection drained below its busy threshold.
    pub(crate) fn sent_data(&self) {
        if self.unbound.get() {
            return;
        }
        if let (Some(socket), Some(identity)) = (self.socket.upgrade(), self.peer_identity()) {
            socket.peer_free(&identity, self.id);
        }
    }

    /// Tell the socket the connection is gone. Runs once.
    pub(crate) fn unbind(&self) {
        if self.unbound.replace(true) {
            return;
        }
        let Some(socket) = self.socket.upgrade() else {
            return;
        };
        if self.registered.replace(false) {
            if let Some(identity) = self.peer_identity() {
                socket.unregister_peer(&identity, self.id);
            }
        }
        socket.not_connected(self.id);
    }

    pub(crate) fn protocol_error(&self, error: ZmqError) {
        if let Some(socket) = self.socket.upgrade() {
            socket.protocol_error(self.id, error);
        }
    }
}
