//! In-process transport.
//!
//! Sockets on the same thread exchange messages through paired
//! [`InprocConnection`]s without any encoding. Each side queues outgoing
//! messages; the other side pulls them. Delivery is synchronous while the
//! receiver is waiting, up to [`MAX_SYNC_DELIVERIES`] nested deliveries, after
//! which it continues on the next reactor tick.
//!
//! Endpoint names live in a per-thread registry mapping a name to the socket
//! bound to it.

use hashbrown::HashMap;
use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::{Rc, Weak};
use tracing::{debug, trace};
use zmq2_core::endpoint::Endpoint;
use zmq2_core::error::{Result, ZmqError};
use zmq2_core::reactor::Reactor;

use crate::codec::Multipart;
use crate::connection::{
    next_connection_id, ConnectionId, ConnectionState, PeerConnection, PeerLink, SocketEvents,
};

/// Nested synchronous deliveries before yielding to the reactor.
pub const MAX_SYNC_DELIVERIES: usize = 10;

thread_local! {
    static REGISTRY: RefCell<HashMap<String, Weak<dyn SocketEvents>>> =
        RefCell::new(HashMap::new());
}

fn same_socket(a: &Weak<dyn SocketEvents>, b: &Rc<dyn SocketEvents>) -> bool {
    a.upgrade().is_some_and(|a| Rc::ptr_eq(&a, b))
}

/// Register `socket` under `name`.
///
/// Binding a name the same socket already holds is a no-op. Names held by a
/// socket that no longer exists are reclaimed.
pub(crate) fn bind(name: &str, socket: &Rc<dyn SocketEvents>) -> Result<()> {
    REGISTRY.with(|registry| {
        let mut registry = registry.borrow_mut();
        if let Some(existing) = registry.get(name) {
            if same_socket(existing, socket) {
                return Ok(());
            }
            if existing.strong_count() > 0 {
                return Err(ZmqError::AlreadyBound(name.to_string()));
            }
        }
        registry.insert(name.to_string(), Rc::downgrade(socket));
        debug!(name, "[INPROC] bound");
        Ok(())
    })
}

/// Release `name`, which must be held by `socket`.
pub(crate) fn unbind(name: &str, socket: &Rc<dyn SocketEvents>) -> Result<()> {
    REGISTRY.with(|registry| {
        let mut registry = registry.borrow_mut();
        match registry.get(name) {
            Some(existing) if same_socket(existing, socket) => {
                registry.remove(name);
                debug!(name, "[INPROC] unbound");
                Ok(())
            }
            _ => Err(ZmqError::NotBound(name.to_string())),
        }
    })
}

fn lookup(name: &str) -> Option<Rc<dyn SocketEvents>> {
    REGISTRY.with(|registry| registry.borrow().get(name).and_then(Weak::upgrade))
}

/// Names currently bound on this thread, sorted.
pub fn bound_names() -> Vec<String> {
    let mut names: Vec<String> = REGISTRY.with(|registry| {
        registry
            .borrow()
            .iter()
            .filter(|(_, socket)| socket.strong_count() > 0)
            .map(|(name, _)| name.clone())
            .collect()
    });
    names.sort();
    names
}

/// Open a client connection to `name`.
///
/// The connection is reported to `client` right away. It is linked to the
/// bound socket on the next tick; if nothing is bound by then, the
/// connection goes away again and the client is told it is not connected.
pub(crate) fn connect(name: &str, client: &Rc<dyn SocketEvents>) -> Rc<InprocConnection> {
    let connection = InprocConnection::new(client);
    client.connection_opened(
        Rc::clone(&connection) as Rc<dyn PeerConnection>,
        Some(Endpoint::Inproc(name.to_string())),
    );

    let pending = Rc::downgrade(&connection);
    let name = name.to_string();
    client.reactor().next_tick(Box::new(move || {
        let Some(connection) = pending.upgrade() else {
            return;
        };
        if connection.state.get() != ConnectionState::Connecting {
            // Closed before it was linked.
            connection.unbind();
            return;
        }
        let Some(server) = lookup(&name) else {
            debug!(name = %name, connection = connection.id(), "[INPROC] nothing bound");
            connection.unbind();
            return;
        };

        let accepted = InprocConnection::new(&server);
        server.connection_opened(Rc::clone(&accepted) as Rc<dyn PeerConnection>, None);
        accepted.set_peer(&connection);
        connection.set_peer(&accepted);
        debug!(name = %name, client = connection.id(), server = accepted.id(), "[INPROC] linked");
    }));
    connection
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CloseMode {
    /// Drop anything still queued.
    Discard,
    /// Let the peer drain the queue first.
    AfterWriting,
    /// The other side closed.
    ByPeer,
}

/// One side of an in-process link.
pub(crate) struct InprocConnection {
    link: PeerLink,
    reactor: Rc<dyn Reactor>,
    state: Cell<ConnectionState>,
    peer: RefCell<Option<Rc<InprocConnection>>>,
    /// The peer has drained our queue and waits to be told about more.
    peer_waiting: Cell<bool>,
    outgoing: RefCell<VecDeque<Multipart>>,
    notify_when_free: Cell<bool>,
    busy_threshold: usize,
    this: Weak<InprocConnection>,
}

impl InprocConnection {
    fn new(socket: &Rc<dyn SocketEvents>) -> Rc<Self> {
        let config = socket.stream_config();
        Rc::new_cyclic(|this| Self {
            link: PeerLink::new(next_connection_id(), Rc::downgrade(socket)),
            reactor: socket.reactor(),
            state: Cell::new(ConnectionState::Connecting),
            peer: RefCell::new(None),
            peer_waiting: Cell::new(false),
            outgoing: RefCell::new(VecDeque::new()),
            notify_when_free: Cell::new(false),
            busy_threshold: config.busy_threshold,
            this: this.clone(),
        })
    }

    fn peer(&self) -> Option<Rc<InprocConnection>> {
        self.peer.borrow().clone()
    }

    /// Run `f` on this connection on the next tick.
    fn defer(&self, f: impl FnOnce(&InprocConnection) + 'static) {
        let this = self.this.clone();
        self.reactor.next_tick(Box::new(move || {
            if let Some(connection) = this.upgrade() {
                f(&connection);
            }
        }));
    }

    fn set_peer(&self, peer: &Rc<InprocConnection>) {
        self.state.set(ConnectionState::Connected);
        *self.peer.borrow_mut() = Some(Rc::clone(peer));
        // We are ready to take whatever the peer queues.
        peer.peer_waiting(0);

        self.defer(|connection| {
            if connection.state.get() != ConnectionState::Connected {
                return;
            }
            if let Some(identity) = connection.link.local_identity() {
                connection.send_message(&[identity]);
            }
        });
    }

    /// Take the next queued message for the peer.
    fn shift_outgoing(&self) -> Option<Multipart> {
        let mut outgoing = self.outgoing.borrow_mut();
        let message = outgoing.pop_front()?;
        if self.notify_when_free.get() && outgoing.len() < self.busy_threshold {
            self.notify_when_free.set(false);
            self.defer(|connection| connection.link.sent_data());
        }
        Some(message)
    }

    /// The peer is ready for our next message.
    fn peer_waiting(&self, depth: usize) {
        let pending = !self.outgoing.borrow().is_empty();
        if pending {
            self.peer_waiting.set(false);
            let Some(peer) = self.peer() else {
                return;
            };
            if depth >= MAX_SYNC_DELIVERIES {
                trace!(connection = self.id(), "[INPROC] delivery continues next tick");
                peer.defer(|peer| peer.pull(0));
            } else {
                peer.pull(depth + 1);
            }
        } else {
            if self.state.get() == ConnectionState::Closing {
                self.unbind();
            }
            self.peer_waiting.set(true);
        }
    }

    /// Take one message from the peer's queue and deliver it.
    fn pull(&self, depth: usize) {
        let Some(peer) = self.peer() else {
            return;
        };
        if let Some(message) = peer.shift_outgoing() {
            if let Some(me) = self.this.upgrade() {
                self.link.accept(message, &(me as Rc<dyn PeerConnection>));
            }
        }
        peer.peer_waiting(depth);
    }

    fn close_with(&self, mode: CloseMode) {
        match self.state.get() {
            ConnectionState::Closed => return,
            ConnectionState::Closing => {
                if mode == CloseMode::Discard {
                    self.outgoing.borrow_mut().clear();
                }
                return;
            }
            _ => {}
        }

        let peer = self.peer();
        if mode != CloseMode::ByPeer {
            if let Some(peer) = &peer {
                peer.close_with(CloseMode::ByPeer);
            }
        }
        if mode != CloseMode::AfterWriting {
            self.outgoing.borrow_mut().clear();
        }
        self.notify_when_free.set(false);
        self.state.set(ConnectionState::Closing);
        trace!(connection = self.id(), ?mode, "[INPROC] closing");

        // Without a peer the pending connect tick finishes the teardown.
        if let Some(peer) = peer {
            if self.peer_waiting.replace(false) {
                peer.defer(|peer| peer.pull(0));
            }
        }
    }

    /// Final teardown. Runs once.
    fn unbind(&self) {
        let previous = self.state.replace(ConnectionState::Closed);
        if previous == ConnectionState::Closed {
            return;
        }
        let peer = self.peer();
        if previous == ConnectionState::Closing {
            // Keep draining whatever the peer still has for us.
            if let Some(peer) = &peer {
                peer.peer_waiting(0);
            }
        }
        debug!(connection = self.id(), "[INPROC] connection closed");
        self.link.unbind();

        if let Some(peer) = peer {
            if peer.state.get() == ConnectionState::Closed {
                peer.peer.borrow_mut().take();
                self.peer.borrow_mut().take();
            }
        }
    }
}

impl PeerConnection for InprocConnection {
    fn id(&self) -> ConnectionId {
        self.link.id()
    }

    fn send_message(&self, frames: &[bytes::Bytes]) {
        if self.state.get() != ConnectionState::Connected {
            trace!(connection = self.id(), "[INPROC] dropping message on inactive connection");
            return;
        }
        self.outgoing.borrow_mut().push_back(frames.to_vec());
        if self.peer_waiting.replace(false) {
            if let Some(peer) = self.peer() {
                peer.defer(|peer| peer.pull(0));
            }
        }
    }

    fn not_too_busy(&self) -> bool {
        let free = self.state.get() == ConnectionState::Connected
            && self.outgoing.borrow().len() < self.busy_threshold;
        self.notify_when_free.set(!free);
        free
    }

    fn close(&self, after_writing: bool) {
        self.close_with(if after_writing {
            CloseMode::AfterWriting
        } else {
            CloseMode::Discard
        });
    }

    fn abort(&self) {
        self.close_with(CloseMode::Discard);
        self.unbind();
    }
}
