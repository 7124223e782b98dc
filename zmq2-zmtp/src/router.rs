//! ROUTER sockets.
//!
//! Inbound messages are delivered with the sending peer's identity as the
//! first frame. Outbound messages name their destination the same way: the
//! first frame selects the peer and is stripped before sending.
//!
//! [`BasicRouterSocket`] sends straight to the named peer or refuses the
//! message when that peer is not connected or busy.
//!
//! [`RouterSocket`] gives each destination identity its own queue, bounded
//! by the high water mark. Queues for identities a peer chose itself survive
//! disconnects, so a peer that comes back under the same identity gets what
//! was queued in the meantime. Generated identities (`%GN%…`) cannot come
//! back: their queues go away with the connection and messages addressed to
//! one that is not connected are refused.

use std::fmt;
use std::rc::Rc;
use tracing::trace;
use zmq2_core::error::Result;
use zmq2_core::options::SocketOptions;
use zmq2_core::reactor::Reactor;
use zmq2_core::socket_type::SocketType;

use crate::base::{Engine, MessageInbound};
use crate::codec::Multipart;
use crate::queueing::{Direct, PeerQueues};
use crate::socket_trait::impl_socket_trait;

/// ROUTER without outgoing queues.
#[derive(Clone)]
pub struct BasicRouterSocket {
    engine: Rc<Engine<Direct, MessageInbound>>,
}

impl BasicRouterSocket {
    pub fn new(reactor: Rc<dyn Reactor>) -> Self {
        Self::with_options(reactor, SocketOptions::default())
    }

    pub fn with_options(reactor: Rc<dyn Reactor>, options: SocketOptions) -> Self {
        Self {
            engine: Engine::new(
                SocketType::Router,
                options,
                reactor,
                Direct,
                MessageInbound::with_peer(),
            ),
        }
    }

    /// Handler for inbound messages, called with `[peer_identity, ...frames]`.
    pub fn on_message(&self, handler: impl Fn(Multipart) + 'static) {
        self.engine.inbound.on_message.set(Rc::new(handler));
    }

    /// Send `[peer_identity, ...frames]` to that peer if it is free.
    ///
    /// Returns `Ok(false)` when the peer is unknown, errored or busy.
    pub fn send_message(&self, message: Multipart) -> Result<bool> {
        let sent = self.engine.send(message)?;
        if !sent {
            trace!("[ROUTER] peer not writable");
        }
        Ok(sent)
    }

    /// Send to the named peer even if it is busy.
    pub fn send_message_even_if_busy(&self, message: Multipart) -> Result<bool> {
        self.engine.send_even_if_busy(message)
    }
}

impl_socket_trait!([] BasicRouterSocket, |socket, msg| socket.send_message(msg));

impl fmt::Debug for BasicRouterSocket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("BasicRouterSocket").field(&self.engine).finish()
    }
}

/// ROUTER with a queue per destination identity.
///
/// # Examples
///
/// ```
/// use std::rc::Rc;
/// use bytes::Bytes;
/// use zmq2_core::reactor::LocalReactor;
/// use zmq2_zmtp::{RouterSocket, Socket};
///
/// let reactor = Rc::new(LocalReactor::new());
/// let router = RouterSocket::new(reactor.clone());
/// let replier = router.clone();
/// router.on_message(move |msg| {
///     // Echo back to whoever sent it: msg[0] is their identity.
///     let _ = replier.send_message(msg);
/// });
/// router.bind("inproc://router-doc").unwrap();
/// ```
#[derive(Clone)]
pub struct RouterSocket {
    engine: Rc<Engine<PeerQueues, MessageInbound>>,
}

impl RouterSocket {
    pub fn new(reactor: Rc<dyn Reactor>) -> Self {
        Self::with_options(reactor, SocketOptions::default())
    }

    pub fn with_options(reactor: Rc<dyn Reactor>, options: SocketOptions) -> Self {
        Self {
            engine: Engine::new(
                SocketType::Router,
                options,
                reactor,
                PeerQueues::default(),
                MessageInbound::with_peer(),
            ),
        }
    }

    /// Handler for inbound messages, called with `[peer_identity, ...frames]`.
    pub fn on_message(&self, handler: impl Fn(Multipart) + 'static) {
        self.engine.inbound.on_message.set(Rc::new(handler));
    }

    /// Handler for queued messages that were dropped: evicted by the high
    /// water mark, or left behind by a peer with a generated identity.
    pub fn on_cancel(&self, handler: impl Fn(Multipart) + 'static) {
        self.engine.inbound.on_cancel.set(Rc::new(handler));
    }

    /// Send `[peer_identity, ...frames]` to that peer, or queue it.
    ///
    /// Returns `Ok(false)` when the peer's queue is full, or when the
    /// identity is a generated one with no connected peer.
    pub fn send_message(&self, message: Multipart) -> Result<bool> {
        let accepted = self.engine.send(message)?;
        if !accepted {
            trace!("[ROUTER] message refused");
        }
        Ok(accepted)
    }
}

impl_socket_trait!([] RouterSocket, |socket, msg| socket.send_message(msg));

impl fmt::Debug for RouterSocket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("RouterSocket").field(&self.engine).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dealer::DealerSocket;
    use crate::socket_trait::Socket;
    use bytes::Bytes;
    use std::cell::RefCell;
    use zmq2_core::reactor::LocalReactor;

    #[test]
    fn test_router_tags_inbound_with_identity() {
        let reactor = Rc::new(LocalReactor::new());
        let router = RouterSocket::new(reactor.clone());
        let received = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&received);
        router.on_message(move |m| sink.borrow_mut().push(m));
        router.bind("inproc://router-tag").unwrap();

        let options = SocketOptions::default().with_identity("worker-1");
        let dealer = DealerSocket::with_options(reactor.clone(), options);
        dealer.connect("inproc://router-tag").unwrap();
        dealer.send_message(vec![Bytes::from("job")]).unwrap();
        reactor.run_until_idle();

        assert_eq!(
            *received.borrow(),
            vec![vec![Bytes::from("worker-1"), Bytes::from("job")]]
        );
    }

    #[test]
    fn test_basic_router_sends_only_to_free_peers() {
        let reactor = Rc::new(LocalReactor::new());
        let options = SocketOptions::default().with_busy_threshold(1);
        let router = BasicRouterSocket::with_options(reactor.clone(), options);
        router.bind("inproc://basic-router").unwrap();

        let options = SocketOptions::default().with_identity("worker");
        let dealer = DealerSocket::with_options(reactor.clone(), options);
        let received = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&received);
        dealer.on_message(move |m| sink.borrow_mut().push(m));

        // Unknown identity: refused, nothing queued.
        let early = vec![Bytes::from("worker"), Bytes::from("early")];
        assert!(!router.send_message(early).unwrap());
        assert_eq!(router.queued(), 0);

        dealer.connect("inproc://basic-router").unwrap();
        reactor.run_until_idle();
        assert_eq!(router.free_peer_count(), 1);

        assert!(router
            .send_message(vec![Bytes::from("worker"), Bytes::from("1")])
            .unwrap());
        // One undelivered message makes the connection busy.
        assert!(!router
            .send_message(vec![Bytes::from("worker"), Bytes::from("2")])
            .unwrap());
        assert!(router
            .send_message_even_if_busy(vec![Bytes::from("worker"), Bytes::from("3")])
            .unwrap());
        reactor.run_until_idle();

        assert_eq!(
            *received.borrow(),
            vec![vec![Bytes::from("1")], vec![Bytes::from("3")]]
        );
    }

    #[test]
    fn test_router_refuses_unknown_generated_identity() {
        let reactor = Rc::new(LocalReactor::new());
        let router = RouterSocket::new(reactor.clone());
        let message = vec![Bytes::from("%GN%00000000000000ff"), Bytes::from("x")];
        assert!(!router.send_message(message).unwrap());
        assert_eq!(router.queued(), 0);

        // Named identities wait for their peer.
        assert!(router
            .send_message(vec![Bytes::from("later"), Bytes::from("x")])
            .unwrap());
        assert_eq!(router.queued(), 1);
    }
}
