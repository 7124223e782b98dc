//! PUB socket.
//!
//! Every message goes to every registered peer; filtering happens on the
//! subscriber side. A message is encoded once per send and the same bytes
//! are handed to each stream connection.
//!
//! A peer that is busy gets the message queued instead, bounded per peer by
//! the high water mark, and its queue drains as it frees up. Messages from
//! peers are ignored.

use std::fmt;
use std::rc::Rc;
use tracing::trace;
use zmq2_core::error::Result;
use zmq2_core::options::SocketOptions;
use zmq2_core::reactor::Reactor;
use zmq2_core::socket_type::SocketType;

use crate::base::{Engine, MessageInbound};
use crate::codec::Multipart;
use crate::queueing::Broadcast;
use crate::socket_trait::impl_socket_trait;

/// PUB socket.
///
/// # Examples
///
/// ```
/// use std::rc::Rc;
/// use bytes::Bytes;
/// use zmq2_core::reactor::LocalReactor;
/// use zmq2_zmtp::{PubSocket, Socket};
///
/// let reactor = Rc::new(LocalReactor::new());
/// let publisher = PubSocket::new(reactor.clone());
/// publisher.bind("inproc://pub-doc").unwrap();
///
/// // No subscribers: accepted and dropped.
/// assert!(publisher.send_message(vec![Bytes::from("weather"), Bytes::from("sunny")]).unwrap());
/// ```
#[derive(Clone)]
pub struct PubSocket {
    engine: Rc<Engine<Broadcast, MessageInbound>>,
}

impl PubSocket {
    pub fn new(reactor: Rc<dyn Reactor>) -> Self {
        Self::with_options(reactor, SocketOptions::default())
    }

    pub fn with_options(reactor: Rc<dyn Reactor>, options: SocketOptions) -> Self {
        Self {
            engine: Engine::new(
                SocketType::Pub,
                options,
                reactor,
                Broadcast::default(),
                MessageInbound::default(),
            ),
        }
    }

    /// Handler for messages dropped from a peer's queue by the high water
    /// mark, or left queued for a peer that disconnected.
    pub fn on_cancel(&self, handler: impl Fn(Multipart) + 'static) {
        self.engine.inbound.on_cancel.set(Rc::new(handler));
    }

    /// Publish to every peer.
    ///
    /// Returns `Ok(false)` only when there are peers and every one of them
    /// refused the message (all queues full).
    pub fn send_message(&self, message: Multipart) -> Result<bool> {
        let accepted = self.engine.send(message)?;
        if !accepted {
            trace!("[PUB] every peer queue full, message dropped");
        }
        Ok(accepted)
    }
}

impl_socket_trait!([] PubSocket, |socket, msg| socket.send_message(msg));

impl fmt::Debug for PubSocket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("PubSocket").field(&self.engine).finish()
    }
}
