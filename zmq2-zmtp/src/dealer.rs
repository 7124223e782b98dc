//! DEALER sockets.
//!
//! Both variants spread outbound messages round-robin over the peers that are
//! not busy, and deliver every inbound message as-is to the `on_message`
//! handler.
//!
//! - [`BasicDealerSocket`] has no queue of its own: when no peer can take a
//!   message right now, `send_message` returns `false` and the caller
//!   decides what to do.
//! - [`DealerSocket`] queues instead, bounded by the high water mark, and
//!   drains the queue whenever a peer frees up. It only refuses a message
//!   when the queue is full (`DropLast`); with `DropFirst` the oldest queued
//!   message is evicted and reported through `on_cancel`.

use std::collections::VecDeque;
use std::fmt;
use std::rc::Rc;
use tracing::trace;
use zmq2_core::error::Result;
use zmq2_core::options::SocketOptions;
use zmq2_core::reactor::Reactor;
use zmq2_core::socket_type::SocketType;

use crate::base::{Engine, MessageInbound};
use crate::codec::Multipart;
use crate::queueing::{SocketQueue, Unqueued};
use crate::socket_trait::impl_socket_trait;

/// DEALER without an outgoing queue.
///
/// # Examples
///
/// ```
/// use std::rc::Rc;
/// use bytes::Bytes;
/// use zmq2_core::reactor::LocalReactor;
/// use zmq2_zmtp::BasicDealerSocket;
///
/// let reactor = Rc::new(LocalReactor::new());
/// let dealer = BasicDealerSocket::new(reactor.clone());
/// dealer.on_message(|msg| println!("got {msg:?}"));
///
/// // Nobody connected yet: the message is refused, not queued.
/// assert!(!dealer.send_message(vec![Bytes::from("hello")]).unwrap());
/// ```
#[derive(Clone)]
pub struct BasicDealerSocket {
    engine: Rc<Engine<Unqueued, MessageInbound>>,
}

impl BasicDealerSocket {
    pub fn new(reactor: Rc<dyn Reactor>) -> Self {
        Self::with_options(reactor, SocketOptions::default())
    }

    pub fn with_options(reactor: Rc<dyn Reactor>, options: SocketOptions) -> Self {
        Self {
            engine: Engine::new(
                SocketType::Dealer,
                options,
                reactor,
                Unqueued,
                MessageInbound::default(),
            ),
        }
    }

    /// Handler for inbound messages. Replaces any previous handler.
    pub fn on_message(&self, handler: impl Fn(Multipart) + 'static) {
        self.engine.inbound.on_message.set(Rc::new(handler));
    }

    /// Send to the next peer that is not busy.
    ///
    /// Returns `Ok(false)` when every peer is busy or none is connected.
    pub fn send_message(&self, message: Multipart) -> Result<bool> {
        let sent = self.engine.send(message)?;
        if !sent {
            trace!("[DEALER] no free peer");
        }
        Ok(sent)
    }

    /// Send to the next connected peer, ignoring busyness.
    pub fn send_message_even_if_busy(&self, message: Multipart) -> Result<bool> {
        self.engine.send_even_if_busy(message)
    }
}

impl_socket_trait!([] BasicDealerSocket, |socket, msg| socket.send_message(msg));

impl fmt::Debug for BasicDealerSocket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("BasicDealerSocket").field(&self.engine).finish()
    }
}

/// DEALER with a socket-wide outgoing queue.
///
/// Queued messages always leave before newer ones, so the order of
/// `send_message` calls is the order peers see (per peer).
#[derive(Clone)]
pub struct DealerSocket {
    engine: Rc<Engine<SocketQueue<VecDeque<Multipart>>, MessageInbound>>,
}

impl DealerSocket {
    pub fn new(reactor: Rc<dyn Reactor>) -> Self {
        Self::with_options(reactor, SocketOptions::default())
    }

    pub fn with_options(reactor: Rc<dyn Reactor>, options: SocketOptions) -> Self {
        Self {
            engine: Engine::new(
                SocketType::Dealer,
                options,
                reactor,
                SocketQueue::new(VecDeque::new()),
                MessageInbound::default(),
            ),
        }
    }

    /// Handler for inbound messages. Replaces any previous handler.
    pub fn on_message(&self, handler: impl Fn(Multipart) + 'static) {
        self.engine.inbound.on_message.set(Rc::new(handler));
    }

    /// Handler for queued messages dropped by the high water mark.
    pub fn on_cancel(&self, handler: impl Fn(Multipart) + 'static) {
        self.engine.inbound.on_cancel.set(Rc::new(handler));
    }

    /// Send to the next free peer, or queue.
    ///
    /// Returns `Ok(false)` only when the message had to be dropped because
    /// the queue is at its high water mark.
    pub fn send_message(&self, message: Multipart) -> Result<bool> {
        let accepted = self.engine.send(message)?;
        if !accepted {
            trace!(hwm = self.engine.hwm(), "[DEALER] queue full, message dropped");
        }
        Ok(accepted)
    }

    /// Frames of the queued messages, oldest first.
    pub fn queued_messages(&self) -> Vec<Multipart> {
        self.engine
            .with_queue(|queue| queue.queue_mut().iter().cloned().collect())
    }
}

impl_socket_trait!([] DealerSocket, |socket, msg| socket.send_message(msg));

impl fmt::Debug for DealerSocket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("DealerSocket").field(&self.engine).finish()
    }
}
