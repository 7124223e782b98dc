//! REP sockets.
//!
//! A ROUTER that speaks envelopes: each request is split at its first empty
//! frame into the routing envelope (starting with the sender's identity) and
//! the body. The application answers with `send_reply`, passing the envelope
//! back so the reply retraces the request's route. Requests are not
//! serialised; replies may be sent in any order, or not at all.
//!
//! [`BasicRepSocket`] refuses a reply whose requester is busy or gone;
//! [`RepSocket`] queues it per requester instead.

use bytes::Bytes;
use std::fmt;
use std::rc::Rc;
use tracing::trace;
use zmq2_core::error::{Result, ZmqError};
use zmq2_core::options::SocketOptions;
use zmq2_core::reactor::Reactor;
use zmq2_core::socket_type::SocketType;
use zmq2_core::EMPTY;

use crate::base::{Callback, Engine, Inbound, MessageHandler};
use crate::codec::{split_envelope, Multipart};
use crate::queueing::{Direct, PeerQueues};
use crate::socket_trait::impl_socket_trait;

type RequestHandler = dyn Fn(Multipart, Multipart);

#[derive(Default)]
pub(crate) struct RepInbound {
    on_request: Callback<RequestHandler>,
    on_cancel: Callback<MessageHandler>,
}

impl Inbound for RepInbound {
    fn receive(&self, mut message: Multipart, peer: &Bytes) {
        message.insert(0, peer.clone());
        let Some((envelope, body)) = split_envelope(message) else {
            trace!("[REP] request without delimiter dropped");
            return;
        };
        match self.on_request.get() {
            Some(handler) => handler(body, envelope),
            None => trace!("[REP] no request handler, dropping request"),
        }
    }

    fn cancelled(&self, message: Multipart) {
        if let Some(handler) = self.on_cancel.get() {
            handler(message);
        }
    }

    fn release(&self) {
        self.on_request.clear();
        self.on_cancel.clear();
    }
}

/// `[...envelope, EMPTY, ...body]`, the wire form of a reply.
fn reply_message(body: Multipart, envelope: &[Bytes]) -> Result<Multipart> {
    if envelope.is_empty() {
        return Err(ZmqError::invalid_message("reply envelope is empty"));
    }
    let mut reply = Vec::with_capacity(envelope.len() + 1 + body.len());
    reply.extend_from_slice(envelope);
    reply.push(EMPTY);
    reply.extend(body);
    Ok(reply)
}

/// REP without outgoing queues.
#[derive(Clone)]
pub struct BasicRepSocket {
    engine: Rc<Engine<Direct, RepInbound>>,
}

impl BasicRepSocket {
    pub fn new(reactor: Rc<dyn Reactor>) -> Self {
        Self::with_options(reactor, SocketOptions::default())
    }

    pub fn with_options(reactor: Rc<dyn Reactor>, options: SocketOptions) -> Self {
        Self {
            engine: Engine::new(
                SocketType::Rep,
                options,
                reactor,
                Direct,
                RepInbound::default(),
            ),
        }
    }

    /// Handler for requests: `(body, envelope)`. Keep the envelope to reply.
    pub fn on_request(&self, handler: impl Fn(Multipart, Multipart) + 'static) {
        self.engine.inbound.on_request.set(Rc::new(handler));
    }

    /// Send the reply if the requester is connected and not busy.
    pub fn send_reply(&self, body: Multipart, envelope: &[Bytes]) -> Result<bool> {
        self.engine.send(reply_message(body, envelope)?)
    }

    /// Send the reply to a connected requester even if it is busy.
    pub fn send_reply_even_if_busy(&self, body: Multipart, envelope: &[Bytes]) -> Result<bool> {
        self.engine.send_even_if_busy(reply_message(body, envelope)?)
    }
}

impl_socket_trait!([] BasicRepSocket, |socket, _msg| Err(socket.engine.unsupported("send")));

impl fmt::Debug for BasicRepSocket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("BasicRepSocket").field(&self.engine).finish()
    }
}

/// REP with a reply queue per requester.
#[derive(Clone)]
pub struct RepSocket {
    engine: Rc<Engine<PeerQueues, RepInbound>>,
}

impl RepSocket {
    pub fn new(reactor: Rc<dyn Reactor>) -> Self {
        Self::with_options(reactor, SocketOptions::default())
    }

    pub fn with_options(reactor: Rc<dyn Reactor>, options: SocketOptions) -> Self {
        Self {
            engine: Engine::new(
                SocketType::Rep,
                options,
                reactor,
                PeerQueues::default(),
                RepInbound::default(),
            ),
        }
    }

    /// Handler for requests: `(body, envelope)`. Keep the envelope to reply.
    pub fn on_request(&self, handler: impl Fn(Multipart, Multipart) + 'static) {
        self.engine.inbound.on_request.set(Rc::new(handler));
    }

    /// Handler for queued replies that were dropped, as
    /// `[...envelope, EMPTY, ...body]`.
    pub fn on_cancel(&self, handler: impl Fn(Multipart) + 'static) {
        self.engine.inbound.on_cancel.set(Rc::new(handler));
    }

    /// Send `[...envelope, EMPTY, ...body]` back along the envelope's route.
    ///
    /// Returns `Ok(false)` when the requester's queue is full or it has gone
    /// away under a generated identity.
    pub fn send_reply(&self, body: Multipart, envelope: &[Bytes]) -> Result<bool> {
        self.engine.send(reply_message(body, envelope)?)
    }
}

impl_socket_trait!([] RepSocket, |socket, _msg| Err(socket.engine.unsupported("send")));

impl fmt::Debug for RepSocket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("RepSocket").field(&self.engine).finish()
    }
}
