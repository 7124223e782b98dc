//! Trait-based socket API for polymorphic socket handling.
//!
//! Every pattern socket implements [`Socket`], so code that only needs the
//! shared surface (binding, connecting, closing, queue limits, monitoring)
//! can work with any of them, e.g. a helper that wires a set of sockets
//! together or a test that drives each pattern the same way.

use bytes::Bytes;
use zmq2_core::error::Result;
use zmq2_core::monitor::SocketMonitor;
use zmq2_core::options::HwmStrategy;
use zmq2_core::socket_type::SocketType;

/// Surface shared by all socket patterns.
///
/// # Examples
///
/// ```
/// use std::rc::Rc;
/// use bytes::Bytes;
/// use zmq2_core::reactor::LocalReactor;
/// use zmq2_zmtp::{DealerSocket, RouterSocket, Socket};
///
/// fn wire(front: &dyn Socket, back: &dyn Socket, name: &str) -> zmq2_core::error::Result<()> {
///     back.bind(name)?;
///     front.connect(name)
/// }
///
/// let reactor = Rc::new(LocalReactor::new());
/// let router = RouterSocket::new(reactor.clone());
/// let dealer = DealerSocket::new(reactor.clone());
/// wire(&dealer, &router, "inproc://doc-wire").unwrap();
/// reactor.run_until_idle();
/// assert_eq!(router.peer_count(), 1);
/// assert!(dealer.send(vec![Bytes::from("hi")]).unwrap());
/// ```
pub trait Socket {
    /// ZeroMQ socket type.
    fn socket_type(&self) -> SocketType;

    /// Identity announced to peers; empty lets peers generate one.
    fn identity(&self) -> Bytes;

    /// Listen on `tcp://host:port`, `ipc://path` or `inproc://name`.
    fn bind(&self, addr: &str) -> Result<()>;

    /// Stop listening on an endpoint passed to `bind`. Established
    /// connections stay up.
    fn unbind(&self, addr: &str) -> Result<()>;

    /// Connect to an endpoint, reconnecting whenever the connection drops.
    fn connect(&self, addr: &str) -> Result<()>;

    /// Send a multipart message using the pattern's routing.
    ///
    /// # Returns
    ///
    /// - `Ok(true)` - message sent or queued
    /// - `Ok(false)` - refused (no free peer, or queue full)
    /// - `Err(ZmqError::Unsupported)` - the pattern has its own send API (REQ, REP) or
    ///   never sends (SUB)
    fn send(&self, msg: Vec<Bytes>) -> Result<bool>;

    /// Close immediately, discarding queued messages.
    fn close(&self);

    /// Flush queues, close connections once written, then call `on_closed`.
    fn close_after_writing(&self, on_closed: Box<dyn FnOnce()>);

    /// Whether `close` or `close_after_writing` has been called.
    fn is_closed(&self) -> bool;

    fn set_hwm(&self, hwm: usize);

    fn hwm(&self) -> usize;

    fn set_hwm_strategy(&self, strategy: HwmStrategy);

    /// Registered peers.
    fn peer_count(&self) -> usize;

    /// Registered peers currently believed able to take data.
    fn free_peer_count(&self) -> usize;

    /// Messages waiting in the socket's queues.
    fn queued(&self) -> usize;

    /// Subscribe to lifecycle events. Replaces any previous monitor.
    fn monitor(&self) -> SocketMonitor;
}

/// Implements [`Socket`] for a pattern socket holding its engine in an
/// `engine` field.
///
/// The bracketed list carries the impl generics; the closure-like tail maps
/// `Socket::send` onto the pattern.
///
/// ```ignore
/// impl_socket_trait!([] DealerSocket, |socket, msg| socket.send_message(msg));
/// impl_socket_trait!([T: 'static] ReqSocket<T>, |socket, _msg| Err(socket.engine.unsupported("send")));
/// ```
macro_rules! impl_socket_trait {
    ([$($generics:tt)*] $socket:ty, |$this:ident, $msg:ident| $send:expr) => {
        impl<$($generics)*> $crate::socket_trait::Socket for $socket {
            fn socket_type(&self) -> zmq2_core::socket_type::SocketType {
                self.engine.socket_type()
            }

            fn identity(&self) -> bytes::Bytes {
                $crate::connection::SocketEvents::identity(&*self.engine)
            }

            fn bind(&self, addr: &str) -> zmq2_core::error::Result<()> {
                self.engine.bind(addr)
            }

            fn unbind(&self, addr: &str) -> zmq2_core::error::Result<()> {
                self.engine.unbind(addr)
            }

            fn connect(&self, addr: &str) -> zmq2_core::error::Result<()> {
                self.engine.connect(addr)
            }

            fn send(&self, $msg: Vec<bytes::Bytes>) -> zmq2_core::error::Result<bool> {
                let $this = self;
                $send
            }

            fn close(&self) {
                self.engine.close();
            }

            fn close_after_writing(&self, on_closed: Box<dyn FnOnce()>) {
                self.engine.close_after_writing(on_closed);
            }

            fn is_closed(&self) -> bool {
                self.engine.is_closed()
            }

            fn set_hwm(&self, hwm: usize) {
                self.engine.set_hwm(hwm);
            }

            fn hwm(&self) -> usize {
                self.engine.hwm()
            }

            fn set_hwm_strategy(&self, strategy: zmq2_core::options::HwmStrategy) {
                self.engine.set_hwm_strategy(strategy);
            }

            fn peer_count(&self) -> usize {
                self.engine.peer_count()
            }

            fn free_peer_count(&self) -> usize {
                self.engine.free_peer_count()
            }

            fn queued(&self) -> usize {
                self.engine.queued()
            }

            fn monitor(&self) -> zmq2_core::monitor::SocketMonitor {
                self.engine.monitor()
            }
        }
    };
}

pub(crate) use impl_socket_trait;
