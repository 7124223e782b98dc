//! Socket base shared by every pattern.
//!
//! An [`Engine`] owns the state common to all sockets ([`SocketCore`]: peers,
//! bindings, connects and reconnects, close progress), the pattern's
//! [`QueueingStrategy`] for outbound messages and its [`Inbound`] handler for
//! received ones. Pattern sockets are thin handles around an `Rc<Engine>`.
//!
//! Connections report back through [`SocketEvents`], implemented here.
//! Nothing in this module holds a `RefCell` borrow while calling into an
//! application callback or a connection method that may call back.

use bytes::Bytes;
use compio::io::{AsyncRead, AsyncWrite};
use compio::runtime::Task;
use hashbrown::HashMap;
use std::cell::RefCell;
use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::rc::{Rc, Weak};
use std::time::Duration;
use tracing::{debug, trace, warn};
use zmq2_core::endpoint::Endpoint;
use zmq2_core::error::{Result, ZmqError};
use zmq2_core::identity::IdentityGenerator;
use zmq2_core::monitor::{create_monitor, SocketEvent, SocketEventSender, SocketMonitor};
use zmq2_core::options::{HwmStrategy, SocketOptions};
use zmq2_core::reactor::{Reactor, TimerId};
use zmq2_core::reconnect::ReconnectState;
use zmq2_core::socket_type::SocketType;
use zmq2_core::tcp;

use crate::codec::Multipart;
use crate::connection::{
    next_connection_id, ConnectionId, PeerConnection, SocketEvents, StreamConfig,
};
use crate::inproc;
use crate::queueing::{PeerTable, QueueLimits, QueueingStrategy};
use crate::stream::StreamConnection;

/// Pause after a failed `accept` before trying again.
const ACCEPT_RETRY: Duration = Duration::from_millis(100);

/// Slot for an application callback.
///
/// The callback is cloned out before it runs, so it may replace itself or
/// call back into the socket.
pub(crate) struct Callback<F: ?Sized> {
    slot: RefCell<Option<Rc<F>>>,
}

impl<F: ?Sized> Default for Callback<F> {
    fn default() -> Self {
        Self {
            slot: RefCell::new(None),
        }
    }
}

impl<F: ?Sized> Callback<F> {
    pub(crate) fn set(&self, callback: Rc<F>) {
        *self.slot.borrow_mut() = Some(callback);
    }

    pub(crate) fn get(&self) -> Option<Rc<F>> {
        self.slot.borrow().clone()
    }

    pub(crate) fn clear(&self) {
        self.slot.borrow_mut().take();
    }
}

/// Pattern-specific handling of received and cancelled messages.
pub(crate) trait Inbound {
    /// A message arrived from the peer registered as `peer`.
    fn receive(&self, message: Multipart, peer: &Bytes);

    /// A queued outbound message was evicted by the high water mark or
    /// dropped with its peer.
    fn cancelled(&self, _message: Multipart) {}

    /// Drop application callbacks; called once the socket has closed.
    fn release(&self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lifecycle {
    Open,
    /// Waiting for connections to finish.
    Closing,
    Closed,
}

struct Binding {
    endpoint: Endpoint,
    /// Accept loop; inproc bindings have none.
    listener: Option<Task<()>>,
}

/// A connect-initiated connection, or an attempt at one.
struct Dial {
    endpoint: Endpoint,
    opened: bool,
}

/// State shared by every socket pattern.
pub(crate) struct SocketCore {
    options: SocketOptions,
    reactor: Rc<dyn Reactor>,
    peers: PeerTable,
    identities: IdentityGenerator,
    bindings: Vec<Binding>,
    dials: HashMap<ConnectionId, Dial>,
    /// Connected (or dialing) endpoint to its connection.
    endpoints: HashMap<Endpoint, ConnectionId>,
    dial_tasks: HashMap<ConnectionId, Task<()>>,
    reconnect_timers: HashMap<Endpoint, TimerId>,
    backoff: HashMap<Endpoint, ReconnectState>,
    live: HashMap<ConnectionId, Rc<dyn PeerConnection>>,
    monitor: Option<SocketEventSender>,
    on_closed: Option<Box<dyn FnOnce()>>,
    linger_timer: Option<TimerId>,
    lifecycle: Lifecycle,
}

impl SocketCore {
    fn new(options: SocketOptions, reactor: Rc<dyn Reactor>) -> Self {
        Self {
            options,
            reactor,
            peers: PeerTable::default(),
            identities: IdentityGenerator::new(),
            bindings: Vec::new(),
            dials: HashMap::new(),
            endpoints: HashMap::new(),
            dial_tasks: HashMap::new(),
            reconnect_timers: HashMap::new(),
            backoff: HashMap::new(),
            live: HashMap::new(),
            monitor: None,
            on_closed: None,
            linger_timer: None,
            lifecycle: Lifecycle::Open,
        }
    }

    fn limits(&self) -> QueueLimits {
        QueueLimits {
            hwm: self.options.hwm,
            strategy: self.options.hwm_strategy,
        }
    }

    fn emit(&mut self, event: SocketEvent) {
        if let Some(monitor) = &self.monitor {
            if monitor.send(event).is_err() {
                self.monitor = None;
            }
        }
    }

    fn ensure_open(&self) -> Result<()> {
        match self.lifecycle {
            Lifecycle::Open => Ok(()),
            _ => Err(ZmqError::SocketClosed),
        }
    }

    /// Stop every listener and return the inproc names to release.
    fn drop_bindings(&mut self) -> Vec<String> {
        let mut names = Vec::new();
        for binding in self.bindings.drain(..) {
            drop(binding.listener);
            match binding.endpoint {
                Endpoint::Inproc(name) => names.push(name),
                #[cfg(unix)]
                Endpoint::Ipc(path) => {
                    let _ = std::fs::remove_file(path);
                }
                Endpoint::Tcp(_) => {}
            }
        }
        names
    }

    fn cancel_timers(&mut self) {
        for (_, timer) in self.reconnect_timers.drain() {
            self.reactor.cancel_timer(timer);
        }
        if let Some(timer) = self.linger_timer.take() {
            self.reactor.cancel_timer(timer);
        }
    }
}

/// A socket: shared core, outbound strategy `Q`, inbound handler `R`.
pub(crate) struct Engine<Q, R> {
    socket_type: SocketType,
    core: RefCell<SocketCore>,
    queue: RefCell<Q>,
    pub(crate) inbound: R,
    this: Weak<Self>,
}

impl<Q, R> Engine<Q, R>
where
    Q: QueueingStrategy + 'static,
    R: Inbound + 'static,
{
    pub(crate) fn new(
        socket_type: SocketType,
        options: SocketOptions,
        reactor: Rc<dyn Reactor>,
        queue: Q,
        inbound: R,
    ) -> Rc<Self> {
        debug!(socket_type = %socket_type, "[SocketBase] created");
        Rc::new_cyclic(|this| Self {
            socket_type,
            core: RefCell::new(SocketCore::new(options, reactor)),
            queue: RefCell::new(queue),
            inbound,
            this: this.clone(),
        })
    }

    fn events(&self) -> Result<Rc<dyn SocketEvents>> {
        self.this
            .upgrade()
            .map(|engine| engine as Rc<dyn SocketEvents>)
            .ok_or(ZmqError::SocketClosed)
    }

    pub(crate) fn socket_type(&self) -> SocketType {
        self.socket_type
    }

    pub(crate) fn unsupported(&self, operation: &'static str) -> ZmqError {
        ZmqError::unsupported(self.socket_type.as_str(), operation)
    }

    /// Fresh id from the socket's generated-identity namespace.
    pub(crate) fn next_identity(&self) -> Bytes {
        self.core.borrow_mut().identities.next_identity()
    }

    pub(crate) fn with_queue<T>(&self, f: impl FnOnce(&mut Q) -> T) -> T {
        f(&mut self.queue.borrow_mut())
    }

    pub(crate) fn hwm(&self) -> usize {
        self.core.borrow().options.hwm
    }

    /// Change the high water mark. Lowering it trims every queue right away;
    /// trimmed messages are reported as cancelled.
    pub(crate) fn set_hwm(&self, hwm: usize) {
        let mut evicted = Vec::new();
        {
            let mut core = self.core.borrow_mut();
            let previous = std::mem::replace(&mut core.options.hwm, hwm);
            if hwm < previous {
                let limits = core.limits();
                self.queue.borrow_mut().apply_hwm(limits, &mut evicted);
            }
        }
        self.report_cancelled(evicted);
    }

    pub(crate) fn set_hwm_strategy(&self, strategy: HwmStrategy) {
        self.core.borrow_mut().options.hwm_strategy = strategy;
    }

    pub(crate) fn peer_count(&self) -> usize {
        self.core.borrow().peers.all.len()
    }

    pub(crate) fn free_peer_count(&self) -> usize {
        self.core.borrow().peers.free.len()
    }

    pub(crate) fn queued(&self) -> usize {
        self.queue.borrow().queued()
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.core.borrow().lifecycle != Lifecycle::Open
    }

    /// Start receiving lifecycle events. Replaces any earlier monitor.
    pub(crate) fn monitor(&self) -> SocketMonitor {
        let (sender, receiver) = create_monitor();
        self.core.borrow_mut().monitor = Some(sender);
        receiver
    }

    /// Listen on `addr`. Binding the same endpoint twice is a no-op.
    ///
    /// TCP and IPC listeners start on the compio runtime; failures to listen
    /// are reported through the monitor as `BindFailed`.
    pub(crate) fn bind(&self, addr: &str) -> Result<()> {
        let endpoint = Endpoint::parse(addr)?;
        {
            let core = self.core.borrow();
            core.ensure_open()?;
            if core.bindings.iter().any(|b| b.endpoint == endpoint) {
                return Ok(());
            }
        }

        let listener = match &endpoint {
            Endpoint::Inproc(name) => {
                inproc::bind(name, &self.events()?)?;
                None
            }
            Endpoint::Tcp(addr) => Some(compio::runtime::spawn(listen_tcp(
                self.this.clone(),
                *addr,
            ))),
            #[cfg(unix)]
            Endpoint::Ipc(path) => Some(compio::runtime::spawn(listen_ipc(
                self.this.clone(),
                path.clone(),
            ))),
        };

        debug!(socket_type = %self.socket_type, endpoint = %endpoint, "[SocketBase] bind");
        let mut core = self.core.borrow_mut();
        if endpoint.is_inproc() {
            core.emit(SocketEvent::Bound(endpoint.clone()));
        }
        core.bindings.push(Binding { endpoint, listener });
        Ok(())
    }

    /// Stop listening on `addr`. Established connections stay up.
    pub(crate) fn unbind(&self, addr: &str) -> Result<()> {
        let endpoint = Endpoint::parse(addr)?;
        let binding = {
            let mut core = self.core.borrow_mut();
            let index = core
                .bindings
                .iter()
                .position(|b| b.endpoint == endpoint)
                .ok_or_else(|| ZmqError::NotBound(addr.to_string()))?;
            core.bindings.remove(index)
        };
        drop(binding.listener);
        match binding.endpoint {
            Endpoint::Inproc(name) => inproc::unbind(&name, &self.events()?)?,
            #[cfg(unix)]
            Endpoint::Ipc(path) => {
                let _ = std::fs::remove_file(path);
            }
            Endpoint::Tcp(_) => {}
        }
        debug!(socket_type = %self.socket_type, endpoint = %endpoint, "[SocketBase] unbind");
        Ok(())
    }

    /// Connect to `addr`, re-dialing whenever the connection drops until the
    /// socket closes. Connecting to an endpoint already connected (or
    /// waiting to reconnect) is a no-op.
    pub(crate) fn connect(&self, addr: &str) -> Result<()> {
        let endpoint = Endpoint::parse(addr)?;
        {
            let core = self.core.borrow();
            core.ensure_open()?;
            if core.endpoints.contains_key(&endpoint)
                || core.reconnect_timers.contains_key(&endpoint)
            {
                return Ok(());
            }
        }
        debug!(socket_type = %self.socket_type, endpoint = %endpoint, "[SocketBase] connect");
        self.dial(endpoint)
    }

    fn dial(&self, endpoint: Endpoint) -> Result<()> {
        match endpoint {
            Endpoint::Inproc(name) => {
                inproc::connect(&name, &self.events()?);
            }
            Endpoint::Tcp(addr) => {
                let id = next_connection_id();
                let nodelay = self.core.borrow().options.tcp_nodelay;
                let task = compio::runtime::spawn(dial_tcp(self.this.clone(), id, addr, nodelay));
                self.track_dial(id, Endpoint::Tcp(addr), task);
            }
            #[cfg(unix)]
            Endpoint::Ipc(path) => {
                let id = next_connection_id();
                let task = compio::runtime::spawn(dial_ipc(self.this.clone(), id, path.clone()));
                self.track_dial(id, Endpoint::Ipc(path), task);
            }
        }
        Ok(())
    }

    fn track_dial(&self, id: ConnectionId, endpoint: Endpoint, task: Task<()>) {
        let mut core = self.core.borrow_mut();
        core.endpoints.insert(endpoint.clone(), id);
        core.dials.insert(
            id,
            Dial {
                endpoint,
                opened: false,
            },
        );
        core.dial_tasks.insert(id, task);
    }

    /// A stream was accepted by one of the listeners.
    fn accepted<S>(&self, stream: S)
    where
        S: 'static,
        for<'a> &'a S: AsyncRead + AsyncWrite,
    {
        let Ok(events) = self.events() else {
            return;
        };
        let connection = StreamConnection::start(next_connection_id(), stream, &events, None);
        self.connection_opened(connection, None);
    }

    /// An outgoing stream connection succeeded.
    fn dialed<S>(&self, id: ConnectionId, stream: S, endpoint: Endpoint)
    where
        S: 'static,
        for<'a> &'a S: AsyncRead + AsyncWrite,
    {
        if let Some(task) = self.core.borrow_mut().dial_tasks.remove(&id) {
            task.detach();
        }
        let Ok(events) = self.events() else {
            return;
        };
        let connection = StreamConnection::start(id, stream, &events, Some(endpoint.clone()));
        self.connection_opened(connection, Some(endpoint));
    }

    fn dial_failed(&self, id: ConnectionId, err: &io::Error) {
        {
            let mut guard = self.core.borrow_mut();
            let core = &mut *guard;
            if let Some(task) = core.dial_tasks.remove(&id) {
                task.detach();
            }
            if let Some(dial) = core.dials.get(&id) {
                debug!(endpoint = %dial.endpoint, error = %err, "[SocketBase] connect failed");
                let event = SocketEvent::ConnectFailed {
                    endpoint: dial.endpoint.clone(),
                    reason: err.to_string(),
                };
                core.emit(event);
            }
        }
        self.not_connected(id);
    }

    fn listening(&self, endpoint: &Endpoint) {
        debug!(socket_type = %self.socket_type, endpoint = %endpoint, "[SocketBase] listening");
        self.core
            .borrow_mut()
            .emit(SocketEvent::Bound(endpoint.clone()));
    }

    fn listen_failed(&self, endpoint: &Endpoint, err: &io::Error) {
        warn!(socket_type = %self.socket_type, endpoint = %endpoint, error = %err, "[SocketBase] bind failed");
        let mut core = self.core.borrow_mut();
        if let Some(index) = core.bindings.iter().position(|b| b.endpoint == *endpoint) {
            // The failing listener task is the caller.
            if let Some(task) = core.bindings.remove(index).listener {
                task.detach();
            }
        }
        core.emit(SocketEvent::BindFailed {
            endpoint: endpoint.clone(),
            reason: err.to_string(),
        });
    }

    fn schedule_reconnect(&self, core: &mut SocketCore, endpoint: Endpoint) {
        let fresh = ReconnectState::new(&core.options);
        let delay = core
            .backoff
            .entry(endpoint.clone())
            .or_insert(fresh)
            .next_delay();

        let this = self.this.clone();
        let target = endpoint.clone();
        let timer = core.reactor.add_timer(
            delay,
            Box::new(move || {
                if let Some(engine) = this.upgrade() {
                    engine.reconnect(target);
                }
            }),
        );
        core.reconnect_timers.insert(endpoint.clone(), timer);
        debug!(endpoint = %endpoint, ?delay, "[SocketBase] reconnect scheduled");
        core.emit(SocketEvent::ReconnectScheduled { endpoint, delay });
    }

    /// Send through the pattern's strategy.
    pub(crate) fn send(&self, message: Multipart) -> Result<bool> {
        self.route(message, false)
    }

    pub(crate) fn send_even_if_busy(&self, message: Multipart) -> Result<bool> {
        self.route(message, true)
    }

    fn route(&self, message: Multipart, even_if_busy: bool) -> Result<bool> {
        if message.is_empty() {
            return Err(ZmqError::invalid_message("message has no frames"));
        }
        let mut evicted = Vec::new();
        let accepted = {
            let mut guard = self.core.borrow_mut();
            let core = &mut *guard;
            core.ensure_open()?;
            let limits = core.limits();
            let mut queue = self.queue.borrow_mut();
            if even_if_busy {
                queue.send_even_if_busy(&mut core.peers, limits, message, &mut evicted)
            } else {
                queue.send(&mut core.peers, limits, message, &mut evicted)
            }
        };
        if !accepted {
            trace!(socket_type = %self.socket_type, "[SocketBase] message not accepted");
        }
        self.report_cancelled(evicted);
        Ok(accepted)
    }

    fn report_cancelled(&self, evicted: Vec<Multipart>) {
        for message in evicted {
            self.inbound.cancelled(message);
        }
    }

    /// Close now: queued messages are discarded and every connection is
    /// closed without flushing.
    pub(crate) fn close(&self) {
        self.shutdown(false, None);
    }

    /// Flush every queue into its connection, close the connections after
    /// their data is written, then run `on_closed` on the next tick.
    ///
    /// If `linger` is set and expires first, the remaining connections are
    /// aborted.
    pub(crate) fn close_after_writing(&self, on_closed: Box<dyn FnOnce()>) {
        self.shutdown(true, Some(on_closed));
    }

    fn shutdown(&self, after_writing: bool, on_closed: Option<Box<dyn FnOnce()>>) {
        let (connections, names) = {
            let mut guard = self.core.borrow_mut();
            let core = &mut *guard;
            let lifecycle = core.lifecycle;
            match lifecycle {
                Lifecycle::Open => {}
                Lifecycle::Closing if !after_writing => {
                    // A plain close overrides a pending close-after-writing.
                    let connections: Vec<_> = core.live.values().cloned().collect();
                    drop(guard);
                    for connection in connections {
                        connection.abort();
                    }
                    self.finish_close();
                    return;
                }
                _ => {
                    if let Some(callback) = on_closed {
                        core.reactor.next_tick(callback);
                    }
                    return;
                }
            }

            core.lifecycle = Lifecycle::Closing;
            core.cancel_timers();
            core.dial_tasks.clear();
            let names = core.drop_bindings();

            let mut queue = self.queue.borrow_mut();
            if after_writing {
                queue.flush_all(&mut core.peers);
            } else {
                queue.clear();
            }
            drop(queue);

            core.on_closed = on_closed;
            if after_writing {
                if let Some(linger) = core.options.linger {
                    let this = self.this.clone();
                    let timer = core.reactor.add_timer(
                        linger,
                        Box::new(move || {
                            if let Some(engine) = this.upgrade() {
                                engine.linger_expired();
                            }
                        }),
                    );
                    core.linger_timer = Some(timer);
                }
            }
            let connections: Vec<_> = core.live.values().cloned().collect();
            (connections, names)
        };

        debug!(
            socket_type = %self.socket_type,
            after_writing,
            connections = connections.len(),
            "[SocketBase] closing"
        );
        if let Ok(events) = self.events() {
            for name in names {
                let _ = inproc::unbind(&name, &events);
            }
        }
        for connection in connections {
            connection.close(after_writing);
        }
        if self.core.borrow().live.is_empty() {
            self.finish_close();
        }
    }

    fn linger_expired(&self) {
        let connections: Vec<_> = {
            let mut core = self.core.borrow_mut();
            core.linger_timer = None;
            if core.lifecycle != Lifecycle::Closing {
                return;
            }
            core.live.values().cloned().collect()
        };
        debug!(
            socket_type = %self.socket_type,
            remaining = connections.len(),
            "[SocketBase] linger expired, aborting connections"
        );
        for connection in connections {
            connection.abort();
        }
        self.finish_close();
    }

    fn finish_close(&self) {
        let (callback, reactor) = {
            let mut guard = self.core.borrow_mut();
            let core = &mut *guard;
            if core.lifecycle == Lifecycle::Closed {
                return;
            }
            core.lifecycle = Lifecycle::Closed;
            core.cancel_timers();
            core.live.clear();
            core.peers.all.clear();
            core.peers.free.clear();
            core.emit(SocketEvent::Closed);
            core.monitor = None;
            (core.on_closed.take(), Rc::clone(&core.reactor))
        };
        debug!(socket_type = %self.socket_type, "[SocketBase] closed");
        self.inbound.release();
        if let Some(callback) = callback {
            reactor.next_tick(callback);
        }
    }
}

impl<Q, R> SocketEvents for Engine<Q, R>
where
    Q: QueueingStrategy + 'static,
    R: Inbound + 'static,
{
    fn identity(&self) -> Bytes {
        self.core.borrow().options.identity.clone()
    }

    fn reactor(&self) -> Rc<dyn Reactor> {
        Rc::clone(&self.core.borrow().reactor)
    }

    fn stream_config(&self) -> StreamConfig {
        let core = self.core.borrow();
        StreamConfig {
            busy_threshold: core.options.busy_threshold,
            read_buffer_size: core.options.read_buffer_size,
            max_frame_size: core.options.max_frame_size,
            tcp_nodelay: core.options.tcp_nodelay,
        }
    }

    fn register_peer(&self, identity: Bytes, connection: Rc<dyn PeerConnection>) -> Bytes {
        let id = connection.id();
        let (identity, reactor) = {
            let mut guard = self.core.borrow_mut();
            let core = &mut *guard;
            let identity = if identity.is_empty() {
                core.identities.next_identity()
            } else {
                identity
            };
            core.peers.free.remove(&identity);
            if let Some(previous) = core.peers.all.insert(identity.clone(), connection) {
                if previous.id() != id {
                    debug!(
                        identity = %String::from_utf8_lossy(&identity),
                        "[SocketBase] identity re-registered by a new connection"
                    );
                }
            }
            core.emit(SocketEvent::PeerRegistered(identity.clone()));
            (identity, Rc::clone(&core.reactor))
        };
        self.queue.borrow_mut().peer_registered(&identity);

        let this = self.this.clone();
        let free = identity.clone();
        reactor.next_tick(Box::new(move || {
            if let Some(engine) = this.upgrade() {
                engine.peer_free(&free, id);
            }
        }));
        identity
    }

    fn unregister_peer(&self, identity: &Bytes, connection: ConnectionId) {
        {
            let mut core = self.core.borrow_mut();
            if !core.peers.owned_by(identity, connection) {
                trace!(connection, "[SocketBase] stale unregister ignored");
                return;
            }
            core.peers.all.remove(identity);
            core.peers.free.remove(identity);
            core.emit(SocketEvent::PeerUnregistered(identity.clone()));
        }
        let mut evicted = Vec::new();
        self.queue
            .borrow_mut()
            .peer_unregistered(identity, &mut evicted);
        self.report_cancelled(evicted);
    }

    fn receive_message_and_peer(&self, message: Multipart, identity: &Bytes) {
        if self.core.borrow().lifecycle == Lifecycle::Closed {
            trace!(socket_type = %self.socket_type, "[SocketBase] dropping message after close");
            return;
        }
        self.inbound.receive(message, identity);
    }

    fn peer_free(&self, identity: &Bytes, connection: ConnectionId) {
        let mut guard = self.core.borrow_mut();
        let core = &mut *guard;
        if core.lifecycle == Lifecycle::Closed || !core.peers.owned_by(identity, connection) {
            return;
        }
        if !core.peers.free.contains_key(identity) {
            if let Some(peer) = core.peers.get(identity).cloned() {
                core.peers.free.insert(identity.clone(), peer);
            }
        }
        self.queue
            .borrow_mut()
            .peer_free(&mut core.peers, identity);
    }

    fn connection_opened(&self, connection: Rc<dyn PeerConnection>, endpoint: Option<Endpoint>) {
        let id = connection.id();
        let refused = {
            let mut guard = self.core.borrow_mut();
            let core = &mut *guard;
            if core.lifecycle == Lifecycle::Open {
                core.live.insert(id, Rc::clone(&connection));
                if let Some(endpoint) = endpoint {
                    if let Some(backoff) = core.backoff.get_mut(&endpoint) {
                        backoff.reset();
                    }
                    core.endpoints.insert(endpoint.clone(), id);
                    core.dials.insert(
                        id,
                        Dial {
                            endpoint: endpoint.clone(),
                            opened: true,
                        },
                    );
                    core.emit(SocketEvent::Connected(endpoint));
                }
                false
            } else {
                true
            }
        };
        if refused {
            trace!(connection = id, "[SocketBase] refusing connection on closed socket");
            connection.abort();
        }
    }

    fn not_connected(&self, connection: ConnectionId) {
        let finished = {
            let mut guard = self.core.borrow_mut();
            let core = &mut *guard;
            core.live.remove(&connection);
            if let Some(task) = core.dial_tasks.remove(&connection) {
                task.detach();
            }
            if let Some(dial) = core.dials.remove(&connection) {
                if core.endpoints.get(&dial.endpoint) == Some(&connection) {
                    core.endpoints.remove(&dial.endpoint);
                }
                if dial.opened {
                    core.emit(SocketEvent::Disconnected(dial.endpoint.clone()));
                }
                if core.lifecycle == Lifecycle::Open && !dial.endpoint.is_inproc() {
                    self.schedule_reconnect(core, dial.endpoint);
                }
            }
            core.lifecycle == Lifecycle::Closing && core.live.is_empty()
        };
        if finished {
            self.finish_close();
        }
    }

    fn reconnect(&self, endpoint: Endpoint) {
        {
            let mut core = self.core.borrow_mut();
            core.reconnect_timers.remove(&endpoint);
            if core.lifecycle != Lifecycle::Open || core.endpoints.contains_key(&endpoint) {
                return;
            }
        }
        debug!(socket_type = %self.socket_type, endpoint = %endpoint, "[SocketBase] reconnecting");
        if let Err(err) = self.dial(endpoint) {
            warn!(error = %err, "[SocketBase] reconnect failed");
        }
    }

    fn protocol_error(&self, connection: ConnectionId, error: ZmqError) {
        debug!(socket_type = %self.socket_type, connection, error = %error, "[SocketBase] protocol error");
        self.core
            .borrow_mut()
            .emit(SocketEvent::ProtocolError(error.to_string()));
    }
}

impl<Q, R> Drop for Engine<Q, R> {
    fn drop(&mut self) {
        let core = self.core.get_mut();
        if core.lifecycle == Lifecycle::Closed {
            return;
        }
        core.cancel_timers();
        core.dial_tasks.clear();
        // Inproc names held by a dropped socket are reclaimed lazily.
        let _ = core.drop_bindings();
        let connections: Vec<_> = core.live.drain().map(|(_, c)| c).collect();
        for connection in connections {
            connection.abort();
        }
    }
}

impl<Q, R> fmt::Debug for Engine<Q, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let core = self.core.borrow();
        f.debug_struct("Engine")
            .field("socket_type", &self.socket_type)
            .field("lifecycle", &core.lifecycle)
            .field("peers", &core.peers.all.len())
            .field("free_peers", &core.peers.free.len())
            .field("connections", &core.live.len())
            .finish()
    }
}

async fn listen_tcp<Q, R>(socket: Weak<Engine<Q, R>>, addr: SocketAddr)
where
    Q: QueueingStrategy + 'static,
    R: Inbound + 'static,
{
    let endpoint = Endpoint::Tcp(addr);
    let listener = match tcp::bind(addr).await {
        Ok(listener) => listener,
        Err(err) => {
            if let Some(engine) = socket.upgrade() {
                engine.listen_failed(&endpoint, &err);
            }
            return;
        }
    };
    match socket.upgrade() {
        Some(engine) => engine.listening(&endpoint),
        None => return,
    }

    loop {
        let result = listener.accept().await;
        let Some(engine) = socket.upgrade() else {
            return;
        };
        match result {
            Ok((stream, peer)) => {
                trace!(%peer, "[SocketBase] accepted tcp connection");
                if engine.stream_config().tcp_nodelay {
                    if let Err(err) = tcp::enable_tcp_nodelay(&stream) {
                        debug!(error = %err, "[SocketBase] TCP_NODELAY failed");
                    }
                }
                engine.accepted(stream);
            }
            Err(err) => {
                warn!(endpoint = %endpoint, error = %err, "[SocketBase] accept failed");
                drop(engine);
                compio::time::sleep(ACCEPT_RETRY).await;
            }
        }
    }
}

#[cfg(unix)]
async fn listen_ipc<Q, R>(socket: Weak<Engine<Q, R>>, path: std::path::PathBuf)
where
    Q: QueueingStrategy + 'static,
    R: Inbound + 'static,
{
    let endpoint = Endpoint::Ipc(path.clone());
    let listener = match zmq2_core::ipc::bind(&path).await {
        Ok(listener) => listener,
        Err(err) => {
            if let Some(engine) = socket.upgrade() {
                engine.listen_failed(&endpoint, &err);
            }
            return;
        }
    };
    match socket.upgrade() {
        Some(engine) => engine.listening(&endpoint),
        None => return,
    }

    loop {
        let result = listener.accept().await;
        let Some(engine) = socket.upgrade() else {
            return;
        };
        match result {
            Ok((stream, _addr)) => {
                trace!(endpoint = %endpoint, "[SocketBase] accepted ipc connection");
                engine.accepted(stream);
            }
            Err(err) => {
                warn!(endpoint = %endpoint, error = %err, "[SocketBase] accept failed");
                drop(engine);
                compio::time::sleep(ACCEPT_RETRY).await;
            }
        }
    }
}

async fn dial_tcp<Q, R>(socket: Weak<Engine<Q, R>>, id: ConnectionId, addr: SocketAddr, nodelay: bool)
where
    Q: QueueingStrategy + 'static,
    R: Inbound + 'static,
{
    let result = tcp::connect(addr, nodelay).await;
    let Some(engine) = socket.upgrade() else {
        return;
    };
    match result {
        Ok(stream) => engine.dialed(id, stream, Endpoint::Tcp(addr)),
        Err(err) => engine.dial_failed(id, &err),
    }
}

#[cfg(unix)]
async fn dial_ipc<Q, R>(socket: Weak<Engine<Q, R>>, id: ConnectionId, path: std::path::PathBuf)
where
    Q: QueueingStrategy + 'static,
    R: Inbound + 'static,
{
    let result = zmq2_core::ipc::connect(&path).await;
    let Some(engine) = socket.upgrade() else {
        return;
    };
    match result {
        Ok(stream) => engine.dialed(id, stream, Endpoint::Ipc(path)),
        Err(err) => engine.dial_failed(id, &err),
    }
}

pub(crate) type MessageHandler = dyn Fn(Multipart);

/// Inbound side of the patterns that hand whole messages to the application.
#[derive(Default)]
pub(crate) struct MessageInbound {
    pub(crate) on_message: Callback<MessageHandler>,
    pub(crate) on_cancel: Callback<MessageHandler>,
    /// Prefix delivered messages with the sender's identity.
    with_peer: bool,
}

impl MessageInbound {
    pub(crate) fn with_peer() -> Self {
        Self {
            with_peer: true,
            ..Self::default()
        }
    }
}

impl Inbound for MessageInbound {
    fn receive(&self, mut message: Multipart, peer: &Bytes) {
        let Some(handler) = self.on_message.get() else {
            trace!("[SocketBase] no message handler, dropping message");
            return;
        };
        if self.with_peer {
            message.insert(0, peer.clone());
        }
        handler(message);
    }

    fn cancelled(&self, message: Multipart) {
        if let Some(handler) = self.on_cancel.get() {
            handler(message);
        }
    }

    fn release(&self) {
        self.on_message.clear();
        self.on_cancel.clear();
    }
}
