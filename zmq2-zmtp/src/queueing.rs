//! Outbound queueing strategies.
//!
//! A socket pattern decides where a message goes and what happens when no
//! peer can take it right now. Strategies only talk to connections through
//! [`PeerConnection`] calls that never re-enter the socket, so they run while
//! the socket state is borrowed. Messages they evict are collected and
//! reported by the caller once every borrow is released.

use bytes::Bytes;
use hashbrown::HashMap;
use linked_hash_map::LinkedHashMap;
use std::collections::VecDeque;
use std::rc::Rc;
use zmq2_core::hwm::{push_to_queue, BoundedQueue};
use zmq2_core::identity::is_generated;
use zmq2_core::options::HwmStrategy;

use crate::codec::{encode_message, Multipart};
use crate::connection::{ConnectionId, PeerConnection};

/// High water mark settings in effect for one operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct QueueLimits {
    pub(crate) hwm: usize,
    pub(crate) strategy: HwmStrategy,
}

/// Registered peers, in registration order, plus the subset believed free.
#[derive(Default)]
pub(crate) struct PeerTable {
    pub(crate) all: LinkedHashMap<Bytes, Rc<dyn PeerConnection>>,
    pub(crate) free: LinkedHashMap<Bytes, Rc<dyn PeerConnection>>,
}

impl PeerTable {
    /// Connection registered as `identity`.
    pub(crate) fn get(&self, identity: &Bytes) -> Option<&Rc<dyn PeerConnection>> {
        self.all.get(identity)
    }

    pub(crate) fn owned_by(&self, identity: &Bytes, connection: ConnectionId) -> bool {
        self.all.get(identity).is_some_and(|peer| peer.id() == connection)
    }

    /// Next peer in round-robin order.
    ///
    /// Free peers are rotated to the back as they are used. A peer found busy
    /// leaves the free set until it reports free again; errored peers are
    /// skipped. With `even_if_busy` every registered peer takes part.
    pub(crate) fn round_robin(&mut self, even_if_busy: bool) -> Option<Rc<dyn PeerConnection>> {
        let peers = if even_if_busy {
            &mut self.all
        } else {
            &mut self.free
        };
        for _ in 0..peers.len() {
            let (identity, peer) = peers.pop_front()?;
            if even_if_busy || peer.not_too_busy() {
                peers.insert(identity, Rc::clone(&peer));
                if !peer.is_errored() {
                    return Some(peer);
                }
            }
        }
        None
    }

    /// The peer registered as `identity`, if it can take a message.
    pub(crate) fn writable(
        &mut self,
        identity: &Bytes,
        even_if_busy: bool,
    ) -> Option<Rc<dyn PeerConnection>> {
        let peer = if even_if_busy {
            self.all.get(identity)
        } else {
            self.free.get(identity)
        }?;
        if peer.is_errored() {
            return None;
        }
        if even_if_busy || peer.not_too_busy() {
            return Some(Rc::clone(peer));
        }
        self.free.remove(identity);
        None
    }
}

/// How a socket pattern routes and buffers outbound messages.
pub(crate) trait QueueingStrategy {
    /// Route `message`, queueing it if nothing can take it now. Returns
    /// whether the message was accepted.
    fn send(
        &mut self,
        peers: &mut PeerTable,
        limits: QueueLimits,
        message: Multipart,
        evicted: &mut Vec<Multipart>,
    ) -> bool;

    /// Like [`send`](Self::send), ignoring busy connections where the
    /// strategy allows it.
    fn send_even_if_busy(
        &mut self,
        peers: &mut PeerTable,
        limits: QueueLimits,
        message: Multipart,
        evicted: &mut Vec<Multipart>,
    ) -> bool {
        self.send(peers, limits, message, evicted)
    }

    fn peer_registered(&mut self, _identity: &Bytes) {}

    fn peer_unregistered(&mut self, _identity: &Bytes, _evicted: &mut Vec<Multipart>) {}

    /// The peer registered as `identity` can take data again.
    fn peer_free(&mut self, peers: &mut PeerTable, identity: &Bytes);

    /// Push everything queued into the connections, ignoring busyness.
    fn flush_all(&mut self, peers: &mut PeerTable);

    /// Re-apply the limits after the high water mark went down.
    fn apply_hwm(&mut self, limits: QueueLimits, evicted: &mut Vec<Multipart>);

    /// Drop everything queued.
    fn clear(&mut self);

    /// Number of queued messages.
    fn queued(&self) -> usize;
}

/// No queue: a message goes to the next free peer or is refused.
#[derive(Debug, Default)]
pub(crate) struct Unqueued;

impl Unqueued {
    fn route(peers: &mut PeerTable, message: &[Bytes], even_if_busy: bool) -> bool {
        match peers.round_robin(even_if_busy) {
            Some(peer) => {
                peer.send_message(message);
                true
            }
            None => false,
        }
    }
}

impl QueueingStrategy for Unqueued {
    fn send(
        &mut self,
        peers: &mut PeerTable,
        _limits: QueueLimits,
        message: Multipart,
        _evicted: &mut Vec<Multipart>,
    ) -> bool {
        Self::route(peers, &message, false)
    }

    fn send_even_if_busy(
        &mut self,
        peers: &mut PeerTable,
        _limits: QueueLimits,
        message: Multipart,
        _evicted: &mut Vec<Multipart>,
    ) -> bool {
        Self::route(peers, &message, true)
    }

    fn peer_free(&mut self, _peers: &mut PeerTable, _identity: &Bytes) {}

    fn flush_all(&mut self, _peers: &mut PeerTable) {}

    fn apply_hwm(&mut self, _limits: QueueLimits, _evicted: &mut Vec<Multipart>) {}

    fn clear(&mut self) {}

    fn queued(&self) -> usize {
        0
    }
}

/// No queue, explicit addressing: the first frame names the peer and is
/// stripped before sending. A peer that is unknown, errored or busy refuses
/// the message.
#[derive(Debug, Default)]
pub(crate) struct Direct;

impl Direct {
    fn route(peers: &mut PeerTable, message: &[Bytes], even_if_busy: bool) -> bool {
        let Some(identity) = message.first() else {
            return false;
        };
        match peers.writable(identity, even_if_busy) {
            Some(peer) => {
                peer.send_message(&message[1..]);
                true
            }
            None => false,
        }
    }
}

impl QueueingStrategy for Direct {
    fn send(
        &mut self,
        peers: &mut PeerTable,
        _limits: QueueLimits,
        message: Multipart,
        _evicted: &mut Vec<Multipart>,
    ) -> bool {
        Self::route(peers, &message, false)
    }

    fn send_even_if_busy(
        &mut self,
        peers: &mut PeerTable,
        _limits: QueueLimits,
        message: Multipart,
        _evicted: &mut Vec<Multipart>,
    ) -> bool {
        Self::route(peers, &message, true)
    }

    fn peer_free(&mut self, _peers: &mut PeerTable, _identity: &Bytes) {}

    fn flush_all(&mut self, _peers: &mut PeerTable) {}

    fn apply_hwm(&mut self, _limits: QueueLimits, _evicted: &mut Vec<Multipart>) {}

    fn clear(&mut self) {}

    fn queued(&self) -> usize {
        0
    }
}

/// Round-robin with one socket-wide queue, drained whenever a peer frees up.
///
/// Queued messages always go out before a new one, so per-socket order is
/// kept.
#[derive(Debug, Default)]
pub(crate) struct SocketQueue<Q> {
    queue: Q,
}

impl<Q> SocketQueue<Q>
where
    Q: BoundedQueue<Item = Multipart>,
{
    pub(crate) fn new(queue: Q) -> Self {
        Self { queue }
    }

    pub(crate) fn queue_mut(&mut self) -> &mut Q {
        &mut self.queue
    }

    /// Send queued messages until the queue is empty (true) or no peer can
    /// take the next one (false).
    fn flush(&mut self, peers: &mut PeerTable, even_if_busy: bool) -> bool {
        while let Some(message) = self.queue.front() {
            let Some(peer) = peers.round_robin(even_if_busy) else {
                return false;
            };
            peer.send_message(message);
            self.queue.pop_front();
        }
        true
    }
}

impl<Q> QueueingStrategy for SocketQueue<Q>
where
    Q: BoundedQueue<Item = Multipart>,
{
    fn send(
        &mut self,
        peers: &mut PeerTable,
        limits: QueueLimits,
        message: Multipart,
        evicted: &mut Vec<Multipart>,
    ) -> bool {
        if self.flush(peers, false) {
            if let Some(peer) = peers.round_robin(false) {
                peer.send_message(&message);
                return true;
            }
        }
        push_to_queue(
            &mut self.queue,
            Some(message),
            limits.hwm,
            limits.strategy,
            |old| evicted.push(old),
        )
    }

    fn peer_free(&mut self, peers: &mut PeerTable, _identity: &Bytes) {
        self.flush(peers, false);
    }

    fn flush_all(&mut self, peers: &mut PeerTable) {
        self.flush(peers, true);
    }

    fn apply_hwm(&mut self, limits: QueueLimits, evicted: &mut Vec<Multipart>) {
        push_to_queue(&mut self.queue, None, limits.hwm, limits.strategy, |old| {
            evicted.push(old);
        });
    }

    fn clear(&mut self) {
        self.queue.clear();
    }

    fn queued(&self) -> usize {
        self.queue.len()
    }
}

/// Explicit addressing: the first frame names the peer and is stripped
/// before sending. Each identity has its own queue.
///
/// Queues for addressable identities outlive the connection, so a peer that
/// reconnects under the same identity receives what was queued meanwhile.
/// Generated identities cannot reconnect; their queues go away with the
/// connection, and messages addressed to an unknown generated identity are
/// refused.
#[derive(Debug, Default)]
pub(crate) struct PeerQueues {
    queues: HashMap<Bytes, VecDeque<Multipart>>,
}

impl PeerQueues {
    fn flush(&mut self, peers: &mut PeerTable, identity: &Bytes, even_if_busy: bool) -> bool {
        let Some(queue) = self.queues.get_mut(identity) else {
            return true;
        };
        while let Some(message) = queue.front() {
            let Some(peer) = peers.writable(identity, even_if_busy) else {
                return false;
            };
            peer.send_message(&message[1..]);
            queue.pop_front();
        }
        if peers.get(identity).is_none() {
            self.queues.remove(identity);
        }
        true
    }
}

impl QueueingStrategy for PeerQueues {
    fn send(
        &mut self,
        peers: &mut PeerTable,
        limits: QueueLimits,
        message: Multipart,
        evicted: &mut Vec<Multipart>,
    ) -> bool {
        let Some(identity) = message.first().cloned() else {
            return false;
        };
        if self.flush(peers, &identity, false) {
            if let Some(peer) = peers.writable(&identity, false) {
                peer.send_message(&message[1..]);
                return true;
            }
        }
        if is_generated(&identity) && !self.queues.contains_key(&identity) {
            return false;
        }
        let queue = self.queues.entry(identity).or_default();
        push_to_queue(queue, Some(message), limits.hwm, limits.strategy, |old| {
            evicted.push(old);
        })
    }

    fn peer_registered(&mut self, identity: &Bytes) {
        self.queues.entry(identity.clone()).or_default();
    }

    fn peer_unregistered(&mut self, identity: &Bytes, evicted: &mut Vec<Multipart>) {
        if is_generated(identity) {
            if let Some(queue) = self.queues.remove(identity) {
                evicted.extend(queue);
            }
        }
    }

    fn peer_free(&mut self, peers: &mut PeerTable, identity: &Bytes) {
        self.flush(peers, identity, false);
    }

    fn flush_all(&mut self, peers: &mut PeerTable) {
        let identities: Vec<Bytes> = peers.all.keys().cloned().collect();
        for identity in identities {
            self.flush(peers, &identity, true);
        }
    }

    fn apply_hwm(&mut self, limits: QueueLimits, evicted: &mut Vec<Multipart>) {
        for queue in self.queues.values_mut() {
            push_to_queue(queue, None, limits.hwm, limits.strategy, |old| {
                evicted.push(old);
            });
        }
    }

    fn clear(&mut self) {
        self.queues.clear();
    }

    fn queued(&self) -> usize {
        self.queues.values().map(VecDeque::len).sum()
    }
}

/// Fan-out to every registered peer.
///
/// The message is encoded once and the same bytes go to every stream. A
/// peer that cannot take it right now gets it queued, bounded per peer by the
/// high water mark.
#[derive(Default)]
pub(crate) struct Broadcast {
    queues: HashMap<Bytes, VecDeque<(Multipart, Bytes)>>,
}

impl Broadcast {
    fn flush(
        queue: &mut VecDeque<(Multipart, Bytes)>,
        peer: &Rc<dyn PeerConnection>,
        even_if_busy: bool,
    ) -> bool {
        while let Some((frames, encoded)) = queue.front() {
            if peer.is_errored() || !(even_if_busy || peer.not_too_busy()) {
                return false;
            }
            peer.send_encoded(frames, encoded);
            queue.pop_front();
        }
        true
    }
}

impl QueueingStrategy for Broadcast {
    fn send(
        &mut self,
        peers: &mut PeerTable,
        limits: QueueLimits,
        message: Multipart,
        evicted: &mut Vec<Multipart>,
    ) -> bool {
        if peers.all.is_empty() {
            return true;
        }
        let encoded = encode_message(&message);
        let mut accepted = false;
        for (identity, peer) in peers.all.iter() {
            let queue = self.queues.entry(identity.clone()).or_default();
            if Self::flush(queue, peer, false) && !peer.is_errored() && peer.not_too_busy() {
                peer.send_encoded(&message, &encoded);
                accepted = true;
                continue;
            }
            let entry = (message.clone(), encoded.clone());
            accepted |= push_to_queue(queue, Some(entry), limits.hwm, limits.strategy, |old| {
                evicted.push(old.0);
            });
        }
        accepted
    }

    fn peer_registered(&mut self, identity: &Bytes) {
        self.queues.entry(identity.clone()).or_default();
    }

    fn peer_unregistered(&mut self, identity: &Bytes, evicted: &mut Vec<Multipart>) {
        if is_generated(identity) {
            if let Some(queue) = self.queues.remove(identity) {
                evicted.extend(queue.into_iter().map(|(frames, _)| frames));
            }
        }
    }

    fn peer_free(&mut self, peers: &mut PeerTable, identity: &Bytes) {
        if let (Some(queue), Some(peer)) = (self.queues.get_mut(identity), peers.get(identity)) {
            Self::flush(queue, peer, false);
        }
    }

    fn flush_all(&mut self, peers: &mut PeerTable) {
        for (identity, peer) in peers.all.iter() {
            if let Some(queue) = self.queues.get_mut(identity) {
                Self::flush(queue, peer, true);
            }
        }
    }

    fn apply_hwm(&mut self, limits: QueueLimits, evicted: &mut Vec<Multipart>) {
        for queue in self.queues.values_mut() {
            push_to_queue(queue, None, limits.hwm, limits.strategy, |old| {
                evicted.push(old.0);
            });
        }
    }

    fn clear(&mut self) {
        self.queues.clear();
    }

    fn queued(&self) -> usize {
        self.queues.values().map(VecDeque::len).sum()
    }
}

/// Sockets that never send.
#[derive(Debug, Default)]
pub(crate) struct ReceiveOnly;

impl QueueingStrategy for ReceiveOnly {
    fn send(
        &mut self,
        _peers: &mut PeerTable,
        _limits: QueueLimits,
        _message: Multipart,
        _evicted: &mut Vec<Multipart>,
    ) -> bool {
        false
    }

    fn peer_free(&mut self, _peers: &mut PeerTable, _identity: &Bytes) {}

    fn flush_all(&mut self, _peers: &mut PeerTable) {}

    fn apply_hwm(&mut self, _limits: QueueLimits, _evicted: &mut Vec<Multipart>) {}

    fn clear(&mut self) {}

    fn queued(&self) -> usize {
        0
    }
}
