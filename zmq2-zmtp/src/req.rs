//! REQ sockets.
//!
//! Unlike a classic ZeroMQ REQ, requests are not serialised: any number may
//! be outstanding. Each request gets a fresh id, sent as
//! `[request_id, EMPTY, ...frames]`, and a reply is matched back to the
//! caller's data by the id in front of its delimiter. Replies nobody waits
//! for (cancelled, or never sent by this socket) are dropped.
//!
//! [`BasicReqSocket`] sends each request to the next free peer or refuses
//! it. [`ReqSocket`] queues requests that cannot go out right away, keyed by
//! request id, so a request can be cancelled while queued.
//!
//! Besides caller data delivered to `on_reply`, a [`ReqSocket`] request can
//! carry its own reply callback ([`ReqSocket::send_request_with`]) or hand
//! back a future ([`ReqSocket::send_request_deferred`]).

use bytes::Bytes;
use hashbrown::HashMap;
use linked_hash_map::LinkedHashMap;
use std::cell::RefCell;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll};
use tracing::trace;
use zmq2_core::error::Result;
use zmq2_core::hwm::BoundedQueue;
use zmq2_core::options::SocketOptions;
use zmq2_core::reactor::Reactor;
use zmq2_core::socket_type::SocketType;
use zmq2_core::EMPTY;

use crate::base::{Callback, Engine, Inbound};
use crate::codec::{split_envelope, Multipart};
use crate::queueing::{QueueingStrategy, SocketQueue, Unqueued};
use crate::socket_trait::impl_socket_trait;

/// Id assigned to a request by [`ReqSocket::send_request`].
pub type RequestId = Bytes;

/// Queued requests in send order, addressable by request id.
#[derive(Debug, Default)]
pub(crate) struct RequestQueue {
    requests: LinkedHashMap<RequestId, Multipart>,
}

impl RequestQueue {
    fn remove(&mut self, id: &RequestId) -> Option<Multipart> {
        self.requests.remove(id)
    }
}

impl BoundedQueue for RequestQueue {
    type Item = Multipart;

    fn len(&self) -> usize {
        self.requests.len()
    }

    fn front(&self) -> Option<&Multipart> {
        self.requests.front().map(|(_, request)| request)
    }

    fn push_back(&mut self, request: Multipart) {
        let id = request.first().cloned().unwrap_or_default();
        self.requests.insert(id, request);
    }

    fn pop_front(&mut self) -> Option<Multipart> {
        self.requests.pop_front().map(|(_, request)| request)
    }

    fn pop_back(&mut self) -> Option<Multipart> {
        self.requests.pop_back().map(|(_, request)| request)
    }

    fn clear(&mut self) {
        self.requests.clear();
    }
}

type ReplyHandler<T> = dyn Fn(Multipart, T, RequestId);
type CancelHandler<T> = dyn Fn(RequestId, T);

/// Where a request's reply goes.
enum Pending<T> {
    /// To `on_reply`, with the caller's data.
    Data(T),
    /// To a callback of its own.
    Handler(Box<dyn FnOnce(Multipart, RequestId)>),
    /// Into a [`ReplyFuture`]. Dropping the sender resolves it to `None`.
    Deferred(flume::Sender<Multipart>),
}

impl<T> Pending<T> {
    fn into_data(self) -> Option<T> {
        match self {
            Self::Data(data) => Some(data),
            Self::Handler(_) | Self::Deferred(_) => None,
        }
    }
}

pub(crate) struct ReqInbound<T> {
    pending: RefCell<HashMap<RequestId, Pending<T>>>,
    on_reply: Callback<ReplyHandler<T>>,
    on_cancel: Callback<CancelHandler<T>>,
}

impl<T> Default for ReqInbound<T> {
    fn default() -> Self {
        Self {
            pending: RefCell::new(HashMap::new()),
            on_reply: Callback::default(),
            on_cancel: Callback::default(),
        }
    }
}

impl<T> Inbound for ReqInbound<T> {
    fn receive(&self, message: Multipart, _peer: &Bytes) {
        let Some((envelope, body)) = split_envelope(message) else {
            trace!("[REQ] reply without delimiter dropped");
            return;
        };
        let Some(id) = envelope.into_iter().next() else {
            trace!("[REQ] reply without request id dropped");
            return;
        };
        let Some(pending) = self.pending.borrow_mut().remove(&id) else {
            trace!(request = ?id, "[REQ] unmatched reply dropped");
            return;
        };
        match pending {
            Pending::Data(data) => {
                if let Some(handler) = self.on_reply.get() {
                    handler(body, data, id);
                }
            }
            Pending::Handler(callback) => callback(body, id),
            Pending::Deferred(reply) => {
                let _ = reply.send(body);
            }
        }
    }

    fn cancelled(&self, request: Multipart) {
        let Some(id) = request.into_iter().next() else {
            return;
        };
        let Some(pending) = self.pending.borrow_mut().remove(&id) else {
            return;
        };
        trace!(request = ?id, "[REQ] request cancelled");
        if let Some(data) = pending.into_data() {
            if let Some(handler) = self.on_cancel.get() {
                handler(id, data);
            }
        }
    }

    fn release(&self) {
        self.on_reply.clear();
        self.on_cancel.clear();
        let pending = std::mem::take(&mut *self.pending.borrow_mut());
        drop(pending);
    }
}

impl<T> ReqInbound<T> {
    fn forget(&self, id: &RequestId) -> Option<Pending<T>> {
        self.pending.borrow_mut().remove(id)
    }
}

/// Register `pending` under a fresh request id and send
/// `[id, EMPTY, ...frames]`. A refused request is forgotten again.
fn submit<Q, T>(
    engine: &Engine<Q, ReqInbound<T>>,
    frames: Multipart,
    pending: Pending<T>,
    even_if_busy: bool,
) -> Result<Option<RequestId>>
where
    Q: QueueingStrategy + 'static,
    T: 'static,
{
    let id = engine.next_identity();
    let mut request = Vec::with_capacity(frames.len() + 2);
    request.push(id.clone());
    request.push(EMPTY);
    request.extend(frames);

    engine
        .inbound
        .pending
        .borrow_mut()
        .insert(id.clone(), pending);
    let sent = if even_if_busy {
        engine.send_even_if_busy(request)
    } else {
        engine.send(request)
    };
    match sent {
        Ok(true) => Ok(Some(id)),
        Ok(false) => {
            drop(engine.inbound.forget(&id));
            trace!(socket_type = %engine.socket_type(), "[REQ] request refused");
            Ok(None)
        }
        Err(err) => {
            drop(engine.inbound.forget(&id));
            Err(err)
        }
    }
}

/// The reply to a request sent with [`ReqSocket::send_request_deferred`].
///
/// Resolves to `None` if the request is cancelled, dropped by the high water
/// mark, or still outstanding when the socket closes.
#[must_use = "futures do nothing unless polled"]
pub struct ReplyFuture {
    reply: Pin<Box<flume::r#async::RecvFut<'static, Multipart>>>,
}

impl Future for ReplyFuture {
    type Output = Option<Multipart>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.reply.as_mut().poll(cx).map(std::result::Result::ok)
    }
}

impl fmt::Debug for ReplyFuture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReplyFuture").finish_non_exhaustive()
    }
}

/// REQ without an outgoing queue, carrying caller data `T` for each
/// outstanding request.
pub struct BasicReqSocket<T: 'static> {
    engine: Rc<Engine<Unqueued, ReqInbound<T>>>,
}

impl<T: 'static> Clone for BasicReqSocket<T> {
    fn clone(&self) -> Self {
        Self {
            engine: Rc::clone(&self.engine),
        }
    }
}

impl<T: 'static> BasicReqSocket<T> {
    pub fn new(reactor: Rc<dyn Reactor>) -> Self {
        Self::with_options(reactor, SocketOptions::default())
    }

    pub fn with_options(reactor: Rc<dyn Reactor>, options: SocketOptions) -> Self {
        Self {
            engine: Engine::new(
                SocketType::Req,
                options,
                reactor,
                Unqueued,
                ReqInbound::default(),
            ),
        }
    }

    /// Handler for replies: `(body, data, request_id)`.
    pub fn on_reply(&self, handler: impl Fn(Multipart, T, RequestId) + 'static) {
        self.engine.inbound.on_reply.set(Rc::new(handler));
    }

    /// Send `frames` to the next free peer as a new request.
    ///
    /// Returns `Ok(None)` when every peer is busy or none is connected;
    /// `data` is dropped in that case.
    pub fn send_request(&self, frames: Multipart, data: T) -> Result<Option<RequestId>> {
        submit(&self.engine, frames, Pending::Data(data), false)
    }

    /// Send to the next connected peer, ignoring busyness.
    pub fn send_request_even_if_busy(
        &self,
        frames: Multipart,
        data: T,
    ) -> Result<Option<RequestId>> {
        submit(&self.engine, frames, Pending::Data(data), true)
    }

    /// Ignore the reply to `id`. Returns its data if it was pending.
    pub fn cancel_request(&self, id: &RequestId) -> Option<T> {
        self.engine.inbound.forget(id).and_then(Pending::into_data)
    }

    pub fn pending_requests(&self) -> usize {
        self.engine.inbound.pending.borrow().len()
    }
}

impl_socket_trait!([T: 'static] BasicReqSocket<T>, |socket, _msg| Err(socket.engine.unsupported("send")));

impl<T: 'static> fmt::Debug for BasicReqSocket<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BasicReqSocket")
            .field("engine", &self.engine)
            .field("pending", &self.pending_requests())
            .finish()
    }
}

/// REQ with a request queue, carrying caller data `T` for each outstanding
/// request.
///
/// # Examples
///
/// ```
/// use std::rc::Rc;
/// use bytes::Bytes;
/// use zmq2_core::reactor::LocalReactor;
/// use zmq2_zmtp::{RepSocket, ReqSocket, Socket};
///
/// let reactor = Rc::new(LocalReactor::new());
///
/// let rep = RepSocket::new(reactor.clone());
/// let replier = rep.clone();
/// rep.on_request(move |mut body, envelope| {
///     body.push(Bytes::from("!"));
///     let _ = replier.send_reply(body, &envelope);
/// });
/// rep.bind("inproc://req-doc").unwrap();
///
/// let req = ReqSocket::<&'static str>::new(reactor.clone());
/// req.on_reply(|reply, data, _id| {
///     assert_eq!(data, "greeting");
///     assert_eq!(reply, vec![Bytes::from("hello"), Bytes::from("!")]);
/// });
/// req.connect("inproc://req-doc").unwrap();
/// let id = req.send_request(vec![Bytes::from("hello")], "greeting").unwrap();
/// assert!(id.is_some());
///
/// reactor.run_until_idle();
/// assert_eq!(req.pending_requests(), 0);
/// ```
pub struct ReqSocket<T: 'static> {
    engine: Rc<Engine<SocketQueue<RequestQueue>, ReqInbound<T>>>,
}

impl<T: 'static> Clone for ReqSocket<T> {
    fn clone(&self) -> Self {
        Self {
            engine: Rc::clone(&self.engine),
        }
    }
}

impl<T: 'static> ReqSocket<T> {
    pub fn new(reactor: Rc<dyn Reactor>) -> Self {
        Self::with_options(reactor, SocketOptions::default())
    }

    pub fn with_options(reactor: Rc<dyn Reactor>, options: SocketOptions) -> Self {
        Self {
            engine: Engine::new(
                SocketType::Req,
                options,
                reactor,
                SocketQueue::new(RequestQueue::default()),
                ReqInbound::default(),
            ),
        }
    }

    /// Handler for replies: `(body, data, request_id)`.
    pub fn on_reply(&self, handler: impl Fn(Multipart, T, RequestId) + 'static) {
        self.engine.inbound.on_reply.set(Rc::new(handler));
    }

    /// Handler for queued requests dropped by the high water mark.
    pub fn on_cancel(&self, handler: impl Fn(RequestId, T) + 'static) {
        self.engine.inbound.on_cancel.set(Rc::new(handler));
    }

    /// Send `frames` as a new request and remember `data` until its reply
    /// arrives.
    ///
    /// Returns the request id, or `Ok(None)` if the request could be neither
    /// sent nor queued (queue full). `data` is dropped in that case.
    pub fn send_request(&self, frames: Multipart, data: T) -> Result<Option<RequestId>> {
        submit(&self.engine, frames, Pending::Data(data), false)
    }

    /// Like [`send_request`](Self::send_request), but the reply goes to
    /// `callback` instead of `on_reply`. The callback is dropped unrun if the
    /// request is cancelled.
    pub fn send_request_with(
        &self,
        frames: Multipart,
        callback: impl FnOnce(Multipart, RequestId) + 'static,
    ) -> Result<Option<RequestId>> {
        submit(&self.engine, frames, Pending::Handler(Box::new(callback)), false)
    }

    /// Like [`send_request`](Self::send_request), returning a future for the
    /// reply instead of routing it to `on_reply`.
    ///
    /// # Examples
    ///
    /// ```
    /// use std::rc::Rc;
    /// use bytes::Bytes;
    /// use zmq2_core::reactor::LocalReactor;
    /// use zmq2_zmtp::ReqSocket;
    ///
    /// let reactor = Rc::new(LocalReactor::new());
    /// let req = ReqSocket::<()>::new(reactor);
    /// // Queued: no peer yet.
    /// let (id, reply) = req.send_request_deferred(vec![Bytes::from("ping")]).unwrap().unwrap();
    /// assert_eq!(req.pending_requests(), 1);
    ///
    /// // Cancelling resolves the future to `None`.
    /// assert_eq!(req.cancel_request(&id), None);
    /// drop(reply);
    /// assert_eq!(req.pending_requests(), 0);
    /// ```
    pub fn send_request_deferred(
        &self,
        frames: Multipart,
    ) -> Result<Option<(RequestId, ReplyFuture)>> {
        let (sender, receiver) = flume::bounded(1);
        let id = submit(&self.engine, frames, Pending::Deferred(sender), false)?;
        Ok(id.map(|id| {
            let reply = ReplyFuture {
                reply: Box::pin(receiver.into_recv_async()),
            };
            (id, reply)
        }))
    }

    /// Forget a request: its reply will be ignored, and if it is still
    /// queued it will not be sent. Returns its data if it was sent with
    /// [`send_request`](Self::send_request) and still pending.
    pub fn cancel_request(&self, id: &RequestId) -> Option<T> {
        self.engine.with_queue(|queue| queue.queue_mut().remove(id));
        self.engine.inbound.forget(id).and_then(Pending::into_data)
    }

    /// Requests sent or queued whose reply has not arrived.
    pub fn pending_requests(&self) -> usize {
        self.engine.inbound.pending.borrow().len()
    }
}

impl_socket_trait!([T: 'static] ReqSocket<T>, |socket, _msg| Err(socket.engine.unsupported("send")));

impl<T: 'static> fmt::Debug for ReqSocket<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReqSocket")
            .field("engine", &self.engine)
            .field("pending", &self.pending_requests())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::router::RouterSocket;
    use crate::socket_trait::Socket;
    use zmq2_core::error::ZmqError;
    use zmq2_core::options::HwmStrategy;
    use zmq2_core::reactor::LocalReactor;

    #[test]
    fn test_request_queue_keeps_order_and_removes_by_id() {
        let mut queue = RequestQueue::default();
        for id in ["a", "b", "c"] {
            queue.push_back(vec![Bytes::from(id), EMPTY]);
        }
        assert_eq!(queue.remove(&Bytes::from("b")).map(|r| r[0].clone()), Some(Bytes::from("b")));
        assert_eq!(queue.pop_front().unwrap()[0], Bytes::from("a"));
        assert_eq!(queue.pop_back().unwrap()[0], Bytes::from("c"));
        assert!(queue.is_empty());
    }

    #[test]
    fn test_send_through_trait_is_unsupported() {
        let reactor = Rc::new(LocalReactor::new());
        let req = ReqSocket::<()>::new(reactor);
        assert!(matches!(
            req.send(vec![Bytes::from("x")]),
            Err(ZmqError::Unsupported { socket_type: "REQ", .. })
        ));
    }

    #[test]
    fn test_cancel_queued_request() {
        let reactor = Rc::new(LocalReactor::new());
        let req = ReqSocket::new(reactor.clone());
        let id = req.send_request(vec![Bytes::from("q")], 7u32).unwrap().unwrap();
        assert_eq!(req.queued(), 1);
        assert_eq!(req.cancel_request(&id), Some(7));
        assert_eq!(req.queued(), 0);
        assert_eq!(req.pending_requests(), 0);
        assert_eq!(req.cancel_request(&id), None);
    }

    #[test]
    fn test_drop_first_reports_cancelled_request() {
        let reactor = Rc::new(LocalReactor::new());
        let options = SocketOptions::default()
            .with_hwm(1)
            .with_hwm_strategy(HwmStrategy::DropFirst);
        let req = ReqSocket::with_options(reactor.clone(), options);
        let cancelled = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&cancelled);
        req.on_cancel(move |id, data| sink.borrow_mut().push((id, data)));

        let first = req.send_request(vec![Bytes::from("1")], "one").unwrap().unwrap();
        let second = req.send_request(vec![Bytes::from("2")], "two").unwrap();
        assert!(second.is_some());
        assert_eq!(*cancelled.borrow(), vec![(first, "one")]);
        assert_eq!(req.pending_requests(), 1);
    }

    #[test]
    fn test_drop_last_refusal_forgets_data() {
        let reactor = Rc::new(LocalReactor::new());
        let req = ReqSocket::with_options(reactor, SocketOptions::default().with_hwm(1));
        assert!(req.send_request(vec![Bytes::from("1")], 1).unwrap().is_some());
        assert!(req.send_request(vec![Bytes::from("2")], 2).unwrap().is_none());
        assert_eq!(req.pending_requests(), 1);
    }

    fn echo_router(reactor: &Rc<LocalReactor>, endpoint: &str) -> RouterSocket {
        let router = RouterSocket::new(reactor.clone());
        let echo = router.clone();
        router.on_message(move |msg| {
            let _ = echo.send_message(msg);
        });
        router.bind(endpoint).unwrap();
        router
    }

    #[test]
    fn test_basic_req_refuses_when_no_peer_is_free() {
        let reactor = Rc::new(LocalReactor::new());
        let _router = echo_router(&reactor, "inproc://basic-req");

        let options = SocketOptions::default().with_busy_threshold(1);
        let req = BasicReqSocket::with_options(reactor.clone(), options);
        let replies = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&replies);
        req.on_reply(move |body, data, _id| sink.borrow_mut().push((body, data)));

        assert!(req.send_request(vec![Bytes::from("early")], 0).unwrap().is_none());
        assert_eq!(req.pending_requests(), 0);

        req.connect("inproc://basic-req").unwrap();
        reactor.run_until_idle();

        assert!(req.send_request(vec![Bytes::from("a")], 1).unwrap().is_some());
        assert!(req.send_request(vec![Bytes::from("b")], 2).unwrap().is_none());
        assert!(req
            .send_request_even_if_busy(vec![Bytes::from("c")], 3)
            .unwrap()
            .is_some());
        assert_eq!(req.queued(), 0);
        reactor.run_until_idle();

        assert_eq!(
            *replies.borrow(),
            vec![(vec![Bytes::from("a")], 1), (vec![Bytes::from("c")], 3)]
        );
        assert_eq!(req.pending_requests(), 0);
    }

    #[test]
    fn test_basic_req_cancel_ignores_reply() {
        let reactor = Rc::new(LocalReactor::new());
        let _router = echo_router(&reactor, "inproc://basic-req-cancel");

        let req = BasicReqSocket::<&'static str>::new(reactor.clone());
        let replies = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&replies);
        req.on_reply(move |body, _data, _id| sink.borrow_mut().push(body));
        req.connect("inproc://basic-req-cancel").unwrap();
        reactor.run_until_idle();

        let id = req.send_request(vec![Bytes::from("x")], "x").unwrap().unwrap();
        assert_eq!(req.cancel_request(&id), Some("x"));
        reactor.run_until_idle();
        assert!(replies.borrow().is_empty());
    }

    #[test]
    fn test_request_with_callback_bypasses_on_reply() {
        let reactor = Rc::new(LocalReactor::new());
        let _router = echo_router(&reactor, "inproc://req-callback");

        let req = ReqSocket::<u32>::new(reactor.clone());
        let shared = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&shared);
        req.on_reply(move |body, data, _id| sink.borrow_mut().push((body, Some(data))));
        req.connect("inproc://req-callback").unwrap();

        let sink = Rc::clone(&shared);
        let id = req
            .send_request_with(vec![Bytes::from("cb")], move |body, _id| {
                sink.borrow_mut().push((body, None));
            })
            .unwrap()
            .unwrap();
        req.send_request(vec![Bytes::from("data")], 9).unwrap();
        // Callback requests carry no data to hand back.
        let cancelled = req
            .send_request_with(vec![Bytes::from("gone")], |_, _| panic!("cancelled request replied"))
            .unwrap()
            .unwrap();
        assert_eq!(req.cancel_request(&cancelled), None);
        reactor.run_until_idle();

        assert_eq!(
            *shared.borrow(),
            vec![
                (vec![Bytes::from("cb")], None),
                (vec![Bytes::from("data")], Some(9)),
            ]
        );
        assert_ne!(id, cancelled);
        assert_eq!(req.pending_requests(), 0);
    }

    #[compio::test]
    async fn test_deferred_request_resolves_on_reply_or_cancel() {
        let reactor = Rc::new(LocalReactor::new());
        let req = ReqSocket::<()>::new(reactor.clone());
        // Queued until the peer shows up.
        let (_, answered) = req
            .send_request_deferred(vec![Bytes::from("ping")])
            .unwrap()
            .unwrap();
        let (cancelled_id, cancelled) = req
            .send_request_deferred(vec![Bytes::from("never")])
            .unwrap()
            .unwrap();
        assert_eq!(req.cancel_request(&cancelled_id), None);
        assert_eq!(cancelled.await, None);

        let _router = echo_router(&reactor, "inproc://req-deferred");
        req.connect("inproc://req-deferred").unwrap();
        reactor.run_until_idle();
        assert_eq!(answered.await, Some(vec![Bytes::from("ping")]));

        // Closing abandons whatever is still outstanding.
        let (_, orphaned) = req
            .send_request_deferred(vec![Bytes::from("late")])
            .unwrap()
            .unwrap();
        req.close();
        reactor.run_until_idle();
        assert_eq!(orphaned.await, None);
    }

    #[test]
    fn test_reply_through_router_matches_request() {
        let reactor = Rc::new(LocalReactor::new());
        let router = RouterSocket::new(reactor.clone());
        let echo = router.clone();
        router.on_message(move |msg| {
            let _ = echo.send_message(msg);
        });
        router.bind("inproc://req-router").unwrap();

        let req = ReqSocket::new(reactor.clone());
        let replies = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&replies);
        req.on_reply(move |body, data, _id| sink.borrow_mut().push((body, data)));
        req.connect("inproc://req-router").unwrap();

        req.send_request(vec![Bytes::from("a")], 1).unwrap();
        req.send_request(vec![Bytes::from("b")], 2).unwrap();
        reactor.run_until_idle();

        assert_eq!(
            *replies.borrow(),
            vec![(vec![Bytes::from("a")], 1), (vec![Bytes::from("b")], 2)]
        );
        assert_eq!(req.pending_requests(), 0);
    }
}
