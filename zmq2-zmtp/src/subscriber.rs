//! SUB socket.
//!
//! Subscriptions are matched locally against the first frame of each
//! message (publishers send everything). Every matching subscription fires,
//! in the order they were added, so one message can reach several handlers.
//! Subscriptions added without their own handler deliver to `on_message`.

use bytes::Bytes;
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;
use tracing::{debug, trace};
use zmq2_core::options::SocketOptions;
use zmq2_core::reactor::Reactor;
use zmq2_core::socket_type::SocketType;
use zmq2_core::subscription::{Subscription, SubscriptionList};

use crate::base::{Callback, Engine, Inbound, MessageHandler};
use crate::codec::Multipart;
use crate::queueing::ReceiveOnly;
use crate::socket_trait::impl_socket_trait;

#[derive(Clone)]
enum Action {
    /// Deliver to the socket's `on_message` handler.
    Default,
    Handler(Rc<MessageHandler>),
}

#[derive(Default)]
pub(crate) struct SubInbound {
    subscriptions: RefCell<SubscriptionList<Action>>,
    on_message: Callback<MessageHandler>,
}

impl Inbound for SubInbound {
    fn receive(&self, message: Multipart, _peer: &Bytes) {
        let topic = message.first().cloned().unwrap_or_default();
        let actions = self.subscriptions.borrow().matching(&topic);
        if actions.is_empty() {
            trace!(topic = ?topic, "[SUB] no matching subscription");
            return;
        }
        for action in actions {
            let handler = match action {
                Action::Default => self.on_message.get(),
                Action::Handler(handler) => Some(handler),
            };
            if let Some(handler) = handler {
                handler(message.clone());
            }
        }
    }

    fn release(&self) {
        self.on_message.clear();
        self.subscriptions.borrow_mut().clear();
    }
}

/// SUB socket.
///
/// # Examples
///
/// ```
/// use std::rc::Rc;
/// use bytes::Bytes;
/// use zmq2_core::reactor::LocalReactor;
/// use zmq2_zmtp::{PubSocket, Socket, SubSocket};
///
/// let reactor = Rc::new(LocalReactor::new());
/// let publisher = PubSocket::new(reactor.clone());
/// publisher.bind("inproc://sub-doc").unwrap();
///
/// let subscriber = SubSocket::new(reactor.clone());
/// subscriber.subscribe("weather");
/// subscriber.subscribe_with("alerts", |msg| println!("ALERT {msg:?}"));
/// subscriber.on_message(|msg| println!("{msg:?}"));
/// subscriber.connect("inproc://sub-doc").unwrap();
/// reactor.run_until_idle();
///
/// publisher.send_message(vec![Bytes::from("weather.paris"), Bytes::from("rain")]).unwrap();
/// reactor.run_until_idle();
/// ```
#[derive(Clone)]
pub struct SubSocket {
    engine: Rc<Engine<ReceiveOnly, SubInbound>>,
}

impl SubSocket {
    pub fn new(reactor: Rc<dyn Reactor>) -> Self {
        Self::with_options(reactor, SocketOptions::default())
    }

    /// Create a subscriber; `options.subscribe` prefixes are subscribed
    /// right away with the default action.
    pub fn with_options(reactor: Rc<dyn Reactor>, options: SocketOptions) -> Self {
        let mut subscriptions = SubscriptionList::new();
        for prefix in &options.subscribe {
            subscriptions.subscribe(Subscription::Prefix(prefix.clone()), Action::Default);
        }
        let inbound = SubInbound {
            subscriptions: RefCell::new(subscriptions),
            on_message: Callback::default(),
        };
        Self {
            engine: Engine::new(SocketType::Sub, options, reactor, ReceiveOnly, inbound),
        }
    }

    /// Handler for messages matched by subscriptions without their own
    /// handler.
    pub fn on_message(&self, handler: impl Fn(Multipart) + 'static) {
        self.engine.inbound.on_message.set(Rc::new(handler));
    }

    /// Subscribe with the default action. Accepts a prefix (`&str`, `Bytes`,
    /// ...) or any [`Subscription`].
    pub fn subscribe(&self, subscription: impl Into<Subscription>) {
        self.add(subscription.into(), Action::Default);
    }

    /// Subscribe with a dedicated handler.
    pub fn subscribe_with(
        &self,
        subscription: impl Into<Subscription>,
        handler: impl Fn(Multipart) + 'static,
    ) {
        self.add(subscription.into(), Action::Handler(Rc::new(handler)));
    }

    fn add(&self, subscription: Subscription, action: Action) {
        debug!(subscription = ?subscription, "[SUB] subscribe");
        self.engine
            .inbound
            .subscriptions
            .borrow_mut()
            .subscribe(subscription, action);
    }

    /// Drop the prefix subscription `prefix`. Returns whether it existed.
    pub fn unsubscribe(&self, prefix: impl AsRef<[u8]>) -> bool {
        let removed = self
            .engine
            .inbound
            .subscriptions
            .borrow_mut()
            .unsubscribe(prefix.as_ref());
        if removed {
            debug!(prefix = ?Bytes::copy_from_slice(prefix.as_ref()), "[SUB] unsubscribe");
        }
        removed
    }

    /// Number of active subscriptions.
    pub fn subscription_count(&self) -> usize {
        self.engine.inbound.subscriptions.borrow().len()
    }
}

impl_socket_trait!([] SubSocket, |socket, _msg| Err(socket.engine.unsupported("send")));

impl fmt::Debug for SubSocket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubSocket")
            .field("engine", &self.engine)
            .field("subscriptions", &self.subscription_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::publisher::PubSocket;
    use crate::socket_trait::Socket;
    use zmq2_core::error::ZmqError;
    use zmq2_core::reactor::LocalReactor;

    fn msg(frames: &[&'static str]) -> Multipart {
        frames.iter().map(|f| Bytes::from_static(f.as_bytes())).collect()
    }

    #[test]
    fn test_every_matching_subscription_fires_in_order() {
        let reactor = Rc::new(LocalReactor::new());
        let publisher = PubSocket::new(reactor.clone());
        publisher.bind("inproc://sub-order").unwrap();

        let options = SocketOptions::default().with_subscription("news");
        let subscriber = SubSocket::with_options(reactor.clone(), options);
        let log = Rc::new(RefCell::new(Vec::new()));

        let sink = Rc::clone(&log);
        subscriber.on_message(move |m| sink.borrow_mut().push(("default", m)));
        let sink = Rc::clone(&log);
        subscriber.subscribe_with("", move |m| sink.borrow_mut().push(("all", m)));
        subscriber.connect("inproc://sub-order").unwrap();
        reactor.run_until_idle();

        publisher.send_message(msg(&["news.eu", "x"])).unwrap();
        publisher.send_message(msg(&["sports", "y"])).unwrap();
        reactor.run_until_idle();

        assert_eq!(
            *log.borrow(),
            vec![
                ("default", msg(&["news.eu", "x"])),
                ("all", msg(&["news.eu", "x"])),
                ("all", msg(&["sports", "y"])),
            ]
        );
    }

    #[test]
    fn test_resubscribe_replaces_handler_and_unsubscribe() {
        let reactor = Rc::new(LocalReactor::new());
        let subscriber = SubSocket::new(reactor);
        subscriber.subscribe("a");
        subscriber.subscribe_with("a", |_| {});
        subscriber.subscribe("b");
        assert_eq!(subscriber.subscription_count(), 2);

        assert!(subscriber.unsubscribe("a"));
        assert!(!subscriber.unsubscribe("a"));
        assert_eq!(subscriber.subscription_count(), 1);
    }

    #[test]
    fn test_sub_cannot_send() {
        let reactor = Rc::new(LocalReactor::new());
        let subscriber = SubSocket::new(reactor);
        assert!(matches!(
            subscriber.send(msg(&["x"])),
            Err(ZmqError::Unsupported { socket_type: "SUB", .. })
        ));
    }
}
