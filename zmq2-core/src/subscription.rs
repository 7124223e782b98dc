//! SUB-side subscription matching.
//!
//! ZeroMQ 2.x filters on the subscriber: every published message reaches
//! every SUB socket, which matches the first frame against its own
//! subscriptions. A message matching several subscriptions is handed to each
//! of them, in registration order.

use bytes::Bytes;
use smallvec::SmallVec;
use std::fmt;
use std::rc::Rc;

/// Custom topic matcher for subscriptions that are neither a prefix nor a
/// plain closure.
pub trait TopicMatcher {
    fn matches(&self, topic: &[u8]) -> bool;
}

/// A single subscription.
#[derive(Clone)]
pub enum Subscription {
    /// Topic starts with these bytes (empty = subscribe to all)
    Prefix(Bytes),
    /// Arbitrary predicate over the topic frame
    Predicate(Rc<dyn Fn(&[u8]) -> bool>),
    /// User-defined matcher object
    Custom(Rc<dyn TopicMatcher>),
}

impl Subscription {
    /// Subscription on a topic prefix.
    pub fn prefix(prefix: impl Into<Bytes>) -> Self {
        Self::Prefix(prefix.into())
    }

    /// Subscription on an arbitrary predicate.
    pub fn predicate(f: impl Fn(&[u8]) -> bool + 'static) -> Self {
        Self::Predicate(Rc::new(f))
    }

    /// Subscription on a custom matcher.
    pub fn custom(matcher: impl TopicMatcher + 'static) -> Self {
        Self::Custom(Rc::new(matcher))
    }

    /// Check if this subscription matches a given topic
    #[must_use]
    pub fn matches(&self, topic: &[u8]) -> bool {
        match self {
            Self::Prefix(prefix) => topic.starts_with(prefix),
            Self::Predicate(f) => f(topic),
            Self::Custom(matcher) => matcher.matches(topic),
        }
    }

    /// Identity used to detect re-subscription: equal prefixes, or the same
    /// predicate / matcher object.
    fn same_as(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Prefix(a), Self::Prefix(b)) => a == b,
            (Self::Predicate(a), Self::Predicate(b)) => Rc::ptr_eq(a, b),
            (Self::Custom(a), Self::Custom(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Prefix(prefix) => f.debug_tuple("Prefix").field(prefix).finish(),
            Self::Predicate(_) => f.write_str("Predicate(..)"),
            Self::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

impl From<Bytes> for Subscription {
    fn from(prefix: Bytes) -> Self {
        Self::Prefix(prefix)
    }
}

impl From<&'static str> for Subscription {
    fn from(prefix: &'static str) -> Self {
        Self::Prefix(Bytes::from_static(prefix.as_bytes()))
    }
}

impl From<&'static [u8]> for Subscription {
    fn from(prefix: &'static [u8]) -> Self {
        Self::Prefix(Bytes::from_static(prefix))
    }
}

impl From<String> for Subscription {
    fn from(prefix: String) -> Self {
        Self::Prefix(Bytes::from(prefix))
    }
}

/// Ordered subscriptions, each with an associated action `A`.
#[derive(Debug)]
pub struct SubscriptionList<A> {
    entries: Vec<(Subscription, A)>,
}

impl<A> Default for SubscriptionList<A> {
    fn default() -> Self {
        Self::new()
    }
}

impl<A> SubscriptionList<A> {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Add a subscription. Subscribing again with the same prefix (or the
    /// same predicate / matcher object) replaces its action in place and
    /// keeps its position.
    pub fn subscribe(&mut self, subscription: Subscription, action: A) {
        match self
            .entries
            .iter_mut()
            .find(|(existing, _)| existing.same_as(&subscription))
        {
            Some(entry) => entry.1 = action,
            None => self.entries.push((subscription, action)),
        }
    }

    /// Remove a prefix subscription. Returns whether one was removed.
    pub fn unsubscribe(&mut self, prefix: &[u8]) -> bool {
        let before = self.entries.len();
        self.entries
            .retain(|(sub, _)| !matches!(sub, Subscription::Prefix(p) if p == prefix));
        self.entries.len() != before
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Iterate over the registered subscriptions in order.
    pub fn subscriptions(&self) -> impl Iterator<Item = &Subscription> {
        self.entries.iter().map(|(sub, _)| sub)
    }
}

impl<A: Clone> SubscriptionList<A> {
    /// Actions of every subscription matching `topic`, in registration order.
    ///
    /// The actions are cloned out so callers can run them without holding a
    /// borrow of the list.
    #[must_use]
    pub fn matching(&self, topic: &[u8]) -> SmallVec<[A; 4]> {
        self.entries
            .iter()
            .filter(|(sub, _)| sub.matches(topic))
            .map(|(_, action)| action.clone())
            .collect()
    }
}
