//! Bounded queue helper shared by every socket pattern.
//!
//! Patterns keep their pending messages in different containers (a plain
//! FIFO, a FIFO per peer, a FIFO keyed by request id). [`BoundedQueue`] is
//! the common surface and [`push_to_queue`] applies the high water mark to it.

use std::collections::VecDeque;

use crate::options::HwmStrategy;

/// FIFO container the high water mark can be applied to.
pub trait BoundedQueue {
    type Item;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn front(&self) -> Option<&Self::Item>;

    fn push_back(&mut self, item: Self::Item);

    fn pop_front(&mut self) -> Option<Self::Item>;

    fn pop_back(&mut self) -> Option<Self::Item>;

    fn clear(&mut self);
}

impl<T> BoundedQueue for VecDeque<T> {
    type Item = T;

    fn len(&self) -> usize {
        VecDeque::len(self)
    }

    fn front(&self) -> Option<&T> {
        VecDeque::front(self)
    }

    fn push_back(&mut self, item: T) {
        VecDeque::push_back(self, item);
    }

    fn pop_front(&mut self) -> Option<T> {
        VecDeque::pop_front(self)
    }

    fn pop_back(&mut self) -> Option<T> {
        VecDeque::pop_back(self)
    }

    fn clear(&mut self) {
        VecDeque::clear(self);
    }
}

/// Applies the high water mark to `queue`, optionally appending `item`.
///
/// Returns whether `item` was accepted; with no item it returns `true`.
/// Every message removed from the queue to honour the limit is handed to
/// `evicted`. After the call `queue.len() <= hwm`.
///
/// - [`HwmStrategy::DropLast`]: an over-limit queue is trimmed from the tail.
///   The new item is appended only if the queue is below `hwm`.
/// - [`HwmStrategy::DropFirst`]: the oldest entries are evicted from the head
///   until there is room, then the item is appended. With `hwm == 0` nothing
///   fits and the item is rejected.
///
/// # Examples
///
/// ```
/// use std::collections::VecDeque;
/// use zmq2_core::hwm::push_to_queue;
/// use zmq2_core::options::HwmStrategy;
///
/// let mut queue = VecDeque::new();
/// let mut cancelled = Vec::new();
///
/// assert!(push_to_queue(&mut queue, Some("a"), 1, HwmStrategy::DropFirst, |m| cancelled.push(m)));
/// assert!(push_to_queue(&mut queue, Some("b"), 1, HwmStrategy::DropFirst, |m| cancelled.push(m)));
/// assert_eq!(queue, ["b"]);
/// assert_eq!(cancelled, ["a"]);
/// ```
pub fn push_to_queue<Q, F>(
    queue: &mut Q,
    item: Option<Q::Item>,
    hwm: usize,
    strategy: HwmStrategy,
    mut evicted: F,
) -> bool
where
    Q: BoundedQueue + ?Sized,
    F: FnMut(Q::Item),
{
    match strategy {
        HwmStrategy::DropLast => {
            while queue.len() > hwm {
                match queue.pop_back() {
                    Some(old) => evicted(old),
                    None => break,
                }
            }
            match item {
                Some(item) if queue.len() < hwm => {
                    queue.push_back(item);
                    true
                }
                Some(_) => false,
                None => true,
            }
        }
        HwmStrategy::DropFirst => {
            let room_for = if item.is_some() {
                hwm.saturating_sub(1)
            } else {
                hwm
            };
            while queue.len() > room_for {
                match queue.pop_front() {
                    Some(old) => evicted(old),
                    None => break,
                }
            }
            match item {
                Some(_) if hwm == 0 => false,
                Some(item) => {
                    queue.push_back(item);
                    true
                }
                None => true,
            }
        }
    }
}
