//! Reactor abstraction.
//!
//! Sockets never block: every deferred step (peer-free notifications,
//! in-process delivery continuations, reconnect timers, close completion) is
//! handed to a [`Reactor`] and runs in a later callback turn.
//!
//! Two backends are provided:
//! - [`CompioReactor`] spawns onto the current compio runtime. Stream
//!   transports (TCP, IPC) need it.
//! - [`LocalReactor`] is a manually driven queue with a virtual clock. It is
//!   deterministic, which makes it the backend of choice for in-process
//!   sockets and tests.

use hashbrown::HashSet;
use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::rc::Rc;
use std::time::Duration;
use tracing::trace;

/// A unit of deferred work.
pub type Task = Box<dyn FnOnce()>;

/// Handle to a pending timer, used to cancel it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerId(u64);

/// Scheduling primitives the sockets rely on.
pub trait Reactor {
    /// Run `task` on the next scheduling opportunity, after the current
    /// callback turn has finished.
    fn next_tick(&self, task: Task);

    /// Run `task` once `delay` has elapsed, unless cancelled first.
    fn add_timer(&self, delay: Duration, task: Task) -> TimerId;

    /// Cancel a pending timer. Cancelling a fired or unknown timer is a no-op.
    fn cancel_timer(&self, timer: TimerId);
}

/// Reactor backed by the compio runtime of the current thread.
///
/// Must be used from inside a compio runtime (e.g. `#[compio::main]`).
#[derive(Clone, Default)]
pub struct CompioReactor {
    timers: Rc<TimerTable>,
}

#[derive(Default)]
struct TimerTable {
    next_id: Cell<u64>,
    live: RefCell<HashSet<TimerId>>,
}

impl CompioReactor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Convenience constructor returning the reactor as a trait object.
    pub fn shared() -> Rc<dyn Reactor> {
        Rc::new(Self::new())
    }
}

impl fmt::Debug for CompioReactor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompioReactor")
            .field("pending_timers", &self.timers.live.borrow().len())
            .finish()
    }
}

impl Reactor for CompioReactor {
    fn next_tick(&self, task: Task) {
        compio::runtime::spawn(async move { task() }).detach();
    }

    fn add_timer(&self, delay: Duration, task: Task) -> TimerId {
        let id = TimerId(self.timers.next_id.get());
        self.timers.next_id.set(id.0 + 1);
        self.timers.live.borrow_mut().insert(id);

        let timers = Rc::clone(&self.timers);
        compio::runtime::spawn(async move {
            compio::time::sleep(delay).await;
            // Cancelled timers were removed from the live set.
            let armed = timers.live.borrow_mut().remove(&id);
            if armed {
                task();
            }
        })
        .detach();
        id
    }

    fn cancel_timer(&self, timer: TimerId) {
        self.timers.live.borrow_mut().remove(&timer);
    }
}

/// Deterministic, manually driven reactor.
///
/// Nothing runs until [`run_until_idle`](Self::run_until_idle) or
/// [`advance`](Self::advance) is called. Time is virtual and only moves
/// through `advance`.
///
/// ```
/// use std::cell::Cell;
/// use std::rc::Rc;
/// use std::time::Duration;
/// use zmq2_core::reactor::{LocalReactor, Reactor};
///
/// let reactor = LocalReactor::new();
/// let fired = Rc::new(Cell::new(0));
///
/// let f = fired.clone();
/// reactor.add_timer(Duration::from_millis(30), Box::new(move || f.set(f.get() + 1)));
/// reactor.run_until_idle();
/// assert_eq!(fired.get(), 0);
///
/// reactor.advance(Duration::from_millis(30));
/// assert_eq!(fired.get(), 1);
/// ```
#[derive(Default)]
pub struct LocalReactor {
    now: Cell<Duration>,
    next_id: Cell<u64>,
    ticks: RefCell<VecDeque<Task>>,
    timers: RefCell<BTreeMap<(Duration, TimerId), Task>>,
}

impl LocalReactor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current virtual time.
    pub fn now(&self) -> Duration {
        self.now.get()
    }

    pub fn pending_ticks(&self) -> usize {
        self.ticks.borrow().len()
    }

    pub fn pending_timers(&self) -> usize {
        self.timers.borrow().len()
    }

    /// Run the tasks queued so far. Tasks they schedule wait for the next
    /// turn. Returns the number of tasks run.
    pub fn turn(&self) -> usize {
        let batch = std::mem::take(&mut *self.ticks.borrow_mut());
        let ran = batch.len();
        for task in batch {
            task();
        }
        ran
    }

    /// Run queued tasks, including the ones they schedule, until the tick
    /// queue is empty. Timers do not fire. Returns the number of tasks run.
    pub fn run_until_idle(&self) -> usize {
        let mut ran = 0;
        loop {
            // The borrow ends before the task runs so it can schedule more.
            let next = self.ticks.borrow_mut().pop_front();
            match next {
                Some(task) => {
                    task();
                    ran += 1;
                }
                None => return ran,
            }
        }
    }

    /// Move virtual time forward by `by`, firing due timers in deadline order
    /// and draining the tick queue after each. Returns the number of tasks
    /// and timers run.
    pub fn advance(&self, by: Duration) -> usize {
        let target = self.now.get() + by;
        let mut ran = self.run_until_idle();
        loop {
            let due = {
                let mut timers = self.timers.borrow_mut();
                let earliest = timers.first_key_value().map(|(key, _)| *key);
                match earliest {
                    Some(key) if key.0 <= target => timers.remove(&key).map(|task| (key.0, task)),
                    _ => None,
                }
            };
            let Some((deadline, task)) = due else { break };
            trace!(?deadline, "[LocalReactor] timer fired");
            self.now.set(deadline);
            task();
            ran += 1 + self.run_until_idle();
        }
        self.now.set(target);
        ran
    }
}

impl fmt::Debug for LocalReactor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalReactor")
            .field("now", &self.now.get())
            .field("pending_ticks", &self.pending_ticks())
            .field("pending_timers", &self.pending_timers())
            .finish()
    }
}

impl Reactor for LocalReactor {
    fn next_tick(&self, task: Task) {
        self.ticks.borrow_mut().push_back(task);
    }

    fn add_timer(&self, delay: Duration, task: Task) -> TimerId {
        let id = TimerId(self.next_id.get());
        self.next_id.set(id.0 + 1);
        self.timers
            .borrow_mut()
            .insert((self.now.get() + delay, id), task);
        id
    }

    fn cancel_timer(&self, timer: TimerId) {
        self.timers.borrow_mut().retain(|(_, id), _| *id != timer);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ticks_run_in_order_including_nested() {
        let reactor = Rc::new(LocalReactor::new());
        let log = Rc::new(RefCell::new(Vec::new()));

        let (r, l) = (reactor.clone(), log.clone());
        reactor.next_tick(Box::new(move || {
            l.borrow_mut().push(1);
            let l2 = l.clone();
            r.next_tick(Box::new(move || l2.borrow_mut().push(3)));
        }));
        let l = log.clone();
        reactor.next_tick(Box::new(move || l.borrow_mut().push(2)));

        assert_eq!(reactor.run_until_idle(), 3);
        assert_eq!(*log.borrow(), vec![1, 2, 3]);
    }

    #[test]
    fn test_turn_defers_nested_ticks() {
        let reactor = Rc::new(LocalReactor::new());
        let count = Rc::new(Cell::new(0));

        let (r, c) = (reactor.clone(), count.clone());
        reactor.next_tick(Box::new(move || {
            c.set(c.get() + 1);
            let c2 = c.clone();
            r.next_tick(Box::new(move || c2.set(c2.get() + 1)));
        }));

        assert_eq!(reactor.turn(), 1);
        assert_eq!(count.get(), 1);
        assert_eq!(reactor.pending_ticks(), 1);
        assert_eq!(reactor.turn(), 1);
        assert_eq!(count.get(), 2);
    }

    #[test]
    fn test_timers_fire_by_deadline() {
        let reactor = LocalReactor::new();
        let log = Rc::new(RefCell::new(Vec::new()));

        let l = log.clone();
        reactor.add_timer(Duration::from_millis(20), Box::new(move || l.borrow_mut().push("late")));
        let l = log.clone();
        reactor.add_timer(Duration::from_millis(10), Box::new(move || l.borrow_mut().push("early")));

        reactor.advance(Duration::from_millis(15));
        assert_eq!(*log.borrow(), vec!["early"]);
        assert_eq!(reactor.now(), Duration::from_millis(15));

        reactor.advance(Duration::from_millis(5));
        assert_eq!(*log.borrow(), vec!["early", "late"]);
    }

    #[test]
    fn test_cancelled_timer_does_not_fire() {
        let reactor = LocalReactor::new();
        let fired = Rc::new(Cell::new(false));

        let f = fired.clone();
        let id = reactor.add_timer(Duration::from_millis(5), Box::new(move || f.set(true)));
        reactor.cancel_timer(id);
        assert_eq!(reactor.pending_timers(), 0);

        reactor.advance(Duration::from_secs(1));
        assert!(!fired.get());
    }

    #[compio::test]
    async fn test_compio_timer_cancel() {
        let reactor = CompioReactor::new();
        let (tx, rx) = flume::unbounded();

        let cancelled_tx = tx.clone();
        let cancelled = reactor.add_timer(
            Duration::from_millis(5),
            Box::new(move || {
                let _ = cancelled_tx.send("cancelled");
            }),
        );
        reactor.add_timer(
            Duration::from_millis(10),
            Box::new(move || {
                let _ = tx.send("fired");
            }),
        );
        reactor.cancel_timer(cancelled);

        let first = compio::time::timeout(Duration::from_secs(2), rx.recv_async())
            .await
            .expect("timer never fired")
            .unwrap();
        assert_eq!(first, "fired");
        // Both senders are gone once the live timer ran and the cancelled one was dropped.
        let rest = compio::time::timeout(Duration::from_secs(2), rx.recv_async())
            .await
            .expect("cancelled timer task never finished");
        assert!(rest.is_err());
        assert_eq!(format!("{reactor:?}"), "CompioReactor { pending_timers: 0 }");
    }
}
