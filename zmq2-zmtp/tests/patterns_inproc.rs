//! Pattern behaviour over the in-process transport, driven by a
//! deterministic reactor.

use bytes::Bytes;
use std::cell::{Cell, RefCell};
use std::rc::Rc;
use zmq2_core::error::ZmqError;
use zmq2_core::monitor::SocketEvent;
use zmq2_core::options::{HwmStrategy, SocketOptions};
use zmq2_core::reactor::LocalReactor;
use zmq2_zmtp::{
    BasicDealerSocket, DealerSocket, Multipart, PubSocket, RepSocket, ReqSocket, RouterSocket,
    Socket, SubSocket,
};

/// Logs to the test output when `RUST_LOG` is set.
fn init_tracing() {
    if std::env::var_os("RUST_LOG").is_some() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    }
}

fn msg(frames: &[&str]) -> Multipart {
    frames.iter().map(|f| Bytes::copy_from_slice(f.as_bytes())).collect()
}

type Inbox = Rc<RefCell<Vec<Multipart>>>;

fn inbox() -> Inbox {
    Rc::new(RefCell::new(Vec::new()))
}

fn pusher(inbox: &Inbox) -> impl Fn(Multipart) + 'static {
    let inbox = Rc::clone(inbox);
    move |m| inbox.borrow_mut().push(m)
}

#[test]
fn test_dealer_router_round_trip() {
    init_tracing();
    let reactor = Rc::new(LocalReactor::new());

    let router = RouterSocket::new(reactor.clone());
    let replier = router.clone();
    router.on_message(move |mut m| {
        m.push(Bytes::from("pong"));
        replier.send_message(m).unwrap();
    });
    router.bind("inproc://round-trip").unwrap();

    let dealer = DealerSocket::new(reactor.clone());
    let replies = inbox();
    dealer.on_message(pusher(&replies));
    dealer.connect("inproc://round-trip").unwrap();
    dealer.send_message(msg(&["ping"])).unwrap();

    reactor.run_until_idle();
    assert_eq!(*replies.borrow(), vec![msg(&["ping", "pong"])]);
    assert_eq!(router.peer_count(), 1);
    assert_eq!(dealer.peer_count(), 1);
}

#[test]
fn test_dealer_balances_over_peers() {
    init_tracing();
    let reactor = Rc::new(LocalReactor::new());
    let first = inbox();
    let second = inbox();

    let r1 = RouterSocket::new(reactor.clone());
    r1.on_message(pusher(&first));
    r1.bind("inproc://balance-1").unwrap();
    let r2 = RouterSocket::new(reactor.clone());
    r2.on_message(pusher(&second));
    r2.bind("inproc://balance-2").unwrap();

    let dealer = DealerSocket::new(reactor.clone());
    dealer.connect("inproc://balance-1").unwrap();
    dealer.connect("inproc://balance-2").unwrap();
    reactor.run_until_idle();
    assert_eq!(dealer.free_peer_count(), 2);

    for i in 0..4 {
        dealer.send_message(msg(&[i.to_string().as_str()])).unwrap();
    }
    reactor.run_until_idle();

    assert_eq!(first.borrow().len(), 2);
    assert_eq!(second.borrow().len(), 2);
}

#[test]
fn test_basic_dealer_respects_busy_threshold() {
    init_tracing();
    let reactor = Rc::new(LocalReactor::new());
    let received = inbox();
    let router = RouterSocket::new(reactor.clone());
    router.on_message(pusher(&received));
    router.bind("inproc://busy").unwrap();

    let options = SocketOptions::default().with_busy_threshold(1);
    let dealer = BasicDealerSocket::with_options(reactor.clone(), options);
    dealer.connect("inproc://busy").unwrap();
    reactor.run_until_idle();

    assert!(dealer.send_message(msg(&["1"])).unwrap());
    assert!(!dealer.send_message(msg(&["2"])).unwrap());
    assert_eq!(dealer.free_peer_count(), 0);
    assert!(dealer.send_message_even_if_busy(msg(&["3"])).unwrap());

    reactor.run_until_idle();
    assert_eq!(received.borrow().len(), 2);
    assert_eq!(dealer.free_peer_count(), 1);
}

#[test]
fn test_hwm_drop_last_and_drop_first() {
    init_tracing();
    let reactor = Rc::new(LocalReactor::new());

    let options = SocketOptions::default().with_hwm(1);
    let drop_last = DealerSocket::with_options(reactor.clone(), options.clone());
    let results: Vec<bool> = ["a", "b"]
        .iter()
        .map(|f| drop_last.send_message(msg(&[*f])).unwrap())
        .collect();
    assert_eq!(results, [true, false]);

    let drop_first = DealerSocket::with_options(
        reactor.clone(),
        options.with_hwm_strategy(HwmStrategy::DropFirst),
    );
    let cancelled = inbox();
    drop_first.on_cancel(pusher(&cancelled));
    let results: Vec<bool> = ["a", "b"]
        .iter()
        .map(|f| drop_first.send_message(msg(&[*f])).unwrap())
        .collect();
    assert_eq!(results, [true, true]);
    assert_eq!(*cancelled.borrow(), vec![msg(&["a"])]);
    assert_eq!(drop_first.queued_messages(), vec![msg(&["b"])]);
}

#[test]
fn test_lowering_hwm_trims_queues() {
    init_tracing();
    let reactor = Rc::new(LocalReactor::new());
    let dealer = DealerSocket::new(reactor.clone());
    let cancelled = inbox();
    dealer.on_cancel(pusher(&cancelled));
    for i in 1..=5 {
        dealer.send_message(msg(&[i.to_string().as_str()])).unwrap();
    }

    dealer.set_hwm(2);
    assert_eq!(dealer.hwm(), 2);
    assert_eq!(dealer.queued_messages(), vec![msg(&["1"]), msg(&["2"])]);
    assert_eq!(*cancelled.borrow(), vec![msg(&["5"]), msg(&["4"]), msg(&["3"])]);

    cancelled.borrow_mut().clear();
    dealer.set_hwm_strategy(HwmStrategy::DropFirst);
    dealer.set_hwm(1);
    assert_eq!(dealer.queued_messages(), vec![msg(&["2"])]);
    assert_eq!(*cancelled.borrow(), vec![msg(&["1"])]);
}

#[test]
fn test_router_holds_messages_for_named_peer() {
    init_tracing();
    let reactor = Rc::new(LocalReactor::new());
    let router = RouterSocket::new(reactor.clone());
    router.bind("inproc://named").unwrap();
    assert!(router.send_message(msg(&["worker", "job-1"])).unwrap());
    assert!(router.send_message(msg(&["worker", "job-2"])).unwrap());
    assert_eq!(router.queued(), 2);

    let worker = DealerSocket::with_options(
        reactor.clone(),
        SocketOptions::default().with_identity("worker"),
    );
    let jobs = inbox();
    worker.on_message(pusher(&jobs));
    worker.connect("inproc://named").unwrap();
    reactor.run_until_idle();

    assert_eq!(*jobs.borrow(), vec![msg(&["job-1"]), msg(&["job-2"])]);
    assert_eq!(router.queued(), 0);
}

fn worker(reactor: &Rc<LocalReactor>, endpoint: &str) -> (DealerSocket, Inbox) {
    let worker = DealerSocket::with_options(
        reactor.clone(),
        SocketOptions::default().with_identity("worker"),
    );
    let received = inbox();
    worker.on_message(pusher(&received));
    worker.connect(endpoint).unwrap();
    (worker, received)
}

#[test]
fn test_router_hwm_drop_last_keeps_oldest_per_identity() {
    init_tracing();
    let reactor = Rc::new(LocalReactor::new());
    let router = RouterSocket::with_options(reactor.clone(), SocketOptions::default().with_hwm(1));
    let cancelled = inbox();
    router.on_cancel(pusher(&cancelled));
    router.bind("inproc://router-hwm-last").unwrap();

    let results: Vec<bool> = ["1", "2"]
        .iter()
        .map(|f| router.send_message(msg(&["worker", f])).unwrap())
        .collect();
    assert_eq!(results, [true, false]);
    // Other identities have queues of their own.
    assert!(router.send_message(msg(&["other", "x"])).unwrap());

    let (_worker, received) = worker(&reactor, "inproc://router-hwm-last");
    reactor.run_until_idle();

    assert_eq!(*received.borrow(), vec![msg(&["1"])]);
    assert!(cancelled.borrow().is_empty());
    assert_eq!(router.queued(), 1);
}

#[test]
fn test_router_hwm_drop_first_keeps_newest_per_identity() {
    init_tracing();
    let reactor = Rc::new(LocalReactor::new());
    let options = SocketOptions::default()
        .with_hwm(1)
        .with_hwm_strategy(HwmStrategy::DropFirst);
    let router = RouterSocket::with_options(reactor.clone(), options);
    let cancelled = inbox();
    router.on_cancel(pusher(&cancelled));
    router.bind("inproc://router-hwm-first").unwrap();

    let results: Vec<bool> = ["1", "2"]
        .iter()
        .map(|f| router.send_message(msg(&["worker", f])).unwrap())
        .collect();
    assert_eq!(results, [true, true]);
    assert_eq!(*cancelled.borrow(), vec![msg(&["worker", "1"])]);

    let (_worker, received) = worker(&reactor, "inproc://router-hwm-first");
    reactor.run_until_idle();

    assert_eq!(*received.borrow(), vec![msg(&["2"])]);
    assert_eq!(router.queued(), 0);
}

/// Publisher whose single subscriber turns busy after one undelivered
/// message, so later messages land in its per-peer queue.
fn busy_pub_sub(
    reactor: &Rc<LocalReactor>,
    endpoint: &str,
    options: SocketOptions,
) -> (PubSocket, SubSocket, Inbox, Inbox) {
    let publisher = PubSocket::with_options(reactor.clone(), options.with_busy_threshold(1));
    let cancelled = inbox();
    publisher.on_cancel(pusher(&cancelled));
    publisher.bind(endpoint).unwrap();

    let subscriber = SubSocket::new(reactor.clone());
    let received = inbox();
    subscriber.subscribe("");
    subscriber.on_message(pusher(&received));
    subscriber.connect(endpoint).unwrap();
    reactor.run_until_idle();
    assert_eq!(publisher.peer_count(), 1);
    (publisher, subscriber, received, cancelled)
}

#[test]
fn test_pub_hwm_drop_last_per_peer() {
    init_tracing();
    let reactor = Rc::new(LocalReactor::new());
    let options = SocketOptions::default().with_hwm(1);
    let (publisher, _sub, received, cancelled) =
        busy_pub_sub(&reactor, "inproc://pub-hwm-last", options);

    let results: Vec<bool> = ["1", "2", "3"]
        .iter()
        .map(|f| publisher.send_message(msg(&[*f])).unwrap())
        .collect();
    assert_eq!(results, [true, true, false]);
    assert_eq!(publisher.queued(), 1);
    reactor.run_until_idle();

    assert_eq!(*received.borrow(), vec![msg(&["1"]), msg(&["2"])]);
    assert!(cancelled.borrow().is_empty());
    assert_eq!(publisher.queued(), 0);
}

#[test]
fn test_pub_hwm_drop_first_per_peer() {
    init_tracing();
    let reactor = Rc::new(LocalReactor::new());
    let options = SocketOptions::default()
        .with_hwm(1)
        .with_hwm_strategy(HwmStrategy::DropFirst);
    let (publisher, _sub, received, cancelled) =
        busy_pub_sub(&reactor, "inproc://pub-hwm-first", options);

    let results: Vec<bool> = ["1", "2", "3"]
        .iter()
        .map(|f| publisher.send_message(msg(&[*f])).unwrap())
        .collect();
    assert_eq!(results, [true, true, true]);
    assert_eq!(*cancelled.borrow(), vec![msg(&["2"])]);
    reactor.run_until_idle();

    assert_eq!(*received.borrow(), vec![msg(&["1"]), msg(&["3"])]);
}

#[test]
fn test_pub_queue_drains_in_order() {
    init_tracing();
    let reactor = Rc::new(LocalReactor::new());
    let (publisher, _sub, received, cancelled) =
        busy_pub_sub(&reactor, "inproc://pub-fifo", SocketOptions::default());

    let expected: Vec<Multipart> = (1..=20).map(|i| msg(&[i.to_string().as_str()])).collect();
    for message in &expected {
        assert!(publisher.send_message(message.clone()).unwrap());
    }
    assert_eq!(publisher.queued(), 19);
    reactor.run_until_idle();

    assert_eq!(*received.borrow(), expected);
    assert!(cancelled.borrow().is_empty());
    assert_eq!(publisher.queued(), 0);
}

#[test]
fn test_req_rep_out_of_order_replies() {
    init_tracing();
    let reactor = Rc::new(LocalReactor::new());

    let rep = RepSocket::new(reactor.clone());
    let held = Rc::new(RefCell::new(Vec::new()));
    let hold = Rc::clone(&held);
    rep.on_request(move |body, envelope| hold.borrow_mut().push((body, envelope)));
    rep.bind("inproc://req-rep").unwrap();

    let req = ReqSocket::new(reactor.clone());
    let replies = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&replies);
    req.on_reply(move |body, data, _id| sink.borrow_mut().push((body, data)));
    req.connect("inproc://req-rep").unwrap();

    let first = req.send_request(msg(&["a"]), 1).unwrap().unwrap();
    let second = req.send_request(msg(&["b"]), 2).unwrap().unwrap();
    assert_ne!(first, second);
    reactor.run_until_idle();
    assert_eq!(held.borrow().len(), 2);
    assert_eq!(req.pending_requests(), 2);

    // Answer the second request first.
    let requests: Vec<_> = held.borrow_mut().drain(..).collect();
    for (mut body, envelope) in requests.into_iter().rev() {
        body.push(Bytes::from("!"));
        assert!(rep.send_reply(body, &envelope).unwrap());
    }
    reactor.run_until_idle();

    assert_eq!(
        *replies.borrow(),
        vec![(msg(&["b", "!"]), 2), (msg(&["a", "!"]), 1)]
    );
    assert_eq!(req.pending_requests(), 0);
}

#[test]
fn test_cancelled_request_ignores_reply() {
    init_tracing();
    let reactor = Rc::new(LocalReactor::new());
    let rep = RepSocket::new(reactor.clone());
    let replier = rep.clone();
    rep.on_request(move |body, envelope| {
        replier.send_reply(body, &envelope).unwrap();
    });
    rep.bind("inproc://cancel").unwrap();

    let req: ReqSocket<&'static str> = ReqSocket::new(reactor.clone());
    let calls = Rc::new(Cell::new(0));
    let counter = Rc::clone(&calls);
    req.on_reply(move |_, _, _| counter.set(counter.get() + 1));
    req.connect("inproc://cancel").unwrap();
    reactor.run_until_idle();

    let id = req.send_request(msg(&["x"]), "data").unwrap().unwrap();
    assert_eq!(req.cancel_request(&id), Some("data"));
    reactor.run_until_idle();
    assert_eq!(calls.get(), 0);
}

#[test]
fn test_dealer_keeps_order_through_busy_periods() {
    init_tracing();
    let reactor = Rc::new(LocalReactor::new());
    let received = inbox();
    let router = RouterSocket::new(reactor.clone());
    router.on_message(pusher(&received));
    router.bind("inproc://ordering").unwrap();

    let dealer = DealerSocket::new(reactor.clone());
    dealer.connect("inproc://ordering").unwrap();
    reactor.run_until_idle();

    for i in 0..1000 {
        assert!(dealer.send_message(msg(&[i.to_string().as_str()])).unwrap());
    }
    // The connection went busy long before the loop ended.
    assert!(dealer.queued() > 0);
    reactor.run_until_idle();

    let received = received.borrow();
    assert_eq!(received.len(), 1000);
    for (i, message) in received.iter().enumerate() {
        assert_eq!(message[1], Bytes::from(i.to_string()));
    }
    assert_eq!(dealer.queued(), 0);
}

#[test]
fn test_pub_sub_filters_per_subscriber() {
    init_tracing();
    let reactor = Rc::new(LocalReactor::new());
    let publisher = PubSocket::new(reactor.clone());
    publisher.bind("inproc://pubsub").unwrap();

    let weather = inbox();
    let everything = inbox();
    let s1 = SubSocket::new(reactor.clone());
    s1.subscribe("weather");
    s1.on_message(pusher(&weather));
    s1.connect("inproc://pubsub").unwrap();
    let s2 = SubSocket::new(reactor.clone());
    s2.subscribe("");
    s2.on_message(pusher(&everything));
    s2.connect("inproc://pubsub").unwrap();
    reactor.run_until_idle();
    assert_eq!(publisher.peer_count(), 2);

    publisher.send_message(msg(&["weather.nyc", "snow"])).unwrap();
    publisher.send_message(msg(&["traffic", "jam"])).unwrap();
    reactor.run_until_idle();

    assert_eq!(*weather.borrow(), vec![msg(&["weather.nyc", "snow"])]);
    assert_eq!(
        *everything.borrow(),
        vec![msg(&["weather.nyc", "snow"]), msg(&["traffic", "jam"])]
    );
}

#[test]
fn test_close_after_writing_delivers_then_calls_back() {
    init_tracing();
    let reactor = Rc::new(LocalReactor::new());
    let received = inbox();
    let router = RouterSocket::new(reactor.clone());
    router.on_message(pusher(&received));
    router.bind("inproc://flush").unwrap();

    let dealer = DealerSocket::new(reactor.clone());
    dealer.connect("inproc://flush").unwrap();
    reactor.run_until_idle();

    for frame in ["1", "2", "3"] {
        dealer.send_message(msg(&[frame])).unwrap();
    }
    let done = Rc::new(Cell::new(false));
    let flag = Rc::clone(&done);
    dealer.close_after_writing(Box::new(move || flag.set(true)));
    assert!(dealer.is_closed());
    assert!(!done.get());

    reactor.run_until_idle();
    assert!(done.get());
    assert_eq!(received.borrow().len(), 3);
    assert_eq!(router.peer_count(), 0);
    assert!(matches!(
        dealer.send_message(msg(&["late"])),
        Err(ZmqError::SocketClosed)
    ));
}

#[test]
fn test_close_discards_queue() {
    init_tracing();
    let reactor = Rc::new(LocalReactor::new());
    let dealer = DealerSocket::new(reactor.clone());
    let cancelled = inbox();
    dealer.on_cancel(pusher(&cancelled));
    dealer.send_message(msg(&["never"])).unwrap();

    dealer.close();
    assert_eq!(dealer.queued(), 0);
    assert!(cancelled.borrow().is_empty());
    assert!(matches!(
        dealer.bind("inproc://after-close"),
        Err(ZmqError::SocketClosed)
    ));
}

#[test]
fn test_connect_to_unbound_inproc_does_not_retry() {
    init_tracing();
    let reactor = Rc::new(LocalReactor::new());
    let dealer = DealerSocket::new(reactor.clone());
    let monitor = dealer.monitor();
    dealer.connect("inproc://nobody-home").unwrap();
    reactor.run_until_idle();

    assert_eq!(dealer.peer_count(), 0);
    assert_eq!(reactor.pending_timers(), 0);
    let events: Vec<SocketEvent> = monitor.try_iter().collect();
    assert!(events
        .iter()
        .any(|e| matches!(e, SocketEvent::Disconnected(_))));
    assert!(!events
        .iter()
        .any(|e| matches!(e, SocketEvent::ReconnectScheduled { .. })));
}

#[test]
fn test_inproc_name_conflicts() {
    init_tracing();
    let reactor = Rc::new(LocalReactor::new());
    let a = RouterSocket::new(reactor.clone());
    let b = RouterSocket::new(reactor.clone());
    a.bind("inproc://shared").unwrap();
    // Same socket again is fine.
    a.bind("inproc://shared").unwrap();
    assert!(matches!(
        b.bind("inproc://shared"),
        Err(ZmqError::AlreadyBound(_))
    ));

    a.close();
    b.bind("inproc://shared").unwrap();
}

#[test]
fn test_monitor_reports_lifecycle() {
    init_tracing();
    let reactor = Rc::new(LocalReactor::new());
    let router = RouterSocket::new(reactor.clone());
    let monitor = router.monitor();
    router.bind("inproc://monitored").unwrap();

    let dealer = DealerSocket::with_options(
        reactor.clone(),
        SocketOptions::default().with_identity("d1"),
    );
    dealer.connect("inproc://monitored").unwrap();
    reactor.run_until_idle();
    dealer.close();
    reactor.run_until_idle();
    router.close();
    reactor.run_until_idle();

    let events: Vec<SocketEvent> = monitor.try_iter().collect();
    assert!(matches!(events.first(), Some(SocketEvent::Bound(_))));
    assert!(events
        .iter()
        .any(|e| matches!(e, SocketEvent::PeerRegistered(id) if id.as_ref() == b"d1")));
    assert!(events
        .iter()
        .any(|e| matches!(e, SocketEvent::PeerUnregistered(id) if id.as_ref() == b"d1")));
    assert!(matches!(events.last(), Some(SocketEvent::Closed)));
}
