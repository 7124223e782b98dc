//! Sockets over real TCP and IPC streams, driven by the compio runtime.

use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::time::Duration;

use zmq2::prelude::*;

const POLL: Duration = Duration::from_millis(10);
const ATTEMPTS: usize = 300;

/// Poll `cond` until it holds or about three seconds pass.
async fn wait_until(cond: impl Fn() -> bool) -> bool {
    for _ in 0..ATTEMPTS {
        if cond() {
            return true;
        }
        compio::time::sleep(POLL).await;
    }
    cond()
}

fn tcp_endpoint() -> String {
    let port = portpicker::pick_unused_port().expect("no free port");
    format!("tcp://127.0.0.1:{port}")
}

fn collector() -> (Rc<RefCell<Vec<Multipart>>>, impl Fn(Multipart) + 'static) {
    let seen = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&seen);
    (seen, move |msg| sink.borrow_mut().push(msg))
}

#[compio::test]
async fn test_dealer_router_echo_over_tcp() {
    zmq2::dev_tracing::init_tracing();
    let reactor = CompioReactor::shared();
    let endpoint = tcp_endpoint();

    let router = RouterSocket::new(reactor.clone());
    let echo = router.clone();
    let (requests, record) = collector();
    router.on_message(move |msg| {
        record(msg.clone());
        echo.send_message(msg).unwrap();
    });
    router.bind(&endpoint).unwrap();

    let options = SocketOptions::default().with_identity("client");
    let dealer = DealerSocket::with_options(reactor.clone(), options);
    let (replies, record) = collector();
    dealer.on_message(record);
    dealer.connect(&endpoint).unwrap();

    assert!(dealer.send_message(vec![Bytes::from("hello")]).unwrap());
    assert!(wait_until(|| replies.borrow().len() == 1).await);

    assert_eq!(
        *requests.borrow(),
        vec![vec![Bytes::from("client"), Bytes::from("hello")]]
    );
    assert_eq!(*replies.borrow(), vec![vec![Bytes::from("hello")]]);
    assert_eq!(router.peer_count(), 1);

    dealer.close();
    router.close();
}

#[cfg(unix)]
#[compio::test]
async fn test_req_rep_over_ipc() {
    zmq2::dev_tracing::init_tracing();
    let reactor = CompioReactor::shared();
    let path = std::env::temp_dir().join(format!("zmq2-req-rep-{}.ipc", std::process::id()));
    let endpoint = format!("ipc://{}", path.display());

    let rep = RepSocket::new(reactor.clone());
    let replier = rep.clone();
    rep.on_request(move |mut body, envelope| {
        body.push(Bytes::from("done"));
        replier.send_reply(body, &envelope).unwrap();
    });
    rep.bind(&endpoint).unwrap();

    let req = ReqSocket::new(reactor.clone());
    let replies = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&replies);
    req.on_reply(move |reply, tag: &'static str, _id| sink.borrow_mut().push((tag, reply)));
    req.connect(&endpoint).unwrap();
    assert!(wait_until(|| req.peer_count() == 1).await);

    assert!(req.send_request(vec![Bytes::from("a")], "first").unwrap().is_some());
    assert!(req.send_request(vec![Bytes::from("b")], "second").unwrap().is_some());
    assert!(wait_until(|| replies.borrow().len() == 2).await);

    let mut got = replies.borrow().clone();
    got.sort_by_key(|(tag, _)| *tag);
    assert_eq!(
        got,
        vec![
            ("first", vec![Bytes::from("a"), Bytes::from("done")]),
            ("second", vec![Bytes::from("b"), Bytes::from("done")]),
        ]
    );
    assert_eq!(req.pending_requests(), 0);

    req.close();
    rep.close();
    assert!(!path.exists());
}

#[compio::test]
async fn test_dealer_reconnects_until_router_binds() {
    zmq2::dev_tracing::init_tracing();
    let reactor = CompioReactor::shared();
    let endpoint = tcp_endpoint();

    let dealer = DealerSocket::new(reactor.clone());
    let monitor = dealer.monitor();
    dealer.connect(&endpoint).unwrap();
    // Nobody listening yet: the message waits in the dealer's queue.
    assert!(dealer.send_message(vec![Bytes::from("early")]).unwrap());

    let retried = wait_until(|| {
        monitor
            .try_iter()
            .any(|event| matches!(event, SocketEvent::ReconnectScheduled { .. }))
    })
    .await;
    assert!(retried);
    assert_eq!(dealer.queued(), 1);

    let router = RouterSocket::new(reactor.clone());
    let (seen, record) = collector();
    router.on_message(record);
    router.bind(&endpoint).unwrap();

    assert!(wait_until(|| seen.borrow().len() == 1).await);
    assert_eq!(seen.borrow()[0][1], Bytes::from("early"));
    assert_eq!(dealer.queued(), 0);

    dealer.close();
    router.close();
}

#[compio::test]
async fn test_pub_sub_over_tcp() {
    zmq2::dev_tracing::init_tracing();
    let reactor = CompioReactor::shared();
    let endpoint = tcp_endpoint();

    let publisher = PubSocket::new(reactor.clone());
    publisher.bind(&endpoint).unwrap();

    let subscriber = SubSocket::new(reactor.clone());
    let (seen, record) = collector();
    subscriber.on_message(record);
    subscriber.subscribe("metrics.");
    subscriber.connect(&endpoint).unwrap();
    assert!(wait_until(|| publisher.peer_count() == 1).await);

    for topic in ["metrics.cpu", "logs.app", "metrics.mem"] {
        assert!(publisher.send_message(vec![Bytes::from(topic), Bytes::from("1")]).unwrap());
    }
    assert!(wait_until(|| seen.borrow().len() == 2).await);

    let topics: Vec<Bytes> = seen.borrow().iter().map(|m| m[0].clone()).collect();
    assert_eq!(topics, vec![Bytes::from("metrics.cpu"), Bytes::from("metrics.mem")]);

    subscriber.close();
    publisher.close();
}

#[compio::test]
async fn test_close_after_writing_flushes_over_tcp() {
    zmq2::dev_tracing::init_tracing();
    let reactor = CompioReactor::shared();
    let endpoint = tcp_endpoint();

    let router = RouterSocket::new(reactor.clone());
    let (seen, record) = collector();
    router.on_message(record);
    router.bind(&endpoint).unwrap();

    let dealer = DealerSocket::new(reactor.clone());
    dealer.connect(&endpoint).unwrap();
    assert!(wait_until(|| dealer.peer_count() == 1).await);

    for i in 0..100 {
        dealer.send_message(vec![Bytes::from(i.to_string())]).unwrap();
    }
    let closed = Rc::new(Cell::new(false));
    let flag = Rc::clone(&closed);
    dealer.close_after_writing(Box::new(move || flag.set(true)));

    assert!(wait_until(|| closed.get()).await);
    assert!(wait_until(|| seen.borrow().len() == 100).await);
    let bodies: Vec<Bytes> = seen.borrow().iter().map(|m| m[1].clone()).collect();
    let expected: Vec<Bytes> = (0..100).map(|i| Bytes::from(i.to_string())).collect();
    assert_eq!(bodies, expected);
    assert!(matches!(
        dealer.send_message(vec![Bytes::from("late")]),
        Err(ZmqError::SocketClosed)
    ));

    router.close();
}

#[compio::test]
async fn test_malformed_frame_reported_on_monitor() {
    use compio::buf::BufResult;
    use compio::io::AsyncWriteExt;

    zmq2::dev_tracing::init_tracing();
    let reactor = CompioReactor::shared();
    let endpoint = tcp_endpoint();

    let router = RouterSocket::new(reactor.clone());
    let monitor = router.monitor();
    router.bind(&endpoint).unwrap();

    let addr = endpoint.trim_start_matches("tcp://");
    let mut stream = compio::net::TcpStream::connect(addr).await.unwrap();
    // A zero length prefix can never start a valid frame.
    let BufResult(written, _) = stream.write_all(vec![0u8, 0u8]).await;
    written.unwrap();

    let reported = wait_until(|| {
        monitor
            .try_iter()
            .any(|event| matches!(event, SocketEvent::ProtocolError(ref reason) if reason.contains("zero length")))
    })
    .await;
    assert!(reported);
    assert_eq!(router.peer_count(), 0);

    router.close();
}
