//! # zmq2 ZMTP
//!
//! ZeroMQ 2.x (ZMTP 1.0) socket patterns on a single-threaded event loop.
//!
//! ## Overview
//!
//! - **DEALER**: round-robin over free peers, with ([`DealerSocket`]) or
//!   without ([`BasicDealerSocket`]) an outgoing queue
//! - **ROUTER**: identity-addressed messages, with per-peer queues
//!   ([`RouterSocket`]) or without ([`BasicRouterSocket`])
//! - **REQ**: any number of outstanding requests, replies matched by id
//!   and delivered to a handler, a per-request callback or a future
//! - **REP**: envelope-aware replies, queued or not
//! - **PUB** / **SUB**: fan-out with subscriber-side filtering
//!
//! Sockets are cheap `Rc` handles and deliver messages through callbacks.
//! They run on a [`Reactor`](zmq2_core::reactor::Reactor): use
//! `CompioReactor` inside a compio runtime for TCP and IPC, or the
//! deterministic `LocalReactor` for in-process sockets and tests.
//!
//! ## Quick Start
//!
//! ```rust
//! use std::rc::Rc;
//! use bytes::Bytes;
//! use zmq2_core::reactor::LocalReactor;
//! use zmq2_zmtp::{DealerSocket, RouterSocket, Socket};
//!
//! let reactor = Rc::new(LocalReactor::new());
//!
//! let router = RouterSocket::new(reactor.clone());
//! router.on_message(|msg| println!("from {:?}: {:?}", msg[0], &msg[1..]));
//! router.bind("inproc://quick-start").unwrap();
//!
//! let dealer = DealerSocket::new(reactor.clone());
//! dealer.connect("inproc://quick-start").unwrap();
//! dealer.send_message(vec![Bytes::from("Hello!")]).unwrap();
//!
//! reactor.run_until_idle();
//! ```
//!
//! ## Flow control
//!
//! A connection with too many messages waiting to be written is *busy*.
//! Busy peers are skipped by round-robin patterns until they drain, and
//! messages for them wait in the socket's queues, bounded by the high water
//! mark (`hwm`) and its strategy (`DropLast` refuses new messages,
//! `DropFirst` evicts the oldest).

#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::needless_pass_by_value)]
#![allow(clippy::missing_errors_doc)]

// Internal modules (not part of public API)
mod base;
mod queueing;
mod stream;

// Public protocol types
pub mod codec;
pub mod connection;
pub mod inproc;
pub mod socket_trait;

// Socket implementations
pub mod dealer;
pub mod publisher;
pub mod rep;
pub mod req;
pub mod router;
pub mod subscriber;

// Re-export socket types for clean API
pub use codec::Multipart;
pub use dealer::{BasicDealerSocket, DealerSocket};
pub use publisher::PubSocket;
pub use rep::{BasicRepSocket, RepSocket};
pub use req::{BasicReqSocket, ReplyFuture, ReqSocket, RequestId};
pub use router::{BasicRouterSocket, RouterSocket};
pub use socket_trait::Socket;
pub use subscriber::SubSocket;
