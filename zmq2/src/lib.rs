//! # zmq2
//!
//! ZeroMQ 2.x sockets speaking ZMTP 1.0, without libzmq.
//!
//! ## Architecture
//!
//! - **`zmq2-core`**: errors, endpoints, options, reactors, queue limits,
//!   identities, reconnect backoff, subscriptions, monitor events
//! - **`zmq2-zmtp`**: frame codec, connections, socket engine and the six
//!   patterns
//! - **`zmq2`**: public API surface (this crate)
//!
//! ## Patterns
//!
//! | socket | sends | receives |
//! |---|---|---|
//! | [`DealerSocket`] / [`BasicDealerSocket`] | round-robin over free peers | from any peer |
//! | [`RouterSocket`] | to the peer named by the first frame | tagged with the peer identity |
//! | [`ReqSocket`] | requests tagged with a generated id | replies matched to their request |
//! | [`RepSocket`] | replies along the request envelope | requests split into body and envelope |
//! | [`PubSocket`] | to every peer | nothing |
//! | [`SubSocket`] | nothing | messages matching a subscription |
//!
//! Sockets are `Rc` handles living on one thread. Everything is driven by a
//! [`Reactor`]: [`CompioReactor`] inside a compio runtime for `tcp://` and
//! `ipc://` endpoints, [`LocalReactor`] for `inproc://` setups and tests.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use zmq2::prelude::*;
//!
//! #[compio::main]
//! async fn main() -> Result<()> {
//!     let reactor = CompioReactor::shared();
//!
//!     let rep = RepSocket::new(reactor.clone());
//!     let replier = rep.clone();
//!     rep.on_request(move |body, envelope| {
//!         let _ = replier.send_reply(body, &envelope);
//!     });
//!     rep.bind("tcp://127.0.0.1:5555")?;
//!
//!     let req = ReqSocket::new(reactor.clone());
//!     req.on_reply(|reply, attempt: u32, _id| println!("attempt {attempt}: {reply:?}"));
//!     req.connect("tcp://127.0.0.1:5555")?;
//!     req.send_request(vec![Bytes::from("ping")], 1)?;
//!
//!     compio::time::sleep(std::time::Duration::from_millis(100)).await;
//!     Ok(())
//! }
//! ```
//!
//! ## Logging
//!
//! Sockets log through `tracing`. Call [`dev_tracing::init_tracing`] and set
//! `RUST_LOG=zmq2_zmtp=debug` to see connection and routing events.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod dev_tracing;

// Re-export core types
pub use bytes::Bytes;

pub use zmq2_core::endpoint::Endpoint;
pub use zmq2_core::error::{Result, ZmqError};
pub use zmq2_core::monitor::{SocketEvent, SocketMonitor};
pub use zmq2_core::options::{HwmStrategy, SocketOptions, DEFAULT_MAX_FRAME_SIZE, HWM_INFINITY};
pub use zmq2_core::reactor::{CompioReactor, LocalReactor, Reactor, TimerId};
pub use zmq2_core::socket_type::SocketType;
pub use zmq2_core::subscription::Subscription;
pub use zmq2_core::EMPTY;

pub use zmq2_zmtp::codec;
pub use zmq2_zmtp::{
    BasicDealerSocket, BasicRepSocket, BasicReqSocket, BasicRouterSocket, DealerSocket,
    Multipart, PubSocket, ReplyFuture, RepSocket, ReqSocket, RequestId, RouterSocket, Socket,
    SubSocket,
};

/// Convenient imports.
///
/// ```rust
/// use zmq2::prelude::*;
///
/// // DealerSocket, RouterSocket, ReqSocket, RepSocket, PubSocket, SubSocket,
/// // the Socket trait, reactors, options, errors and Bytes.
/// let reactor = std::rc::Rc::new(LocalReactor::new());
/// let dealer = DealerSocket::new(reactor.clone());
/// assert_eq!(dealer.socket_type(), SocketType::Dealer);
/// ```
pub mod prelude {
    pub use super::{
        BasicDealerSocket, BasicRepSocket, BasicReqSocket, BasicRouterSocket, Bytes,
        CompioReactor, DealerSocket, HwmStrategy, LocalReactor, Multipart, PubSocket, Reactor,
        RepSocket, ReqSocket, Result, RouterSocket, Socket, SocketEvent, SocketOptions,
        SocketType, SubSocket, ZmqError, EMPTY,
    };
}
