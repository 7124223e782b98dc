//! zmq2 Core
//!
//! This crate contains the transport-agnostic building blocks:
//! - Error types (`error`)
//! - Endpoint parsing (`endpoint`)
//! - Socket options and HWM strategy (`options`)
//! - Reactor abstraction with a compio and a deterministic backend (`reactor`)
//! - Bounded queue helper shared by every pattern (`hwm`)
//! - Generated peer identities (`identity`)
//! - Reconnect backoff (`reconnect`)
//! - SUB-side subscription matching (`subscription`)
//! - Socket lifecycle events (`monitor`)
//! - TCP / IPC helpers (`tcp`, `ipc`)

// The tcp module needs raw fd/socket access for socket configuration
#![cfg_attr(not(test), deny(unsafe_code))]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::needless_pass_by_value)]

pub mod endpoint;
pub mod error;
pub mod hwm;
pub mod identity;
pub mod monitor;
pub mod options;
pub mod reactor;
pub mod reconnect;
pub mod socket_type;
pub mod subscription;
pub mod tcp;

#[cfg(unix)]
pub mod ipc;

/// Delimiter frame separating an envelope from a message body.
pub const EMPTY: bytes::Bytes = bytes::Bytes::new();

// Keep it minimal to avoid API lock-in.
pub mod prelude {
    pub use crate::endpoint::Endpoint;
    pub use crate::error::{Result, ZmqError};
    pub use crate::hwm::{push_to_queue, BoundedQueue};
    pub use crate::identity::{is_generated, IdentityGenerator};
    pub use crate::monitor::{SocketEvent, SocketMonitor};
    pub use crate::options::{HwmStrategy, SocketOptions, HWM_INFINITY};
    pub use crate::reactor::{CompioReactor, LocalReactor, Reactor, TimerId};
    pub use crate::reconnect::ReconnectState;
    pub use crate::socket_type::SocketType;
    pub use crate::subscription::{Subscription, SubscriptionList, TopicMatcher};
    pub use crate::EMPTY;
}
