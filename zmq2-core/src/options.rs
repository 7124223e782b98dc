//! Socket configuration options
//!
//! Configuration for zmq2 sockets, modelled on the ZeroMQ 2.x socket options
//! (`ZMQ_IDENTITY`, `ZMQ_HWM`, `ZMQ_RECONNECT_IVL`, ...).

use bytes::Bytes;
use std::time::Duration;

/// Default high water mark: large enough to behave as "unbounded".
pub const HWM_INFINITY: usize = 1 << 20;

/// Default limit on a single frame's payload: 64 MiB.
pub const DEFAULT_MAX_FRAME_SIZE: usize = 64 << 20;

/// What a full queue does with the next message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum HwmStrategy {
    /// Reject the new message; the queue keeps its oldest entries.
    #[default]
    DropLast,
    /// Evict the oldest queued messages to make room for the new one.
    DropFirst,
}

/// Socket configuration options.
///
/// # Examples
///
/// ```
/// use zmq2_core::options::{HwmStrategy, SocketOptions};
/// use std::time::Duration;
///
/// let opts = SocketOptions::default()
///     .with_identity("worker-1")
///     .with_hwm(100)
///     .with_hwm_strategy(HwmStrategy::DropFirst)
///     .with_reconnect_ivl(Duration::from_millis(50));
/// assert_eq!(opts.hwm, 100);
/// ```
#[derive(Debug, Clone)]
pub struct SocketOptions {
    /// Socket identity (ZMQ_IDENTITY)
    ///
    /// Sent to every peer during the identity handshake. Empty means
    /// anonymous: the peer assigns a generated identity.
    pub identity: Bytes,

    /// High water mark (ZMQ_HWM)
    ///
    /// Maximum number of messages held in any single pending queue.
    /// - Default: [`HWM_INFINITY`]
    pub hwm: usize,

    /// Behaviour when a queue reaches `hwm`.
    pub hwm_strategy: HwmStrategy,

    /// Reconnect interval (ZMQ_RECONNECT_IVL)
    ///
    /// Delay before re-dialing a connect-initiated endpoint after it drops.
    /// - Default: 30ms
    pub reconnect_ivl: Duration,

    /// Maximum reconnect interval (ZMQ_RECONNECT_IVL_MAX)
    ///
    /// - Default: 0 (fixed delay of `reconnect_ivl`)
    /// - When larger than `reconnect_ivl`: doubles the delay per failed
    ///   attempt up to this value
    pub reconnect_ivl_max: Duration,

    /// Linger timeout (ZMQ_LINGER)
    ///
    /// Upper bound on how long `close_after_writing` waits for peers to
    /// drain before aborting the remaining connections.
    /// - `None`: wait indefinitely
    pub linger: Option<Duration>,

    /// Number of unwritten messages after which a connection reports busy.
    /// - Default: 16
    pub busy_threshold: usize,

    /// Read buffer size (bytes) for stream transports.
    /// - Default: 8192 (8KB)
    pub read_buffer_size: usize,

    /// Disable Nagle's algorithm on TCP connections.
    pub tcp_nodelay: bool,

    /// Maximum accepted frame size (ZMQ_MAXMSGSIZE)
    ///
    /// - Default: [`DEFAULT_MAX_FRAME_SIZE`]
    /// - `Some(size)`: Larger frames are malformed and close the stream
    /// - `None`: No limit, a peer may announce any length
    pub max_frame_size: Option<usize>,

    /// Initial subscriptions for SUB sockets (ZMQ_SUBSCRIBE)
    pub subscribe: Vec<Bytes>,
}

impl Default for SocketOptions {
    fn default() -> Self {
        Self {
            identity: Bytes::new(),
            hwm: HWM_INFINITY,
            hwm_strategy: HwmStrategy::DropLast,
            reconnect_ivl: Duration::from_millis(30),
            reconnect_ivl_max: Duration::ZERO,
            linger: Some(Duration::from_secs(30)),
            busy_threshold: 16,
            read_buffer_size: 8192,
            tcp_nodelay: true,
            max_frame_size: Some(DEFAULT_MAX_FRAME_SIZE),
            subscribe: Vec::new(),
        }
    }
}

impl SocketOptions {
    /// Create new socket options with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the socket identity.
    pub fn with_identity(mut self, identity: impl Into<Bytes>) -> Self {
        self.identity = identity.into();
        self
    }

    /// Set the high water mark.
    pub fn with_hwm(mut self, hwm: usize) -> Self {
        self.hwm = hwm;
        self
    }

    /// Set the high water mark strategy.
    pub fn with_hwm_strategy(mut self, strategy: HwmStrategy) -> Self {
        self.hwm_strategy = strategy;
        self
    }

    /// Set reconnection interval.
    pub fn with_reconnect_ivl(mut self, ivl: Duration) -> Self {
        self.reconnect_ivl = ivl;
        self
    }

    /// Set maximum reconnection interval for exponential backoff.
    pub fn with_reconnect_ivl_max(mut self, max: Duration) -> Self {
        self.reconnect_ivl_max = max;
        self
    }

    /// Set linger timeout.
    pub fn with_linger(mut self, linger: Option<Duration>) -> Self {
        self.linger = linger;
        self
    }

    /// Set the busy threshold.
    ///
    /// # Examples
    ///
    /// ```
    /// use zmq2_core::options::SocketOptions;
    ///
    /// // Report busy as soon as a single message is waiting to be written
    /// let opts = SocketOptions::new().with_busy_threshold(1);
    /// assert_eq!(opts.busy_threshold, 1);
    /// ```
    pub fn with_busy_threshold(mut self, threshold: usize) -> Self {
        self.busy_threshold = threshold.max(1);
        self
    }

    /// Set read buffer size.
    pub fn with_read_buffer_size(mut self, size: usize) -> Self {
        self.read_buffer_size = size.max(1);
        self
    }

    /// Enable or disable TCP_NODELAY.
    pub fn with_tcp_nodelay(mut self, nodelay: bool) -> Self {
        self.tcp_nodelay = nodelay;
        self
    }

    /// Set the maximum frame size.
    pub fn with_max_frame_size(mut self, size: usize) -> Self {
        self.max_frame_size = Some(size);
        self
    }

    /// Accept frames of any announced length.
    pub fn without_max_frame_size(mut self) -> Self {
        self.max_frame_size = None;
        self
    }

    /// Add an initial SUB subscription.
    pub fn with_subscription(mut self, prefix: impl Into<Bytes>) -> Self {
        self.subscribe.push(prefix.into());
        self
    }
}
