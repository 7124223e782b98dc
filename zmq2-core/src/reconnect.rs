//! Reconnection delay tracking.
//!
//! ZeroMQ 2.x re-dials a dropped connect-initiated endpoint after a short
//! fixed delay, forever. `reconnect_ivl_max` optionally turns that into an
//! exponential backoff.

use crate::options::SocketOptions;
use std::time::Duration;

/// Reconnection state tracker for one endpoint.
///
/// # Example
///
/// ```rust
/// use zmq2_core::reconnect::ReconnectState;
/// use zmq2_core::options::SocketOptions;
/// use std::time::Duration;
///
/// // Fixed delay (the default)
/// let mut fixed = ReconnectState::new(&SocketOptions::default());
/// assert_eq!(fixed.next_delay(), Duration::from_millis(30));
/// assert_eq!(fixed.next_delay(), Duration::from_millis(30));
///
/// // Exponential backoff
/// let options = SocketOptions::default()
///     .with_reconnect_ivl(Duration::from_millis(100))
///     .with_reconnect_ivl_max(Duration::from_secs(10));
/// let mut backoff = ReconnectState::new(&options);
/// assert_eq!(backoff.next_delay(), Duration::from_millis(100));
/// assert_eq!(backoff.next_delay(), Duration::from_millis(200));
///
/// // Reset on successful connection
/// backoff.reset();
/// assert_eq!(backoff.next_delay(), Duration::from_millis(100));
/// ```
#[derive(Debug, Clone)]
pub struct ReconnectState {
    /// Base reconnection interval
    base_interval: Duration,
    /// Maximum reconnection interval; not above `base_interval` means fixed
    max_interval: Duration,
    /// Attempts since the last reset
    attempt: u32,
    /// Delay returned by the next call to `next_delay`
    current_interval: Duration,
}

impl ReconnectState {
    /// Create a new reconnection state tracker from socket options.
    pub const fn new(options: &SocketOptions) -> Self {
        Self {
            base_interval: options.reconnect_ivl,
            max_interval: options.reconnect_ivl_max,
            attempt: 0,
            current_interval: options.reconnect_ivl,
        }
    }

    /// Get the delay for the next reconnection attempt.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current_interval;
        self.attempt = self.attempt.saturating_add(1);

        if self.is_backoff() {
            self.current_interval = self
                .base_interval
                .saturating_mul(1_u32 << self.attempt.min(10))
                .min(self.max_interval);
        }

        delay
    }

    /// Reset the reconnection state after a successful connection.
    pub fn reset(&mut self) {
        self.attempt = 0;
        self.current_interval = self.base_interval;
    }

    /// Whether delays grow between attempts.
    #[inline]
    #[must_use]
    pub fn is_backoff(&self) -> bool {
        self.max_interval > self.base_interval
    }

    /// Get the current attempt number.
    #[inline]
    #[must_use]
    pub const fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Get the current reconnection interval.
    #[inline]
    #[must_use]
    pub const fn current_interval(&self) -> Duration {
        self.current_interval
    }
}
